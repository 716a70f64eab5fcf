use tracing::{debug, info, trace};

use super::rules::{
    MAX_SUPPORTED_AGE, calculate_rmd_amount, can_contribute, get_rmd_starting_age,
};
use super::types::{
    AccountBucket, AccountYear, CategoryType, ExpenseCategory, FundingCase, OneTimeEvent, PlanInput,
    Profile, Projection, ProjectionSettings, SameYearEvents, YearRow,
};
use crate::error::{Error, Result};

/// Shortfalls below this are float noise, not something to fund.
const SHORTFALL_EPSILON: f64 = 1e-9;

/// Stable handle for an account: its position in the caller's input list.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct AccountId(usize);

/// The simulation's working copy of balances. Inputs are never touched.
#[derive(Debug)]
struct Ledger {
    balances: Vec<f64>,
    withdrawal_order: Vec<AccountId>,
}

impl Ledger {
    fn new(accounts: &[AccountBucket]) -> Self {
        let mut withdrawal_order = (0..accounts.len()).map(AccountId).collect::<Vec<_>>();
        // sort_by_key is stable, so equal priorities keep input order.
        withdrawal_order.sort_by_key(|id| accounts[id.0].priority);
        Self {
            balances: accounts.iter().map(|a| a.balance.max(0.0)).collect(),
            withdrawal_order,
        }
    }

    fn total(&self) -> f64 {
        self.balances.iter().sum()
    }

    fn withdraw(&mut self, id: AccountId, amount: f64) -> f64 {
        let taken = self.balances[id.0].min(amount).max(0.0);
        self.balances[id.0] -= taken;
        taken
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct AccountFlow {
    contribution: f64,
    withdrawal: f64,
    rmd: f64,
    investment_return: f64,
}

/// Outcome of the income-only part of the funding waterfall.
#[derive(Debug, Clone, Copy)]
struct FundingDecision {
    case: FundingCase,
    flex_actual: f64,
    contribution_cash: f64,
}

#[derive(Debug, Clone, Default)]
struct EventOutcome {
    amount: f64,
    description: String,
    account: String,
}

/// Year-by-year projection from `profile.current_age` to `profile.max_age`,
/// stopping after the first year the portfolio is exhausted.
pub fn run_comprehensive_projection(
    profile: &Profile,
    accounts: &[AccountBucket],
    expenses: &[ExpenseCategory],
    events: &[OneTimeEvent],
    settings: &ProjectionSettings,
) -> Result<Projection> {
    validate_inputs(profile, accounts, expenses, events)?;

    if profile.max_age < profile.current_age {
        debug!(
            current_age = profile.current_age,
            max_age = profile.max_age,
            "max age precedes current age; nothing to project"
        );
        return Ok(Projection::default());
    }

    let projection_years = profile.max_age - profile.current_age + 1;
    let birth_year = settings
        .simulation_start_year
        .checked_sub(profile.current_age as i32)
        .ok_or_else(|| Error::invalid("simulation_start_year", "year out of range"))?;
    settings
        .simulation_start_year
        .checked_add(projection_years as i32)
        .ok_or_else(|| Error::invalid("simulation_start_year", "year out of range"))?;
    let mut ledger = Ledger::new(accounts);

    let core_base = category_total(expenses, CategoryType::Core);
    let flex_base = category_total(expenses, CategoryType::Flex);

    let rmd_starting_age = get_rmd_starting_age(birth_year);

    debug!(
        years = projection_years,
        accounts = accounts.len(),
        birth_year,
        rmd_starting_age,
        "starting projection"
    );

    let mut rows = Vec::with_capacity(projection_years as usize);

    for offset in 0..projection_years {
        let age = profile.current_age + offset;
        let year = settings.simulation_start_year + offset as i32;
        let starting_portfolio = ledger.total();
        let mut flows = vec![AccountFlow::default(); accounts.len()];

        let work_income = work_income_for(profile, age, offset);
        let ss_income = social_security_for(profile, age);
        let total_income = work_income + ss_income;

        let inflation_multiplier = (1.0 + profile.inflation_rate).powi(offset as i32);
        let core_expenses = core_base * inflation_multiplier;
        let flex_expenses_full = flex_base * inflation_multiplier;

        let planned = planned_contributions(accounts, age, profile.work_end_age);
        let total_planned: f64 = planned.iter().sum();

        let decision = fund_from_income(
            total_income - core_expenses,
            flex_expenses_full,
            total_planned,
            profile.max_flex_reduction,
        );
        let income_scale = if total_planned > 0.0 {
            decision.contribution_cash / total_planned
        } else {
            0.0
        };
        let mut funded = planned.iter().map(|p| p * income_scale).collect::<Vec<_>>();
        let income_funded_contributions = decision.contribution_cash;

        let portfolio_funded_contributions =
            top_up_contributions(&mut ledger, &planned, &mut funded, &mut flows);

        let contribution_shortfall = planned
            .iter()
            .zip(&funded)
            .map(|(p, f)| (p - f).max(0.0))
            .sum::<f64>();

        apply_contributions(&mut ledger, &funded, &mut flows);
        let total_contributions: f64 = funded.iter().sum();

        let total_rmds = apply_rmds(accounts, &mut ledger, age, rmd_starting_age, &mut flows);

        let total_expenses = core_expenses + decision.flex_actual + income_funded_contributions;
        let surplus_deficit = total_income + total_rmds - total_expenses;

        let unfunded_deficit = if surplus_deficit < 0.0 {
            withdraw_in_priority_order(&mut ledger, -surplus_deficit, &mut flows)
        } else {
            0.0
        };

        apply_investment_returns(accounts, &mut ledger, &mut flows);

        let event = apply_events(
            accounts,
            events,
            year,
            settings.same_year_events,
            &mut ledger,
        );

        let total_portfolio = ledger.total();
        let portfolio_depleted = total_portfolio <= 0.0;

        let total_withdrawals = flows.iter().map(|f| f.withdrawal).sum::<f64>();
        let flex_multiplier = if flex_expenses_full > 0.0 {
            decision.flex_actual / flex_expenses_full
        } else {
            1.0
        };

        trace!(
            age,
            year,
            case = ?decision.case,
            surplus_deficit,
            total_portfolio,
            "projected year"
        );

        rows.push(YearRow {
            year,
            age,
            work_income,
            ss_income,
            total_income,
            core_expenses,
            flex_expenses_full,
            flex_expenses_actual: decision.flex_actual,
            flex_multiplier,
            total_expenses,
            surplus_deficit,
            total_contributions,
            portfolio_funded_contributions,
            contribution_shortfall,
            total_rmds,
            total_withdrawals,
            unfunded_deficit,
            starting_portfolio,
            total_portfolio,
            portfolio_depleted,
            event_amount: event.amount,
            event_description: event.description,
            event_account: event.account,
            funding_case: decision.case,
            accounts: accounts
                .iter()
                .zip(&flows)
                .zip(&ledger.balances)
                .map(|((account, flow), balance)| AccountYear {
                    name: account.name.clone(),
                    account_type: account.account_type,
                    balance: *balance,
                    contribution: flow.contribution,
                    withdrawal: flow.withdrawal,
                    rmd: flow.rmd,
                    investment_return: flow.investment_return,
                })
                .collect(),
        });

        if portfolio_depleted {
            info!(age, year, "portfolio depleted; ending projection");
            break;
        }
    }

    Ok(Projection { rows })
}

impl PlanInput {
    pub fn project(&self) -> Result<Projection> {
        run_comprehensive_projection(
            &self.profile,
            &self.accounts,
            &self.expenses,
            &self.events,
            &self.settings,
        )
    }
}

fn validate_inputs(
    profile: &Profile,
    accounts: &[AccountBucket],
    expenses: &[ExpenseCategory],
    events: &[OneTimeEvent],
) -> Result<()> {
    for (field, value) in [
        ("current_work_income", profile.current_work_income),
        ("ss_monthly_benefit", profile.ss_monthly_benefit),
        ("ss_cola", profile.ss_cola),
        ("inflation_rate", profile.inflation_rate),
        ("max_flex_reduction", profile.max_flex_reduction),
    ] {
        require_finite(field, value)?;
    }
    for (field, age) in [
        ("current_age", profile.current_age),
        ("target_age", profile.target_age),
        ("max_age", profile.max_age),
        ("work_end_age", profile.work_end_age),
        ("ss_start_age", profile.ss_start_age),
    ] {
        if age > MAX_SUPPORTED_AGE {
            return Err(Error::invalid(
                field,
                format!("must be at most {MAX_SUPPORTED_AGE}, got {age}"),
            ));
        }
    }
    if !(0.0..=1.0).contains(&profile.max_flex_reduction) {
        return Err(Error::invalid(
            "max_flex_reduction",
            format!("must be between 0 and 1, got {}", profile.max_flex_reduction),
        ));
    }

    for account in accounts {
        require_finite(&format!("{}.balance", account.name), account.balance)?;
        require_finite(
            &format!("{}.annual_return", account.name),
            account.annual_return,
        )?;
        require_finite(
            &format!("{}.planned_contribution", account.name),
            account.planned_contribution,
        )?;
    }
    for expense in expenses {
        require_finite(
            &format!("{}.annual_amount", expense.name),
            expense.annual_amount,
        )?;
    }
    for event in events {
        require_finite(&format!("event {} amount", event.year), event.amount)?;
    }
    Ok(())
}

fn require_finite(field: &str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(Error::invalid(field, format!("must be finite, got {value}")))
    }
}

fn category_total(expenses: &[ExpenseCategory], category_type: CategoryType) -> f64 {
    expenses
        .iter()
        .filter(|e| e.category_type == category_type)
        .map(|e| e.annual_amount)
        .sum()
}

/// Work income is indexed to general inflation until the work-end age.
fn work_income_for(profile: &Profile, age: u32, offset: u32) -> f64 {
    if age < profile.work_end_age {
        profile.current_work_income * (1.0 + profile.inflation_rate).powi(offset as i32)
    } else {
        0.0
    }
}

fn social_security_for(profile: &Profile, age: u32) -> f64 {
    if age < profile.ss_start_age {
        return 0.0;
    }
    let years_on_ss = (age - profile.ss_start_age) as i32;
    profile.ss_monthly_benefit * 12.0 * (1.0 + profile.ss_cola).powi(years_on_ss)
}

fn planned_contributions(accounts: &[AccountBucket], age: u32, work_end_age: u32) -> Vec<f64> {
    accounts
        .iter()
        .map(|a| {
            if can_contribute(
                a.account_type,
                age,
                work_end_age,
                a.continue_post_retirement,
            ) {
                a.planned_contribution.max(0.0)
            } else {
                0.0
            }
        })
        .collect()
}

/// Income-only funding waterfall. Contributions come ahead of FLEX spending,
/// but FLEX never drops below `flex_full * (1 - max_flex_reduction)`. CORE is
/// already taken out of `available`.
fn fund_from_income(
    available: f64,
    flex_full: f64,
    total_planned: f64,
    max_flex_reduction: f64,
) -> FundingDecision {
    let flex_floor = flex_full * (1.0 - max_flex_reduction);

    if available >= flex_full + total_planned {
        return FundingDecision {
            case: FundingCase::FullyFunded,
            flex_actual: flex_full,
            contribution_cash: total_planned,
        };
    }

    if available >= total_planned {
        let room_for_flex = available - total_planned;
        if room_for_flex >= flex_floor {
            return FundingDecision {
                case: FundingCase::FlexReducedForContributions,
                flex_actual: room_for_flex,
                contribution_cash: total_planned,
            };
        }
    }

    FundingDecision {
        case: FundingCase::FlexFloorWithPartialContributions,
        flex_actual: flex_floor,
        contribution_cash: (available - flex_floor).clamp(0.0, total_planned),
    }
}

/// Moves money from other accounts, in withdrawal-priority order, into any
/// account whose planned contribution income could not cover. Accounts with
/// their own unmet contribution are never sources, so short accounts cannot
/// fund themselves or each other. Returns the total moved.
fn top_up_contributions(
    ledger: &mut Ledger,
    planned: &[f64],
    funded: &mut [f64],
    flows: &mut [AccountFlow],
) -> f64 {
    let short = planned
        .iter()
        .zip(funded.iter())
        .map(|(p, f)| p - f > SHORTFALL_EPSILON)
        .collect::<Vec<_>>();
    let mut moved = 0.0;
    for target in 0..planned.len() {
        let mut shortfall = planned[target] - funded[target];
        if shortfall <= SHORTFALL_EPSILON {
            continue;
        }

        let order = ledger.withdrawal_order.clone();
        for source in order {
            if shortfall <= SHORTFALL_EPSILON {
                break;
            }
            if short[source.0] {
                continue;
            }
            let taken = ledger.withdraw(source, shortfall);
            flows[source.0].withdrawal += taken;
            funded[target] += taken;
            shortfall -= taken;
            moved += taken;
        }
    }
    moved
}

fn apply_contributions(ledger: &mut Ledger, funded: &[f64], flows: &mut [AccountFlow]) {
    for (idx, amount) in funded.iter().enumerate() {
        ledger.balances[idx] += amount;
        flows[idx].contribution = *amount;
    }
}

fn apply_rmds(
    accounts: &[AccountBucket],
    ledger: &mut Ledger,
    age: u32,
    rmd_starting_age: u32,
    flows: &mut [AccountFlow],
) -> f64 {
    let mut total = 0.0;
    for (idx, account) in accounts.iter().enumerate() {
        if !account.account_type.is_rmd_subject() {
            continue;
        }
        let required = calculate_rmd_amount(ledger.balances[idx], age, rmd_starting_age);
        let taken = ledger.withdraw(AccountId(idx), required);
        flows[idx].rmd = taken;
        total += taken;
    }
    total
}

/// Covers `deficit` from accounts in priority order. Returns whatever could
/// not be covered.
fn withdraw_in_priority_order(ledger: &mut Ledger, deficit: f64, flows: &mut [AccountFlow]) -> f64 {
    let mut remaining = deficit;
    let order = ledger.withdrawal_order.clone();
    for id in order {
        if remaining <= 0.0 {
            break;
        }
        let taken = ledger.withdraw(id, remaining);
        flows[id.0].withdrawal += taken;
        remaining -= taken;
    }
    remaining.max(0.0)
}

fn apply_investment_returns(
    accounts: &[AccountBucket],
    ledger: &mut Ledger,
    flows: &mut [AccountFlow],
) {
    for (idx, account) in accounts.iter().enumerate() {
        let before = ledger.balances[idx];
        let after = (before * (1.0 + account.annual_return)).max(0.0);
        ledger.balances[idx] = after;
        flows[idx].investment_return = after - before;
    }
}

fn apply_events(
    accounts: &[AccountBucket],
    events: &[OneTimeEvent],
    year: i32,
    policy: SameYearEvents,
    ledger: &mut Ledger,
) -> EventOutcome {
    let matching = events.iter().filter(|e| e.year == year);
    let applied: Vec<&OneTimeEvent> = match policy {
        SameYearEvents::FirstMatch => matching.take(1).collect(),
        SameYearEvents::All => matching.collect(),
    };

    let mut outcome = EventOutcome::default();
    for event in applied {
        if let Some(idx) = accounts.iter().position(|a| a.name == event.account_name) {
            ledger.balances[idx] = (ledger.balances[idx] - event.amount).max(0.0);
        } else {
            debug!(
                year,
                account = %event.account_name,
                "event names no known account; recorded without balance change"
            );
        }

        outcome.amount += event.amount;
        if !outcome.description.is_empty() {
            outcome.description.push_str("; ");
            outcome.account.push_str("; ");
        }
        outcome.description.push_str(&event.description);
        outcome.account.push_str(&event.account_name);
    }
    outcome
}
