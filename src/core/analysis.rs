use tracing::debug;

use super::rules::can_contribute;
use super::types::{
    AccountBucket, PlanAnalysis, PlanStatus, Projection, SustainableWithdrawal, YearRow,
};
use crate::error::{Error, Result};

/// Fixed real return used by the independent withdrawal benchmark.
pub const DEFAULT_CONSERVATIVE_REAL_RETURN: f64 = 0.04;

pub const SUSTAINABLE_WITHDRAWAL_LABEL: &str =
    "Conservative benchmark: current balances plus planned contributions at a fixed real return, \
     independent of the projection's own assumptions";

const FLEX_WARNING_MULTIPLIER: f64 = 0.8;
const FLEX_STRAIN_PORTFOLIO_RATIO: f64 = 0.8;
const CONTRIBUTION_SHORTFALL_NOISE: f64 = 100.0;
const EARLY_WITHDRAWAL_NOISE: f64 = 1_000.0;

/// Inputs for the optional sustainable-withdrawal benchmark.
#[derive(Debug, Clone, Copy)]
pub struct BenchmarkContext<'a> {
    pub accounts: &'a [AccountBucket],
    pub current_age: u32,
    pub work_end_age: u32,
    pub real_return: f64,
}

impl<'a> BenchmarkContext<'a> {
    pub fn new(accounts: &'a [AccountBucket], current_age: u32, work_end_age: u32) -> Self {
        Self {
            accounts,
            current_age,
            work_end_age,
            real_return: DEFAULT_CONSERVATIVE_REAL_RETURN,
        }
    }

    pub fn with_real_return(mut self, real_return: f64) -> Self {
        self.real_return = real_return;
        self
    }
}

/// Rejects benchmark rates the annuity math cannot turn into a finite payment.
pub fn check_benchmark_return(real_return: Option<f64>) -> Result<()> {
    match real_return {
        Some(r) if !r.is_finite() || r <= -1.0 || r > 1.0 => Err(Error::invalid(
            "benchmark_real_return",
            format!("must be a finite rate above -1 and at most 1, got {r}"),
        )),
        _ => Ok(()),
    }
}

pub fn analyze_retirement_plan(
    projection: &Projection,
    target_age: u32,
    benchmark: Option<&BenchmarkContext<'_>>,
) -> PlanAnalysis {
    let (Some(first), Some(last)) = (projection.first(), projection.last()) else {
        return PlanAnalysis {
            run_out_age: None,
            run_out_year: None,
            cushion_years: 0,
            status: PlanStatus::AtRisk,
            warnings: vec!["No projection data".to_string()],
            final_balance: 0.0,
            sustainable_withdrawal: None,
        };
    };
    let rows = &projection.rows;

    let depleted = rows.iter().find(|r| r.portfolio_depleted);
    let run_out_age = depleted.map(|r| r.age);
    let run_out_year = depleted.map(|r| r.year);

    let horizon_age = run_out_age.unwrap_or(last.age);
    let cushion_years = i64::from(horizon_age) - i64::from(target_age);

    let mut warnings = Vec::new();
    let status = match run_out_age {
        Some(age) if age < target_age => {
            warnings.push(format!(
                "Portfolio depletes at age {age}, {} years before target",
                target_age - age
            ));
            PlanStatus::AtRisk
        }
        _ => PlanStatus::OnTrack,
    };

    warnings.extend(flex_reduction_warning(rows, first.starting_portfolio, status));
    warnings.extend(contribution_shortfall_warning(rows));
    warnings.extend(early_withdrawal_warning(rows));

    let sustainable_withdrawal =
        benchmark.and_then(|ctx| conservative_sustainable_withdrawal(ctx, target_age));

    debug!(
        ?run_out_age,
        cushion_years,
        status = status.label(),
        warnings = warnings.len(),
        "analyzed plan"
    );

    PlanAnalysis {
        run_out_age,
        run_out_year,
        cushion_years,
        status,
        warnings,
        final_balance: last.total_portfolio,
        sustainable_withdrawal,
    }
}

/// Only warns when the cut coincides with real strain on the portfolio. A low
/// average multiplier alongside a growing portfolio is just contributions
/// being prioritized.
fn flex_reduction_warning(
    rows: &[YearRow],
    initial_portfolio: f64,
    status: PlanStatus,
) -> Option<String> {
    let mean_multiplier = mean(rows.iter().map(|r| r.flex_multiplier))?;
    if mean_multiplier >= FLEX_WARNING_MULTIPLIER {
        return None;
    }

    let reduced = rows
        .iter()
        .filter(|r| r.flex_multiplier < 1.0 - 1e-9)
        .collect::<Vec<_>>();
    let mean_reduced_portfolio = mean(reduced.iter().map(|r| r.total_portfolio))?;
    let strained = mean_reduced_portfolio < FLEX_STRAIN_PORTFOLIO_RATIO * initial_portfolio
        || status == PlanStatus::AtRisk;
    if !strained {
        return None;
    }

    let planned: f64 = rows.iter().map(|r| r.flex_expenses_full).sum();
    let delivered = if planned > 0.0 {
        rows.iter().map(|r| r.flex_expenses_actual).sum::<f64>() / planned
    } else {
        mean_multiplier
    };
    let worst = reduced
        .iter()
        .min_by(|a, b| a.flex_multiplier.total_cmp(&b.flex_multiplier))?;
    let first_age = reduced.first()?.age;
    let last_age = reduced.last()?.age;

    Some(format!(
        "Flexible spending averages {:.0}% of planned over the plan; reduced in {} years \
         (ages {first_age}-{last_age}), lowest {:.0}% at age {}",
        delivered * 100.0,
        reduced.len(),
        worst.flex_multiplier * 100.0,
        worst.age,
    ))
}

/// Shortfalls after work stops are not flagged; the retirement-era question
/// is sustainable withdrawal, not contribution funding.
fn contribution_shortfall_warning(rows: &[YearRow]) -> Option<String> {
    let affected = rows
        .iter()
        .filter(|r| r.contribution_shortfall > CONTRIBUTION_SHORTFALL_NOISE && r.work_income > 0.0)
        .collect::<Vec<_>>();
    let first = affected.first()?;
    let average_monthly = mean(affected.iter().map(|r| r.contribution_shortfall / 12.0))?;

    Some(format!(
        "Planned contributions underfunded in {} working years starting {} (age {}); \
         average shortfall {}/month",
        affected.len(),
        first.year,
        first.age,
        dollars(average_monthly),
    ))
}

fn early_withdrawal_warning(rows: &[YearRow]) -> Option<String> {
    let working = rows.iter().filter(|r| r.work_income > 0.0);
    let total: f64 = working.clone().map(|r| r.total_withdrawals).sum();
    if total <= EARLY_WITHDRAWAL_NOISE {
        return None;
    }
    let years = working.filter(|r| r.total_withdrawals > 0.0).count();
    Some(format!(
        "Withdrawing {} from the portfolio across {years} years while still working",
        dollars(total)
    ))
}

fn conservative_sustainable_withdrawal(
    ctx: &BenchmarkContext<'_>,
    target_age: u32,
) -> Option<SustainableWithdrawal> {
    let retirement_start = ctx.work_end_age.max(ctx.current_age);
    let years = target_age.saturating_sub(retirement_start);
    if years == 0 {
        return None;
    }

    let retirement_balance = calculate_conservative_retirement_balance(
        ctx.accounts,
        ctx.current_age,
        ctx.work_end_age,
        ctx.real_return,
    );
    let annual = annuity_payment(retirement_balance, ctx.real_return, years);

    Some(SustainableWithdrawal {
        annual,
        monthly: annual / 12.0,
        retirement_balance,
        real_return: ctx.real_return,
        years,
        label: SUSTAINABLE_WITHDRAWAL_LABEL.to_string(),
    })
}

/// Grows today's balances to `work_end_age` at `real_return`, adding each
/// year's eligible planned contributions before compounding. Living expenses
/// are ignored.
pub fn calculate_conservative_retirement_balance(
    accounts: &[AccountBucket],
    current_age: u32,
    work_end_age: u32,
    real_return: f64,
) -> f64 {
    let mut balance: f64 = accounts.iter().map(|a| a.balance.max(0.0)).sum();
    for age in current_age..work_end_age {
        let contributions: f64 = accounts
            .iter()
            .filter(|a| {
                can_contribute(
                    a.account_type,
                    age,
                    work_end_age,
                    a.continue_post_retirement,
                )
            })
            .map(|a| a.planned_contribution.max(0.0))
            .sum();
        balance = ((balance + contributions) * (1.0 + real_return)).max(0.0);
    }
    balance
}

/// Level annual payment that exhausts `present_value` over `years` at `rate`.
pub fn annuity_payment(present_value: f64, rate: f64, years: u32) -> f64 {
    if years == 0 {
        return 0.0;
    }
    let n = years as f64;
    if rate.abs() < 1e-12 {
        return present_value / n;
    }
    let growth = (1.0 + rate).powf(n);
    let denom = growth - 1.0;
    if denom.abs() <= 1e-12 {
        return present_value / n;
    }
    present_value * rate * growth / denom
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Whole-dollar amount with thousands separators, e.g. `$1,234`.
pub fn dollars(amount: f64) -> String {
    let rounded = amount.round();
    let digits = format!("{:.0}", rounded.abs());
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if rounded < 0.0 {
        format!("-${grouped}")
    } else {
        format!("${grouped}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine::run_comprehensive_projection;
    use crate::core::types::{
        AccountType, ExpenseCategory, FundingCase, Profile, ProjectionSettings,
    };

    fn assert_approx_tol(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    fn blank_row(age: u32) -> YearRow {
        YearRow {
            year: 2026 + (age as i32 - 60),
            age,
            work_income: 0.0,
            ss_income: 0.0,
            total_income: 0.0,
            core_expenses: 0.0,
            flex_expenses_full: 10_000.0,
            flex_expenses_actual: 10_000.0,
            flex_multiplier: 1.0,
            total_expenses: 0.0,
            surplus_deficit: 0.0,
            total_contributions: 0.0,
            portfolio_funded_contributions: 0.0,
            contribution_shortfall: 0.0,
            total_rmds: 0.0,
            total_withdrawals: 0.0,
            unfunded_deficit: 0.0,
            starting_portfolio: 500_000.0,
            total_portfolio: 500_000.0,
            portfolio_depleted: false,
            event_amount: 0.0,
            event_description: String::new(),
            event_account: String::new(),
            funding_case: FundingCase::FullyFunded,
            accounts: Vec::new(),
        }
    }

    fn rows(ages: std::ops::RangeInclusive<u32>) -> Vec<YearRow> {
        ages.map(blank_row).collect()
    }

    #[test]
    fn empty_projection_is_at_risk() {
        let analysis = analyze_retirement_plan(&Projection::default(), 90, None);
        assert_eq!(analysis.status, PlanStatus::AtRisk);
        assert_eq!(analysis.cushion_years, 0);
        assert_eq!(analysis.warnings, vec!["No projection data".to_string()]);
        assert_eq!(analysis.run_out_age, None);
        assert!(analysis.sustainable_withdrawal.is_none());
    }

    #[test]
    fn depletion_before_target_is_at_risk_with_negative_cushion() {
        let mut p = Profile::new(65, 90, 65, 65);
        p.ss_monthly_benefit = 1_000.0;
        let projection = run_comprehensive_projection(
            &p,
            &[AccountBucket::new(
                "Taxable",
                100_000.0,
                0.05,
                1,
                AccountType::TaxableBrokerage,
                0.0,
            )],
            &[ExpenseCategory::core("Living", 40_000.0)],
            &[],
            &ProjectionSettings::default(),
        )
        .expect("valid inputs");

        let analysis = analyze_retirement_plan(&projection, 90, None);
        assert_eq!(analysis.run_out_age, Some(68));
        assert_eq!(analysis.run_out_year, Some(2029));
        assert_eq!(analysis.cushion_years, -22);
        assert_eq!(analysis.status, PlanStatus::AtRisk);
        assert_eq!(analysis.final_balance, 0.0);
        assert!(
            analysis.warnings[0].contains("depletes at age 68, 22 years before target"),
            "{:?}",
            analysis.warnings
        );
    }

    #[test]
    fn no_depletion_measures_cushion_from_last_row() {
        let projection = Projection {
            rows: rows(60..=110),
        };
        let analysis = analyze_retirement_plan(&projection, 90, None);
        assert_eq!(analysis.run_out_age, None);
        assert_eq!(analysis.cushion_years, 20);
        assert_eq!(analysis.status, PlanStatus::OnTrack);
        assert!(analysis.warnings.is_empty());
    }

    #[test]
    fn depletion_at_or_after_target_stays_on_track() {
        let mut plan = rows(60..=93);
        let last = plan.last_mut().expect("rows");
        last.portfolio_depleted = true;
        last.total_portfolio = 0.0;

        let analysis = analyze_retirement_plan(&Projection { rows: plan }, 90, None);
        assert_eq!(analysis.run_out_age, Some(93));
        assert_eq!(analysis.cushion_years, 3);
        assert_eq!(analysis.status, PlanStatus::OnTrack);
    }

    #[test]
    fn low_flex_with_growing_portfolio_is_not_flagged() {
        let mut plan = rows(40..=60);
        for (idx, row) in plan.iter_mut().enumerate() {
            row.flex_multiplier = 0.5;
            row.flex_expenses_actual = 5_000.0;
            row.total_portfolio = 500_000.0 + 50_000.0 * idx as f64;
        }
        let analysis = analyze_retirement_plan(&Projection { rows: plan }, 50, None);
        assert!(analysis.warnings.is_empty(), "{:?}", analysis.warnings);
    }

    #[test]
    fn low_flex_with_shrinking_portfolio_is_flagged() {
        let mut plan = rows(65..=95);
        for (idx, row) in plan.iter_mut().enumerate() {
            row.total_portfolio = 500_000.0 - 15_000.0 * idx as f64;
            if idx >= 5 {
                row.flex_multiplier = 0.5;
                row.flex_expenses_actual = 5_000.0;
            }
        }
        plan[20].flex_multiplier = 0.4;
        plan[20].flex_expenses_actual = 4_000.0;

        let analysis = analyze_retirement_plan(&Projection { rows: plan }, 90, None);
        let warning = analysis
            .warnings
            .iter()
            .find(|w| w.starts_with("Flexible spending"))
            .expect("flex warning");
        assert!(warning.contains("reduced in 26 years"), "{warning}");
        assert!(warning.contains("ages 70-95"), "{warning}");
        assert!(warning.contains("lowest 40% at age 85"), "{warning}");
    }

    #[test]
    fn low_flex_is_flagged_when_plan_is_at_risk_despite_healthy_balances() {
        // Cut years hold the full starting balance, so only the status gate applies.
        let mut plan = rows(60..=80);
        for row in plan.iter_mut().take(20) {
            row.flex_multiplier = 0.5;
            row.flex_expenses_actual = 5_000.0;
        }
        let last = plan.last_mut().expect("rows");
        last.portfolio_depleted = true;
        last.total_portfolio = 0.0;

        let analysis = analyze_retirement_plan(&Projection { rows: plan.clone() }, 90, None);
        assert_eq!(analysis.status, PlanStatus::AtRisk);
        let warning = analysis
            .warnings
            .iter()
            .find(|w| w.starts_with("Flexible spending"))
            .expect("flex warning");
        assert!(warning.contains("reduced in 20 years"), "{warning}");
        assert!(warning.contains("ages 60-79"), "{warning}");

        // Same rows without the depletion raise no flex warning.
        let last = plan.last_mut().expect("rows");
        last.portfolio_depleted = false;
        last.total_portfolio = 500_000.0;
        let analysis = analyze_retirement_plan(&Projection { rows: plan }, 80, None);
        assert_eq!(analysis.status, PlanStatus::OnTrack);
        assert!(analysis.warnings.is_empty(), "{:?}", analysis.warnings);
    }

    #[test]
    fn contribution_shortfall_warns_only_while_working() {
        let mut plan = rows(60..=70);
        for row in plan.iter_mut().take(3) {
            row.work_income = 50_000.0;
            row.contribution_shortfall = 2_400.0;
        }
        // Retired shortfalls and noise are ignored.
        plan[5].contribution_shortfall = 10_000.0;
        plan[3].work_income = 50_000.0;
        plan[3].contribution_shortfall = 50.0;

        let analysis = analyze_retirement_plan(&Projection { rows: plan }, 70, None);
        assert_eq!(analysis.warnings.len(), 1, "{:?}", analysis.warnings);
        let warning = &analysis.warnings[0];
        assert!(warning.contains("3 working years"), "{warning}");
        assert!(warning.contains("starting 2026 (age 60)"), "{warning}");
        assert!(warning.contains("$200/month"), "{warning}");
    }

    #[test]
    fn early_withdrawal_warning_respects_noise_threshold() {
        let mut plan = rows(55..=70);
        plan[0].work_income = 80_000.0;
        plan[0].total_withdrawals = 900.0;
        // Retired-year withdrawals never count toward the total.
        plan[10].total_withdrawals = 50_000.0;
        plan[12].total_withdrawals = 30_000.0;
        let quiet = analyze_retirement_plan(&Projection { rows: plan.clone() }, 70, None);
        assert!(quiet.warnings.is_empty());

        plan[1].work_income = 80_000.0;
        plan[1].total_withdrawals = 4_100.0;
        let loud = analyze_retirement_plan(&Projection { rows: plan }, 70, None);
        assert_eq!(
            loud.warnings,
            vec!["Withdrawing $5,000 from the portfolio across 2 years while still working"]
        );
    }

    #[test]
    fn conservative_balance_adds_contributions_before_compounding() {
        let accounts = [
            AccountBucket::new("401k", 100_000.0, 0.09, 1, AccountType::Employer401k, 10_000.0),
            AccountBucket::new("Taxable", 0.0, 0.09, 2, AccountType::TaxableBrokerage, 0.0),
        ];
        // (100,000 + 10,000) * 1.04 = 114,400; (114,400 + 10,000) * 1.04 = 129,376.
        assert_approx_tol(
            calculate_conservative_retirement_balance(&accounts, 60, 62, 0.04),
            129_376.0,
            1e-6,
        );
        assert_approx_tol(
            calculate_conservative_retirement_balance(&accounts, 62, 62, 0.04),
            100_000.0,
            1e-9,
        );
    }

    #[test]
    fn annuity_payment_matches_standard_factor() {
        assert_approx_tol(annuity_payment(100_000.0, 0.04, 25), 6_401.196, 0.01);
        assert_approx_tol(annuity_payment(100_000.0, 0.0, 25), 4_000.0, 1e-9);
        assert_eq!(annuity_payment(100_000.0, 0.04, 0), 0.0);
    }

    #[test]
    fn sustainable_withdrawal_uses_years_from_work_end_to_target() {
        let accounts = [AccountBucket::new(
            "Roth",
            100_000.0,
            0.10,
            1,
            AccountType::RothIra,
            0.0,
        )];
        let projection = Projection {
            rows: rows(65..=100),
        };
        let ctx = BenchmarkContext::new(&accounts, 65, 65);
        let analysis = analyze_retirement_plan(&projection, 90, Some(&ctx));
        let sustainable = analysis.sustainable_withdrawal.expect("benchmark");

        assert_eq!(sustainable.years, 25);
        assert_approx_tol(sustainable.retirement_balance, 100_000.0, 1e-9);
        assert_approx_tol(sustainable.annual, 6_401.196, 0.01);
        assert_approx_tol(sustainable.monthly, sustainable.annual / 12.0, 1e-9);
        assert_eq!(sustainable.real_return, DEFAULT_CONSERVATIVE_REAL_RETURN);
        assert!(sustainable.label.contains("independent"));
    }

    #[test]
    fn sustainable_withdrawal_absent_when_no_retirement_years() {
        let accounts = [AccountBucket::new(
            "Roth",
            100_000.0,
            0.10,
            1,
            AccountType::RothIra,
            0.0,
        )];
        let projection = Projection {
            rows: rows(65..=100),
        };
        let ctx = BenchmarkContext::new(&accounts, 65, 95).with_real_return(0.02);
        assert!(
            analyze_retirement_plan(&projection, 90, Some(&ctx))
                .sustainable_withdrawal
                .is_none()
        );
    }

    #[test]
    fn dollars_groups_thousands() {
        assert_eq!(dollars(0.0), "$0");
        assert_eq!(dollars(999.4), "$999");
        assert_eq!(dollars(1_234.5), "$1,235");
        assert_eq!(dollars(1_234_567.0), "$1,234,567");
        assert_eq!(dollars(-25_000.0), "-$25,000");
    }
}
