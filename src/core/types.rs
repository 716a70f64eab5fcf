use serde::{Deserialize, Serialize};

pub const DEFAULT_SIMULATION_START_YEAR: i32 = 2026;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum AccountType {
    #[serde(rename = "401k", alias = "employer_401k", alias = "employer-401k")]
    Employer401k,
    #[serde(rename = "traditional_ira", alias = "traditional-ira")]
    TraditionalIra,
    #[serde(rename = "roth_ira", alias = "roth-ira")]
    RothIra,
    #[serde(rename = "taxable_brokerage", alias = "taxable-brokerage", alias = "taxable")]
    TaxableBrokerage,
}

impl AccountType {
    /// Pre-tax types that carry required minimum distributions.
    pub fn is_rmd_subject(self) -> bool {
        matches!(self, AccountType::Employer401k | AccountType::TraditionalIra)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountBucket {
    pub name: String,
    pub balance: f64,
    pub annual_return: f64,
    pub priority: u32,
    pub account_type: AccountType,
    #[serde(default)]
    pub planned_contribution: f64,
    #[serde(default)]
    pub continue_post_retirement: bool,
}

impl AccountBucket {
    pub fn new(
        name: impl Into<String>,
        balance: f64,
        annual_return: f64,
        priority: u32,
        account_type: AccountType,
        planned_contribution: f64,
    ) -> Self {
        Self {
            name: name.into(),
            balance,
            annual_return,
            priority,
            account_type,
            planned_contribution,
            continue_post_retirement: false,
        }
    }

    pub fn continuing_post_retirement(mut self) -> Self {
        self.continue_post_retirement = true;
        self
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum CategoryType {
    #[serde(rename = "CORE", alias = "core", alias = "Core")]
    Core,
    #[serde(rename = "FLEX", alias = "flex", alias = "Flex")]
    Flex,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpenseCategory {
    pub name: String,
    pub annual_amount: f64,
    pub category_type: CategoryType,
}

impl ExpenseCategory {
    pub fn new(name: impl Into<String>, annual_amount: f64, category_type: CategoryType) -> Self {
        Self {
            name: name.into(),
            annual_amount,
            category_type,
        }
    }

    pub fn core(name: impl Into<String>, annual_amount: f64) -> Self {
        Self::new(name, annual_amount, CategoryType::Core)
    }

    pub fn flex(name: impl Into<String>, annual_amount: f64) -> Self {
        Self::new(name, annual_amount, CategoryType::Flex)
    }
}

/// A single-year portfolio transaction. Positive amounts leave the named
/// account, negative amounts are added to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OneTimeEvent {
    pub year: i32,
    pub description: String,
    pub amount: f64,
    #[serde(default)]
    pub account_name: String,
}

impl OneTimeEvent {
    pub fn new(
        year: i32,
        description: impl Into<String>,
        amount: f64,
        account_name: impl Into<String>,
    ) -> Self {
        Self {
            year,
            description: description.into(),
            amount,
            account_name: account_name.into(),
        }
    }
}

fn default_max_age() -> u32 {
    110
}

fn default_ss_cola() -> f64 {
    0.025
}

fn default_inflation_rate() -> f64 {
    0.03
}

fn default_max_flex_reduction() -> f64 {
    0.50
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub current_age: u32,
    pub target_age: u32,
    #[serde(default = "default_max_age")]
    pub max_age: u32,
    pub work_end_age: u32,
    #[serde(default)]
    pub current_work_income: f64,
    pub ss_start_age: u32,
    #[serde(default)]
    pub ss_monthly_benefit: f64,
    #[serde(default = "default_ss_cola")]
    pub ss_cola: f64,
    #[serde(default = "default_inflation_rate")]
    pub inflation_rate: f64,
    #[serde(default = "default_max_flex_reduction")]
    pub max_flex_reduction: f64,
}

impl Profile {
    /// Profile with the conventional defaults for everything but ages.
    pub fn new(current_age: u32, target_age: u32, work_end_age: u32, ss_start_age: u32) -> Self {
        Self {
            current_age,
            target_age,
            max_age: default_max_age(),
            work_end_age,
            current_work_income: 0.0,
            ss_start_age,
            ss_monthly_benefit: 0.0,
            ss_cola: default_ss_cola(),
            inflation_rate: default_inflation_rate(),
            max_flex_reduction: default_max_flex_reduction(),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SameYearEvents {
    #[default]
    FirstMatch,
    All,
}

fn default_start_year() -> i32 {
    DEFAULT_SIMULATION_START_YEAR
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProjectionSettings {
    #[serde(default = "default_start_year")]
    pub simulation_start_year: i32,
    #[serde(default)]
    pub same_year_events: SameYearEvents,
}

impl Default for ProjectionSettings {
    fn default() -> Self {
        Self {
            simulation_start_year: DEFAULT_SIMULATION_START_YEAR,
            same_year_events: SameYearEvents::FirstMatch,
        }
    }
}

/// Everything one projection run consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanInput {
    pub profile: Profile,
    #[serde(default)]
    pub accounts: Vec<AccountBucket>,
    #[serde(default)]
    pub expenses: Vec<ExpenseCategory>,
    #[serde(default)]
    pub events: Vec<OneTimeEvent>,
    #[serde(default)]
    pub settings: ProjectionSettings,
}

/// Which branch of the funding waterfall a year fell into.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FundingCase {
    FullyFunded,
    FlexReducedForContributions,
    FlexFloorWithPartialContributions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountYear {
    pub name: String,
    pub account_type: AccountType,
    pub balance: f64,
    pub contribution: f64,
    pub withdrawal: f64,
    pub rmd: f64,
    pub investment_return: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearRow {
    pub year: i32,
    pub age: u32,
    pub work_income: f64,
    pub ss_income: f64,
    pub total_income: f64,
    pub core_expenses: f64,
    pub flex_expenses_full: f64,
    pub flex_expenses_actual: f64,
    pub flex_multiplier: f64,
    /// CORE + FLEX + income-funded contributions. Top-ups moved between
    /// accounts are transfers and are not counted here.
    pub total_expenses: f64,
    pub surplus_deficit: f64,
    pub total_contributions: f64,
    pub portfolio_funded_contributions: f64,
    pub contribution_shortfall: f64,
    pub total_rmds: f64,
    pub total_withdrawals: f64,
    pub unfunded_deficit: f64,
    pub starting_portfolio: f64,
    pub total_portfolio: f64,
    pub portfolio_depleted: bool,
    pub event_amount: f64,
    pub event_description: String,
    pub event_account: String,
    pub funding_case: FundingCase,
    pub accounts: Vec<AccountYear>,
}

impl YearRow {
    pub fn account(&self, name: &str) -> Option<&AccountYear> {
        self.accounts.iter().find(|a| a.name == name)
    }

    /// Numeric value by flat column name, including `{account}_balance` style
    /// per-account columns.
    pub fn value(&self, column: &str) -> Option<f64> {
        let scalar = match column {
            "year" => Some(self.year as f64),
            "age" => Some(self.age as f64),
            "work_income" => Some(self.work_income),
            "ss_income" => Some(self.ss_income),
            "total_income" => Some(self.total_income),
            "core_expenses" => Some(self.core_expenses),
            "flex_expenses_full" => Some(self.flex_expenses_full),
            "flex_expenses_actual" => Some(self.flex_expenses_actual),
            "flex_multiplier" => Some(self.flex_multiplier),
            "total_expenses" => Some(self.total_expenses),
            "surplus_deficit" => Some(self.surplus_deficit),
            "total_contributions" => Some(self.total_contributions),
            "portfolio_funded_contributions" => Some(self.portfolio_funded_contributions),
            "contribution_shortfall" => Some(self.contribution_shortfall),
            "total_rmds" => Some(self.total_rmds),
            "total_withdrawals" => Some(self.total_withdrawals),
            "unfunded_deficit" => Some(self.unfunded_deficit),
            "starting_portfolio" => Some(self.starting_portfolio),
            "total_portfolio" => Some(self.total_portfolio),
            "portfolio_depleted" => Some(if self.portfolio_depleted { 1.0 } else { 0.0 }),
            "event_amount" => Some(self.event_amount),
            _ => None,
        };
        if scalar.is_some() {
            return scalar;
        }

        // Longest account name first so "IRA" never shadows "Roth IRA".
        let mut accounts = self.accounts.iter().collect::<Vec<_>>();
        accounts.sort_by_key(|a| std::cmp::Reverse(a.name.len()));
        for account in accounts {
            let Some(suffix) = column
                .strip_prefix(account.name.as_str())
                .and_then(|rest| rest.strip_prefix('_'))
            else {
                continue;
            };
            return match suffix {
                "balance" => Some(account.balance),
                "contribution" => Some(account.contribution),
                "withdrawal" => Some(account.withdrawal),
                "rmd" => Some(account.rmd),
                "return" => Some(account.investment_return),
                _ => None,
            };
        }
        None
    }
}

pub const ROW_SCALAR_COLUMNS: [&str; 21] = [
    "year",
    "age",
    "work_income",
    "ss_income",
    "total_income",
    "core_expenses",
    "flex_expenses_full",
    "flex_expenses_actual",
    "flex_multiplier",
    "total_expenses",
    "surplus_deficit",
    "total_contributions",
    "portfolio_funded_contributions",
    "contribution_shortfall",
    "total_rmds",
    "total_withdrawals",
    "unfunded_deficit",
    "starting_portfolio",
    "total_portfolio",
    "portfolio_depleted",
    "event_amount",
];

pub const ACCOUNT_COLUMN_SUFFIXES: [&str; 5] =
    ["balance", "contribution", "withdrawal", "rmd", "return"];

/// Engine output: one row per simulated year, addressable by row index and
/// column name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    pub rows: Vec<YearRow>,
}

impl Projection {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn first(&self) -> Option<&YearRow> {
        self.rows.first()
    }

    pub fn last(&self) -> Option<&YearRow> {
        self.rows.last()
    }

    pub fn value(&self, row: usize, column: &str) -> Option<f64> {
        self.rows.get(row).and_then(|r| r.value(column))
    }

    pub fn column(&self, column: &str) -> Option<Vec<f64>> {
        self.rows.iter().map(|r| r.value(column)).collect()
    }

    /// Flat column names in export order: scalars, then five columns per
    /// account in input order.
    pub fn column_names(&self) -> Vec<String> {
        let mut names = ROW_SCALAR_COLUMNS
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>();
        if let Some(first) = self.rows.first() {
            for account in &first.accounts {
                for suffix in ACCOUNT_COLUMN_SUFFIXES {
                    names.push(format!("{}_{suffix}", account.name));
                }
            }
        }
        names
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum PlanStatus {
    #[serde(rename = "ON TRACK")]
    OnTrack,
    #[serde(rename = "AT RISK")]
    AtRisk,
}

impl PlanStatus {
    pub fn label(self) -> &'static str {
        match self {
            PlanStatus::OnTrack => "ON TRACK",
            PlanStatus::AtRisk => "AT RISK",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SustainableWithdrawal {
    pub annual: f64,
    pub monthly: f64,
    pub retirement_balance: f64,
    pub real_return: f64,
    pub years: u32,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanAnalysis {
    pub run_out_age: Option<u32>,
    pub run_out_year: Option<i32>,
    pub cushion_years: i64,
    pub status: PlanStatus,
    pub warnings: Vec<String>,
    pub final_balance: f64,
    pub sustainable_withdrawal: Option<SustainableWithdrawal>,
}
