mod analysis;
mod engine;
mod readiness;
mod rules;
mod sweep;
mod types;

pub use analysis::{
    BenchmarkContext, DEFAULT_CONSERVATIVE_REAL_RETURN, SUSTAINABLE_WITHDRAWAL_LABEL,
    analyze_retirement_plan, annuity_payment, calculate_conservative_retirement_balance,
    check_benchmark_return, dollars,
};
pub use engine::run_comprehensive_projection;
pub use readiness::{
    DrawdownYear, ReadinessInput, ReadinessReport, SafeWithdrawalConfig, SafeWithdrawalIteration,
    SafeWithdrawalResult, adjust_for_inflation, future_value, project_drawdown, required_savings,
    retirement_readiness, solve_safe_withdrawal,
};
pub use rules::{
    ContributionStop, MAX_SUPPORTED_AGE, MIN_RMD_DIVISOR, TRADITIONAL_IRA_CONTRIBUTION_CEILING,
    calculate_rmd_amount, can_contribute, contribution_stop_rule, get_rmd_starting_age, rmd_divisor,
};
pub use sweep::{SweepCandidate, SweepResult, sweep_work_end_ages};
pub use types::{
    ACCOUNT_COLUMN_SUFFIXES, AccountBucket, AccountType, AccountYear, CategoryType,
    DEFAULT_SIMULATION_START_YEAR, ExpenseCategory, FundingCase, OneTimeEvent, PlanAnalysis,
    PlanInput, PlanStatus, Profile, Projection, ProjectionSettings, ROW_SCALAR_COLUMNS,
    SameYearEvents, SustainableWithdrawal, YearRow,
};

