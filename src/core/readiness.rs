//! Closed-form savings helpers and a single-balance drawdown model, for quick
//! readiness checks that don't need the full household projection.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::rules::MAX_SUPPORTED_AGE;
use crate::error::{Error, Result};

pub fn future_value(
    present_value: f64,
    annual_return: f64,
    years: u32,
    annual_contribution: f64,
) -> f64 {
    if years == 0 {
        return present_value;
    }
    let growth = (1.0 + annual_return).powi(years as i32);
    let contributions = if annual_contribution > 0.0 && annual_return != 0.0 {
        annual_contribution * (growth - 1.0) / annual_return
    } else {
        annual_contribution * years as f64
    };
    present_value * growth + contributions
}

/// Today's-dollar value of a future amount.
pub fn adjust_for_inflation(amount: f64, inflation_rate: f64, years: u32) -> f64 {
    amount / (1.0 + inflation_rate).powi(years as i32)
}

/// Level annual contribution needed to grow `current_savings` into `target`.
pub fn required_savings(
    target: f64,
    years_to_save: u32,
    current_savings: f64,
    annual_return: f64,
) -> f64 {
    if years_to_save == 0 {
        return target - current_savings;
    }
    let growth = (1.0 + annual_return).powi(years_to_save as i32);
    let needed = target - current_savings * growth;
    if needed <= 0.0 {
        return 0.0;
    }
    if annual_return == 0.0 {
        return needed / years_to_save as f64;
    }
    needed / ((growth - 1.0) / annual_return)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DrawdownYear {
    pub year: u32,
    pub balance: f64,
    pub withdrawal: f64,
    pub growth: f64,
}

/// Start-of-year withdrawals followed by growth. With `inflation` set, the
/// withdrawal rises by that rate from the second year on. Stops after the
/// year the balance is exhausted.
pub fn project_drawdown(
    starting_balance: f64,
    annual_withdrawal: f64,
    annual_return: f64,
    years: u32,
    inflation: Option<f64>,
) -> Vec<DrawdownYear> {
    let mut rows = Vec::with_capacity(years.min(MAX_SUPPORTED_AGE) as usize);
    let mut balance = starting_balance;
    let mut withdrawal = annual_withdrawal;

    for year in 1..=years {
        if year > 1 {
            withdrawal *= 1.0 + inflation.unwrap_or(0.0);
        }

        balance -= withdrawal;
        if balance <= 0.0 {
            rows.push(DrawdownYear {
                year,
                balance: 0.0,
                withdrawal,
                growth: 0.0,
            });
            break;
        }

        let growth = balance * annual_return;
        balance += growth;
        rows.push(DrawdownYear {
            year,
            balance,
            withdrawal,
            growth,
        });
    }
    rows
}

#[derive(Debug, Clone, Copy)]
pub struct SafeWithdrawalConfig {
    pub tolerance: f64,
    pub max_iterations: u32,
}

impl Default for SafeWithdrawalConfig {
    fn default() -> Self {
        Self {
            tolerance: 0.01,
            max_iterations: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SafeWithdrawalIteration {
    pub iteration: u32,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub candidate: f64,
    pub lasts: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SafeWithdrawalResult {
    /// First-year withdrawal; later years rise with inflation.
    pub withdrawal: f64,
    pub iterations: Vec<SafeWithdrawalIteration>,
    pub converged: bool,
    pub feasible: bool,
    pub message: String,
}

/// Largest first-year withdrawal that lasts `years` and finishes with at least
/// `final_target` left, found by bisection over `[0, balance]`.
pub fn solve_safe_withdrawal(
    retirement_balance: f64,
    years: u32,
    annual_return: f64,
    inflation_rate: f64,
    final_target: f64,
    config: SafeWithdrawalConfig,
) -> Result<SafeWithdrawalResult> {
    for (field, value) in [
        ("retirement_balance", retirement_balance),
        ("annual_return", annual_return),
        ("inflation_rate", inflation_rate),
        ("final_target", final_target),
    ] {
        if !value.is_finite() {
            return Err(Error::invalid(field, "must be finite"));
        }
    }
    if !config.tolerance.is_finite() || config.tolerance <= 0.0 {
        return Err(Error::invalid("tolerance", "must be > 0"));
    }
    if config.max_iterations == 0 {
        return Err(Error::invalid("max_iterations", "must be > 0"));
    }
    if years > MAX_SUPPORTED_AGE {
        return Err(Error::invalid("years", format!("must be at most {MAX_SUPPORTED_AGE}")));
    }

    let lasts = |withdrawal: f64| {
        let rows = project_drawdown(
            retirement_balance,
            withdrawal,
            annual_return,
            years,
            Some(inflation_rate),
        );
        match rows.last() {
            None => retirement_balance >= final_target,
            Some(last) => {
                rows.len() as u32 >= years
                    && last.balance > 0.0
                    && last.balance + 1e-9 >= final_target
            }
        }
    };

    let mut iterations = Vec::new();
    let upper = retirement_balance.max(0.0);

    if years == 0 || lasts(upper) {
        return Ok(SafeWithdrawalResult {
            withdrawal: upper,
            iterations,
            converged: true,
            feasible: true,
            message: "The whole balance can be withdrawn in the first year.".to_string(),
        });
    }
    if !lasts(0.0) {
        return Ok(SafeWithdrawalResult {
            withdrawal: 0.0,
            iterations,
            converged: true,
            feasible: false,
            message: "The balance cannot reach the final target even without withdrawals."
                .to_string(),
        });
    }

    let mut lo = 0.0;
    let mut hi = upper;
    let mut converged = false;
    for iteration in 1..=config.max_iterations {
        let mid = (lo + hi) * 0.5;
        let ok = lasts(mid);
        iterations.push(SafeWithdrawalIteration {
            iteration,
            lower_bound: lo,
            upper_bound: hi,
            candidate: mid,
            lasts: ok,
        });
        if ok {
            lo = mid;
        } else {
            hi = mid;
        }
        if hi - lo <= config.tolerance {
            converged = true;
            break;
        }
    }

    debug!(
        withdrawal = lo,
        iterations = iterations.len(),
        converged,
        "solved safe withdrawal"
    );

    Ok(SafeWithdrawalResult {
        withdrawal: lo,
        iterations,
        converged,
        feasible: true,
        message: if converged {
            "Solved safe withdrawal.".to_string()
        } else {
            "Reached max iterations before tolerance was met; returning best estimate.".to_string()
        },
    })
}

fn default_inflation_rate() -> f64 {
    0.03
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReadinessInput {
    pub current_age: u32,
    pub retirement_age: u32,
    pub current_savings: f64,
    pub annual_contribution: f64,
    pub pre_retirement_return: f64,
    pub post_retirement_return: f64,
    pub desired_annual_spending: f64,
    pub life_expectancy: u32,
    #[serde(default = "default_inflation_rate")]
    pub inflation_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ReadinessReport {
    pub projected_balance: f64,
    pub years_money_lasts: u32,
    pub recommended_spending: f64,
    pub shortfall: f64,
    pub is_ready: bool,
}

pub fn retirement_readiness(input: &ReadinessInput) -> Result<ReadinessReport> {
    if input.retirement_age < input.current_age {
        return Err(Error::invalid("retirement_age", "must be >= current_age"));
    }
    if input.life_expectancy < input.retirement_age {
        return Err(Error::invalid("life_expectancy", "must be >= retirement_age"));
    }
    if input.life_expectancy > MAX_SUPPORTED_AGE {
        return Err(Error::invalid(
            "life_expectancy",
            format!("must be at most {MAX_SUPPORTED_AGE}"),
        ));
    }

    let years_to_retirement = input.retirement_age - input.current_age;
    let years_in_retirement = input.life_expectancy - input.retirement_age;

    let projected_balance = future_value(
        input.current_savings,
        input.pre_retirement_return,
        years_to_retirement,
        input.annual_contribution,
    );
    let years_money_lasts = project_drawdown(
        projected_balance,
        input.desired_annual_spending,
        input.post_retirement_return,
        years_in_retirement,
        Some(input.inflation_rate),
    )
    .len() as u32;

    let safe = solve_safe_withdrawal(
        projected_balance,
        years_in_retirement,
        input.post_retirement_return,
        input.inflation_rate,
        0.0,
        SafeWithdrawalConfig::default(),
    )?;
    let shortfall = (input.desired_annual_spending - safe.withdrawal).max(0.0);

    Ok(ReadinessReport {
        projected_balance,
        years_money_lasts,
        recommended_spending: safe.withdrawal,
        shortfall,
        is_ready: years_money_lasts >= years_in_retirement && shortfall == 0.0,
    })
}
