//! Command-line interface for the retirement planner.

use std::fmt::Write as _;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use crate::api::{ProjectionResponse, build_projection_response, run_http_server};
use crate::config::load_plan;
use crate::core::{
    DEFAULT_CONSERVATIVE_REAL_RETURN, PlanAnalysis, ReadinessInput, ReadinessReport, SweepResult,
    YearRow, dollars, retirement_readiness, sweep_work_end_ages,
};
use crate::error::{Error, Result};

/// retire-plan: deterministic household retirement projections.
///
/// Projects a plan year by year (income, CORE and FLEX spending, contributions,
/// RMDs, prioritized withdrawals, returns and one-time events) and reports when
/// the money runs out relative to the target age.
#[derive(Debug, Parser, Clone)]
#[command(name = "retire-plan", version)]
pub struct Args {
    /// Logging verbosity: off, error, warn, info, debug, trace.
    /// RUST_LOG takes precedence when set.
    #[arg(long, global = true, default_value_t = LevelFilter::WARN)]
    log_level: LevelFilter,

    #[command(subcommand)]
    command: Command,
}

impl Args {
    pub fn log_level(&self) -> LevelFilter {
        self.log_level
    }

    pub fn command(&self) -> &Command {
        &self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Project a plan file and print the yearly table with its analysis.
    Project(ProjectArgs),
    /// Project a plan once per work-end age and compare the outcomes.
    Sweep(SweepArgs),
    /// Quick single-balance readiness check.
    Readiness(ReadinessArgs),
    /// Serve the JSON API.
    Serve(ServeArgs),
}

#[derive(Debug, Parser, Clone)]
pub struct ProjectArgs {
    /// Plan file (.toml or .json).
    #[arg(long)]
    plan: PathBuf,

    /// Print rows and analysis as JSON instead of a table.
    #[arg(long)]
    json: bool,

    /// Real return for the conservative sustainable-withdrawal benchmark.
    #[arg(long, default_value_t = DEFAULT_CONSERVATIVE_REAL_RETURN)]
    benchmark_return: f64,

    /// Overrides the plan's first simulated calendar year.
    #[arg(long)]
    start_year: Option<i32>,
}

#[derive(Debug, Parser, Clone)]
pub struct SweepArgs {
    #[arg(long)]
    plan: PathBuf,

    /// First candidate work-end age.
    #[arg(long)]
    from: u32,

    /// Last candidate work-end age (inclusive).
    #[arg(long)]
    to: u32,

    #[arg(long, default_value_t = DEFAULT_CONSERVATIVE_REAL_RETURN)]
    benchmark_return: f64,

    #[arg(long)]
    json: bool,
}

#[derive(Debug, Parser, Clone)]
pub struct ReadinessArgs {
    #[arg(long)]
    current_age: u32,
    #[arg(long)]
    retirement_age: u32,
    #[arg(long)]
    current_savings: f64,
    #[arg(long, default_value_t = 0.0)]
    annual_contribution: f64,
    #[arg(long, default_value_t = 0.07)]
    pre_retirement_return: f64,
    #[arg(long, default_value_t = 0.05)]
    post_retirement_return: f64,
    #[arg(long)]
    desired_spending: f64,
    #[arg(long, default_value_t = 90)]
    life_expectancy: u32,
    #[arg(long, default_value_t = 0.03)]
    inflation_rate: f64,
    #[arg(long)]
    json: bool,
}

impl From<&ReadinessArgs> for ReadinessInput {
    fn from(args: &ReadinessArgs) -> Self {
        ReadinessInput {
            current_age: args.current_age,
            retirement_age: args.retirement_age,
            current_savings: args.current_savings,
            annual_contribution: args.annual_contribution,
            pre_retirement_return: args.pre_retirement_return,
            post_retirement_return: args.post_retirement_return,
            desired_annual_spending: args.desired_spending,
            life_expectancy: args.life_expectancy,
            inflation_rate: args.inflation_rate,
        }
    }
}

#[derive(Debug, Parser, Clone)]
pub struct ServeArgs {
    #[arg(long, default_value_t = 8080)]
    port: u16,
}

/// Honors RUST_LOG when present, otherwise logs this crate at `level`.
pub fn init_logger(level: LevelFilter) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), level))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

pub async fn run(args: Args) -> Result<()> {
    debug!("{args:?}");
    match args.command() {
        Command::Project(project) => {
            let mut plan = load_plan(&project.plan)?;
            if let Some(year) = project.start_year {
                plan.settings.simulation_start_year = year;
            }
            let response = build_projection_response(&plan, Some(project.benchmark_return))?;
            if project.json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                print!("{}", render_projection(&response));
            }
        }

        Command::Sweep(sweep) => {
            if sweep.to < sweep.from {
                return Err(Error::invalid("--to", "must be >= --from"));
            }
            let plan = load_plan(&sweep.plan)?;
            let result =
                sweep_work_end_ages(&plan, sweep.from..=sweep.to, Some(sweep.benchmark_return))?;
            if sweep.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print!("{}", render_sweep(&result));
            }
        }

        Command::Readiness(readiness) => {
            let report = retirement_readiness(&ReadinessInput::from(readiness))?;
            if readiness.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", render_readiness(&report));
            }
        }

        Command::Serve(serve) => {
            info!(port = serve.port, "starting HTTP server");
            run_http_server(serve.port).await?;
        }
    }
    Ok(())
}

pub fn render_projection(response: &ProjectionResponse) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:>4} {:>3} {:>12} {:>12} {:>12} {:>12} {:>10} {:>14} {:>5}  Notes",
        "Year", "Age", "Income", "Expenses", "Surplus", "Withdrawals", "RMDs", "Portfolio", "Flex%"
    );
    for row in &response.rows {
        let _ = writeln!(
            out,
            "{:>4} {:>3} {:>12} {:>12} {:>12} {:>12} {:>10} {:>14} {:>5.0}  {}",
            row.year,
            row.age,
            dollars(row.total_income),
            dollars(row.total_expenses),
            dollars(row.surplus_deficit),
            dollars(row.total_withdrawals),
            dollars(row.total_rmds),
            dollars(row.total_portfolio),
            row.flex_multiplier * 100.0,
            row_notes(row),
        );
    }
    out.push('\n');
    out.push_str(&render_analysis(&response.analysis));
    out
}

fn row_notes(row: &YearRow) -> String {
    let mut notes = Vec::new();
    if !row.event_description.is_empty() {
        notes.push(format!(
            "{} ({})",
            row.event_description,
            dollars(row.event_amount)
        ));
    }
    if row.contribution_shortfall > 0.0 {
        notes.push(format!(
            "contribution shortfall {}",
            dollars(row.contribution_shortfall)
        ));
    }
    if row.portfolio_depleted {
        notes.push("DEPLETED".to_string());
    }
    notes.join("; ")
}

pub fn render_analysis(analysis: &PlanAnalysis) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Status:        {}", analysis.status.label());
    match (analysis.run_out_age, analysis.run_out_year) {
        (Some(age), Some(year)) => {
            let _ = writeln!(out, "Money runs out: age {age} ({year})");
        }
        _ => {
            let _ = writeln!(out, "Money runs out: never within the projection");
        }
    }
    let _ = writeln!(out, "Cushion:       {} years", analysis.cushion_years);
    let _ = writeln!(out, "Final balance: {}", dollars(analysis.final_balance));
    if let Some(sw) = &analysis.sustainable_withdrawal {
        let _ = writeln!(
            out,
            "Sustainable withdrawal: {}/yr ({}/mo) over {} years at {:.1}% real",
            dollars(sw.annual),
            dollars(sw.monthly),
            sw.years,
            sw.real_return * 100.0
        );
        let _ = writeln!(out, "  {}", sw.label);
    }
    for warning in &analysis.warnings {
        let _ = writeln!(out, "WARNING: {warning}");
    }
    out
}

pub fn render_sweep(result: &SweepResult) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:>8} {:>9} {:>8} {:>8} {:>14}",
        "Work end", "Status", "Run out", "Cushion", "Final"
    );
    for (idx, candidate) in result.candidates.iter().enumerate() {
        let analysis = &candidate.analysis;
        let marker = match (Some(idx) == result.selected_index, idx == result.best_index) {
            (true, true) => "  <- earliest on track, best cushion",
            (true, false) => "  <- earliest on track",
            (false, true) => "  <- best cushion",
            (false, false) => "",
        };
        let _ = writeln!(
            out,
            "{:>8} {:>9} {:>8} {:>8} {:>14}{marker}",
            candidate.work_end_age,
            analysis.status.label(),
            analysis
                .run_out_age
                .map(|a| a.to_string())
                .unwrap_or_else(|| "-".to_string()),
            analysis.cushion_years,
            dollars(analysis.final_balance),
        );
    }
    out
}

pub fn render_readiness(report: &ReadinessReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Projected balance:    {}",
        dollars(report.projected_balance)
    );
    let _ = writeln!(out, "Years money lasts:    {}", report.years_money_lasts);
    let _ = writeln!(
        out,
        "Recommended spending: {}/yr",
        dollars(report.recommended_spending)
    );
    let _ = writeln!(out, "Shortfall:            {}/yr", dollars(report.shortfall));
    let _ = writeln!(
        out,
        "Ready:                {}",
        if report.is_ready { "yes" } else { "no" }
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PlanFormat, parse_plan};

    const SAMPLE_PLAN: &str = include_str!("../plans/sample.toml");

    #[test]
    fn parses_project_subcommand_with_global_log_level() {
        let args = Args::try_parse_from([
            "retire-plan",
            "project",
            "--plan",
            "plans/sample.toml",
            "--start-year",
            "2030",
            "--log-level",
            "debug",
        ])
        .expect("valid args");

        assert_eq!(args.log_level(), LevelFilter::DEBUG);
        match args.command() {
            Command::Project(project) => {
                assert_eq!(project.plan, PathBuf::from("plans/sample.toml"));
                assert_eq!(project.start_year, Some(2030));
                assert_eq!(project.benchmark_return, DEFAULT_CONSERVATIVE_REAL_RETURN);
                assert!(!project.json);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn serve_defaults_to_port_8080() {
        let args = Args::try_parse_from(["retire-plan", "serve"]).expect("valid args");
        match args.command() {
            Command::Serve(serve) => assert_eq!(serve.port, 8080),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn readiness_requires_savings_and_spending() {
        assert!(
            Args::try_parse_from([
                "retire-plan",
                "readiness",
                "--current-age",
                "40",
                "--retirement-age",
                "65"
            ])
            .is_err()
        );
    }

    #[test]
    fn readiness_args_map_to_input() {
        let args = Args::try_parse_from([
            "retire-plan",
            "readiness",
            "--current-age",
            "40",
            "--retirement-age",
            "65",
            "--current-savings",
            "250000",
            "--desired-spending",
            "60000",
        ])
        .expect("valid args");
        let Command::Readiness(readiness) = args.command() else {
            panic!("expected readiness");
        };
        let input = ReadinessInput::from(readiness);
        assert_eq!(input.life_expectancy, 90);
        assert_eq!(input.desired_annual_spending, 60_000.0);
        assert_eq!(input.inflation_rate, 0.03);
    }

    #[test]
    fn projection_table_lists_every_row_and_the_analysis() {
        let plan = parse_plan(SAMPLE_PLAN, PlanFormat::Toml).expect("sample plan");
        let response = build_projection_response(&plan, Some(0.04)).expect("projection");
        let rendered = render_projection(&response);

        assert!(rendered.starts_with("Year"));
        assert_eq!(
            rendered.lines().filter(|l| l.starts_with("20")).count(),
            response.rows.len()
        );
        assert!(rendered.contains("Replace car ($42,000)"));
        assert!(rendered.contains("Status:"));
        assert!(rendered.contains("Sustainable withdrawal:"));
    }

    #[test]
    fn sweep_table_marks_selected_and_best() {
        let plan = parse_plan(SAMPLE_PLAN, PlanFormat::Toml).expect("sample plan");
        let result = sweep_work_end_ages(&plan, 58..=66, None).expect("sweep");
        let rendered = render_sweep(&result);

        assert_eq!(rendered.lines().count(), 10);
        assert!(rendered.contains("best cushion"));
    }

    #[test]
    fn readiness_report_renders_yes_or_no() {
        let report = ReadinessReport {
            projected_balance: 1_500_000.0,
            years_money_lasts: 25,
            recommended_spending: 95_000.0,
            shortfall: 0.0,
            is_ready: true,
        };
        let rendered = render_readiness(&report);
        assert!(rendered.contains("$1,500,000"));
        assert!(rendered.contains("Ready:                yes"));
    }
}
