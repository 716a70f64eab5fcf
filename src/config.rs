use std::path::Path;

use tracing::debug;

use crate::core::PlanInput;
use crate::error::{Error, Result};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PlanFormat {
    Toml,
    Json,
}

impl PlanFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Ok(PlanFormat::Toml),
            Some(ext) if ext.eq_ignore_ascii_case("json") => Ok(PlanFormat::Json),
            _ => Err(Error::Config(format!(
                "unsupported plan file '{}': expected a .toml or .json extension",
                path.display()
            ))),
        }
    }
}

/// Reads a plan file, picking the parser from the file extension.
pub fn load_plan<P: AsRef<Path>>(path: P) -> Result<PlanInput> {
    let path = path.as_ref();
    let format = PlanFormat::from_path(path)?;
    let contents = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("failed to read plan file '{}': {e}", path.display()))
    })?;
    let plan = parse_plan(&contents, format)?;
    debug!(
        path = %path.display(),
        accounts = plan.accounts.len(),
        expenses = plan.expenses.len(),
        events = plan.events.len(),
        "loaded plan"
    );
    Ok(plan)
}

pub fn parse_plan(contents: &str, format: PlanFormat) -> Result<PlanInput> {
    let plan = match format {
        PlanFormat::Toml => toml::from_str(contents)?,
        PlanFormat::Json => serde_json::from_str(contents)?,
    };
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{AccountType, CategoryType, SameYearEvents};

    const SAMPLE_PLAN: &str = include_str!("../plans/sample.toml");

    #[test]
    fn sample_plan_parses_with_defaults_filled_in() {
        let plan = parse_plan(SAMPLE_PLAN, PlanFormat::Toml).expect("sample plan");

        assert_eq!(plan.profile.current_age, 52);
        assert_eq!(plan.profile.work_end_age, 62);
        assert_eq!(plan.profile.max_age, 100);
        assert_eq!(plan.profile.ss_cola, 0.025);
        assert_eq!(plan.accounts.len(), 4);
        assert_eq!(plan.accounts[0].account_type, AccountType::Employer401k);
        assert!(plan.accounts[2].continue_post_retirement);
        assert_eq!(plan.expenses[2].category_type, CategoryType::Flex);
        assert_eq!(plan.events.len(), 2);
        assert_eq!(plan.settings.simulation_start_year, 2026);
        assert_eq!(plan.settings.same_year_events, SameYearEvents::FirstMatch);

        let projection = plan.project().expect("projection");
        assert!(!projection.is_empty());
    }

    #[test]
    fn json_plan_accepts_lowercase_categories() {
        let json = r#"{
            "profile": {
                "current_age": 60,
                "target_age": 90,
                "work_end_age": 65,
                "ss_start_age": 67,
                "ss_monthly_benefit": 2400
            },
            "accounts": [
                {"name": "IRA", "balance": 300000, "annual_return": 0.06, "priority": 1,
                 "account_type": "traditional_ira"}
            ],
            "expenses": [
                {"name": "Living", "annual_amount": 40000, "category_type": "core"},
                {"name": "Travel", "annual_amount": 8000, "category_type": "FLEX"}
            ],
            "settings": {"same_year_events": "all"}
        }"#;
        let plan = parse_plan(json, PlanFormat::Json).expect("json plan");

        assert_eq!(plan.profile.inflation_rate, 0.03);
        assert_eq!(plan.accounts[0].planned_contribution, 0.0);
        assert_eq!(plan.expenses[0].category_type, CategoryType::Core);
        assert_eq!(plan.settings.same_year_events, SameYearEvents::All);
        assert!(plan.events.is_empty());
    }

    #[test]
    fn unknown_account_type_is_a_parse_error() {
        let json = r#"{
            "profile": {"current_age": 60, "target_age": 90, "work_end_age": 65, "ss_start_age": 67},
            "accounts": [{"name": "HSA", "balance": 1, "annual_return": 0.0, "priority": 1,
                          "account_type": "hsa"}]
        }"#;
        let err = parse_plan(json, PlanFormat::Json).expect_err("hsa is not supported");
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn format_follows_extension() {
        assert_eq!(
            PlanFormat::from_path(Path::new("plan.TOML")).expect("toml"),
            PlanFormat::Toml
        );
        assert_eq!(
            PlanFormat::from_path(Path::new("dir/plan.json")).expect("json"),
            PlanFormat::Json
        );
        assert!(matches!(
            PlanFormat::from_path(Path::new("plan.yaml")),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = load_plan("does/not/exist.toml").expect_err("missing file");
        assert!(matches!(err, Error::Config(_)));
    }
}
