use serde::Serialize;
use tracing::debug;

use super::analysis::{BenchmarkContext, analyze_retirement_plan, check_benchmark_return};
use super::engine::run_comprehensive_projection;
use super::rules::MAX_SUPPORTED_AGE;
use super::types::{PlanAnalysis, PlanInput, PlanStatus};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize)]
pub struct SweepCandidate {
    pub work_end_age: u32,
    pub analysis: PlanAnalysis,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepResult {
    pub candidates: Vec<SweepCandidate>,
    /// Earliest work-end age whose plan is on track.
    pub selected_index: Option<usize>,
    /// Largest cushion; ties go to the earlier age.
    pub best_index: usize,
}

impl SweepResult {
    pub fn selected(&self) -> Option<&SweepCandidate> {
        self.selected_index.and_then(|idx| self.candidates.get(idx))
    }

    pub fn best(&self) -> Option<&SweepCandidate> {
        self.candidates.get(self.best_index)
    }
}

/// Projects and analyzes `plan` once per candidate work-end age.
pub fn sweep_work_end_ages(
    plan: &PlanInput,
    work_end_ages: impl IntoIterator<Item = u32>,
    benchmark_real_return: Option<f64>,
) -> Result<SweepResult> {
    check_benchmark_return(benchmark_real_return)?;

    let mut candidates = Vec::new();
    for work_end_age in work_end_ages {
        if work_end_age > MAX_SUPPORTED_AGE {
            return Err(Error::invalid(
                "work_end_ages",
                format!("{work_end_age} is past the supported age of {MAX_SUPPORTED_AGE}"),
            ));
        }
        let mut profile = plan.profile.clone();
        profile.work_end_age = work_end_age;

        let projection = run_comprehensive_projection(
            &profile,
            &plan.accounts,
            &plan.expenses,
            &plan.events,
            &plan.settings,
        )?;
        let benchmark = benchmark_real_return.map(|r| {
            BenchmarkContext::new(&plan.accounts, profile.current_age, work_end_age)
                .with_real_return(r)
        });
        let analysis = analyze_retirement_plan(&projection, profile.target_age, benchmark.as_ref());

        debug!(
            work_end_age,
            status = analysis.status.label(),
            cushion_years = analysis.cushion_years,
            "evaluated work-end candidate"
        );
        candidates.push(SweepCandidate {
            work_end_age,
            analysis,
        });
    }

    if candidates.is_empty() {
        return Err(Error::invalid("work_end_ages", "no candidate ages to sweep"));
    }
    Ok(build_sweep_result(candidates))
}

fn build_sweep_result(candidates: Vec<SweepCandidate>) -> SweepResult {
    let selected_index = candidates
        .iter()
        .position(|c| c.analysis.status == PlanStatus::OnTrack);
    // max_by_key keeps the last maximum, so walk in reverse to favour the earliest.
    let best_index = candidates
        .iter()
        .enumerate()
        .rev()
        .max_by_key(|(_, c)| c.analysis.cushion_years)
        .map(|(idx, _)| idx)
        .unwrap_or(0);

    SweepResult {
        candidates,
        selected_index,
        best_index,
    }
}
