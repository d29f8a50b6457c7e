//! Scenario reports

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use vigil_common::{Action, CorrelationResult, Result};
use vigil_engine::assertion::{Diagnostic, StepAssessment, Verdict};

/// Result of one scenario step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub name: String,
    pub action: Option<Action>,
    pub correlation: Option<CorrelationResult>,
    pub verdict: Verdict,
    pub diagnostic: Option<Diagnostic>,
    #[serde(default)]
    pub artifacts: Vec<PathBuf>,
    #[serde(default)]
    pub skipped: bool,
    #[serde(default)]
    pub driver_error: Option<String>,
}

impl StepReport {
    pub fn assessed(
        name: impl Into<String>,
        action: Action,
        correlation: CorrelationResult,
        assessment: StepAssessment,
        artifacts: Vec<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            action: Some(action),
            correlation: Some(correlation),
            verdict: assessment.verdict,
            diagnostic: Some(assessment.diagnostic),
            artifacts,
            skipped: false,
            driver_error: None,
        }
    }

    pub fn driver_error(
        name: impl Into<String>,
        action: Option<Action>,
        error: &vigil_common::Error,
    ) -> Self {
        Self {
            name: name.into(),
            action,
            correlation: None,
            verdict: Verdict::Fail,
            diagnostic: None,
            artifacts: Vec::new(),
            skipped: false,
            driver_error: Some(error.to_string()),
        }
    }

    pub fn precondition_failed(name: impl Into<String>, message: String) -> Self {
        Self {
            name: name.into(),
            action: None,
            correlation: None,
            verdict: Verdict::Fail,
            diagnostic: Some(Diagnostic {
                message,
                matched: Vec::new(),
                waited_ms: 0,
            }),
            artifacts: Vec::new(),
            skipped: false,
            driver_error: None,
        }
    }

    pub fn skipped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            action: None,
            correlation: None,
            verdict: Verdict::Inconclusive,
            diagnostic: None,
            artifacts: Vec::new(),
            skipped: true,
            driver_error: None,
        }
    }
}

/// Result of one full scenario run. Always produced, even for a fully
/// failed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub scenario: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub aborted: bool,
    pub steps: Vec<StepReport>,
}

impl ScenarioReport {
    pub fn new(scenario: impl Into<String>) -> Self {
        Self {
            scenario: scenario.into(),
            started_at: Utc::now(),
            duration_ms: 0,
            aborted: false,
            steps: Vec::new(),
        }
    }

    /// Scenario-level verdict: any failure (or an abort) fails the run,
    /// any inconclusive step without failures leaves it inconclusive.
    pub fn overall(&self) -> Verdict {
        if self.aborted
            || self
                .steps
                .iter()
                .any(|s| !s.skipped && s.verdict == Verdict::Fail)
        {
            return Verdict::Fail;
        }
        if self
            .steps
            .iter()
            .any(|s| !s.skipped && s.verdict == Verdict::Inconclusive)
        {
            return Verdict::Inconclusive;
        }
        Verdict::Pass
    }

    pub fn counts(&self) -> (usize, usize, usize, usize) {
        let mut passed = 0;
        let mut failed = 0;
        let mut inconclusive = 0;
        let mut skipped = 0;
        for step in &self.steps {
            if step.skipped {
                skipped += 1;
                continue;
            }
            match step.verdict {
                Verdict::Pass => passed += 1,
                Verdict::Fail => failed += 1,
                Verdict::Inconclusive => inconclusive += 1,
            }
        }
        (passed, failed, inconclusive, skipped)
    }

    /// Structural signature used to compare runs: step names, verdicts
    /// and skip flags, independent of latencies and artifact paths.
    pub fn shape(&self) -> Vec<String> {
        self.steps
            .iter()
            .map(|s| format!("{}:{}:{}", s.name, s.verdict, s.skipped))
            .collect()
    }

    /// Write the report as JSON under `dir`.
    pub fn write_json(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.report.json", self.scenario));
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;
        info!("report written to {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report_with(verdicts: &[Verdict]) -> ScenarioReport {
        let mut report = ScenarioReport::new("sample");
        for (i, v) in verdicts.iter().enumerate() {
            report.steps.push(StepReport {
                name: format!("step-{}", i),
                action: None,
                correlation: None,
                verdict: *v,
                diagnostic: None,
                artifacts: Vec::new(),
                skipped: false,
                driver_error: None,
            });
        }
        report
    }

    #[test]
    fn overall_prefers_fail_over_inconclusive() {
        let report = report_with(&[Verdict::Pass, Verdict::Inconclusive, Verdict::Fail]);
        assert_eq!(report.overall(), Verdict::Fail);
    }

    #[test]
    fn overall_inconclusive_without_failures() {
        let report = report_with(&[Verdict::Pass, Verdict::Inconclusive]);
        assert_eq!(report.overall(), Verdict::Inconclusive);
    }

    #[test]
    fn aborted_run_fails_even_with_passing_steps() {
        let mut report = report_with(&[Verdict::Pass]);
        report.aborted = true;
        assert_eq!(report.overall(), Verdict::Fail);
    }

    #[test]
    fn skipped_steps_do_not_count() {
        let mut report = report_with(&[Verdict::Pass]);
        report.steps.push(StepReport::skipped("later"));
        assert_eq!(report.overall(), Verdict::Pass);
        assert_eq!(report.counts(), (1, 0, 0, 1));
    }

    #[test]
    fn json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let report = report_with(&[Verdict::Pass, Verdict::Fail]);
        let path = report.write_json(dir.path()).unwrap();

        let loaded: ScenarioReport =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(loaded.shape(), report.shape());
    }
}
