//! Assertion engine: correlation outcomes to pass/fail/inconclusive
//!
//! Ambiguity is never silently resolved; the diagnostic carries every
//! conflicting match so a human can decide which call the UI actually
//! meant.

use serde::{Deserialize, Serialize};

use vigil_common::{CorrelationResult, CorrelationVerdict, EventPayload, ObservedEvent};

/// Whether the step expects the backend to accept or reject the action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedOutcome {
    #[default]
    Success,
    Error,
}

/// What a correlation timeout means for this step. Flows with known
/// optional side effects (a client-side-only notification) may downgrade
/// the timeout to inconclusive instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutDisposition {
    #[default]
    Fail,
    Inconclusive,
}

/// Expected-outcome predicate for one step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Expectation {
    #[serde(default)]
    pub outcome: ExpectedOutcome,

    /// Exact status the bound event must carry, when given.
    #[serde(default)]
    pub status: Option<u16>,

    /// Substring the bound event's payload must contain, when given.
    #[serde(default)]
    pub body_contains: Option<String>,

    #[serde(default)]
    pub on_timeout: TimeoutDisposition,
}

/// Final classification for one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
    Inconclusive,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Pass => write!(f, "pass"),
            Verdict::Fail => write!(f, "fail"),
            Verdict::Inconclusive => write!(f, "inconclusive"),
        }
    }
}

/// Human-oriented explanation attached to every assessment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub message: String,
    /// The events that informed the verdict; empty on timeouts.
    pub matched: Vec<ObservedEvent>,
    pub waited_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepAssessment {
    pub verdict: Verdict,
    pub diagnostic: Diagnostic,
}

/// Turn a correlation result into a verdict against the expectation.
pub fn assess(result: &CorrelationResult, expectation: &Expectation) -> StepAssessment {
    let waited_ms = result.waited.as_millis() as u64;
    let diag = |message: String, matched: &[ObservedEvent]| Diagnostic {
        message,
        matched: matched.to_vec(),
        waited_ms,
    };

    match result.verdict {
        CorrelationVerdict::Matched => match expectation.outcome {
            ExpectedOutcome::Success => check_constraints(result, expectation, waited_ms),
            ExpectedOutcome::Error => StepAssessment {
                verdict: Verdict::Fail,
                diagnostic: diag(
                    "expected the backend to reject the action, but it succeeded".to_string(),
                    &result.matched,
                ),
            },
        },
        CorrelationVerdict::ErrorMatched => match expectation.outcome {
            ExpectedOutcome::Success => StepAssessment {
                verdict: Verdict::Fail,
                diagnostic: diag(
                    format!(
                        "backend rejected the action: {}",
                        describe_first(&result.matched)
                    ),
                    &result.matched,
                ),
            },
            ExpectedOutcome::Error => check_constraints(result, expectation, waited_ms),
        },
        CorrelationVerdict::TimedOut => {
            let verdict = match expectation.on_timeout {
                TimeoutDisposition::Fail => Verdict::Fail,
                TimeoutDisposition::Inconclusive => Verdict::Inconclusive,
            };
            StepAssessment {
                verdict,
                diagnostic: diag(
                    format!("no matching event observed within {}ms", waited_ms),
                    &[],
                ),
            }
        }
        CorrelationVerdict::Ambiguous => StepAssessment {
            verdict: Verdict::Inconclusive,
            diagnostic: diag(
                format!(
                    "{} conflicting events matched within the coalescing window",
                    result.matched.len()
                ),
                &result.matched,
            ),
        },
        CorrelationVerdict::Aborted => StepAssessment {
            verdict: Verdict::Fail,
            diagnostic: diag(
                "scenario aborted while the wait was outstanding".to_string(),
                &result.matched,
            ),
        },
    }
}

/// Status/body constraints, applied once the verdict direction agrees
/// with the expectation.
fn check_constraints(
    result: &CorrelationResult,
    expectation: &Expectation,
    waited_ms: u64,
) -> StepAssessment {
    let event = result
        .first_match()
        .expect("matched verdicts carry at least one event");

    if let Some(expected_status) = expectation.status {
        if event.status != Some(expected_status) {
            return StepAssessment {
                verdict: Verdict::Fail,
                diagnostic: Diagnostic {
                    message: format!(
                        "expected status {}, observed {}",
                        expected_status,
                        event
                            .status
                            .map_or_else(|| "none".to_string(), |s| s.to_string())
                    ),
                    matched: result.matched.clone(),
                    waited_ms,
                },
            };
        }
    }

    if let Some(needle) = &expectation.body_contains {
        if !payload_contains(&event.payload, needle) {
            return StepAssessment {
                verdict: Verdict::Fail,
                diagnostic: Diagnostic {
                    message: format!("payload does not contain {:?}", needle),
                    matched: result.matched.clone(),
                    waited_ms,
                },
            };
        }
    }

    StepAssessment {
        verdict: Verdict::Pass,
        diagnostic: Diagnostic {
            message: format!("{} ({})", describe_first(&result.matched), result.verdict),
            matched: result.matched.clone(),
            waited_ms,
        },
    }
}

fn payload_contains(payload: &EventPayload, needle: &str) -> bool {
    match payload {
        EventPayload::Json(value) => value.to_string().contains(needle),
        EventPayload::Text(text) => text.contains(needle),
        // Raw bytes match by descriptor and status only.
        EventPayload::RawBytes(_) | EventPayload::Empty => false,
    }
}

fn describe_first(matched: &[ObservedEvent]) -> String {
    match matched.first() {
        Some(event) => match event.status {
            Some(status) => format!("{} -> {}", event.descriptor, status),
            None => event.descriptor.to_string(),
        },
        None => "no event".to_string(),
    }
}
