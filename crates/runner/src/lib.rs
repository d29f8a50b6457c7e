//! Vigil Scenario Runner
//!
//! Sequences declarative scenarios (login, navigate, act, assert)
//! against the correlation engine and an automation driver, and renders
//! the results into reports. Scenarios are data: ordered action and
//! expectation pairs in YAML, not bespoke scripts.

pub mod app;
pub mod flow;
pub mod report;
pub mod scenario;

pub use app::{AppConfig, AppHandle};
pub use flow::FlowDriver;
pub use report::{ScenarioReport, StepReport};
pub use scenario::{LoginSpec, Scenario, SessionSpec, StepSpec};
