//! Vigil Correlation Engine
//!
//! The core of the harness: proving that a UI action produced the
//! correct backend effect when the UI and the network are two
//! independently-timed event sources.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Correlation Engine                       │
//! ├──────────────────────────────────────────────────────────────┤
//! │  EventBus                                                    │
//! │    ├── publish(raw)  <- driver callback tasks (concurrent)   │
//! │    └── subscribe(patterns, from) -> replay + live stream     │
//! │  ActionLedger                                                │
//! │    ├── record / lookup                                       │
//! │    ├── try_claim  (single-claim, earliest-pending priority)  │
//! │    └── resolve    (exactly once per action)                  │
//! │  Correlator                                                  │
//! │    └── correlate(action, patterns, policy) -> verdict        │
//! │  Scheduler                                                   │
//! │    └── wait_until(check, policy) -> satisfied | timed out    │
//! │  Assertion                                                   │
//! │    └── assess(result, expectation) -> pass | fail | incl.    │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod assertion;
pub mod bus;
pub mod correlator;
pub mod ledger;
pub mod scheduler;

pub use assertion::{assess, Diagnostic, Expectation, StepAssessment, Verdict};
pub use bus::{EventBus, RawDriverEvent, Subscription};
pub use correlator::Correlator;
pub use ledger::ActionLedger;
pub use scheduler::{wait_until, WaitOutcome};
