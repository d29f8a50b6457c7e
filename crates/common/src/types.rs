//! Core types for the vigil harness
//!
//! Timestamps are monotonic offsets from a per-session origin and are
//! only comparable within that session. The clock is backed by the tokio
//! clock so timing-sensitive tests can run under a paused runtime.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Microseconds since the owning session's origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    pub fn as_micros(self) -> u64 {
        self.0
    }

    /// Elapsed time since `earlier`, or `None` when `earlier` is later.
    pub fn duration_since(self, earlier: Timestamp) -> Option<Duration> {
        self.0
            .checked_sub(earlier.0)
            .map(Duration::from_micros)
    }
}

impl std::ops::Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Timestamp {
        Timestamp(self.0.saturating_add(rhs.as_micros() as u64))
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "+{}us", self.0)
    }
}

/// Monotonic clock anchored at session start.
#[derive(Debug, Clone, Copy)]
pub struct SessionClock {
    origin: Instant,
}

impl SessionClock {
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn now(&self) -> Timestamp {
        Timestamp(self.origin.elapsed().as_micros() as u64)
    }
}

/// Opaque correlation token identifying one issued action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(Uuid);

impl ActionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// What kind of user interaction an action simulates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    LoginSubmit,
    ToggleLike,
    OpenModal,
    LoadComments,
    Navigate,
    Custom(String),
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionKind::LoginSubmit => write!(f, "login_submit"),
            ActionKind::ToggleLike => write!(f, "toggle_like"),
            ActionKind::OpenModal => write!(f, "open_modal"),
            ActionKind::LoadComments => write!(f, "load_comments"),
            ActionKind::Navigate => write!(f, "navigate"),
            ActionKind::Custom(name) => write!(f, "custom:{}", name),
        }
    }
}

/// A single simulated user interaction, stamped at dispatch.
///
/// Immutable once created; owned by the action ledger for the scenario's
/// lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: ActionId,
    pub kind: ActionKind,
    pub target: String,
    pub issued_at: Timestamp,
}

impl Action {
    pub fn issue(kind: ActionKind, target: impl Into<String>, clock: &SessionClock) -> Self {
        Self {
            id: ActionId::generate(),
            kind,
            target: target.into(),
            issued_at: clock.now(),
        }
    }
}

/// Where an observed event was surfaced from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Network,
    Dom,
    Storage,
}

impl std::fmt::Display for EventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventSource::Network => write!(f, "network"),
            EventSource::Dom => write!(f, "dom"),
            EventSource::Storage => write!(f, "storage"),
        }
    }
}

/// Pattern-matchable descriptor of an observed event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum EventDescriptor {
    Network { method: String, url: String },
    Dom { selector: String, text: String },
    Storage { key: String },
}

impl EventDescriptor {
    pub fn source(&self) -> EventSource {
        match self {
            EventDescriptor::Network { .. } => EventSource::Network,
            EventDescriptor::Dom { .. } => EventSource::Dom,
            EventDescriptor::Storage { .. } => EventSource::Storage,
        }
    }
}

impl std::fmt::Display for EventDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventDescriptor::Network { method, url } => write!(f, "{} {}", method, url),
            EventDescriptor::Dom { selector, .. } => write!(f, "dom:{}", selector),
            EventDescriptor::Storage { key } => write!(f, "storage:{}", key),
        }
    }
}

/// Event payload. Unparsable driver callbacks become `RawBytes` and keep
/// participating in matching by descriptor and status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventPayload {
    Json(serde_json::Value),
    Text(String),
    RawBytes(Vec<u8>),
    Empty,
}

impl EventPayload {
    /// Parse a raw body, falling back to the raw-bytes marker.
    pub fn from_body(body: &[u8]) -> Self {
        if body.is_empty() {
            return EventPayload::Empty;
        }
        match std::str::from_utf8(body) {
            Ok(text) => match serde_json::from_str(text) {
                Ok(value) => EventPayload::Json(value),
                Err(_) => EventPayload::Text(text.to_string()),
            },
            Err(_) => EventPayload::RawBytes(body.to_vec()),
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, EventPayload::RawBytes(_))
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            EventPayload::Json(value) => Some(value),
            _ => None,
        }
    }
}

/// A timestamped fact surfaced by the driver. Read-only once created;
/// retained only inside the event bus's bounded buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservedEvent {
    /// Bus-assigned, strictly increasing publication sequence.
    pub seq: u64,
    pub descriptor: EventDescriptor,
    pub payload: EventPayload,
    /// Numeric status for network events; absent for DOM and storage.
    pub status: Option<u16>,
    pub observed_at: Timestamp,
}

impl ObservedEvent {
    pub fn source(&self) -> EventSource {
        self.descriptor.source()
    }
}

/// How a correlation window concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationVerdict {
    /// A matching event bound and its status/payload fell in the success range.
    Matched,
    /// No matching event bound before the window elapsed.
    TimedOut,
    /// Conflicting patterns bound within the coalescing sub-window.
    Ambiguous,
    /// A matching event bound but carried a recognized error shape.
    ErrorMatched,
    /// The owning scenario was cancelled while the wait was outstanding.
    Aborted,
}

impl std::fmt::Display for CorrelationVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CorrelationVerdict::Matched => write!(f, "matched"),
            CorrelationVerdict::TimedOut => write!(f, "timed_out"),
            CorrelationVerdict::Ambiguous => write!(f, "ambiguous"),
            CorrelationVerdict::ErrorMatched => write!(f, "error_matched"),
            CorrelationVerdict::Aborted => write!(f, "aborted"),
        }
    }
}

/// Outcome of correlating one action against the event stream.
///
/// Computed exactly once per action and immutable thereafter; the ledger
/// enforces both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationResult {
    pub action: Action,
    /// Bound events, ordered by `observed_at`.
    pub matched: Vec<ObservedEvent>,
    pub verdict: CorrelationVerdict,
    /// First match minus issue time. Never negative: events observed
    /// before issuance are not matchable.
    pub latency: Option<Duration>,
    /// How long the correlator actually waited.
    pub waited: Duration,
}

impl CorrelationResult {
    pub fn first_match(&self) -> Option<&ObservedEvent> {
        self.matched.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_duration_since_rejects_reversed_order() {
        let a = Timestamp::from_micros(5_000);
        let b = Timestamp::from_micros(2_000);
        assert_eq!(a.duration_since(b), Some(Duration::from_micros(3_000)));
        assert_eq!(b.duration_since(a), None);
    }

    #[test]
    fn payload_falls_back_to_text_then_raw() {
        let json = EventPayload::from_body(br#"{"success":true}"#);
        assert!(json.as_json().is_some());

        let text = EventPayload::from_body(b"not json");
        assert_eq!(text, EventPayload::Text("not json".to_string()));

        let raw = EventPayload::from_body(&[0xff, 0xfe, 0x00]);
        assert!(raw.is_raw());
    }

    #[test]
    fn action_kind_serializes_snake_case() {
        let kind: ActionKind = serde_json::from_str(r#""toggle_like""#).unwrap();
        assert_eq!(kind, ActionKind::ToggleLike);
    }

    #[tokio::test(start_paused = true)]
    async fn session_clock_is_monotonic() {
        let clock = SessionClock::start();
        let t1 = clock.now();
        tokio::time::advance(Duration::from_millis(10)).await;
        let t2 = clock.now();
        assert!(t2 > t1);
        assert_eq!(t2.duration_since(t1), Some(Duration::from_millis(10)));
    }
}
