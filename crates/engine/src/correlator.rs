//! Correlator: binds observed events to the action that caused them
//!
//! Given an action and the expected-effect patterns, drains the event
//! bus from the action's issue time, claims matching events through the
//! ledger's single-claim arbitration, and settles a verdict before the
//! wait window elapses. A timeout is a normal, reportable outcome.

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use vigil_common::{
    pattern::best_match, Action, CorrelationResult, CorrelationVerdict, EventPattern,
    ObservedEvent, Result, WaitPolicy,
};

use crate::bus::EventBus;
use crate::ledger::{ActionLedger, ClaimOutcome};

/// The correlation engine's front door. Cheap to clone; one per session.
#[derive(Clone)]
pub struct Correlator {
    bus: EventBus,
    ledger: ActionLedger,
    cancel: CancellationToken,
}

impl Correlator {
    pub fn new(bus: EventBus, ledger: ActionLedger, cancel: CancellationToken) -> Self {
        Self { bus, ledger, cancel }
    }

    /// Find the events plausibly caused by `action` and classify the
    /// outcome. Resolves the result into the ledger exactly once.
    pub async fn correlate(
        &self,
        action: &Action,
        patterns: &[EventPattern],
        policy: &WaitPolicy,
    ) -> Result<CorrelationResult> {
        self.ledger.begin(action.id, patterns)?;

        let mut sub = self.bus.subscribe(patterns.to_vec(), action.issued_at);
        let started = Instant::now();
        let hard_deadline = started + policy.max_wait();

        let mut bound: Vec<ObservedEvent> = Vec::new();
        let mut bound_patterns: Vec<usize> = Vec::new();
        // Events an earlier-pending action had priority over; retried on
        // the poll tick until that action resolves or loses interest.
        let mut deferred: Vec<ObservedEvent> = Vec::new();
        // Once a first event binds, keep draining briefly: a UI action
        // that fans out to several calls must surface as AMBIGUOUS, not
        // as whichever call happened to land first.
        let mut settle_deadline: Option<Instant> = None;
        let mut bus_closed = false;

        let verdict = loop {
            self.retry_deferred(action, patterns, &mut deferred, &mut bound, &mut bound_patterns);
            if let (Some(_), None) = (bound.first(), settle_deadline) {
                settle_deadline = Some(Instant::now() + policy.coalesce_window());
            }
            if bus_closed && deferred.is_empty() {
                // Nothing further can match.
                break settle(&bound, &bound_patterns);
            }

            let deadline = settle_deadline.unwrap_or(hard_deadline).min(hard_deadline);
            let retry_at = if deferred.is_empty() {
                deadline
            } else {
                deadline.min(Instant::now() + policy.poll_interval())
            };

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    warn!("correlation for {} aborted by scenario cancel", action.id);
                    break CorrelationVerdict::Aborted;
                }
                _ = tokio::time::sleep_until(retry_at) => {
                    if Instant::now() >= deadline {
                        break settle(&bound, &bound_patterns);
                    }
                    // Poll tick: loop around and retry deferred events.
                }
                maybe = sub.next(), if !bus_closed => {
                    match maybe {
                        None => bus_closed = true,
                        Some(event) => {
                            if event.observed_at < action.issued_at {
                                // Stale: a cause cannot follow its effect.
                                trace!("rejecting stale event seq={}", event.seq);
                                continue;
                            }
                            self.offer(
                                action,
                                patterns,
                                event,
                                &mut deferred,
                                &mut bound,
                                &mut bound_patterns,
                            );
                            if let (Some(_), None) = (bound.first(), settle_deadline) {
                                settle_deadline =
                                    Some(Instant::now() + policy.coalesce_window());
                            }
                        }
                    }
                }
            }
        };

        let latency = bound
            .first()
            .and_then(|event| event.observed_at.duration_since(action.issued_at));

        let result = CorrelationResult {
            action: action.clone(),
            matched: bound,
            verdict,
            latency,
            waited: started.elapsed(),
        };

        debug!(
            "correlation for {} settled: {} after {:?}",
            action.id, result.verdict, result.waited
        );
        self.ledger.resolve(action.id, result.clone())?;
        Ok(result)
    }

    /// Route one event: bind it, defer it, or drop it.
    fn offer(
        &self,
        action: &Action,
        patterns: &[EventPattern],
        event: ObservedEvent,
        deferred: &mut Vec<ObservedEvent>,
        bound: &mut Vec<ObservedEvent>,
        bound_patterns: &mut Vec<usize>,
    ) {
        let Some((idx, strength)) = best_match(patterns, &event) else {
            return;
        };
        if bound_patterns.contains(&idx) {
            // A repeat of an already-bound pattern is left unclaimed
            // for other actions.
            return;
        }
        match self.ledger.try_claim(action.id, &event) {
            ClaimOutcome::Claimed => {
                debug!(
                    "bound event seq={} to {} ({:?} match)",
                    event.seq, action.id, strength
                );
                bound.push(event);
                bound_patterns.push(idx);
            }
            ClaimOutcome::Deferred => {
                trace!("event seq={} deferred to an earlier action", event.seq);
                deferred.push(event);
            }
            ClaimOutcome::Refused => {
                trace!("event seq={} claimed elsewhere", event.seq);
            }
        }
    }

    /// Re-offer deferred events; keeps the ones still deferred.
    fn retry_deferred(
        &self,
        action: &Action,
        patterns: &[EventPattern],
        deferred: &mut Vec<ObservedEvent>,
        bound: &mut Vec<ObservedEvent>,
        bound_patterns: &mut Vec<usize>,
    ) {
        if deferred.is_empty() {
            return;
        }
        let retry = std::mem::take(deferred);
        for event in retry {
            self.offer(action, patterns, event, deferred, bound, bound_patterns);
        }
    }
}

fn settle(bound: &[ObservedEvent], bound_patterns: &[usize]) -> CorrelationVerdict {
    if bound.is_empty() {
        return CorrelationVerdict::TimedOut;
    }
    if bound_patterns.len() > 1 {
        return CorrelationVerdict::Ambiguous;
    }
    classify(&bound[0])
}

/// Success-range versus recognized error-range classification for a
/// single bound event.
fn classify(event: &ObservedEvent) -> CorrelationVerdict {
    if let Some(status) = event.status {
        if (400..=599).contains(&status) {
            return CorrelationVerdict::ErrorMatched;
        }
    }
    if event.payload.is_raw() {
        // Protocol drift: the event bound by descriptor and status, but
        // the payload decodes to no known shape.
        warn!("undecodable payload on {}: {:?}", event.descriptor, event.payload);
        return CorrelationVerdict::ErrorMatched;
    }
    if let Some(json) = event.payload.as_json() {
        // Failure-shaped payload: an explicit success=false, even on an
        // HTTP success status.
        if json.get("success").and_then(|v| v.as_bool()) == Some(false) {
            return CorrelationVerdict::ErrorMatched;
        }
    }
    CorrelationVerdict::Matched
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use vigil_common::{ActionKind, EventPattern, SessionClock};

    use crate::bus::RawDriverEvent;

    fn policy() -> WaitPolicy {
        WaitPolicy {
            poll_interval_ms: 10,
            max_wait_ms: 500,
            backoff_multiplier: None,
            coalesce_window_ms: 50,
        }
    }

    fn like_patterns() -> Vec<EventPattern> {
        vec![EventPattern::network("POST", "/like")]
    }

    struct Fixture {
        clock: SessionClock,
        bus: EventBus,
        ledger: ActionLedger,
        cancel: CancellationToken,
        correlator: Correlator,
    }

    fn fixture() -> Fixture {
        let clock = SessionClock::start();
        let bus = EventBus::new(clock, 64);
        let ledger = ActionLedger::new();
        let cancel = CancellationToken::new();
        let correlator = Correlator::new(bus.clone(), ledger.clone(), cancel.clone());
        Fixture { clock, bus, ledger, cancel, correlator }
    }

    fn issue_like(f: &Fixture) -> Action {
        let action = Action::issue(ActionKind::ToggleLike, "article button", &f.clock);
        f.ledger.record(&action);
        action
    }

    fn like_response(status: u16, body: &[u8]) -> RawDriverEvent {
        RawDriverEvent::NetworkResponse {
            method: "POST".to_string(),
            url: "/api/posts/1/like".to_string(),
            status,
            body: body.to_vec(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn matched_on_success_response() {
        let f = fixture();
        let action = issue_like(&f);

        let bus = f.bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            bus.publish(like_response(200, br#"{"success":true,"likes_count":4}"#));
        });

        let result = f
            .correlator
            .correlate(&action, &like_patterns(), &policy())
            .await
            .unwrap();

        assert_eq!(result.verdict, CorrelationVerdict::Matched);
        assert_eq!(result.matched.len(), 1);
        let latency = result.latency.unwrap();
        assert!(latency >= Duration::from_millis(25), "latency {:?}", latency);
    }

    #[tokio::test(start_paused = true)]
    async fn error_status_yields_error_matched() {
        let f = fixture();
        let action = issue_like(&f);
        f.bus.publish(like_response(401, br#"{"message":"auth required"}"#));

        let result = f
            .correlator
            .correlate(&action, &like_patterns(), &policy())
            .await
            .unwrap();

        assert_eq!(result.verdict, CorrelationVerdict::ErrorMatched);
        assert_eq!(result.first_match().unwrap().status, Some(401));
    }

    #[tokio::test(start_paused = true)]
    async fn failure_shaped_payload_on_http_success_is_error_matched() {
        let f = fixture();
        let action = issue_like(&f);
        f.bus.publish(like_response(200, br#"{"success":false,"message":"nope"}"#));

        let result = f
            .correlator
            .correlate(&action, &like_patterns(), &policy())
            .await
            .unwrap();

        assert_eq!(result.verdict, CorrelationVerdict::ErrorMatched);
    }

    #[tokio::test(start_paused = true)]
    async fn undecodable_payload_is_protocol_drift_not_a_crash() {
        let f = fixture();
        let action = issue_like(&f);
        // Bound by method/url/status alone; the body never decodes.
        f.bus.publish(like_response(200, &[0xff, 0x00, 0xfe]));

        let result = f
            .correlator
            .correlate(&action, &like_patterns(), &policy())
            .await
            .unwrap();

        assert_eq!(result.verdict, CorrelationVerdict::ErrorMatched);
        assert!(result.first_match().unwrap().payload.is_raw());
    }

    #[tokio::test(start_paused = true)]
    async fn no_event_within_window_times_out() {
        let f = fixture();
        let action = issue_like(&f);

        let result = f
            .correlator
            .correlate(&action, &like_patterns(), &policy())
            .await
            .unwrap();

        assert_eq!(result.verdict, CorrelationVerdict::TimedOut);
        assert!(result.matched.is_empty());
        assert!(result.latency.is_none());
        assert!(result.waited >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_event_is_rejected_not_negative_latency() {
        let f = fixture();
        // Event lands BEFORE the action is issued.
        f.bus.publish(like_response(200, br#"{"success":true}"#));
        tokio::time::advance(Duration::from_millis(5)).await;

        let action = issue_like(&f);
        let result = f
            .correlator
            .correlate(&action, &like_patterns(), &policy())
            .await
            .unwrap();

        assert_eq!(result.verdict, CorrelationVerdict::TimedOut);
        assert!(result.latency.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn conflicting_patterns_within_coalesce_window_are_ambiguous() {
        let f = fixture();
        let patterns = vec![
            EventPattern::network("POST", "/like"),
            EventPattern::network("POST", "/share"),
        ];
        let action = issue_like(&f);

        let bus = f.bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            bus.publish(like_response(200, br#"{"success":true}"#));
            tokio::time::sleep(Duration::from_millis(10)).await;
            bus.publish(RawDriverEvent::NetworkResponse {
                method: "POST".to_string(),
                url: "/api/posts/1/share".to_string(),
                status: 200,
                body: br#"{"success":true}"#.to_vec(),
            });
        });

        let result = f
            .correlator
            .correlate(&action, &patterns, &policy())
            .await
            .unwrap();

        assert_eq!(result.verdict, CorrelationVerdict::Ambiguous);
        assert_eq!(result.matched.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn second_conflicting_event_outside_coalesce_window_is_ignored() {
        let f = fixture();
        let patterns = vec![
            EventPattern::network("POST", "/like"),
            EventPattern::network("POST", "/share"),
        ];
        let action = issue_like(&f);

        let bus = f.bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            bus.publish(like_response(200, br#"{"success":true}"#));
            // Well past the 50ms coalescing sub-window.
            tokio::time::sleep(Duration::from_millis(200)).await;
            bus.publish(RawDriverEvent::NetworkResponse {
                method: "POST".to_string(),
                url: "/api/posts/1/share".to_string(),
                status: 200,
                body: br#"{"success":true}"#.to_vec(),
            });
        });

        let result = f
            .correlator
            .correlate(&action, &patterns, &policy())
            .await
            .unwrap();

        assert_eq!(result.verdict, CorrelationVerdict::Matched);
        assert_eq!(result.matched.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_actions_bind_distinct_events() {
        let f = fixture();
        let first = issue_like(&f);
        tokio::time::advance(Duration::from_millis(1)).await;
        let second = issue_like(&f);

        let bus = f.bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            bus.publish(like_response(200, br#"{"success":true,"likes_count":1}"#));
            tokio::time::sleep(Duration::from_millis(2)).await;
            bus.publish(like_response(200, br#"{"success":true,"likes_count":0}"#));
        });

        let patterns1 = like_patterns();
        let patterns2 = like_patterns();
        let policy1 = policy();
        let policy2 = policy();
        let (r1, r2) = tokio::join!(
            f.correlator.correlate(&first, &patterns1, &policy1),
            f.correlator.correlate(&second, &patterns2, &policy2),
        );
        let r1 = r1.unwrap();
        let r2 = r2.unwrap();

        assert_eq!(r1.verdict, CorrelationVerdict::Matched);
        assert_eq!(r2.verdict, CorrelationVerdict::Matched);
        let s1 = r1.first_match().unwrap().seq;
        let s2 = r2.first_match().unwrap().seq;
        assert_ne!(s1, s2, "one backend response counted twice");
    }

    #[tokio::test(start_paused = true)]
    async fn scenario_abort_settles_as_aborted() {
        let f = fixture();
        let action = issue_like(&f);

        let cancel = f.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            cancel.cancel();
        });

        let result = f
            .correlator
            .correlate(&action, &like_patterns(), &policy())
            .await
            .unwrap();

        assert_eq!(result.verdict, CorrelationVerdict::Aborted);
        assert!(result.waited < Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn result_is_computed_exactly_once() {
        let f = fixture();
        let action = issue_like(&f);
        f.bus.publish(like_response(200, br#"{"success":true}"#));

        let first = f
            .correlator
            .correlate(&action, &like_patterns(), &policy())
            .await
            .unwrap();
        assert_eq!(first.verdict, CorrelationVerdict::Matched);

        // A second correlation of the same action is refused outright.
        let second = f
            .correlator
            .correlate(&action, &like_patterns(), &policy())
            .await;
        assert!(second.is_err());
        assert_eq!(
            f.ledger.result(action.id).unwrap().verdict,
            CorrelationVerdict::Matched
        );
    }
}
