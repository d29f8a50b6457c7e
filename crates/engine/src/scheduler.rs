//! Wait/timeout scheduler: poll-until-condition with backoff
//!
//! The harness never sleeps a fixed amount and hopes the UI settled;
//! every wait is a bounded poll loop that yields between checks so event
//! delivery is never starved, and every wait observes scenario
//! cancellation within one tick.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use vigil_common::{Result, WaitPolicy};

/// How a bounded wait concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Satisfied { elapsed: Duration },
    TimedOut { elapsed: Duration },
    Cancelled { elapsed: Duration },
}

impl WaitOutcome {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, WaitOutcome::Satisfied { .. })
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            WaitOutcome::Satisfied { elapsed }
            | WaitOutcome::TimedOut { elapsed }
            | WaitOutcome::Cancelled { elapsed } => *elapsed,
        }
    }
}

/// Poll `check` until it reports true, the policy window elapses, or the
/// scenario is cancelled. Errors from `check` (driver failures) short-
/// circuit the wait.
pub async fn wait_until<F, Fut>(
    policy: &WaitPolicy,
    cancel: &CancellationToken,
    mut check: F,
) -> Result<WaitOutcome>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let started = Instant::now();
    let deadline = started + policy.max_wait();
    let mut interval = policy.poll_interval();

    loop {
        if cancel.is_cancelled() {
            return Ok(WaitOutcome::Cancelled { elapsed: started.elapsed() });
        }

        if check().await? {
            return Ok(WaitOutcome::Satisfied { elapsed: started.elapsed() });
        }

        let now = Instant::now();
        if now >= deadline {
            return Ok(WaitOutcome::TimedOut { elapsed: started.elapsed() });
        }

        let nap = interval.min(deadline - now);
        trace!("condition unmet, napping {:?}", nap);
        tokio::select! {
            _ = cancel.cancelled() => {
                return Ok(WaitOutcome::Cancelled { elapsed: started.elapsed() });
            }
            _ = tokio::time::sleep(nap) => {}
        }

        if let Some(multiplier) = policy.backoff_multiplier {
            interval = interval.mul_f64(multiplier);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn quick_policy() -> WaitPolicy {
        WaitPolicy {
            poll_interval_ms: 10,
            max_wait_ms: 100,
            backoff_multiplier: None,
            coalesce_window_ms: 10,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn satisfied_after_a_few_polls() {
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_check = Arc::clone(&calls);

        let outcome = wait_until(&quick_policy(), &cancel, move || {
            let calls = Arc::clone(&calls_in_check);
            async move { Ok(calls.fetch_add(1, Ordering::SeqCst) >= 3) }
        })
        .await
        .unwrap();

        assert!(outcome.is_satisfied());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_when_condition_never_holds() {
        let cancel = CancellationToken::new();
        let outcome = wait_until(&quick_policy(), &cancel, || async { Ok(false) })
            .await
            .unwrap();

        match outcome {
            WaitOutcome::TimedOut { elapsed } => {
                assert!(elapsed >= Duration::from_millis(100));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_stretches_the_polling() {
        let policy = WaitPolicy {
            poll_interval_ms: 10,
            max_wait_ms: 1_000,
            backoff_multiplier: Some(2.0),
            coalesce_window_ms: 10,
        };
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_check = Arc::clone(&calls);

        let outcome = wait_until(&policy, &cancel, move || {
            let calls = Arc::clone(&calls_in_check);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(false)
            }
        })
        .await
        .unwrap();

        assert!(matches!(outcome, WaitOutcome::TimedOut { .. }));
        // 10 + 20 + 40 + 80 + 160 + 320 + 640(capped) covers the window
        // in 7 naps; without backoff it would be 100 checks.
        assert!(calls.load(Ordering::SeqCst) <= 8);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_is_observed_within_one_tick() {
        let cancel = CancellationToken::new();
        let child = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(25)).await;
            child.cancel();
        });

        let outcome = wait_until(&quick_policy(), &cancel, || async { Ok(false) })
            .await
            .unwrap();

        match outcome {
            WaitOutcome::Cancelled { elapsed } => {
                assert!(elapsed < Duration::from_millis(50));
            }
            other => panic!("expected cancellation, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn check_errors_short_circuit() {
        let cancel = CancellationToken::new();
        let result = wait_until(&quick_policy(), &cancel, || async {
            Err(vigil_common::Error::Driver("selector not found".to_string()))
        })
        .await;
        assert!(result.is_err());
    }
}
