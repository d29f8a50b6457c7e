//! Session/flow driver: sequences scenario steps
//!
//! Owns every call across the driver boundary. A driver failure during
//! setup or login aborts the scenario; a driver failure inside a feed
//! step marks that step failed and, by default, lets the remaining
//! steps report. Nothing thrown here escapes `run_scenario`; a fully
//! failed run still yields a report.

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vigil_common::{
    Action, ActionKind, EventPattern, HarnessConfig, Result, SessionClock, WaitPolicy,
};
use vigil_driver::BrowserDriver;
use vigil_engine::assertion::{assess, ExpectedOutcome, Verdict};
use vigil_engine::bus::EventBus;
use vigil_engine::correlator::Correlator;
use vigil_engine::ledger::ActionLedger;
use vigil_engine::scheduler::wait_until;

use crate::report::{ScenarioReport, StepReport};
use crate::scenario::{LoginSpec, Scenario, StepSpec};

/// Sequences one scenario against one browser session.
pub struct FlowDriver<D: BrowserDriver> {
    driver: D,
    bus: EventBus,
    ledger: ActionLedger,
    correlator: Correlator,
    clock: SessionClock,
    cancel: CancellationToken,
    config: HarnessConfig,
}

impl<D: BrowserDriver> FlowDriver<D> {
    pub fn new(driver: D, bus: EventBus, clock: SessionClock, config: HarnessConfig) -> Self {
        let ledger = ActionLedger::new();
        let cancel = CancellationToken::new();
        let correlator = Correlator::new(bus.clone(), ledger.clone(), cancel.clone());
        Self {
            driver,
            bus,
            ledger,
            correlator,
            clock,
            cancel,
            config,
        }
    }

    /// Token that aborts every outstanding wait in this scenario.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn ledger(&self) -> &ActionLedger {
        &self.ledger
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Run the scenario to completion. Always returns a report.
    pub async fn run_scenario(&self, scenario: &Scenario) -> ScenarioReport {
        info!("running scenario: {}", scenario.name);
        let mut report = ScenarioReport::new(&scenario.name);
        let run_started = Instant::now();
        let mut abort = false;

        if let Some(login) = &scenario.session.login {
            match self.login(scenario, login).await {
                Ok(step) => {
                    let failed = step.verdict == Verdict::Fail;
                    report.steps.push(step);
                    if failed {
                        warn!("login failed, aborting before feed steps");
                        abort = true;
                    }
                }
                Err(e) => {
                    warn!("driver error during login: {}", e);
                    report.steps.push(StepReport::driver_error("login", None, &e));
                    abort = true;
                }
            }
        }

        for step in &scenario.steps {
            if abort || self.cancel.is_cancelled() {
                report.steps.push(StepReport::skipped(&step.name));
                continue;
            }
            match self.run_step(scenario, step).await {
                Ok(step_report) => report.steps.push(step_report),
                Err(e) => {
                    warn!("driver error during step '{}': {}", step.name, e);
                    report
                        .steps
                        .push(StepReport::driver_error(&step.name, None, &e));
                    if self.config.abort_on_driver_error {
                        abort = true;
                    }
                }
            }
        }

        if abort {
            // Cancel anything still waiting; aborted waits settle as
            // ABORTED rather than lingering.
            self.cancel.cancel();
            report.aborted = true;
        }
        // Teardown: subscriptions drain and terminate, none survive.
        self.bus.close();

        report.duration_ms = run_started.elapsed().as_millis() as u64;
        let (passed, failed, inconclusive, skipped) = report.counts();
        info!(
            "scenario {}: {} ({} passed, {} failed, {} inconclusive, {} skipped)",
            scenario.name,
            report.overall(),
            passed,
            failed,
            inconclusive,
            skipped
        );
        report
    }

    /// Navigate to the login form, submit credentials, correlate the
    /// authentication call, then verify the session over both channels.
    async fn login(&self, scenario: &Scenario, login: &LoginSpec) -> Result<StepReport> {
        let url = join_url(&scenario.session.base_url, &login.path);
        self.driver.navigate(&url).await?;
        self.driver.fill(&login.email_field, &login.email).await?;
        self.driver.fill(&login.password_field, &login.password).await?;

        let action = Action::issue(ActionKind::LoginSubmit, &login.submit, &self.clock);
        self.ledger.record(&action);
        self.driver.click(&login.submit).await?;

        let patterns = vec![EventPattern::network("POST", &login.api_url_contains)];
        let policy = self.policy(login.window_ms, None);
        let result = self.correlator.correlate(&action, &patterns, &policy).await?;
        let mut assessment = assess(&result, &login.expect);

        // Dual-channel session check: the client-stored identity and the
        // server-issued cookie must agree in both directions.
        if assessment.verdict == Verdict::Pass {
            let channels = self.session_channels(login).await?;
            let check = match login.expect.outcome {
                ExpectedOutcome::Success => channels.require_established(),
                ExpectedOutcome::Error => channels.require_absent(),
            };
            if let Err(problem) = check {
                warn!("dual-channel session check failed: {}", problem);
                assessment.verdict = Verdict::Fail;
                assessment.diagnostic.message = problem;
            }
        }

        let artifacts = self.capture(scenario, "login").await;
        Ok(StepReport::assessed("login", action, result, assessment, artifacts))
    }

    async fn run_step(&self, scenario: &Scenario, step: &StepSpec) -> Result<StepReport> {
        debug!("running step: {}", step.name);
        let mut policy = self.policy(step.window_ms, step.poll_ms);
        if let Some(coalesce) = step.coalesce_ms {
            policy.coalesce_window_ms = coalesce;
        }

        if let Some(requires) = &step.requires {
            let driver = &self.driver;
            let outcome = wait_until(&policy, &self.cancel, || {
                let selector = requires.selector.clone();
                async move { Ok(driver.count(&selector).await? >= requires.min_count) }
            })
            .await?;
            if !outcome.is_satisfied() {
                return Ok(StepReport::precondition_failed(
                    &step.name,
                    format!(
                        "precondition not met: fewer than {} of '{}' after {:?}",
                        requires.min_count,
                        requires.selector,
                        outcome.elapsed()
                    ),
                ));
            }
        }

        let mut artifacts = Vec::new();
        if self.config.screenshot_each_step || step.screenshot {
            artifacts.extend(self.capture(scenario, &format!("{}-before", step.name)).await);
        }

        let action = Action::issue(step.action.clone(), &step.target, &self.clock);
        self.ledger.record(&action);

        // Start observing expected DOM selectors after stamping the
        // action but before it fires: the watch reports current text
        // immediately (already-settled state matches at once) and every
        // later transition lands inside the correlation window.
        for pattern in &step.events {
            if let EventPattern::Dom { selector, .. } = pattern {
                self.driver.watch_dom(selector).await?;
            }
        }

        self.dispatch(scenario, step).await?;

        let result = self.correlator.correlate(&action, &step.events, &policy).await?;
        let assessment = assess(&result, &step.expect);

        if self.config.screenshot_each_step || step.screenshot {
            artifacts.extend(self.capture(scenario, &format!("{}-after", step.name)).await);
        }

        Ok(StepReport::assessed(&step.name, action, result, assessment, artifacts))
    }

    /// Perform the UI interaction a step describes.
    async fn dispatch(&self, scenario: &Scenario, step: &StepSpec) -> Result<()> {
        match &step.action {
            ActionKind::Navigate => {
                let url = join_url(&scenario.session.base_url, &step.target);
                self.driver.navigate(&url).await
            }
            // Observation-only steps (comments populating after the
            // modal opened) have no interaction of their own.
            _ if step.target.is_empty() => Ok(()),
            _ => self.driver.click(&step.target).await,
        }
    }

    /// Read both session channels.
    async fn session_channels(&self, login: &LoginSpec) -> Result<SessionChannels> {
        let mut missing = Vec::new();
        let mut matching_identity = None;
        for key in &login.identity_keys {
            match self.driver.read_storage_item(key).await? {
                Some(value) => {
                    if *key == login.session_cookie {
                        matching_identity = Some(value);
                    }
                }
                None => missing.push(key.clone()),
            }
        }
        let cookie = self.driver.read_cookie(&login.session_cookie).await?;
        Ok(SessionChannels {
            identity_present: missing.is_empty(),
            missing,
            cookie_name: login.session_cookie.clone(),
            cookie,
            matching_identity,
        })
    }

    /// Screenshot capture is best-effort; a failed capture is logged,
    /// never fatal to the step.
    async fn capture(&self, scenario: &Scenario, label: &str) -> Vec<std::path::PathBuf> {
        let path = self
            .config
            .artifact_dir
            .join(&scenario.name)
            .join(format!("{}.png", label));
        match self.driver.capture_screenshot(&path).await {
            Ok(()) => vec![path],
            Err(e) => {
                warn!("screenshot '{}' failed: {}", label, e);
                Vec::new()
            }
        }
    }

    fn policy(&self, window_ms: Option<u64>, poll_ms: Option<u64>) -> WaitPolicy {
        let mut policy = self.config.wait.clone();
        if let Some(window) = window_ms {
            policy.max_wait_ms = window;
        }
        if let Some(poll) = poll_ms {
            policy.poll_interval_ms = poll;
        }
        policy
    }
}

/// The two session channels after a login attempt.
#[derive(Debug)]
struct SessionChannels {
    identity_present: bool,
    missing: Vec<String>,
    cookie_name: String,
    cookie: Option<String>,
    /// Storage value stored under the same key as the session cookie,
    /// when the login spec names one; lets the two channels be compared
    /// for consistency, not just presence.
    matching_identity: Option<String>,
}

impl SessionChannels {
    /// After an accepted login both channels must be present and agree.
    fn require_established(&self) -> std::result::Result<(), String> {
        match (self.identity_present, &self.cookie) {
            (false, None) => Err("no session established on either channel".to_string()),
            (false, Some(_)) => Err(format!(
                "server issued '{}' cookie but client identity is missing {:?}",
                self.cookie_name, self.missing
            )),
            (true, None) => Err(format!(
                "client-stored identity present but no '{}' session cookie",
                self.cookie_name
            )),
            (true, Some(cookie)) => match &self.matching_identity {
                Some(identity) if identity != cookie => Err(format!(
                    "client-stored identity '{}' disagrees with session cookie '{}'",
                    identity, cookie
                )),
                _ => Ok(()),
            },
        }
    }

    /// After a rejected login neither channel may carry session markers.
    fn require_absent(&self) -> std::result::Result<(), String> {
        if self.identity_present || self.cookie.is_some() {
            Err(format!(
                "session markers present after rejected login (identity: {}, cookie: {})",
                self.identity_present,
                self.cookie.is_some()
            ))
        } else {
            Ok(())
        }
    }
}

fn join_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channels(
        identity_present: bool,
        cookie: Option<&str>,
        matching: Option<&str>,
    ) -> SessionChannels {
        SessionChannels {
            identity_present,
            missing: if identity_present {
                vec![]
            } else {
                vec!["user_id".to_string()]
            },
            cookie_name: "user_id".to_string(),
            cookie: cookie.map(String::from),
            matching_identity: matching.map(String::from),
        }
    }

    #[test]
    fn both_channels_present_and_agreeing_is_established() {
        assert!(channels(true, Some("42"), Some("42"))
            .require_established()
            .is_ok());
    }

    #[test]
    fn split_channels_are_inconsistent() {
        assert!(channels(true, None, Some("42")).require_established().is_err());
        assert!(channels(false, Some("42"), None).require_established().is_err());
    }

    #[test]
    fn disagreeing_identities_are_inconsistent() {
        let err = channels(true, Some("42"), Some("7"))
            .require_established()
            .unwrap_err();
        assert!(err.contains("disagrees"));
    }

    #[test]
    fn absent_on_both_channels_after_rejection_is_clean() {
        assert!(channels(false, None, None).require_absent().is_ok());
        assert!(channels(true, None, Some("42")).require_absent().is_err());
    }

    #[test]
    fn join_url_handles_slashes() {
        assert_eq!(
            join_url("http://127.0.0.1:3000/", "/login"),
            "http://127.0.0.1:3000/login"
        );
        assert_eq!(
            join_url("http://127.0.0.1:3000", "feed"),
            "http://127.0.0.1:3000/feed"
        );
        assert_eq!(
            join_url("http://127.0.0.1:3000", "http://other/login"),
            "http://other/login"
        );
    }
}
