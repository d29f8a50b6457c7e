//! Run command: execute scenarios and verify their backend effects

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use tracing::{info, warn};

use vigil_common::{HarnessConfig, SessionClock};
use vigil_driver::{Browser, BrowserDriver, PlaywrightConfig, PlaywrightDriver};
use vigil_engine::assertion::Verdict;
use vigil_engine::bus::EventBus;
use vigil_runner::{AppConfig, AppHandle, FlowDriver, Scenario, ScenarioReport};

use crate::output::{print_report, OutputFormat};
use crate::{EXIT_DRIVER_ERROR, EXIT_FAIL, EXIT_INCONCLUSIVE, EXIT_PASS};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Scenario files to run
    #[arg(required_unless_present = "scenarios_dir")]
    pub scenarios: Vec<PathBuf>,

    /// Directory of scenario files to run
    #[arg(long)]
    pub scenarios_dir: Option<PathBuf>,

    /// Run only scenarios carrying this tag
    #[arg(long)]
    pub tag: Option<String>,

    /// Override every scenario's base URL
    #[arg(long, env = "VIGIL_BASE_URL")]
    pub base_url: Option<String>,

    /// Harness configuration file (TOML)
    #[arg(long, default_value = "vigil.toml")]
    pub config: PathBuf,

    /// Browser to use (chromium, firefox, webkit)
    #[arg(long, default_value = "chromium")]
    pub browser: String,

    /// Run the browser with a visible window (headless by default)
    #[arg(long)]
    pub headed: bool,

    /// Output directory for reports and artifacts
    #[arg(short, long, default_value = "vigil-results")]
    pub output: PathBuf,
}

pub async fn execute(args: RunArgs, format: OutputFormat) -> anyhow::Result<i32> {
    let mut config = HarnessConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    config.artifact_dir = args.output.clone();

    let scenarios = collect_scenarios(&args)?;
    if scenarios.is_empty() {
        anyhow::bail!("no scenarios to run");
    }
    info!("running {} scenario(s)...", scenarios.len());

    let browser = match args.browser.as_str() {
        "firefox" => Browser::Firefox,
        "webkit" => Browser::Webkit,
        _ => Browser::Chromium,
    };

    let mut reports: Vec<ScenarioReport> = Vec::new();
    let mut driver_failure = false;

    for mut scenario in scenarios {
        if let Some(base_url) = &args.base_url {
            scenario.session.base_url = base_url.clone();
        }

        // Spawn the app under test when the scenario asks for one.
        let app = match &scenario.session.app {
            Some(spec) => match AppHandle::spawn(AppConfig::from_spec(spec)).await {
                Ok(handle) => {
                    scenario.session.base_url = handle.base_url().to_string();
                    Some(handle)
                }
                Err(e) => {
                    warn!("scenario {}: app failed to start: {}", scenario.name, e);
                    driver_failure = true;
                    continue;
                }
            },
            None => None,
        };

        let clock = SessionClock::start();
        let bus = EventBus::new(clock, config.event_buffer_capacity);
        let playwright_config = PlaywrightConfig {
            browser,
            headless: !args.headed,
            ..PlaywrightConfig::default()
        };
        let driver = match PlaywrightDriver::launch(playwright_config, bus.clone()).await {
            Ok(driver) => driver,
            Err(e) => {
                warn!("scenario {}: driver failed to launch: {}", scenario.name, e);
                driver_failure = true;
                continue;
            }
        };

        let flow = FlowDriver::new(driver, bus, clock, config.clone());
        let report = flow.run_scenario(&scenario).await;
        if let Err(e) = flow.driver().close().await {
            warn!("driver close failed: {}", e);
        }
        drop(app);

        report.write_json(&args.output)?;
        print_report(&report, format);
        reports.push(report);
    }

    Ok(exit_code(&reports, driver_failure))
}

fn collect_scenarios(args: &RunArgs) -> anyhow::Result<Vec<Scenario>> {
    let mut scenarios = Vec::new();
    for path in &args.scenarios {
        scenarios.push(
            Scenario::from_file(path).with_context(|| format!("loading {}", path.display()))?,
        );
    }
    if let Some(dir) = &args.scenarios_dir {
        scenarios.extend(
            Scenario::load_all(dir).with_context(|| format!("loading {}", dir.display()))?,
        );
    }
    if let Some(tag) = &args.tag {
        scenarios.retain(|s| s.tags.iter().any(|t| t == tag));
    }
    Ok(scenarios)
}

/// Distinct exit code per cause: driver errors beat assertion failures
/// beat inconclusive runs.
fn exit_code(reports: &[ScenarioReport], driver_failure: bool) -> i32 {
    let any_driver_error = driver_failure
        || reports
            .iter()
            .flat_map(|r| &r.steps)
            .any(|s| s.driver_error.is_some());
    if any_driver_error {
        return EXIT_DRIVER_ERROR;
    }
    if reports.iter().any(|r| r.overall() == Verdict::Fail) {
        return EXIT_FAIL;
    }
    if reports.iter().any(|r| r.overall() == Verdict::Inconclusive) {
        return EXIT_INCONCLUSIVE;
    }
    EXIT_PASS
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_runner::StepReport;

    fn report_with(verdict: Verdict) -> ScenarioReport {
        let mut report = ScenarioReport::new("r");
        report.steps.push(StepReport {
            name: "s".to_string(),
            action: None,
            correlation: None,
            verdict,
            diagnostic: None,
            artifacts: vec![],
            skipped: false,
            driver_error: None,
        });
        report
    }

    #[test]
    fn exit_codes_are_distinct_per_cause() {
        assert_eq!(exit_code(&[report_with(Verdict::Pass)], false), EXIT_PASS);
        assert_eq!(exit_code(&[report_with(Verdict::Fail)], false), EXIT_FAIL);
        assert_eq!(
            exit_code(&[report_with(Verdict::Inconclusive)], false),
            EXIT_INCONCLUSIVE
        );
        assert_eq!(
            exit_code(&[report_with(Verdict::Pass)], true),
            EXIT_DRIVER_ERROR
        );
    }

    #[test]
    fn driver_errors_trump_assertion_failures() {
        let mut report = report_with(Verdict::Fail);
        report.steps[0].driver_error = Some("selector not found".to_string());
        assert_eq!(exit_code(&[report], false), EXIT_DRIVER_ERROR);
    }
}
