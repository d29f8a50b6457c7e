//! Declarative YAML scenario specification

use serde::{Deserialize, Serialize};
use std::path::Path;

use vigil_common::{ActionKind, Error, EventPattern, Result};
use vigil_engine::assertion::Expectation;

/// A complete scenario parsed from YAML: one simulated user session and
/// the ordered interactions to verify within it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Unique name for this scenario
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Tags for filtering
    #[serde(default)]
    pub tags: Vec<String>,

    pub session: SessionSpec,

    /// Steps to execute in order after session setup
    pub steps: Vec<StepSpec>,
}

/// Session-level settings: where the app lives and how to sign in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSpec {
    /// Base URL of the application under test
    pub base_url: String,

    /// Optional app-under-test process to spawn before the session
    #[serde(default)]
    pub app: Option<AppSpec>,

    /// Authentication flow; absent for anonymous scenarios
    #[serde(default)]
    pub login: Option<LoginSpec>,
}

/// App-under-test process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSpec {
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variable that receives the chosen port
    #[serde(default)]
    pub port_env: Option<String>,

    #[serde(default = "default_health_path")]
    pub health_path: String,

    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,
}

fn default_health_path() -> String {
    "/".to_string()
}

fn default_startup_timeout_ms() -> u64 {
    30_000
}

/// Login flow description. Field defaults match the common
/// email/password form shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginSpec {
    pub email: String,
    pub password: String,

    #[serde(default = "default_login_path")]
    pub path: String,

    #[serde(default = "default_email_field")]
    pub email_field: String,

    #[serde(default = "default_password_field")]
    pub password_field: String,

    #[serde(default = "default_submit")]
    pub submit: String,

    /// Substring identifying the authentication API call
    #[serde(default = "default_login_api")]
    pub api_url_contains: String,

    #[serde(default)]
    pub expect: Expectation,

    #[serde(default)]
    pub window_ms: Option<u64>,

    /// Client-stored identity markers that must all be present after a
    /// successful login
    #[serde(default = "default_identity_keys")]
    pub identity_keys: Vec<String>,

    /// Server-issued session marker (cookie name)
    #[serde(default = "default_session_cookie")]
    pub session_cookie: String,
}

fn default_login_path() -> String {
    "/login".to_string()
}

fn default_email_field() -> String {
    r#"input[type="email"]"#.to_string()
}

fn default_password_field() -> String {
    r#"input[type="password"]"#.to_string()
}

fn default_submit() -> String {
    r#"button[type="submit"]"#.to_string()
}

fn default_login_api() -> String {
    "/api/auth/login".to_string()
}

fn default_identity_keys() -> Vec<String> {
    vec![
        "user_id".to_string(),
        "user_email".to_string(),
        "user_username".to_string(),
    ]
}

fn default_session_cookie() -> String {
    "user_id".to_string()
}

/// One verified interaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    pub name: String,

    /// What kind of interaction this is
    pub action: ActionKind,

    /// Click target, or URL path for navigate actions. Empty for steps
    /// that only observe (e.g. waiting on comments to load).
    #[serde(default)]
    pub target: String,

    /// Expected backend effects of the action
    #[serde(default)]
    pub events: Vec<EventPattern>,

    #[serde(default)]
    pub expect: Expectation,

    #[serde(default)]
    pub window_ms: Option<u64>,

    #[serde(default)]
    pub poll_ms: Option<u64>,

    /// Override for the conflicting-match coalescing sub-window
    #[serde(default)]
    pub coalesce_ms: Option<u64>,

    /// Page precondition that must hold before the action fires
    #[serde(default)]
    pub requires: Option<Precondition>,

    /// Capture a screenshot around this step
    #[serde(default)]
    pub screenshot: bool,
}

/// Element-count precondition, e.g. "the feed has at least one post".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Precondition {
    pub selector: String,

    #[serde(default = "default_min_count")]
    pub min_count: usize,
}

fn default_min_count() -> usize {
    1
}

impl Scenario {
    /// Parse a scenario from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let scenario: Self =
            serde_yaml::from_str(yaml).map_err(|e| Error::ScenarioParse(e.to_string()))?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Parse a scenario from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content).map_err(|e| match e {
            Error::ScenarioParse(msg) => {
                Error::ScenarioParse(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    /// Load every scenario under a directory
    pub fn load_all(dir: &Path) -> Result<Vec<Self>> {
        let mut scenarios = Vec::new();

        for entry in walkdir::WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
        {
            scenarios.push(Self::from_file(entry.path())?);
        }

        Ok(scenarios)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::ScenarioParse("scenario name is empty".to_string()));
        }
        if self.session.base_url.is_empty() {
            return Err(Error::ScenarioParse(format!(
                "{}: session.base_url is empty",
                self.name
            )));
        }
        for step in &self.steps {
            if step.events.is_empty() {
                return Err(Error::ScenarioParse(format!(
                    "{}: step '{}' expects no events; every step must name at least one",
                    self.name, step.name
                )));
            }
            // Observation-only steps (comments populating, a toast
            // appearing) interact with nothing and need no target.
            let observes_only = matches!(step.action, ActionKind::LoadComments)
                || step
                    .events
                    .iter()
                    .all(|p| matches!(p, EventPattern::Dom { .. }));
            if step.target.is_empty() && !observes_only {
                return Err(Error::ScenarioParse(format!(
                    "{}: step '{}' has no target",
                    self.name, step.name
                )));
            }
        }
        Ok(())
    }

    /// Filter scenarios by tag
    pub fn filter_by_tag<'a>(scenarios: &'a [Self], tag: &str) -> Vec<&'a Self> {
        scenarios
            .iter()
            .filter(|s| s.tags.iter().any(|t| t == tag))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_engine::assertion::ExpectedOutcome;

    #[test]
    fn parse_like_scenario() {
        let yaml = r#"
name: like-first-post
description: Valid login, then like the first feed post
tags:
  - smoke
  - feed
session:
  base_url: http://127.0.0.1:3000
  login:
    email: tester@example.com
    password: password123
steps:
  - name: like-first-post
    action: toggle_like
    target: 'article button.like'
    requires:
      selector: article
    events:
      - source: network
        method: POST
        url_contains: /like
    expect:
      status: 200
      body_contains: likes_count
    window_ms: 5000
"#;
        let scenario = Scenario::from_yaml(yaml).unwrap();
        assert_eq!(scenario.name, "like-first-post");
        assert_eq!(scenario.steps.len(), 1);

        let step = &scenario.steps[0];
        assert_eq!(step.action, ActionKind::ToggleLike);
        assert_eq!(step.window_ms, Some(5_000));
        assert_eq!(
            step.events[0],
            EventPattern::network("POST", "/like")
        );
        assert_eq!(step.requires.as_ref().unwrap().min_count, 1);

        let login = scenario.session.login.unwrap();
        assert_eq!(login.path, "/login");
        assert_eq!(login.session_cookie, "user_id");
        assert_eq!(login.identity_keys.len(), 3);
    }

    #[test]
    fn parse_invalid_login_scenario() {
        let yaml = r#"
name: login-rejected
session:
  base_url: http://127.0.0.1:3000
  login:
    email: wrong@example.com
    password: badpassword
    expect:
      outcome: error
      status: 401
steps: []
"#;
        let scenario = Scenario::from_yaml(yaml).unwrap();
        let login = scenario.session.login.unwrap();
        assert_eq!(login.expect.outcome, ExpectedOutcome::Error);
        assert_eq!(login.expect.status, Some(401));
    }

    #[test]
    fn parse_comments_transition_scenario() {
        let yaml = r#"
name: comments-load
session:
  base_url: http://127.0.0.1:3000
steps:
  - name: open-first-post
    action: open_modal
    target: 'article button.expand'
    events:
      - source: network
        method: GET
        url_contains: /comments
  - name: comments-populate
    action: load_comments
    events:
      - source: dom
        selector: '.comments'
        not_text_contains: loading
    expect:
      on_timeout: fail
"#;
        let scenario = Scenario::from_yaml(yaml).unwrap();
        assert_eq!(scenario.steps.len(), 2);
        assert!(scenario.steps[1].target.is_empty());
    }

    #[test]
    fn step_without_events_is_rejected() {
        let yaml = r#"
name: broken
session:
  base_url: http://127.0.0.1:3000
steps:
  - name: aimless
    action: toggle_like
    target: button
    events: []
"#;
        assert!(matches!(
            Scenario::from_yaml(yaml),
            Err(Error::ScenarioParse(_))
        ));
    }

    #[test]
    fn load_all_walks_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = r#"
name: minimal
session:
  base_url: http://127.0.0.1:3000
steps: []
"#;
        std::fs::write(dir.path().join("a.yaml"), yaml).unwrap();
        std::fs::write(dir.path().join("b.yml"), yaml.replace("minimal", "other")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let scenarios = Scenario::load_all(dir.path()).unwrap();
        assert_eq!(scenarios.len(), 2);
    }

    #[test]
    fn filter_by_tag_matches_exactly() {
        let yaml = r#"
name: tagged
tags: [smoke]
session:
  base_url: http://127.0.0.1:3000
steps: []
"#;
        let scenarios = vec![Scenario::from_yaml(yaml).unwrap()];
        assert_eq!(Scenario::filter_by_tag(&scenarios, "smoke").len(), 1);
        assert!(Scenario::filter_by_tag(&scenarios, "smok").is_empty());
    }
}
