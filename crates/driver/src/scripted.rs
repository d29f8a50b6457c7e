//! Scripted in-process driver
//!
//! Stands in for a real browser in tests: page state is a set of maps,
//! and interactions trigger pre-scripted effects (network responses,
//! DOM text changes, storage and cookie writes) after configurable
//! latencies. Effects go through the same event bus as a real driver's
//! callbacks, so the correlation engine is exercised end to end.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use vigil_common::{Error, Result};
use vigil_engine::bus::{EventBus, RawDriverEvent};

use crate::BrowserDriver;

/// One scripted consequence of an interaction.
#[derive(Debug, Clone)]
pub enum ScriptedEffect {
    Network {
        method: String,
        url: String,
        status: u16,
        body: Vec<u8>,
    },
    /// Publishes a DOM event and updates the readable page text.
    DomText { selector: String, text: String },
    /// Publishes a storage event and updates the readable storage map.
    StorageWrite { key: String, value: String },
    /// Cookie writes are server-issued; they update the jar silently,
    /// like a Set-Cookie header would.
    SetCookie { name: String, value: String },
    SetUrl { url: String },
}

impl ScriptedEffect {
    pub fn network(method: &str, url: &str, status: u16, body: &str) -> Self {
        ScriptedEffect::Network {
            method: method.to_string(),
            url: url.to_string(),
            status,
            body: body.as_bytes().to_vec(),
        }
    }
}

#[derive(Default)]
struct PageState {
    current_url: String,
    storage: HashMap<String, String>,
    cookies: HashMap<String, String>,
    texts: HashMap<String, String>,
    counts: HashMap<String, usize>,
    click_effects: HashMap<String, Vec<(Duration, ScriptedEffect)>>,
    navigate_effects: HashMap<String, Vec<(Duration, ScriptedEffect)>>,
    failing_clicks: HashMap<String, String>,
    screenshots: Vec<PathBuf>,
    closed: bool,
}

/// Deterministic driver for tests. Cheap to clone.
#[derive(Clone)]
pub struct ScriptedDriver {
    bus: EventBus,
    state: Arc<Mutex<PageState>>,
}

impl ScriptedDriver {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            state: Arc::new(Mutex::new(PageState::default())),
        }
    }

    /// Script the consequences of clicking `locator`.
    pub fn on_click(&self, locator: &str, effects: Vec<(Duration, ScriptedEffect)>) -> &Self {
        self.state
            .lock()
            .click_effects
            .insert(locator.to_string(), effects);
        self
    }

    /// Script the consequences of navigating to a URL containing `url_part`.
    pub fn on_navigate(&self, url_part: &str, effects: Vec<(Duration, ScriptedEffect)>) -> &Self {
        self.state
            .lock()
            .navigate_effects
            .insert(url_part.to_string(), effects);
        self
    }

    /// Make clicking `locator` fail like a missing selector would.
    pub fn fail_click(&self, locator: &str, message: &str) -> &Self {
        self.state
            .lock()
            .failing_clicks
            .insert(locator.to_string(), message.to_string());
        self
    }

    pub fn set_count(&self, locator: &str, count: usize) -> &Self {
        self.state.lock().counts.insert(locator.to_string(), count);
        self
    }

    pub fn set_text(&self, locator: &str, text: &str) -> &Self {
        self.state
            .lock()
            .texts
            .insert(locator.to_string(), text.to_string());
        self
    }

    pub fn screenshots_taken(&self) -> Vec<PathBuf> {
        self.state.lock().screenshots.clone()
    }

    fn run_effects(&self, effects: Vec<(Duration, ScriptedEffect)>) {
        for (delay, effect) in effects {
            let bus = self.bus.clone();
            let state = Arc::clone(&self.state);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                apply_effect(&bus, &state, effect);
            });
        }
    }
}

fn apply_effect(bus: &EventBus, state: &Arc<Mutex<PageState>>, effect: ScriptedEffect) {
    match effect {
        ScriptedEffect::Network { method, url, status, body } => {
            bus.publish(RawDriverEvent::NetworkResponse { method, url, status, body });
        }
        ScriptedEffect::DomText { selector, text } => {
            state.lock().texts.insert(selector.clone(), text.clone());
            bus.publish(RawDriverEvent::DomText { selector, text });
        }
        ScriptedEffect::StorageWrite { key, value } => {
            state.lock().storage.insert(key.clone(), value.clone());
            bus.publish(RawDriverEvent::StorageWrite { key, value });
        }
        ScriptedEffect::SetCookie { name, value } => {
            state.lock().cookies.insert(name, value);
        }
        ScriptedEffect::SetUrl { url } => {
            state.lock().current_url = url;
        }
    }
}

#[async_trait]
impl BrowserDriver for ScriptedDriver {
    async fn navigate(&self, url: &str) -> Result<()> {
        debug!("scripted navigate: {}", url);
        let effects = {
            let mut state = self.state.lock();
            state.current_url = url.to_string();
            state
                .navigate_effects
                .iter()
                .find(|(part, _)| url.contains(part.as_str()))
                .map(|(_, effects)| effects.clone())
        };
        if let Some(effects) = effects {
            self.run_effects(effects);
        }
        Ok(())
    }

    async fn fill(&self, locator: &str, value: &str) -> Result<()> {
        self.state
            .lock()
            .texts
            .insert(locator.to_string(), value.to_string());
        Ok(())
    }

    async fn click(&self, locator: &str) -> Result<()> {
        debug!("scripted click: {}", locator);
        let effects = {
            let state = self.state.lock();
            if state.closed {
                return Err(Error::Driver("browser session closed".to_string()));
            }
            if let Some(message) = state.failing_clicks.get(locator) {
                return Err(Error::Driver(message.clone()));
            }
            state.click_effects.get(locator).cloned()
        };
        if let Some(effects) = effects {
            self.run_effects(effects);
        }
        Ok(())
    }

    async fn read_text(&self, locator: &str) -> Result<String> {
        Ok(self
            .state
            .lock()
            .texts
            .get(locator)
            .cloned()
            .unwrap_or_default())
    }

    async fn count(&self, locator: &str) -> Result<usize> {
        Ok(self.state.lock().counts.get(locator).copied().unwrap_or(0))
    }

    async fn watch_dom(&self, selector: &str) -> Result<()> {
        // Like the sidecar's observer: report current text immediately,
        // then scripted DOM effects keep publishing on their own.
        let text = self
            .state
            .lock()
            .texts
            .get(selector)
            .cloned()
            .unwrap_or_default();
        self.bus.publish(RawDriverEvent::DomText {
            selector: selector.to_string(),
            text,
        });
        Ok(())
    }

    async fn read_storage_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.state.lock().storage.get(key).cloned())
    }

    async fn read_cookie(&self, name: &str) -> Result<Option<String>> {
        Ok(self.state.lock().cookies.get(name).cloned())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.state.lock().current_url.clone())
    }

    async fn capture_screenshot(&self, path: &Path) -> Result<()> {
        self.state.lock().screenshots.push(path.to_path_buf());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.state.lock().closed = true;
        self.bus.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_common::{EventPattern, SessionClock, Timestamp};

    #[tokio::test(start_paused = true)]
    async fn click_effects_reach_the_bus_after_their_latency() {
        let bus = EventBus::new(SessionClock::start(), 16);
        let driver = ScriptedDriver::new(bus.clone());
        driver.on_click(
            "article button",
            vec![(
                Duration::from_millis(25),
                ScriptedEffect::network("POST", "/api/posts/1/like", 200, r#"{"success":true}"#),
            )],
        );

        let mut sub = bus.subscribe(
            vec![EventPattern::network("POST", "/like")],
            Timestamp::ZERO,
        );
        driver.click("article button").await.unwrap();

        let event = sub.next().await.expect("scripted network event");
        assert_eq!(event.status, Some(200));
    }

    #[tokio::test(start_paused = true)]
    async fn storage_effects_update_the_readable_map() {
        let bus = EventBus::new(SessionClock::start(), 16);
        let driver = ScriptedDriver::new(bus.clone());
        driver.on_click(
            "#login",
            vec![(
                Duration::from_millis(5),
                ScriptedEffect::StorageWrite {
                    key: "user_id".to_string(),
                    value: "42".to_string(),
                },
            )],
        );

        driver.click("#login").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(
            driver.read_storage_item("user_id").await.unwrap(),
            Some("42".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failing_click_surfaces_a_driver_error() {
        let bus = EventBus::new(SessionClock::start(), 16);
        let driver = ScriptedDriver::new(bus);
        driver.fail_click("#gone", "selector not found: #gone");

        match driver.click("#gone").await {
            Err(Error::Driver(message)) => assert!(message.contains("#gone")),
            other => panic!("expected driver error, got {:?}", other),
        }
    }
}
