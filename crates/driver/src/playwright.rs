//! Playwright sidecar driver
//!
//! Spawns a long-lived node process that owns the browser and speaks a
//! line-delimited JSON protocol: commands go down stdin with an id,
//! responses come back tagged with the same id, and observed facts
//! (network responses, DOM text changes, storage writes) arrive
//! interleaved as `event` lines. A dedicated reader task demultiplexes
//! the stream, forwarding events to the session's bus so they are never
//! lost behind an in-flight command.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, trace, warn};

use vigil_common::{Error, Result};
use vigil_engine::bus::{EventBus, RawDriverEvent};

use crate::BrowserDriver;

/// How long one sidecar command may take before the driver gives up.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, Default)]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

/// Configuration for the Playwright sidecar
#[derive(Debug, Clone)]
pub struct PlaywrightConfig {
    pub browser: Browser,
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// Response bodies are truncated to this many bytes before they
    /// enter the event stream.
    pub body_limit: usize,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            browser: Browser::Chromium,
            headless: true,
            viewport_width: 1280,
            viewport_height: 720,
            body_limit: 65_536,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum SidecarOp<'a> {
    Init,
    Navigate { url: &'a str },
    Fill { locator: &'a str, value: &'a str },
    Click { locator: &'a str },
    ReadText { locator: &'a str },
    Count { locator: &'a str },
    WatchDom { selector: &'a str },
    ReadStorage { key: &'a str },
    ReadCookie { name: &'a str },
    CurrentUrl,
    Screenshot { path: &'a str },
    Close,
}

#[derive(Serialize)]
struct SidecarCommand<'a> {
    id: u64,
    #[serde(flatten)]
    op: SidecarOp<'a>,
}

#[derive(Debug, Deserialize)]
struct SidecarResponse {
    id: u64,
    ok: bool,
    #[serde(default)]
    value: serde_json::Value,
    #[serde(default)]
    error: Option<String>,
}

type PendingMap = Arc<parking_lot::Mutex<HashMap<u64, oneshot::Sender<SidecarResponse>>>>;

/// Driver backed by a Playwright-controlled browser.
pub struct PlaywrightDriver {
    stdin: Mutex<ChildStdin>,
    child: Mutex<Option<Child>>,
    pending: PendingMap,
    next_id: AtomicU64,
    _workdir: tempfile::TempDir,
}

impl PlaywrightDriver {
    /// Launch the sidecar and wait for the browser to come up.
    pub async fn launch(config: PlaywrightConfig, bus: EventBus) -> Result<Self> {
        Self::check_playwright_installed()?;

        let workdir = tempfile::tempdir()?;
        let script_path = workdir.path().join("sidecar.js");
        std::fs::write(&script_path, SIDECAR_JS)?;

        let sidecar_config = serde_json::json!({
            "browser": config.browser.as_str(),
            "headless": config.headless,
            "viewport_width": config.viewport_width,
            "viewport_height": config.viewport_height,
            "body_limit": config.body_limit,
        });

        let mut child = Command::new("node")
            .arg(&script_path)
            .arg(sidecar_config.to_string())
            .current_dir(workdir.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Sidecar(format!("failed to spawn node: {}", e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Sidecar("sidecar stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Sidecar("sidecar stdout unavailable".to_string()))?;

        let pending: PendingMap = Arc::new(parking_lot::Mutex::new(HashMap::new()));
        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::spawn(read_sidecar(stdout, bus, Arc::clone(&pending), ready_tx));

        // Greeting, in the manner of a protocol handshake: the sidecar
        // reports readiness once the browser has launched.
        match tokio::time::timeout(COMMAND_TIMEOUT, ready_rx).await {
            Ok(Ok(true)) => debug!("playwright sidecar ready"),
            Ok(Ok(false)) => {
                return Err(Error::Sidecar("browser failed to launch".to_string()));
            }
            Ok(Err(_)) | Err(_) => {
                return Err(Error::Sidecar("sidecar never became ready".to_string()));
            }
        }

        Ok(Self {
            stdin: Mutex::new(stdin),
            child: Mutex::new(Some(child)),
            pending,
            next_id: AtomicU64::new(1),
            _workdir: workdir,
        })
    }

    /// Check that Playwright is installed.
    fn check_playwright_installed() -> Result<()> {
        let status = std::process::Command::new("npx")
            .args(["playwright", "--version"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match status {
            Ok(status) if status.success() => Ok(()),
            _ => Err(Error::Sidecar(
                "playwright not found; install with: npx playwright install".to_string(),
            )),
        }
    }

    async fn execute(&self, op: SidecarOp<'_>) -> Result<serde_json::Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let line = serde_json::to_string(&SidecarCommand { id, op })?;
        trace!("sidecar command: {}", line);
        {
            let mut stdin = self.stdin.lock().await;
            stdin
                .write_all(line.as_bytes())
                .await
                .map_err(|e| Error::Sidecar(format!("write failed: {}", e)))?;
            stdin
                .write_all(b"\n")
                .await
                .map_err(|e| Error::Sidecar(format!("write failed: {}", e)))?;
            stdin
                .flush()
                .await
                .map_err(|e| Error::Sidecar(format!("flush failed: {}", e)))?;
        }

        let response = match tokio::time::timeout(COMMAND_TIMEOUT, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(Error::Sidecar("sidecar exited mid-command".to_string())),
            Err(_) => {
                self.pending.lock().remove(&id);
                return Err(Error::Sidecar("sidecar command timed out".to_string()));
            }
        };

        if response.ok {
            Ok(response.value)
        } else {
            Err(Error::Driver(
                response.error.unwrap_or_else(|| "unknown driver error".to_string()),
            ))
        }
    }
}

#[async_trait]
impl BrowserDriver for PlaywrightDriver {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.execute(SidecarOp::Navigate { url }).await.map(|_| ())
    }

    async fn fill(&self, locator: &str, value: &str) -> Result<()> {
        self.execute(SidecarOp::Fill { locator, value }).await.map(|_| ())
    }

    async fn click(&self, locator: &str) -> Result<()> {
        self.execute(SidecarOp::Click { locator }).await.map(|_| ())
    }

    async fn read_text(&self, locator: &str) -> Result<String> {
        let value = self.execute(SidecarOp::ReadText { locator }).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn count(&self, locator: &str) -> Result<usize> {
        let value = self.execute(SidecarOp::Count { locator }).await?;
        Ok(value.as_u64().unwrap_or(0) as usize)
    }

    async fn watch_dom(&self, selector: &str) -> Result<()> {
        self.execute(SidecarOp::WatchDom { selector }).await.map(|_| ())
    }

    async fn read_storage_item(&self, key: &str) -> Result<Option<String>> {
        let value = self.execute(SidecarOp::ReadStorage { key }).await?;
        Ok(value.as_str().map(String::from))
    }

    async fn read_cookie(&self, name: &str) -> Result<Option<String>> {
        let value = self.execute(SidecarOp::ReadCookie { name }).await?;
        Ok(value.as_str().map(String::from))
    }

    async fn current_url(&self) -> Result<String> {
        let value = self.execute(SidecarOp::CurrentUrl).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn capture_screenshot(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let path = path.to_string_lossy();
        self.execute(SidecarOp::Screenshot { path: &path }).await.map(|_| ())
    }

    async fn close(&self) -> Result<()> {
        let mut guard = self.child.lock().await;
        let Some(mut child) = guard.take() else {
            return Ok(());
        };

        // Polite close first; the sidecar shuts the browser down and
        // exits on its own.
        let _ = self.execute(SidecarOp::Close).await;
        match tokio::time::timeout(Duration::from_secs(5), child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                warn!("sidecar did not exit, killing");
                let _ = child.start_kill();
            }
        }
        Ok(())
    }
}

/// Demultiplex the sidecar's stdout: events to the bus, responses to
/// their waiting callers.
async fn read_sidecar(
    stdout: tokio::process::ChildStdout,
    bus: EventBus,
    pending: PendingMap,
    ready_tx: oneshot::Sender<bool>,
) {
    let mut lines = BufReader::new(stdout).lines();
    let mut ready_tx = Some(ready_tx);

    while let Ok(Some(line)) = lines.next_line().await {
        let value: serde_json::Value = match serde_json::from_str(&line) {
            Ok(value) => value,
            Err(e) => {
                warn!("unparsable sidecar line ({}): {}", e, line);
                continue;
            }
        };

        if let Some(ready) = value.get("ready").and_then(|v| v.as_bool()) {
            if let Some(tx) = ready_tx.take() {
                let _ = tx.send(ready);
            }
            continue;
        }

        if value.get("event").is_some() {
            if let Some(raw) = raw_event_from(&value) {
                bus.publish(raw);
            } else {
                warn!("sidecar event with unknown shape: {}", line);
            }
            continue;
        }

        match serde_json::from_value::<SidecarResponse>(value) {
            Ok(response) => {
                if let Some(tx) = pending.lock().remove(&response.id) {
                    let _ = tx.send(response);
                }
            }
            Err(e) => warn!("unparsable sidecar response ({}): {}", e, line),
        }
    }

    debug!("sidecar stdout closed");
    bus.close();
}

fn raw_event_from(value: &serde_json::Value) -> Option<RawDriverEvent> {
    let text = |key: &str| value.get(key).and_then(|v| v.as_str()).map(String::from);
    match value.get("event")?.as_str()? {
        "network" => Some(RawDriverEvent::NetworkResponse {
            method: text("method")?,
            url: text("url")?,
            status: value.get("status")?.as_u64()? as u16,
            body: text("body").unwrap_or_default().into_bytes(),
        }),
        "dom" => Some(RawDriverEvent::DomText {
            selector: text("selector")?,
            text: text("text").unwrap_or_default(),
        }),
        "storage" => Some(RawDriverEvent::StorageWrite {
            key: text("key")?,
            value: text("value").unwrap_or_default(),
        }),
        _ => None,
    }
}

/// The sidecar script. One page per session, matching the one-user-at-
/// a-time session model.
const SIDECAR_JS: &str = r#"
const readline = require('readline');
const { chromium, firefox, webkit } = require('playwright');

const config = JSON.parse(process.argv[2] || '{}');
const engines = { chromium, firefox, webkit };

function emit(obj) {
  process.stdout.write(JSON.stringify(obj) + '\n');
}

(async () => {
  const engine = engines[config.browser] || chromium;
  const browser = await engine.launch({ headless: config.headless !== false });
  const context = await browser.newContext({
    viewport: {
      width: config.viewport_width || 1280,
      height: config.viewport_height || 720,
    },
  });
  const page = await context.newPage();

  page.on('response', async (response) => {
    let body = '';
    try {
      body = (await response.text()).slice(0, config.body_limit || 65536);
    } catch (e) {
      // Redirects and aborted requests have no readable body.
    }
    emit({
      event: 'network',
      method: response.request().method(),
      url: response.url(),
      status: response.status(),
      body,
    });
  });

  await context.exposeBinding('__vigilStorage', (_source, key, value) => {
    emit({ event: 'storage', key, value: String(value) });
  });
  await context.exposeBinding('__vigilDom', (_source, selector, text) => {
    emit({ event: 'dom', selector, text });
  });
  await context.addInitScript(() => {
    const original = Storage.prototype.setItem;
    Storage.prototype.setItem = function (key, value) {
      try { window.__vigilStorage(key, String(value)); } catch (e) {}
      return original.call(this, key, value);
    };
  });

  async function watchDom(selector) {
    await page.evaluate((sel) => {
      const report = () => {
        const el = document.querySelector(sel);
        window.__vigilDom(sel, el ? el.textContent || '' : '');
      };
      const observer = new MutationObserver(report);
      observer.observe(document.body, {
        childList: true,
        subtree: true,
        characterData: true,
      });
      report();
    }, selector);
  }

  emit({ ready: true });

  const rl = readline.createInterface({ input: process.stdin });
  for await (const line of rl) {
    let cmd;
    try {
      cmd = JSON.parse(line);
    } catch (e) {
      continue;
    }
    try {
      let value = null;
      switch (cmd.op) {
        case 'init':
          break;
        case 'navigate':
          await page.goto(cmd.url, { waitUntil: 'domcontentloaded' });
          break;
        case 'fill':
          await page.fill(cmd.locator, cmd.value);
          break;
        case 'click':
          await page.click(cmd.locator);
          break;
        case 'read_text':
          value = await page.locator(cmd.locator).first().textContent();
          break;
        case 'count':
          value = await page.locator(cmd.locator).count();
          break;
        case 'watch_dom':
          await watchDom(cmd.selector);
          break;
        case 'read_storage':
          value = await page.evaluate((k) => localStorage.getItem(k), cmd.key);
          break;
        case 'read_cookie': {
          const cookies = await context.cookies();
          const hit = cookies.find((c) => c.name === cmd.name);
          value = hit ? hit.value : null;
          break;
        }
        case 'current_url':
          value = page.url();
          break;
        case 'screenshot':
          await page.screenshot({ path: cmd.path, fullPage: true });
          break;
        case 'close':
          emit({ id: cmd.id, ok: true });
          await browser.close();
          process.exit(0);
        default:
          throw new Error('unknown op: ' + cmd.op);
      }
      emit({ id: cmd.id, ok: true, value });
    } catch (e) {
      emit({ id: cmd.id, ok: false, error: String((e && e.message) || e) });
    }
  }
})().catch((e) => {
  emit({ ready: false, error: String(e) });
  process.exit(1);
});
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_serializes_with_flattened_op() {
        let cmd = SidecarCommand {
            id: 7,
            op: SidecarOp::Click { locator: "article button" },
        };
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains(r#""id":7"#));
        assert!(json.contains(r#""op":"click""#));
        assert!(json.contains(r#""locator":"article button""#));
    }

    #[test]
    fn network_event_line_parses() {
        let line = serde_json::json!({
            "event": "network",
            "method": "POST",
            "url": "/api/posts/1/like",
            "status": 200,
            "body": "{\"success\":true}",
        });
        match raw_event_from(&line) {
            Some(RawDriverEvent::NetworkResponse { method, status, .. }) => {
                assert_eq!(method, "POST");
                assert_eq!(status, 200);
            }
            other => panic!("unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn unknown_event_kind_is_rejected() {
        let line = serde_json::json!({ "event": "websocket", "url": "/ws" });
        assert!(raw_event_from(&line).is_none());
    }

    #[test]
    fn response_with_error_parses() {
        let response: SidecarResponse = serde_json::from_str(
            r#"{"id":3,"ok":false,"error":"selector not found"}"#,
        )
        .unwrap();
        assert!(!response.ok);
        assert_eq!(response.error.as_deref(), Some("selector not found"));
    }
}
