//! Vigil Driver Boundary
//!
//! The harness treats browser automation as an external collaborator:
//! a handful of page operations plus a stream of observed facts
//! (network responses, DOM text changes, storage writes) that the
//! driver pushes into the engine's event bus. Everything behind this
//! trait is a thin I/O wrapper; the correlation engine never knows
//! which implementation is driving.

use std::path::Path;

use async_trait::async_trait;

use vigil_common::Result;

pub mod playwright;
pub mod scripted;

pub use playwright::{Browser, PlaywrightConfig, PlaywrightDriver};
pub use scripted::{ScriptedDriver, ScriptedEffect};

/// Page operations the flow driver is allowed to perform.
///
/// Implementations publish every observed network response, DOM text
/// change on watched selectors, and storage write into the session's
/// event bus as they happen, independent of these calls.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<()>;

    async fn fill(&self, locator: &str, value: &str) -> Result<()>;

    async fn click(&self, locator: &str) -> Result<()>;

    async fn read_text(&self, locator: &str) -> Result<String>;

    async fn count(&self, locator: &str) -> Result<usize>;

    /// Register a selector whose text content should be observed as DOM
    /// events from now on.
    async fn watch_dom(&self, selector: &str) -> Result<()>;

    /// Client-stored identity channel (localStorage).
    async fn read_storage_item(&self, key: &str) -> Result<Option<String>>;

    /// Server-issued session channel (cookie jar).
    async fn read_cookie(&self, name: &str) -> Result<Option<String>>;

    async fn current_url(&self) -> Result<String>;

    async fn capture_screenshot(&self, path: &Path) -> Result<()>;

    /// Release the underlying browser. Idempotent.
    async fn close(&self) -> Result<()>;
}
