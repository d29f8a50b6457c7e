//! App-under-test management: spawning and health checking
//!
//! Scenarios may attach to an already-running app (base_url only) or
//! spawn one themselves; either way the session does not start until
//! the app answers HTTP.

use std::process::{Child, Command, Stdio};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use vigil_common::{Error, Result};

use crate::scenario::AppSpec;

/// Handle to a running app-under-test process
pub struct AppHandle {
    child: Child,
    pub base_url: String,
    pub port: u16,
}

impl AppHandle {
    /// Spawn the app and wait for it to become healthy.
    pub async fn spawn(config: AppConfig) -> Result<Self> {
        let port = config.port.unwrap_or_else(find_free_port);
        let base_url = format!("http://127.0.0.1:{}", port);

        info!("spawning app under test on port {}", port);

        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args);
        for (key, value) in &config.env {
            cmd.env(key, value);
        }
        if let Some(port_env) = &config.port_env {
            cmd.env(port_env, port.to_string());
        }
        cmd.stdout(Stdio::null()).stderr(Stdio::null());

        let child = cmd.spawn().map_err(|e| {
            Error::AppStartup(format!("failed to spawn {}: {}", config.command, e))
        })?;

        let handle = AppHandle {
            child,
            base_url: base_url.clone(),
            port,
        };

        handle
            .wait_for_healthy(&config.health_path, config.startup_timeout)
            .await?;

        info!("app is healthy at {}", base_url);
        Ok(handle)
    }

    /// Poll the health URL until the app responds.
    async fn wait_for_healthy(&self, health_path: &str, timeout: Duration) -> Result<()> {
        let health_url = format!("{}{}", self.base_url, health_path);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .map_err(|e| Error::AppStartup(e.to_string()))?;

        let start = std::time::Instant::now();
        let mut attempts = 0;

        while start.elapsed() < timeout {
            attempts += 1;

            match client.get(&health_url).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => {
                    warn!("health check returned {}", resp.status());
                }
                Err(e) => {
                    if attempts == 1 {
                        info!("waiting for app to start...");
                    }
                    // Connection refused is expected while starting up.
                    if !e.is_connect() {
                        warn!("health check error: {}", e);
                    }
                }
            }

            sleep(Duration::from_millis(100)).await;
        }

        Err(Error::AppHealthCheck { attempts })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Stop the app.
    pub fn stop(&mut self) -> Result<()> {
        info!("stopping app (pid: {})", self.child.id());

        // Graceful shutdown first
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            let pid = Pid::from_raw(self.child.id() as i32);
            if kill(pid, Signal::SIGTERM).is_ok() {
                std::thread::sleep(Duration::from_millis(500));
            }
        }

        let _ = self.child.kill();
        let _ = self.child.wait();

        Ok(())
    }
}

impl Drop for AppHandle {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Configuration for spawning an app-under-test
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    /// Port to pass to the app (None = find a free one)
    pub port: Option<u16>,
    /// Environment variable that receives the port
    pub port_env: Option<String>,
    pub health_path: String,
    pub startup_timeout: Duration,
}

impl AppConfig {
    pub fn from_spec(spec: &AppSpec) -> Self {
        Self {
            command: spec.command.clone(),
            args: spec.args.clone(),
            env: Vec::new(),
            port: None,
            port_env: spec.port_env.clone(),
            health_path: spec.health_path.clone(),
            startup_timeout: Duration::from_millis(spec.startup_timeout_ms),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            command: "npm".to_string(),
            args: vec!["run".to_string(), "dev".to_string()],
            env: Vec::new(),
            port: None,
            port_env: Some("PORT".to_string()),
            health_path: "/".to_string(),
            startup_timeout: Duration::from_secs(30),
        }
    }
}

/// Find a free port to use
fn find_free_port() -> u16 {
    use std::net::TcpListener;

    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to find free port")
        .local_addr()
        .expect("Failed to get local addr")
        .port()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_free_port() {
        let port1 = find_free_port();
        let port2 = find_free_port();

        assert!(port1 > 1024);
        assert!(port2 > 1024);
    }

    #[test]
    fn app_config_from_spec_carries_timeouts() {
        let spec = AppSpec {
            command: "node".to_string(),
            args: vec!["server.js".to_string()],
            port_env: Some("PORT".to_string()),
            health_path: "/health".to_string(),
            startup_timeout_ms: 5_000,
        };
        let config = AppConfig::from_spec(&spec);
        assert_eq!(config.startup_timeout, Duration::from_secs(5));
        assert_eq!(config.health_path, "/health");
    }
}
