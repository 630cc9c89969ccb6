//! Browser session lifecycle.
//!
//! One Chrome process and one CDP page connection per task, acquired at task
//! start and released exactly once when the task ends, on every exit path.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use demopilot_actions::{PageHandle, SessionControl};
use demopilot_core::{BrowserSettings, Error, Result};
use serde_json::{json, Value};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cdp::CdpClient;

const LOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// A single browser session: the Chrome child process and the CDP client
/// attached to its page target.
pub struct BrowserSession {
    cdp: CdpClient,
    child: Mutex<Option<Child>>,
    closed: AtomicBool,
    /// Receiver armed by `goto`, consumed by `wait_until_loaded`. Armed
    /// before navigation starts so a fast load cannot slip past the wait.
    load_events: tokio::sync::Mutex<Option<mpsc::Receiver<Value>>>,
    pub debug_port: u16,
    pub user_data_dir: PathBuf,
}

impl BrowserSession {
    /// Launch a browser instance and connect via CDP.
    pub async fn launch(settings: &BrowserSettings) -> Result<Self> {
        let browser_path = find_browser_binary(settings.chrome_path.as_deref())
            .ok_or_else(|| {
                Error::Browser(
                    "Chrome not found. Install it or set CHROME_INSTANCE_PATH.".to_string(),
                )
            })?;

        let user_data_dir = std::env::temp_dir()
            .join("demopilot")
            .join(format!("session-{}", std::process::id()));
        std::fs::create_dir_all(&user_data_dir)
            .map_err(|e| Error::Browser(format!("Failed to create user data dir: {}", e)))?;

        let debug_port = find_free_port().await.map_err(Error::Browser)?;
        let args = build_browser_args(debug_port, &user_data_dir, settings.headless);

        info!(
            port = debug_port,
            headless = settings.headless,
            path = %browser_path,
            "Launching browser"
        );

        let child = Command::new(&browser_path)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Browser(format!("Failed to launch {}: {}", browser_path, e)))?;

        // Wait for the browser-level CDP endpoint, then attach to the page
        // target so Page.* commands work.
        wait_for_cdp_ready(debug_port, 15).await.map_err(Error::Browser)?;
        let page_ws_url = get_page_ws_url(debug_port).await.map_err(Error::Browser)?;

        let cdp = CdpClient::connect(&page_ws_url).await.map_err(Error::Browser)?;
        cdp.enable_domain("Page").await.map_err(Error::Browser)?;
        cdp.enable_domain("Runtime").await.map_err(Error::Browser)?;

        info!(ws_url = %page_ws_url, "CDP connection established (page target)");

        Ok(Self {
            cdp,
            child: Mutex::new(Some(child)),
            closed: AtomicBool::new(false),
            load_events: tokio::sync::Mutex::new(None),
            debug_port,
            user_data_dir,
        })
    }

    /// Close the session: graceful CDP shutdown, then kill the process.
    /// Guarded so the underlying handle is released exactly once; teardown
    /// failures are logged, never escalated.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.cdp.send_command("Browser.close", json!({})).await {
            debug!("CDP Browser.close failed (may already be closed): {}", e);
        }
        let child = self.child.lock().unwrap().take();
        if let Some(mut child) = child {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "Failed to kill browser process");
            }
        }
    }

    async fn poll_ready_state(&self) -> Result<()> {
        let deadline = tokio::time::Instant::now() + LOAD_TIMEOUT;
        loop {
            let result = self
                .cdp
                .evaluate_js("document.readyState")
                .await
                .map_err(Error::Browser)?;
            let state = result
                .get("result")
                .and_then(|r| r.get("value"))
                .and_then(|v| v.as_str());
            if state == Some("complete") {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::Navigation(format!(
                    "page did not reach load state within {}s",
                    LOAD_TIMEOUT.as_secs()
                )));
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        // Best-effort kill on drop; the normal path closes explicitly.
        if let Ok(mut guard) = self.child.lock() {
            if let Some(child) = guard.as_mut() {
                let _ = child.start_kill();
            }
        }
    }
}

#[async_trait]
impl PageHandle for BrowserSession {
    async fn current_url(&self) -> Result<String> {
        let result = self
            .cdp
            .evaluate_js("window.location.href")
            .await
            .map_err(Error::Browser)?;
        Ok(result
            .get("result")
            .and_then(|r| r.get("value"))
            .and_then(|v| v.as_str())
            .unwrap_or("about:blank")
            .to_string())
    }

    async fn goto(&self, url: &str) -> Result<()> {
        // Arm the load-event subscription before navigating.
        let rx = self.cdp.subscribe_event("Page.loadEventFired").await;
        *self.load_events.lock().await = Some(rx);

        let result = self.cdp.navigate(url).await.map_err(Error::Browser)?;
        if let Some(error_text) = result.get("errorText").and_then(|v| v.as_str()) {
            return Err(Error::Navigation(format!(
                "navigation to {} failed: {}",
                url, error_text
            )));
        }
        Ok(())
    }

    async fn wait_until_loaded(&self) -> Result<()> {
        let rx = self.load_events.lock().await.take();
        match rx {
            Some(mut rx) => match tokio::time::timeout(LOAD_TIMEOUT, rx.recv()).await {
                Ok(Some(_)) => Ok(()),
                Ok(None) => Err(Error::Browser(
                    "CDP event channel closed while waiting for page load".to_string(),
                )),
                Err(_) => Err(Error::Navigation(format!(
                    "page did not fire load event within {}s",
                    LOAD_TIMEOUT.as_secs()
                ))),
            },
            // No navigation in flight: settle on document.readyState.
            None => self.poll_ready_state().await,
        }
    }
}

#[async_trait]
impl SessionControl for BrowserSession {
    async fn close(&self) {
        BrowserSession::close(self).await;
    }
}

/// Find a Chrome binary: explicit override first, then platform-default
/// install locations, then a PATH lookup.
pub fn find_browser_binary(explicit: Option<&str>) -> Option<String> {
    if let Some(path) = explicit {
        return Some(path.to_string());
    }

    let candidates: Vec<&str> = if cfg!(target_os = "macos") {
        vec![
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
        ]
    } else if cfg!(target_os = "linux") {
        vec![
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
        ]
    } else {
        vec![
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ]
    };

    for candidate in candidates {
        if Path::new(candidate).exists() {
            return Some(candidate.to_string());
        }
        if !candidate.contains('/') && !candidate.contains('\\') && which::which(candidate).is_ok()
        {
            return Some(candidate.to_string());
        }
    }
    None
}

fn build_browser_args(debug_port: u16, user_data_dir: &Path, headless: bool) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={}", debug_port),
        format!("--user-data-dir={}", user_data_dir.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-background-networking".to_string(),
        "--disable-extensions".to_string(),
        "--disable-sync".to_string(),
    ];
    if headless {
        args.push("--headless=new".to_string());
    }
    args.push("--window-size=1280,720".to_string());
    args.push("about:blank".to_string());
    args
}

/// Find a free TCP port.
async fn find_free_port() -> std::result::Result<u16, String> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|e| format!("Failed to bind to find free port: {}", e))?;
    let port = listener
        .local_addr()
        .map_err(|e| format!("Failed to get local addr: {}", e))?
        .port();
    drop(listener);
    Ok(port)
}

/// Poll Chrome's /json/version endpoint until the CDP server responds.
async fn wait_for_cdp_ready(port: u16, timeout_secs: u64) -> std::result::Result<(), String> {
    let start = std::time::Instant::now();
    let timeout = Duration::from_secs(timeout_secs);
    let url = format!("http://127.0.0.1:{}/json/version", port);

    loop {
        if start.elapsed() > timeout {
            return Err(format!(
                "Chrome CDP not ready after {}s on port {}",
                timeout_secs, port
            ));
        }

        if let Ok(resp) = reqwest::get(&url).await {
            if let Ok(body) = resp.json::<Value>().await {
                if body.get("webSocketDebuggerUrl").is_some() {
                    return Ok(());
                }
            }
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

/// Resolve the WebSocket URL of the first page target. Retries because the
/// page target may not appear immediately after launch.
async fn get_page_ws_url(port: u16) -> std::result::Result<String, String> {
    let url = format!("http://127.0.0.1:{}/json/list", port);

    for attempt in 0..10 {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }

        let resp = match reqwest::get(&url).await {
            Ok(r) => r,
            Err(_) => continue,
        };
        let targets: Vec<Value> = match resp.json().await {
            Ok(t) => t,
            Err(_) => continue,
        };

        for target in &targets {
            if target.get("type").and_then(|v| v.as_str()) == Some("page") {
                if let Some(ws_url) = target.get("webSocketDebuggerUrl").and_then(|v| v.as_str()) {
                    return Ok(ws_url.to_string());
                }
            }
        }
    }

    Err("No page target found after retries".to_string())
}
