use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Result, WebshotError};

/// Binary names probed in order when no explicit path is configured.
/// Mirrors `webcap.browser.Browser.chrome_paths`.
const CHROME_NAMES: &[&str] = &[
    "chromium",
    "chromium-browser",
    "chrome",
    "chrome-browser",
    "google-chrome",
    "brave-browser",
];

/// A running browser subprocess plus the temp profile directory it owns.
pub struct BrowserProcess {
    child: Child,
    pub port: u16,
    pub user_data_dir: tempfile::TempDir,
}

/// Finds a usable browser binary: an explicitly configured path, or the
/// first name on `CHROME_NAMES` whose `--version` succeeds.
pub async fn resolve_binary(configured: Option<&PathBuf>) -> Result<PathBuf> {
    if let Some(path) = configured {
        return Ok(path.clone());
    }
    for name in CHROME_NAMES {
        let Ok(path) = which::which(name) else {
            continue;
        };
        let output = Command::new(&path).arg("--version").output().await;
        match output {
            Ok(output) if output.status.success() => {
                let version = String::from_utf8_lossy(&output.stdout);
                info!(%name, version = %version.trim(), "found browser binary");
                return Ok(path);
            }
            Ok(output) => {
                warn!(%name, stderr = %String::from_utf8_lossy(&output.stderr), "version probe failed");
            }
            Err(e) => {
                warn!(%name, error = %e, "failed to spawn version probe");
            }
        }
    }
    Err(WebshotError::Startup(
        "no usable browser executable found on PATH".into(),
    ))
}

fn pick_free_port() -> Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// Launches the browser with the flag set `webcap.browser.Browser` uses,
/// and waits for its debugging endpoint to come up.
pub async fn launch(config: &Config, binary: &PathBuf) -> Result<BrowserProcess> {
    let user_data_dir = tempfile::Builder::new()
        .prefix("webshot-")
        .tempdir()
        .map_err(WebshotError::Io)?;
    let port = pick_free_port()?;
    let (width, height) = config.resolution;

    let mut cmd = Command::new(binary);
    cmd.args([
        "--disable-features=MediaRouter",
        "--disable-client-side-phishing-detection",
        "--disable-default-apps",
        "--hide-scrollbars",
        "--mute-audio",
        "--no-default-browser-check",
        "--no-first-run",
        "--deny-permission-prompts",
        "--headless=new",
    ])
    .arg(format!("--remote-debugging-port={port}"))
    .arg(format!("--user-data-dir={}", user_data_dir.path().display()))
    .arg(format!("--window-size={width},{height}"))
    .arg(format!("--user-agent={}", config.user_agent));

    if let Some(proxy) = &config.proxy {
        cmd.arg(format!("--proxy-server={proxy}"));
    }

    #[cfg(unix)]
    if unsafe { libc::geteuid() } == 0 {
        info!("running as root, adding --no-sandbox");
        cmd.arg("--no-sandbox");
    }

    // Place the child in its own process group so `shutdown`'s signal
    // doesn't also land on us, and orphaned grandchildren can be reaped
    // by group id where the OS supports it.
    #[cfg(unix)]
    cmd.process_group(0);

    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    debug!(?cmd, "spawning browser process");
    let child = cmd.spawn().map_err(|e| WebshotError::Startup(e.to_string()))?;

    Ok(BrowserProcess {
        child,
        port,
        user_data_dir,
    })
}

impl BrowserProcess {
    /// Polls `/json/version` until the debugging endpoint answers or the
    /// child exits.
    pub async fn wait_for_endpoint(&mut self, timeout: Duration) -> Result<String> {
        let url = format!("http://127.0.0.1:{}/json/version", self.port);
        let client = reqwest::Client::new();
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if let Some(status) = self.child.try_wait().map_err(WebshotError::Io)? {
                if !status.success() {
                    let stderr = self.read_stderr().await;
                    return Err(WebshotError::Startup(format!(
                        "browser process exited with {status}: {stderr}"
                    )));
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(WebshotError::Startup(
                    "timed out waiting for debugging endpoint".into(),
                ));
            }
            match client.get(&url).send().await {
                Ok(resp) => {
                    if let Ok(body) = resp.json::<serde_json::Value>().await {
                        if let Some(ws_url) =
                            body.get("webSocketDebuggerUrl").and_then(|v| v.as_str())
                        {
                            return Ok(ws_url.to_string());
                        }
                    }
                }
                Err(_) => {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    async fn read_stderr(&mut self) -> String {
        use tokio::io::AsyncReadExt;
        let mut buf = String::new();
        if let Some(stderr) = self.child.stderr.as_mut() {
            let _ = stderr.read_to_string(&mut buf).await;
        }
        buf
    }

    pub async fn protocol_descriptor(&self) -> Result<String> {
        let url = format!("http://127.0.0.1:{}/json/protocol", self.port);
        let body = reqwest::get(&url).await.map_err(WebshotError::from_reqwest)?;
        body.text().await.map_err(WebshotError::from_reqwest)
    }

    /// SIGTERM first, escalating to SIGKILL after `grace` if the child has
    /// not exited.
    pub async fn shutdown(&mut self, grace: Duration) -> Result<()> {
        #[cfg(unix)]
        {
            if let Some(pid) = self.child.id() {
                unsafe {
                    libc::kill(pid as i32, libc::SIGTERM);
                }
            }
        }
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                warn!("browser did not exit after SIGTERM, killing");
                let _ = self.child.start_kill();
                let _ = self.child.wait().await;
            }
        }
        Ok(())
    }
}
