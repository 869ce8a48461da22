use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, WebshotError};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";
pub const DEFAULT_RESOLUTION: (u32, u32) = (1440, 900);
pub const DEFAULT_THREADS: usize = 15;
pub const DEFAULT_DELAY: Duration = Duration::from_millis(3_000);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

fn default_ignore_types() -> HashSet<String> {
    ["image", "media", "font", "stylesheet"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Immutable run configuration, built once and shared (via `Arc`) across
/// every tab and worker.
#[derive(Debug, Clone)]
pub struct Config {
    pub chrome_path: Option<PathBuf>,
    pub user_agent: String,
    pub proxy: Option<String>,
    pub resolution: (u32, u32),
    pub full_page: bool,
    pub threads: usize,
    pub delay: Duration,
    pub timeout: Duration,
    pub capture_dom: bool,
    pub capture_javascript: bool,
    pub capture_requests: bool,
    pub capture_responses: bool,
    pub capture_base64: bool,
    pub capture_ocr: bool,
    pub ignore_types: HashSet<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            chrome_path: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            proxy: None,
            resolution: DEFAULT_RESOLUTION,
            full_page: false,
            threads: DEFAULT_THREADS,
            delay: DEFAULT_DELAY,
            timeout: DEFAULT_TIMEOUT,
            capture_dom: false,
            capture_javascript: false,
            capture_requests: false,
            capture_responses: false,
            capture_base64: false,
            capture_ocr: false,
            ignore_types: default_ignore_types(),
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder {
            inner: Config::default(),
        }
    }

    /// The budget a settle wait may use without outliving the per-URL
    /// timeout.
    pub fn effective_delay(&self, elapsed: Duration) -> Duration {
        let remaining = self.timeout.saturating_sub(elapsed);
        self.delay.min(remaining)
    }
}

/// Builder mirroring the way chromiumoxide's `BrowserConfig` is assembled,
/// adapted to webcap's option surface.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    inner: Config,
}

impl ConfigBuilder {
    pub fn chrome_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.inner.chrome_path = Some(path.into());
        self
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.inner.user_agent = ua.into();
        self
    }

    pub fn proxy(mut self, proxy: impl Into<String>) -> Self {
        self.inner.proxy = Some(proxy.into());
        self
    }

    pub fn resolution(mut self, resolution: &str) -> Result<Self> {
        self.inner.resolution = parse_resolution(resolution)?;
        Ok(self)
    }

    pub fn resolution_tuple(mut self, resolution: (u32, u32)) -> Self {
        self.inner.resolution = resolution;
        self
    }

    pub fn full_page(mut self, full_page: bool) -> Self {
        self.inner.full_page = full_page;
        self
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.inner.threads = threads.max(1);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.inner.delay = delay;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.inner.timeout = timeout;
        self
    }

    pub fn capture_dom(mut self, v: bool) -> Self {
        self.inner.capture_dom = v;
        self
    }

    pub fn capture_javascript(mut self, v: bool) -> Self {
        self.inner.capture_javascript = v;
        self
    }

    pub fn capture_requests(mut self, v: bool) -> Self {
        self.inner.capture_requests = v;
        self
    }

    pub fn capture_responses(mut self, v: bool) -> Self {
        self.inner.capture_responses = v;
        self
    }

    pub fn capture_base64(mut self, v: bool) -> Self {
        self.inner.capture_base64 = v;
        self
    }

    pub fn capture_ocr(mut self, v: bool) -> Self {
        self.inner.capture_ocr = v;
        self
    }

    pub fn ignore_types(mut self, types: impl IntoIterator<Item = String>) -> Self {
        self.inner.ignore_types = types.into_iter().map(|s| s.to_lowercase()).collect();
        self
    }

    pub fn build(self) -> Config {
        self.inner
    }
}

/// Parses a `WxH` string as used by the `--resolution` flag.
pub fn parse_resolution(s: &str) -> Result<(u32, u32)> {
    let (w, h) = s
        .split_once('x')
        .ok_or_else(|| WebshotError::protocol(format!("invalid resolution: {s}")))?;
    let w: u32 = w
        .parse()
        .map_err(|_| WebshotError::protocol(format!("invalid resolution width: {w}")))?;
    let h: u32 = h
        .parse()
        .map_err(|_| WebshotError::protocol(format!("invalid resolution height: {h}")))?;
    Ok((w, h))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_tool() {
        let cfg = Config::default();
        assert_eq!(cfg.resolution, (1440, 900));
        assert_eq!(cfg.threads, 15);
        assert_eq!(cfg.delay, Duration::from_millis(3_000));
        assert_eq!(cfg.timeout, Duration::from_secs(10));
        assert!(cfg.ignore_types.contains("image"));
        assert!(cfg.ignore_types.contains("stylesheet"));
    }

    #[test]
    fn parses_resolution() {
        assert_eq!(parse_resolution("1024x768").unwrap(), (1024, 768));
        assert!(parse_resolution("bogus").is_err());
    }

    #[test]
    fn effective_delay_never_outlives_timeout() {
        let cfg = Config::builder()
            .delay(Duration::from_secs(5))
            .timeout(Duration::from_secs(3))
            .build();
        assert_eq!(cfg.effective_delay(Duration::ZERO), Duration::from_secs(3));
    }

    #[test]
    fn builder_lowercases_ignore_types() {
        let cfg = Config::builder()
            .ignore_types(["Image".to_string(), "Script".to_string()])
            .build();
        assert!(cfg.ignore_types.contains("image"));
        assert!(cfg.ignore_types.contains("script"));
    }
}
