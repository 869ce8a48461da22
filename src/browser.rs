use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::capability::CapabilityTable;
use crate::conn::Connection;
use crate::config::Config;
use crate::error::{Result, WebshotError};
use crate::process::{self, BrowserProcess};
use crate::tab::Tab;

const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);
/// 6 retries after the initial attempt (7 total), cumulative sleep
/// `100+200+400+800+1600+3200 = 6300ms` (~6.4s per SPEC_FULL.md §4.1).
const RETRY_MAX_ATTEMPTS: u32 = 6;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Owns the browser subprocess and its single duplex channel. Equivalent
/// to `webcap.browser.Browser`.
pub struct Browser {
    config: Arc<Config>,
    process: Mutex<Option<BrowserProcess>>,
    conn: RwLock<Option<Arc<Connection>>>,
    pump_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
    capability: RwLock<Option<CapabilityTable>>,
    /// Serializes `Target.createTarget`/`attachToTarget` and
    /// `Target.activateTarget`/`Page.captureScreenshot`, matching
    /// `webcap.browser.Browser._tab_lock`.
    pub(crate) tab_lock: Mutex<()>,
    /// Every live tab's target id -> session id, so `stop()` can close
    /// them all rather than relying on callers to close their own tabs.
    /// Corresponds to the `BrowserSession` target-id -> Tab map (§3).
    tabs: Mutex<HashMap<String, String>>,
    started: AtomicBool,
}

impl Browser {
    pub fn new(config: Config) -> Arc<Self> {
        Arc::new(Browser {
            config: Arc::new(config),
            process: Mutex::new(None),
            conn: RwLock::new(None),
            pump_handle: Mutex::new(None),
            capability: RwLock::new(None),
            tab_lock: Mutex::new(()),
            tabs: Mutex::new(HashMap::new()),
            started: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Resolves the binary, launches the process, connects the duplex
    /// channel, and builds the capability table. Mirrors
    /// `webcap.browser.Browser.start`.
    pub async fn start(&self) -> Result<()> {
        let binary = process::resolve_binary(self.config.chrome_path.as_ref()).await?;
        let mut proc = process::launch(&self.config, &binary).await?;
        let ws_url = proc.wait_for_endpoint(self.config.timeout).await?;
        let protocol_json = proc.protocol_descriptor().await?;
        let capability = CapabilityTable::from_protocol_json(&protocol_json)?;

        let (conn, handle) = Connection::connect(&ws_url).await?;

        *self.process.lock().await = Some(proc);
        *self.conn.write().await = Some(conn);
        *self.pump_handle.lock().await = Some(handle);
        *self.capability.write().await = Some(capability);
        self.started.store(true, Ordering::SeqCst);
        info!("browser started");
        Ok(())
    }

    fn conn_sync(&self) -> Result<()> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(WebshotError::NotStarted);
        }
        Ok(())
    }

    /// Validates, sends, and (for retryable protocol errors) retries a
    /// single command. This is the request multiplexer described in the
    /// component design.
    pub async fn request(
        &self,
        method: &str,
        params: Value,
        session_id: Option<String>,
    ) -> Result<Value> {
        self.conn_sync()?;
        {
            let capability = self.capability.read().await;
            let capability = capability.as_ref().ok_or(WebshotError::NotStarted)?;
            capability.check(method)?;
        }
        let conn = {
            let guard = self.conn.read().await;
            guard.as_ref().ok_or(WebshotError::NotStarted)?.clone()
        };

        let mut delay = RETRY_BASE_DELAY;
        let mut attempt = 0;
        loop {
            let result = conn
                .call(method, params.clone(), session_id.clone(), self.config.timeout)
                .await;
            match result {
                Err(e) if e.is_retryable() && attempt < RETRY_MAX_ATTEMPTS => {
                    attempt += 1;
                    warn!(method, attempt, "retrying after protocol error: {e}");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    continue;
                }
                other => return other,
            }
        }
    }

    pub async fn new_tab(self: &Arc<Self>) -> Result<Arc<Tab>> {
        let tab = Tab::create(self.clone()).await?;
        Ok(tab)
    }

    /// Connects directly to an already-running debugger endpoint, skipping
    /// binary resolution and process launch. Exists so integration tests
    /// can drive the multiplexer/tab/settle logic against an in-process
    /// fake CDP server instead of a real browser.
    #[doc(hidden)]
    pub async fn connect_for_tests(
        ws_url: &str,
        protocol_json: &str,
        config: Config,
    ) -> Result<Arc<Self>> {
        let capability = CapabilityTable::from_protocol_json(protocol_json)?;
        let (conn, handle) = Connection::connect(ws_url).await?;
        let browser = Arc::new(Browser {
            config: Arc::new(config),
            process: Mutex::new(None),
            conn: RwLock::new(Some(conn)),
            pump_handle: Mutex::new(Some(handle)),
            capability: RwLock::new(Some(capability)),
            tab_lock: Mutex::new(()),
            tabs: Mutex::new(HashMap::new()),
            started: AtomicBool::new(true),
        });
        Ok(browser)
    }

    pub(crate) async fn connection(&self) -> Result<Arc<Connection>> {
        self.conn_sync()?;
        let guard = self.conn.read().await;
        guard.as_ref().cloned().ok_or(WebshotError::NotStarted)
    }

    /// Records a tab as live. Called by `Tab::create`.
    pub(crate) async fn register_tab(&self, target_id: String, session_id: String) {
        self.tabs.lock().await.insert(target_id, session_id);
    }

    /// Forgets a tab. Called by `Tab::close`, so a tab closed by its
    /// owner isn't closed again by `stop()`.
    pub(crate) async fn unregister_tab(&self, target_id: &str) {
        self.tabs.lock().await.remove(target_id);
    }

    /// Closes every live tab, tears down the channel and process, and
    /// removes the per-instance temp directory.
    pub async fn stop(&self) -> Result<()> {
        let live_tabs: Vec<(String, String)> = self.tabs.lock().await.drain().collect();
        if let Some(conn) = self.conn.read().await.as_ref() {
            for (target_id, session_id) in &live_tabs {
                conn.unregister_session(session_id).await;
                let _ = conn
                    .call(
                        "Target.closeTarget",
                        json!({"targetId": target_id}),
                        None,
                        Duration::from_secs(2),
                    )
                    .await;
            }
        }

        if let Some(conn) = self.conn.write().await.take() {
            conn.close().await;
        }
        if let Some(handle) = self.pump_handle.lock().await.take() {
            handle.abort();
        }
        if let Some(mut proc) = self.process.lock().await.take() {
            proc.shutdown(SHUTDOWN_GRACE).await?;
        }
        self.started.store(false, Ordering::SeqCst);
        info!("browser stopped");
        Ok(())
    }
}

impl Drop for Browser {
    fn drop(&mut self) {
        // Backstop only: `stop()` is the primary, awaited teardown path.
        if self.started.load(Ordering::SeqCst) {
            warn!("Browser dropped without stop() having been called");
        }
    }
}

