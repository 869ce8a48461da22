use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{debug, error, warn};

use crate::browser::Browser;
use crate::capture::{CaptureRecord, NavigationEntry, NetworkEntry, ResponseRecord, ScriptRecord};
use crate::error::{Result, WebshotError};
use crate::protocol::Event;

/// Settle-loop tick. Matches `webcap.tab.Tab.wait_for_page_load`'s
/// `0.1` second increments.
const SETTLE_TICK: Duration = Duration::from_millis(100);
/// Required idle window after `Page.loadEventFired` before a page is
/// considered settled.
const SETTLE_IDLE: Duration = Duration::from_secs(1);

/// One virtual page, attached to the shared browser connection via a
/// session id. Equivalent to `webcap.tab.Tab`.
pub struct Tab {
    browser: Arc<Browser>,
    target_id: String,
    session_id: String,
    record: Mutex<CaptureRecord>,
    page_loaded: AtomicBool,
    last_active_millis: AtomicU64,
    start: Instant,
    closed: AtomicBool,
    /// Signaled whenever the event worker finishes processing a frame, so
    /// `capture`/`to_json` can wait for in-flight response-body fetches.
    idle: Arc<Notify>,
    in_flight: Arc<AtomicU64>,
}

impl Tab {
    /// Creates a target, attaches a session, registers it for event
    /// fan-out, and enables the domains this run's configuration needs.
    /// Mirrors `webcap.tab.Tab.create`.
    pub async fn create(browser: Arc<Browser>) -> Result<Arc<Tab>> {
        let (target_id, session_id) = {
            let _guard = browser.tab_lock.lock().await;
            let created = browser
                .request("Target.createTarget", json!({"url": "about:blank"}), None)
                .await?;
            let target_id = created["targetId"]
                .as_str()
                .ok_or_else(|| WebshotError::protocol("createTarget: missing targetId"))?
                .to_string();

            let attached = browser
                .request(
                    "Target.attachToTarget",
                    json!({"targetId": target_id, "flatten": true}),
                    None,
                )
                .await?;
            let session_id = attached["sessionId"]
                .as_str()
                .ok_or_else(|| WebshotError::protocol("attachToTarget: missing sessionId"))?
                .to_string();
            (target_id, session_id)
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let conn = browser.connection().await?;
        conn.register_session(session_id.clone(), tx).await;
        browser.register_tab(target_id.clone(), session_id.clone()).await;

        let tab = Arc::new(Tab {
            browser: browser.clone(),
            target_id,
            session_id: session_id.clone(),
            record: Mutex::new(CaptureRecord::default()),
            page_loaded: AtomicBool::new(false),
            last_active_millis: AtomicU64::new(0),
            start: Instant::now(),
            closed: AtomicBool::new(false),
            idle: Arc::new(Notify::new()),
            in_flight: Arc::new(AtomicU64::new(0)),
        });

        tab.request("Page.enable", json!({})).await?;
        tab.request("Network.enable", json!({})).await?;
        if browser.config().capture_javascript {
            tab.request("Debugger.enable", json!({})).await?;
        }

        let worker_tab = tab.clone();
        tokio::spawn(async move {
            worker_tab.run_event_worker(rx).await;
        });

        Ok(tab)
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// All per-tab commands share the browser's multiplexer with this
    /// tab's session id attached.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        self.browser
            .request(method, params, Some(self.session_id.clone()))
            .await
    }

    fn mark_active(&self) {
        let millis = self.start.elapsed().as_millis() as u64;
        self.last_active_millis.store(millis, Ordering::SeqCst);
    }

    async fn run_event_worker(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<Event>) {
        while let Some(event) = rx.recv().await {
            if let Err(e) = self.handle_event(event).await {
                error!(error = %e, "error handling event");
            }
            self.idle.notify_waiters();
        }
    }

    async fn handle_event(&self, event: Event) -> Result<()> {
        self.mark_active();
        match event.method.as_str() {
            "Page.loadEventFired" => {
                self.page_loaded.store(true, Ordering::SeqCst);
            }
            "Network.requestWillBeSent" => {
                self.add_request(event.params).await?;
            }
            "Network.responseReceived" => {
                self.add_response(event.params, None, None).await?;
            }
            "Debugger.scriptParsed" if self.browser.config().capture_javascript => {
                self.add_javascript(event.params).await?;
            }
            _ => {}
        }
        Ok(())
    }

    async fn add_request(&self, mut params: Value) -> Result<()> {
        let request_type = params
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or("Unknown")
            .to_lowercase();
        if self.browser.config().ignore_types.contains(&request_type) {
            return Ok(());
        }
        let request_id = params
            .get("requestId")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let redirect_response = params
            .as_object_mut()
            .and_then(|obj| obj.remove("redirectResponse"));

        {
            let mut record = self.record.lock().await;
            let entry = record
                .network_history
                .entry(request_id.clone())
                .or_insert_with(|| NetworkEntry {
                    kind: request_type.clone(),
                    ..Default::default()
                });
            if self.browser.config().capture_requests {
                if let Some(request) = params.get("request").cloned() {
                    entry.requests.push(request);
                }
            }
        }

        if let Some(redirect) = redirect_response {
            if !redirect.is_null() {
                self.add_response(redirect, Some(request_id), Some(request_type))
                    .await?;
            }
        }
        Ok(())
    }

    async fn add_response(
        &self,
        response: Value,
        request_id: Option<String>,
        response_type: Option<String>,
    ) -> Result<()> {
        let request_id = match request_id {
            Some(id) => id,
            None => response
                .get("requestId")
                .and_then(|v| v.as_str())
                .ok_or_else(|| WebshotError::protocol("response missing requestId"))?
                .to_string(),
        };
        let response_type = match response_type {
            Some(t) => t,
            None => response
                .get("type")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_lowercase(),
        };
        if self.browser.config().ignore_types.contains(&response_type) {
            return Ok(());
        }

        let body = response.get("response").cloned().unwrap_or(response);
        let url = body.get("url").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        let status = body.get("status").and_then(|v| v.as_u64()).unwrap_or(0) as u16;
        let mime_type = body
            .get("mimeType")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let headers: std::collections::HashMap<String, String> = body
            .get("headers")
            .and_then(|v| v.as_object())
            .map(|obj| {
                obj.iter()
                    .map(|(k, v)| (k.to_lowercase(), v.as_str().unwrap_or_default().to_string()))
                    .collect()
            })
            .unwrap_or_default();
        let location = if (300..400).contains(&status) {
            headers.get("location").cloned()
        } else {
            None
        };

        let nav_entry = NavigationEntry {
            url: url.clone(),
            status,
            mime_type: mime_type.clone(),
            location,
        };

        let response_body = if self.browser.config().capture_responses {
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            let result = self
                .request(
                    "Network.getResponseBody",
                    json!({"requestId": request_id}),
                )
                .await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            match result {
                Ok(value) => value.get("body").and_then(|v| v.as_str()).map(|s| s.to_string()),
                Err(e) => {
                    warn!(error = %e, request_id, "failed to get response body");
                    None
                }
            }
        } else {
            None
        };

        let mut record = self.record.lock().await;
        let entry = record
            .network_history
            .entry(request_id.clone())
            .or_insert_with(NetworkEntry::default);
        entry.kind = response_type.clone();
        if self.browser.config().capture_responses {
            entry.responses.push(ResponseRecord {
                url,
                status,
                status_text: body
                    .get("statusText")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                headers,
                mime_type,
                charset: body
                    .get("charset")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                protocol: body
                    .get("protocol")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                remote_ip_address: body
                    .get("remoteIPAddress")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                remote_port: body.get("remotePort").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
                response_body,
            });
        }
        if response_type == "document" {
            record.navigation_history.push(nav_entry);
        }
        Ok(())
    }

    async fn add_javascript(&self, params: Value) -> Result<()> {
        let script_id = params.get("scriptId").and_then(|v| v.as_str());
        let Some(script_id) = script_id else {
            return Ok(());
        };
        let response = self
            .request("Debugger.getScriptSource", json!({"scriptId": script_id}))
            .await?;
        let Some(source) = response.get("scriptSource").and_then(|v| v.as_str()) else {
            return Ok(());
        };
        if source.is_empty() {
            return Ok(());
        }
        let mut record = self.record.lock().await;
        record.scripts.push(ScriptRecord {
            source: source.to_string(),
            url: params.get("url").and_then(|v| v.as_str()).map(|s| s.to_string()),
        });
        Ok(())
    }

    /// Navigates and waits for the page to settle, per
    /// `effective_delay = min(delay, timeout - elapsed)`.
    pub async fn navigate(&self, url: &str) -> Result<()> {
        {
            let mut record = self.record.lock().await;
            record.url = url.to_string();
        }
        let (width, height) = self.browser.config().resolution;
        self.request(
            "Emulation.setDeviceMetricsOverride",
            json!({
                "width": width,
                "height": height,
                "deviceScaleFactor": 1,
                "mobile": false,
            }),
        )
        .await?;
        self.request("Page.navigate", json!({"url": url})).await?;
        self.wait_for_settle().await;
        if self.browser.config().capture_dom {
            let dom = self.get_dom().await;
            let mut record = self.record.lock().await;
            record.dom = Some(dom);
        }
        Ok(())
    }

    async fn wait_for_settle(&self) {
        let budget = self.browser.config().effective_delay(Duration::ZERO);
        let deadline = Instant::now() + budget;
        loop {
            let loaded = self.page_loaded.load(Ordering::SeqCst);
            let last_active = Duration::from_millis(self.last_active_millis.load(Ordering::SeqCst));
            let idle_for = self.start.elapsed().saturating_sub(last_active);
            if loaded && idle_for >= SETTLE_IDLE {
                break;
            }
            if Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(SETTLE_TICK).await;
        }
    }

    /// Waits until no response-body fetch is still in flight, so the JSON
    /// projection includes everything the event worker has queued up.
    async fn wait_for_quiescence(&self) {
        while self.in_flight.load(Ordering::SeqCst) > 0 {
            self.idle.notified().await;
        }
    }

    /// Activates the tab and takes the screenshot, under the browser's
    /// shared tab lock (the headless viewport is singular).
    pub async fn capture(&self) -> Result<()> {
        let base64_image = {
            let _guard = self.browser.tab_lock.lock().await;
            self.request(
                "Target.activateTarget",
                json!({"targetId": self.target_id}),
            )
            .await?;

            let mut params = json!({"format": "png", "quality": 100});
            if self.browser.config().full_page {
                params["captureBeyondViewport"] = Value::Bool(true);
            }
            let response = self.request("Page.captureScreenshot", params).await?;
            response["data"]
                .as_str()
                .ok_or_else(|| WebshotError::protocol("captureScreenshot: missing data"))?
                .to_string()
        };

        let title = self.get_title().await;
        self.wait_for_quiescence().await;

        let mut record = self.record.lock().await;
        record.base64_image = Some(base64_image);
        record.title = title;
        Ok(())
    }

    async fn get_dom(&self) -> String {
        let result = async {
            let document = self.request("DOM.getDocument", json!({})).await?;
            let node_id = document["root"]["nodeId"]
                .as_u64()
                .ok_or_else(|| WebshotError::protocol("getDocument: missing root nodeId"))?;
            let outer = self
                .request("DOM.getOuterHTML", json!({"nodeId": node_id}))
                .await?;
            Ok::<String, WebshotError>(outer["outerHTML"].as_str().unwrap_or_default().to_string())
        }
        .await;
        match result {
            Ok(html) => html,
            Err(e) => {
                warn!(error = %e, "failed to get DOM");
                String::new()
            }
        }
    }

    async fn get_title(&self) -> String {
        match self.request("Page.getNavigationHistory", json!({})).await {
            Ok(response) => response["entries"]
                .as_array()
                .and_then(|entries| entries.last())
                .and_then(|entry| entry.get("title"))
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            Err(_) => String::new(),
        }
    }

    pub async fn into_record(self: Arc<Self>) -> CaptureRecord {
        self.record.lock().await.clone()
    }

    /// Deregisters the tab before issuing the close command, so any
    /// late-arriving events are dropped silently rather than errored.
    /// Idempotent.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.browser.unregister_tab(&self.target_id).await;
        if let Ok(conn) = self.browser.connection().await {
            conn.unregister_session(&self.session_id).await;
        }
        let result = self
            .browser
            .request(
                "Target.closeTarget",
                json!({"targetId": self.target_id}),
                None,
            )
            .await;
        if let Err(e) = result {
            debug!(error = %e, "closeTarget failed (tab likely already gone)");
        }
        Ok(())
    }
}
