//! Drives the real client (`Connection`, `Browser`, `Tab`) against an
//! in-process fake CDP endpoint instead of a real browser binary, per
//! the end-to-end scenarios described in SPEC_FULL.md §8.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use webshot::{Browser, Config};

const PROTOCOL_JSON: &str = r#"{
    "domains": [
        {"domain": "Target", "commands": [
            {"name": "createTarget"}, {"name": "attachToTarget"},
            {"name": "activateTarget"}, {"name": "closeTarget"}
        ]},
        {"domain": "Page", "commands": [
            {"name": "enable"}, {"name": "navigate"},
            {"name": "captureScreenshot"}, {"name": "getNavigationHistory"}
        ]},
        {"domain": "Network", "commands": [{"name": "enable"}, {"name": "getResponseBody"}]},
        {"domain": "Emulation", "commands": [{"name": "setDeviceMetricsOverride"}]},
        {"domain": "Debugger", "commands": [{"name": "enable"}, {"name": "getScriptSource"}]},
        {"domain": "DOM", "commands": [{"name": "getDocument"}, {"name": "getOuterHTML"}]}
    ]
}"#;

/// Starts a fake debugger endpoint that understands enough of the wire
/// protocol to drive a full create-tab/navigate/capture/close cycle. When
/// `send_events` is false, `Page.navigate` is acknowledged but no
/// `Page.loadEventFired`/`Network.*` events ever follow, modeling a page
/// that never settles.
async fn spawn_fake_server(send_events: bool) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let frame_count = Arc::new(AtomicUsize::new(0));
    let counter = frame_count.clone();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let (mut sink, mut source) = ws.split();
        let mut next_target = 0u32;
        let mut next_session = 0u32;

        while let Some(Ok(WsMessage::Text(raw))) = source.next().await {
            counter.fetch_add(1, Ordering::SeqCst);
            let text = raw.to_string();
            let frame: Value = serde_json::from_str(&text).unwrap();
            let id = frame["id"].as_u64().unwrap();
            let method = frame["method"].as_str().unwrap().to_string();
            let session_id = frame.get("sessionId").and_then(|v| v.as_str()).map(str::to_string);
            let params = frame["params"].clone();

            let result = match method.as_str() {
                "Target.createTarget" => {
                    next_target += 1;
                    json!({"targetId": format!("T{next_target}")})
                }
                "Target.attachToTarget" => {
                    next_session += 1;
                    json!({"sessionId": format!("S{next_session}")})
                }
                "Page.enable" | "Network.enable" | "Debugger.enable"
                | "Emulation.setDeviceMetricsOverride" | "Target.activateTarget"
                | "Target.closeTarget" => json!({}),
                "Page.navigate" => json!({"frameId": "F1"}),
                "Page.getNavigationHistory" => json!({"entries": [{"title": "frankie"}]}),
                "Page.captureScreenshot" => json!({"data": "aGVsbG8="}),
                "Network.getResponseBody" => json!({"body": ""}),
                "DOM.getDocument" => json!({"root": {"nodeId": 1}}),
                "DOM.getOuterHTML" => json!({"outerHTML": "<html></html>"}),
                other => panic!("fake server got unexpected method {other}"),
            };
            let response = json!({"id": id, "result": result});
            sink.send(WsMessage::Text(response.to_string().into())).await.unwrap();

            if send_events && method == "Page.navigate" {
                let url = params["url"].as_str().unwrap_or_default().to_string();
                let request_id = format!("req-{id}");
                let events = [
                    json!({
                        "method": "Network.requestWillBeSent",
                        "sessionId": session_id,
                        "params": {"requestId": request_id, "type": "Document", "request": {"url": url}},
                    }),
                    json!({
                        "method": "Network.responseReceived",
                        "sessionId": session_id,
                        "params": {
                            "requestId": request_id,
                            "type": "Document",
                            "response": {"url": url, "status": 200, "mimeType": "text/html", "headers": {}},
                        },
                    }),
                    json!({"method": "Page.loadEventFired", "sessionId": session_id, "params": {}}),
                ];
                for event in events {
                    sink.send(WsMessage::Text(event.to_string().into())).await.unwrap();
                }
            }
        }
    });

    (format!("ws://{addr}"), frame_count)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn basic_capture_end_to_end() {
    let (ws_url, _count) = spawn_fake_server(true).await;
    let config = Config::default();
    let browser = Browser::connect_for_tests(&ws_url, PROTOCOL_JSON, config).await.unwrap();

    let tab = browser.new_tab().await.unwrap();
    tab.navigate("https://example.com/").await.unwrap();
    tab.capture().await.unwrap();
    let record = tab.clone().into_record().await;
    tab.close().await.unwrap();
    browser.stop().await.unwrap();

    assert_eq!(record.title, "frankie");
    assert_eq!(record.status_code(), 200);
    assert_eq!(record.final_url(), "https://example.com/");
    assert!(record.base64_image.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn capability_rejection_short_circuits_before_wire() {
    let (ws_url, count) = spawn_fake_server(true).await;
    let browser = Browser::connect_for_tests(&ws_url, PROTOCOL_JSON, Config::default())
        .await
        .unwrap();

    let err = browser
        .request("BogusDomain.doStuff", json!({}), None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("BogusDomain"));
    assert_eq!(count.load(Ordering::SeqCst), 0, "rejected command must never reach the wire");

    browser.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn session_events_route_to_correct_tab() {
    let (ws_url, _count) = spawn_fake_server(true).await;
    let browser = Browser::connect_for_tests(&ws_url, PROTOCOL_JSON, Config::default())
        .await
        .unwrap();

    let tab_a = browser.new_tab().await.unwrap();
    let tab_b = browser.new_tab().await.unwrap();

    let (res_a, res_b) = tokio::join!(tab_a.navigate("https://a.test/"), tab_b.navigate("https://b.test/"));
    res_a.unwrap();
    res_b.unwrap();

    let record_a = tab_a.clone().into_record().await;
    let record_b = tab_b.clone().into_record().await;

    assert_eq!(record_a.final_url(), "https://a.test/");
    assert_eq!(record_b.final_url(), "https://b.test/");

    tab_a.close().await.unwrap();
    tab_b.close().await.unwrap();
    browser.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stop_closes_live_tabs_the_caller_never_closed() {
    let (ws_url, count) = spawn_fake_server(true).await;
    let browser = Browser::connect_for_tests(&ws_url, PROTOCOL_JSON, Config::default())
        .await
        .unwrap();

    let _tab = browser.new_tab().await.unwrap();
    let before = count.load(Ordering::SeqCst);

    browser.stop().await.unwrap();

    assert!(
        count.load(Ordering::SeqCst) > before,
        "stop() must issue Target.closeTarget for tabs the caller left open"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn settle_gives_up_after_delay_budget_without_erroring() {
    let (ws_url, _count) = spawn_fake_server(false).await;
    let config = Config::builder()
        .delay(Duration::from_millis(300))
        .timeout(Duration::from_secs(5))
        .build();
    let browser = Browser::connect_for_tests(&ws_url, PROTOCOL_JSON, config).await.unwrap();
    let tab = browser.new_tab().await.unwrap();

    let start = tokio::time::Instant::now();
    tab.navigate("https://slow.test/").await.unwrap();
    let elapsed = start.elapsed();

    assert!(elapsed < Duration::from_secs(2), "took {elapsed:?}");
    let record = tab.clone().into_record().await;
    assert_eq!(record.status_code(), 0, "no document response was ever observed");

    tab.close().await.unwrap();
    browser.stop().await.unwrap();
}
