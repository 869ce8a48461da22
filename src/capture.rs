use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use crate::sanitize::sanitize_filename;

/// One entry in the network log for a single request id. Mirrors the
/// per-request dict `webcap.webscreenshot.WebScreenshot.get_request_obj`
/// builds up in the Python original.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NetworkEntry {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub requests: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub responses: Vec<ResponseRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseRecord {
    pub url: String,
    pub status: u16,
    pub status_text: String,
    pub headers: HashMap<String, String>,
    pub mime_type: String,
    pub charset: String,
    pub protocol: String,
    pub remote_ip_address: String,
    pub remote_port: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NavigationEntry {
    pub url: String,
    pub status: u16,
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScriptRecord {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// The aggregated per-URL artifact. Equivalent to
/// `webcap.webscreenshot.WebScreenshot`.
#[derive(Debug, Clone, Default)]
pub struct CaptureRecord {
    pub url: String,
    pub title: String,
    pub navigation_history: Vec<NavigationEntry>,
    pub network_history: HashMap<String, NetworkEntry>,
    pub scripts: Vec<ScriptRecord>,
    pub dom: Option<String>,
    pub base64_image: Option<String>,
    pub timed_out: bool,
}

impl CaptureRecord {
    pub fn new(url: impl Into<String>) -> Self {
        CaptureRecord {
            url: url.into(),
            ..Default::default()
        }
    }

    /// The final URL in the navigation chain, or the originating URL if no
    /// document response was observed.
    pub fn final_url(&self) -> &str {
        self.navigation_history
            .last()
            .map(|entry| entry.url.as_str())
            .unwrap_or(&self.url)
    }

    pub fn status_code(&self) -> u16 {
        self.navigation_history
            .last()
            .map(|entry| entry.status)
            .unwrap_or(0)
    }

    pub fn filename(&self) -> String {
        format!("{}.png", sanitize_filename(&self.url))
    }

    pub fn image_bytes(&self) -> Option<Vec<u8>> {
        let b64 = self.base64_image.as_ref()?;
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.decode(b64).ok()
    }

    /// Builds the JSON projection described in the external interfaces
    /// section, honoring which optional artifacts the configuration
    /// enabled.
    pub fn to_json(&self, include_base64: bool, include_dom: bool, include_scripts: bool) -> Value {
        let mut obj = serde_json::Map::new();
        obj.insert("url".into(), Value::String(self.url.clone()));
        obj.insert("final_url".into(), Value::String(self.final_url().to_string()));
        obj.insert("title".into(), Value::String(self.title.clone()));
        obj.insert("status_code".into(), Value::from(self.status_code()));
        obj.insert(
            "navigation_history".into(),
            serde_json::to_value(&self.navigation_history).unwrap_or(Value::Null),
        );
        obj.insert(
            "network_history".into(),
            serde_json::to_value(&self.network_history).unwrap_or(Value::Null),
        );
        if include_base64 {
            if let Some(b64) = &self.base64_image {
                obj.insert("image_base64".into(), Value::String(b64.clone()));
            }
        }
        if include_dom {
            if let Some(dom) = &self.dom {
                obj.insert("dom".into(), Value::String(dom.clone()));
            }
        }
        if include_scripts {
            obj.insert(
                "scripts".into(),
                serde_json::to_value(&self.scripts).unwrap_or(Value::Null),
            );
        }
        Value::Object(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn final_url_falls_back_to_origin() {
        let record = CaptureRecord::new("https://example.com/");
        assert_eq!(record.final_url(), "https://example.com/");
        assert_eq!(record.status_code(), 0);
    }

    #[test]
    fn final_url_follows_navigation_history() {
        let mut record = CaptureRecord::new("https://example.com/test2");
        record.navigation_history.push(NavigationEntry {
            url: "https://example.com/test2".into(),
            status: 302,
            mime_type: "text/plain".into(),
            location: Some("/test3".into()),
        });
        record.navigation_history.push(NavigationEntry {
            url: "https://example.com/test3".into(),
            status: 302,
            mime_type: "text/plain".into(),
            location: Some("/".into()),
        });
        record.navigation_history.push(NavigationEntry {
            url: "https://example.com/".into(),
            status: 200,
            mime_type: "text/html".into(),
            location: None,
        });
        assert_eq!(record.final_url(), "https://example.com/");
        assert_eq!(record.status_code(), 200);
    }

    #[test]
    fn filename_is_sanitized_and_stable() {
        let record = CaptureRecord::new("https://example.com/a?b=c");
        let first = record.filename();
        let second = record.filename();
        assert_eq!(first, second);
        assert!(first.ends_with(".png"));
    }
}
