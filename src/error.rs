use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;

/// Errors produced anywhere in the browser driver, tab, or capture pipeline.
#[derive(Debug, Error)]
pub enum WebshotError {
    /// The browser binary could not be found, or exited during bring-up.
    #[error("failed to start browser: {0}")]
    Startup(String),

    /// A request was issued before `Browser::start` completed.
    #[error("you must call start() before making a request")]
    NotStarted,

    /// The browser returned a protocol-level error for a command, or the
    /// command is not present in the capability table.
    #[error("protocol error: {message}")]
    Protocol { message: String, retry: bool },

    /// The duplex channel closed while requests were still pending.
    #[error("browser stopped unexpectedly")]
    BrowserStopped,

    /// An individual call or a whole capture exceeded its deadline.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Perceptual hashing or OCR failed.
    #[error("capture post-processing error: {0}")]
    Capture(#[from] CaptureError),

    #[error("{0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("{0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Serde(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(String),
}

impl WebshotError {
    /// Only `ProtocolError`s explicitly marked `retry` are retried; timeouts
    /// never are.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WebshotError::Protocol { retry: true, .. })
    }

    pub fn from_reqwest(e: reqwest::Error) -> Self {
        WebshotError::Http(e.to_string())
    }

    pub fn protocol(message: impl fmt::Display) -> Self {
        WebshotError::Protocol {
            message: message.to_string(),
            retry: false,
        }
    }

    pub fn protocol_retryable(message: impl fmt::Display) -> Self {
        WebshotError::Protocol {
            message: message.to_string(),
            retry: true,
        }
    }
}

/// Errors from the ambient artifact producers (`hashing`, `ocr`); kept
/// distinct from protocol errors since they never touch the wire.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("OCR engine not found on PATH: {0}")]
    OcrUnavailable(String),

    #[error("OCR engine failed: {0}")]
    OcrFailed(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T, E = WebshotError> = std::result::Result<T, E>;
