pub mod browser;
pub mod capability;
pub mod capture;
pub mod config;
pub mod conn;
pub mod error;
pub mod hashing;
pub mod ocr;
pub mod pool;
pub mod process;
pub mod protocol;
pub mod sanitize;
pub mod tab;

pub use browser::Browser;
pub use capture::CaptureRecord;
pub use config::Config;
pub use error::{CaptureError, WebshotError};
pub use pool::WorkerPool;
pub use tab::Tab;
