use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use webshot::config::Config;
use webshot::sanitize::load_urls;
use webshot::{Browser, WorkerPool};

/// Screenshot URLs over the Chrome DevTools Protocol.
#[derive(Parser, Debug)]
#[command(name = "webshot", version, about)]
struct Cli {
    /// URL(s) to capture, or file(s) containing URLs.
    urls: Vec<String>,

    /// Output JSON instead of a one-line-per-URL summary.
    #[arg(short = 'j', long)]
    json: bool,

    /// Path to the browser executable.
    #[arg(short = 'c', long = "chrome")]
    chrome: Option<PathBuf>,

    /// Output directory for screenshots.
    #[arg(short, long, default_value = "screenshots")]
    output: PathBuf,

    /// Resolution to capture, WxH.
    #[arg(short, long, default_value = "1440x900")]
    resolution: String,

    /// Capture the full page rather than just the viewport.
    #[arg(short, long = "full-page")]
    full_page: bool,

    /// Only visit the sites; don't capture screenshots.
    #[arg(long)]
    no_screenshots: bool,

    /// Number of concurrent workers.
    #[arg(short, long, default_value_t = 15)]
    threads: usize,

    /// Delay before capturing, in seconds.
    #[arg(long, default_value_t = 3.0)]
    delay: f64,

    /// Per-URL timeout, in seconds.
    #[arg(long, default_value_t = 10.0)]
    timeout: f64,

    /// User agent string to present.
    #[arg(short = 'U', long = "user-agent")]
    user_agent: Option<String>,

    /// HTTP proxy to use.
    #[arg(short, long)]
    proxy: Option<String>,

    /// Output each screenshot's image as base64 in the JSON record.
    #[arg(short, long)]
    base64: bool,

    /// Capture the fully-rendered DOM.
    #[arg(short, long)]
    dom: bool,

    /// Capture every snippet of JavaScript (inline + external).
    #[arg(short = 'J', long)]
    javascript: bool,

    /// Capture the full body of each HTTP response.
    #[arg(long)]
    responses: bool,

    /// Capture the full body of each HTTP request.
    #[arg(long)]
    requests: bool,

    /// Resource types to skip in the network log.
    #[arg(long, value_delimiter = ',', default_value = "image,media,font,stylesheet")]
    ignore_types: Vec<String>,

    /// Extract text from screenshots via OCR.
    #[arg(long)]
    ocr: bool,

    /// Suppress informational output.
    #[arg(long)]
    silent: bool,

    /// Enable debug-level logging.
    #[arg(long)]
    debug: bool,

    /// Disable colored status output.
    #[arg(long)]
    no_color: bool,
}

#[derive(Serialize)]
struct IndexEntry {
    url: String,
    final_url: String,
    status_code: u16,
    title: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    install_logging(cli.debug, cli.silent);

    if cli.ocr && which::which("tesseract").is_err() {
        anyhow::bail!("Please install tesseract to use OCR (e.g. apt install tesseract-ocr)");
    }

    if !cli.no_screenshots {
        std::fs::create_dir_all(&cli.output)
            .with_context(|| format!("failed to create output directory {}", cli.output.display()))?;
    }

    let urls = load_urls(&cli.urls);
    if urls.is_empty() {
        anyhow::bail!("no URLs provided");
    }

    let mut builder = Config::builder()
        .threads(cli.threads)
        .full_page(cli.full_page)
        .delay(Duration::from_secs_f64(cli.delay))
        .timeout(Duration::from_secs_f64(cli.timeout))
        .capture_dom(cli.dom)
        .capture_javascript(cli.javascript)
        .capture_requests(cli.requests)
        .capture_responses(cli.responses)
        .capture_base64(cli.base64)
        .capture_ocr(cli.ocr)
        .ignore_types(cli.ignore_types.iter().cloned().collect::<HashSet<_>>())
        .resolution(&cli.resolution)?;

    if let Some(chrome) = &cli.chrome {
        builder = builder.chrome_path(chrome.clone());
    }
    if let Some(ua) = &cli.user_agent {
        builder = builder.user_agent(ua.clone());
    }
    if let Some(proxy) = &cli.proxy {
        builder = builder.proxy(proxy.clone());
    }
    let config = builder.build();

    let browser = Browser::new(config);
    browser.start().await.context("failed to start browser")?;

    let cancel = Arc::new(tokio::sync::Notify::new());
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling in-flight captures");
            signal_cancel.notify_one();
        }
    });

    let result = run_scan(&cli, browser.clone(), urls, cancel).await;
    let _ = browser.stop().await;
    if result.is_err() {
        std::process::exit(1);
    }
    result
}

async fn run_scan(
    cli: &Cli,
    browser: std::sync::Arc<Browser>,
    urls: Vec<String>,
    cancel: Arc<tokio::sync::Notify>,
) -> Result<()> {
    let json_flag = cli.json;
    let base64_flag = cli.base64;
    let dom_flag = cli.dom;
    let javascript_flag = cli.javascript;
    let ocr_flag = cli.ocr;
    let no_screenshots = cli.no_screenshots;
    let no_color = cli.no_color;
    let output_dir = cli.output.clone();

    let pool = WorkerPool::new(urls);
    let results = pool
        .run_cancellable(
            browser.config().threads,
            move |url: String| {
                let browser = browser.clone();
                async move { capture_one(&browser, &url).await }
            },
            async move { cancel.notified().await },
        )
        .await;

    let mut index = Vec::new();
    for (url, outcome) in results {
        let record = match outcome {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(url, error = %e, "capture failed");
                continue;
            }
        };
        if record.status_code() == 0 {
            tracing::info!(url, "no screenshot returned");
            continue;
        }

        if !no_screenshots {
            if let Some(bytes) = record.image_bytes() {
                let path = output_dir.join(record.filename());
                std::fs::write(&path, bytes)
                    .with_context(|| format!("failed to write screenshot to {}", path.display()))?;
            }
        }

        if json_flag {
            let mut json = record.to_json(base64_flag, dom_flag, javascript_flag);
            if let Some(bytes) = record.image_bytes() {
                if let Ok(Ok(hash)) =
                    tokio::task::spawn_blocking(move || webshot::hashing::phash(&bytes)).await
                {
                    json["perception_hash"] = serde_json::Value::String(hash);
                }
            }
            if ocr_flag {
                if let Some(bytes) = record.image_bytes() {
                    if let Ok(text) = webshot::ocr::extract_text(&bytes).await {
                        json["ocr_text"] = serde_json::Value::String(text);
                    }
                }
            }
            println!("{}", serde_json::to_string(&json)?);
        } else {
            print_summary(&record, no_color);
        }

        index.push(IndexEntry {
            url: url.clone(),
            final_url: record.final_url().to_string(),
            status_code: record.status_code(),
            title: record.title.clone(),
        });
    }

    if !no_screenshots {
        let index_path = output_dir.join("index.json");
        let _ = std::fs::write(index_path, serde_json::to_string_pretty(&index)?);
    }

    Ok(())
}

async fn capture_one(browser: &std::sync::Arc<Browser>, url: &str) -> Result<webshot::CaptureRecord> {
    let timeout = browser.config().timeout;
    let tab = browser.new_tab().await?;
    let outcome = tokio::time::timeout(timeout, async {
        tab.navigate(url).await?;
        tab.capture().await?;
        Ok::<(), webshot::WebshotError>(())
    })
    .await;
    let record = tab.clone().into_record().await;
    let _ = tab.close().await;
    match outcome {
        Ok(Ok(())) => Ok(record),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Ok(record),
    }
}

fn print_summary(record: &webshot::CaptureRecord, no_color: bool) {
    let title: String = record.title.chars().take(30).collect();
    let status = record.status_code();
    if no_color {
        println!("[{status}]\t{title:<30}\t{}", record.final_url());
        return;
    }
    let color = match status / 100 {
        2 => "\x1b[1;38;5;47m",
        3 => "\x1b[1;38;5;39m",
        4 => "\x1b[1;38;5;177m",
        _ => "\x1b[1;38;5;196m",
    };
    println!("[{color}{status}\x1b[0m]\t{title:<30}\t{}", record.final_url());
}

fn install_logging(debug: bool, silent: bool) {
    let level = if silent {
        "error"
    } else if debug {
        "debug"
    } else {
        "info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
