use std::io::Write;

use tokio::process::Command;

use crate::error::CaptureError;

/// Extracts text from a screenshot by shelling out to the `tesseract` OCR
/// engine, following `webcap.helpers`' external-tool invocation pattern.
/// A pure `bytes -> String` function: the caller decides whether/when to
/// run it.
pub async fn extract_text(png_bytes: &[u8]) -> Result<String, CaptureError> {
    which::which("tesseract").map_err(|_| CaptureError::OcrUnavailable("tesseract".into()))?;

    let mut input = tempfile::NamedTempFile::new()?;
    input.write_all(png_bytes)?;
    let input_path = input.path().to_owned();

    let output = Command::new("tesseract")
        .arg(&input_path)
        .arg("stdout")
        .output()
        .await?;

    if !output.status.success() {
        return Err(CaptureError::OcrFailed(
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
