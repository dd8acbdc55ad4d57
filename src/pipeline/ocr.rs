//! Tesseract OCR via the command-line binary.
//!
//! Shelling out keeps the build free of native OCR bindings; the only runtime
//! requirement is a `tesseract` executable plus the configured language packs.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::debug;

/// Why a page could not be OCR'd.
#[derive(Debug, Error)]
pub enum OcrError {
    /// The executable could not be started.
    #[error("{0}")]
    BackendNotAvailable(String),

    /// Tesseract ran but reported failure.
    #[error("tesseract failed: {0}")]
    Failed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Runs Tesseract on page images.
#[derive(Debug, Clone)]
pub struct Tesseract {
    cmd: PathBuf,
    languages: String,
}

impl Tesseract {
    pub fn new(cmd: impl Into<PathBuf>, languages: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            languages: languages.into(),
        }
    }

    /// Recognise the text in one image file.
    pub fn image_to_string(&self, image_path: &Path) -> Result<String, OcrError> {
        let output = Command::new(&self.cmd)
            .arg(image_path)
            .arg("stdout")
            .args(["-l", &self.languages])
            .output();

        match output {
            Ok(output) if output.status.success() => {
                let text = String::from_utf8_lossy(&output.stdout).into_owned();
                debug!("tesseract produced {} chars", text.chars().count());
                Ok(text)
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(OcrError::Failed(stderr.trim().to_string()))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(OcrError::BackendNotAvailable(
                format!(
                    "Tesseract 未安裝或未在系統 PATH 中（{}）。請安裝 Tesseract 或設定 TESSERACT_CMD。",
                    self.cmd.display()
                ),
            )),
            Err(e) => Err(OcrError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_binary_is_reported_as_unavailable() {
        let t = Tesseract::new("/definitely/not/here/tesseract", "eng");
        let err = t.image_to_string(Path::new("page.png")).unwrap_err();
        assert!(matches!(err, OcrError::BackendNotAvailable(_)), "got: {err:?}");
        assert!(err.to_string().contains("TESSERACT_CMD"));
    }
}
