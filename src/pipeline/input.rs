//! Input resolution: turn a path, URL or uploaded body into a local PDF file.
//!
//! pdfium opens documents by path, so every input ends up on disk. Anything
//! this module creates lives in a `tempfile` guard held by [`ResolvedInput`]
//! and is deleted when the guard is dropped, on every exit path.

use crate::error::Pdf2ExamError;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::{NamedTempFile, TempDir};
use tracing::{debug, info};

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// A PDF on local disk, possibly owned by a temp-file guard.
#[derive(Debug)]
pub enum ResolvedInput {
    /// Input was already a local file.
    Local(PathBuf),
    /// Input was a URL; PDF downloaded to a temporary directory.
    Downloaded { path: PathBuf, _temp_dir: TempDir },
    /// Input was an HTTP upload written to a temporary file.
    Uploaded(NamedTempFile),
}

impl ResolvedInput {
    /// Get the path to the PDF file regardless of how it was resolved.
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Downloaded { path, .. } => path,
            ResolvedInput::Uploaded(file) => file.path(),
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Reject anything that does not start with `%PDF`.
///
/// Empty or very short inputs are rejected too; pdfium would otherwise fail
/// with a far less helpful message.
pub fn check_pdf_magic(bytes: &[u8], name: &str) -> Result<(), Pdf2ExamError> {
    if bytes.len() < PDF_MAGIC.len() || &bytes[..PDF_MAGIC.len()] != PDF_MAGIC {
        return Err(Pdf2ExamError::NotAPdf {
            name: name.to_string(),
            magic: bytes.iter().take(PDF_MAGIC.len()).copied().collect(),
        });
    }
    Ok(())
}

/// Resolve a CLI argument to a local PDF file path.
///
/// URLs are downloaded to a temporary directory; local paths are validated.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, Pdf2ExamError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        resolve_local(input)
    }
}

/// Write an uploaded PDF body into `dir` and return its guard.
///
/// The original file name only contributes its extension-free stem to the
/// temp name; it is never used as a path.
pub fn persist_upload(
    bytes: &[u8],
    filename: Option<&str>,
    dir: &Path,
) -> Result<ResolvedInput, Pdf2ExamError> {
    let display_name = filename.unwrap_or("upload.pdf");
    check_pdf_magic(bytes, display_name)?;

    let stem: String = Path::new(display_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("upload")
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
        .take(40)
        .collect();

    let mut file = tempfile::Builder::new()
        .prefix(&format!("{stem}-"))
        .suffix(".pdf")
        .tempfile_in(dir)
        .map_err(|e| Pdf2ExamError::Internal(format!("Failed to create temp file: {e}")))?;
    file.write_all(bytes)
        .and_then(|_| file.flush())
        .map_err(|e| Pdf2ExamError::Internal(format!("Failed to write temp file: {e}")))?;

    debug!(
        "Saved upload '{}' ({} bytes) to {}",
        display_name,
        bytes.len(),
        file.path().display()
    );
    Ok(ResolvedInput::Uploaded(file))
}

/// Resolve a local file path, validating existence and PDF magic bytes.
fn resolve_local(path_str: &str) -> Result<ResolvedInput, Pdf2ExamError> {
    let path = PathBuf::from(path_str);

    if !path.exists() {
        return Err(Pdf2ExamError::FileNotFound { path });
    }

    match std::fs::File::open(&path) {
        Ok(mut f) => {
            use std::io::Read;
            let mut magic = [0u8; 4];
            let read = f.read(&mut magic).unwrap_or(0);
            check_pdf_magic(&magic[..read], path_str)?;
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(Pdf2ExamError::PermissionDenied { path });
        }
        Err(_) => {
            return Err(Pdf2ExamError::FileNotFound { path });
        }
    }

    debug!("Resolved local PDF: {}", path.display());
    Ok(ResolvedInput::Local(path))
}

/// Download a URL to a temporary directory and return the path.
async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, Pdf2ExamError> {
    info!("Downloading PDF from: {}", url);

    let failed = |reason: String| Pdf2ExamError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            Pdf2ExamError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;
    check_pdf_magic(&bytes, url)?;

    let temp_dir = TempDir::new().map_err(|e| Pdf2ExamError::Internal(e.to_string()))?;
    let file_path = temp_dir.path().join(filename_from_url(url));

    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| Pdf2ExamError::Internal(format!("Failed to write temp file: {}", e)))?;

    info!("Downloaded to: {}", file_path.display());

    Ok(ResolvedInput::Downloaded {
        path: file_path,
        _temp_dir: temp_dir,
    })
}

/// Last path segment of the URL when it looks like a file name.
fn filename_from_url(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|last| !last.is_empty() && last.contains('.'))
        .unwrap_or_else(|| "downloaded.pdf".to_string())
}
