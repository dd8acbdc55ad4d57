//! Error types for the pdf2exam library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`Pdf2ExamError`]: **Fatal, pre-stream**: the request cannot start at
//!   all (input file missing, upload is not a PDF, bad configuration). These
//!   are returned as `Err` and mapped to an HTTP status or a CLI exit code.
//!
//! * [`RelayError`]: **In-stream**: something went wrong while the relay was
//!   already producing output. Once the first byte of a response has been
//!   flushed there is no other channel left to report failure, so every
//!   variant is rendered to text and delivered as a fragment of the stream
//!   itself. The `Display` impl of each variant *is* that fragment.

use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors raised before any output is streamed.
#[derive(Debug, Error)]
pub enum Pdf2ExamError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{name}'\nFirst bytes: {magic:?}")]
    NotAPdf { name: String, magic: Vec<u8> },

    // ── Upload errors ─────────────────────────────────────────────────────
    /// A required multipart form field was not sent.
    #[error("Missing form field '{0}'")]
    MissingField(&'static str),

    /// The multipart body could not be read.
    #[error("Malformed upload: {0}")]
    MalformedUpload(String),

    /// Extraction produced nothing but whitespace.
    #[error("無法從 PDF 中提取任何文字內容，請檢查 PDF 檔案或 OCR 設定。")]
    NoExtractableText,

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A failure observed by the streaming relay.
///
/// Every variant except [`RelayError::StreamProtocol`] is emitted downstream
/// as exactly one fragment whose text is the variant's `Display` output.
/// `StreamProtocol` (one malformed line) is logged and skipped.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RelayError {
    /// Endpoint URL or model identifier is not configured.
    #[error("錯誤：LLM_API_URL 或 LLM_MODEL_NAME 未設定。({missing})")]
    Configuration { missing: String },

    /// The upstream answered the initial request with a non-success status.
    #[error("LLM API 錯誤 (狀態 {status}): {body}")]
    UpstreamStatus { status: u16, body: String },

    /// A `data:` line whose payload is not valid JSON.
    #[error("LLM stream line is not valid JSON: {detail}")]
    StreamProtocol { detail: String },

    /// The upstream reported an error inside an otherwise healthy stream.
    #[error("[LLM Stream Error: {message}]")]
    UpstreamStream { message: String },

    /// Connection, DNS, TLS or mid-stream read failure.
    #[error("[LLM 連線錯誤: {detail}]")]
    Transport { detail: String },

    /// The configured idle timeout elapsed with no bytes from the upstream.
    #[error("[LLM 連線逾時: {after:?} 內未收到任何資料]")]
    IdleTimeout { after: std::time::Duration },

    /// Anything the relay did not anticipate.
    #[error("[LLM Handler 內部錯誤: {detail}]")]
    Internal { detail: String },
}

impl RelayError {
    /// Classify a `reqwest` failure raised while connecting or reading.
    pub fn from_transport(err: &reqwest::Error) -> Self {
        let kind = if err.is_connect() {
            "connect"
        } else if err.is_timeout() {
            "timeout"
        } else if err.is_body() || err.is_decode() {
            "body"
        } else if err.is_request() {
            "request"
        } else {
            "network"
        };
        RelayError::Transport {
            detail: format!("{kind}: {}", error_chain(err)),
        }
    }
}

/// Flatten an error and its `source()` chain into one line.
///
/// `reqwest` hides the interesting part (e.g. "connection reset by peer")
/// several sources deep.
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut msg = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        let text = inner.to_string();
        if !msg.contains(&text) {
            msg.push_str(": ");
            msg.push_str(&text);
        }
        source = inner.source();
    }
    msg
}
