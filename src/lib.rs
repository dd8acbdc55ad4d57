//! # pdf2exam
//!
//! Generate exam questions from a PDF by streaming an LLM's answer back to the
//! caller as it is produced.
//!
//! ## Why this crate?
//!
//! Teaching material usually arrives as PDFs, half of them scans. This crate
//! pulls text out of every page (falling back to OCR where the text layer is
//! missing), wraps it in a fixed exam-writing prompt, and relays the model's
//! streamed answer fragment by fragment. Nothing is buffered: the first
//! question is on screen while the model is still writing the last one.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input    upload / local file / URL → temp file
//!  ├─ 2. Extract  pdfium text per page, Tesseract for thin pages (spawn_blocking)
//!  ├─ 3. Compose  truncate to budget, system + user messages
//!  ├─ 4. Relay    POST stream:true, decode `data:` lines
//!  └─ 5. Emit     fragments to HTTP body or stdout; errors become fragments
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use pdf2exam::{Relay, RelayConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RelayConfig::builder()
//!         .endpoint("http://localhost:11434/v1/chat/completions")
//!         .model("qwen2.5:7b")
//!         .build()?;
//!     let relay = Relay::new(config)?;
//!
//!     let mut fragments = relay.stream("光合作用是……", "請出三題選擇題");
//!     while let Some(fragment) = fragments.next().await {
//!         print!("{fragment}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Failure model
//!
//! Once streaming has started, failures cannot change the response status, so
//! the relay never returns an error: upstream HTTP errors, `error` events,
//! connection drops and internal faults each end up as one human-readable
//! fragment (see [`RelayError`]). Failures before streaming, such as a missing
//! upload or a non-PDF file, are ordinary [`Pdf2ExamError`]s.
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `server` | on      | axum HTTP front-end (`POST /generate_exam`) |
//! | `cli`    | on      | The `pdf2exam` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable both when using only the library:
//! ```toml
//! pdf2exam = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod pipeline;
pub mod prompts;
#[cfg(feature = "server")]
pub mod server;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    Emission, ExtractConfig, ExtractConfigBuilder, RelayConfig, RelayConfigBuilder, ServerConfig,
};
pub use error::{Pdf2ExamError, RelayError};
pub use pipeline::extract::{extract_text, PdfTextExtractor, TextExtractor};
pub use pipeline::input::{persist_upload, resolve_input, ResolvedInput};
pub use stream::{FragmentStream, Relay};
