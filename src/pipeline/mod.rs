//! Pipeline stages from PDF to prompt, and the wire format back.
//!
//! Each submodule implements exactly one step and is tested on its own.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ extract ──▶ compose ──▶ (HTTP) ──▶ protocol
//! (upload)   (pdfium     (chat       upstream   (event lines
//! (URL/path)  + ocr)      request)   LLM        → fragments)
//! ```
//!
//! 1. [`input`]: land the user's PDF on local disk, owned by a temp guard
//! 2. [`extract`]: native text per page; runs in `spawn_blocking` because
//!    pdfium is not async-safe
//! 3. [`ocr`]: Tesseract fallback for pages without a usable text layer
//! 4. [`compose`]: truncate to the context budget and build the request body
//! 5. [`protocol`]: split the upstream byte stream into lines and decode each
//!    event; driven by [`crate::stream`]

pub mod compose;
pub mod extract;
pub mod input;
pub mod ocr;
pub mod protocol;
