//! Configuration types for extraction, relaying and serving.
//!
//! Every knob lives in one of three structs, each built via its builder:
//!
//! * [`RelayConfig`]: where to send the prompt and how to emit the answer.
//! * [`ExtractConfig`]: when to fall back to OCR and how to run it.
//! * [`ServerConfig`]: where to listen and where uploads go.
//!
//! Values are read once at process start (the binary maps CLI flags and
//! environment variables onto the builders) and passed down explicitly; no
//! module reads the environment on its own.

use crate::error::Pdf2ExamError;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default character budget for the document text sent to the model.
pub const DEFAULT_MAX_CONTEXT_CHARS: usize = 8000;

/// How fragments are handed to the downstream consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Emission {
    /// One output fragment per upstream content event. (default)
    #[default]
    Chunk,
    /// Split every content event into single-character fragments.
    PerChar,
}

/// Configuration for the streaming relay.
///
/// `endpoint` and `model` are optional on purpose: a relay built without them
/// still runs, but every call produces a single configuration-error fragment
/// instead of contacting the network.
///
/// # Example
/// ```rust
/// use pdf2exam::{Emission, RelayConfig};
///
/// let config = RelayConfig::builder()
///     .endpoint("http://localhost:11434/v1/chat/completions")
///     .model("qwen2.5:7b")
///     .max_context_chars(12_000)
///     .emission(Emission::Chunk)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_context_chars, 12_000);
/// ```
#[derive(Clone, Default)]
pub struct RelayConfig {
    /// Chat-completions URL (`LLM_API_URL`).
    pub endpoint: Option<String>,

    /// Bearer credential (`LLM_API_KEY`). Sent only when present.
    pub api_key: Option<String>,

    /// Model identifier (`LLM_MODEL_NAME`).
    pub model: Option<String>,

    /// Maximum characters of document text forwarded to the model. Default: 8000.
    ///
    /// Counted in Unicode scalar values, not bytes, so CJK text gets the same
    /// budget as ASCII.
    pub max_context_chars: usize,

    /// Custom system instruction. If None, uses the built-in default.
    pub system_prompt: Option<String>,

    /// Fragment granularity. Default: [`Emission::Chunk`].
    pub emission: Emission,

    /// Give up when no bytes arrive for this long. Default: None (wait forever).
    ///
    /// Models may think for minutes before the first token; any finite default
    /// would abort valid slow generations, so this is opt-in.
    pub idle_timeout: Option<Duration>,

    /// TCP connect timeout. Default: None.
    pub connect_timeout: Option<Duration>,
}

impl fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("max_context_chars", &self.max_context_chars)
            .field("system_prompt", &self.system_prompt.as_ref().map(|p| p.len()))
            .field("emission", &self.emission)
            .field("idle_timeout", &self.idle_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl RelayConfig {
    /// Create a new builder for `RelayConfig`.
    pub fn builder() -> RelayConfigBuilder {
        RelayConfigBuilder {
            config: Self {
                max_context_chars: DEFAULT_MAX_CONTEXT_CHARS,
                ..Self::default()
            },
        }
    }

    /// Names of required settings that are absent or blank, in a stable order.
    pub fn missing_settings(&self) -> Vec<&'static str> {
        let blank = |v: &Option<String>| v.as_deref().map_or(true, |s| s.trim().is_empty());
        let mut missing = Vec::new();
        if blank(&self.endpoint) {
            missing.push("LLM_API_URL");
        }
        if blank(&self.model) {
            missing.push("LLM_MODEL_NAME");
        }
        missing
    }
}

/// Builder for [`RelayConfig`].
#[derive(Debug)]
pub struct RelayConfigBuilder {
    config: RelayConfig,
}

impl RelayConfigBuilder {
    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.endpoint = Some(url.into());
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.config.api_key = (!key.is_empty()).then_some(key);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn max_context_chars(mut self, n: usize) -> Self {
        self.config.max_context_chars = n;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn emission(mut self, emission: Emission) -> Self {
        self.config.emission = emission;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = Some(timeout);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = Some(timeout);
        self
    }

    /// Build the configuration, validating constraints.
    ///
    /// A missing endpoint or model is *not* a build error; see
    /// [`RelayConfig::missing_settings`].
    pub fn build(self) -> Result<RelayConfig, Pdf2ExamError> {
        let c = &self.config;
        if c.max_context_chars == 0 {
            return Err(Pdf2ExamError::InvalidConfig(
                "max_context_chars must be ≥ 1".into(),
            ));
        }
        if c.idle_timeout == Some(Duration::ZERO) {
            return Err(Pdf2ExamError::InvalidConfig(
                "idle_timeout must be > 0 when set".into(),
            ));
        }
        if let Some(ref url) = c.endpoint {
            if !url.trim().is_empty() && reqwest::Url::parse(url).is_err() {
                return Err(Pdf2ExamError::InvalidConfig(format!(
                    "LLM endpoint is not a valid URL: '{url}'"
                )));
            }
        }
        Ok(self.config)
    }
}

/// Configuration for the PDF text extractor.
#[derive(Debug, Clone)]
pub struct ExtractConfig {
    /// A page whose trimmed native text has at most this many characters is
    /// sent to OCR instead. Default: 200.
    pub min_text_chars: usize,

    /// Rasterisation DPI for OCR. Range: 72–600. Default: 300.
    ///
    /// Tesseract's accuracy on CJK glyphs drops sharply below ~250 DPI.
    pub ocr_dpi: u32,

    /// Tesseract language packs joined with `+`. Default: `chi_tra+chi_sim`.
    pub ocr_languages: String,

    /// Tesseract executable. Default: `tesseract` (looked up on PATH).
    pub tesseract_cmd: PathBuf,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Explicit pdfium shared library (`PDFIUM_LIB_PATH`). If None, looks
    /// next to the working directory, then on the system library path.
    pub pdfium_lib: Option<PathBuf>,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            min_text_chars: 200,
            ocr_dpi: 300,
            ocr_languages: "chi_tra+chi_sim".to_string(),
            tesseract_cmd: PathBuf::from("tesseract"),
            password: None,
            pdfium_lib: None,
        }
    }
}

impl ExtractConfig {
    /// Create a new builder for `ExtractConfig`.
    pub fn builder() -> ExtractConfigBuilder {
        ExtractConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractConfig`].
#[derive(Debug)]
pub struct ExtractConfigBuilder {
    config: ExtractConfig,
}

impl ExtractConfigBuilder {
    pub fn min_text_chars(mut self, n: usize) -> Self {
        self.config.min_text_chars = n;
        self
    }

    pub fn ocr_dpi(mut self, dpi: u32) -> Self {
        self.config.ocr_dpi = dpi.clamp(72, 600);
        self
    }

    pub fn ocr_languages(mut self, langs: impl Into<String>) -> Self {
        self.config.ocr_languages = langs.into();
        self
    }

    /// Override the Tesseract binary. Ignored when the path does not exist,
    /// so a stale `TESSERACT_CMD` falls back to the PATH lookup.
    pub fn tesseract_cmd(mut self, cmd: impl Into<PathBuf>) -> Self {
        let cmd = cmd.into();
        if cmd.exists() {
            self.config.tesseract_cmd = cmd;
        }
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn pdfium_lib(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib = Some(path.into());
        self
    }

    pub fn build(self) -> Result<ExtractConfig, Pdf2ExamError> {
        if self.config.ocr_languages.trim().is_empty() {
            return Err(Pdf2ExamError::InvalidConfig(
                "ocr_languages must name at least one Tesseract language".into(),
            ));
        }
        Ok(self.config)
    }
}

/// Configuration for the HTTP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address. Default: `0.0.0.0`.
    pub host: String,
    /// Bind port. Default: 8000.
    pub port: u16,
    /// Directory holding `index.html` and front-end assets. Default: `static`.
    pub static_dir: PathBuf,
    /// Directory for uploaded PDFs while they are being extracted.
    /// Default: the OS temp dir.
    pub temp_dir: PathBuf,
    /// Maximum accepted request body in bytes. Default: 50 MiB.
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            static_dir: PathBuf::from("static"),
            temp_dir: std::env::temp_dir(),
            max_upload_bytes: 50 * 1024 * 1024,
        }
    }
}
