//! CLI binary for pdf2exam.
//!
//! A thin shim over the library crate: maps CLI flags (and their environment
//! fallbacks, including a `.env` file) onto the config builders, then either
//! runs the HTTP server or streams one answer to stdout.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use pdf2exam::prompts::DEFAULT_USER_QUERY;
use pdf2exam::server::{self, AppState};
use pdf2exam::{
    extract_text, resolve_input, Emission, ExtractConfig, PdfTextExtractor, Pdf2ExamError, Relay,
    RelayConfig, ServerConfig, TextExtractor,
};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Web UI on http://localhost:8000
  pdf2exam serve

  # Stream an exam for a local textbook chapter to stdout
  pdf2exam generate chapter3.pdf > exam.md

  # Custom instruction, remote PDF
  pdf2exam generate https://example.org/notes.pdf --query "出10題是非題並附解答"

  # Only print the extracted text (no LLM call)
  pdf2exam extract scanned.pdf

ENVIRONMENT VARIABLES:
  LLM_API_URL               Chat-completions endpoint (OpenAI-compatible or Ollama)
  LLM_MODEL_NAME            Model identifier
  LLM_API_KEY               Bearer token, if the endpoint needs one
  MAX_CONTEXT_LENGTH_CHARS  Characters of PDF text sent to the model (default 8000)
  TESSERACT_CMD             Path to the tesseract executable
  PDFIUM_LIB_PATH           Path to an existing libpdfium

  A .env file in the working directory is loaded first.
"#;

/// Generate exams from PDF documents with a streaming LLM.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2exam",
    version,
    about = "Generate exams from PDF documents with a streaming LLM",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    llm: LlmArgs,

    #[command(flatten)]
    ocr: OcrArgs,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PDF2EXAM_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors and generated content.
    #[arg(short, long, global = true, env = "PDF2EXAM_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the web UI and the /generate_exam endpoint.
    Serve {
        /// Bind address.
        #[arg(long, env = "PDF2EXAM_HOST", default_value = "0.0.0.0")]
        host: String,

        /// Bind port.
        #[arg(long, env = "PDF2EXAM_PORT", default_value_t = 8000)]
        port: u16,

        /// Directory holding index.html and front-end assets.
        #[arg(long, env = "PDF2EXAM_STATIC_DIR", default_value = "static")]
        static_dir: PathBuf,

        /// Directory for uploads while they are being extracted.
        #[arg(long, env = "PDF2EXAM_TEMP_DIR")]
        temp_dir: Option<PathBuf>,

        /// Maximum upload size in MiB.
        #[arg(long, env = "PDF2EXAM_MAX_UPLOAD_MB", default_value_t = 50)]
        max_upload_mb: usize,
    },

    /// Extract a PDF and stream the generated exam to stdout.
    Generate {
        /// Local PDF file path or HTTP/HTTPS URL.
        input: String,

        /// Instruction for the model. Empty uses the built-in default.
        #[arg(long, default_value = "")]
        query: String,

        /// HTTP download timeout in seconds.
        #[arg(long, env = "PDF2EXAM_DOWNLOAD_TIMEOUT", default_value_t = 120)]
        download_timeout: u64,
    },

    /// Print the text extracted from a PDF (native text plus OCR).
    Extract {
        /// Local PDF file path or HTTP/HTTPS URL.
        input: String,

        /// HTTP download timeout in seconds.
        #[arg(long, env = "PDF2EXAM_DOWNLOAD_TIMEOUT", default_value_t = 120)]
        download_timeout: u64,
    },
}

#[derive(Args, Debug)]
struct LlmArgs {
    /// Chat-completions endpoint URL.
    #[arg(long, global = true, env = "LLM_API_URL")]
    api_url: Option<String>,

    /// Bearer API key.
    #[arg(long, global = true, env = "LLM_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Model identifier.
    #[arg(long, global = true, env = "LLM_MODEL_NAME")]
    model: Option<String>,

    /// Characters of document text forwarded to the model.
    #[arg(long, global = true, env = "MAX_CONTEXT_LENGTH_CHARS", default_value_t = 8000)]
    max_context_chars: usize,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, global = true, env = "PDF2EXAM_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Emit the answer one character at a time.
    #[arg(long, global = true, env = "PDF2EXAM_PER_CHAR")]
    per_char: bool,

    /// Abort when the model sends nothing for this many seconds.
    #[arg(long, global = true, env = "PDF2EXAM_IDLE_TIMEOUT")]
    idle_timeout: Option<u64>,

    /// TCP connect timeout in seconds.
    #[arg(long, global = true, env = "PDF2EXAM_CONNECT_TIMEOUT")]
    connect_timeout: Option<u64>,
}

#[derive(Args, Debug)]
struct OcrArgs {
    /// Tesseract executable.
    #[arg(long, global = true, env = "TESSERACT_CMD")]
    tesseract_cmd: Option<PathBuf>,

    /// Tesseract languages, joined with '+'.
    #[arg(long, global = true, env = "PDF2EXAM_OCR_LANGUAGES", default_value = "chi_tra+chi_sim")]
    ocr_languages: String,

    /// Pages with at most this many characters of native text are OCR'd.
    #[arg(long, global = true, env = "PDF2EXAM_MIN_TEXT_CHARS", default_value_t = 200)]
    min_text_chars: usize,

    /// Rasterisation DPI for OCR (72–600).
    #[arg(long, global = true, env = "PDF2EXAM_OCR_DPI", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    ocr_dpi: u32,

    /// PDF user password for encrypted documents.
    #[arg(long, global = true, env = "PDF2EXAM_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Path to an existing libpdfium.
    #[arg(long, global = true, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Must run before parsing so `env = ...` fallbacks see the file.
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // stdout carries generated content only; logs go to stderr. While the
    // spinner is shown, INFO-level library logs would tear it apart.
    let show_progress = !cli.quiet && !cli.verbose && !matches!(cli.command, Command::Serve { .. });
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let extractor: Arc<dyn TextExtractor> = Arc::new(PdfTextExtractor::new(
        build_extract_config(&cli.ocr).context("Invalid OCR configuration")?,
    ));

    match cli.command {
        Command::Serve {
            host,
            port,
            static_dir,
            temp_dir,
            max_upload_mb,
        } => {
            let relay = Relay::new(build_relay_config(&cli.llm).await?)
                .context("Failed to create LLM client")?;
            let mut config = ServerConfig {
                host,
                port,
                static_dir,
                max_upload_bytes: max_upload_mb * 1024 * 1024,
                ..ServerConfig::default()
            };
            if let Some(dir) = temp_dir {
                tokio::fs::create_dir_all(&dir)
                    .await
                    .with_context(|| format!("Cannot create temp dir {}", dir.display()))?;
                config.temp_dir = dir;
            }
            server::serve(AppState::new(config, relay, extractor))
                .await
                .context("Server failed")?;
        }

        Command::Generate {
            input,
            query,
            download_timeout,
        } => {
            let relay = Relay::new(build_relay_config(&cli.llm).await?)
                .context("Failed to create LLM client")?;
            let text = extract_input(&input, download_timeout, extractor, show_progress).await?;
            if text.trim().is_empty() {
                return Err(Pdf2ExamError::NoExtractableText.into());
            }

            let query = match query.trim() {
                "" => DEFAULT_USER_QUERY,
                q => q,
            };

            let mut stdout = io::stdout();
            let mut fragments = relay.stream(&text, query);
            let mut ends_with_newline = true;
            while let Some(fragment) = fragments.next().await {
                stdout
                    .write_all(fragment.as_bytes())
                    .and_then(|_| stdout.flush())
                    .context("Failed to write to stdout")?;
                if !fragment.is_empty() {
                    ends_with_newline = fragment.ends_with('\n');
                }
            }
            if !ends_with_newline {
                stdout.write_all(b"\n").ok();
            }
        }

        Command::Extract {
            input,
            download_timeout,
        } => {
            let text = extract_input(&input, download_timeout, extractor, show_progress).await?;
            let mut stdout = io::stdout().lock();
            stdout
                .write_all(text.as_bytes())
                .context("Failed to write to stdout")?;
            if !text.ends_with('\n') {
                stdout.write_all(b"\n").ok();
            }
        }
    }

    Ok(())
}

/// Resolve the input and extract its text, with a spinner on stderr.
async fn extract_input(
    input: &str,
    download_timeout: u64,
    extractor: Arc<dyn TextExtractor>,
    show_progress: bool,
) -> Result<String> {
    let spinner = show_progress.then(|| {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  ⏱ {elapsed}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
        );
        bar.set_prefix("Extracting");
        bar.set_message(input.to_string());
        bar.enable_steady_tick(Duration::from_millis(80));
        bar
    });

    // Keeps any downloaded temp file alive until extraction is done.
    let resolved = resolve_input(input, download_timeout)
        .await
        .with_context(|| format!("Cannot open '{input}'"))?;
    let text = extract_text(extractor, resolved.path().to_path_buf())
        .await
        .context("Text extraction failed")?;

    if let Some(bar) = spinner {
        bar.finish_and_clear();
    }
    Ok(text)
}

/// Map CLI args to `RelayConfig`.
async fn build_relay_config(args: &LlmArgs) -> Result<RelayConfig> {
    let mut builder = RelayConfig::builder()
        .max_context_chars(args.max_context_chars)
        .emission(if args.per_char {
            Emission::PerChar
        } else {
            Emission::Chunk
        });

    if let Some(ref url) = args.api_url {
        builder = builder.endpoint(url.clone());
    }
    if let Some(ref model) = args.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref key) = args.api_key {
        builder = builder.api_key(key.clone());
    }
    if let Some(secs) = args.idle_timeout {
        builder = builder.idle_timeout(Duration::from_secs(secs));
    }
    if let Some(secs) = args.connect_timeout {
        builder = builder.connect_timeout(Duration::from_secs(secs));
    }
    if let Some(ref path) = args.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }

    builder.build().context("Invalid LLM configuration")
}

/// Map CLI args to `ExtractConfig`.
fn build_extract_config(args: &OcrArgs) -> Result<ExtractConfig, Pdf2ExamError> {
    let mut builder = ExtractConfig::builder()
        .min_text_chars(args.min_text_chars)
        .ocr_dpi(args.ocr_dpi)
        .ocr_languages(args.ocr_languages.clone());

    if let Some(ref cmd) = args.tesseract_cmd {
        builder = builder.tesseract_cmd(cmd.clone());
    }
    if let Some(ref pwd) = args.password {
        builder = builder.password(pwd.clone());
    }
    if let Some(ref lib) = args.pdfium_lib {
        builder = builder.pdfium_lib(lib.clone());
    }

    builder.build()
}
