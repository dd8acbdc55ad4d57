//! The streaming relay: one POST to the LLM endpoint, answer relayed as it is
//! generated.
//!
//! ## Why fragments instead of `Result`s?
//!
//! The consumer is an HTTP response (or stdout) that has usually started
//! flushing by the time anything can go wrong. There is no status code left to
//! change, so every failure is converted to text and delivered as the last
//! fragment of the stream. [`FragmentStream`] is therefore a plain stream of
//! `String`, and it never panics or errors past this module.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle ─▶ Connecting ─┬─▶ transport fault ──────────────▶ [fault] ─▶ end
//!                     ├─▶ non-2xx status ───────────────▶ [status + body] ─▶ end
//!                     └─▶ Streaming ─▶ read line ─┬─ blank / comment / unparseable ─▶ loop
//!                                                 ├─ fragment / error envelope ─▶ emit, loop
//!                                                 ├─ [DONE] / EOF ─▶ end
//!                                                 └─ transport fault ─▶ [fault] ─▶ end
//! ```
//!
//! The open response is owned by the stream state. It is dropped, and the
//! connection released, exactly once: when the stream ends or when the
//! consumer drops it early (client disconnect).

use crate::config::{Emission, RelayConfig};
use crate::error::{Pdf2ExamError, RelayError};
use crate::pipeline::compose::{compose, ChatRequest};
use crate::pipeline::protocol::{classify_line, LineBuffer, LineEvent};
use futures::future;
use futures::stream::{self, StreamExt};
use reqwest::header::CONTENT_TYPE;
use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::time::Duration;
use tokio_stream::Stream;
use tracing::{debug, info, warn};

/// A boxed stream of answer fragments, in upstream order.
pub type FragmentStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// Streaming client for one configured LLM endpoint.
///
/// Cheap to clone; clones share the underlying connection pool. Each call to
/// [`Relay::stream`] is independent.
#[derive(Clone, Debug)]
pub struct Relay {
    config: RelayConfig,
    client: reqwest::Client,
}

impl Relay {
    /// Build a relay. The HTTP client deliberately has no overall timeout.
    pub fn new(config: RelayConfig) -> Result<Self, Pdf2ExamError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| Pdf2ExamError::Internal(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Ask the model to act on `instruction` over `text`, streaming the answer.
    ///
    /// Nothing happens until the returned stream is polled. If the endpoint or
    /// model is not configured the stream yields a single configuration-error
    /// fragment without touching the network.
    pub fn stream(&self, text: &str, instruction: &str) -> FragmentStream {
        let missing = self.config.missing_settings();
        if !missing.is_empty() {
            let err = RelayError::Configuration {
                missing: missing.join(", "),
            };
            warn!("{err}");
            return Box::pin(stream::once(future::ready(err.to_string())));
        }

        let endpoint = self.config.endpoint.clone().unwrap_or_default();
        let model = self.config.model.as_deref().unwrap_or_default();
        let request = compose(text, instruction, model, &self.config);
        let client = self.client.clone();
        let api_key = self.config.api_key.clone();
        let options = BodyOptions::from(&self.config);

        let fragments = stream::once(async move {
            info!(
                "Sending request to LLM API: {} (model: {})",
                endpoint, request.model
            );
            open(&client, &endpoint, api_key.as_deref(), &request).await
        })
        .flat_map(move |opened| match opened {
            Ok(response) => {
                let body = response
                    .bytes_stream()
                    .map(|chunk| chunk.map_err(|e| RelayError::from_transport(&e)));
                relay_body(body, options).boxed()
            }
            Err(err) => {
                warn!("{err}");
                stream::once(future::ready(err.to_string())).boxed()
            }
        });

        Box::pin(guard_panics(fragments))
    }
}

/// Send the request and check the initial status.
async fn open(
    client: &reqwest::Client,
    endpoint: &str,
    api_key: Option<&str>,
    request: &ChatRequest,
) -> Result<reqwest::Response, RelayError> {
    let body = serde_json::to_vec(request).map_err(|e| RelayError::Internal {
        detail: format!("failed to serialise request: {e}"),
    })?;

    let mut builder = client
        .post(endpoint)
        .header(CONTENT_TYPE, "application/json")
        .body(body);
    if let Some(key) = api_key {
        builder = builder.bearer_auth(key);
    }

    let response = builder
        .send()
        .await
        .map_err(|e| RelayError::from_transport(&e))?;

    let status = response.status();
    if !status.is_success() {
        // The body is the only useful diagnostic; read all of it.
        let body = match response.bytes().await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => format!("<unreadable error body: {e}>"),
        };
        return Err(RelayError::UpstreamStatus {
            status: status.as_u16(),
            body,
        });
    }

    debug!("Connected to LLM stream (status {})", status);
    Ok(response)
}

/// Per-call settings for [`relay_body`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BodyOptions {
    pub emission: Emission,
    pub idle_timeout: Option<Duration>,
}

impl From<&RelayConfig> for BodyOptions {
    fn from(config: &RelayConfig) -> Self {
        Self {
            emission: config.emission,
            idle_timeout: config.idle_timeout,
        }
    }
}

/// Turn an upstream body into answer fragments.
///
/// `body` yields raw chunks with arbitrary boundaries; a read error ends the
/// stream after one fault fragment. Exposed separately from [`Relay`] so the
/// protocol handling can be driven by any byte source.
pub fn relay_body<S, B>(body: S, options: BodyOptions) -> impl Stream<Item = String> + Send
where
    S: Stream<Item = Result<B, RelayError>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let state = BodyState {
        body: Box::pin(body),
        lines: LineBuffer::new(),
        pending: VecDeque::new(),
        options,
        upstream_closed: false,
        finished: false,
        emitted: 0,
    };
    stream::unfold(state, |st| next_fragment(st))
}

struct BodyState<S> {
    body: Pin<Box<S>>,
    lines: LineBuffer,
    /// Fragments decoded but not yet handed out (more than one only in
    /// per-character mode).
    pending: VecDeque<String>,
    options: BodyOptions,
    upstream_closed: bool,
    finished: bool,
    emitted: usize,
}

async fn next_fragment<S, B>(mut st: BodyState<S>) -> Option<(String, BodyState<S>)>
where
    S: Stream<Item = Result<B, RelayError>>,
    B: AsRef<[u8]>,
{
    loop {
        if let Some(fragment) = st.pending.pop_front() {
            st.emitted += 1;
            return Some((fragment, st));
        }
        if st.finished {
            return None;
        }

        if let Some(line) = st.lines.next_line() {
            st.handle_line(line);
            continue;
        }

        if st.upstream_closed {
            if let Some(rest) = st.lines.take_remainder() {
                st.handle_line(rest);
            }
            debug!("LLM stream ended without [DONE]");
            st.finished = true;
            continue;
        }

        match st.read_chunk().await {
            Some(Ok(chunk)) => st.lines.push(chunk.as_ref()),
            Some(Err(err)) => {
                warn!("LLM stream failed after {} fragments: {}", st.emitted, err);
                st.fail(err);
            }
            None => st.upstream_closed = true,
        }
    }
}

impl<S> BodyState<S> {
    fn handle_line(&mut self, raw: Vec<u8>) {
        let line = match String::from_utf8(raw) {
            Ok(line) => line,
            Err(e) => {
                warn!("Skipping upstream line that is not valid UTF-8: {e}");
                return;
            }
        };

        match classify_line(&line) {
            LineEvent::Blank | LineEvent::Comment | LineEvent::NoContent => {}
            LineEvent::Done => {
                info!("Received [DONE] signal from LLM API");
                self.finished = true;
            }
            LineEvent::Fragment(text) => self.emit(text),
            LineEvent::StreamError(message) => {
                let err = RelayError::UpstreamStream { message };
                warn!("Error in LLM stream: {err}");
                self.pending.push_back(err.to_string());
            }
            LineEvent::Unparseable { payload, detail } => {
                let err = RelayError::StreamProtocol { detail };
                warn!("{err}; skipping data part '{payload}'");
            }
        }
    }

    fn emit(&mut self, text: String) {
        match self.options.emission {
            Emission::Chunk => self.pending.push_back(text),
            Emission::PerChar => self.pending.extend(text.chars().map(String::from)),
        }
    }

    /// Queue one terminal fragment and stop reading.
    fn fail(&mut self, err: RelayError) {
        self.pending.push_back(err.to_string());
        self.finished = true;
    }
}

impl<S, B> BodyState<S>
where
    S: Stream<Item = Result<B, RelayError>>,
{
    async fn read_chunk(&mut self) -> Option<Result<B, RelayError>> {
        match self.options.idle_timeout {
            None => self.body.next().await,
            Some(after) => match tokio::time::timeout(after, self.body.next()).await {
                Ok(next) => next,
                Err(_) => Some(Err(RelayError::IdleTimeout { after })),
            },
        }
    }
}

impl<S> Drop for BodyState<S> {
    fn drop(&mut self) {
        if self.finished {
            debug!(
                "LLM stream finished after {} fragments; connection released",
                self.emitted
            );
        } else {
            info!(
                "Consumer dropped the LLM stream after {} fragments; closing upstream connection",
                self.emitted
            );
        }
    }
}

/// Convert a panic while producing fragments into one diagnostic fragment.
fn guard_panics<S>(inner: S) -> impl Stream<Item = String> + Send
where
    S: Stream<Item = String> + Send,
{
    AssertUnwindSafe(inner).catch_unwind().map(|item| match item {
        Ok(fragment) => fragment,
        Err(panic) => {
            let err = RelayError::Internal {
                detail: panic_message(panic.as_ref()),
            };
            warn!("{err}");
            err.to_string()
        }
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    type Chunk = Result<Bytes, RelayError>;

    fn ok(s: &str) -> Chunk {
        Ok(Bytes::copy_from_slice(s.as_bytes()))
    }

    fn reset() -> Chunk {
        Err(RelayError::Transport {
            detail: "connection reset by peer".into(),
        })
    }

    async fn run(chunks: Vec<Chunk>) -> Vec<String> {
        relay_body(stream::iter(chunks), BodyOptions::default())
            .collect()
            .await
    }

    #[tokio::test]
    async fn openai_deltas_until_done() {
        let out = run(vec![
            ok("data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n"),
            ok("data: {\"choices\":[{\"delta\":{\"content\":\" there\"}}]}\n"),
            ok("data: [DONE]\n"),
        ])
        .await;
        assert_eq!(out, vec!["Hi", " there"]);
    }

    #[tokio::test]
    async fn done_ignores_trailing_bytes() {
        let out = run(vec![ok(
            "data: {\"response\":\"a\"}\ndata: [DONE]\ndata: {\"response\":\"late\"}\n",
        )])
        .await;
        assert_eq!(out, vec!["a"]);
    }

    #[tokio::test]
    async fn malformed_line_is_skipped() {
        let out = run(vec![
            ok("data: {\"response\":\"1\"}\n"),
            ok("data: {broken\n"),
            ok("data: {\"response\":\"2\"}\n"),
        ])
        .await;
        assert_eq!(out, vec!["1", "2"]);
    }

    #[tokio::test]
    async fn stream_error_then_recovery() {
        let out = run(vec![
            ok("data: {\"error\":\"overloaded\"}\n"),
            ok("data: {\"response\":\"ok\"}\n"),
        ])
        .await;
        assert_eq!(out, vec!["[LLM Stream Error: overloaded]", "ok"]);
    }

    #[tokio::test]
    async fn comments_and_blank_lines_are_ignored() {
        let out = run(vec![ok(
            ": ping\n\nevent: message\ndata: {\"response\":\"x\"}\n\n",
        )])
        .await;
        assert_eq!(out, vec!["x"]);
    }

    #[tokio::test]
    async fn lines_split_across_chunks() {
        let out = run(vec![
            ok("da"),
            ok("ta: {\"message\":{\"content\""),
            ok(":\"題目\"}}\r\n"),
            ok("data: [DONE]"),
        ])
        .await;
        assert_eq!(out, vec!["題目"]);
    }

    #[tokio::test]
    async fn final_line_without_newline_is_processed() {
        let out = run(vec![ok("data: {\"response\":\"end\"}")]).await;
        assert_eq!(out, vec!["end"]);
    }

    #[tokio::test]
    async fn reset_after_two_fragments_keeps_both() {
        let out = run(vec![
            ok("data: {\"response\":\"one\"}\n"),
            ok("data: {\"response\":\"two\"}\n"),
            reset(),
            ok("data: {\"response\":\"never\"}\n"),
        ])
        .await;
        assert_eq!(out.len(), 3);
        assert_eq!(out[0], "one");
        assert_eq!(out[1], "two");
        assert_eq!(out[2], "[LLM 連線錯誤: connection reset by peer]");
    }

    #[tokio::test]
    async fn invalid_utf8_lines_are_skipped() {
        let out = run(vec![
            ok("data:{\"response\":\"a\"}\n"),
            Ok(Bytes::from_static(b": keep-alive \xff\n")),
            ok("data:{\"response\":\"b\"}\n"),
            Ok(Bytes::from_static(b"data:{\"response\":\"\xff\"}\n")),
            ok("data:{\"response\":\"c\"}\n"),
        ])
        .await;
        assert_eq!(out, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn per_char_emission_preserves_order() {
        let options = BodyOptions {
            emission: Emission::PerChar,
            idle_timeout: None,
        };
        let out: Vec<String> = relay_body(
            stream::iter(vec![
                ok("data: {\"response\":\"試卷\"}\n"),
                ok("data: {\"error\":\"x\"}\n"),
                ok("data: {\"response\":\"ok\"}\n"),
            ]),
            options,
        )
        .collect()
        .await;
        assert_eq!(out, vec!["試", "卷", "[LLM Stream Error: x]", "o", "k"]);
    }

    #[tokio::test]
    async fn idle_timeout_ends_stream() {
        let options = BodyOptions {
            emission: Emission::Chunk,
            idle_timeout: Some(Duration::from_millis(50)),
        };
        let body =
            stream::iter(vec![ok("data: {\"response\":\"first\"}\n")]).chain(stream::pending());
        let out: Vec<String> = relay_body(body, options).collect().await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], "first");
        assert!(out[1].starts_with("[LLM 連線逾時:"), "got: {}", out[1]);
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn dropping_consumer_releases_body() {
        let released = Arc::new(AtomicBool::new(false));
        let flag = DropFlag(Arc::clone(&released));
        let body = stream::iter(vec![ok("data: {\"response\":\"a\"}\n")])
            .chain(stream::pending())
            .map(move |chunk| {
                let _held = &flag;
                chunk
            });

        let mut fragments = Box::pin(relay_body(body, BodyOptions::default()));
        assert_eq!(fragments.next().await.as_deref(), Some("a"));
        assert!(!released.load(Ordering::SeqCst));
        drop(fragments);
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn panic_becomes_internal_fragment() {
        let inner = stream::iter(vec!["ok".to_string()]).chain(stream::once(async {
            if true {
                panic!("boom");
            }
            String::new()
        }));
        let out: Vec<String> = guard_panics(inner).collect().await;
        assert_eq!(out, vec!["ok", "[LLM Handler 內部錯誤: boom]"]);
    }

    #[tokio::test]
    async fn missing_config_yields_single_fragment_without_network() {
        let relay = Relay::new(RelayConfig::builder().model("m").build().unwrap()).unwrap();
        let out: Vec<String> = relay.stream("text", "instr").collect().await;
        assert_eq!(out.len(), 1);
        assert!(out[0].contains("LLM_API_URL"), "got: {}", out[0]);
        assert!(!out[0].contains("LLM_MODEL_NAME)"), "got: {}", out[0]);
    }

    #[tokio::test]
    async fn refused_connection_is_a_transport_fragment() {
        let config = RelayConfig::builder()
            .endpoint("http://127.0.0.1:1/v1/chat/completions")
            .model("m")
            .build()
            .unwrap();
        let out: Vec<String> = Relay::new(config).unwrap().stream("t", "i").collect().await;
        assert_eq!(out.len(), 1);
        assert!(out[0].starts_with("[LLM 連線錯誤:"), "got: {}", out[0]);
    }
}
