//! Wire protocol: split the upstream byte stream into lines and interpret each
//! line as one event.
//!
//! The upstream speaks a Server-Sent-Events flavoured line protocol:
//!
//! ```text
//! : keep-alive
//! data: {"choices":[{"delta":{"content":"Hi"}}]}
//!
//! data: {"response":" there"}
//! data: [DONE]
//! ```
//!
//! Only `data:` lines matter. Their payload is either the `[DONE]` sentinel or
//! a JSON object whose shape depends on the vendor. Rather than branching on
//! vendor, [`FRAGMENT_EXTRACTORS`] lists one small function per known shape;
//! the first one that matches wins. Supporting a new vendor means appending a
//! function.

use serde_json::Value;

/// Prefix marking a data record.
pub const DATA_PREFIX: &str = "data:";

/// Payload signalling that the upstream has finished.
pub const DONE_MARKER: &str = "[DONE]";

/// One interpreted protocol line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    /// Empty or whitespace-only line (SSE event separator).
    Blank,
    /// Any non-`data:` line: comments, keep-alives, `event:` / `id:` fields.
    Comment,
    /// The `[DONE]` sentinel.
    Done,
    /// A non-empty piece of generated text.
    Fragment(String),
    /// An `error` field reported by the upstream.
    StreamError(String),
    /// Valid JSON that carries no text (role announcements, usage, finish).
    NoContent,
    /// A `data:` payload that is not valid JSON.
    Unparseable { payload: String, detail: String },
}

/// Reads generated text from one known record shape.
///
/// Returns `None` when the record is not of this shape, and `Some("")` when it
/// is but carries no text (role announcements, finish records).
pub type FragmentExtractor = fn(&Value) -> Option<&str>;

/// Known record shapes, tried in order. A shape is recognised by its top-level
/// key alone, so a recognised shape without text still stops the search.
///
/// Every shape must arrive as a `data:` record. Bare NDJSON lines, as sent by
/// Ollama's native `/api/chat` and `/api/generate`, are not recognised.
///
/// | Shape | Seen from |
/// |-------|-----------|
/// | `choices[0].delta.content` | OpenAI and compatibles (vLLM, LiteLLM, LM Studio, Ollama `/v1`) |
/// | `message.content` | Ollama chat records relayed as SSE |
/// | `response` | Ollama generate records relayed as SSE |
pub const FRAGMENT_EXTRACTORS: &[FragmentExtractor] =
    &[delta_content, message_content, response_text];

fn delta_content(record: &Value) -> Option<&str> {
    let choices = record.get("choices")?;
    Some(
        choices
            .get(0)
            .and_then(|c| c.get("delta"))
            .and_then(|d| d.get("content"))
            .and_then(Value::as_str)
            .unwrap_or_default(),
    )
}

fn message_content(record: &Value) -> Option<&str> {
    let message = record.get("message")?;
    Some(
        message
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default(),
    )
}

fn response_text(record: &Value) -> Option<&str> {
    Some(record.get("response")?.as_str().unwrap_or_default())
}

/// Run [`FRAGMENT_EXTRACTORS`] against a decoded record.
pub fn extract_fragment(record: &Value) -> Option<&str> {
    FRAGMENT_EXTRACTORS.iter().find_map(|extract| extract(record))
}

/// Read the upstream's `error` field, if any.
///
/// Accepts a bare string or an OpenAI-style `{"message": ...}` object; other
/// values are rendered as compact JSON. `null` counts as absent.
pub fn error_message(record: &Value) -> Option<String> {
    match record.get("error")? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => Some(
            obj.get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| Value::Object(obj.clone()).to_string()),
        ),
        other => Some(other.to_string()),
    }
}

/// Interpret one complete line (without its terminating newline).
pub fn classify_line(line: &str) -> LineEvent {
    let line = line.trim();
    if line.is_empty() {
        return LineEvent::Blank;
    }

    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return LineEvent::Comment;
    };
    let payload = payload.trim();

    if payload == DONE_MARKER {
        return LineEvent::Done;
    }

    let record: Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(e) => {
            return LineEvent::Unparseable {
                payload: payload.to_string(),
                detail: e.to_string(),
            }
        }
    };

    if let Some(text) = extract_fragment(&record) {
        return if text.is_empty() {
            LineEvent::NoContent
        } else {
            LineEvent::Fragment(text.to_string())
        };
    }

    match error_message(&record) {
        Some(msg) => LineEvent::StreamError(msg),
        None => LineEvent::NoContent,
    }
}

/// Accumulates raw bytes and hands out complete lines.
///
/// Network chunks do not respect line (or even UTF-8 character) boundaries,
/// so bytes are kept until a `\n` arrives; only then is the line decoded.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
    /// Bytes before this offset are known to contain no `\n`.
    scanned: usize,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a network chunk.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pop the next complete line, without its `\n`.
    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        let pos = self.buf[self.scanned..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|p| p + self.scanned);

        match pos {
            Some(pos) => {
                let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
                line.pop();
                self.scanned = 0;
                Some(line)
            }
            None => {
                self.scanned = self.buf.len();
                None
            }
        }
    }

    /// Take whatever is left once the upstream has closed; a final record is
    /// not required to end with a newline.
    pub fn take_remainder(&mut self) -> Option<Vec<u8>> {
        self.scanned = 0;
        if self.buf.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buf))
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn blank_and_comment_lines() {
        assert_eq!(classify_line(""), LineEvent::Blank);
        assert_eq!(classify_line("  \r"), LineEvent::Blank);
        assert_eq!(classify_line(": keep-alive"), LineEvent::Comment);
        assert_eq!(classify_line("event: message"), LineEvent::Comment);
        assert_eq!(classify_line("id: 7"), LineEvent::Comment);
    }

    #[test]
    fn done_marker_with_and_without_space() {
        assert_eq!(classify_line("data: [DONE]"), LineEvent::Done);
        assert_eq!(classify_line("data:[DONE]"), LineEvent::Done);
        assert_eq!(classify_line("data: [DONE]\r"), LineEvent::Done);
    }

    #[test]
    fn openai_delta() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#;
        assert_eq!(classify_line(line), LineEvent::Fragment("Hi".into()));
    }

    #[test]
    fn ollama_shapes() {
        assert_eq!(
            classify_line(r#"data: {"message":{"role":"assistant","content":"a"}}"#),
            LineEvent::Fragment("a".into())
        );
        assert_eq!(
            classify_line(r#"data: {"response":"ok","done":false}"#),
            LineEvent::Fragment("ok".into())
        );
    }

    #[test]
    fn first_matching_shape_wins() {
        let record = json!({
            "choices": [{"delta": {"content": "delta"}}],
            "response": "response"
        });
        assert_eq!(extract_fragment(&record), Some("delta"));
    }

    #[test]
    fn role_only_delta_has_no_content() {
        let line = r#"data: {"choices":[{"delta":{"role":"assistant","content":null}}]}"#;
        assert_eq!(classify_line(line), LineEvent::NoContent);
        let finish = r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#;
        assert_eq!(classify_line(finish), LineEvent::NoContent);
    }

    #[test]
    fn recognised_shape_without_text_hides_error_field() {
        let line = r#"data: {"choices":[{"delta":{}}],"error":"x"}"#;
        assert_eq!(classify_line(line), LineEvent::NoContent);
        let line = r#"data: {"message":{"role":"assistant"},"error":"x"}"#;
        assert_eq!(classify_line(line), LineEvent::NoContent);
        assert_eq!(
            extract_fragment(&json!({"choices": [], "response": "late"})),
            Some("")
        );
    }

    #[test]
    fn empty_content_is_not_a_fragment() {
        assert_eq!(
            classify_line(r#"data: {"response":""}"#),
            LineEvent::NoContent
        );
    }

    #[test]
    fn error_envelopes() {
        assert_eq!(
            classify_line(r#"data: {"error":"overloaded"}"#),
            LineEvent::StreamError("overloaded".into())
        );
        assert_eq!(
            classify_line(r#"data: {"error":{"message":"quota","type":"x"}}"#),
            LineEvent::StreamError("quota".into())
        );
        assert_eq!(
            classify_line(r#"data: {"error":{"code":429}}"#),
            LineEvent::StreamError(r#"{"code":429}"#.into())
        );
        assert_eq!(classify_line(r#"data: {"error":null}"#), LineEvent::NoContent);
    }

    #[test]
    fn malformed_json_is_unparseable() {
        match classify_line("data: {not json") {
            LineEvent::Unparseable { payload, .. } => assert_eq!(payload, "{not json"),
            other => panic!("expected Unparseable, got {other:?}"),
        }
    }

    #[test]
    fn non_object_json_has_no_content() {
        assert_eq!(classify_line("data: 42"), LineEvent::NoContent);
    }

    #[test]
    fn line_buffer_reassembles_split_lines() {
        let mut buf = LineBuffer::new();
        buf.push(b"data: {\"resp");
        assert_eq!(buf.next_line(), None);
        buf.push(b"onse\":\"x\"}\ndata: [DO");
        assert_eq!(
            buf.next_line().as_deref(),
            Some(&b"data: {\"response\":\"x\"}"[..])
        );
        assert_eq!(buf.next_line(), None);
        buf.push(b"NE]\n\n");
        assert_eq!(buf.next_line().as_deref(), Some(&b"data: [DONE]"[..]));
        assert_eq!(buf.next_line().as_deref(), Some(&b""[..]));
        assert!(buf.is_empty());
    }

    #[test]
    fn line_buffer_keeps_split_utf8_intact() {
        let text = "data: {\"response\":\"試卷\"}\n".as_bytes();
        let mut buf = LineBuffer::new();
        // Split inside the first multi-byte character.
        buf.push(&text[..21]);
        assert_eq!(buf.next_line(), None);
        buf.push(&text[21..]);
        let line = String::from_utf8(buf.next_line().unwrap()).unwrap();
        assert_eq!(classify_line(&line), LineEvent::Fragment("試卷".into()));
    }

    #[test]
    fn remainder_without_newline() {
        let mut buf = LineBuffer::new();
        buf.push(b"data: [DONE]");
        assert_eq!(buf.next_line(), None);
        assert_eq!(buf.take_remainder().as_deref(), Some(&b"data: [DONE]"[..]));
        assert_eq!(buf.take_remainder(), None);
    }
}
