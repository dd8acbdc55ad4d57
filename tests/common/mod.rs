//! Shared helpers for the integration tests: a scripted LLM upstream on a
//! raw TCP socket.
//!
//! A raw socket rather than an HTTP framework gives byte-level control over
//! chunk boundaries and over how the connection ends (clean EOF, held open
//! after `[DONE]`, or dropped mid-body).

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// How a streamed response finishes.
#[derive(Clone, Copy, Debug)]
pub enum End {
    /// Terminating zero-length chunk, then close.
    Complete,
    /// Never finish; keep the socket open.
    HoldOpen,
    /// Close the socket without the terminating chunk.
    Drop,
}

/// What the upstream answers with.
#[derive(Clone, Debug)]
pub enum Script {
    /// `200` with a chunked body, one chunk per element.
    Stream { chunks: Vec<String>, end: End },
    /// A plain non-streaming response.
    Status { code: u16, body: String },
}

impl Script {
    pub fn stream<I, S>(chunks: I, end: End) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Script::Stream {
            chunks: chunks.into_iter().map(Into::into).collect(),
            end,
        }
    }
}

/// One request as the upstream saw it.
#[derive(Clone, Debug)]
pub struct CapturedRequest {
    /// Request line and headers as sent.
    pub head: String,
    pub body: Vec<u8>,
}

impl CapturedRequest {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("request body is JSON")
    }

    pub fn header(&self, name: &str) -> Option<String> {
        let prefix = format!("{}:", name.to_ascii_lowercase());
        self.head
            .lines()
            .find(|l| l.to_ascii_lowercase().starts_with(&prefix))
            .map(|l| l[prefix.len()..].trim().to_string())
    }
}

pub struct MockUpstream {
    pub url: String,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
}

impl MockUpstream {
    /// Serve `script` to every connection on a fresh `127.0.0.1` port.
    pub async fn start(script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let requests = Arc::new(Mutex::new(Vec::new()));

        let captured = requests.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let script = script.clone();
                let captured = captured.clone();
                tokio::spawn(async move {
                    let _ = handle(socket, script, captured).await;
                });
            }
        });

        Self {
            url: format!("http://127.0.0.1:{port}/v1/chat/completions"),
            requests,
        }
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

async fn handle(
    mut socket: TcpStream,
    script: Script,
    captured: Arc<Mutex<Vec<CapturedRequest>>>,
) -> std::io::Result<()> {
    let request = read_request(&mut socket).await?;
    captured.lock().unwrap().push(request);

    match script {
        Script::Status { code, body } => {
            let response = format!(
                "HTTP/1.1 {code} Error\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await?;
            socket.flush().await?;
        }
        Script::Stream { chunks, end } => {
            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n",
                )
                .await?;
            for chunk in chunks {
                let framed = format!("{:x}\r\n{}\r\n", chunk.len(), chunk);
                socket.write_all(framed.as_bytes()).await?;
                socket.flush().await?;
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            match end {
                End::Complete => {
                    socket.write_all(b"0\r\n\r\n").await?;
                    socket.flush().await?;
                }
                End::HoldOpen => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                }
                End::Drop => {}
            }
        }
    }
    Ok(())
}

/// Read the head and a `Content-Length` body.
async fn read_request(socket: &mut TcpStream) -> std::io::Result<CapturedRequest> {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 4096];

    let head_end = loop {
        let n = socket.read(&mut tmp).await?;
        if n == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        buf.extend_from_slice(&tmp[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let content_length = head
        .lines()
        .find_map(|l| {
            let lower = l.to_ascii_lowercase();
            lower
                .strip_prefix("content-length:")
                .and_then(|v| v.trim().parse::<usize>().ok())
        })
        .unwrap_or(0);

    while buf.len() < head_end + content_length {
        let n = socket.read(&mut tmp).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&tmp[..n]);
    }

    Ok(CapturedRequest {
        head,
        body: buf[head_end..].to_vec(),
    })
}

/// One OpenAI-style content event.
pub fn delta(content: &str) -> String {
    format!(
        "data: {}\n\n",
        serde_json::json!({"choices": [{"delta": {"content": content}}]})
    )
}
