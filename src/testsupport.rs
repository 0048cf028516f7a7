//! Shared test fixtures: a scripted HTTP stub server and gzip helpers.

use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::VecDeque;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Minimal scripted HTTP server for exercising the fetch protocol.
///
/// Each connection consumes the next scripted `(status, body)` reply; once
/// the script runs out, every further request gets an empty 404. Request
/// heads are recorded for assertions.
pub struct StubServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
}

impl StubServer {
    pub async fn spawn(script: Vec<(u16, Vec<u8>)>) -> Self {
        Self::spawn_with_truncation(script, None).await
    }

    /// Like [`StubServer::spawn`], but the reply at script index
    /// `truncate.0` advertises its full body length and then delivers only
    /// the first `truncate.1` bytes before closing the socket.
    pub async fn spawn_with_truncation(
        script: Vec<(u16, Vec<u8>)>,
        truncate: Option<(usize, usize)>,
    ) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));

        let recorded = requests.clone();
        tokio::spawn(async move {
            let mut script: VecDeque<(u16, Vec<u8>)> = script.into();
            let mut served = 0usize;
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };

                let head = read_request_head(&mut socket).await;
                recorded.lock().unwrap().push(head);

                let (status, body) = script.pop_front().unwrap_or((404, Vec::new()));
                let deliver = match truncate {
                    Some((index, keep)) if index == served => &body[..keep.min(body.len())],
                    _ => &body[..],
                };

                let response_head = format!(
                    "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    status,
                    reason(status),
                    body.len()
                );
                let _ = socket.write_all(response_head.as_bytes()).await;
                let _ = socket.write_all(deliver).await;
                let _ = socket.shutdown().await;
                served += 1;
            }
        });

        Self { addr, requests }
    }

    /// Base URL of the stub.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Snapshot of the request heads received so far.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

async fn read_request_head(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 256];
    loop {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        206 => "Partial Content",
        404 => "Not Found",
        416 => "Range Not Satisfiable",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// Gzip-compress the given lines into one JSON-lines archive object.
pub fn gzip_lines(lines: &[&str]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    for line in lines {
        encoder.write_all(line.as_bytes()).unwrap();
        encoder.write_all(b"\n").unwrap();
    }
    encoder.finish().unwrap()
}

/// A gzip object cut off mid-stream, as a truncated transfer would leave it.
pub fn corrupt_gzip_lines(lines: &[&str], keep: usize) -> Vec<u8> {
    let mut bytes = gzip_lines(lines);
    bytes.truncate(keep.min(bytes.len()));
    bytes
}
