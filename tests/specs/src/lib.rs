// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Integration harness: a minimal owserver-protocol stand-in, driven over a
//! real TCP socket, for exercising `owmaster-core`'s bus/device/dispatcher
//! stack end to end without a live `owserver`.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const MSG_READ: i32 = 2;
const MSG_WRITE: i32 = 3;
const MSG_DIRALL: i32 = 7;

/// What a single `DIRALL` request gets back: a path list, or a dropped
/// connection to simulate a scan-time connection failure.
pub enum DirReply {
    Paths(Vec<String>),
    Fail,
}

/// Shared, mutable script the fake server consults on each request.
#[derive(Default)]
pub struct Script {
    pub dir_replies: Mutex<VecDeque<DirReply>>,
    pub reads: Mutex<HashMap<String, String>>,
    pub writes: Mutex<Vec<(String, String)>>,
}

impl Script {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_dir(&self, paths: Vec<String>) {
        self.dir_replies.lock().unwrap_or_else(|e| e.into_inner()).push_back(DirReply::Paths(paths));
    }

    pub fn push_dir_failure(&self) {
        self.dir_replies.lock().unwrap_or_else(|e| e.into_inner()).push_back(DirReply::Fail);
    }

    pub fn set_read(&self, path: &str, value: &str) {
        self.reads.lock().unwrap_or_else(|e| e.into_inner()).insert(path.to_owned(), value.to_owned());
    }

    pub fn recorded_writes(&self) -> Vec<(String, String)> {
        self.writes.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// A fake owserver bound to an ephemeral local port. Accepts connections for
/// as long as it's alive and dispatches requests against its [`Script`].
pub struct FakeOwserver {
    pub port: u16,
}

impl FakeOwserver {
    pub async fn spawn(script: Arc<Script>) -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else { return };
                let script = script.clone();
                tokio::spawn(async move {
                    let _ = serve_connection(stream, script).await;
                });
            }
        });

        Ok(Self { port })
    }
}

async fn read_header(stream: &mut tokio::net::TcpStream) -> anyhow::Result<[i32; 6]> {
    let mut buf = [0u8; 24];
    stream.read_exact(&mut buf).await?;
    let read_i32 = |r: std::ops::Range<usize>| i32::from_be_bytes(buf[r].try_into().unwrap());
    Ok([
        read_i32(0..4),
        read_i32(4..8),
        read_i32(8..12),
        read_i32(12..16),
        read_i32(16..20),
        read_i32(20..24),
    ])
}

fn write_header(version: i32, payload_len: i32, msg_type: i32, control_flags: i32, size: i32, offset: i32) -> [u8; 24] {
    let mut buf = [0u8; 24];
    buf[0..4].copy_from_slice(&version.to_be_bytes());
    buf[4..8].copy_from_slice(&payload_len.to_be_bytes());
    buf[8..12].copy_from_slice(&msg_type.to_be_bytes());
    buf[12..16].copy_from_slice(&control_flags.to_be_bytes());
    buf[16..20].copy_from_slice(&size.to_be_bytes());
    buf[20..24].copy_from_slice(&offset.to_be_bytes());
    buf
}

async fn serve_connection(mut stream: tokio::net::TcpStream, script: Arc<Script>) -> anyhow::Result<()> {
    loop {
        let header = match read_header(&mut stream).await {
            Ok(h) => h,
            Err(_) => return Ok(()),
        };
        let [_version, payload_len, msg_type, control_flags, _size, _offset] = header;

        let mut payload = vec![0u8; payload_len.max(0) as usize];
        if !payload.is_empty() {
            stream.read_exact(&mut payload).await?;
        }
        let nul_at = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
        let path = String::from_utf8_lossy(&payload[..nul_at]).into_owned();
        let data = if nul_at + 1 < payload.len() { &payload[nul_at + 1..] } else { &[] };

        match msg_type {
            MSG_DIRALL => {
                let reply = script.dir_replies.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
                match reply {
                    Some(DirReply::Paths(paths)) => {
                        let body = paths.join(",");
                        let mut resp = write_header(0, body.len() as i32, msg_type, control_flags, 0, 0).to_vec();
                        resp.extend_from_slice(body.as_bytes());
                        stream.write_all(&resp).await?;
                    }
                    Some(DirReply::Fail) | None => return Ok(()),
                }
            }
            MSG_READ => {
                let value = script.reads.lock().unwrap_or_else(|e| e.into_inner()).get(&path).cloned();
                match value {
                    Some(v) => {
                        let mut body = v.into_bytes();
                        body.push(0);
                        let mut resp = write_header(0, body.len() as i32, msg_type, control_flags, 0, 0).to_vec();
                        resp.extend_from_slice(&body);
                        stream.write_all(&resp).await?;
                    }
                    None => return Ok(()),
                }
            }
            MSG_WRITE => {
                script
                    .writes
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push((path, String::from_utf8_lossy(data).into_owned()));
                let resp = write_header(0, 0, msg_type, control_flags, 0, 0);
                stream.write_all(&resp).await?;
            }
            other => anyhow::bail!("fake owserver received unsupported message type {other}"),
        }
    }
}

/// Makes a raw HTTP/1.1 GET request over a plain TCP socket, returning the
/// response body. Avoids pulling in an HTTP client crate for a single-route
/// test fixture.
pub async fn tcp_http_get(addr: std::net::SocketAddr, path: &str) -> anyhow::Result<String> {
    let mut stream = tokio::net::TcpStream::connect(addr).await?;
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await?;

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    let response = String::from_utf8(buf)?;

    Ok(response.split_once("\r\n\r\n").map(|(_, b)| b).unwrap_or("").to_owned())
}

/// Collects dispatched events for assertion.
#[derive(Clone, Default)]
pub struct RecordingHandler {
    pub events: Arc<Mutex<Vec<owmaster_core::Event>>>,
}

impl owmaster_core::EventHandler for RecordingHandler {
    fn handle_event(&mut self, event: &owmaster_core::Event) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).push(event.clone());
    }
}
