// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Minimal owserver network protocol client (C2, ambient — the distilled
//! spec treats this as an external dependency, but no such crate exists in
//! the Rust ecosystem, so this module owns the wire framing described in
//! spec §6).
//!
//! owserver messages are a fixed 24-byte big-endian header followed by a
//! NUL-terminated payload. This client implements just the subset this
//! daemon uses: `READ`, `WRITE`, `DIRALL`.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{OwError, OwResult};

const MSG_READ: i32 = 2;
const MSG_WRITE: i32 = 3;
const MSG_DIRALL: i32 = 7;

/// `SimpleOnly`: don't return alias-derived paths; matches the owserver
/// default we rely on for canonical IDs (see owidutil grounding notes).
const CONTROL_FLAGS: i32 = 0x0000_0102;
const MAX_READ_SIZE: i32 = 65536;

#[derive(Debug)]
struct Header {
    version: i32,
    payload_len: i32,
    msg_type: i32,
    control_flags: i32,
    size: i32,
    offset: i32,
}

impl Header {
    fn to_bytes(&self) -> [u8; 24] {
        let mut buf = [0u8; 24];
        buf[0..4].copy_from_slice(&self.version.to_be_bytes());
        buf[4..8].copy_from_slice(&self.payload_len.to_be_bytes());
        buf[8..12].copy_from_slice(&self.msg_type.to_be_bytes());
        buf[12..16].copy_from_slice(&self.control_flags.to_be_bytes());
        buf[16..20].copy_from_slice(&self.size.to_be_bytes());
        buf[20..24].copy_from_slice(&self.offset.to_be_bytes());
        buf
    }

    fn from_bytes(buf: &[u8; 24]) -> Self {
        let read_i32 = |r: std::ops::Range<usize>| i32::from_be_bytes(buf[r].try_into().unwrap_or([0; 4]));
        Self {
            version: read_i32(0..4),
            payload_len: read_i32(4..8),
            msg_type: read_i32(8..12),
            control_flags: read_i32(12..16),
            size: read_i32(16..20),
            offset: read_i32(20..24),
        }
    }
}

/// A single serialized connection to an owserver instance.
///
/// All operations borrow `&mut self`, which combined with the orchestrator
/// owning the only handle to this client enforces the "strictly serialized,
/// no concurrent access" rule from spec §4.2.
pub struct OwserverClient {
    host: String,
    port: u16,
    conn: Option<TcpStream>,
}

impl OwserverClient {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            conn: None,
        }
    }

    async fn ensure_connected(&mut self) -> OwResult<&mut TcpStream> {
        if self.conn.is_none() {
            let addr = format!("{}:{}", self.host, self.port);
            let stream = TcpStream::connect(&addr)
                .await
                .map_err(|e| OwError::connection(format!("connect to {addr}: {e}")))?;
            self.conn = Some(stream);
        }
        #[allow(clippy::unwrap_used)]
        Ok(self.conn.as_mut().unwrap())
    }

    fn drop_connection(&mut self) {
        self.conn = None;
    }

    async fn roundtrip(&mut self, msg_type: i32, path: &str, data: &[u8], size: i32) -> OwResult<(Header, Vec<u8>)> {
        let mut payload = Vec::with_capacity(path.len() + 1 + data.len());
        payload.extend_from_slice(path.as_bytes());
        payload.push(0);
        payload.extend_from_slice(data);

        let req = Header {
            version: 0,
            payload_len: payload.len() as i32,
            msg_type,
            control_flags: CONTROL_FLAGS,
            size,
            offset: 0,
        };

        let result = self.send_and_receive(&req, &payload).await;
        if result.is_err() {
            // Any I/O failure invalidates the connection; the next call
            // reconnects transparently.
            self.drop_connection();
        }
        result
    }

    async fn send_and_receive(&mut self, req: &Header, payload: &[u8]) -> OwResult<(Header, Vec<u8>)> {
        let conn = self.ensure_connected().await?;

        conn.write_all(&req.to_bytes())
            .await
            .map_err(|e| OwError::connection(format!("write header: {e}")))?;
        conn.write_all(payload)
            .await
            .map_err(|e| OwError::connection(format!("write payload: {e}")))?;

        let mut resp_buf = [0u8; 24];
        conn.read_exact(&mut resp_buf)
            .await
            .map_err(|e| OwError::connection(format!("read response header: {e}")))?;
        let resp = Header::from_bytes(&resp_buf);

        if resp.payload_len < 0 {
            return Err(OwError::protocol(format!(
                "owserver returned error payload_len={}",
                resp.payload_len
            )));
        }

        let mut body = vec![0u8; resp.payload_len as usize];
        if !body.is_empty() {
            conn.read_exact(&mut body)
                .await
                .map_err(|e| OwError::connection(format!("read response body: {e}")))?;
        }

        Ok((resp, body))
    }

    /// Read an attribute at `path`. `uncached` selects the `/uncached`
    /// namespace prefix.
    pub async fn read(&mut self, path: &str) -> OwResult<String> {
        let (_, body) = self.roundtrip(MSG_READ, path, &[], MAX_READ_SIZE).await?;
        bytes_to_string(body)
    }

    /// Write `data` to the attribute at `path`.
    pub async fn write(&mut self, path: &str, data: &str) -> OwResult<()> {
        let bytes = data.as_bytes();
        self.roundtrip(MSG_WRITE, path, bytes, bytes.len() as i32).await?;
        Ok(())
    }

    /// Enumerate child paths under `path` (e.g. `/` or `/alarm`).
    pub async fn dir(&mut self, path: &str) -> OwResult<Vec<String>> {
        let (_, body) = self.roundtrip(MSG_DIRALL, path, &[], 0).await?;
        let text = bytes_to_string(body)?;
        if text.is_empty() {
            return Ok(Vec::new());
        }
        Ok(text.split(',').map(str::to_owned).collect())
    }
}

fn bytes_to_string(mut body: Vec<u8>) -> OwResult<String> {
    if let Some(pos) = body.iter().position(|&b| b == 0) {
        body.truncate(pos);
    }
    String::from_utf8(body).map_err(|e| OwError::protocol(format!("non-utf8 payload: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrips_through_bytes() {
        let h = Header {
            version: 0,
            payload_len: 42,
            msg_type: MSG_READ,
            control_flags: CONTROL_FLAGS,
            size: MAX_READ_SIZE,
            offset: 0,
        };
        let bytes = h.to_bytes();
        let back = Header::from_bytes(&bytes);
        assert_eq!(back.payload_len, 42);
        assert_eq!(back.msg_type, MSG_READ);
        assert_eq!(back.size, MAX_READ_SIZE);
    }

    #[test]
    fn bytes_to_string_truncates_at_nul() {
        let mut v = b"22.5".to_vec();
        v.push(0);
        v.extend_from_slice(b"garbage");
        assert_eq!(bytes_to_string(v).unwrap(), "22.5");
    }
}
