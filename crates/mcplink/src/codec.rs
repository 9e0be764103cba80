//! Newline-delimited JSON-RPC framing.
//!
//! [`encode`] and [`decode`] convert between one envelope and its JSON bytes.
//! [`JsonRpcCodec`] adds line framing for byte streams (stdio, child pipes,
//! in-memory duplexes).

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    error::{Error, Result},
    schema::JSONRPCMessage,
};

/// Largest frame accepted before the stream is considered broken.
pub const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

/// Serialize one envelope to JSON bytes, without framing.
pub fn encode(message: &JSONRPCMessage) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(message)?)
}

/// Parse one envelope from JSON bytes.
pub fn decode(bytes: &[u8]) -> Result<JSONRPCMessage> {
    serde_json::from_slice(bytes).map_err(|e| Error::malformed(e.to_string()))
}

/// Line codec for JSON-RPC envelopes.
///
/// A line that fails to decode is yielded as `Some(Err(MalformedMessage))`
/// rather than as a codec error, so one bad line does not end the stream.
/// Only I/O failures and oversized frames are codec errors.
#[derive(Debug, Default)]
pub struct JsonRpcCodec {
    /// Offset already scanned for a newline, so rescans start where the last
    /// one stopped.
    next_index: usize,
}

impl JsonRpcCodec {
    /// A codec with an empty line buffer.
    pub fn new() -> Self {
        Self::default()
    }

    fn decode_line(line: &[u8]) -> Option<Result<JSONRPCMessage>> {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.iter().all(u8::is_ascii_whitespace) {
            return None;
        }
        let decoded = decode(line);
        if let Err(e) = &decoded {
            tracing::warn!(
                "Dropping malformed frame ({}): {}",
                e,
                String::from_utf8_lossy(line)
            );
        }
        Some(decoded)
    }
}

impl Decoder for JsonRpcCodec {
    type Item = Result<JSONRPCMessage>;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            let Some(offset) = buf[self.next_index..].iter().position(|b| *b == b'\n') else {
                self.next_index = buf.len();
                if buf.len() > MAX_FRAME_BYTES {
                    return Err(Error::Transport(format!(
                        "frame exceeds {MAX_FRAME_BYTES} bytes"
                    )));
                }
                return Ok(None);
            };

            let newline = self.next_index + offset;
            self.next_index = 0;
            let line = buf.split_to(newline + 1);
            if let Some(item) = Self::decode_line(&line[..newline]) {
                return Ok(Some(item));
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>> {
        if let Some(item) = self.decode(buf)? {
            return Ok(Some(item));
        }
        self.next_index = 0;
        if buf.is_empty() {
            return Ok(None);
        }
        let rest = buf.split_to(buf.len());
        Ok(Self::decode_line(&rest))
    }
}

impl Encoder<JSONRPCMessage> for JsonRpcCodec {
    type Error = Error;

    fn encode(&mut self, message: JSONRPCMessage, buf: &mut BytesMut) -> Result<()> {
        let bytes = encode(&message)?;
        buf.reserve(bytes.len() + 1);
        buf.put_slice(&bytes);
        buf.put_u8(b'\n');
        Ok(())
    }
}
