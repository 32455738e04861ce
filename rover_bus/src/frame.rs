//! Wire framing for the network transport.
//!
//! # Data frame (publisher → broker → subscriber)
//!
//! ```text
//! ┌──────────────┬──────────────┬──────────────┬──────────────┐
//! │ u32 BE len   │ channel      │ u32 BE len   │ payload      │
//! │ (channel)    │ (UTF-8)      │ (payload)    │ (bincode)    │
//! └──────────────┴──────────────┴──────────────┴──────────────┘
//! ```
//!
//! # Control frame (subscriber → broker, on the broadcaster connection)
//!
//! ```text
//! ┌──────────┬──────────────┬──────────────┐
//! │ u8 op    │ u32 BE len   │ prefix bytes │
//! │ 1 = sub  │              │              │
//! │ 0 = unsub│              │              │
//! └──────────┴──────────────┴──────────────┘
//! ```
//!
//! TCP is a byte stream and reads use a poll timeout, so a frame may arrive
//! split across several reads. [`FrameReader`] buffers partial input until
//! a whole frame is available.

use crate::{BusError, BusResult, Payload};
use rover_common::consts::MAX_FRAME_SECTION_LEN;
use std::io::{self, Read};

const LEN_PREFIX: usize = 4;
const READ_CHUNK: usize = 64 * 1024;

/// Subscribe opcode (mirrors the first byte of a pub/sub subscription message).
pub const OP_SUBSCRIBE: u8 = 1;
/// Unsubscribe opcode.
pub const OP_UNSUBSCRIBE: u8 = 0;

/// A two-part message: channel name and serialized payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Channel name.
    pub channel: String,
    /// Serialized payload (opaque to the broker).
    pub payload: Vec<u8>,
}

impl Frame {
    /// Serialize `message` for `channel`.
    ///
    /// # Errors
    /// [`BusError::Frame`] when the channel name or the encoded payload is
    /// larger than [`MAX_FRAME_SECTION_LEN`]; nothing is sent in that case.
    pub fn from_message(channel: &str, message: &Payload) -> BusResult<Self> {
        check_section("channel name", channel, channel.len())?;
        let payload = bincode::serialize(message).map_err(|source| BusError::Encode {
            channel: channel.to_string(),
            source,
        })?;
        check_section("payload", channel, payload.len())?;
        Ok(Self {
            channel: channel.to_string(),
            payload,
        })
    }

    /// Deserialize the payload section.
    pub fn decode_payload(&self) -> BusResult<Payload> {
        bincode::deserialize(&self.payload).map_err(|source| BusError::Decode {
            channel: self.channel.clone(),
            source,
        })
    }

    /// Encode to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out =
            Vec::with_capacity(2 * LEN_PREFIX + self.channel.len() + self.payload.len());
        put_section(&mut out, self.channel.as_bytes());
        put_section(&mut out, &self.payload);
        out
    }
}

/// Subscription management request sent by a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    /// Start receiving channels with this prefix.
    Subscribe(Vec<u8>),
    /// Drop one earlier subscription with this prefix.
    Unsubscribe(Vec<u8>),
}

impl Control {
    /// Encode to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let (op, prefix) = match self {
            Control::Subscribe(p) => (OP_SUBSCRIBE, p),
            Control::Unsubscribe(p) => (OP_UNSUBSCRIBE, p),
        };
        let mut out = Vec::with_capacity(1 + LEN_PREFIX + prefix.len());
        out.push(op);
        put_section(&mut out, prefix);
        out
    }
}

/// Reject a section the receiving side would treat as stream corruption.
pub fn check_section(what: &str, channel: &str, len: usize) -> BusResult<()> {
    if len > MAX_FRAME_SECTION_LEN {
        return Err(BusError::Frame(format!(
            "{what} of {len} bytes on '{}' exceeds limit of {MAX_FRAME_SECTION_LEN}",
            truncated(channel)
        )));
    }
    Ok(())
}

fn truncated(channel: &str) -> &str {
    match channel.char_indices().nth(64) {
        Some((end, _)) => &channel[..end],
        None => channel,
    }
}

fn put_section(out: &mut Vec<u8>, bytes: &[u8]) {
    debug_assert!(bytes.len() <= MAX_FRAME_SECTION_LEN);
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
}

/// Outcome of one [`FrameReader::fill`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Bytes were appended to the buffer.
    Data(usize),
    /// The poll timeout expired without data.
    Idle,
    /// The peer closed the connection.
    Closed,
}

/// Incremental decoder for frames arriving over a byte stream.
#[derive(Debug)]
pub struct FrameReader {
    buf: Vec<u8>,
    chunk: Box<[u8]>,
    corrupt: bool,
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameReader {
    /// Create an empty reader.
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            chunk: vec![0u8; READ_CHUNK].into_boxed_slice(),
            corrupt: false,
        }
    }

    /// Whether framing has been lost; the connection should be dropped.
    pub fn is_corrupt(&self) -> bool {
        self.corrupt
    }

    /// Bytes buffered but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Read once from `reader`, treating timeouts as [`ReadOutcome::Idle`].
    pub fn fill<R: Read>(&mut self, reader: &mut R) -> io::Result<ReadOutcome> {
        match reader.read(&mut self.chunk) {
            Ok(0) => Ok(ReadOutcome::Closed),
            Ok(n) => {
                self.buf.extend_from_slice(&self.chunk[..n]);
                Ok(ReadOutcome::Data(n))
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock
                        | io::ErrorKind::TimedOut
                        | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(ReadOutcome::Idle)
            }
            Err(e) => Err(e),
        }
    }

    /// Append raw bytes (used by tests and in-memory callers).
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Decode the next complete data frame, if one is buffered.
    ///
    /// A frame whose channel is not valid UTF-8 is consumed and reported as
    /// an error; the stream stays usable. An oversized section marks the
    /// stream corrupt.
    pub fn next_frame(&mut self) -> BusResult<Option<Frame>> {
        self.check_corrupt()?;
        let Some(channel_len) = self.section_len(0)? else {
            return Ok(None);
        };
        let payload_at = LEN_PREFIX + channel_len;
        let Some(payload_len) = self.section_len(payload_at)? else {
            return Ok(None);
        };
        let total = payload_at + LEN_PREFIX + payload_len;
        if self.buf.len() < total {
            return Ok(None);
        }

        let rest = self.buf.split_off(total);
        let frame_bytes = std::mem::replace(&mut self.buf, rest);
        let channel = String::from_utf8(frame_bytes[LEN_PREFIX..payload_at].to_vec())
            .map_err(|_| BusError::Frame("channel name is not valid UTF-8".to_string()))?;
        let payload = frame_bytes[payload_at + LEN_PREFIX..].to_vec();
        Ok(Some(Frame { channel, payload }))
    }

    /// Decode the next complete control frame, if one is buffered.
    pub fn next_control(&mut self) -> BusResult<Option<Control>> {
        self.check_corrupt()?;
        let Some(&op) = self.buf.first() else {
            return Ok(None);
        };
        if op != OP_SUBSCRIBE && op != OP_UNSUBSCRIBE {
            self.corrupt = true;
            return Err(BusError::Frame(format!("unknown control opcode {op}")));
        }
        let Some(prefix_len) = self.section_len(1)? else {
            return Ok(None);
        };
        let total = 1 + LEN_PREFIX + prefix_len;
        if self.buf.len() < total {
            return Ok(None);
        }

        let prefix = self.buf[1 + LEN_PREFIX..total].to_vec();
        self.buf.drain(..total);
        Ok(Some(if op == OP_SUBSCRIBE {
            Control::Subscribe(prefix)
        } else {
            Control::Unsubscribe(prefix)
        }))
    }

    fn check_corrupt(&self) -> BusResult<()> {
        if self.corrupt {
            return Err(BusError::Frame("stream framing lost".to_string()));
        }
        Ok(())
    }

    fn section_len(&mut self, at: usize) -> BusResult<Option<usize>> {
        let Some(bytes) = self.buf.get(at..at + LEN_PREFIX) else {
            return Ok(None);
        };
        let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        if len > MAX_FRAME_SECTION_LEN {
            self.corrupt = true;
            return Err(BusError::Frame(format!(
                "section of {len} bytes exceeds limit of {MAX_FRAME_SECTION_LEN}"
            )));
        }
        Ok(Some(len))
    }
}
