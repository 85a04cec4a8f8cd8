// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fixed-layout wire protocol for the ring.
//!
//! Every message starts with a 1-byte type tag followed by a 1-byte sender
//! id. There is no length prefix — each type has a fixed total length, so a
//! reader always knows exactly how many more bytes to pull off the wire once
//! it has seen the type byte. All multi-byte tail fields are little-endian.
//!
//! ```text
//! datagram (ping channel), 4 bytes total:
//! +------+--------+-----------+
//! | type | sender | seq (u16) |
//! +------+--------+-----------+
//!
//! stream (file-lookup), 4 bytes total:
//! +------+--------+----------------+
//! | type | sender | file_hash (u16)|
//! +------+--------+----------------+
//!
//! stream (churn), 6 bytes total:
//! +------+--------+------------+------------+
//! | type | sender | s1 (i16)   | s2 (i16)   |
//! +------+--------+------------+------------+
//! ```

use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Total length of a datagram message.
pub const DATAGRAM_LEN: usize = 4;
/// Total length of a file-lookup stream message.
pub const FT_MESSAGE_LEN: usize = 4;
/// Total length of a churn stream message.
pub const PC_MESSAGE_LEN: usize = 6;

/// A ring slot value as carried on the wire: a concrete peer id, or the
/// DEAD sentinel. PC_QUIT and PC_QUERYRES never legitimately carry the
/// INVALID predecessor sentinel, so the wire form only distinguishes Id/Dead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingSlot {
    Id(u8),
    Dead,
}

const DEAD_SENTINEL: i16 = -2;

impl RingSlot {
    fn encode(self) -> i16 {
        match self {
            RingSlot::Id(id) => i16::from(id),
            RingSlot::Dead => DEAD_SENTINEL,
        }
    }

    fn decode(raw: i16) -> Self {
        match u8::try_from(raw) {
            Ok(id) => RingSlot::Id(id),
            Err(_) => RingSlot::Dead,
        }
    }
}

/// Messages exchanged on the per-peer UDP ping channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatagramMessage {
    /// PING_REQ(seq) from `sender`.
    PingReq { sender: u8, seq: u16 },
    /// PING_RES(seq) from `sender`, echoing a prior request's sequence.
    PingRes { sender: u8, seq: u16 },
}

impl DatagramMessage {
    /// Encode to the fixed 4-byte wire form.
    pub fn encode(self) -> [u8; DATAGRAM_LEN] {
        let (tag, sender, seq) = match self {
            DatagramMessage::PingReq { sender, seq } => (0u8, sender, seq),
            DatagramMessage::PingRes { sender, seq } => (1u8, sender, seq),
        };
        let [lo, hi] = seq.to_le_bytes();
        [tag, sender, lo, hi]
    }

    /// Decode a datagram payload. Returns `None` for anything malformed or
    /// truncated — per the error-handling design, such datagrams are
    /// silently discarded by the caller.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() != DATAGRAM_LEN {
            return None;
        }
        let sender = buf[1];
        let seq = u16::from_le_bytes([buf[2], buf[3]]);
        match buf[0] {
            0 => Some(DatagramMessage::PingReq { sender, seq }),
            1 => Some(DatagramMessage::PingRes { sender, seq }),
            _ => None,
        }
    }
}

/// Messages exchanged on the per-peer reliable stream channel: file lookup
/// (FT_*) and churn repair (PC_*) share the transport but not the type space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMessage {
    /// FT_REQ(file_hash): a plain lookup request, sender is the requester.
    FtReq { sender: u8, file_hash: u16 },
    /// FT_FORWARD(file_hash): forwarded lookup, sender is the *original* requester.
    FtForward { sender: u8, file_hash: u16 },
    /// FT_FORWARDNEXT(file_hash): next hop is asserted to hold the file.
    FtForwardNext { sender: u8, file_hash: u16 },
    /// FT_RES(file_hash): response, sender is the holder.
    FtRes { sender: u8, file_hash: u16 },
    /// PC_QUIT(s1, s2): graceful departure, carrying the quitter's successors.
    PcQuit { sender: u8, s1: RingSlot, s2: RingSlot },
    /// PC_QUERYREQ: ask the recipient for its successor pair.
    PcQueryReq { sender: u8 },
    /// PC_QUERYRES(s1, s2): reply to PC_QUERYREQ.
    PcQueryRes { sender: u8, s1: RingSlot, s2: RingSlot },
}

impl StreamMessage {
    /// Byte length this message occupies on the wire.
    fn wire_len(tag: u8) -> Option<usize> {
        match tag {
            0..=3 => Some(FT_MESSAGE_LEN),
            4..=6 => Some(PC_MESSAGE_LEN),
            _ => None,
        }
    }

    /// Encode to its wire form. Length varies by message kind.
    pub fn encode(self) -> Vec<u8> {
        match self {
            StreamMessage::FtReq { sender, file_hash } => encode_ft(0, sender, file_hash),
            StreamMessage::FtForward { sender, file_hash } => encode_ft(1, sender, file_hash),
            StreamMessage::FtForwardNext { sender, file_hash } => encode_ft(2, sender, file_hash),
            StreamMessage::FtRes { sender, file_hash } => encode_ft(3, sender, file_hash),
            StreamMessage::PcQuit { sender, s1, s2 } => encode_pc(4, sender, s1, s2),
            StreamMessage::PcQueryReq { sender } => {
                encode_pc(5, sender, RingSlot::Id(0), RingSlot::Id(0))
            }
            StreamMessage::PcQueryRes { sender, s1, s2 } => encode_pc(6, sender, s1, s2),
        }
    }

    fn decode(tag: u8, sender: u8, tail: &[u8]) -> Option<Self> {
        match tag {
            0 => Some(StreamMessage::FtReq {
                sender,
                file_hash: read_u16(tail),
            }),
            1 => Some(StreamMessage::FtForward {
                sender,
                file_hash: read_u16(tail),
            }),
            2 => Some(StreamMessage::FtForwardNext {
                sender,
                file_hash: read_u16(tail),
            }),
            3 => Some(StreamMessage::FtRes {
                sender,
                file_hash: read_u16(tail),
            }),
            4 => Some(StreamMessage::PcQuit {
                sender,
                s1: RingSlot::decode(read_i16(&tail[0..2])),
                s2: RingSlot::decode(read_i16(&tail[2..4])),
            }),
            5 => Some(StreamMessage::PcQueryReq { sender }),
            6 => Some(StreamMessage::PcQueryRes {
                sender,
                s1: RingSlot::decode(read_i16(&tail[0..2])),
                s2: RingSlot::decode(read_i16(&tail[2..4])),
            }),
            _ => None,
        }
    }

    /// Read one message off an accepted stream. Returns `Ok(None)` at a
    /// clean EOF (the peer closed the connection after its last message),
    /// and `Err` for any I/O error or a malformed message — the caller
    /// drops the connection in both cases.
    pub async fn read_one<R>(stream: &mut R) -> io::Result<Option<Self>>
    where
        R: tokio::io::AsyncRead + Unpin,
    {
        let mut head = [0u8; 2];
        match stream.read_exact(&mut head).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        }
        let tag = head[0];
        let sender = head[1];
        let Some(total_len) = Self::wire_len(tag) else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "unknown stream message type",
            ));
        };

        let mut tail = vec![0u8; total_len - 2];
        stream.read_exact(&mut tail).await?;

        Self::decode(tag, sender, &tail)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "malformed stream message"))
            .map(Some)
    }

    /// Write one message to a stream. Flushing is the caller's concern —
    /// the stream acceptor side writes a single message per connection.
    pub async fn write_to<W>(self, stream: &mut W) -> io::Result<()>
    where
        W: tokio::io::AsyncWrite + Unpin,
    {
        stream.write_all(&self.encode()).await
    }
}

fn encode_ft(tag: u8, sender: u8, file_hash: u16) -> Vec<u8> {
    let [lo, hi] = file_hash.to_le_bytes();
    vec![tag, sender, lo, hi]
}

fn encode_pc(tag: u8, sender: u8, s1: RingSlot, s2: RingSlot) -> Vec<u8> {
    let [s1_lo, s1_hi] = s1.encode().to_le_bytes();
    let [s2_lo, s2_hi] = s2.encode().to_le_bytes();
    vec![tag, sender, s1_lo, s1_hi, s2_lo, s2_hi]
}

fn read_u16(buf: &[u8]) -> u16 {
    u16::from_le_bytes([buf[0], buf[1]])
}

fn read_i16(buf: &[u8]) -> i16 {
    i16::from_le_bytes([buf[0], buf[1]])
}
