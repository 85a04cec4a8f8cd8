// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! UI-facing event stream and the command language accepted from stdin.
//!
//! The core never prints anything itself. It emits [`PeerEvent`] values on
//! an `mpsc::UnboundedReceiver` for whatever renderer the binary wires up —
//! the shipped binary uses a plain-stdout renderer, but a test harness can
//! collect the same events into a `Vec` for assertions.

use crate::wire::RingSlot;

/// Category tag carried by every event, so a renderer can filter or colour
/// by kind without string-matching the message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Status,
    PingReq,
    PingRes,
    FtReq,
    FtRes,
    PeerChurn,
    Warning,
}

/// One event emitted by the core for UI consumption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEvent {
    pub kind: EventKind,
    pub message: String,
}

impl PeerEvent {
    fn new(kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn status(message: impl Into<String>) -> Self {
        Self::new(EventKind::Status, message)
    }

    pub fn ping_req(message: impl Into<String>) -> Self {
        Self::new(EventKind::PingReq, message)
    }

    pub fn ping_res(message: impl Into<String>) -> Self {
        Self::new(EventKind::PingRes, message)
    }

    pub fn ft_req(message: impl Into<String>) -> Self {
        Self::new(EventKind::FtReq, message)
    }

    pub fn ft_res(message: impl Into<String>) -> Self {
        Self::new(EventKind::FtRes, message)
    }

    pub fn peer_churn(message: impl Into<String>) -> Self {
        Self::new(EventKind::PeerChurn, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(EventKind::Warning, message)
    }
}

pub fn slot_label(slot: RingSlot) -> String {
    match slot {
        RingSlot::Id(id) => id.to_string(),
        RingSlot::Dead => "DEAD".to_string(),
    }
}

/// A parsed user command, ready for the peer actor to act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Quit,
    Request(u16),
    PingToggle(bool),
}

/// Error returned when a raw input line does not parse as a [`Command`].
/// Carries the original text so the caller can format a validation event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandParseError {
    pub input: String,
}

impl std::fmt::Display for CommandParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid command: {:?}", self.input)
    }
}

impl std::error::Error for CommandParseError {}

/// Parse one line of user input into a [`Command`].
///
/// `request` requires exactly four decimal digits (`0000`-`9999`); any other
/// token count, non-digit characters, or unrecognised verb is rejected.
pub fn parse_command(line: &str) -> Result<Command, CommandParseError> {
    let trimmed = line.trim();
    let mut parts = trimmed.split_whitespace();
    let verb = parts.next().unwrap_or("");

    let err = || CommandParseError {
        input: trimmed.to_string(),
    };

    match verb {
        "quit" if parts.next().is_none() => Ok(Command::Quit),
        "request" => {
            let arg = parts.next().ok_or_else(err)?;
            if parts.next().is_some() {
                return Err(err());
            }
            if arg.len() != 4 || !arg.bytes().all(|b| b.is_ascii_digit()) {
                return Err(err());
            }
            let file_hash: u16 = arg.parse().map_err(|_| err())?;
            Ok(Command::Request(file_hash))
        }
        "ping" => match parts.next() {
            Some("on") if parts.next().is_none() => Ok(Command::PingToggle(true)),
            Some("off") if parts.next().is_none() => Ok(Command::PingToggle(false)),
            _ => Err(err()),
        },
        _ => Err(err()),
    }
}
