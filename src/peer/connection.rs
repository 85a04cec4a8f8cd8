// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Outbound delivery for both wire channels. Each `PC_*`/`FT_*` message opens
//! a fresh connection to the target peer's port, writes one frame, and
//! closes — no connection pooling. Each outbound ping opens and closes its
//! own ephemeral UDP socket. Errors are swallowed on both paths: the
//! liveness detector is what notices a silently-failing neighbour, not the
//! sender.

use crate::config::peer_to_port;
use crate::wire::{DatagramMessage, StreamMessage};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::Duration;

/// All peers live on loopback for this crate's demonstration scope (§6).
const PEER_HOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Best-effort send-connect timeout, matching the ~1s budget used elsewhere
/// on the control channel.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

fn target_addr(peer_id: u8) -> SocketAddr {
    SocketAddr::new(PEER_HOST, peer_to_port(peer_id))
}

/// Open a fresh connection to `peer_id`, send `message`, and close. Any
/// failure (connection refused, timeout, write error) is logged at debug
/// level and otherwise ignored, per §7's network-send-error category.
pub async fn send_to(peer_id: u8, message: StreamMessage) {
    let addr = target_addr(peer_id);
    let connect = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr));
    let stream = match connect.await {
        Ok(Ok(stream)) => stream,
        Ok(Err(err)) => {
            tracing::debug!(peer = peer_id, %err, "send_to: connect failed");
            return;
        }
        Err(_) => {
            tracing::debug!(peer = peer_id, "send_to: connect timed out");
            return;
        }
    };
    let mut stream = stream;
    if let Err(err) = message.write_to(&mut stream).await {
        tracing::debug!(peer = peer_id, %err, "send_to: write failed");
    }
}

/// Open an ephemeral UDP socket, send one ping datagram to `peer_id`, and
/// drop it — the resource policy opens and closes a sender socket per ping
/// rather than keeping one bound for the process lifetime.
pub async fn send_datagram(peer_id: u8, message: DatagramMessage) {
    let addr = target_addr(peer_id);
    let socket = match UdpSocket::bind(("0.0.0.0", 0)).await {
        Ok(socket) => socket,
        Err(err) => {
            tracing::debug!(peer = peer_id, %err, "send_datagram: bind failed");
            return;
        }
    };
    if let Err(err) = socket.send_to(&message.encode(), addr).await {
        tracing::debug!(peer = peer_id, %err, "send_datagram: send failed");
    }
}
