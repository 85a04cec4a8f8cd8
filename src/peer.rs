// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The peer actor: owns the ring state and mediates every mutation from a
//! single task, per the concurrency model in §5. Two cooperating
//! activities — a UDP receiver/ticker and a TCP stream acceptor — run as
//! their own tasks and hand work items to this actor over an `mpsc`
//! channel; nothing outside this module ever touches [`state::PeerState`]
//! directly. A third input, user commands, arrives as plain strings over a
//! channel exposed by [`Peer::command_sender`] — the binary's stdin reader
//! feeds it in production, and tests can feed it directly without a TTY.

mod connection;
pub mod state;

use crate::config::PeerConfig;
use crate::events::{parse_command, slot_label, Command, CommandParseError, PeerEvent};
use crate::wire::{DatagramMessage, RingSlot, StreamMessage};
use state::{PeerState, RouteDecision, Slot, INVALID};

use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{mpsc, Notify};
use tokio::time::{interval, sleep, Duration};

const PING_PERIOD: Duration = Duration::from_secs(5);
const QUIT_GRACE: Duration = Duration::from_secs(2);
const DATAGRAM_BUF: usize = 64;

/// Fatal startup failure — anything past bind succeeds or self-heals.
#[derive(Debug)]
pub enum PeerError {
    Bind(std::io::Error),
}

impl std::fmt::Display for PeerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bind(err) => write!(f, "failed to bind peer socket: {err}"),
        }
    }
}

impl std::error::Error for PeerError {}

/// Internal unit of work delivered to the actor loop.
enum WorkItem {
    Datagram(DatagramMessage),
    Stream(StreamMessage),
    Tick,
}

/// One ring peer: config plus the plumbing needed to run it to completion.
pub struct Peer {
    config: PeerConfig,
    events_tx: mpsc::UnboundedSender<PeerEvent>,
    shutdown: Arc<Notify>,
    commands_tx: mpsc::UnboundedSender<String>,
    commands_rx: mpsc::UnboundedReceiver<String>,
}

impl Peer {
    /// Construct a peer and the event receiver its consumer should drain.
    pub fn new(config: PeerConfig) -> (Self, mpsc::UnboundedReceiver<PeerEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let peer = Self {
            config,
            events_tx,
            shutdown: Arc::new(Notify::new()),
            commands_tx,
            commands_rx,
        };
        (peer, events_rx)
    }

    /// A sender for raw command lines (`"quit"`, `"request 0042"`, ...).
    /// The binary's stdin reader forwards lines here; a test can send
    /// commands directly without a terminal.
    pub fn command_sender(&self) -> mpsc::UnboundedSender<String> {
        self.commands_tx.clone()
    }

    /// A handle callers can use to request shutdown from outside (e.g. a
    /// Ctrl-C handler), equivalent to the user typing `quit`.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Bind sockets and run until a `quit` command or external shutdown
    /// notification is processed, then return after the grace delay.
    pub async fn run(self) -> Result<(), PeerError> {
        let Peer {
            config,
            events_tx,
            shutdown,
            commands_tx,
            mut commands_rx,
        } = self;
        drop(commands_tx); // the clone(s) handed out by command_sender keep it alive

        let port = config.port();
        let udp = UdpSocket::bind(("0.0.0.0", port))
            .await
            .map_err(PeerError::Bind)?;
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(PeerError::Bind)?;

        tracing::info!(id = config.id, port, "peer listening");

        let (work_tx, mut work_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_datagram_task(udp, work_tx.clone(), shutdown.clone()));
        tokio::spawn(run_stream_acceptor(listener, work_tx, shutdown.clone()));

        let mut state = PeerState::new(config.id, config.s1, config.s2, config.show_pings);

        loop {
            tokio::select! {
                item = work_rx.recv() => {
                    match item {
                        Some(item) => handle_work_item(&events_tx, &mut state, item).await,
                        None => break,
                    }
                }
                line = commands_rx.recv() => {
                    match line {
                        Some(text) => {
                            let should_quit = handle_command(
                                &events_tx, &shutdown, &mut state, parse_command(&text),
                            ).await;
                            if should_quit {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        sleep(QUIT_GRACE).await;
        Ok(())
    }
}

async fn handle_work_item(
    events_tx: &mpsc::UnboundedSender<PeerEvent>,
    state: &mut PeerState,
    item: WorkItem,
) {
    match item {
        WorkItem::Datagram(msg) => handle_datagram(events_tx, state, msg).await,
        WorkItem::Stream(msg) => handle_stream(events_tx, state, msg).await,
        WorkItem::Tick => handle_tick(events_tx, state).await,
    }
}

fn emit(events_tx: &mpsc::UnboundedSender<PeerEvent>, event: PeerEvent) {
    let _ = events_tx.send(event);
}

// ---- datagram channel (§4.2, §4.5) --------------------------------------

async fn handle_datagram(
    events_tx: &mpsc::UnboundedSender<PeerEvent>,
    state: &mut PeerState,
    msg: DatagramMessage,
) {
    match msg {
        DatagramMessage::PingReq { sender, seq } => {
            state.learn_predecessor(sender);
            if state.show_pings {
                emit(
                    events_tx,
                    PeerEvent::ping_req(format!("PING_REQ seq={seq} from peer {sender}")),
                );
            }
            connection::send_datagram(
                sender,
                DatagramMessage::PingRes {
                    sender: state.self_id,
                    seq,
                },
            )
            .await;
        }
        DatagramMessage::PingRes { sender, seq } => {
            state.record_ack(sender, seq);
            if state.show_pings {
                emit(
                    events_tx,
                    PeerEvent::ping_res(format!("PING_RES seq={seq} from peer {sender}")),
                );
            }
        }
    }
}

async fn handle_tick(events_tx: &mpsc::UnboundedSender<PeerEvent>, state: &mut PeerState) {
    let seq = state.next_tick();
    if let RingSlot::Id(id) = state.s1() {
        connection::send_datagram(
            id,
            DatagramMessage::PingReq {
                sender: state.self_id,
                seq,
            },
        )
        .await;
    }
    if let RingSlot::Id(id) = state.s2() {
        connection::send_datagram(
            id,
            DatagramMessage::PingReq {
                sender: state.self_id,
                seq,
            },
        )
        .await;
    }

    for (slot, dead_id) in state.check_deaths() {
        emit(
            events_tx,
            PeerEvent::peer_churn(format!("peer {dead_id} is no longer alive")),
        );
        let query_target = match slot {
            Slot::S1 => state.s2(),
            Slot::S2 => state.s1(),
        };
        if let RingSlot::Id(id) = query_target {
            connection::send_to(
                id,
                StreamMessage::PcQueryReq {
                    sender: state.self_id,
                },
            )
            .await;
        }
    }
}

// ---- stream channel (§4.3, §4.4) ----------------------------------------

async fn handle_stream(
    events_tx: &mpsc::UnboundedSender<PeerEvent>,
    state: &mut PeerState,
    msg: StreamMessage,
) {
    match msg {
        StreamMessage::FtReq { sender, file_hash } => {
            handle_inbound_lookup(state, sender, file_hash).await;
        }
        StreamMessage::FtForward { sender, file_hash } => {
            handle_inbound_lookup(state, sender, file_hash).await;
        }
        StreamMessage::FtForwardNext { sender, file_hash } => {
            // The previous hop already committed to "you hold it".
            connection::send_to(
                sender,
                StreamMessage::FtRes {
                    sender: state.self_id,
                    file_hash,
                },
            )
            .await;
        }
        StreamMessage::FtRes { sender, file_hash } => {
            emit(
                events_tx,
                PeerEvent::ft_res(format!("peer {sender} has file {file_hash:04}")),
            );
        }
        StreamMessage::PcQuit { sender, s1, s2 } => {
            if state.apply_quit(sender, s1, s2) {
                emit(
                    events_tx,
                    PeerEvent::peer_churn(format!(
                        "peer {sender} departed; successors now ({}, {})",
                        slot_label(state.s1()),
                        slot_label(state.s2())
                    )),
                );
            }
        }
        StreamMessage::PcQueryReq { sender } => {
            connection::send_to(
                sender,
                StreamMessage::PcQueryRes {
                    sender: state.self_id,
                    s1: state.s1(),
                    s2: state.s2(),
                },
            )
            .await;
        }
        StreamMessage::PcQueryRes { s1, s2, .. } => {
            state.apply_query_res(s1, s2);
            emit(
                events_tx,
                PeerEvent::peer_churn(format!(
                    "ring repaired; successors now ({}, {})",
                    slot_label(state.s1()),
                    slot_label(state.s2())
                )),
            );
        }
    }
}

async fn handle_inbound_lookup(state: &mut PeerState, original_requester: u8, file_hash: u16) {
    match state.route_here(file_hash) {
        RouteDecision::Available => {
            connection::send_to(
                original_requester,
                StreamMessage::FtRes {
                    sender: state.self_id,
                    file_hash,
                },
            )
            .await;
        }
        RouteDecision::NextAvailable => {
            if let RingSlot::Id(id) = state.s1() {
                connection::send_to(
                    id,
                    StreamMessage::FtForwardNext {
                        sender: original_requester,
                        file_hash,
                    },
                )
                .await;
            }
        }
        RouteDecision::NotAvailable => {
            if let RingSlot::Id(id) = state.s1() {
                connection::send_to(
                    id,
                    StreamMessage::FtForward {
                        sender: original_requester,
                        file_hash,
                    },
                )
                .await;
            }
        }
    }
}

async fn handle_user_request(
    events_tx: &mpsc::UnboundedSender<PeerEvent>,
    state: &mut PeerState,
    file_hash: u16,
) {
    match state.route_here(file_hash) {
        RouteDecision::Available => {
            emit(
                events_tx,
                PeerEvent::status(format!("file {file_hash:04} stored locally")),
            );
        }
        RouteDecision::NextAvailable => {
            if let RingSlot::Id(id) = state.s1() {
                connection::send_to(
                    id,
                    StreamMessage::FtForwardNext {
                        sender: state.self_id,
                        file_hash,
                    },
                )
                .await;
            }
            emit(
                events_tx,
                PeerEvent::status(format!("request for file {file_hash:04} sent to s1")),
            );
        }
        RouteDecision::NotAvailable => {
            if let RingSlot::Id(id) = state.s1() {
                connection::send_to(
                    id,
                    StreamMessage::FtReq {
                        sender: state.self_id,
                        file_hash,
                    },
                )
                .await;
            }
            emit(
                events_tx,
                PeerEvent::status(format!("request for file {file_hash:04} sent to s1")),
            );
        }
    }
}

// ---- commands (§4.6) -----------------------------------------------------

/// Returns `true` if the peer should shut down (a `quit` was processed).
async fn handle_command(
    events_tx: &mpsc::UnboundedSender<PeerEvent>,
    shutdown: &Notify,
    state: &mut PeerState,
    cmd: Result<Command, CommandParseError>,
) -> bool {
    match cmd {
        Err(err) => {
            emit(events_tx, PeerEvent::warning(err.to_string()));
            false
        }
        Ok(Command::Quit) => {
            graceful_quit(events_tx, shutdown, state).await;
            true
        }
        Ok(Command::Request(file_hash)) => {
            handle_user_request(events_tx, state, file_hash).await;
            false
        }
        Ok(Command::PingToggle(on)) => {
            state.show_pings = on;
            emit(
                events_tx,
                PeerEvent::status(format!(
                    "ping display {}",
                    if on { "enabled" } else { "disabled" }
                )),
            );
            false
        }
    }
}

async fn graceful_quit(
    events_tx: &mpsc::UnboundedSender<PeerEvent>,
    shutdown: &Notify,
    state: &PeerState,
) {
    emit(events_tx, PeerEvent::status("quitting".to_string()));
    let quit = StreamMessage::PcQuit {
        sender: state.self_id,
        s1: state.s1(),
        s2: state.s2(),
    };
    if state.p1() != INVALID {
        connection::send_to(state.p1() as u8, quit).await;
    }
    if state.p2() != INVALID {
        connection::send_to(state.p2() as u8, quit).await;
    }
    shutdown.notify_waiters();
}

// ---- background activities (§5) -----------------------------------------

async fn run_datagram_task(socket: UdpSocket, tx: mpsc::UnboundedSender<WorkItem>, shutdown: Arc<Notify>) {
    let mut tick = interval(PING_PERIOD);
    let mut buf = [0u8; DATAGRAM_BUF];
    loop {
        tokio::select! {
            res = socket.recv_from(&mut buf) => {
                match res {
                    Ok((n, _addr)) => {
                        if let Some(msg) = DatagramMessage::decode(&buf[..n]) {
                            if tx.send(WorkItem::Datagram(msg)).is_err() {
                                break;
                            }
                        }
                    }
                    Err(err) => tracing::debug!(%err, "datagram recv error"),
                }
            }
            _ = tick.tick() => {
                if tx.send(WorkItem::Tick).is_err() {
                    break;
                }
            }
            _ = shutdown.notified() => break,
        }
    }
}

async fn run_stream_acceptor(listener: TcpListener, tx: mpsc::UnboundedSender<WorkItem>, shutdown: Arc<Notify>) {
    loop {
        tokio::select! {
            res = listener.accept() => {
                match res {
                    Ok((stream, _addr)) => {
                        let tx = tx.clone();
                        tokio::spawn(read_stream_connection(stream, tx));
                    }
                    Err(err) => tracing::debug!(%err, "accept error"),
                }
            }
            _ = shutdown.notified() => break,
        }
    }
}

async fn read_stream_connection(mut stream: TcpStream, tx: mpsc::UnboundedSender<WorkItem>) {
    loop {
        match StreamMessage::read_one(&mut stream).await {
            Ok(Some(msg)) => {
                if tx.send(WorkItem::Stream(msg)).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(err) => {
                tracing::debug!(%err, "stream read error");
                break;
            }
        }
    }
}
