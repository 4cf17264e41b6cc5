//! Socket Orchestrator (`SPEC_FULL.md` §4.1/§6): owns every live WebSocket
//! connection's outbound channel and the per-session fanout helpers `World`
//! uses to push server-originated messages out to clients.
//!
//! Pairs with `wire.rs`'s raw-frame codec running over the
//! `hyper::upgrade::on` byte stream `entry_point.rs`'s `/ws` route hands off
//! after a successful handshake.

use crate::wire::{self, Opcode};
use crate::world::{
    AuthenticateSocket, ProcessRealtimeMessage, ProcessRoomChannel, ProcessTurnAction,
    ProcessTurnEnd, RealtimePayload, SocketClosed, World,
};
use actix::Addr;
use protocol::{ClientMessage, ErrorKind, PlayerId, ServerMessage, SessionId, WebSocketQuery};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;

pub type ClientId = u64;
/// The raw byte stream a connection rides once the HTTP upgrade completes.
pub type ConnIo = hyper::upgrade::Upgraded;

/// A message queued for delivery to one connection's writer half.
pub enum OutboundFrame {
    Message(ServerMessage),
    Pong(Vec<u8>),
    Close(u16, String),
}

struct ClientHandle {
    sender: mpsc::UnboundedSender<OutboundFrame>,
    session_id: SessionId,
    player_id: PlayerId,
}

#[derive(Default)]
struct RegistryState {
    clients: HashMap<ClientId, ClientHandle>,
    by_session: HashMap<SessionId, HashSet<ClientId>>,
}

/// Shared between `World` (server-originated fanout, broadcasts, forced
/// closes) and every connection-handling task (registration, teardown). A
/// plain `std::sync::Mutex` is fine here: every critical section is a quick
/// map lookup/insert, never an `.await`.
pub struct ClientRegistry {
    next_id: AtomicU64,
    state: Mutex<RegistryState>,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            state: Mutex::new(RegistryState::default()),
        }
    }
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(
        &self,
        session_id: SessionId,
        player_id: PlayerId,
        sender: mpsc::UnboundedSender<OutboundFrame>,
    ) -> ClientId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock().unwrap();
        state.by_session.entry(session_id.clone()).or_default().insert(id);
        state.clients.insert(
            id,
            ClientHandle {
                sender,
                session_id,
                player_id,
            },
        );
        id
    }

    fn unregister(&self, id: ClientId) {
        let mut state = self.state.lock().unwrap();
        if let Some(handle) = state.clients.remove(&id) {
            if let Some(set) = state.by_session.get_mut(&handle.session_id) {
                set.remove(&id);
                if set.is_empty() {
                    state.by_session.remove(&handle.session_id);
                }
            }
        }
    }

    /// Fans a server-originated message out to every client in a session,
    /// optionally skipping the one that triggered it (e.g. a relayed
    /// `chaos_attack`/`game_update`, which only needs to reach the others).
    pub fn broadcast_to_session(&self, session_id: &SessionId, except: Option<ClientId>, message: &ServerMessage) {
        let state = self.state.lock().unwrap();
        let Some(ids) = state.by_session.get(session_id) else {
            return;
        };
        for id in ids {
            if Some(*id) == except {
                continue;
            }
            if let Some(handle) = state.clients.get(id) {
                let _ = handle.sender.send(OutboundFrame::Message(message.clone()));
            }
        }
    }

    /// Delivers to every connection of one participant in a session (a
    /// participant may hold more than one open socket). Returns whether any
    /// connection was found to deliver to.
    pub fn send_to_session_player(&self, session_id: &SessionId, player_id: &PlayerId, message: &ServerMessage) -> bool {
        let state = self.state.lock().unwrap();
        let Some(ids) = state.by_session.get(session_id) else {
            return false;
        };
        let mut sent = false;
        for id in ids {
            if let Some(handle) = state.clients.get(id) {
                if &handle.player_id == player_id && handle.sender.send(OutboundFrame::Message(message.clone())).is_ok() {
                    sent = true;
                }
            }
        }
        sent
    }

    /// Forces every connection belonging to one participant closed (kick,
    /// ban, admin removal, leave).
    pub fn close_session_player(&self, session_id: &SessionId, player_id: &PlayerId, code: u16, reason: &str) {
        let state = self.state.lock().unwrap();
        let Some(ids) = state.by_session.get(session_id) else {
            return;
        };
        for id in ids {
            if let Some(handle) = state.clients.get(id) {
                if &handle.player_id == player_id {
                    let _ = handle.sender.send(OutboundFrame::Close(code, reason.to_string()));
                }
            }
        }
    }

    /// Forces every connection in a session closed (idle expiry, admin
    /// session expiry).
    pub fn close_session(&self, session_id: &SessionId, code: u16, reason: &str) {
        let state = self.state.lock().unwrap();
        let Some(ids) = state.by_session.get(session_id) else {
            return;
        };
        for id in ids {
            if let Some(handle) = state.clients.get(id) {
                let _ = handle.sender.send(OutboundFrame::Close(code, reason.to_string()));
            }
        }
    }
}

/// Drives one accepted WebSocket connection end to end: authenticates the
/// handshake query against `World`, registers an outbound channel, then
/// multiplexes inbound frames, outbound server pushes, and the access
/// token's expiry into a single event loop. Runs until the client
/// disconnects, the token expires, or a protocol error forces a close.
pub async fn run_connection(
    io: ConnIo,
    query: WebSocketQuery,
    world: Addr<World>,
    registry: std::sync::Arc<ClientRegistry>,
    max_message_bytes: usize,
) {
    let auth = match world
        .send(AuthenticateSocket {
            session_id: query.session.clone(),
            player_id: query.player_id.clone(),
            token: query.token.clone(),
        })
        .await
    {
        Ok(Ok(auth)) => auth,
        Ok(Err(kind)) => {
            let (_, mut writer) = tokio::io::split(io);
            let _ = wire::write_close(&mut writer, kind.ws_close_code(), kind.as_reason()).await;
            return;
        }
        Err(_) => return,
    };

    let (mut reader, mut writer) = tokio::io::split(io);
    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundFrame>();
    let client_id = registry.register(query.session.clone(), query.player_id.clone(), tx.clone());
    let _ = tx.send(OutboundFrame::Message(ServerMessage::SessionState {
        session: Box::new(auth.session),
    }));

    let now = protocol::now_unix_millis();
    let remaining = auth.access_expires_at.saturating_sub(now);
    let sleep = tokio::time::sleep(Duration::from_millis(remaining));
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => {
                let _ = wire::write_close(
                    &mut writer,
                    ErrorKind::SessionExpired.ws_close_code(),
                    ErrorKind::SessionExpired.as_reason(),
                )
                .await;
                break;
            }
            outbound = rx.recv() => {
                match outbound {
                    Some(OutboundFrame::Message(message)) => {
                        if let Ok(text) = serde_json::to_string(&message) {
                            if wire::write_text(&mut writer, &text).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(OutboundFrame::Pong(payload)) => {
                        if wire::write_pong(&mut writer, &payload).await.is_err() {
                            break;
                        }
                    }
                    Some(OutboundFrame::Close(code, reason)) => {
                        let _ = wire::write_close(&mut writer, code, &reason).await;
                        break;
                    }
                    None => break,
                }
            }
            frame = wire::read_frame(&mut reader, max_message_bytes) => {
                match frame {
                    Ok(frame) => {
                        let keep_going = handle_inbound_frame(
                            frame,
                            &query.session,
                            &query.player_id,
                            client_id,
                            &world,
                            &registry,
                            &mut writer,
                        )
                        .await;
                        if !keep_going {
                            break;
                        }
                    }
                    Err(kind) => {
                        let _ = wire::write_close(&mut writer, kind.ws_close_code(), kind.as_reason()).await;
                        break;
                    }
                }
            }
        }
    }

    registry.unregister(client_id);
    let _ = world
        .send(SocketClosed {
            session_id: query.session,
            player_id: query.player_id,
        })
        .await;
}

/// Returns `false` when the connection should close.
async fn handle_inbound_frame<W: AsyncWrite + Unpin>(
    frame: wire::Frame,
    session_id: &SessionId,
    player_id: &PlayerId,
    client_id: ClientId,
    world: &Addr<World>,
    registry: &ClientRegistry,
    writer: &mut W,
) -> bool {
    match frame.opcode {
        Opcode::Close => false,
        Opcode::Ping => wire::write_pong(writer, &frame.payload).await.is_ok(),
        Opcode::Pong => true,
        Opcode::Binary | Opcode::Continuation => {
            let _ = wire::write_close(
                writer,
                ErrorKind::UnsupportedOpcode.ws_close_code(),
                ErrorKind::UnsupportedOpcode.as_reason(),
            )
            .await;
            false
        }
        Opcode::Text => {
            let Ok(text) = std::str::from_utf8(&frame.payload) else {
                let _ = wire::write_close(
                    writer,
                    ErrorKind::InvalidPayload.ws_close_code(),
                    ErrorKind::InvalidPayload.as_reason(),
                )
                .await;
                return false;
            };
            let message: ClientMessage = match serde_json::from_str(text) {
                Ok(message) => message,
                Err(_) => {
                    let _ = wire::write_close(
                        writer,
                        ErrorKind::InvalidPayload.ws_close_code(),
                        ErrorKind::InvalidPayload.as_reason(),
                    )
                    .await;
                    return false;
                }
            };
            dispatch_client_message(message, session_id, player_id, client_id, world, registry, writer).await
        }
    }
}

async fn dispatch_client_message<W: AsyncWrite + Unpin>(
    message: ClientMessage,
    session_id: &SessionId,
    player_id: &PlayerId,
    client_id: ClientId,
    world: &Addr<World>,
    registry: &ClientRegistry,
    writer: &mut W,
) -> bool {
    match message {
        ClientMessage::ChaosAttack { payload } => {
            relay(world, registry, session_id, player_id, client_id, RealtimePayload::ChaosAttack(payload)).await
        }
        ClientMessage::ParticleEmit { payload } => {
            relay(world, registry, session_id, player_id, client_id, RealtimePayload::ParticleEmit(payload)).await
        }
        ClientMessage::GameUpdate { payload } => {
            relay(world, registry, session_id, player_id, client_id, RealtimePayload::GameUpdate(payload)).await
        }
        ClientMessage::PlayerNotification { payload } => {
            relay(
                world,
                registry,
                session_id,
                player_id,
                client_id,
                RealtimePayload::PlayerNotification(payload),
            )
            .await
        }
        ClientMessage::RoomChannel(payload) => {
            match world
                .send(ProcessRoomChannel {
                    session_id: session_id.clone(),
                    sender_id: player_id.clone(),
                    payload,
                })
                .await
            {
                Ok(Ok(outcome)) => {
                    for recipient in &outcome.recipients {
                        registry.send_to_session_player(session_id, recipient, &outcome.message);
                    }
                    !outcome.sender_removed
                }
                Ok(Err(_)) | Err(_) => true,
            }
        }
        ClientMessage::TurnEnd => {
            let _ = world
                .send(ProcessTurnEnd {
                    session_id: session_id.clone(),
                    player_id: player_id.clone(),
                })
                .await;
            true
        }
        ClientMessage::TurnAction { payload } => {
            match world
                .send(ProcessTurnAction {
                    session_id: session_id.clone(),
                    player_id: player_id.clone(),
                    payload,
                })
                .await
            {
                Ok(Ok(outcome)) | Ok(Err(outcome)) => {
                    if let Ok(text) = serde_json::to_string(&outcome.message) {
                        let _ = wire::write_text(writer, &text).await;
                    }
                    true
                }
                Err(_) => true,
            }
        }
    }
}

async fn relay(
    world: &Addr<World>,
    registry: &ClientRegistry,
    session_id: &SessionId,
    sender_id: &PlayerId,
    client_id: ClientId,
    payload: RealtimePayload,
) -> bool {
    if let Ok(Ok(message)) = world
        .send(ProcessRealtimeMessage {
            session_id: session_id.clone(),
            sender_id: sender_id.clone(),
            payload,
        })
        .await
    {
        registry.broadcast_to_session(session_id, Some(client_id), &message);
    }
    true
}
