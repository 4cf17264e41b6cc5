//! The `World` actor (`SPEC_FULL.md` §5): a single actix actor owning the
//! one process-wide [`Store`], realizing "a global store lock for the whole
//! world." Every mutation arrives as an actix message and is applied
//! synchronously inside a `Handler`; the actor's mailbox is the serialization
//! point so nothing in `store.rs`/`turn.rs`/`action.rs`/`membership.rs`/
//! `session_control.rs`/`admin.rs` needs its own locking.
//!
//! `ctx.run_interval` drives one periodic tick that does three things in a
//! single pass, per §5's implementation note: sweeps idle sessions past their
//! `expires_at`, sweeps turn timeouts (warning, then auto-advance), and
//! drives any bot whose turn has become active. This is distinct from
//! `turn::ensure_session_turn_state`, which runs synchronously inline inside
//! every mutating handler instead of waiting for the next tick.
//!
//! Rehydration (`store.rs`'s `RetryProfile`/`retry_backoff`) collapses to a
//! single `persistence.load()` at construction time in this single-process
//! realization: the `World` actor is the sole writer of the only `Store`
//! there is, so a later cache miss against a second, independent backing
//! store cannot happen here the way it would in a multi-process deployment.
//! See `DESIGN.md` for this Open Question resolution.

use crate::admin::{self, BootstrapAllowlist, ResolvedRole};
use crate::bot::BotEngine;
use crate::conduct::ConductFilterRegistry;
use crate::membership::{self, RemovalResult, RemovalSource};
use crate::options::Options;
use crate::session_control::{self, SessionTarget};
use crate::socket::ClientRegistry;
use crate::store::{PersistenceAdapter, Store};
use crate::turn;
use actix::{Actor, Context, Handler, Message};
use log::{debug, info};
use protocol::{
    AdminRole, AuthBundle, CreateSessionRequest, DemoControlAction, ErrorKind, GameLog,
    GameLogType, JoinSessionRequest, ModerationAction, ParticipantStateAction, PlayerId,
    RoomChannelPayload, ServerMessage, Session, SessionId, TokenKind, TurnActionPayload,
    TurnPhase, UnixMillis,
};
use std::sync::Arc;
use std::time::Duration;

/// How often the background tick runs.
const TICK_INTERVAL: Duration = Duration::from_millis(1000);
/// How long before a turn expires its warning is sent (once per turn).
const TURN_TIMEOUT_WARNING_LEAD_MS: UnixMillis = 5_000;
/// Bot-cascade iteration guard: a session can't meaningfully chain more bot
/// turns than it has participants before something is wrong.
const MAX_BOT_CASCADE_STEPS: usize = 32;

pub struct World {
    store: Store,
    persistence: Arc<dyn PersistenceAdapter>,
    bot_engine: Arc<dyn BotEngine>,
    conduct: Arc<dyn ConductFilterRegistry>,
    bootstrap: Arc<BootstrapAllowlist>,
    registry: Arc<ClientRegistry>,
    idle_ttl_ms: u64,
    turn_timeout_ms: u64,
    max_multiplayer_human_players: u32,
    min_bots: u32,
    max_bots: u32,
}

/// An owned stand-in for `session_control::SessionTarget`, since actix
/// messages can't carry borrowed data.
#[derive(Clone, Debug)]
pub enum SessionLookup {
    Id(SessionId),
    RoomCode(String),
}

pub struct SocketAuth {
    pub session: Session,
    pub access_expires_at: UnixMillis,
}

pub struct RoomChannelOutcome {
    pub message: ServerMessage,
    pub recipients: Vec<PlayerId>,
    pub sender_removed: bool,
}

impl World {
    pub async fn new(
        options: &Options,
        persistence: Arc<dyn PersistenceAdapter>,
        bot_engine: Arc<dyn BotEngine>,
        conduct: Arc<dyn ConductFilterRegistry>,
        bootstrap: Arc<BootstrapAllowlist>,
        registry: Arc<ClientRegistry>,
    ) -> Self {
        let store = persistence.load().await;
        info!(
            "rehydrated store: {} sessions, {} players",
            store.sessions.len(),
            store.players.len()
        );
        Self {
            store,
            persistence,
            bot_engine,
            conduct,
            bootstrap,
            registry,
            idle_ttl_ms: options.idle_ttl_ms,
            turn_timeout_ms: options.turn_timeout_ms,
            max_multiplayer_human_players: options.max_multiplayer_human_players,
            min_bots: options.min_bots as u32,
            max_bots: options.max_bots as u32,
        }
    }

    fn normalize_bot_count(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.min_bots)
            .clamp(self.min_bots, self.max_bots)
    }

    fn resolve_role(&self, uid: &PlayerId) -> Option<AdminRole> {
        let stored = self.store.players.get(uid).and_then(|p| p.admin_role);
        let ResolvedRole { role, .. } =
            admin::resolve_admin_role_for_identity(uid.as_str(), None, &self.bootstrap, stored);
        role
    }

    fn persist_async(&self) {
        let snapshot = self.store.clone();
        let persistence = Arc::clone(&self.persistence);
        tokio::spawn(async move {
            persistence.save(&snapshot).await;
        });
    }

    fn broadcast(&self, session_id: &SessionId, messages: &[ServerMessage]) {
        for message in messages {
            self.registry.broadcast_to_session(session_id, None, message);
        }
    }

    fn broadcast_session_state(&self, session: &Session) {
        self.registry.broadcast_to_session(
            &session.session_id,
            None,
            &ServerMessage::SessionState {
                session: Box::new(session.clone()),
            },
        );
    }

    /// Runs bots to completion while the active participant is a bot with an
    /// `await_roll` turn, bounded by `MAX_BOT_CASCADE_STEPS`. `execute_bot_turn`
    /// already advances the turn internally, so this just keeps pulling
    /// messages until a human is up or nothing moves.
    fn drive_bot_cascade(&mut self, session_id: &SessionId, now: UnixMillis) -> Vec<ServerMessage> {
        let mut all_messages = Vec::new();
        for _ in 0..MAX_BOT_CASCADE_STEPS {
            let next_bot = {
                let Some(session) = self.store.sessions.get(session_id) else {
                    break;
                };
                if session.turn_state.phase != TurnPhase::AwaitRoll {
                    break;
                }
                match &session.turn_state.active_turn_player_id {
                    Some(pid) => session
                        .participants
                        .get(pid)
                        .filter(|p| p.is_bot)
                        .map(|_| pid.clone()),
                    None => None,
                }
            };
            let Some(bot_id) = next_bot else { break };
            let Some(session) = self.store.sessions.get_mut(session_id) else {
                break;
            };
            let messages = crate::action::execute_bot_turn(session, &bot_id, self.bot_engine.as_ref(), now);
            if messages.is_empty() {
                break;
            }
            all_messages.extend(messages);
        }
        all_messages
    }

    fn tick(&mut self, now: UnixMillis) {
        self.sweep_idle_sessions(now);
        self.sweep_turn_timeouts(now);

        let session_ids: Vec<SessionId> = self.store.sessions.keys().cloned().collect();
        for session_id in session_ids {
            let messages = self.drive_bot_cascade(&session_id, now);
            if !messages.is_empty() {
                self.broadcast(&session_id, &messages);
                self.persist_async();
            }
        }
    }

    fn sweep_idle_sessions(&mut self, now: UnixMillis) {
        let expired: Vec<SessionId> = self
            .store
            .sessions
            .values()
            .filter(|s| !s.session_complete && !s.is_alive(now))
            .map(|s| s.session_id.clone())
            .collect();

        for session_id in expired {
            let Some(session) = self.store.sessions.get_mut(&session_id) else {
                continue;
            };
            session.session_complete = true;
            session.completed_at = Some(now);
            let snapshot = session.clone();
            self.store.record_log(
                None,
                Some(session_id.clone()),
                GameLogType::SessionExpired,
                now,
                serde_json::json!({"action": "idle_expire"}),
            );
            self.registry
                .close_session(&session_id, 1000, "session_expired");
            self.broadcast_session_state(&snapshot);
            debug!("session {} idle-expired", session_id);
        }
        self.store.compact_log_store();
    }

    fn sweep_turn_timeouts(&mut self, now: UnixMillis) {
        let session_ids: Vec<SessionId> = self.store.sessions.keys().cloned().collect();
        for session_id in session_ids {
            let (warn_target, advance_target) = {
                let Some(session) = self.store.sessions.get(&session_id) else {
                    continue;
                };
                let (Some(pid), Some(expires_at)) = (
                    session.turn_state.active_turn_player_id.clone(),
                    session.turn_state.turn_expires_at,
                ) else {
                    continue;
                };
                let already_warned = session
                    .participants
                    .get(&pid)
                    .and_then(|p| p.turn_timeout_round)
                    == Some(session.turn_state.turn_number);
                let warn = !already_warned
                    && now + TURN_TIMEOUT_WARNING_LEAD_MS >= expires_at
                    && now < expires_at;
                let advance = now >= expires_at;
                (warn.then(|| (pid.clone(), expires_at)), advance.then_some(pid))
            };

            if let Some((pid, expires_at)) = warn_target {
                if let Some(session) = self.store.sessions.get_mut(&session_id) {
                    if let Some(p) = session.participants.get_mut(&pid) {
                        p.turn_timeout_round = Some(session.turn_state.turn_number);
                    }
                }
                self.broadcast(
                    &session_id,
                    &[ServerMessage::TurnTimeoutWarning {
                        player_id: pid,
                        turn_expires_at: expires_at,
                    }],
                );
            }

            if let Some(pid) = advance_target {
                if let Some(session) = self.store.sessions.get_mut(&session_id) {
                    if let Some(p) = session.participants.get_mut(&pid) {
                        p.turn_timeout_count += 1;
                    }
                }
                let mut messages = vec![ServerMessage::TurnAutoAdvanced {
                    player_id: pid.clone(),
                    source: protocol::AutoAdvanceSource::Server,
                }];
                if let Some(session) = self.store.sessions.get_mut(&session_id) {
                    if let Ok((turn_end, turn_start)) = turn::advance_session_turn(session, &pid, now) {
                        messages.push(turn_end);
                        if let Some(start) = turn_start {
                            messages.push(start);
                        }
                    }
                }
                messages.extend(self.drive_bot_cascade(&session_id, now));
                self.broadcast(&session_id, &messages);
                self.persist_async();
            }
        }
    }
}

impl Actor for World {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        use actix::AsyncContext;
        ctx.run_interval(TICK_INTERVAL, |act, _ctx| {
            let now = protocol::now_unix_millis();
            act.tick(now);
        });
    }
}

// ---------------------------------------------------------------------
// Session Control Service (C6) messages
// ---------------------------------------------------------------------

#[derive(Message)]
#[rtype(result = "Vec<Session>")]
pub struct ListRooms {
    pub limit: Option<u32>,
}

impl Handler<ListRooms> for World {
    type Result = Vec<Session>;
    fn handle(&mut self, msg: ListRooms, _ctx: &mut Context<Self>) -> Self::Result {
        let now = protocol::now_unix_millis();
        session_control::list_rooms(&self.store, msg.limit, now)
            .into_iter()
            .cloned()
            .collect()
    }
}

#[derive(Message)]
#[rtype(result = "Result<(SessionId, AuthBundle), ErrorKind>")]
pub struct CreateSession {
    pub request: CreateSessionRequest,
}

impl Handler<CreateSession> for World {
    type Result = Result<(SessionId, AuthBundle), ErrorKind>;
    fn handle(&mut self, msg: CreateSession, _ctx: &mut Context<Self>) -> Self::Result {
        let now = protocol::now_unix_millis();
        let mut request = msg.request;
        request.bot_count = Some(self.normalize_bot_count(request.bot_count));
        let result = session_control::create_session(
            &mut self.store,
            request,
            self.idle_ttl_ms,
            self.turn_timeout_ms,
            now,
        );
        if let Ok((session_id, _)) = &result {
            self.store.record_log(
                None,
                Some(session_id.clone()),
                GameLogType::SessionCreated,
                now,
                serde_json::json!({}),
            );
            self.persist_async();
        }
        result
    }
}

#[derive(Message)]
#[rtype(result = "Result<Session, ErrorKind>")]
pub struct GetSession {
    pub session_id: SessionId,
}

impl Handler<GetSession> for World {
    type Result = Result<Session, ErrorKind>;
    fn handle(&mut self, msg: GetSession, _ctx: &mut Context<Self>) -> Self::Result {
        self.store
            .sessions
            .get(&msg.session_id)
            .cloned()
            .ok_or(ErrorKind::UnknownSession)
    }
}

#[derive(Message)]
#[rtype(result = "Result<(SessionId, Session), ErrorKind>")]
pub struct JoinSession {
    pub target: SessionLookup,
    pub request: JoinSessionRequest,
}

impl Handler<JoinSession> for World {
    type Result = Result<(SessionId, Session), ErrorKind>;
    fn handle(&mut self, msg: JoinSession, _ctx: &mut Context<Self>) -> Self::Result {
        let now = protocol::now_unix_millis();
        let mut request = msg.request;
        request.bot_count = request.bot_count.map(|n| self.normalize_bot_count(Some(n)));
        let target = match &msg.target {
            SessionLookup::Id(id) => SessionTarget::Id(id),
            SessionLookup::RoomCode(code) => SessionTarget::RoomCode(code.as_str()),
        };
        let session_id = session_control::join_session_by_target(
            &mut self.store,
            target,
            request,
            self.max_multiplayer_human_players,
            now,
        )?;
        let session = self.store.sessions[&session_id].clone();
        self.broadcast_session_state(&session);
        self.persist_async();
        Ok((session_id, session))
    }
}

#[derive(Message)]
#[rtype(result = "Result<(), ErrorKind>")]
pub struct LeaveSession {
    pub session_id: SessionId,
    pub player_id: PlayerId,
}

impl Handler<LeaveSession> for World {
    type Result = Result<(), ErrorKind>;
    fn handle(&mut self, msg: LeaveSession, _ctx: &mut Context<Self>) -> Self::Result {
        let now = protocol::now_unix_millis();
        let session = self
            .store
            .sessions
            .get_mut(&msg.session_id)
            .ok_or(ErrorKind::UnknownSession)?;
        let result =
            membership::remove_participant_from_session(session, &msg.player_id, RemovalSource::Leave, now);
        self.finish_removal(&msg.session_id, &msg.player_id, result);
        Ok(())
    }
}

impl World {
    /// Shared tail for every removal path (leave/kick/ban/admin/auto-ban):
    /// broadcast the resulting turn-start (if any) and the fresh session
    /// state, force-close the departed player's sockets, and persist.
    fn finish_removal(&mut self, session_id: &SessionId, player_id: &PlayerId, result: RemovalResult) {
        if let Some(turn_start) = &result.turn_start {
            self.broadcast(session_id, std::slice::from_ref(turn_start));
        }
        self.registry
            .close_session_player(session_id, player_id, 1000, result.reason);
        if let Some(session) = self.store.sessions.get(session_id) {
            self.broadcast_session_state(session);
        }
        self.persist_async();
    }
}

#[derive(Message)]
#[rtype(result = "Result<(), ErrorKind>")]
pub struct Heartbeat {
    pub session_id: SessionId,
    pub player_id: PlayerId,
}

impl Handler<Heartbeat> for World {
    type Result = Result<(), ErrorKind>;
    fn handle(&mut self, msg: Heartbeat, _ctx: &mut Context<Self>) -> Self::Result {
        let now = protocol::now_unix_millis();
        session_control::heartbeat(&mut self.store, &msg.session_id, &msg.player_id, now)
    }
}

#[derive(Message)]
#[rtype(result = "Result<Session, ErrorKind>")]
pub struct SetParticipantState {
    pub session_id: SessionId,
    pub player_id: PlayerId,
    pub action: ParticipantStateAction,
}

impl Handler<SetParticipantState> for World {
    type Result = Result<Session, ErrorKind>;
    fn handle(&mut self, msg: SetParticipantState, _ctx: &mut Context<Self>) -> Self::Result {
        let now = protocol::now_unix_millis();
        session_control::set_participant_state(&mut self.store, &msg.session_id, &msg.player_id, msg.action, now)?;
        let session = self.store.sessions[&msg.session_id].clone();
        self.broadcast_session_state(&session);
        self.persist_async();
        Ok(session)
    }
}

#[derive(Message)]
#[rtype(result = "Result<bool, ErrorKind>")]
pub struct QueueNextGame {
    pub session_id: SessionId,
    pub player_id: PlayerId,
}

impl Handler<QueueNextGame> for World {
    type Result = Result<bool, ErrorKind>;
    fn handle(&mut self, msg: QueueNextGame, _ctx: &mut Context<Self>) -> Self::Result {
        let now = protocol::now_unix_millis();
        let result =
            session_control::queue_participant_for_next_game(&mut self.store, &msg.session_id, &msg.player_id, now);
        if result.is_ok() {
            self.persist_async();
        }
        result
    }
}

#[derive(Message)]
#[rtype(result = "Result<AuthBundle, ErrorKind>")]
pub struct RefreshAuth {
    pub session_id: SessionId,
    pub player_id: PlayerId,
}

impl Handler<RefreshAuth> for World {
    type Result = Result<AuthBundle, ErrorKind>;
    fn handle(&mut self, msg: RefreshAuth, _ctx: &mut Context<Self>) -> Self::Result {
        let now = protocol::now_unix_millis();
        let result = session_control::refresh_session_auth(&mut self.store, &msg.session_id, &msg.player_id, now);
        if result.is_ok() {
            self.persist_async();
        }
        result
    }
}

#[derive(Message)]
#[rtype(result = "Result<Session, ErrorKind>")]
pub struct ApplyDemoControl {
    pub session_id: SessionId,
    pub player_id: PlayerId,
    pub action: DemoControlAction,
}

impl Handler<ApplyDemoControl> for World {
    type Result = Result<Session, ErrorKind>;
    fn handle(&mut self, msg: ApplyDemoControl, _ctx: &mut Context<Self>) -> Self::Result {
        let now = protocol::now_unix_millis();
        session_control::apply_demo_control(&mut self.store, &msg.session_id, &msg.player_id, msg.action, now)?;
        let session = self.store.sessions[&msg.session_id].clone();
        self.broadcast_session_state(&session);
        self.persist_async();
        Ok(session)
    }
}

// ---------------------------------------------------------------------
// Membership Service (C5) messages
// ---------------------------------------------------------------------

#[derive(Message)]
#[rtype(result = "Result<(), ErrorKind>")]
pub struct Moderate {
    pub session_id: SessionId,
    pub requester_player_id: PlayerId,
    pub target_player_id: PlayerId,
    pub action: ModerationAction,
}

impl Handler<Moderate> for World {
    type Result = Result<(), ErrorKind>;
    fn handle(&mut self, msg: Moderate, _ctx: &mut Context<Self>) -> Self::Result {
        let now = protocol::now_unix_millis();
        let requester_role = self.resolve_role(&msg.requester_player_id);
        let session = self
            .store
            .sessions
            .get_mut(&msg.session_id)
            .ok_or(ErrorKind::UnknownSession)?;
        let result = membership::moderate(
            session,
            &msg.requester_player_id,
            &msg.target_player_id,
            msg.action,
            requester_role,
            now,
        )?;
        self.finish_removal(&msg.session_id, &msg.target_player_id, result);
        Ok(())
    }
}

// ---------------------------------------------------------------------
// Action Engine (C4) + Session Turn Engine (C3) messages
// ---------------------------------------------------------------------

pub struct TurnActionOutcome {
    pub message: ServerMessage,
    pub sync: bool,
}

#[derive(Message)]
#[rtype(result = "Result<TurnActionOutcome, TurnActionOutcome>")]
pub struct ProcessTurnAction {
    pub session_id: SessionId,
    pub player_id: PlayerId,
    pub payload: TurnActionPayload,
}

impl Handler<ProcessTurnAction> for World {
    type Result = Result<TurnActionOutcome, TurnActionOutcome>;
    fn handle(&mut self, msg: ProcessTurnAction, _ctx: &mut Context<Self>) -> Self::Result {
        let now = protocol::now_unix_millis();
        let Some(session) = self.store.sessions.get_mut(&msg.session_id) else {
            return Err(TurnActionOutcome {
                message: ServerMessage::Error {
                    reason: ErrorKind::UnknownSession.as_reason(),
                },
                sync: false,
            });
        };
        match crate::action::process_turn_action(session, &msg.player_id, msg.payload, now) {
            Ok(success) => {
                if success.should_broadcast_state {
                    let snapshot = session.clone();
                    self.broadcast_session_state(&snapshot);
                }
                if success.should_persist {
                    self.persist_async();
                }
                Ok(TurnActionOutcome {
                    message: success.message,
                    sync: false,
                })
            }
            Err(failure) => Err(TurnActionOutcome {
                message: ServerMessage::Error {
                    reason: failure.kind.as_reason(),
                },
                sync: failure.sync,
            }),
        }
    }
}

#[derive(Message)]
#[rtype(result = "Result<Vec<ServerMessage>, ErrorKind>")]
pub struct ProcessTurnEnd {
    pub session_id: SessionId,
    pub player_id: PlayerId,
}

impl Handler<ProcessTurnEnd> for World {
    type Result = Result<Vec<ServerMessage>, ErrorKind>;
    fn handle(&mut self, msg: ProcessTurnEnd, _ctx: &mut Context<Self>) -> Self::Result {
        let now = protocol::now_unix_millis();
        let session = self
            .store
            .sessions
            .get_mut(&msg.session_id)
            .ok_or(ErrorKind::UnknownSession)?;
        let (turn_end, turn_start) = turn::advance_session_turn(session, &msg.player_id, now)?;
        let mut messages = vec![turn_end];
        if let Some(start) = turn_start {
            messages.push(start);
        }
        messages.extend(self.drive_bot_cascade(&msg.session_id, now));
        self.broadcast(&msg.session_id, &messages);
        self.persist_async();
        Ok(messages)
    }
}

// ---------------------------------------------------------------------
// Chat conduct / realtime relay messages
// ---------------------------------------------------------------------

#[derive(Message)]
#[rtype(result = "Result<RoomChannelOutcome, ErrorKind>")]
pub struct ProcessRoomChannel {
    pub session_id: SessionId,
    pub sender_id: PlayerId,
    pub payload: RoomChannelPayload,
}

impl Handler<ProcessRoomChannel> for World {
    type Result = Result<RoomChannelOutcome, ErrorKind>;
    fn handle(&mut self, msg: ProcessRoomChannel, _ctx: &mut Context<Self>) -> Self::Result {
        let now = protocol::now_unix_millis();
        let session = self
            .store
            .sessions
            .get_mut(&msg.session_id)
            .ok_or(ErrorKind::UnknownSession)?;
        if !session.participants.contains_key(&msg.sender_id) {
            return Err(ErrorKind::UnknownPlayer);
        }

        let preflight = self.conduct.preflight(session, &msg.sender_id);
        if !preflight.allowed {
            return Err(ErrorKind::RoomChannelSenderRestricted);
        }

        let mut entry = session
            .chat_conduct_state
            .players
            .remove(&msg.sender_id)
            .unwrap_or_default();
        let verdict = self.conduct.inbound(&mut entry, &msg.payload.text, now);
        session.chat_conduct_state.players.insert(msg.sender_id.clone(), entry);
        if !verdict.allowed {
            return Err(ErrorKind::RoomChannelMessageBlocked);
        }

        if verdict.should_auto_ban {
            let result = membership::remove_participant_from_session(
                session,
                &msg.sender_id,
                RemovalSource::ConductAutoBan,
                now,
            );
            self.store.record_log(
                Some(msg.sender_id.clone()),
                Some(msg.session_id.clone()),
                GameLogType::Moderation,
                now,
                serde_json::json!({"action": "conduct_auto_ban"}),
            );
            self.finish_removal(&msg.session_id, &msg.sender_id, result);
            return Ok(RoomChannelOutcome {
                message: ServerMessage::Error {
                    reason: ErrorKind::InteractionBlocked.as_reason(),
                },
                recipients: vec![],
                sender_removed: true,
            });
        }

        let message = ServerMessage::RoomChannel {
            from_player_id: msg.sender_id.clone(),
            text: verdict.censored_text,
        };

        let recipients = match &msg.payload.target_player_id {
            Some(target) => {
                let sender = session.participants.get(&msg.sender_id).cloned();
                let recipient = session.participants.get(target).cloned();
                match (sender, recipient) {
                    (Some(sender), Some(recipient)) => {
                        if self.conduct.direct_delivery(&sender, &recipient).allowed {
                            vec![target.clone()]
                        } else {
                            return Err(ErrorKind::RoomChannelBlocked);
                        }
                    }
                    _ => return Err(ErrorKind::UnknownPlayer),
                }
            }
            None => {
                let sender = session.participants.get(&msg.sender_id).cloned();
                let Some(sender) = sender else {
                    return Err(ErrorKind::UnknownPlayer);
                };
                session
                    .participants
                    .values()
                    .filter(|p| p.player_id != msg.sender_id)
                    .filter(|p| self.conduct.direct_delivery(&sender, p).allowed)
                    .map(|p| p.player_id.clone())
                    .collect()
            }
        };

        session.last_activity_at = now;
        self.persist_async();
        Ok(RoomChannelOutcome {
            message,
            recipients,
            sender_removed: false,
        })
    }
}

#[derive(Message)]
#[rtype(result = "Result<ServerMessage, ErrorKind>")]
pub struct ProcessRealtimeMessage {
    pub session_id: SessionId,
    pub sender_id: PlayerId,
    pub payload: RealtimePayload,
}

pub enum RealtimePayload {
    ChaosAttack(serde_json::Value),
    ParticleEmit(serde_json::Value),
    GameUpdate(serde_json::Value),
    PlayerNotification(serde_json::Value),
}

impl Handler<ProcessRealtimeMessage> for World {
    type Result = Result<ServerMessage, ErrorKind>;
    fn handle(&mut self, msg: ProcessRealtimeMessage, _ctx: &mut Context<Self>) -> Self::Result {
        let session = self
            .store
            .sessions
            .get(&msg.session_id)
            .ok_or(ErrorKind::UnknownSession)?;
        if !session.participants.contains_key(&msg.sender_id) {
            return Err(ErrorKind::UnknownPlayer);
        }
        if !self.conduct.preflight(session, &msg.sender_id).allowed {
            return Err(ErrorKind::RoomChannelSenderRestricted);
        }
        Ok(match msg.payload {
            RealtimePayload::ChaosAttack(payload) => ServerMessage::GameUpdate { payload },
            RealtimePayload::ParticleEmit(payload) => ServerMessage::GameUpdate { payload },
            RealtimePayload::GameUpdate(payload) => ServerMessage::GameUpdate { payload },
            RealtimePayload::PlayerNotification(payload) => ServerMessage::PlayerNotification { payload },
        })
    }
}

// ---------------------------------------------------------------------
// WebSocket authentication
// ---------------------------------------------------------------------

#[derive(Message)]
#[rtype(result = "Result<SocketAuth, ErrorKind>")]
pub struct AuthenticateSocket {
    pub session_id: SessionId,
    pub player_id: PlayerId,
    pub token: String,
}

impl Handler<AuthenticateSocket> for World {
    type Result = Result<SocketAuth, ErrorKind>;
    fn handle(&mut self, msg: AuthenticateSocket, _ctx: &mut Context<Self>) -> Self::Result {
        use base64::Engine;
        let now = protocol::now_unix_millis();

        let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(msg.token.as_bytes())
            .map_err(|_| ErrorKind::TokenNotFound)?;
        let bytes: [u8; 32] = decoded.try_into().map_err(|_| ErrorKind::TokenNotFound)?;
        let hash = protocol::TokenHash(bytes);

        let token = self.store.tokens.get(&hash).ok_or(ErrorKind::TokenNotFound)?;
        if !token.is_live(now) || token.kind != TokenKind::Access {
            return Err(ErrorKind::TokenNotFound);
        }
        if token.player_id != msg.player_id || token.session_id.as_ref() != Some(&msg.session_id) {
            return Err(ErrorKind::SessionTokenMismatch);
        }
        let access_expires_at = token.expires_at;

        let session = self
            .store
            .sessions
            .get_mut(&msg.session_id)
            .ok_or(ErrorKind::UnknownSession)?;
        if !session.is_alive(now) {
            return Err(ErrorKind::SessionExpired);
        }
        let participant = session
            .participants
            .get_mut(&msg.player_id)
            .ok_or(ErrorKind::UnknownPlayer)?;
        participant.last_heartbeat_at = now;
        session.last_activity_at = now;

        Ok(SocketAuth {
            session: session.clone(),
            access_expires_at,
        })
    }
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct SocketClosed {
    pub session_id: SessionId,
    pub player_id: PlayerId,
}

impl Handler<SocketClosed> for World {
    type Result = ();
    fn handle(&mut self, msg: SocketClosed, _ctx: &mut Context<Self>) -> Self::Result {
        debug!("socket closed: session={} player={}", msg.session_id, msg.player_id);
    }
}

// ---------------------------------------------------------------------
// Admin Plane (C8) messages
// ---------------------------------------------------------------------

#[derive(Message)]
#[rtype(result = "Result<AdminRole, ErrorKind>")]
pub struct AdminUpsertRole {
    pub actor_uid: PlayerId,
    pub target_uid: PlayerId,
    pub requested_role: AdminRole,
}

impl Handler<AdminUpsertRole> for World {
    type Result = Result<AdminRole, ErrorKind>;
    fn handle(&mut self, msg: AdminUpsertRole, _ctx: &mut Context<Self>) -> Self::Result {
        let now = protocol::now_unix_millis();
        let actor_role = self.resolve_role(&msg.actor_uid);
        if !admin::has_required_admin_role(actor_role, AdminRole::Owner) {
            return Err(if actor_role.is_none() {
                ErrorKind::MissingAdminRole
            } else {
                ErrorKind::Unauthorized
            });
        }
        let role = admin::upsert_role(
            &mut self.store,
            &msg.target_uid,
            msg.requested_role,
            &self.bootstrap,
            &msg.actor_uid,
            now,
        )?;
        self.persist_async();
        Ok(role)
    }
}

pub struct RoleView {
    pub role: Option<AdminRole>,
    pub source: &'static str,
}

#[derive(Message)]
#[rtype(result = "Result<RoleView, ErrorKind>")]
pub struct AdminGetRole {
    pub actor_uid: PlayerId,
    pub target_uid: PlayerId,
}

impl Handler<AdminGetRole> for World {
    type Result = Result<RoleView, ErrorKind>;
    fn handle(&mut self, msg: AdminGetRole, _ctx: &mut Context<Self>) -> Self::Result {
        let actor_role = self.resolve_role(&msg.actor_uid);
        if !admin::has_required_admin_role(actor_role, AdminRole::Viewer) {
            return Err(if actor_role.is_none() {
                ErrorKind::MissingAdminRole
            } else {
                ErrorKind::Unauthorized
            });
        }
        let stored = self.store.players.get(&msg.target_uid).and_then(|p| p.admin_role);
        let resolved =
            admin::resolve_admin_role_for_identity(msg.target_uid.as_str(), None, &self.bootstrap, stored);
        let source = match resolved.source {
            admin::RoleSource::Bootstrap => "bootstrap",
            admin::RoleSource::Assigned => "assigned",
            admin::RoleSource::None => "none",
        };
        Ok(RoleView {
            role: resolved.role,
            source,
        })
    }
}

#[derive(Message)]
#[rtype(result = "Result<bool, ErrorKind>")]
pub struct AdminExpireSession {
    pub actor_uid: PlayerId,
    pub session_id: SessionId,
}

impl Handler<AdminExpireSession> for World {
    type Result = Result<bool, ErrorKind>;
    fn handle(&mut self, msg: AdminExpireSession, _ctx: &mut Context<Self>) -> Self::Result {
        let now = protocol::now_unix_millis();
        let actor_role = self.resolve_role(&msg.actor_uid);
        let room_inventory_changed =
            admin::expire_session(&mut self.store, &msg.actor_uid, actor_role, &msg.session_id, now)?;
        self.registry
            .close_session(&msg.session_id, 1000, "admin_expired");
        if let Some(session) = self.store.sessions.get(&msg.session_id) {
            self.broadcast_session_state(session);
        }
        self.persist_async();
        Ok(room_inventory_changed)
    }
}

#[derive(Message)]
#[rtype(result = "Result<(), ErrorKind>")]
pub struct AdminRemoveParticipant {
    pub actor_uid: PlayerId,
    pub session_id: SessionId,
    pub target_player_id: PlayerId,
}

impl Handler<AdminRemoveParticipant> for World {
    type Result = Result<(), ErrorKind>;
    fn handle(&mut self, msg: AdminRemoveParticipant, _ctx: &mut Context<Self>) -> Self::Result {
        let now = protocol::now_unix_millis();
        let actor_role = self.resolve_role(&msg.actor_uid);
        let result = admin::remove_participant(
            &mut self.store,
            &msg.actor_uid,
            actor_role,
            &msg.session_id,
            &msg.target_player_id,
            now,
        )?;
        self.finish_removal(&msg.session_id, &msg.target_player_id, result);
        Ok(())
    }
}

#[derive(Message)]
#[rtype(result = "Result<(), ErrorKind>")]
pub struct AdminClearConductPlayer {
    pub actor_uid: PlayerId,
    pub session_id: SessionId,
    pub target_player_id: PlayerId,
}

impl Handler<AdminClearConductPlayer> for World {
    type Result = Result<(), ErrorKind>;
    fn handle(&mut self, msg: AdminClearConductPlayer, _ctx: &mut Context<Self>) -> Self::Result {
        let now = protocol::now_unix_millis();
        let actor_role = self.resolve_role(&msg.actor_uid);
        admin::clear_session_conduct_player(
            &mut self.store,
            &msg.actor_uid,
            actor_role,
            &msg.session_id,
            &msg.target_player_id,
            now,
        )?;
        self.persist_async();
        Ok(())
    }
}

#[derive(Message)]
#[rtype(result = "Result<(), ErrorKind>")]
pub struct AdminClearConductState {
    pub actor_uid: PlayerId,
    pub session_id: SessionId,
}

impl Handler<AdminClearConductState> for World {
    type Result = Result<(), ErrorKind>;
    fn handle(&mut self, msg: AdminClearConductState, _ctx: &mut Context<Self>) -> Self::Result {
        let now = protocol::now_unix_millis();
        let actor_role = self.resolve_role(&msg.actor_uid);
        admin::clear_session_conduct_state(&mut self.store, &msg.actor_uid, actor_role, &msg.session_id, now)?;
        self.persist_async();
        Ok(())
    }
}

#[derive(Message)]
#[rtype(result = "Result<Vec<GameLog>, ErrorKind>")]
pub struct AdminListLogs {
    pub actor_uid: PlayerId,
    pub limit: Option<u32>,
    pub player_id: Option<PlayerId>,
    pub session_id: Option<SessionId>,
}

impl Handler<AdminListLogs> for World {
    type Result = Result<Vec<GameLog>, ErrorKind>;
    fn handle(&mut self, msg: AdminListLogs, _ctx: &mut Context<Self>) -> Self::Result {
        let actor_role = self.resolve_role(&msg.actor_uid);
        if !admin::has_required_admin_role(actor_role, AdminRole::Viewer) {
            return Err(if actor_role.is_none() {
                ErrorKind::MissingAdminRole
            } else {
                ErrorKind::Unauthorized
            });
        }
        let limit = admin::clamp_log_limit(msg.limit, Store::LOG_HARD_CAP);
        Ok(self
            .store
            .logs_desc(limit, msg.player_id.as_ref(), msg.session_id.as_ref())
            .into_iter()
            .cloned()
            .collect())
    }
}

#[derive(Message)]
#[rtype(result = "Result<Vec<Session>, ErrorKind>")]
pub struct AdminListSessions {
    pub actor_uid: PlayerId,
    pub limit: Option<u32>,
}

impl Handler<AdminListSessions> for World {
    type Result = Result<Vec<Session>, ErrorKind>;
    fn handle(&mut self, msg: AdminListSessions, _ctx: &mut Context<Self>) -> Self::Result {
        let actor_role = self.resolve_role(&msg.actor_uid);
        if !admin::has_required_admin_role(actor_role, AdminRole::Viewer) {
            return Err(if actor_role.is_none() {
                ErrorKind::MissingAdminRole
            } else {
                ErrorKind::Unauthorized
            });
        }
        let limit = admin::clamp_log_limit(msg.limit, Store::LOG_HARD_CAP_WIDE);
        let mut sessions: Vec<Session> = self.store.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        sessions.truncate(limit);
        Ok(sessions)
    }
}
