//! Session Control Service (`SPEC_FULL.md` §4.6, C6): create/list rooms,
//! join, heartbeat, next-game queue, auth refresh. Every function here
//! assumes the caller (`world.rs`) has already rehydrated the relevant
//! session from the persistence adapter on a cache miss — the
//! rehydrate-then-reauthorize retry ladder (§4.6) lives there, the same
//! split `store.rs` uses for `retry_backoff` vs. its orchestration.

use crate::store::Store;
use crate::turn::ensure_session_turn_state;
use base64::Engine;
use protocol::{
    AuthBundle, BotProfile, ChatConductState, CreateSessionRequest, DemoControlAction, ErrorKind,
    JoinSessionRequest, Participant, ParticipantStateAction, PlayerId, RoomCode, RoomKind, Session,
    SessionId, TokenKind, TurnState, UnixMillis,
};
use std::collections::HashMap;

const DEFAULT_ROOM_LIMIT: u32 = 50;
const MAX_ROOM_LIMIT: u32 = 200;
const ACCESS_TOKEN_TTL_MS: u64 = 15 * 60 * 1000;
const REFRESH_TOKEN_TTL_MS: u64 = 7 * 24 * 60 * 60 * 1000;
const ROOM_CODE_ALLOCATION_ATTEMPTS: u32 = 10;

fn issue_token(
    store: &mut Store,
    player_id: &PlayerId,
    session_id: &SessionId,
    kind: TokenKind,
    ttl_ms: u64,
    now: UnixMillis,
) -> (String, u64) {
    let hash = protocol::random_token_hash();
    let expires_at = now + ttl_ms;
    store.tokens.insert(
        hash,
        protocol::AuthToken {
            token_hash: hash,
            player_id: player_id.clone(),
            session_id: Some(session_id.clone()),
            issued_at: now,
            expires_at,
            kind,
            revoked_at: None,
        },
    );
    (base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(hash.0), expires_at)
}

/// Bearer tokens are the same random bytes stored as the `TokenHash` key,
/// base64url-encoded. No separate hash step runs over them: there is no
/// sha256 dependency in this stack, and reusing `sha1` (already pulled in
/// for the WebSocket handshake) would just truncate/pad awkwardly to the
/// 32-byte `TokenHash` shape for no added opacity.
pub fn issue_auth_bundle(store: &mut Store, player_id: &PlayerId, session_id: &SessionId, now: UnixMillis) -> AuthBundle {
    let (access_token, access_expires_at) = issue_token(store, player_id, session_id, TokenKind::Access, ACCESS_TOKEN_TTL_MS, now);
    let (refresh_token, refresh_expires_at) = issue_token(store, player_id, session_id, TokenKind::Refresh, REFRESH_TOKEN_TTL_MS, now);
    AuthBundle {
        access_token,
        access_expires_at,
        refresh_token,
        refresh_expires_at,
    }
}

/// Public rooms, not complete, alive, sorted by (room priority asc,
/// active human count desc, human count desc, last activity desc).
pub fn list_rooms(store: &Store, raw_limit: Option<u32>, now: UnixMillis) -> Vec<&Session> {
    let limit = raw_limit
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_ROOM_LIMIT)
        .min(MAX_ROOM_LIMIT) as usize;
    let mut rooms: Vec<&Session> = store
        .sessions
        .values()
        .filter(|s| s.room_kind.is_public() && !s.session_complete && s.is_alive(now))
        .collect();
    rooms.sort_by(|a, b| {
        a.room_kind
            .priority()
            .cmp(&b.room_kind.priority())
            .then(b.active_human_count().cmp(&a.active_human_count()))
            .then(b.human_count().cmp(&a.human_count()))
            .then(b.last_activity_at.cmp(&a.last_activity_at))
    });
    rooms.truncate(limit);
    rooms
}

fn allocate_room_code(store: &Store, now: UnixMillis) -> Option<RoomCode> {
    for _ in 0..ROOM_CODE_ALLOCATION_ATTEMPTS {
        let candidate = protocol::random_room_code();
        if !store.room_code_taken(candidate.as_str(), now) {
            return Some(candidate);
        }
    }
    None
}

pub fn create_session(
    store: &mut Store,
    request: CreateSessionRequest,
    idle_ttl_ms: u64,
    turn_timeout_ms: u64,
    now: UnixMillis,
) -> Result<(SessionId, AuthBundle), ErrorKind> {
    let room_code = match request.room_code {
        Some(code) => {
            let code = RoomCode::new(code.to_ascii_uppercase());
            if store.room_code_taken(code.as_str(), now) {
                return Err(ErrorKind::RoomCodeTaken);
            }
            code
        }
        None => allocate_room_code(store, now).ok_or(ErrorKind::Internal)?,
    };

    let session_id = protocol::random_session_id();

    let mut participants = HashMap::new();
    let mut owner = Participant::new_human(request.player_id.clone(), request.display_name.clone(), now);
    owner.is_seated = true;
    owner.is_ready = true;
    participants.insert(request.player_id.clone(), owner);

    for i in 0..request.bot_count.unwrap_or(0) {
        let bot_id = PlayerId::new(format!("bot-{}-{}", session_id.as_str(), i));
        participants.insert(bot_id.clone(), Participant::new_bot(bot_id, BotProfile::default(), now));
    }

    let session = Session {
        session_id: session_id.clone(),
        room_code,
        room_kind: RoomKind::Private,
        owner_player_id: Some(request.player_id.clone()),
        game_difficulty: request.game_difficulty.unwrap_or_default(),
        game_config: request.game_config.unwrap_or_default(),
        demo_mode: request.demo_mode,
        demo_auto_run: request.demo_auto_run,
        demo_speed_mode: request.demo_speed_mode,
        created_at: now,
        game_started_at: None,
        last_activity_at: now,
        expires_at: now + idle_ttl_ms,
        next_game_starts_at: None,
        session_complete: false,
        completed_at: None,
        participants,
        turn_state: TurnState::new(turn_timeout_ms, now),
        chat_conduct_state: ChatConductState::default(),
        room_bans: HashMap::new(),
    };

    store.sessions.insert(session_id.clone(), session);
    if let Some(session) = store.sessions.get_mut(&session_id) {
        ensure_session_turn_state(session, now);
    }
    let bundle = issue_auth_bundle(store, &request.player_id, &session_id, now);
    Ok((session_id, bundle))
}

pub enum SessionTarget<'a> {
    Id(&'a SessionId),
    RoomCode(&'a str),
}

pub fn join_session_by_target(
    store: &mut Store,
    target: SessionTarget,
    request: JoinSessionRequest,
    max_multiplayer_human_players: u32,
    now: UnixMillis,
) -> Result<SessionId, ErrorKind> {
    let session_id = match target {
        SessionTarget::Id(id) => id.clone(),
        SessionTarget::RoomCode(code) => store
            .session_by_room_code(code)
            .map(|s| s.session_id.clone())
            .ok_or(ErrorKind::RoomNotFound)?,
    };

    let session = store.sessions.get_mut(&session_id).ok_or(ErrorKind::UnknownSession)?;
    if !session.is_alive(now) {
        return Err(ErrorKind::SessionExpired);
    }
    if session.room_bans.contains_key(&request.player_id) {
        return Err(ErrorKind::RoomBanned);
    }

    let already_participant = session.participants.contains_key(&request.player_id);
    if !already_participant && session.human_count() >= max_multiplayer_human_players as usize {
        return Err(ErrorKind::RoomFull);
    }

    match session.participants.get_mut(&request.player_id) {
        Some(existing) => {
            if let Some(name) = request.display_name {
                existing.display_name = Some(name);
            }
            existing.blocked_player_ids.extend(request.blocked_player_ids);
            existing.last_heartbeat_at = now;
        }
        None => {
            let mut participant = Participant::new_human(request.player_id.clone(), request.display_name, now);
            participant.blocked_player_ids = request.blocked_player_ids.into_iter().collect();
            session.participants.insert(request.player_id.clone(), participant);
        }
    }

    for i in 0..request.bot_count.unwrap_or(0) {
        let bot_id = PlayerId::new(format!("bot-{}-{}", session_id.as_str(), session.participants.len() as u32 + i));
        session
            .participants
            .entry(bot_id.clone())
            .or_insert_with(|| Participant::new_bot(bot_id, BotProfile::default(), now));
    }

    session.last_activity_at = now;
    ensure_session_turn_state(session, now);

    Ok(session_id)
}

pub fn heartbeat(store: &mut Store, session_id: &SessionId, player_id: &PlayerId, now: UnixMillis) -> Result<(), ErrorKind> {
    let session = store.sessions.get_mut(session_id).ok_or(ErrorKind::UnknownSession)?;
    let participant = session.participants.get_mut(player_id).ok_or(ErrorKind::UnknownPlayer)?;
    participant.last_heartbeat_at = now;
    session.last_activity_at = now;
    Ok(())
}

pub fn queue_participant_for_next_game(
    store: &mut Store,
    session_id: &SessionId,
    player_id: &PlayerId,
    now: UnixMillis,
) -> Result<bool, ErrorKind> {
    let session = store.sessions.get_mut(session_id).ok_or(ErrorKind::UnknownSession)?;
    {
        let participant = session.participants.get(player_id).ok_or(ErrorKind::UnknownPlayer)?;
        if !participant.is_seated {
            return Err(ErrorKind::NotSeated);
        }
    }
    if !session.session_complete {
        return Err(ErrorKind::RoundInProgress);
    }
    session
        .participants
        .get_mut(player_id)
        .ok_or(ErrorKind::UnknownPlayer)?
        .queued_for_next_game = true;
    session.last_activity_at = now;
    Ok(true)
}

pub fn refresh_session_auth(
    store: &mut Store,
    session_id: &SessionId,
    player_id: &PlayerId,
    now: UnixMillis,
) -> Result<AuthBundle, ErrorKind> {
    {
        let session = store.sessions.get(session_id).ok_or(ErrorKind::UnknownSession)?;
        if !session.is_alive(now) {
            return Err(ErrorKind::SessionExpired);
        }
        if !session.participants.contains_key(player_id) {
            return Err(ErrorKind::UnknownPlayer);
        }
    }
    Ok(issue_auth_bundle(store, player_id, session_id, now))
}

/// Sit/stand/ready/unready on a seat the participant already holds.
/// `ready`/`unready` are no-ops on a standing participant rather than errors:
/// the closed `ParticipantStateAction` set has nothing left to reject once
/// serde has already accepted the body, so there is no `invalid_action` path
/// here — that reason only fires on the HTTP layer's JSON decode failure.
pub fn set_participant_state(
    store: &mut Store,
    session_id: &SessionId,
    player_id: &PlayerId,
    action: ParticipantStateAction,
    now: UnixMillis,
) -> Result<(), ErrorKind> {
    let session = store.sessions.get_mut(session_id).ok_or(ErrorKind::UnknownSession)?;
    let participant = session.participants.get_mut(player_id).ok_or(ErrorKind::UnknownPlayer)?;
    match action {
        ParticipantStateAction::Sit => participant.is_seated = true,
        ParticipantStateAction::Stand => {
            participant.is_seated = false;
            participant.is_ready = false;
        }
        ParticipantStateAction::Ready => participant.is_ready = participant.is_seated,
        ParticipantStateAction::Unready => participant.is_ready = false,
    }
    session.last_activity_at = now;
    ensure_session_turn_state(session, now);
    Ok(())
}

/// Owner-gated demo pacing controls (§6): only meaningful on a private room
/// the requester owns. `pause`/`resume` toggle whether bot-only turns keep
/// auto-advancing; `speed_fast`/`speed_normal` toggle the turn-timeout pacing
/// hint surfaced to demo spectators.
pub fn apply_demo_control(
    store: &mut Store,
    session_id: &SessionId,
    player_id: &PlayerId,
    action: DemoControlAction,
    now: UnixMillis,
) -> Result<(), ErrorKind> {
    let session = store.sessions.get_mut(session_id).ok_or(ErrorKind::UnknownSession)?;
    if session.room_kind != RoomKind::Private {
        return Err(ErrorKind::RoomNotPrivate);
    }
    if session.owner_player_id.as_ref() != Some(player_id) {
        return Err(ErrorKind::NotRoomOwner);
    }
    match action {
        DemoControlAction::Pause => session.demo_auto_run = false,
        DemoControlAction::Resume => session.demo_auto_run = true,
        DemoControlAction::SpeedFast => session.demo_speed_mode = true,
        DemoControlAction::SpeedNormal => session.demo_speed_mode = false,
    }
    session.last_activity_at = now;
    ensure_session_turn_state(session, now);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(player_id: &str) -> CreateSessionRequest {
        CreateSessionRequest {
            player_id: PlayerId::new(player_id),
            room_code: None,
            display_name: None,
            bot_count: None,
            game_difficulty: None,
            demo_mode: false,
            demo_auto_run: false,
            demo_speed_mode: false,
            game_config: None,
        }
    }

    #[test]
    fn create_session_sets_owner_and_expiry() {
        let mut store = Store::default();
        let (session_id, _) = create_session(&mut store, request("host"), 30_000, 20_000, 10_000).unwrap();
        let session = &store.sessions[&session_id];
        assert_eq!(session.owner_player_id, Some(PlayerId::new("host")));
        assert_eq!(session.expires_at, 40_000);
        assert_eq!(session.room_kind, RoomKind::Private);
    }

    #[test]
    fn create_session_rejects_taken_room_code() {
        let mut store = Store::default();
        let mut req = request("host");
        req.room_code = Some("ABCDE".to_string());
        create_session(&mut store, req, 30_000, 20_000, 0).unwrap();

        let mut second = request("other");
        second.room_code = Some("abcde".to_string());
        let err = create_session(&mut store, second, 30_000, 20_000, 1_000).unwrap_err();
        assert_eq!(err, ErrorKind::RoomCodeTaken);
    }

    #[test]
    fn join_rejects_when_room_full() {
        let mut store = Store::default();
        let (session_id, _) = create_session(&mut store, request("host"), 30_000, 20_000, 0).unwrap();
        let join = JoinSessionRequest {
            player_id: PlayerId::new("guest"),
            display_name: None,
            blocked_player_ids: vec![],
            bot_count: None,
        };
        let err = join_session_by_target(&mut store, SessionTarget::Id(&session_id), join, 1, 1_000).unwrap_err();
        assert_eq!(err, ErrorKind::RoomFull);
    }

    #[test]
    fn join_rejects_banned_player() {
        let mut store = Store::default();
        let (session_id, _) = create_session(&mut store, request("host"), 30_000, 20_000, 0).unwrap();
        store
            .sessions
            .get_mut(&session_id)
            .unwrap()
            .room_bans
            .insert(PlayerId::new("guest"), protocol::BanRecord {
                target_player_id: PlayerId::new("guest"),
                banned_by: PlayerId::new("host"),
                banned_at: 0,
                reason: None,
            });
        let join = JoinSessionRequest {
            player_id: PlayerId::new("guest"),
            display_name: None,
            blocked_player_ids: vec![],
            bot_count: None,
        };
        let err = join_session_by_target(&mut store, SessionTarget::Id(&session_id), join, 10, 1_000).unwrap_err();
        assert_eq!(err, ErrorKind::RoomBanned);
    }

    #[test]
    fn queue_requires_round_complete_and_seated() {
        let mut store = Store::default();
        let (session_id, _) = create_session(&mut store, request("host"), 30_000, 20_000, 0).unwrap();
        let err = queue_participant_for_next_game(&mut store, &session_id, &PlayerId::new("host"), 1_000).unwrap_err();
        assert_eq!(err, ErrorKind::RoundInProgress);

        store.sessions.get_mut(&session_id).unwrap().session_complete = true;
        let ok = queue_participant_for_next_game(&mut store, &session_id, &PlayerId::new("host"), 2_000).unwrap();
        assert!(ok);
    }

    #[test]
    fn refresh_auth_rejects_unknown_player() {
        let mut store = Store::default();
        let (session_id, _) = create_session(&mut store, request("host"), 30_000, 20_000, 0).unwrap();
        let err = refresh_session_auth(&mut store, &session_id, &PlayerId::new("nobody"), 1_000).unwrap_err();
        assert_eq!(err, ErrorKind::UnknownPlayer);
    }

    #[test]
    fn list_rooms_excludes_private_sessions() {
        let mut store = Store::default();
        create_session(&mut store, request("host"), 30_000, 20_000, 0).unwrap();
        let rooms = list_rooms(&store, None, 1_000);
        assert!(rooms.is_empty());
    }

    #[test]
    fn standing_clears_ready() {
        let mut store = Store::default();
        let (session_id, _) = create_session(&mut store, request("host"), 30_000, 20_000, 0).unwrap();
        set_participant_state(&mut store, &session_id, &PlayerId::new("host"), ParticipantStateAction::Stand, 1_000).unwrap();
        let participant = &store.sessions[&session_id].participants[&PlayerId::new("host")];
        assert!(!participant.is_seated);
        assert!(!participant.is_ready);
    }

    #[test]
    fn ready_requires_seated() {
        let mut store = Store::default();
        let (session_id, _) = create_session(&mut store, request("host"), 30_000, 20_000, 0).unwrap();
        set_participant_state(&mut store, &session_id, &PlayerId::new("host"), ParticipantStateAction::Stand, 1_000).unwrap();
        set_participant_state(&mut store, &session_id, &PlayerId::new("host"), ParticipantStateAction::Ready, 1_000).unwrap();
        let participant = &store.sessions[&session_id].participants[&PlayerId::new("host")];
        assert!(!participant.is_ready);
    }

    #[test]
    fn demo_control_requires_owner() {
        let mut store = Store::default();
        let (session_id, _) = create_session(&mut store, request("host"), 30_000, 20_000, 0).unwrap();
        let err = apply_demo_control(&mut store, &session_id, &PlayerId::new("guest"), DemoControlAction::Pause, 1_000).unwrap_err();
        assert_eq!(err, ErrorKind::NotRoomOwner);
    }

    #[test]
    fn demo_control_rejects_public_rooms() {
        let mut store = Store::default();
        let (session_id, _) = create_session(&mut store, request("host"), 30_000, 20_000, 0).unwrap();
        store.sessions.get_mut(&session_id).unwrap().room_kind = RoomKind::PublicDefault;
        let err = apply_demo_control(&mut store, &session_id, &PlayerId::new("host"), DemoControlAction::SpeedFast, 1_000).unwrap_err();
        assert_eq!(err, ErrorKind::RoomNotPrivate);
    }

    #[test]
    fn demo_control_toggles_auto_run_and_speed() {
        let mut store = Store::default();
        let (session_id, _) = create_session(&mut store, request("host"), 30_000, 20_000, 0).unwrap();
        apply_demo_control(&mut store, &session_id, &PlayerId::new("host"), DemoControlAction::Pause, 1_000).unwrap();
        assert!(!store.sessions[&session_id].demo_auto_run);
        apply_demo_control(&mut store, &session_id, &PlayerId::new("host"), DemoControlAction::Resume, 1_000).unwrap();
        assert!(store.sessions[&session_id].demo_auto_run);
        apply_demo_control(&mut store, &session_id, &PlayerId::new("host"), DemoControlAction::SpeedFast, 1_000).unwrap();
        assert!(store.sessions[&session_id].demo_speed_mode);
    }
}
