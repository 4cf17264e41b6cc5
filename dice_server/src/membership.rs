//! Membership Service (`SPEC_FULL.md` §4.5, C5): join/leave, moderation
//! kick/ban, owner reassignment, and public-room reset. `remove_participant_from_session`
//! is the sole deletion path — every other removal flow (leave, kick, ban,
//! conduct auto-ban, admin removal, timeout sweep) funnels through it.

use crate::turn::{build_turn_start_message, ensure_session_turn_state};
use protocol::{AdminRole, BanRecord, ErrorKind, ModerationAction, Participant, PlayerId, RoomKind, ServerMessage, Session, UnixMillis};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RemovalSource {
    Leave,
    Kick,
    Ban,
    ConductAutoBan,
    AdminRemoved,
}

impl RemovalSource {
    pub fn socket_reason(self) -> &'static str {
        match self {
            Self::Leave => "left",
            Self::Kick => "kicked",
            Self::Ban => "banned",
            Self::ConductAutoBan => "conduct_auto_ban",
            Self::AdminRemoved => "admin_removed",
        }
    }
}

pub struct RemovalResult {
    pub session_expired: bool,
    pub forfeited: bool,
    pub room_inventory_changed: bool,
    pub turn_start: Option<ServerMessage>,
    pub reason: &'static str,
}

/// Promotes the earliest-joined seated non-bot participant to owner, or
/// clears the owner if none qualify. A no-op if the current owner is still
/// valid.
pub fn ensure_session_owner(session: &mut Session) {
    let owner_still_valid = session
        .owner_player_id
        .as_ref()
        .and_then(|id| session.participants.get(id))
        .map(|p| p.is_seated && !p.is_bot)
        .unwrap_or(false);
    if owner_still_valid {
        return;
    }

    let mut candidates: Vec<&Participant> = session
        .participants
        .values()
        .filter(|p| p.is_seated && !p.is_bot)
        .collect();
    candidates.sort_by_key(|p| p.joined_at);
    session.owner_player_id = candidates.first().map(|p| p.player_id.clone());
}

/// Clears a public room back to its empty starting state instead of
/// deleting it, so it remains in the public inventory and joinable.
fn reset_public_room_for_idle(session: &mut Session, now: UnixMillis) {
    session.participants.clear();
    session.chat_conduct_state.players.clear();
    session.turn_state = protocol::TurnState::new(session.turn_state.turn_timeout_ms, now);
    session.session_complete = false;
    session.completed_at = None;
    session.game_started_at = None;
    session.owner_player_id = None;
    session.last_activity_at = now;
}

/// When removal leaves exactly one human participant, that human's round is
/// force-completed rather than left waiting on an opponent who can't arrive
/// (§9 open question, resolved in DESIGN.md): the sole survivor is marked
/// complete and the session is marked complete.
fn complete_session_round_with_sole_survivor(session: &mut Session, now: UnixMillis) -> bool {
    let sole_human_id = session
        .participants
        .values()
        .find(|p| !p.is_bot)
        .map(|p| p.player_id.clone());
    let Some(id) = sole_human_id else {
        return false;
    };
    if let Some(p) = session.participants.get_mut(&id) {
        if !p.is_complete {
            p.is_complete = true;
            p.completed_at = Some(now);
            p.remaining_dice = 0;
        }
    }
    session.session_complete = true;
    session.completed_at = Some(now);
    true
}

/// `removeParticipantFromSession` (§4.5 steps 1-7). Step 3 (closing the
/// departing player's sockets) is reported via `reason` for the caller
/// (`world.rs`/`socket.rs`) to act on; this module only mutates the Store's
/// session state.
pub fn remove_participant_from_session(
    session: &mut Session,
    player_id: &PlayerId,
    source: RemovalSource,
    now: UnixMillis,
) -> RemovalResult {
    session.participants.remove(player_id);
    session.chat_conduct_state.players.remove(player_id);

    if session.owner_player_id.as_ref() == Some(player_id) {
        ensure_session_owner(session);
    }

    ensure_session_turn_state(session, now);

    let human_count = session.human_count();
    let mut session_expired = false;
    let mut forfeited = false;
    let mut turn_start = None;

    if human_count == 0 {
        if session.room_kind == RoomKind::Private {
            session.session_complete = true;
            session.completed_at = Some(now);
            session.expires_at = now;
            session_expired = true;
        } else {
            reset_public_room_for_idle(session, now);
        }
    } else {
        if human_count == 1 {
            forfeited = complete_session_round_with_sole_survivor(session, now);
        }
        if !forfeited {
            turn_start = build_turn_start_message(session);
        }
    }

    session.last_activity_at = now;

    RemovalResult {
        session_expired,
        forfeited,
        room_inventory_changed: session.room_kind.is_public(),
        turn_start,
        reason: source.socket_reason(),
    }
}

/// Moderation `kick`/`ban` (§4.5): the requester must be the room owner or
/// an admin with role ≥ operator. `ban` upserts a `BanRecord` before
/// removal so a subsequent join attempt is rejected even if the removal
/// races with it.
pub fn moderate(
    session: &mut Session,
    requester_player_id: &PlayerId,
    target_player_id: &PlayerId,
    action: ModerationAction,
    requester_admin_role: Option<AdminRole>,
    now: UnixMillis,
) -> Result<RemovalResult, ErrorKind> {
    if requester_player_id == target_player_id {
        return Err(ErrorKind::CannotModerateSelf);
    }

    let is_owner = session.owner_player_id.as_ref() == Some(requester_player_id);
    let is_operator = requester_admin_role
        .map(|role| role.level() >= AdminRole::Operator.level())
        .unwrap_or(false);
    if !is_owner && !is_operator {
        return Err(ErrorKind::NotRoomOwner);
    }

    if action == ModerationAction::Ban {
        session.room_bans.insert(
            target_player_id.clone(),
            BanRecord {
                target_player_id: target_player_id.clone(),
                banned_by: requester_player_id.clone(),
                banned_at: now,
                reason: None,
            },
        );
    }

    let source = match action {
        ModerationAction::Kick => RemovalSource::Kick,
        ModerationAction::Ban => RemovalSource::Ban,
    };
    Ok(remove_participant_from_session(session, target_player_id, source, now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn session_with(participants: Vec<Participant>, room_kind: RoomKind) -> Session {
        let mut map = HashMap::new();
        for p in participants {
            map.insert(p.player_id.clone(), p);
        }
        Session {
            session_id: protocol::SessionId::new("s"),
            room_code: protocol::RoomCode::new("ABCDE"),
            room_kind,
            owner_player_id: None,
            game_difficulty: protocol::GameDifficulty::Normal,
            game_config: protocol::GameConfig::default(),
            demo_mode: false,
            demo_auto_run: false,
            demo_speed_mode: false,
            created_at: 0,
            game_started_at: None,
            last_activity_at: 0,
            expires_at: 1_000_000,
            next_game_starts_at: None,
            session_complete: false,
            completed_at: None,
            participants: map,
            turn_state: protocol::TurnState::new(20_000, 0),
            chat_conduct_state: protocol::ChatConductState::default(),
            room_bans: HashMap::new(),
        }
    }

    fn seated_human(id: &str, joined_at: u64) -> Participant {
        let mut p = Participant::new_human(PlayerId::new(id), None, joined_at);
        p.is_seated = true;
        p.is_ready = true;
        p
    }

    #[test]
    fn owner_reassigned_to_earliest_joined_remaining_human() {
        let mut session = session_with(
            vec![seated_human("owner", 0), seated_human("next", 5), seated_human("later", 10)],
            RoomKind::Private,
        );
        session.owner_player_id = Some(PlayerId::new("owner"));
        remove_participant_from_session(&mut session, &PlayerId::new("owner"), RemovalSource::Leave, 100);
        assert_eq!(session.owner_player_id, Some(PlayerId::new("next")));
    }

    #[test]
    fn private_room_expires_when_empty() {
        let mut session = session_with(vec![seated_human("a", 0)], RoomKind::Private);
        let result = remove_participant_from_session(&mut session, &PlayerId::new("a"), RemovalSource::Leave, 100);
        assert!(result.session_expired);
        assert_eq!(session.expires_at, 100);
    }

    #[test]
    fn public_room_resets_instead_of_expiring() {
        let mut session = session_with(vec![seated_human("a", 0)], RoomKind::PublicDefault);
        let result = remove_participant_from_session(&mut session, &PlayerId::new("a"), RemovalSource::Leave, 100);
        assert!(!result.session_expired);
        assert!(session.participants.is_empty());
    }

    #[test]
    fn removal_down_to_one_human_forfeits_round() {
        let mut session = session_with(vec![seated_human("a", 0), seated_human("b", 5)], RoomKind::Private);
        let result = remove_participant_from_session(&mut session, &PlayerId::new("b"), RemovalSource::Leave, 100);
        assert!(result.forfeited);
        assert!(session.session_complete);
        assert!(session.participants[&PlayerId::new("a")].is_complete);
    }

    #[test]
    fn moderate_rejects_self_target() {
        let mut session = session_with(vec![seated_human("owner", 0)], RoomKind::Private);
        session.owner_player_id = Some(PlayerId::new("owner"));
        let err = moderate(&mut session, &PlayerId::new("owner"), &PlayerId::new("owner"), ModerationAction::Kick, None, 100).unwrap_err();
        assert_eq!(err, ErrorKind::CannotModerateSelf);
    }

    #[test]
    fn moderate_rejects_non_owner_non_operator() {
        let mut session = session_with(vec![seated_human("owner", 0), seated_human("guest", 5)], RoomKind::Private);
        session.owner_player_id = Some(PlayerId::new("owner"));
        let err = moderate(&mut session, &PlayerId::new("guest"), &PlayerId::new("owner"), ModerationAction::Kick, None, 100).unwrap_err();
        assert_eq!(err, ErrorKind::NotRoomOwner);
    }

    #[test]
    fn ban_records_before_removal() {
        let mut session = session_with(vec![seated_human("owner", 0), seated_human("guest", 5)], RoomKind::Private);
        session.owner_player_id = Some(PlayerId::new("owner"));
        moderate(&mut session, &PlayerId::new("owner"), &PlayerId::new("guest"), ModerationAction::Ban, None, 100).unwrap();
        assert!(session.room_bans.contains_key(&PlayerId::new("guest")));
        assert!(!session.participants.contains_key(&PlayerId::new("guest")));
    }

    #[test]
    fn operator_admin_role_can_moderate_without_owning_room() {
        let mut session = session_with(vec![seated_human("owner", 0), seated_human("guest", 5)], RoomKind::Private);
        session.owner_player_id = Some(PlayerId::new("owner"));
        let result = moderate(
            &mut session,
            &PlayerId::new("mod"),
            &PlayerId::new("guest"),
            ModerationAction::Kick,
            Some(AdminRole::Operator),
            100,
        );
        assert!(result.is_ok());
    }
}
