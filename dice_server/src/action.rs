//! Action Engine (`SPEC_FULL.md` §4.4, C4): validates and applies a single
//! turn action (`roll` / `select` / `score`), and drives one full bot pass.
//!
//! `process_turn_action` never reconciles turn order itself — callers run
//! `turn::ensure_session_turn_state` before dispatching and `advance_session_turn`
//! only once `turn_end` is explicitly requested by the active player (the
//! socket layer owns that split, since a `score` result alone does not end
//! a turn).

use crate::bot::BotEngine;
use crate::scoring::score_dice;
use crate::turn::{advance_session_turn, apply_participant_score_update};
use protocol::{
    Die, DieId, ErrorKind, Participant, PlayerId, RollSnapshot, ScoreSummary, ServerMessage,
    ServerRollId, Session, TurnActionPayload, TurnPhase, UnixMillis,
};
use rand::Rng;
use std::collections::HashSet;

/// A successfully-applied turn action. `action`/`code`/`reason` are not
/// carried separately: the outcome's `ServerMessage` already tags its own
/// kind, and success implies `ok`/`code=200` at the caller boundary.
pub struct TurnActionSuccess {
    pub message: ServerMessage,
    pub winner_resolved: bool,
    pub should_broadcast_state: bool,
    pub should_persist: bool,
    pub action_timestamp: UnixMillis,
}

/// `sync` tells the caller whether to resend the turn-sync payload (true for
/// anything where the client's local view may be stale; false when the turn
/// simply isn't running at all).
pub struct TurnActionFailure {
    pub kind: ErrorKind,
    pub sync: bool,
}

pub type TurnActionResult = Result<TurnActionSuccess, TurnActionFailure>;

fn roll_fair_dice(count: u32) -> Vec<Die> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|i| Die {
            die_id: DieId::new(format!("roll-{}-{}", rng.gen::<u32>(), i)),
            sides: 6,
            value: rng.gen_range(1..=6),
        })
        .collect()
}

fn next_server_roll_id(session: &Session) -> ServerRollId {
    ServerRollId(((session.turn_state.round as u64) << 32) | session.turn_state.turn_number as u64)
}

fn select_dice(dice: &[Die], selected_ids: &[DieId]) -> Result<Vec<Die>, ErrorKind> {
    let mut seen = HashSet::new();
    let mut selected = Vec::with_capacity(selected_ids.len());
    for id in selected_ids {
        if !seen.insert(id.clone()) {
            return Err(ErrorKind::TurnActionInvalidPayload);
        }
        let die = dice
            .iter()
            .find(|d| &d.die_id == id)
            .ok_or(ErrorKind::TurnActionInvalidPayload)?;
        selected.push(die.clone());
    }
    Ok(selected)
}

fn clear_timeout_strikes(session: &mut Session, player_id: &PlayerId) {
    if let Some(p) = session.participants.get_mut(player_id) {
        p.turn_timeout_count = 0;
        p.turn_timeout_round = None;
    }
}

/// If every seated participant has finished, marks the session complete.
/// Returns whether this call is what resolved it (so the caller can report
/// `winner_resolved` without a dedicated stored winner field — standings are
/// derived by the caller from `participants` sorted by score).
fn complete_session_round_with_winner(session: &mut Session, now: UnixMillis) -> bool {
    let all_complete = session
        .participants
        .values()
        .filter(|p| p.is_seated)
        .all(|p| p.is_complete);
    if all_complete && !session.session_complete {
        session.session_complete = true;
        session.completed_at = Some(now);
        true
    } else {
        false
    }
}

pub fn process_turn_action(
    session: &mut Session,
    player_id: &PlayerId,
    payload: TurnActionPayload,
    now: UnixMillis,
) -> TurnActionResult {
    match &session.turn_state.active_turn_player_id {
        None => {
            return Err(TurnActionFailure {
                kind: ErrorKind::TurnUnavailable,
                sync: false,
            })
        }
        Some(active) if active != player_id => {
            return Err(TurnActionFailure {
                kind: ErrorKind::TurnNotActive,
                sync: true,
            })
        }
        Some(_) => {}
    }

    match payload {
        TurnActionPayload::Roll => apply_roll(session, player_id, now),
        TurnActionPayload::Select { selected_dice_ids } => apply_select(session, player_id, selected_dice_ids),
        TurnActionPayload::Score {
            selected_dice_ids,
            points,
            roll_server_id,
        } => apply_score(session, player_id, selected_dice_ids, points, roll_server_id, now),
    }
}

fn apply_roll(session: &mut Session, player_id: &PlayerId, now: UnixMillis) -> TurnActionResult {
    if session.turn_state.phase != TurnPhase::AwaitRoll {
        return Err(TurnActionFailure {
            kind: ErrorKind::TurnActionInvalidPhase,
            sync: true,
        });
    }

    let count = session
        .participants
        .get(player_id)
        .map(|p| p.remaining_dice)
        .unwrap_or(Participant::STARTING_DICE)
        .max(1);
    let dice = roll_fair_dice(count);
    let server_roll_id = next_server_roll_id(session);
    let snapshot = RollSnapshot {
        roll_index: session.turn_state.turn_number,
        server_roll_id,
        dice,
    };

    session.turn_state.last_roll_snapshot = Some(snapshot.clone());
    session.turn_state.last_score_summary = None;
    session.turn_state.phase = TurnPhase::AwaitScore;
    session.turn_state.updated_at = now;
    clear_timeout_strikes(session, player_id);

    Ok(TurnActionSuccess {
        message: ServerMessage::TurnAction {
            player_id: player_id.clone(),
            phase: TurnPhase::AwaitScore,
            roll: Some(snapshot),
            score: None,
        },
        winner_resolved: false,
        should_broadcast_state: false,
        should_persist: true,
        action_timestamp: now,
    })
}

/// Preview only: computes a projected score summary without mutating the
/// participant, persisting, or broadcasting `session_state` (§4.4).
fn apply_select(session: &mut Session, player_id: &PlayerId, selected_dice_ids: Vec<DieId>) -> TurnActionResult {
    if session.turn_state.phase != TurnPhase::AwaitScore {
        return Err(TurnActionFailure {
            kind: ErrorKind::TurnActionInvalidPhase,
            sync: true,
        });
    }
    let snapshot = session.turn_state.last_roll_snapshot.clone().ok_or(TurnActionFailure {
        kind: ErrorKind::TurnActionInvalidPayload,
        sync: true,
    })?;
    let selected_dice = select_dice(&snapshot.dice, &selected_dice_ids).map_err(|kind| TurnActionFailure { kind, sync: true })?;
    let points = score_dice(&selected_dice);

    let participant = session.participants.get(player_id).ok_or(TurnActionFailure {
        kind: ErrorKind::UnknownPlayer,
        sync: true,
    })?;
    let projected_remaining = participant
        .remaining_dice
        .max(snapshot.dice.len() as u32)
        .saturating_sub(selected_dice.len() as u32);

    let preview = ScoreSummary {
        selected_dice_ids,
        points,
        roll_server_id: snapshot.server_roll_id,
        projected_total_score: participant.score + points,
        remaining_dice: projected_remaining,
        is_complete: projected_remaining == 0,
    };

    Ok(TurnActionSuccess {
        message: ServerMessage::TurnAction {
            player_id: player_id.clone(),
            phase: TurnPhase::AwaitScore,
            roll: None,
            score: Some(preview),
        },
        winner_resolved: false,
        should_broadcast_state: false,
        should_persist: false,
        action_timestamp: 0,
    })
}

fn apply_score(
    session: &mut Session,
    player_id: &PlayerId,
    selected_dice_ids: Vec<DieId>,
    points: u32,
    roll_server_id: ServerRollId,
    now: UnixMillis,
) -> TurnActionResult {
    if session.turn_state.phase != TurnPhase::AwaitScore {
        return Err(TurnActionFailure {
            kind: ErrorKind::TurnActionInvalidPhase,
            sync: true,
        });
    }
    let snapshot = session.turn_state.last_roll_snapshot.clone().ok_or(TurnActionFailure {
        kind: ErrorKind::TurnActionInvalidPayload,
        sync: true,
    })?;
    if roll_server_id != snapshot.server_roll_id {
        return Err(TurnActionFailure {
            kind: ErrorKind::ScoreRollMismatch,
            sync: true,
        });
    }
    let selected_dice = select_dice(&snapshot.dice, &selected_dice_ids).map_err(|kind| TurnActionFailure { kind, sync: true })?;
    let computed_points = score_dice(&selected_dice);
    if computed_points != points {
        return Err(TurnActionFailure {
            kind: ErrorKind::ScorePointsMismatch,
            sync: true,
        });
    }

    let roll_dice_count = snapshot.dice.len() as u32;
    let mut score_summary = ScoreSummary {
        selected_dice_ids,
        points,
        roll_server_id,
        projected_total_score: 0,
        remaining_dice: 0,
        is_complete: false,
    };

    let participant = session.participants.get_mut(player_id).ok_or(TurnActionFailure {
        kind: ErrorKind::UnknownPlayer,
        sync: true,
    })?;
    apply_participant_score_update(participant, &score_summary, roll_dice_count, now);
    score_summary.projected_total_score = participant.score;
    score_summary.remaining_dice = participant.remaining_dice;
    score_summary.is_complete = participant.is_complete;
    let did_complete = participant.is_complete;

    session.turn_state.last_score_summary = Some(score_summary.clone());
    session.turn_state.phase = TurnPhase::ReadyToEnd;
    session.turn_state.updated_at = now;
    clear_timeout_strikes(session, player_id);

    let winner_resolved = did_complete && complete_session_round_with_winner(session, now);

    Ok(TurnActionSuccess {
        message: ServerMessage::TurnAction {
            player_id: player_id.clone(),
            phase: TurnPhase::ReadyToEnd,
            roll: None,
            score: Some(score_summary),
        },
        winner_resolved,
        should_broadcast_state: true,
        should_persist: true,
        action_timestamp: now,
    })
}

/// Runs one full bot pass: roll, select+score, then `advance_session_turn`.
/// Invoked whenever the active participant is a bot and the phase is
/// `await_roll` (§4.4). Returns every envelope produced along the way, in
/// broadcast order.
pub fn execute_bot_turn(
    session: &mut Session,
    player_id: &PlayerId,
    bot_engine: &dyn BotEngine,
    now: UnixMillis,
) -> Vec<ServerMessage> {
    let mut messages = Vec::new();

    if session.turn_state.active_turn_player_id.as_ref() != Some(player_id) {
        return messages;
    }
    if session.turn_state.phase != TurnPhase::AwaitRoll {
        return messages;
    }

    let count = session
        .participants
        .get(player_id)
        .map(|p| p.remaining_dice)
        .unwrap_or(Participant::STARTING_DICE)
        .max(1);
    let dice = bot_engine.build_turn_roll_payload(count);
    let server_roll_id = next_server_roll_id(session);
    let snapshot = RollSnapshot {
        roll_index: session.turn_state.turn_number,
        server_roll_id,
        dice: dice.clone(),
    };
    session.turn_state.last_roll_snapshot = Some(snapshot.clone());
    session.turn_state.phase = TurnPhase::AwaitScore;
    session.turn_state.updated_at = now;
    messages.push(ServerMessage::TurnAction {
        player_id: player_id.clone(),
        phase: TurnPhase::AwaitScore,
        roll: Some(snapshot),
        score: None,
    });

    let (selected_dice_ids, points) = bot_engine.build_turn_score_summary(&dice);
    let roll_dice_count = dice.len() as u32;
    let mut score_summary = ScoreSummary {
        selected_dice_ids,
        points,
        roll_server_id: server_roll_id,
        projected_total_score: 0,
        remaining_dice: 0,
        is_complete: false,
    };

    let did_complete = match session.participants.get_mut(player_id) {
        Some(participant) => {
            apply_participant_score_update(participant, &score_summary, roll_dice_count, now);
            score_summary.projected_total_score = participant.score;
            score_summary.remaining_dice = participant.remaining_dice;
            score_summary.is_complete = participant.is_complete;
            participant.is_complete
        }
        None => return messages,
    };

    session.turn_state.last_score_summary = Some(score_summary.clone());
    session.turn_state.phase = TurnPhase::ReadyToEnd;
    session.turn_state.updated_at = now;
    clear_timeout_strikes(session, player_id);
    messages.push(ServerMessage::TurnAction {
        player_id: player_id.clone(),
        phase: TurnPhase::ReadyToEnd,
        roll: None,
        score: Some(score_summary),
    });

    if did_complete {
        complete_session_round_with_winner(session, now);
    }

    if let Ok((turn_end, turn_start)) = advance_session_turn(session, player_id, now) {
        messages.push(turn_end);
        if let Some(start) = turn_start {
            messages.push(start);
        }
    }

    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::DeterministicBotEngine;
    use crate::turn::ensure_session_turn_state;

    fn session_with(participants: Vec<Participant>) -> Session {
        let mut map = std::collections::HashMap::new();
        for p in participants {
            map.insert(p.player_id.clone(), p);
        }
        Session {
            session_id: protocol::SessionId::new("s"),
            room_code: protocol::RoomCode::new("ABCDE"),
            room_kind: protocol::RoomKind::Private,
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
            room_bans: std::collections::HashMap::new(),
        }
    }

    fn ready_human(id: &str) -> Participant {
        let mut p = Participant::new_human(PlayerId::new(id), None, 0);
        p.is_seated = true;
        p.is_ready = true;
        p
    }

    #[test]
    fn roll_then_score_mismatch_is_rejected_and_state_unchanged() {
        let mut session = session_with(vec![ready_human("a"), ready_human("b")]);
        ensure_session_turn_state(&mut session, 10_000);

        let roll = process_turn_action(&mut session, &PlayerId::new("a"), TurnActionPayload::Roll, 10_000).unwrap();
        let snapshot = match roll.message {
            ServerMessage::TurnAction { roll: Some(s), .. } => s,
            _ => panic!("expected roll snapshot"),
        };

        let err = process_turn_action(
            &mut session,
            &PlayerId::new("a"),
            TurnActionPayload::Score {
                selected_dice_ids: vec![snapshot.dice[0].die_id.clone()],
                points: 999_999,
                roll_server_id: snapshot.server_roll_id,
            },
            11_000,
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ScorePointsMismatch);
        assert_eq!(session.turn_state.phase, TurnPhase::AwaitScore);
    }

    #[test]
    fn score_roll_mismatch_rejected() {
        let mut session = session_with(vec![ready_human("a")]);
        session.turn_state.active_turn_player_id = Some(PlayerId::new("a"));
        session.turn_state.order = vec![PlayerId::new("a")];
        session.turn_state.phase = TurnPhase::AwaitScore;
        session.turn_state.last_roll_snapshot = Some(RollSnapshot {
            roll_index: 1,
            server_roll_id: ServerRollId(1),
            dice: vec![Die { die_id: DieId::new("d1"), sides: 6, value: 5 }],
        });

        let err = process_turn_action(
            &mut session,
            &PlayerId::new("a"),
            TurnActionPayload::Score {
                selected_dice_ids: vec![DieId::new("d1")],
                points: 50,
                roll_server_id: ServerRollId(999),
            },
            11_000,
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ScoreRollMismatch);
    }

    #[test]
    fn non_active_player_is_rejected_with_sync() {
        let mut session = session_with(vec![ready_human("a"), ready_human("b")]);
        ensure_session_turn_state(&mut session, 10_000);
        let err = process_turn_action(&mut session, &PlayerId::new("b"), TurnActionPayload::Roll, 10_000).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TurnNotActive);
        assert!(err.sync);
    }

    #[test]
    fn select_does_not_mutate_or_persist() {
        let mut session = session_with(vec![ready_human("a")]);
        session.turn_state.active_turn_player_id = Some(PlayerId::new("a"));
        session.turn_state.order = vec![PlayerId::new("a")];
        session.turn_state.phase = TurnPhase::AwaitScore;
        session.turn_state.last_roll_snapshot = Some(RollSnapshot {
            roll_index: 1,
            server_roll_id: ServerRollId(1),
            dice: vec![
                Die { die_id: DieId::new("d1"), sides: 6, value: 1 },
                Die { die_id: DieId::new("d2"), sides: 6, value: 2 },
            ],
        });
        let score_before = session.participants[&PlayerId::new("a")].score;

        let outcome = process_turn_action(
            &mut session,
            &PlayerId::new("a"),
            TurnActionPayload::Select { selected_dice_ids: vec![DieId::new("d1")] },
            10_500,
        )
        .unwrap();
        assert!(!outcome.should_persist);
        assert!(!outcome.should_broadcast_state);
        assert_eq!(session.participants[&PlayerId::new("a")].score, score_before);
    }

    #[test]
    fn bot_turn_runs_full_pass_and_advances() {
        let mut session = session_with(vec![ready_human("a"), ready_human("b")]);
        ensure_session_turn_state(&mut session, 10_000);
        let engine = DeterministicBotEngine;
        let messages = execute_bot_turn(&mut session, &PlayerId::new("a"), &engine, 11_000);
        assert!(messages.iter().any(|m| matches!(m, ServerMessage::TurnEnd { .. })));
        assert_eq!(session.turn_state.active_turn_player_id, Some(PlayerId::new("b")));
    }

    #[test]
    fn no_active_turn_is_unavailable_without_sync() {
        let mut session = session_with(vec![ready_human("a")]);
        let err = process_turn_action(&mut session, &PlayerId::new("a"), TurnActionPayload::Roll, 10_000).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TurnUnavailable);
        assert!(!err.sync);
    }
}
