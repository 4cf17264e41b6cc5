//! Session Turn Engine (`SPEC_FULL.md` §4.3, C3): the per-session turn
//! phase machine. `ensure_session_turn_state` is the central reconciler,
//! called after any mutation that could change who should be playing.

use protocol::{Participant, PlayerId, ScoreSummary, ServerMessage, Session, TurnPhase, UnixMillis};

fn participant_eligible(
    pid: &PlayerId,
    p: &Participant,
    active_id: &Option<PlayerId>,
    keep_completed_active: bool,
) -> bool {
    if !p.is_seated || p.queued_for_next_game {
        return false;
    }
    if p.is_complete {
        return keep_completed_active && active_id.as_ref() == Some(pid);
    }
    true
}

/// The central reconciler (§4.3 steps 1-6). Idempotent: calling it twice in
/// a row with no intervening mutation is a no-op on the second call.
pub fn ensure_session_turn_state(session: &mut Session, now: UnixMillis) {
    let active_id = session.turn_state.active_turn_player_id.clone();

    // Exception in step 1: a completed active player in `ready_to_end` stays
    // in `order` until their final `turn_end` (§9 open question (a)).
    let keep_completed_active = session.turn_state.phase == TurnPhase::ReadyToEnd
        && active_id
            .as_ref()
            .and_then(|id| session.participants.get(id))
            .map(|p| p.is_complete)
            .unwrap_or(false);

    // Steps 1+3: preserve previous order for members that still qualify;
    // append newly-qualifying members sorted by playerId, join order as
    // tie-breaker.
    let mut new_order = Vec::with_capacity(session.turn_state.order.len());
    for pid in &session.turn_state.order {
        if let Some(p) = session.participants.get(pid) {
            if participant_eligible(pid, p, &active_id, keep_completed_active) {
                new_order.push(pid.clone());
            }
        }
    }
    let mut newcomers: Vec<(&PlayerId, &Participant)> = session
        .participants
        .iter()
        .filter(|(pid, p)| {
            !new_order.contains(pid) && participant_eligible(pid, p, &active_id, keep_completed_active)
        })
        .collect();
    newcomers.sort_by(|(a_id, a_p), (b_id, b_p)| {
        a_id.as_str().cmp(b_id.as_str()).then(a_p.joined_at.cmp(&b_p.joined_at))
    });
    new_order.extend(newcomers.into_iter().map(|(pid, _)| pid.clone()));
    session.turn_state.order = new_order;

    // Step 2: turnFlowReady.
    let non_bot_seated: Vec<&Participant> = session
        .participants
        .values()
        .filter(|p| !p.is_bot && p.is_seated)
        .collect();
    let only_bots = !session.participants.is_empty() && session.participants.values().all(|p| p.is_bot);
    let turn_flow_ready = (!non_bot_seated.is_empty() && non_bot_seated.iter().all(|p| p.is_ready))
        || (session.demo_auto_run && only_bots);

    // Step 4: pick activeTurnPlayerId.
    let kept = active_id
        .as_ref()
        .filter(|id| session.turn_state.order.contains(id))
        .cloned();
    session.turn_state.active_turn_player_id = kept.or_else(|| session.turn_state.order.first().cloned());
    if !turn_flow_ready {
        session.turn_state.active_turn_player_id = None;
    }
    if session.turn_state.active_turn_player_id.is_none() {
        session.turn_state.phase = TurnPhase::AwaitRoll;
        session.turn_state.last_roll_snapshot = None;
        session.turn_state.last_score_summary = None;
        session.turn_state.turn_expires_at = None;
    }

    // Step 5: repair phase.
    match session.turn_state.phase {
        TurnPhase::AwaitScore if session.turn_state.last_roll_snapshot.is_none() => {
            session.turn_state.phase = TurnPhase::AwaitRoll;
        }
        TurnPhase::ReadyToEnd if session.turn_state.last_score_summary.is_none() => {
            session.turn_state.phase = TurnPhase::AwaitScore;
        }
        TurnPhase::ReadyToEnd => {
            let stale = match (&session.turn_state.last_score_summary, &session.turn_state.last_roll_snapshot) {
                (Some(score), Some(roll)) => score.roll_server_id != roll.server_roll_id,
                _ => false,
            };
            if stale {
                session.turn_state.phase = TurnPhase::AwaitScore;
                session.turn_state.last_score_summary = None;
            }
        }
        _ => {}
    }

    // Step 6: assign turnExpiresAt.
    if session.turn_state.active_turn_player_id.is_some() && session.turn_state.turn_expires_at.is_none() {
        session.turn_state.turn_expires_at = Some(now + session.turn_state.turn_timeout_ms);
    }

    session.turn_state.updated_at = now;
}

pub fn build_turn_start_message(session: &Session) -> Option<ServerMessage> {
    let player_id = session.turn_state.active_turn_player_id.clone()?;
    Some(ServerMessage::TurnStart {
        player_id,
        round: session.turn_state.round,
        turn_number: session.turn_state.turn_number,
        turn_expires_at: session.turn_state.turn_expires_at.unwrap_or(session.turn_state.updated_at),
    })
}

pub fn build_turn_end_message(session: &Session, ended_by: PlayerId) -> ServerMessage {
    ServerMessage::TurnEnd {
        player_id: ended_by,
        round: session.turn_state.round,
        turn_number: session.turn_state.turn_number,
    }
}

/// `advanceSessionTurn` (§4.3): validates the caller, picks the next
/// non-complete participant cyclically, and returns the `turn_end`/
/// `turn_start` envelopes atomically.
pub fn advance_session_turn(
    session: &mut Session,
    ended_by: &PlayerId,
    now: UnixMillis,
) -> Result<(ServerMessage, Option<ServerMessage>), protocol::ErrorKind> {
    if session.turn_state.active_turn_player_id.as_ref() != Some(ended_by) {
        return Err(protocol::ErrorKind::TurnAdvanceFailed);
    }

    let turn_end = build_turn_end_message(session, ended_by.clone());

    let order = session.turn_state.order.clone();
    if order.is_empty() {
        return Err(protocol::ErrorKind::TurnAdvanceFailed);
    }
    let current_index = order.iter().position(|p| p == ended_by).unwrap_or(0);

    let mut next = None;
    for offset in 1..=order.len() {
        let idx = (current_index + offset) % order.len();
        let candidate = &order[idx];
        if let Some(p) = session.participants.get(candidate) {
            if !p.is_complete {
                next = Some((idx, candidate.clone()));
                break;
            }
        }
    }

    session.turn_state.turn_number += 1;

    match next {
        Some((idx, next_player)) => {
            if idx <= current_index {
                session.turn_state.round += 1;
            }
            session.turn_state.active_turn_player_id = Some(next_player);
            session.turn_state.phase = TurnPhase::AwaitRoll;
            session.turn_state.last_roll_snapshot = None;
            session.turn_state.last_score_summary = None;
            session.turn_state.turn_expires_at = Some(now + session.turn_state.turn_timeout_ms);
            session.turn_state.updated_at = now;
            Ok((turn_end, build_turn_start_message(session)))
        }
        None => {
            // No non-complete candidate remains: schedule post-game lifecycle.
            session.turn_state.active_turn_player_id = None;
            session.turn_state.phase = TurnPhase::AwaitRoll;
            session.turn_state.last_roll_snapshot = None;
            session.turn_state.last_score_summary = None;
            session.turn_state.turn_expires_at = None;
            session.turn_state.updated_at = now;
            session.session_complete = true;
            session.completed_at = Some(now);
            Ok((turn_end, None))
        }
    }
}

/// `applyParticipantScoreUpdate` (§4.3).
pub fn apply_participant_score_update(
    participant: &mut Participant,
    score: &ScoreSummary,
    roll_dice_count: u32,
    now: UnixMillis,
) {
    participant.score += score.points;
    let base = participant.remaining_dice.max(roll_dice_count);
    let remaining = base.saturating_sub(score.selected_dice_ids.len() as u32);
    participant.remaining_dice = remaining;
    if remaining == 0 {
        participant.is_complete = true;
        participant.completed_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{BotProfile, RollSnapshot, ServerRollId, TurnState};

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
            turn_state: TurnState::new(20_000, 0),
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
    fn reconciler_picks_first_ready_human() {
        let mut session = session_with(vec![ready_human("a"), ready_human("b")]);
        ensure_session_turn_state(&mut session, 10_000);
        assert_eq!(session.turn_state.order, vec![PlayerId::new("a"), PlayerId::new("b")]);
        assert_eq!(session.turn_state.active_turn_player_id, Some(PlayerId::new("a")));
        assert_eq!(session.turn_state.turn_expires_at, Some(30_000));
    }

    #[test]
    fn reconciler_is_idempotent() {
        let mut session = session_with(vec![ready_human("a"), ready_human("b")]);
        ensure_session_turn_state(&mut session, 10_000);
        let order_before = session.turn_state.order.clone();
        let active_before = session.turn_state.active_turn_player_id.clone();
        ensure_session_turn_state(&mut session, 10_000);
        assert_eq!(session.turn_state.order, order_before);
        assert_eq!(session.turn_state.active_turn_player_id, active_before);
    }

    #[test]
    fn reconciler_waits_for_all_humans_ready() {
        let mut a = ready_human("a");
        let mut b = ready_human("b");
        b.is_ready = false;
        let mut session = session_with(vec![a.clone(), b.clone()]);
        a.is_ready = true;
        ensure_session_turn_state(&mut session, 10_000);
        assert_eq!(session.turn_state.active_turn_player_id, None);
        assert_eq!(session.turn_state.phase, TurnPhase::AwaitRoll);
    }

    #[test]
    fn advance_wraps_round_when_cycling_back() {
        let mut session = session_with(vec![ready_human("a"), ready_human("b")]);
        ensure_session_turn_state(&mut session, 10_000);
        let (_, start) = advance_session_turn(&mut session, &PlayerId::new("a"), 11_000).unwrap();
        assert_eq!(session.turn_state.active_turn_player_id, Some(PlayerId::new("b")));
        assert_eq!(session.turn_state.round, 1);
        match start.unwrap() {
            ServerMessage::TurnStart { player_id, round, turn_number, .. } => {
                assert_eq!(player_id, PlayerId::new("b"));
                assert_eq!(round, 1);
                assert_eq!(turn_number, 2);
            }
            _ => panic!("expected turn_start"),
        }

        let (_, start2) = advance_session_turn(&mut session, &PlayerId::new("b"), 12_000).unwrap();
        assert_eq!(session.turn_state.round, 2);
        match start2.unwrap() {
            ServerMessage::TurnStart { player_id, .. } => assert_eq!(player_id, PlayerId::new("a")),
            _ => panic!("expected turn_start"),
        }
    }

    #[test]
    fn advance_rejects_wrong_caller() {
        let mut session = session_with(vec![ready_human("a"), ready_human("b")]);
        ensure_session_turn_state(&mut session, 10_000);
        let err = advance_session_turn(&mut session, &PlayerId::new("b"), 11_000).unwrap_err();
        assert_eq!(err, protocol::ErrorKind::TurnAdvanceFailed);
    }

    #[test]
    fn advance_completes_session_when_everyone_finished() {
        let mut a = ready_human("a");
        a.is_complete = true;
        a.remaining_dice = 0;
        let mut session = session_with(vec![a]);
        session.turn_state.active_turn_player_id = Some(PlayerId::new("a"));
        session.turn_state.order = vec![PlayerId::new("a")];
        let (_, start) = advance_session_turn(&mut session, &PlayerId::new("a"), 11_000).unwrap();
        assert!(start.is_none());
        assert!(session.session_complete);
        assert_eq!(session.completed_at, Some(11_000));
    }

    #[test]
    fn score_update_completes_participant_at_zero_remaining() {
        let mut p = ready_human("a");
        p.remaining_dice = 2;
        let score = ScoreSummary {
            selected_dice_ids: vec![protocol::DieId::new("d1"), protocol::DieId::new("d2")],
            points: 150,
            roll_server_id: ServerRollId(1),
            projected_total_score: 150,
            remaining_dice: 0,
            is_complete: true,
        };
        apply_participant_score_update(&mut p, &score, 2, 5_000);
        assert_eq!(p.remaining_dice, 0);
        assert!(p.is_complete);
        assert_eq!(p.completed_at, Some(5_000));
        assert_eq!(p.score, 150);
    }

    #[test]
    fn phase_repairs_when_snapshot_missing() {
        let mut session = session_with(vec![ready_human("a")]);
        session.turn_state.phase = TurnPhase::AwaitScore;
        session.turn_state.active_turn_player_id = Some(PlayerId::new("a"));
        session.turn_state.order = vec![PlayerId::new("a")];
        ensure_session_turn_state(&mut session, 10_000);
        assert_eq!(session.turn_state.phase, TurnPhase::AwaitRoll);
    }

    #[test]
    fn ready_to_end_with_stale_roll_downgrades() {
        let mut session = session_with(vec![ready_human("a")]);
        session.turn_state.active_turn_player_id = Some(PlayerId::new("a"));
        session.turn_state.order = vec![PlayerId::new("a")];
        session.turn_state.phase = TurnPhase::ReadyToEnd;
        session.turn_state.last_roll_snapshot = Some(RollSnapshot {
            roll_index: 2,
            server_roll_id: ServerRollId(2),
            dice: vec![],
        });
        session.turn_state.last_score_summary = Some(ScoreSummary {
            selected_dice_ids: vec![],
            points: 0,
            roll_server_id: ServerRollId(1),
            projected_total_score: 0,
            remaining_dice: 6,
            is_complete: false,
        });
        ensure_session_turn_state(&mut session, 10_000);
        assert_eq!(session.turn_state.phase, TurnPhase::AwaitScore);
        assert!(session.turn_state.last_score_summary.is_none());
    }

    #[test]
    fn bot_profile_is_ignored_by_partial_eq_in_tests() {
        // Sanity: BotProfile default compiles into a Participant without
        // affecting turn-order eligibility.
        let mut p = Participant::new_bot(PlayerId::new("bot"), BotProfile::default(), 0);
        p.is_seated = true;
        assert!(participant_eligible(&p.player_id.clone(), &p, &None, false));
    }
}
