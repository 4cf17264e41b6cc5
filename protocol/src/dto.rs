//! Data transfer objects: the entities of the Store (see `SPEC_FULL.md` §3)
//! as they cross the wire or the persistence boundary.

use crate::id::{DieId, PlayerId, ServerRollId, SessionId, TokenHash};
use crate::serde_util::is_default;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

pub type UnixMillis = u64;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomKind {
    Private,
    PublicDefault,
    PublicOverflow,
}

impl RoomKind {
    pub fn is_public(self) -> bool {
        !matches!(self, Self::Private)
    }

    /// Lower sorts first in `listRooms`.
    pub fn priority(self) -> u8 {
        match self {
            Self::PublicDefault => 0,
            Self::PublicOverflow => 1,
            Self::Private => 2,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameDifficulty {
    Easy,
    Normal,
    Hard,
}

impl Default for GameDifficulty {
    fn default() -> Self {
        Self::Normal
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    AwaitRoll,
    AwaitScore,
    ReadyToEnd,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminRole {
    Viewer,
    Operator,
    Owner,
}

impl AdminRole {
    pub fn level(self) -> u8 {
        match self {
            Self::Viewer => 1,
            Self::Operator => 2,
            Self::Owner => 3,
        }
    }

    /// Case/whitespace-insensitive parse; unrecognized strings are `None`
    /// rather than an error, matching `normalizeAdminRole`'s "best effort"
    /// contract at the HTTP boundary.
    pub fn normalize(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "viewer" => Some(Self::Viewer),
            "operator" => Some(Self::Operator),
            "owner" => Some(Self::Owner),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GameConfig {
    #[serde(default, skip_serializing_if = "is_default")]
    pub max_multiplayer_human_players: Option<u32>,
    #[serde(default, skip_serializing_if = "is_default")]
    pub winning_score: Option<u32>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Player {
    pub uid: PlayerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_role: Option<AdminRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_role_updated_at: Option<UnixMillis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_role_updated_by: Option<PlayerId>,
    pub updated_at: UnixMillis,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Die {
    pub die_id: DieId,
    pub sides: u8,
    pub value: u8,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RollSnapshot {
    pub roll_index: u32,
    pub server_roll_id: ServerRollId,
    pub dice: Vec<Die>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub selected_dice_ids: Vec<DieId>,
    pub points: u32,
    pub roll_server_id: ServerRollId,
    pub projected_total_score: u32,
    pub remaining_dice: u32,
    pub is_complete: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TurnState {
    pub order: Vec<PlayerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_turn_player_id: Option<PlayerId>,
    pub round: u32,
    pub turn_number: u32,
    pub phase: TurnPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_roll_snapshot: Option<RollSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_score_summary: Option<ScoreSummary>,
    pub turn_timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_expires_at: Option<UnixMillis>,
    pub updated_at: UnixMillis,
}

impl TurnState {
    pub fn new(turn_timeout_ms: u64, now: UnixMillis) -> Self {
        Self {
            order: Vec::new(),
            active_turn_player_id: None,
            round: 1,
            turn_number: 1,
            phase: TurnPhase::AwaitRoll,
            last_roll_snapshot: None,
            last_score_summary: None,
            turn_timeout_ms,
            turn_expires_at: None,
            updated_at: now,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BotProfile {
    #[serde(default, skip_serializing_if = "is_default")]
    pub aggressiveness: u8,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Participant {
    pub player_id: PlayerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    pub is_bot: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_profile: Option<BotProfile>,
    pub is_seated: bool,
    pub is_ready: bool,
    pub queued_for_next_game: bool,
    pub score: u32,
    pub remaining_dice: u32,
    pub is_complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<UnixMillis>,
    pub joined_at: UnixMillis,
    pub last_heartbeat_at: UnixMillis,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_timeout_round: Option<u32>,
    pub turn_timeout_count: u32,
    #[serde(default, skip_serializing_if = "HashSet::is_empty")]
    pub blocked_player_ids: HashSet<PlayerId>,
}

impl Participant {
    pub fn new_human(player_id: PlayerId, display_name: Option<String>, now: UnixMillis) -> Self {
        Self {
            player_id,
            display_name,
            avatar_url: None,
            provider_id: None,
            is_bot: false,
            bot_profile: None,
            is_seated: false,
            is_ready: false,
            queued_for_next_game: false,
            score: 0,
            remaining_dice: Self::STARTING_DICE,
            is_complete: false,
            completed_at: None,
            joined_at: now,
            last_heartbeat_at: now,
            turn_timeout_round: None,
            turn_timeout_count: 0,
            blocked_player_ids: HashSet::new(),
        }
    }

    pub fn new_bot(player_id: PlayerId, profile: BotProfile, now: UnixMillis) -> Self {
        Self {
            is_bot: true,
            bot_profile: Some(profile),
            is_seated: true,
            is_ready: true,
            ..Self::new_human(player_id, None, now)
        }
    }

    pub const STARTING_DICE: u32 = 6;
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BanRecord {
    pub target_player_id: PlayerId,
    pub banned_by: PlayerId,
    pub banned_at: UnixMillis,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatConductEntry {
    #[serde(default)]
    pub strike_events: Vec<UnixMillis>,
    pub total_strikes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_violation_at: Option<UnixMillis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub muted_until: Option<UnixMillis>,
}

impl Default for ChatConductEntry {
    fn default() -> Self {
        Self {
            strike_events: Vec::new(),
            total_strikes: 0,
            last_violation_at: None,
            muted_until: None,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChatConductState {
    pub players: HashMap<PlayerId, ChatConductEntry>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub room_code: RoomCode,
    pub room_kind: RoomKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_player_id: Option<PlayerId>,
    pub game_difficulty: GameDifficulty,
    pub game_config: GameConfig,
    pub demo_mode: bool,
    pub demo_auto_run: bool,
    pub demo_speed_mode: bool,
    pub created_at: UnixMillis,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_started_at: Option<UnixMillis>,
    pub last_activity_at: UnixMillis,
    pub expires_at: UnixMillis,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_game_starts_at: Option<UnixMillis>,
    pub session_complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<UnixMillis>,
    pub participants: HashMap<PlayerId, Participant>,
    pub turn_state: TurnState,
    pub chat_conduct_state: ChatConductState,
    pub room_bans: HashMap<PlayerId, BanRecord>,
}

impl Session {
    pub fn human_count(&self) -> usize {
        self.participants.values().filter(|p| !p.is_bot).count()
    }

    pub fn active_human_count(&self) -> usize {
        self.participants
            .values()
            .filter(|p| !p.is_bot && p.is_seated && !p.is_complete)
            .count()
    }

    pub fn is_alive(&self, now: UnixMillis) -> bool {
        self.expires_at > now
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthToken {
    pub token_hash: TokenHash,
    pub player_id: PlayerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    pub issued_at: UnixMillis,
    pub expires_at: UnixMillis,
    pub kind: TokenKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<UnixMillis>,
}

impl AuthToken {
    pub fn is_live(&self, now: UnixMillis) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameLogType {
    AdminAction,
    SessionCreated,
    SessionExpired,
    ParticipantRemoved,
    Moderation,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GameLog {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<PlayerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(rename = "type")]
    pub kind: GameLogType,
    pub timestamp: UnixMillis,
    pub payload: serde_json::Value,
}
