//! Wire message envelopes exchanged over the WebSocket (see `SPEC_FULL.md`
//! §6) plus the small number of request/response bodies that cross the HTTP
//! control plane in non-obvious shapes.
//!
//! Every message carries a `type` discriminator tag on the wire (JSON, not a
//! binary codec) — `#[serde(tag = "type")]` keeps that representation while
//! giving the core typed, exhaustively-matched payloads internally, per the
//! "tagged variants" redesign note.

use crate::dto::{Die, RollSnapshot, ScoreSummary, Session, TurnPhase};
use crate::id::{DieId, PlayerId, ServerRollId, SessionId};
use serde::{Deserialize, Serialize};

/// A client-originated turn action payload (`roll` / `select` / `score`).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TurnActionPayload {
    Roll,
    Select {
        selected_dice_ids: Vec<DieId>,
    },
    Score {
        selected_dice_ids: Vec<DieId>,
        points: u32,
        roll_server_id: ServerRollId,
    },
}

/// Outcome of a `room_channel` chat message, after the conduct pipeline.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoomChannelPayload {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_player_id: Option<PlayerId>,
}

/// Messages a client may send over the socket.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    ChaosAttack {
        #[serde(default)]
        payload: serde_json::Value,
    },
    #[serde(rename = "particle:emit")]
    ParticleEmit {
        #[serde(default)]
        payload: serde_json::Value,
    },
    GameUpdate {
        #[serde(default)]
        payload: serde_json::Value,
    },
    PlayerNotification {
        #[serde(default)]
        payload: serde_json::Value,
    },
    RoomChannel(RoomChannelPayload),
    TurnEnd,
    TurnAction {
        #[serde(flatten)]
        payload: TurnActionPayload,
    },
}

/// Messages the server sends to clients.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    SessionState {
        session: Box<Session>,
    },
    TurnStart {
        player_id: PlayerId,
        round: u32,
        turn_number: u32,
        turn_expires_at: u64,
    },
    TurnEnd {
        player_id: PlayerId,
        round: u32,
        turn_number: u32,
    },
    TurnAction {
        player_id: PlayerId,
        phase: TurnPhase,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        roll: Option<RollSnapshot>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        score: Option<ScoreSummary>,
    },
    TurnTimeoutWarning {
        player_id: PlayerId,
        turn_expires_at: u64,
    },
    TurnAutoAdvanced {
        player_id: PlayerId,
        source: AutoAdvanceSource,
    },
    GameUpdate {
        payload: serde_json::Value,
    },
    PlayerNotification {
        payload: serde_json::Value,
    },
    RoomChannel {
        from_player_id: PlayerId,
        text: String,
    },
    Error {
        reason: &'static str,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoAdvanceSource {
    Server,
}

/// Wraps every HTTP response body, per §6: `{status, payload}`.
#[derive(Clone, Debug, Serialize)]
pub struct ApiEnvelope<T> {
    pub status: &'static str,
    pub payload: T,
}

impl<T> ApiEnvelope<T> {
    pub fn ok(payload: T) -> Self {
        Self {
            status: "ok",
            payload,
        }
    }
}

/// `GET /rooms` query parameters.
#[derive(Debug, Deserialize)]
pub struct ListRoomsQuery {
    pub limit: Option<u32>,
}

/// Auth bundle returned alongside a session response.
#[derive(Clone, Debug, Serialize)]
pub struct AuthBundle {
    pub access_token: String,
    pub access_expires_at: u64,
    pub refresh_token: String,
    pub refresh_expires_at: u64,
}

/// `POST /sessions` request body.
#[derive(Clone, Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub player_id: PlayerId,
    #[serde(default)]
    pub room_code: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub bot_count: Option<u32>,
    #[serde(default)]
    pub game_difficulty: Option<crate::dto::GameDifficulty>,
    #[serde(default)]
    pub demo_mode: bool,
    #[serde(default)]
    pub demo_auto_run: bool,
    #[serde(default)]
    pub demo_speed_mode: bool,
    #[serde(default)]
    pub game_config: Option<crate::dto::GameConfig>,
}

/// `POST /sessions/:id/join` request body.
#[derive(Clone, Debug, Deserialize)]
pub struct JoinSessionRequest {
    pub player_id: PlayerId,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub blocked_player_ids: Vec<PlayerId>,
    #[serde(default)]
    pub bot_count: Option<u32>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PlayerIdBody {
    pub player_id: PlayerId,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStateAction {
    Sit,
    Stand,
    Ready,
    Unready,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ParticipantStateRequest {
    pub action: ParticipantStateAction,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationAction {
    Kick,
    Ban,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ModerateRequest {
    pub requester_player_id: PlayerId,
    pub target_player_id: PlayerId,
    pub action: ModerationAction,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DemoControlAction {
    Pause,
    Resume,
    SpeedFast,
    SpeedNormal,
}

#[derive(Clone, Debug, Deserialize)]
pub struct DemoControlsRequest {
    pub player_id: PlayerId,
    pub action: DemoControlAction,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AdminRoleRequest {
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AdminLogsQuery {
    pub limit: Option<u32>,
    pub player_id: Option<PlayerId>,
    pub session_id: Option<SessionId>,
}

/// Upgrade URL query parameters carried on the WebSocket handshake.
#[derive(Clone, Debug, Deserialize)]
pub struct WebSocketQuery {
    pub session: SessionId,
    pub player_id: PlayerId,
    pub token: String,
}

/// Computed preview used by the `select` turn action — not persisted.
#[derive(Clone, Debug)]
pub struct ScorePreview {
    pub points: u32,
    pub dice: Vec<Die>,
}
