//! The canonical, process-wide aggregate (`SPEC_FULL.md` §3, §4.2) and its
//! persistence/rehydration machinery.
//!
//! The `World` actor (see `world.rs`) owns exactly one [`Store`] and is the
//! sole writer of it, realizing §5's single-writer model as "a global store
//! lock for the whole world."

use log::{error, warn};
use protocol::{
    AuthToken, GameLog, GameLogType, Player, PlayerId, Session, SessionId, TokenHash, UnixMillis,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Everything the core owns. Four top-level maps per §3.
///
/// `Clone` exists solely so `World` can hand a point-in-time snapshot to a
/// spawned persistence task without holding up the actor mailbox on disk
/// I/O; nothing in the core clones a `Store` for any other reason.
#[derive(Default, Clone)]
pub struct Store {
    pub players: HashMap<PlayerId, Player>,
    pub sessions: HashMap<SessionId, Session>,
    pub tokens: HashMap<TokenHash, AuthToken>,
    pub logs: Vec<GameLog>,
    next_log_id: u64,
}

impl Store {
    /// Per-endpoint audit log bounds (§4.8, §6.1): default page size, and the
    /// two documented hard caps (`/admin/logs` vs. other listing endpoints).
    pub const LOG_DEFAULT_LIMIT: usize = 60;
    pub const LOG_HARD_CAP: usize = 250;
    pub const LOG_HARD_CAP_WIDE: usize = 500;

    pub fn session_by_room_code(&self, room_code: &str) -> Option<&Session> {
        self.sessions.values().find(|s| s.room_code.as_str() == room_code)
    }

    pub fn room_code_taken(&self, room_code: &str, now: UnixMillis) -> bool {
        self.sessions
            .values()
            .any(|s| s.room_code.as_str() == room_code && s.is_alive(now))
    }

    pub fn record_log(
        &mut self,
        player_id: Option<PlayerId>,
        session_id: Option<SessionId>,
        kind: GameLogType,
        timestamp: UnixMillis,
        payload: serde_json::Value,
    ) {
        self.next_log_id += 1;
        self.logs.push(GameLog {
            id: self.next_log_id,
            player_id,
            session_id,
            kind,
            timestamp,
            payload,
        });
    }

    /// Opaque compaction trigger; policy is deliberately unspecified beyond
    /// the per-endpoint listing bounds above (§9 open question (b)). The
    /// reference policy here simply caps total retained entries well above
    /// any single endpoint's hard cap so compaction is rarely on the
    /// critical path.
    pub fn compact_log_store(&mut self) {
        const RETAIN: usize = 5_000;
        if self.logs.len() > RETAIN {
            let drop = self.logs.len() - RETAIN;
            self.logs.drain(0..drop);
        }
    }

    pub fn logs_desc(&self, limit: usize, player_id: Option<&PlayerId>, session_id: Option<&SessionId>) -> Vec<&GameLog> {
        let mut matching: Vec<&GameLog> = self
            .logs
            .iter()
            .filter(|log| player_id.map_or(true, |p| log.player_id.as_ref() == Some(p)))
            .filter(|log| session_id.map_or(true, |s| log.session_id.as_ref() == Some(s)))
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matching.truncate(limit);
        matching
    }
}

/// External persistence boundary (§1 out-of-scope: "the persistence adapter
/// is treated as an opaque key-value store"). A process-local file-backed
/// implementation is provided for development and tests; its on-disk
/// encoding is not normative.
#[async_trait::async_trait]
pub trait PersistenceAdapter: Send + Sync + 'static {
    async fn load(&self) -> Store;
    async fn save(&self, store: &Store);
}

/// JSON-snapshot-of-the-whole-`Store` adapter. Intentionally simple: the
/// core never relies on anything beyond "eventually durable" (§4.2).
pub struct FilePersistenceAdapter {
    path: PathBuf,
}

impl FilePersistenceAdapter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn snapshot(store: &Store) -> StoreSnapshot {
        StoreSnapshot {
            players: store.players.values().cloned().collect(),
            sessions: store.sessions.values().cloned().collect(),
            tokens: store.tokens.values().cloned().collect(),
            logs: store.logs.clone(),
        }
    }
}

#[derive(Default, serde::Serialize, serde::Deserialize)]
struct StoreSnapshot {
    players: Vec<Player>,
    sessions: Vec<Session>,
    tokens: Vec<AuthToken>,
    logs: Vec<GameLog>,
}

#[async_trait::async_trait]
impl PersistenceAdapter for FilePersistenceAdapter {
    async fn load(&self) -> Store {
        let path = self.path.clone();
        let snapshot = tokio::task::spawn_blocking(move || read_snapshot(&path))
            .await
            .unwrap_or_default();

        let mut store = Store::default();
        for player in snapshot.players {
            store.players.insert(player.uid.clone(), player);
        }
        for session in snapshot.sessions {
            store.sessions.insert(session.session_id.clone(), session);
        }
        for token in snapshot.tokens {
            store.tokens.insert(token.token_hash, token);
        }
        store.next_log_id = snapshot.logs.iter().map(|l| l.id).max().unwrap_or(0);
        store.logs = snapshot.logs;
        store
    }

    async fn save(&self, store: &Store) {
        let snapshot = Self::snapshot(store);
        let path = self.path.clone();
        let result = tokio::task::spawn_blocking(move || write_snapshot(&path, &snapshot)).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("persistStore failed (will converge on next rehydrate): {e}"),
            Err(e) => error!("persistStore task panicked: {e}"),
        }
    }
}

fn read_snapshot(path: &Path) -> StoreSnapshot {
    std::fs::read(path)
        .ok()
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
        .unwrap_or_default()
}

fn write_snapshot(path: &Path, snapshot: &StoreSnapshot) -> std::io::Result<()> {
    let bytes = serde_json::to_vec(snapshot)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(tmp, path)
}

/// A named `(attempts, base_delay_ms)` tuple governing rehydration backoff
/// (§4.2). Closed set.
#[derive(Copy, Clone, Debug)]
pub struct RetryProfile {
    pub attempts: u32,
    pub base_delay_ms: u64,
}

impl RetryProfile {
    pub const SESSION_STANDARD: Self = Self::new(6, 150);
    pub const SESSION_FAST: Self = Self::new(4, 120);
    pub const SESSION_REFRESH_AUTH: Self = Self::new(7, 200);
    pub const AUTH_RECOVERY: Self = Self::new(5, 160);
    pub const SESSION_LEAVE: Self = Self::new(3, 100);

    const fn new(attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            attempts,
            base_delay_ms,
        }
    }
}

/// How long the linear backoff for attempt `n` of `profile` should sleep.
/// Orchestration (looking the session up in the `Store`, invoking the
/// persistence adapter between attempts) lives on `World` in `world.rs`,
/// since it needs mutable access to the actor's owned `Store` between
/// sleeps — this free function only carries the timing rule so it's
/// independently testable.
pub fn retry_backoff(profile: RetryProfile, attempt: u32) -> Duration {
    Duration::from_millis(profile.base_delay_ms * attempt as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_profiles_match_spec_tuning() {
        assert_eq!(RetryProfile::SESSION_STANDARD.attempts, 6);
        assert_eq!(RetryProfile::SESSION_STANDARD.base_delay_ms, 150);
        assert_eq!(RetryProfile::SESSION_LEAVE.attempts, 3);
        assert_eq!(RetryProfile::SESSION_LEAVE.base_delay_ms, 100);
    }

    #[test]
    fn log_bounds_are_distinct() {
        assert!(Store::LOG_DEFAULT_LIMIT < Store::LOG_HARD_CAP);
        assert!(Store::LOG_HARD_CAP < Store::LOG_HARD_CAP_WIDE);
    }
}
