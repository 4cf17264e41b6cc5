//! Admin Plane (`SPEC_FULL.md` §4.8, C8): role resolution, audit log, and a
//! security envelope around the C5/C3 operations admins are allowed to
//! invoke directly.

use crate::membership::{remove_participant_from_session, RemovalResult, RemovalSource};
use crate::store::Store;
use protocol::{AdminRole, ErrorKind, GameLogType, Player, PlayerId, SessionId, UnixMillis};
use std::collections::HashSet;

pub fn has_required_admin_role(actual: Option<AdminRole>, required: AdminRole) -> bool {
    actual.map(|r| r.level() >= required.level()).unwrap_or(false)
}

fn require_role_at_least(role: Option<AdminRole>, required: AdminRole) -> Result<(), ErrorKind> {
    match role {
        None => Err(ErrorKind::MissingAdminRole),
        Some(r) if r.level() >= required.level() => Ok(()),
        Some(_) => Err(ErrorKind::Unauthorized),
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RoleSource {
    Bootstrap,
    Assigned,
    None,
}

pub struct ResolvedRole {
    pub role: Option<AdminRole>,
    pub source: RoleSource,
}

/// Static `uid`/lowercase-`email` allowlists granted `owner` regardless of
/// stored state (§4.8).
#[derive(Default)]
pub struct BootstrapAllowlist {
    pub uids: HashSet<String>,
    pub emails: HashSet<String>,
}

impl BootstrapAllowlist {
    pub fn contains(&self, uid: &str, email: Option<&str>) -> bool {
        self.uids.contains(uid) || email.map(|e| self.emails.contains(&e.to_ascii_lowercase())).unwrap_or(false)
    }
}

pub fn resolve_admin_role_for_identity(
    uid: &str,
    email: Option<&str>,
    bootstrap: &BootstrapAllowlist,
    stored_role: Option<AdminRole>,
) -> ResolvedRole {
    if bootstrap.contains(uid, email) {
        return ResolvedRole {
            role: Some(AdminRole::Owner),
            source: RoleSource::Bootstrap,
        };
    }
    match stored_role {
        Some(role) => ResolvedRole {
            role: Some(role),
            source: RoleSource::Assigned,
        },
        None => ResolvedRole {
            role: None,
            source: RoleSource::None,
        },
    }
}

/// Refuses to change a bootstrap-owner UID away from `owner`.
pub fn upsert_role(
    store: &mut Store,
    target_uid: &PlayerId,
    requested_role: AdminRole,
    bootstrap: &BootstrapAllowlist,
    actor: &PlayerId,
    now: UnixMillis,
) -> Result<AdminRole, ErrorKind> {
    if bootstrap.contains(target_uid.as_str(), None) && requested_role != AdminRole::Owner {
        return Err(ErrorKind::BootstrapOwnerLocked);
    }

    let player = store.players.entry(target_uid.clone()).or_insert_with(|| Player {
        uid: target_uid.clone(),
        display_name: None,
        email: None,
        avatar_url: None,
        provider_id: None,
        admin_role: None,
        admin_role_updated_at: None,
        admin_role_updated_by: None,
        updated_at: now,
    });
    player.admin_role = Some(requested_role);
    player.admin_role_updated_at = Some(now);
    player.admin_role_updated_by = Some(actor.clone());
    player.updated_at = now;
    Ok(requested_role)
}

/// Per-endpoint audit log bounds (§4.8, §6.1): clamps to `[1, hard_cap]`,
/// falling back to `Store::LOG_DEFAULT_LIMIT` when absent.
pub fn clamp_log_limit(raw_limit: Option<u32>, hard_cap: usize) -> usize {
    raw_limit
        .map(|n| (n as usize).clamp(1, hard_cap))
        .unwrap_or(Store::LOG_DEFAULT_LIMIT)
        .min(hard_cap)
}

pub fn expire_session(
    store: &mut Store,
    actor: &PlayerId,
    actor_role: Option<AdminRole>,
    session_id: &SessionId,
    now: UnixMillis,
) -> Result<bool, ErrorKind> {
    require_role_at_least(actor_role, AdminRole::Operator)?;
    let session = store.sessions.get_mut(session_id).ok_or(ErrorKind::UnknownSession)?;
    let room_inventory_changed = session.room_kind.is_public();
    session.expires_at = now;
    session.session_complete = true;
    session.completed_at = Some(now);

    store.record_log(
        Some(actor.clone()),
        Some(session_id.clone()),
        GameLogType::SessionExpired,
        now,
        serde_json::json!({"action": "expire_session"}),
    );
    store.compact_log_store();
    Ok(room_inventory_changed)
}

pub fn remove_participant(
    store: &mut Store,
    actor: &PlayerId,
    actor_role: Option<AdminRole>,
    session_id: &SessionId,
    target_player_id: &PlayerId,
    now: UnixMillis,
) -> Result<RemovalResult, ErrorKind> {
    require_role_at_least(actor_role, AdminRole::Operator)?;
    let session = store.sessions.get_mut(session_id).ok_or(ErrorKind::UnknownSession)?;
    let result = remove_participant_from_session(session, target_player_id, RemovalSource::AdminRemoved, now);

    store.record_log(
        Some(actor.clone()),
        Some(session_id.clone()),
        GameLogType::ParticipantRemoved,
        now,
        serde_json::json!({"action": "remove_participant", "target_player_id": target_player_id.as_str()}),
    );
    store.compact_log_store();
    Ok(result)
}

pub fn clear_session_conduct_player(
    store: &mut Store,
    actor: &PlayerId,
    actor_role: Option<AdminRole>,
    session_id: &SessionId,
    target_player_id: &PlayerId,
    now: UnixMillis,
) -> Result<(), ErrorKind> {
    require_role_at_least(actor_role, AdminRole::Operator)?;
    let session = store.sessions.get_mut(session_id).ok_or(ErrorKind::UnknownSession)?;
    session.chat_conduct_state.players.remove(target_player_id);

    store.record_log(
        Some(actor.clone()),
        Some(session_id.clone()),
        GameLogType::Moderation,
        now,
        serde_json::json!({"action": "clear_conduct_player", "target_player_id": target_player_id.as_str()}),
    );
    store.compact_log_store();
    Ok(())
}

pub fn clear_session_conduct_state(
    store: &mut Store,
    actor: &PlayerId,
    actor_role: Option<AdminRole>,
    session_id: &SessionId,
    now: UnixMillis,
) -> Result<(), ErrorKind> {
    require_role_at_least(actor_role, AdminRole::Operator)?;
    let session = store.sessions.get_mut(session_id).ok_or(ErrorKind::UnknownSession)?;
    session.chat_conduct_state.players.clear();

    store.record_log(
        Some(actor.clone()),
        Some(session_id.clone()),
        GameLogType::Moderation,
        now,
        serde_json::json!({"action": "clear_conduct_state"}),
    );
    store.compact_log_store();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_identity_always_resolves_owner() {
        let mut bootstrap = BootstrapAllowlist::default();
        bootstrap.uids.insert("root".to_string());
        let resolved = resolve_admin_role_for_identity("root", None, &bootstrap, Some(AdminRole::Viewer));
        assert_eq!(resolved.role, Some(AdminRole::Owner));
        assert_eq!(resolved.source, RoleSource::Bootstrap);
    }

    #[test]
    fn stored_role_used_when_not_bootstrap() {
        let bootstrap = BootstrapAllowlist::default();
        let resolved = resolve_admin_role_for_identity("someone", None, &bootstrap, Some(AdminRole::Operator));
        assert_eq!(resolved.role, Some(AdminRole::Operator));
        assert_eq!(resolved.source, RoleSource::Assigned);
    }

    #[test]
    fn upsert_rejects_demoting_bootstrap_owner() {
        let mut store = Store::default();
        let mut bootstrap = BootstrapAllowlist::default();
        bootstrap.uids.insert("root".to_string());
        let err = upsert_role(&mut store, &PlayerId::new("root"), AdminRole::Viewer, &bootstrap, &PlayerId::new("actor"), 0).unwrap_err();
        assert_eq!(err, ErrorKind::BootstrapOwnerLocked);
    }

    #[test]
    fn upsert_allows_bootstrap_owner_reassigned_owner() {
        let mut store = Store::default();
        let mut bootstrap = BootstrapAllowlist::default();
        bootstrap.uids.insert("root".to_string());
        let role = upsert_role(&mut store, &PlayerId::new("root"), AdminRole::Owner, &bootstrap, &PlayerId::new("actor"), 0).unwrap();
        assert_eq!(role, AdminRole::Owner);
    }

    #[test]
    fn operator_action_requires_role() {
        let mut store = Store::default();
        let err = expire_session(&mut store, &PlayerId::new("actor"), Some(AdminRole::Viewer), &SessionId::new("nope"), 0).unwrap_err();
        assert_eq!(err, ErrorKind::Unauthorized);

        let err = expire_session(&mut store, &PlayerId::new("actor"), None, &SessionId::new("nope"), 0).unwrap_err();
        assert_eq!(err, ErrorKind::MissingAdminRole);
    }

    #[test]
    fn log_limit_clamps_to_hard_cap() {
        assert_eq!(clamp_log_limit(Some(10_000), Store::LOG_HARD_CAP), Store::LOG_HARD_CAP);
        assert_eq!(clamp_log_limit(None, Store::LOG_HARD_CAP), Store::LOG_DEFAULT_LIMIT);
        assert_eq!(clamp_log_limit(Some(0), Store::LOG_HARD_CAP), 1);
    }
}
