//! `ConductFilterRegistry` capability trait (`SPEC_FULL.md` §4.7, §1
//! "chat-conduct policy... consumed through a filter-registry interface").
//! The core only specifies how verdicts are applied (strike accrual,
//! mute/auto-ban semantics); the actual profanity/content rules are an
//! external collaborator. A reference implementation backed by `rustrict`
//! is provided to match the corpus's chat-moderation stack.

use protocol::{ChatConductEntry, Participant, PlayerId, Session, UnixMillis};
use rustrict::{Censor, Type};

/// A strike accrues this many violations before `should_auto_ban` fires.
const AUTO_BAN_STRIKE_THRESHOLD: u32 = 5;
/// A single violation mutes the sender for this long.
const VIOLATION_MUTE_MS: UnixMillis = 60_000;

pub struct PreflightVerdict {
    pub allowed: bool,
}

pub struct InboundVerdict {
    pub allowed: bool,
    pub state_changed: bool,
    pub should_auto_ban: bool,
    pub censored_text: String,
}

pub struct DirectDeliveryVerdict {
    pub allowed: bool,
}

/// Capability interface wired at `World` construction time (§9 "dynamic
/// config"). The core applies verdicts; it never inspects text itself.
pub trait ConductFilterRegistry: Send + Sync {
    /// Sender-restriction check only (muted, room-banned-adjacent states);
    /// runs before any content is even looked at.
    fn preflight(&self, session: &Session, sender_id: &PlayerId) -> PreflightVerdict;

    /// Content rules + strike accrual. Mutates `entry` in place; the caller
    /// persists iff `state_changed`.
    fn inbound(&self, entry: &mut ChatConductEntry, text: &str, now: UnixMillis) -> InboundVerdict;

    /// Block-relationship check for a specific (sender, recipient) pair.
    fn direct_delivery(&self, sender: &Participant, recipient: &Participant) -> DirectDeliveryVerdict;
}

/// Reference registry: `rustrict`'s trie-based censor classifies severity;
/// every non-`SAFE` message accrues a strike and the cleaned text is what
/// gets broadcast.
#[derive(Default)]
pub struct RustrictFilterRegistry;

impl ConductFilterRegistry for RustrictFilterRegistry {
    fn preflight(&self, _session: &Session, sender_id: &PlayerId) -> PreflightVerdict {
        PreflightVerdict {
            allowed: !sender_id.as_str().is_empty(),
        }
    }

    fn inbound(&self, entry: &mut ChatConductEntry, text: &str, now: UnixMillis) -> InboundVerdict {
        if let Some(muted_until) = entry.muted_until {
            if muted_until > now {
                return InboundVerdict {
                    allowed: false,
                    state_changed: false,
                    should_auto_ban: false,
                    censored_text: String::new(),
                };
            }
        }

        let (censored_text, analysis) = Censor::from_str(text).censor_and_analyze();
        let violation = analysis.is(Type::INAPPROPRIATE);

        if !violation {
            return InboundVerdict {
                allowed: true,
                state_changed: false,
                should_auto_ban: false,
                censored_text,
            };
        }

        entry.strike_events.push(now);
        entry.total_strikes += 1;
        entry.last_violation_at = Some(now);
        entry.muted_until = Some(now + VIOLATION_MUTE_MS);

        InboundVerdict {
            allowed: true,
            state_changed: true,
            should_auto_ban: entry.total_strikes >= AUTO_BAN_STRIKE_THRESHOLD,
            censored_text,
        }
    }

    fn direct_delivery(&self, sender: &Participant, recipient: &Participant) -> DirectDeliveryVerdict {
        let blocked = recipient.blocked_player_ids.contains(&sender.player_id)
            || sender.blocked_player_ids.contains(&recipient.player_id);
        DirectDeliveryVerdict {
            allowed: !blocked,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn participant(id: &str) -> Participant {
        Participant::new_human(PlayerId::new(id), None, 0)
    }

    #[test]
    fn clean_message_accrues_no_strike() {
        let registry = RustrictFilterRegistry;
        let mut entry = ChatConductEntry::default();
        let verdict = registry.inbound(&mut entry, "good luck everyone", 1_000);
        assert!(verdict.allowed);
        assert!(!verdict.state_changed);
        assert_eq!(entry.total_strikes, 0);
    }

    #[test]
    fn muted_sender_is_blocked_without_new_strike() {
        let registry = RustrictFilterRegistry;
        let mut entry = ChatConductEntry {
            muted_until: Some(2_000),
            ..ChatConductEntry::default()
        };
        let verdict = registry.inbound(&mut entry, "hello", 1_500);
        assert!(!verdict.allowed);
        assert!(!verdict.state_changed);
    }

    #[test]
    fn direct_delivery_respects_mutual_blocks() {
        let registry = RustrictFilterRegistry;
        let mut sender = participant("a");
        let recipient = participant("b");
        sender.blocked_player_ids.insert(PlayerId::new("b"));
        assert!(!registry.direct_delivery(&sender, &recipient).allowed);
    }

    #[test]
    fn auto_ban_fires_after_threshold_strikes() {
        let registry = RustrictFilterRegistry;
        let mut entry = ChatConductEntry::default();
        let mut last = InboundVerdict {
            allowed: true,
            state_changed: false,
            should_auto_ban: false,
            censored_text: String::new(),
        };
        for i in 0..AUTO_BAN_STRIKE_THRESHOLD {
            entry.muted_until = None;
            last = registry.inbound(&mut entry, "fuck this game", (i as UnixMillis) * 100_000);
        }
        assert!(last.should_auto_ban);
        assert_eq!(entry.total_strikes, AUTO_BAN_STRIKE_THRESHOLD);
    }
}
