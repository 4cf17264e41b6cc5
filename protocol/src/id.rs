//! Typed identifiers shared by the wire protocol and the server core.
//!
//! Mirrors the newtype-over-primitive convention used throughout this
//! codebase's protocol layer: ids are cheap to clone, `Display`/`FromStr`
//! round-trip through their wire representation, and comparisons never
//! accidentally mix two different kinds of id.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

macro_rules! interned_string_id {
    ($name:ident) => {
        #[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Arc<str>);

        impl $name {
            pub fn new(s: impl Into<Arc<str>>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                Display::fmt(&self.0, f)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s.into())
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(Arc::from(s))
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self::new(s))
            }
        }
    };
}

interned_string_id!(PlayerId);
interned_string_id!(SessionId);
interned_string_id!(RoomCode);
interned_string_id!(DieId);

/// A hash of the opaque bearer token material. Never round-tripped back into
/// the raw token; the raw token only ever exists client-side and in transit.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenHash(pub [u8; 32]);

impl Display for TokenHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, "..")
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerRollId(pub u64);

impl Display for ServerRollId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

#[cfg(feature = "server")]
mod gen {
    use super::{RoomCode, SessionId, TokenHash};
    use rand::distributions::Alphanumeric;
    use rand::Rng;

    const ROOM_CODE_LEN: usize = 5;
    const SESSION_ID_LEN: usize = 16;

    pub fn random_room_code() -> RoomCode {
        let s: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(ROOM_CODE_LEN)
            .map(char::from)
            .map(|c| c.to_ascii_uppercase())
            .collect();
        RoomCode::new(s)
    }

    pub fn random_session_id() -> SessionId {
        let s: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SESSION_ID_LEN)
            .map(char::from)
            .collect();
        SessionId::new(s)
    }

    pub fn random_token_hash() -> TokenHash {
        TokenHash(rand::thread_rng().gen())
    }
}

#[cfg(feature = "server")]
pub use gen::{random_room_code, random_session_id, random_token_hash};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_round_trips_through_as_str() {
        let id = PlayerId::new("host-1");
        assert_eq!(id.to_string(), "host-1");
        assert_eq!(id.as_str(), "host-1");
    }

    #[test]
    fn interned_ids_compare_by_value() {
        assert_eq!(SessionId::new("a"), SessionId::new("a"));
        assert_ne!(SessionId::new("a"), SessionId::new("b"));
    }
}
