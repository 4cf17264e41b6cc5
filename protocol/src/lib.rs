use std::time::{SystemTime, UNIX_EPOCH};

pub mod dto;
pub mod error;
pub mod id;
pub mod rpc;
pub mod serde_util;

pub use dto::*;
pub use error::*;
pub use id::*;
pub use rpc::*;
pub use serde_util::is_default;

pub fn now_unix_millis() -> UnixMillis {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_millis() as u64,
        _ => 0,
    }
}
