//! Networking helpers. The teacher's region-routing (`ip.rs`, public IP
//! geolocation for arena-to-region assignment) has no counterpart in a
//! single-process dice server and is dropped; see `DESIGN.md`.

pub mod tls;
