// SPDX-FileCopyrightText: 2021 Softbear, Inc.
// SPDX-License-Identifier: AGPL-3.0-or-later

use log::LevelFilter;
use std::sync::Arc;
use structopt::StructOpt;

/// Server options, to be specified as arguments. Mirrors the corpus's
/// convention of one flat `Options` struct built from process args
/// (`SPEC_FULL.md` §1.1).
#[derive(Debug, StructOpt)]
pub struct Options {
    /// Minimum number of bots seeded into a freshly created session when
    /// `bot_count` is not specified on `POST /sessions`.
    #[structopt(long, default_value = "0")]
    pub min_bots: usize,
    /// Maximum number of bots a session may be seeded with.
    #[structopt(long, default_value = "3")]
    pub max_bots: usize,
    /// Log HTTP/WS request diagnostics.
    #[cfg_attr(debug_assertions, structopt(long, default_value = "info"))]
    #[cfg_attr(not(debug_assertions), structopt(long, default_value = "warn"))]
    pub debug_http: LevelFilter,
    /// Log session/turn-engine diagnostics.
    #[cfg_attr(debug_assertions, structopt(long, default_value = "info"))]
    #[cfg_attr(not(debug_assertions), structopt(long, default_value = "warn"))]
    pub debug_game: LevelFilter,
    /// Log wire-codec/orchestrator diagnostics.
    #[cfg_attr(debug_assertions, structopt(long, default_value = "info"))]
    #[cfg_attr(not(debug_assertions), structopt(long, default_value = "warn"))]
    pub debug_engine: LevelFilter,
    /// Server id, used only for log correlation in multi-process deployments.
    #[structopt(long, default_value = "0")]
    pub server_id: u8,
    #[structopt(long)]
    pub http_port: Option<u16>,
    #[structopt(long)]
    pub https_port: Option<u16>,
    /// Certificate chain path.
    #[structopt(long)]
    pub certificate_path: Option<String>,
    /// Private key path.
    #[structopt(long)]
    pub private_key_path: Option<String>,
    /// Where the `FilePersistenceAdapter` reads/writes its JSON snapshot.
    #[structopt(long, default_value = "./dice_server_store.json")]
    pub store_path: String,
    /// Idle session TTL, in milliseconds (`expiresAt = now + idle_ttl_ms`).
    #[structopt(long, default_value = "1800000")]
    pub idle_ttl_ms: u64,
    /// Turn timeout, in milliseconds.
    #[structopt(long, default_value = "20000")]
    pub turn_timeout_ms: u64,
    /// Maximum human players in a multiplayer session before `room_full`.
    #[structopt(long, default_value = "6")]
    pub max_multiplayer_human_players: u32,
    /// HTTP request bandwidth limiting (in bytes per second).
    #[structopt(long, default_value = "500000")]
    pub http_bandwidth_limit: u32,
    /// HTTP request rate limiting burst (in bytes).
    #[structopt(long, default_value = "1000000")]
    pub http_bandwidth_burst: u32,
    /// Client socket-upgrade rate limiting period (in seconds).
    #[structopt(long, default_value = "30")]
    pub client_authenticate_rate_limit: u64,
    /// Client socket-upgrade rate limiting burst.
    #[structopt(long, default_value = "16")]
    pub client_authenticate_burst: u32,
    /// Comma-separated uids always resolved as `owner` regardless of stored
    /// role (`BootstrapAllowlist`).
    #[structopt(long)]
    pub bootstrap_admin_uids: Option<String>,
    /// Comma-separated, case-insensitive emails always resolved as `owner`.
    #[structopt(long)]
    pub bootstrap_admin_emails: Option<String>,
}

impl Options {
    pub(crate) fn certificate_private_key_paths(&self) -> Option<(Arc<str>, Arc<str>)> {
        self.certificate_path
            .as_deref()
            .zip(self.private_key_path.as_deref())
            .map(|(c, p)| (c.into(), p.into()))
    }

    pub(crate) const STANDARD_HTTP_PORT: u16 = 80;
    pub(crate) const STANDARD_HTTPS_PORT: u16 = 443;

    pub(crate) fn http_and_https_ports(&self) -> (u16, u16) {
        #[cfg(unix)]
        let privileged = nix::unistd::Uid::effective().is_root();
        #[cfg(not(unix))]
        let privileged = true;

        let (http_port, https_port) = if privileged {
            (Self::STANDARD_HTTP_PORT, Self::STANDARD_HTTPS_PORT)
        } else {
            (8080, 8443)
        };

        let ports = (
            self.http_port.unwrap_or(http_port),
            self.https_port.unwrap_or(https_port),
        );
        log::info!("HTTP port: {}, HTTPS port: {}", ports.0, ports.1);
        ports
    }
}
