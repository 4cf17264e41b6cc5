// SPDX-FileCopyrightText: 2021 Softbear, Inc.
// SPDX-License-Identifier: AGPL-3.0-or-later

//! HTTP control plane + WebSocket upgrade routing (`SPEC_FULL.md` §6).
//! Builds the `World` actor, wires every route in the external-interfaces
//! table to a `World` message, and runs the dual HTTP/HTTPS listener pair.

use crate::admin::BootstrapAllowlist;
use crate::bot::DeterministicBotEngine;
use crate::conduct::RustrictFilterRegistry;
use crate::options::Options;
use crate::socket::ClientRegistry;
use crate::store::FilePersistenceAdapter;
use crate::wire::{self, HandshakeHeaders};
use crate::world::{
    AdminClearConductPlayer, AdminClearConductState, AdminExpireSession, AdminGetRole,
    AdminListLogs, AdminListSessions, AdminRemoveParticipant, AdminUpsertRole, ApplyDemoControl,
    CreateSession, GetSession, Heartbeat, JoinSession, LeaveSession, ListRooms, Moderate,
    QueueNextGame, RefreshAuth, SessionLookup, SetParticipantState, World,
};
use actix::{Actor, Addr};
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{error, info, warn};
use protocol::{
    AdminLogsQuery, AdminRole, AdminRoleRequest, ApiEnvelope, CreateSessionRequest,
    DemoControlsRequest, ErrorKind, JoinSessionRequest, ListRoomsQuery, ModerateRequest,
    ParticipantStateRequest, PlayerId, PlayerIdBody, SessionId, WebSocketQuery,
};
use server_util::rate_limiter::{IpRateLimiter, RateLimiterProps};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use structopt::StructOpt;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

#[derive(Clone)]
struct AppState {
    world: Addr<World>,
    registry: Arc<ClientRegistry>,
    max_message_bytes: usize,
    authenticate_limiter: Arc<Mutex<IpRateLimiter>>,
}

fn parse_allowlist(uids: &str) -> impl Iterator<Item = String> + '_ {
    uids.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

pub fn entry_point() {
    actix::System::new().block_on(async move {
        let options = Options::from_args();

        crate::log::init_logger(&options);

        let (http_port, https_port) = options.http_and_https_ports();
        let certificate_private_key_paths = options.certificate_private_key_paths();

        let bootstrap = Arc::new(BootstrapAllowlist {
            uids: options
                .bootstrap_admin_uids
                .as_deref()
                .into_iter()
                .flat_map(parse_allowlist)
                .collect(),
            emails: options
                .bootstrap_admin_emails
                .as_deref()
                .into_iter()
                .flat_map(parse_allowlist)
                .map(|e| e.to_ascii_lowercase())
                .collect(),
        });

        let persistence = Arc::new(FilePersistenceAdapter::new(options.store_path.clone()));
        let registry = Arc::new(ClientRegistry::new());

        let world = World::new(
            &options,
            persistence,
            Arc::new(DeterministicBotEngine),
            Arc::new(RustrictFilterRegistry),
            bootstrap,
            Arc::clone(&registry),
        )
        .await;
        let world = world.start();

        let authenticate_limiter = Arc::new(Mutex::new(IpRateLimiter::new(RateLimiterProps::new(
            Duration::from_secs(options.client_authenticate_rate_limit),
            options.client_authenticate_burst,
        ))));

        let state = AppState {
            world: world.clone(),
            registry,
            max_message_bytes: wire::DEFAULT_MAX_MESSAGE_BYTES,
            authenticate_limiter,
        };

        let app = Router::new()
            .route("/rooms", get(list_rooms))
            .route("/sessions", post(create_session))
            .route("/sessions/:id", get(get_session))
            .route("/sessions/:id/join", post(join_session))
            .route("/sessions/:id/leave", post(leave_session))
            .route("/sessions/:id/heartbeat", post(heartbeat))
            .route("/sessions/:id/participants/:pid/state", post(set_participant_state))
            .route("/sessions/:id/moderate", post(moderate))
            .route("/sessions/:id/demo-controls", post(demo_controls))
            .route("/sessions/:id/queue-next", post(queue_next))
            .route("/sessions/:id/refresh-auth", post(refresh_auth))
            .route("/admin/roles/:uid", post(admin_upsert_role).get(admin_get_role))
            .route("/admin/sessions/:id/expire", post(admin_expire_session))
            .route("/admin/sessions/:id/participants/:pid/remove", post(admin_remove_participant))
            .route("/admin/sessions/:id/conduct/:pid/clear", post(admin_clear_conduct_player))
            .route("/admin/sessions/:id/conduct/clear", post(admin_clear_conduct_state))
            .route("/admin/logs", get(admin_list_logs))
            .route("/admin/sessions", get(admin_list_sessions))
            .route("/ws", get(websocket_upgrade))
            .layer(
                ServiceBuilder::new()
                    .layer(
                        CorsLayer::new()
                            .allow_origin(tower_http::cors::Any)
                            .allow_headers(tower_http::cors::Any)
                            .allow_methods(tower_http::cors::Any),
                    )
                    .layer(axum::extract::DefaultBodyLimit::max(options.http_bandwidth_burst as usize)),
            )
            .with_state(state);

        let addr_incoming_config = axum_server::AddrIncomingConfig::new()
            .tcp_keepalive(Some(Duration::from_secs(32)))
            .tcp_nodelay(true)
            .tcp_sleep_on_accept_errors(true)
            .build();

        let http_server = axum_server::bind(SocketAddr::from(([0, 0, 0, 0], http_port)))
            .addr_incoming_config(addr_incoming_config.clone())
            .serve(app.clone().into_make_service_with_connect_info::<SocketAddr>());

        let rustls_config = crate::net::tls::rustls_config(certificate_private_key_paths).await;

        let https_server = axum_server::bind_rustls(
            SocketAddr::from(([0, 0, 0, 0], https_port)),
            rustls_config,
        )
        .addr_incoming_config(addr_incoming_config)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>());

        tokio::select! {
            result = http_server => {
                error!("http server stopped: {:?}", result);
            }
            result = https_server => {
                error!("https server stopped: {:?}", result);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received Ctrl+C / SIGINT");
            }
        }

        world.do_send(crate::shutdown::Shutdown);
        tokio::time::sleep(Duration::from_secs(1)).await;
        std::process::exit(1);
    });
}

fn error_response(kind: ErrorKind) -> Response {
    let status = StatusCode::from_u16(kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(ApiEnvelope::<&str> { status: "error", payload: kind.as_reason() })).into_response()
}

fn ok_response<T: serde::Serialize>(payload: T) -> Response {
    Json(ApiEnvelope::ok(payload)).into_response()
}

async fn list_rooms(State(state): State<AppState>, Query(query): Query<ListRoomsQuery>) -> Response {
    let rooms = state.world.send(ListRooms { limit: query.limit }).await.unwrap_or_default();
    let timestamp = protocol::now_unix_millis();
    ok_response(serde_json::json!({ "rooms": rooms, "timestamp": timestamp }))
}

async fn create_session(State(state): State<AppState>, Json(request): Json<CreateSessionRequest>) -> Response {
    match state.world.send(CreateSession { request }).await {
        Ok(Ok((session_id, auth))) => ok_response(serde_json::json!({ "sessionId": session_id, "auth": auth })),
        Ok(Err(kind)) => error_response(kind),
        Err(_) => error_response(ErrorKind::Internal),
    }
}

async fn get_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.world.send(GetSession { session_id: SessionId::new(id) }).await {
        Ok(Ok(session)) => ok_response(session),
        Ok(Err(kind)) => error_response(kind),
        Err(_) => error_response(ErrorKind::Internal),
    }
}

async fn join_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<JoinSessionRequest>,
) -> Response {
    match state
        .world
        .send(JoinSession {
            target: SessionLookup::Id(SessionId::new(id)),
            request,
        })
        .await
    {
        Ok(Ok((session_id, session))) => ok_response(serde_json::json!({ "sessionId": session_id, "session": session })),
        Ok(Err(kind)) => error_response(kind),
        Err(_) => error_response(ErrorKind::Internal),
    }
}

async fn leave_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<PlayerIdBody>,
) -> Response {
    let _ = state
        .world
        .send(LeaveSession {
            session_id: SessionId::new(id),
            player_id: body.player_id,
        })
        .await;
    ok_response(serde_json::json!({ "ok": true }))
}

async fn heartbeat(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<PlayerIdBody>,
) -> Response {
    match state
        .world
        .send(Heartbeat {
            session_id: SessionId::new(id),
            player_id: body.player_id,
        })
        .await
    {
        Ok(Ok(())) => ok_response(serde_json::json!({ "ok": true })),
        Ok(Err(kind)) => error_response(kind),
        Err(_) => error_response(ErrorKind::Internal),
    }
}

async fn set_participant_state(
    State(state): State<AppState>,
    Path((id, pid)): Path<(String, String)>,
    Json(request): Json<ParticipantStateRequest>,
) -> Response {
    match state
        .world
        .send(SetParticipantState {
            session_id: SessionId::new(id),
            player_id: PlayerId::new(pid),
            action: request.action,
        })
        .await
    {
        Ok(Ok(session)) => ok_response(session),
        Ok(Err(kind)) => error_response(kind),
        Err(_) => error_response(ErrorKind::Internal),
    }
}

async fn moderate(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ModerateRequest>,
) -> Response {
    match state
        .world
        .send(Moderate {
            session_id: SessionId::new(id),
            requester_player_id: request.requester_player_id,
            target_player_id: request.target_player_id,
            action: request.action,
        })
        .await
    {
        Ok(Ok(())) => ok_response(serde_json::json!({ "ok": true })),
        Ok(Err(kind)) => error_response(kind),
        Err(_) => error_response(ErrorKind::Internal),
    }
}

async fn demo_controls(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<DemoControlsRequest>,
) -> Response {
    match state
        .world
        .send(ApplyDemoControl {
            session_id: SessionId::new(id),
            player_id: request.player_id,
            action: request.action,
        })
        .await
    {
        Ok(Ok(session)) => ok_response(serde_json::json!({ "controls": request.action, "session": session })),
        Ok(Err(kind)) => error_response(kind),
        Err(_) => error_response(ErrorKind::Internal),
    }
}

async fn queue_next(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<PlayerIdBody>,
) -> Response {
    match state
        .world
        .send(QueueNextGame {
            session_id: SessionId::new(id.clone()),
            player_id: body.player_id,
        })
        .await
    {
        Ok(Ok(queued)) => {
            let session = state.world.send(GetSession { session_id: SessionId::new(id) }).await.ok().and_then(Result::ok);
            ok_response(serde_json::json!({ "queuedForNextGame": queued, "session": session }))
        }
        Ok(Err(kind)) => error_response(kind),
        Err(_) => error_response(ErrorKind::Internal),
    }
}

async fn refresh_auth(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<PlayerIdBody>,
) -> Response {
    match state
        .world
        .send(RefreshAuth {
            session_id: SessionId::new(id),
            player_id: body.player_id,
        })
        .await
    {
        Ok(Ok(auth)) => ok_response(auth),
        Ok(Err(kind)) => error_response(kind),
        Err(_) => error_response(ErrorKind::Internal),
    }
}

#[derive(serde::Deserialize)]
struct ActorQuery {
    actor_uid: String,
}

async fn admin_upsert_role(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    Query(actor): Query<ActorQuery>,
    Json(request): Json<AdminRoleRequest>,
) -> Response {
    let Some(requested_role) = request.role.as_deref().and_then(AdminRole::normalize) else {
        return error_response(ErrorKind::MissingAdminRole);
    };
    match state
        .world
        .send(AdminUpsertRole {
            actor_uid: PlayerId::new(actor.actor_uid),
            target_uid: PlayerId::new(uid),
            requested_role,
        })
        .await
    {
        Ok(Ok(role)) => ok_response(serde_json::json!({ "role": role })),
        Ok(Err(kind)) => error_response(kind),
        Err(_) => error_response(ErrorKind::Internal),
    }
}

async fn admin_get_role(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    Query(actor): Query<ActorQuery>,
) -> Response {
    match state
        .world
        .send(AdminGetRole {
            actor_uid: PlayerId::new(actor.actor_uid),
            target_uid: PlayerId::new(uid),
        })
        .await
    {
        Ok(Ok(view)) => ok_response(serde_json::json!({ "role": view.role, "source": view.source })),
        Ok(Err(kind)) => error_response(kind),
        Err(_) => error_response(ErrorKind::Internal),
    }
}

async fn admin_expire_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(actor): Query<ActorQuery>,
) -> Response {
    match state
        .world
        .send(AdminExpireSession {
            actor_uid: PlayerId::new(actor.actor_uid),
            session_id: SessionId::new(id.clone()),
        })
        .await
    {
        Ok(Ok(room_inventory_changed)) => {
            ok_response(serde_json::json!({ "sessionId": id, "roomInventoryChanged": room_inventory_changed }))
        }
        Ok(Err(kind)) => error_response(kind),
        Err(_) => error_response(ErrorKind::Internal),
    }
}

async fn admin_remove_participant(
    State(state): State<AppState>,
    Path((id, pid)): Path<(String, String)>,
    Query(actor): Query<ActorQuery>,
) -> Response {
    match state
        .world
        .send(AdminRemoveParticipant {
            actor_uid: PlayerId::new(actor.actor_uid),
            session_id: SessionId::new(id),
            target_player_id: PlayerId::new(pid),
        })
        .await
    {
        Ok(Ok(())) => ok_response(serde_json::json!({ "ok": true })),
        Ok(Err(kind)) => error_response(kind),
        Err(_) => error_response(ErrorKind::Internal),
    }
}

async fn admin_clear_conduct_player(
    State(state): State<AppState>,
    Path((id, pid)): Path<(String, String)>,
    Query(actor): Query<ActorQuery>,
) -> Response {
    match state
        .world
        .send(AdminClearConductPlayer {
            actor_uid: PlayerId::new(actor.actor_uid),
            session_id: SessionId::new(id),
            target_player_id: PlayerId::new(pid),
        })
        .await
    {
        Ok(Ok(())) => ok_response(serde_json::json!({ "ok": true })),
        Ok(Err(kind)) => error_response(kind),
        Err(_) => error_response(ErrorKind::Internal),
    }
}

async fn admin_clear_conduct_state(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(actor): Query<ActorQuery>,
) -> Response {
    match state
        .world
        .send(AdminClearConductState {
            actor_uid: PlayerId::new(actor.actor_uid),
            session_id: SessionId::new(id),
        })
        .await
    {
        Ok(Ok(())) => ok_response(serde_json::json!({ "ok": true })),
        Ok(Err(kind)) => error_response(kind),
        Err(_) => error_response(ErrorKind::Internal),
    }
}

async fn admin_list_logs(
    State(state): State<AppState>,
    Query(actor): Query<ActorQuery>,
    Query(query): Query<AdminLogsQuery>,
) -> Response {
    match state
        .world
        .send(AdminListLogs {
            actor_uid: PlayerId::new(actor.actor_uid),
            limit: query.limit,
            player_id: query.player_id,
            session_id: query.session_id,
        })
        .await
    {
        Ok(Ok(entries)) => ok_response(serde_json::json!({ "entries": entries })),
        Ok(Err(kind)) => error_response(kind),
        Err(_) => error_response(ErrorKind::Internal),
    }
}

#[derive(serde::Deserialize)]
struct AdminSessionsQuery {
    limit: Option<u32>,
}

async fn admin_list_sessions(
    State(state): State<AppState>,
    Query(actor): Query<ActorQuery>,
    Query(query): Query<AdminSessionsQuery>,
) -> Response {
    match state
        .world
        .send(AdminListSessions {
            actor_uid: PlayerId::new(actor.actor_uid),
            limit: query.limit,
        })
        .await
    {
        Ok(Ok(sessions)) => ok_response(sessions),
        Ok(Err(kind)) => error_response(kind),
        Err(_) => error_response(ErrorKind::Internal),
    }
}

/// Manual upgrade handshake (§4.1): validated directly against `wire.rs`
/// rather than an `axum::extract::ws` extractor, since the raw-frame codec
/// is the core's own, not the framework's.
async fn websocket_upgrade(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(query): Query<WebSocketQuery>,
    headers: HeaderMap,
    mut request: axum::http::Request<axum::body::Body>,
) -> Response {
    if state.authenticate_limiter.lock().unwrap().should_limit_rate(addr.ip()) {
        return error_response(ErrorKind::Unauthorized);
    }

    let header_str = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let handshake = HandshakeHeaders {
        upgrade: header_str("upgrade"),
        connection: header_str("connection"),
        version: header_str("sec-websocket-version"),
        key: header_str("sec-websocket-key"),
    };
    let accept = match wire::validate_handshake(&handshake) {
        Ok(accept) => accept,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };

    let world = state.world.clone();
    let registry = Arc::clone(&state.registry);
    let max_message_bytes = state.max_message_bytes;

    tokio::spawn(async move {
        match hyper::upgrade::on(request).await {
            Ok(upgraded) => {
                crate::socket::run_connection(upgraded, query, world, registry, max_message_bytes).await;
            }
            Err(e) => warn!("websocket upgrade failed: {e}"),
        }
    });

    Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(axum::http::header::CONNECTION, "upgrade")
        .header(axum::http::header::UPGRADE, "websocket")
        .header("sec-websocket-accept", accept)
        .body(axum::body::boxed(axum::body::Empty::new()))
        .unwrap()
}
