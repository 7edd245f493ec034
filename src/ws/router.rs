//! Packet routing and the per-connection session state machine
//!
//! A connection starts `Unauthenticated`, becomes `Active` after a successful
//! AUTH and ends `Closed`. Gameplay handlers take an [`ActiveSession`], which
//! only exists while the connection is `Active`.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::app::AppState;
use crate::session::{flush_session, SessionState};
use crate::store::{BindOutcome, StoreError, StoredLocation};
use crate::translate::TranslateError;
use crate::util::rate_limit::Admission;
use crate::world::movement::try_move;
use crate::world::{LoadedMap, Location, MapRegistry, Position};
use crate::ws::broadcast::Channel;
use crate::ws::identity::ConnectionId;
use crate::ws::protocol::{
    decode_envelope, ClientPacket, CloseReason, GameplayPacket, InfoPacket, PlayerView, ServerMsg,
};

/// Inventory entries sent on AUTH
pub const INVENTORY_SLOTS: usize = 30;
/// SELECTPLAYER hit radius on each axis
pub const SELECT_RADIUS: f64 = 25.0;
/// Longest chat message relayed, in characters
pub const MAX_CHAT_CHARS: usize = 255;

const RATE_LIMITED_NOTICE: &str = "Rate limited";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionPhase {
    Unauthenticated,
    Active { username: String },
    Closed,
}

/// Proof that a connection is authenticated
#[derive(Debug, Clone)]
pub struct ActiveSession {
    pub id: ConnectionId,
    pub username: String,
}

/// Per-connection routing state, owned by the connection's reader task
#[derive(Debug)]
pub struct ConnectionContext {
    pub id: ConnectionId,
    phase: ConnectionPhase,
}

impl ConnectionContext {
    pub fn new(id: ConnectionId) -> Self {
        Self {
            id,
            phase: ConnectionPhase::Unauthenticated,
        }
    }

    pub fn phase(&self) -> &ConnectionPhase {
        &self.phase
    }

    fn active(&self) -> Option<ActiveSession> {
        match &self.phase {
            ConnectionPhase::Active { username } => Some(ActiveSession {
                id: self.id.clone(),
                username: username.clone(),
            }),
            _ => None,
        }
    }

    fn close(&mut self, reason: CloseReason) -> Flow {
        self.phase = ConnectionPhase::Closed;
        Flow::Close(reason)
    }
}

/// What the reader loop should do after a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close(CloseReason),
}

/// Handler failure; logged and swallowed
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Translate(#[from] TranslateError),

    #[error("No session for connection {0}")]
    NoSession(ConnectionId),

    #[error("Map not loaded: {0}")]
    MissingMap(String),
}

/// Entry point for every inbound text frame: rate limit, then route
pub async fn handle_message(state: &AppState, ctx: &mut ConnectionContext, raw: &str) -> Flow {
    if ctx.phase == ConnectionPhase::Closed {
        return Flow::Continue;
    }

    match state.rate_limiter.check(&ctx.id) {
        Admission::Allowed => {}
        Admission::Tripped => {
            warn!(connection_id = %ctx.id, "Rate limit exceeded");
            state
                .hub
                .send_to(&ctx.id, &ServerMsg::RateLimited(RATE_LIMITED_NOTICE));
            return Flow::Continue;
        }
        Admission::Suppressed | Admission::Unknown => return Flow::Continue,
    }

    route(state, ctx, raw).await
}

/// Validate a frame and dispatch it to its handler
pub async fn route(state: &AppState, ctx: &mut ConnectionContext, raw: &str) -> Flow {
    let envelope = match decode_envelope(raw, state.config.max_message_bytes) {
        Ok(envelope) => envelope,
        Err(violation) => {
            warn!(connection_id = %ctx.id, error = %violation, "Protocol violation");
            return ctx.close(violation.close_reason());
        }
    };

    let kind = envelope.kind;
    let packet = match ClientPacket::from_envelope(envelope) {
        Ok(packet) => packet,
        Err(e) => {
            debug!(connection_id = %ctx.id, error = %e, "Dropping packet");
            return Flow::Continue;
        }
    };

    match dispatch(state, ctx, packet).await {
        Ok(flow) => flow,
        Err(e) => {
            error!(connection_id = %ctx.id, packet = %kind, error = %e, "Failed to handle packet");
            Flow::Continue
        }
    }
}

async fn dispatch(
    state: &AppState,
    ctx: &mut ConnectionContext,
    packet: ClientPacket,
) -> Result<Flow, RouteError> {
    match packet {
        ClientPacket::Info(info) => Ok(handle_info(state, ctx, info)),
        ClientPacket::Auth { token } => {
            if ctx.phase != ConnectionPhase::Unauthenticated {
                debug!(connection_id = %ctx.id, "AUTH on authenticated connection ignored");
                return Ok(Flow::Continue);
            }
            handle_auth(state, ctx, &token).await
        }
        ClientPacket::Gameplay(packet) => match ctx.active() {
            Some(active) => handle_gameplay(state, ctx, &active, packet).await,
            None => {
                debug!(connection_id = %ctx.id, "Gameplay packet before AUTH dropped");
                Ok(Flow::Continue)
            }
        },
        ClientPacket::Ignored(_) => Ok(Flow::Continue),
    }
}

fn send(state: &AppState, id: &ConnectionId, msg: &ServerMsg) {
    state.hub.send_to(id, msg);
}

// ============================================================================
// Informational packets
// ============================================================================

fn handle_info(state: &AppState, ctx: &mut ConnectionContext, packet: InfoPacket) -> Flow {
    match packet {
        InfoPacket::Ping(data) => {
            send(state, &ctx.id, &ServerMsg::Pong(data));
            send(state, &ctx.id, &ServerMsg::TimeSync(state.clock.now_millis()));
        }
        InfoPacket::Pong(data) => send(state, &ctx.id, &ServerMsg::Ping(data)),
        InfoPacket::Login => send(state, &ctx.id, &ServerMsg::LoginSuccess(ctx.id.clone())),
        InfoPacket::Benchmark(data) => send(state, &ctx.id, &ServerMsg::Benchmark(data)),
        InfoPacket::TimeSync(client_time) => {
            let now = state.clock.now_millis();
            let latency = now
                .saturating_sub(client_time)
                .saturating_sub(state.config.heartbeat_interval_ms);
            if latency >= state.config.latency_limit_ms {
                error!(connection_id = %ctx.id, latency_ms = latency, "High latency, disconnecting");
                return ctx.close(CloseReason::HighLatency);
            }
            send(state, &ctx.id, &ServerMsg::TimeSync(now));
        }
    }
    Flow::Continue
}

// ============================================================================
// Authentication
// ============================================================================

async fn handle_auth(
    state: &AppState,
    ctx: &mut ConnectionContext,
    token: &str,
) -> Result<Flow, RouteError> {
    let store = state.store.as_ref();

    let username = match store.bind_session(token, &ctx.id).await? {
        BindOutcome::Bound { username } => username,
        BindOutcome::AlreadyBound => {
            warn!(connection_id = %ctx.id, "Account already bound to another connection");
            send(state, &ctx.id, &ServerMsg::LoginFailed(None));
            return Ok(ctx.close(CloseReason::DuplicateSession));
        }
        BindOutcome::UnknownToken => {
            debug!(connection_id = %ctx.id, "Unknown session token");
            send(state, &ctx.id, &ServerMsg::LoginFailed(None));
            return Ok(Flow::Continue);
        }
    };

    let mut items = store.inventory(&username).await?;
    items.truncate(INVENTORY_SLOTS);
    send(
        state,
        &ctx.id,
        &ServerMsg::Inventory {
            items,
            slots: INVENTORY_SLOTS,
        },
    );

    let stats = store.stats(&username).await?;
    send(state, &ctx.id, &ServerMsg::Stats(stats));

    let client_config = store.client_config(&username).await?.unwrap_or_default();
    send(state, &ctx.id, &ServerMsg::ClientConfig(client_config.clone()));

    let stored = store.location(&username).await?;
    let is_admin = store.is_admin(&username).await?;

    let (map, position) = resolve_spawn(&state.maps, &state.config.start_map, stored)?;
    let location = Location {
        map: map.name().to_string(),
        position,
    };
    store.set_location(&username, &location).await?;

    let session = SessionState {
        connection_id: ctx.id.clone(),
        username: username.clone(),
        is_admin,
        language: client_config.language,
        location,
    };
    state.sessions.insert(session.clone());
    ctx.phase = ConnectionPhase::Active {
        username: username.clone(),
    };

    info!(
        connection_id = %ctx.id,
        username = %username,
        map = %map.name(),
        x = position.x,
        y = position.y,
        "Player spawned"
    );

    send(
        state,
        &ctx.id,
        &ServerMsg::LoadMap(
            Arc::clone(&map.asset.raw_data),
            map.asset.content_hash.clone(),
            map.name().to_string(),
            position.x,
            position.y,
        ),
    );
    state
        .hub
        .publish(Channel::SpawnPlayer, &ServerMsg::SpawnPlayer(PlayerView::from(&session)));

    let players = state
        .sessions
        .snapshot()
        .iter()
        .map(PlayerView::from)
        .collect();
    send(state, &ctx.id, &ServerMsg::LoadPlayers(players));

    Ok(Flow::Continue)
}

/// Pick the spawn map and position for a stored location.
///
/// Missing location or either axis missing spawns at the start map origin.
/// A stored map that is not loaded falls back to the start map.
fn resolve_spawn(
    maps: &MapRegistry,
    start_map: &str,
    stored: Option<StoredLocation>,
) -> Result<(Arc<LoadedMap>, Position), RouteError> {
    let (map_name, position) = match stored {
        Some(StoredLocation {
            map,
            x: Some(x),
            y: Some(y),
        }) => (map, Position::new(x, y)),
        _ => (start_map.to_string(), Position::default()),
    };

    let map = maps
        .get(&map_name)
        .or_else(|| {
            warn!(map = %map_name, "Stored map not loaded, using start map");
            maps.get(start_map)
        })
        .ok_or_else(|| RouteError::MissingMap(start_map.to_string()))?;

    Ok((map, position))
}

// ============================================================================
// Gameplay packets
// ============================================================================

async fn handle_gameplay(
    state: &AppState,
    ctx: &mut ConnectionContext,
    active: &ActiveSession,
    packet: GameplayPacket,
) -> Result<Flow, RouteError> {
    match packet {
        GameplayPacket::Logout => {
            if let Some(session) = state.sessions.remove(&active.id) {
                flush_session(state.store.as_ref(), &session).await;
            }
            state
                .hub
                .publish(Channel::DisconnectPlayer, &ServerMsg::DisconnectPlayer(active.id.clone()));
            ctx.phase = ConnectionPhase::Unauthenticated;
            info!(connection_id = %active.id, username = %active.username, "Logged out");
        }
        GameplayPacket::Disconnect => {
            state.store.clear_session(&active.id).await?;
        }
        GameplayPacket::MoveXy(direction) => {
            let session = session_of(state, active)?;
            let map = state
                .maps
                .get(&session.location.map)
                .ok_or_else(|| RouteError::MissingMap(session.location.map.clone()))?;

            let Some(position) = try_move(&map, session.location.position, direction) else {
                return Ok(Flow::Continue);
            };
            if state.sessions.set_position(&active.id, position) {
                publish_position(state, &active.id, position);
            }
        }
        GameplayPacket::TeleportXy(position) => {
            let session = session_of(state, active)?;
            if !session.is_admin {
                warn!(connection_id = %active.id, username = %active.username, "Non-admin teleport ignored");
                return Ok(Flow::Continue);
            }
            if state.sessions.set_position(&active.id, position) {
                publish_position(state, &active.id, position);
            }
        }
        GameplayPacket::Chat(message) => {
            if message.chars().count() > MAX_CHAT_CHARS {
                debug!(connection_id = %active.id, "Chat message too long, dropped");
                return Ok(Flow::Continue);
            }
            state.hub.publish(
                Channel::Chat,
                &ServerMsg::Chat {
                    id: active.id.clone(),
                    message,
                },
            );
        }
        GameplayPacket::Translate { id, text } => {
            let session = session_of(state, active)?;
            let translation = state.translator.translate(&text, &session.language).await?;
            send(
                state,
                &active.id,
                &ServerMsg::Translate {
                    id,
                    translation,
                    message: text,
                },
            );
        }
        GameplayPacket::ClientConfig(config) => {
            let language = config.language.clone();
            state
                .sessions
                .update(&active.id, |session| session.language = language)
                .ok_or_else(|| RouteError::NoSession(active.id.clone()))?;
            state
                .store
                .set_client_config(&active.username, &config)
                .await?;
        }
        GameplayPacket::SelectPlayer(point) => {
            let session = session_of(state, active)?;
            let point = Position::new(point.x.floor(), point.y.floor());
            if let Some(selected) =
                state
                    .sessions
                    .first_near(&session.location.map, point, SELECT_RADIUS)
            {
                send(
                    state,
                    &active.id,
                    &ServerMsg::SelectPlayer {
                        username: selected.username,
                        is_admin: selected.is_admin,
                    },
                );
            }
        }
    }
    Ok(Flow::Continue)
}

fn session_of(state: &AppState, active: &ActiveSession) -> Result<SessionState, RouteError> {
    state
        .sessions
        .get(&active.id)
        .ok_or_else(|| RouteError::NoSession(active.id.clone()))
}

fn publish_position(state: &AppState, id: &ConnectionId, position: Position) {
    state.hub.publish(
        Channel::MoveXy,
        &ServerMsg::MoveXy {
            id: id.clone(),
            position,
        },
    );
}
