//! WebSocket protocol message definitions
//! These are the wire types for client-server communication
//!
//! Every frame in both directions is `{"type": <PACKET TYPE>, "data": <payload>}`.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::SessionState;
use crate::store::ClientConfig;
use crate::world::{Direction, Position};
use crate::ws::identity::ConnectionId;

/// Every packet type the protocol knows about, in either direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    Ping,
    Pong,
    Login,
    LoginSuccess,
    LoginFailed,
    TimeSync,
    Auth,
    Logout,
    Disconnect,
    MoveXy,
    TeleportXy,
    Chat,
    Translate,
    ClientConfig,
    SelectPlayer,
    LoadMap,
    LoadPlayers,
    SpawnPlayer,
    DisconnectPlayer,
    ConnectionCount,
    RateLimited,
    Inventory,
    Stats,
    Benchmark,
}

const PACKET_NAMES: &[(PacketType, &str)] = &[
    (PacketType::Ping, "PING"),
    (PacketType::Pong, "PONG"),
    (PacketType::Login, "LOGIN"),
    (PacketType::LoginSuccess, "LOGIN_SUCCESS"),
    (PacketType::LoginFailed, "LOGIN_FAILED"),
    (PacketType::TimeSync, "TIME_SYNC"),
    (PacketType::Auth, "AUTH"),
    (PacketType::Logout, "LOGOUT"),
    (PacketType::Disconnect, "DISCONNECT"),
    (PacketType::MoveXy, "MOVEXY"),
    (PacketType::TeleportXy, "TELEPORTXY"),
    (PacketType::Chat, "CHAT"),
    (PacketType::Translate, "TRANSLATE"),
    (PacketType::ClientConfig, "CLIENTCONFIG"),
    (PacketType::SelectPlayer, "SELECTPLAYER"),
    (PacketType::LoadMap, "LOAD_MAP"),
    (PacketType::LoadPlayers, "LOAD_PLAYERS"),
    (PacketType::SpawnPlayer, "SPAWN_PLAYER"),
    (PacketType::DisconnectPlayer, "DISCONNECT_PLAYER"),
    (PacketType::ConnectionCount, "CONNECTION_COUNT"),
    (PacketType::RateLimited, "RATE_LIMITED"),
    (PacketType::Inventory, "INVENTORY"),
    (PacketType::Stats, "STATS"),
    (PacketType::Benchmark, "BENCHMARK"),
];

impl PacketType {
    pub fn as_str(self) -> &'static str {
        PACKET_NAMES
            .iter()
            .find(|(kind, _)| *kind == self)
            .map(|(_, name)| *name)
            .unwrap_or("UNKNOWN")
    }
}

impl FromStr for PacketType {
    type Err = ProtocolViolation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PACKET_NAMES
            .iter()
            .find(|(_, name)| *name == s)
            .map(|(kind, _)| *kind)
            .ok_or_else(|| ProtocolViolation::InvalidType(s.to_string()))
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Close reasons
// ============================================================================

/// Why the server closed a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    EmptyMessage,
    TooLarge,
    Malformed,
    InvalidType,
    DuplicateSession,
    HighLatency,
    Idle,
}

impl CloseReason {
    /// WebSocket close code sent with the close frame
    pub fn code(self) -> u16 {
        match self {
            Self::EmptyMessage => 1008,
            Self::TooLarge => 1009,
            Self::Malformed | Self::InvalidType => 1007,
            Self::DuplicateSession => 4001,
            Self::HighLatency => 1001,
            Self::Idle => 1000,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Self::EmptyMessage => "Empty message",
            Self::TooLarge => "Message too large",
            Self::Malformed => "Malformed message",
            Self::InvalidType => "Invalid packet type",
            Self::DuplicateSession => "Already logged in",
            Self::HighLatency => "High latency",
            Self::Idle => "Idle timeout",
        }
    }
}

/// Envelope-level violation; always closes the connection
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolViolation {
    #[error("empty message")]
    Empty,

    #[error("message of {len} bytes exceeds {max}")]
    TooLarge { len: usize, max: usize },

    #[error("malformed message: {0}")]
    Malformed(&'static str),

    #[error("invalid packet type: {0}")]
    InvalidType(String),
}

impl ProtocolViolation {
    pub fn close_reason(&self) -> CloseReason {
        match self {
            Self::Empty => CloseReason::EmptyMessage,
            Self::TooLarge { .. } => CloseReason::TooLarge,
            Self::Malformed(_) => CloseReason::Malformed,
            Self::InvalidType(_) => CloseReason::InvalidType,
        }
    }
}

/// Payload did not fit the shape its packet type requires; the packet is dropped
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("{kind} payload: {source}")]
    Shape {
        kind: PacketType,
        #[source]
        source: serde_json::Error,
    },

    #[error("{kind} payload: expected {expected}")]
    Expected {
        kind: PacketType,
        expected: &'static str,
    },
}

// ============================================================================
// Inbound
// ============================================================================

/// A frame that passed the validation gate
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub kind: PacketType,
    pub data: Value,
}

/// Validation gate, applied in order: empty, size cap, JSON object, `type`
/// present, `data` present (explicit null allowed), known `type`.
pub fn decode_envelope(raw: &str, max_bytes: usize) -> Result<Envelope, ProtocolViolation> {
    if raw.is_empty() {
        return Err(ProtocolViolation::Empty);
    }
    if raw.len() > max_bytes {
        return Err(ProtocolViolation::TooLarge {
            len: raw.len(),
            max: max_bytes,
        });
    }

    let value: Value =
        serde_json::from_str(raw).map_err(|_| ProtocolViolation::Malformed("not JSON"))?;
    let Value::Object(mut object) = value else {
        return Err(ProtocolViolation::Malformed("not an object"));
    };

    let kind = match object.get("type") {
        Some(Value::String(kind)) if !kind.is_empty() => kind.clone(),
        _ => return Err(ProtocolViolation::Malformed("missing type")),
    };
    let data = object
        .remove("data")
        .ok_or(ProtocolViolation::Malformed("missing data"))?;

    Ok(Envelope {
        kind: kind.parse()?,
        data,
    })
}

/// Packets accepted in any connection phase
#[derive(Debug, Clone, PartialEq)]
pub enum InfoPacket {
    Ping(Value),
    Pong(Value),
    Login,
    /// Client timestamp echoed back from a previous TIME_SYNC
    TimeSync(i64),
    Benchmark(Value),
}

/// Packets that require an authenticated session
#[derive(Debug, Clone, PartialEq)]
pub enum GameplayPacket {
    Logout,
    Disconnect,
    MoveXy(Direction),
    TeleportXy(Position),
    Chat(String),
    Translate { id: Value, text: String },
    ClientConfig(ClientConfig),
    SelectPlayer(Position),
}

/// Typed client packet
#[derive(Debug, Clone, PartialEq)]
pub enum ClientPacket {
    Info(InfoPacket),
    Auth { token: String },
    Gameplay(GameplayPacket),
    /// Known type with no client-side meaning (server-to-client types)
    Ignored(PacketType),
}

#[derive(Deserialize)]
struct TranslatePayload {
    id: Value,
    text: String,
}

impl ClientPacket {
    pub fn from_envelope(envelope: Envelope) -> Result<Self, PayloadError> {
        let Envelope { kind, data } = envelope;
        let packet = match kind {
            PacketType::Ping => Self::Info(InfoPacket::Ping(data)),
            PacketType::Pong => Self::Info(InfoPacket::Pong(data)),
            PacketType::Login => Self::Info(InfoPacket::Login),
            PacketType::Benchmark => Self::Info(InfoPacket::Benchmark(data)),
            PacketType::TimeSync => Self::Info(InfoPacket::TimeSync(timestamp(kind, &data)?)),
            PacketType::Auth => Self::Auth {
                token: string(kind, data)?,
            },
            PacketType::Logout => Self::Gameplay(GameplayPacket::Logout),
            PacketType::Disconnect => Self::Gameplay(GameplayPacket::Disconnect),
            PacketType::MoveXy => {
                let raw = string(kind, data)?;
                let direction = Direction::parse(&raw).ok_or(PayloadError::Expected {
                    kind,
                    expected: "up, down, left or right",
                })?;
                Self::Gameplay(GameplayPacket::MoveXy(direction))
            }
            PacketType::TeleportXy => Self::Gameplay(GameplayPacket::TeleportXy(shape(kind, data)?)),
            PacketType::Chat => Self::Gameplay(GameplayPacket::Chat(string(kind, data)?)),
            PacketType::Translate => {
                let TranslatePayload { id, text } = shape(kind, data)?;
                Self::Gameplay(GameplayPacket::Translate { id, text })
            }
            PacketType::ClientConfig => {
                Self::Gameplay(GameplayPacket::ClientConfig(shape(kind, data)?))
            }
            PacketType::SelectPlayer => {
                Self::Gameplay(GameplayPacket::SelectPlayer(shape(kind, data)?))
            }
            other => Self::Ignored(other),
        };
        Ok(packet)
    }
}

fn shape<T: serde::de::DeserializeOwned>(kind: PacketType, data: Value) -> Result<T, PayloadError> {
    serde_json::from_value(data).map_err(|source| PayloadError::Shape { kind, source })
}

fn string(kind: PacketType, data: Value) -> Result<String, PayloadError> {
    match data {
        Value::String(s) => Ok(s),
        _ => Err(PayloadError::Expected {
            kind,
            expected: "a string",
        }),
    }
}

/// Millisecond timestamp sent either as a number or a numeric string
fn timestamp(kind: PacketType, data: &Value) -> Result<i64, PayloadError> {
    let parsed = match data {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f as i64),
        _ => None,
    };
    parsed.ok_or(PayloadError::Expected {
        kind,
        expected: "a millisecond timestamp",
    })
}

// ============================================================================
// Outbound
// ============================================================================

/// Location as other clients see it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerLocation {
    pub map: String,
    pub x: f64,
    pub y: f64,
}

/// Public view of a player session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerView {
    pub id: ConnectionId,
    pub location: PlayerLocation,
    pub username: String,
    #[serde(rename = "isAdmin")]
    pub is_admin: bool,
}

impl From<&SessionState> for PlayerView {
    fn from(session: &SessionState) -> Self {
        Self {
            id: session.connection_id.clone(),
            location: PlayerLocation {
                map: session.location.map.clone(),
                x: session.location.position.x,
                y: session.location.position.y,
            },
            username: session.username.clone(),
            is_admin: session.is_admin,
        }
    }
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMsg {
    Ping(Value),
    Pong(Value),
    /// Server wall-clock time in ms
    TimeSync(i64),
    LoginSuccess(ConnectionId),
    LoginFailed(Option<String>),
    Benchmark(Value),
    ConnectionCount(usize),
    RateLimited(&'static str),
    Inventory {
        items: Vec<Value>,
        slots: usize,
    },
    Stats(Option<Value>),
    #[serde(rename = "CLIENTCONFIG")]
    ClientConfig(ClientConfig),
    /// `[map document, content hash, map name, x, y]`
    LoadMap(Arc<Value>, String, String, f64, f64),
    LoadPlayers(Vec<PlayerView>),
    SpawnPlayer(PlayerView),
    #[serde(rename = "MOVEXY")]
    MoveXy {
        id: ConnectionId,
        #[serde(rename = "_data")]
        position: Position,
    },
    DisconnectPlayer(ConnectionId),
    Chat {
        id: ConnectionId,
        message: String,
    },
    Translate {
        id: Value,
        translation: String,
        message: String,
    },
    #[serde(rename = "SELECTPLAYER")]
    SelectPlayer {
        username: String,
        #[serde(rename = "isAdmin")]
        is_admin: bool,
    },
}

impl ServerMsg {
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
