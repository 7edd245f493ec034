//! Named publish/subscribe channels for fan-out across connections

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, warn};

use crate::ws::identity::ConnectionId;
use crate::ws::protocol::{CloseReason, ServerMsg};

/// Fixed set of broadcast channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    ConnectionCount,
    Broadcast,
    LoadPlayers,
    SpawnPlayer,
    MoveXy,
    DisconnectPlayer,
    Chat,
    Stealth,
    UpdateStats,
    Revive,
}

impl Channel {
    /// Every channel; each admitted connection subscribes to all of them
    pub const ALL: [Channel; 10] = [
        Channel::ConnectionCount,
        Channel::Broadcast,
        Channel::LoadPlayers,
        Channel::SpawnPlayer,
        Channel::MoveXy,
        Channel::DisconnectPlayer,
        Channel::Chat,
        Channel::Stealth,
        Channel::UpdateStats,
        Channel::Revive,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionCount => "CONNECTION_COUNT",
            Self::Broadcast => "BROADCAST",
            Self::LoadPlayers => "LOAD_PLAYERS",
            Self::SpawnPlayer => "SPAWN_PLAYER",
            Self::MoveXy => "MOVEXY",
            Self::DisconnectPlayer => "DISCONNECT_PLAYER",
            Self::Chat => "CHAT",
            Self::Stealth => "STEALTH",
            Self::UpdateStats => "UPDATESTATS",
            Self::Revive => "REVIVE",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Frame queued for a connection's writer task
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Text(Arc<str>),
    Close(CloseReason),
}

#[derive(Default)]
struct HubTable {
    senders: HashMap<ConnectionId, mpsc::Sender<Outbound>>,
    channels: HashMap<Channel, HashSet<ConnectionId>>,
}

/// Subscription table plus each connection's outbound queue
#[derive(Default)]
pub struct BroadcastHub {
    table: RwLock<HubTable>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a connection's outbound queue
    pub fn register(&self, id: &ConnectionId, sender: mpsc::Sender<Outbound>) {
        self.table.write().senders.insert(id.clone(), sender);
    }

    /// Detach a connection and drop every subscription it holds
    pub fn unregister(&self, id: &ConnectionId) {
        let mut table = self.table.write();
        table.senders.remove(id);
        for subscribers in table.channels.values_mut() {
            subscribers.remove(id);
        }
    }

    /// Returns `false` if already subscribed
    pub fn subscribe(&self, id: &ConnectionId, channel: Channel) -> bool {
        self.table
            .write()
            .channels
            .entry(channel)
            .or_default()
            .insert(id.clone())
    }

    /// Returns `false` if not subscribed
    pub fn unsubscribe(&self, id: &ConnectionId, channel: Channel) -> bool {
        self.table
            .write()
            .channels
            .get_mut(&channel)
            .map(|subscribers| subscribers.remove(id))
            .unwrap_or(false)
    }

    pub fn is_subscribed(&self, id: &ConnectionId, channel: Channel) -> bool {
        self.table
            .read()
            .channels
            .get(&channel)
            .is_some_and(|subscribers| subscribers.contains(id))
    }

    pub fn subscriber_count(&self, channel: Channel) -> usize {
        self.table
            .read()
            .channels
            .get(&channel)
            .map_or(0, HashSet::len)
    }

    /// Fan a message out to every subscriber of `channel`; returns how many
    /// queues accepted it
    pub fn publish(&self, channel: Channel, msg: &ServerMsg) -> usize {
        let text: Arc<str> = match msg.to_text() {
            Ok(text) => text.into(),
            Err(e) => {
                error!(channel = %channel, error = %e, "Failed to serialize broadcast");
                return 0;
            }
        };

        let table = self.table.read();
        let Some(subscribers) = table.channels.get(&channel) else {
            return 0;
        };

        subscribers
            .iter()
            .filter_map(|id| table.senders.get(id).map(|sender| (id, sender)))
            .filter(|(id, sender)| deliver(id, sender, Outbound::Text(text.clone())))
            .count()
    }

    /// Queue a message for one connection
    pub fn send_to(&self, id: &ConnectionId, msg: &ServerMsg) -> bool {
        match msg.to_text() {
            Ok(text) => self.send_raw(id, Outbound::Text(text.into())),
            Err(e) => {
                error!(connection_id = %id, error = %e, "Failed to serialize message");
                false
            }
        }
    }

    /// Queue a close frame for one connection
    pub fn close(&self, id: &ConnectionId, reason: CloseReason) -> bool {
        self.send_raw(id, Outbound::Close(reason))
    }

    fn send_raw(&self, id: &ConnectionId, frame: Outbound) -> bool {
        let table = self.table.read();
        table
            .senders
            .get(id)
            .is_some_and(|sender| deliver(id, sender, frame))
    }
}

fn deliver(id: &ConnectionId, sender: &mpsc::Sender<Outbound>, frame: Outbound) -> bool {
    match sender.try_send(frame) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!(connection_id = %id, "Outbound queue full, dropping message");
            false
        }
        Err(TrySendError::Closed(_)) => {
            debug!(connection_id = %id, "Outbound queue closed");
            false
        }
    }
}
