//! Connection admission and termination

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::app::AppState;
use crate::session::{flush_session, release_binding};
use crate::ws::broadcast::{Channel, Outbound};
use crate::ws::identity::{ConnectionId, Identity};
use crate::ws::protocol::ServerMsg;

/// Every open transport connection
#[derive(Default)]
pub struct ConnectionSet {
    live: DashMap<ConnectionId, Identity>,
}

impl ConnectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    fn insert(&self, identity: Identity) {
        self.live.insert(identity.id.clone(), identity);
    }

    fn remove(&self, id: &ConnectionId) -> Option<Identity> {
        self.live.remove(id).map(|(_, identity)| identity)
    }
}

/// Register a freshly upgraded connection.
///
/// Creates its rate-limit record, attaches its outbound queue, subscribes it
/// to every channel and republishes the connection count.
pub fn admit(state: &AppState, identity: Identity, outbound: mpsc::Sender<Outbound>) -> ConnectionId {
    let id = identity.id.clone();
    debug!(connection_id = %id, user_agent = %identity.user_agent, "Admitting connection");

    state.connections.insert(identity);
    state.rate_limiter.register(&id);
    state.hub.register(&id, outbound);
    for channel in Channel::ALL {
        state.hub.subscribe(&id, channel);
    }

    publish_connection_count(state);
    info!(connection_id = %id, connections = state.connections.len(), "New connection");
    id
}

/// Tear down a connection; safe to call more than once
pub async fn terminate(state: &AppState, id: &ConnectionId) {
    if state.connections.remove(id).is_none() {
        return;
    }

    state.hub.unregister(id);
    state.rate_limiter.remove(id);

    match state.sessions.remove(id) {
        Some(session) => flush_session(state.store.as_ref(), &session).await,
        None => release_binding(state.store.as_ref(), id).await,
    }

    publish_connection_count(state);
    state
        .hub
        .publish(Channel::DisconnectPlayer, &ServerMsg::DisconnectPlayer(id.clone()));

    info!(connection_id = %id, connections = state.connections.len(), "Disconnected");
}

fn publish_connection_count(state: &AppState) {
    state.hub.publish(
        Channel::ConnectionCount,
        &ServerMsg::ConnectionCount(state.connections.len()),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::state::test_state::test_app;
    use crate::config::Config;
    use crate::session::registry::session_at;
    use crate::store::memory::AccountRecord;
    use crate::store::PlayerStore;
    use crate::store::StoredLocation;

    fn open(state: &AppState) -> (ConnectionId, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(32);
        let id = admit(state, Identity::new("test-agent"), tx);
        (id, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<Outbound>) -> Vec<serde_json::Value> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            if let Outbound::Text(text) = frame {
                frames.push(serde_json::from_str(&text).unwrap());
            }
        }
        frames
    }

    #[tokio::test]
    async fn admission_registers_everywhere_and_publishes_count() {
        let app = test_app(Config::default());
        let (a, mut rx_a) = open(&app.state);
        let (b, _rx_b) = open(&app.state);

        assert_ne!(a, b);
        assert_eq!(app.state.connections.len(), 2);
        assert_eq!(app.state.rate_limiter.len(), 2);
        for channel in Channel::ALL {
            assert!(app.state.hub.is_subscribed(&a, channel));
        }

        let frames = drain(&mut rx_a);
        assert_eq!(
            frames,
            vec![
                serde_json::json!({"type": "CONNECTION_COUNT", "data": 1}),
                serde_json::json!({"type": "CONNECTION_COUNT", "data": 2}),
            ]
        );
    }

    #[tokio::test]
    async fn termination_flushes_session_and_notifies_others() {
        let app = test_app(Config::default());
        let (a, _rx_a) = open(&app.state);
        let (_b, mut rx_b) = open(&app.state);

        app.store.seed(AccountRecord::new(format!("user-{}", a), "tok"));
        app.store.bind_session("tok", &a).await.unwrap();
        app.state.sessions.insert(session_at(a.as_str(), "main", 12.0, 34.0));
        drain(&mut rx_b);

        terminate(&app.state, &a).await;

        assert_eq!(app.state.connections.len(), 1);
        assert_eq!(app.state.rate_limiter.len(), 1);
        assert!(app.state.sessions.get(&a).is_none());
        assert!(!app.state.hub.is_subscribed(&a, Channel::Chat));

        let account = app.store.account(&format!("user-{}", a)).unwrap();
        assert!(account.bound_to.is_none());
        assert_eq!(
            account.location,
            Some(StoredLocation {
                map: "main".into(),
                x: Some(12.0),
                y: Some(34.0)
            })
        );

        let frames = drain(&mut rx_b);
        assert_eq!(frames[0], serde_json::json!({"type": "CONNECTION_COUNT", "data": 1}));
        assert_eq!(
            frames[1],
            serde_json::json!({"type": "DISCONNECT_PLAYER", "data": a.as_str()})
        );
    }

    #[tokio::test]
    async fn terminate_twice_is_harmless() {
        let app = test_app(Config::default());
        let (a, _rx) = open(&app.state);
        let (_b, mut rx_b) = open(&app.state);
        drain(&mut rx_b);

        terminate(&app.state, &a).await;
        terminate(&app.state, &a).await;

        assert_eq!(drain(&mut rx_b).len(), 2);
        assert_eq!(app.state.rate_limiter.len(), app.state.connections.len());
    }
}
