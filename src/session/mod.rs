//! Player session state and persistence flushing

pub mod registry;

pub use registry::{SessionState, SessionStore};

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error};

use crate::store::PlayerStore;
use crate::ws::identity::ConnectionId;

/// Persist a session's last location and release its account binding
pub async fn flush_session(store: &dyn PlayerStore, session: &SessionState) {
    if let Err(e) = store.set_location(&session.username, &session.location).await {
        error!(
            connection_id = %session.connection_id,
            username = %session.username,
            error = %e,
            "Failed to persist location"
        );
    }
    release_binding(store, &session.connection_id).await;
}

/// Release the account binding for a connection, logging failures
pub async fn release_binding(store: &dyn PlayerStore, connection_id: &ConnectionId) {
    if let Err(e) = store.clear_session(connection_id).await {
        error!(connection_id = %connection_id, error = %e, "Failed to clear session binding");
    }
}

/// Persist every live session's location
pub async fn save_all(sessions: &SessionStore, store: &dyn PlayerStore) {
    for session in sessions.snapshot() {
        if let Err(e) = store.set_location(&session.username, &session.location).await {
            error!(username = %session.username, error = %e, "Periodic save failed");
        }
    }
}

/// Run the periodic location save loop
pub async fn run_autosave(sessions: Arc<SessionStore>, store: Arc<dyn PlayerStore>, every: Duration) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // First tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;
        debug!(sessions = sessions.len(), "Saving player locations");
        save_all(&sessions, store.as_ref()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::registry::session_at;
    use super::*;
    use crate::store::memory::{AccountRecord, MemoryStore};
    use crate::store::StoredLocation;

    #[tokio::test]
    async fn flush_persists_location_and_releases_binding() {
        let store = MemoryStore::new();
        store.seed(AccountRecord::new("user-c1", "tok"));
        let session = session_at("c1", "main", 7.0, 9.0);
        store
            .bind_session("tok", &session.connection_id)
            .await
            .unwrap();

        flush_session(&store, &session).await;

        let account = store.account("user-c1").unwrap();
        assert!(account.bound_to.is_none());
        assert_eq!(
            account.location,
            Some(StoredLocation {
                map: "main".into(),
                x: Some(7.0),
                y: Some(9.0)
            })
        );
    }

    #[tokio::test]
    async fn save_all_skips_unknown_accounts() {
        let store = MemoryStore::new();
        store.seed(AccountRecord::new("user-a", "t"));
        let sessions = SessionStore::new();
        sessions.insert(session_at("a", "main", 1.0, 2.0));
        sessions.insert(session_at("ghost", "main", 3.0, 4.0));

        save_all(&sessions, &store).await;
        assert!(store.account("user-a").unwrap().location.is_some());
    }
}
