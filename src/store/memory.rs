//! In-process player store
//!
//! Used when no database is configured, and as the test double for the
//! session layer.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{BindOutcome, ClientConfig, PlayerStore, StoreError, StoredLocation};
use crate::world::Location;
use crate::ws::identity::ConnectionId;

/// One account's persisted state
#[derive(Debug, Clone, Default)]
pub struct AccountRecord {
    pub username: String,
    /// Token the client presents in AUTH
    pub session_token: String,
    pub is_admin: bool,
    pub inventory: Vec<serde_json::Value>,
    pub stats: Option<serde_json::Value>,
    pub config: Option<ClientConfig>,
    pub location: Option<StoredLocation>,
    /// Connection currently bound to this account
    pub bound_to: Option<ConnectionId>,
}

impl AccountRecord {
    pub fn new(username: impl Into<String>, session_token: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            session_token: session_token.into(),
            ..Self::default()
        }
    }
}

/// Accounts keyed by username
#[derive(Debug, Default)]
pub struct MemoryStore {
    accounts: Mutex<HashMap<String, AccountRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an account
    pub fn seed(&self, account: AccountRecord) {
        self.accounts
            .lock()
            .insert(account.username.clone(), account);
    }

    /// Copy of an account's current state
    pub fn account(&self, username: &str) -> Option<AccountRecord> {
        self.accounts.lock().get(username).cloned()
    }

    fn with_account<T>(
        &self,
        username: &str,
        f: impl FnOnce(&mut AccountRecord) -> T,
    ) -> Result<T, StoreError> {
        let mut accounts = self.accounts.lock();
        let account = accounts
            .get_mut(username)
            .ok_or_else(|| StoreError::UnknownAccount(username.to_string()))?;
        Ok(f(account))
    }
}

#[async_trait]
impl PlayerStore for MemoryStore {
    async fn bind_session(
        &self,
        token: &str,
        connection: &ConnectionId,
    ) -> Result<BindOutcome, StoreError> {
        let mut accounts = self.accounts.lock();
        let Some(account) = accounts
            .values_mut()
            .find(|account| account.session_token == token)
        else {
            return Ok(BindOutcome::UnknownToken);
        };

        match &account.bound_to {
            Some(existing) if existing != connection => Ok(BindOutcome::AlreadyBound),
            _ => {
                account.bound_to = Some(connection.clone());
                Ok(BindOutcome::Bound {
                    username: account.username.clone(),
                })
            }
        }
    }

    async fn clear_session(&self, connection: &ConnectionId) -> Result<(), StoreError> {
        let mut accounts = self.accounts.lock();
        for account in accounts.values_mut() {
            if account.bound_to.as_ref() == Some(connection) {
                account.bound_to = None;
            }
        }
        Ok(())
    }

    async fn clear_all_sessions(&self) -> Result<(), StoreError> {
        for account in self.accounts.lock().values_mut() {
            account.bound_to = None;
        }
        Ok(())
    }

    async fn inventory(&self, username: &str) -> Result<Vec<serde_json::Value>, StoreError> {
        self.with_account(username, |account| account.inventory.clone())
    }

    async fn stats(&self, username: &str) -> Result<Option<serde_json::Value>, StoreError> {
        self.with_account(username, |account| account.stats.clone())
    }

    async fn client_config(&self, username: &str) -> Result<Option<ClientConfig>, StoreError> {
        self.with_account(username, |account| account.config.clone())
    }

    async fn set_client_config(
        &self,
        username: &str,
        config: &ClientConfig,
    ) -> Result<(), StoreError> {
        self.with_account(username, |account| account.config = Some(config.clone()))
    }

    async fn location(&self, username: &str) -> Result<Option<StoredLocation>, StoreError> {
        self.with_account(username, |account| account.location.clone())
    }

    async fn set_location(&self, username: &str, location: &Location) -> Result<(), StoreError> {
        self.with_account(username, |account| {
            account.location = Some(StoredLocation::from(location))
        })
    }

    async fn is_admin(&self, username: &str) -> Result<bool, StoreError> {
        self.with_account(username, |account| account.is_admin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::Position;

    fn store_with(username: &str, token: &str) -> MemoryStore {
        let store = MemoryStore::new();
        store.seed(AccountRecord::new(username, token));
        store
    }

    #[tokio::test]
    async fn binds_once_per_account() {
        let store = store_with("alice", "tok");
        let first = ConnectionId::from("c1");
        let second = ConnectionId::from("c2");

        assert_eq!(
            store.bind_session("tok", &first).await.unwrap(),
            BindOutcome::Bound {
                username: "alice".into()
            }
        );
        assert_eq!(
            store.bind_session("tok", &second).await.unwrap(),
            BindOutcome::AlreadyBound
        );
        // Re-binding the same connection is not a duplicate
        assert!(matches!(
            store.bind_session("tok", &first).await.unwrap(),
            BindOutcome::Bound { .. }
        ));
    }

    #[tokio::test]
    async fn clearing_releases_binding() {
        let store = store_with("alice", "tok");
        let first = ConnectionId::from("c1");
        store.bind_session("tok", &first).await.unwrap();
        store.clear_session(&first).await.unwrap();
        assert!(store.account("alice").unwrap().bound_to.is_none());
        assert!(matches!(
            store.bind_session("tok", &ConnectionId::from("c2")).await.unwrap(),
            BindOutcome::Bound { .. }
        ));
    }

    #[tokio::test]
    async fn unknown_token() {
        let store = store_with("alice", "tok");
        assert_eq!(
            store.bind_session("nope", &ConnectionId::from("c1")).await.unwrap(),
            BindOutcome::UnknownToken
        );
    }

    #[tokio::test]
    async fn location_round_trips_through_account() {
        let store = store_with("alice", "tok");
        let location = Location {
            map: "main".into(),
            position: Position::new(0.0, 12.0),
        };
        store.set_location("alice", &location).await.unwrap();
        assert_eq!(
            store.location("alice").await.unwrap(),
            Some(StoredLocation {
                map: "main".into(),
                x: Some(0.0),
                y: Some(12.0)
            })
        );
        assert!(store.set_location("bob", &location).await.is_err());
    }
}
