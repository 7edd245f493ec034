//! Player persistence
//!
//! The session layer only needs a handful of reads and writes; how they are
//! stored is up to the backend. [`MemoryStore`] keeps everything in process,
//! [`SupabaseStore`] talks to PostgREST.

pub mod accounts;
pub mod memory;
pub mod supabase;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::world::Location;
use crate::ws::identity::ConnectionId;

pub use accounts::SupabaseStore;
pub use memory::MemoryStore;
pub use supabase::{SupabaseClient, SupabaseError};

/// Language used when an account has no stored client config
pub const DEFAULT_LANGUAGE: &str = "en";

/// Result of binding an account session token to a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome {
    /// Token accepted; the account is now bound to this connection
    Bound { username: String },
    /// The account is already bound to another open connection
    AlreadyBound,
    /// No account owns this token
    UnknownToken,
}

/// Stored location; either axis may be missing on legacy rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredLocation {
    pub map: String,
    pub x: Option<f64>,
    pub y: Option<f64>,
}

impl From<&Location> for StoredLocation {
    fn from(location: &Location) -> Self {
        Self {
            map: location.map.clone(),
            x: Some(location.position.x),
            y: Some(location.position.y),
        }
    }
}

/// Client-side settings; only `language` is interpreted by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            language: default_language(),
            extra: serde_json::Map::new(),
        }
    }
}

fn default_language() -> String {
    DEFAULT_LANGUAGE.to_string()
}

/// Read/write contract the session layer needs from persistence
#[async_trait]
pub trait PlayerStore: Send + Sync {
    /// Bind the account owning `token` to `connection`
    async fn bind_session(
        &self,
        token: &str,
        connection: &ConnectionId,
    ) -> Result<BindOutcome, StoreError>;

    /// Release whatever account is bound to `connection`
    async fn clear_session(&self, connection: &ConnectionId) -> Result<(), StoreError>;

    /// Release every binding (startup recovery)
    async fn clear_all_sessions(&self) -> Result<(), StoreError>;

    /// Inventory entries, opaque to the session layer
    async fn inventory(&self, username: &str) -> Result<Vec<serde_json::Value>, StoreError>;

    /// Stats blob, opaque to the session layer
    async fn stats(&self, username: &str) -> Result<Option<serde_json::Value>, StoreError>;

    async fn client_config(&self, username: &str) -> Result<Option<ClientConfig>, StoreError>;

    async fn set_client_config(
        &self,
        username: &str,
        config: &ClientConfig,
    ) -> Result<(), StoreError>;

    async fn location(&self, username: &str) -> Result<Option<StoredLocation>, StoreError>;

    async fn set_location(&self, username: &str, location: &Location) -> Result<(), StoreError>;

    async fn is_admin(&self, username: &str) -> Result<bool, StoreError>;
}

/// Persistence errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Supabase(#[from] SupabaseError),

    #[error("Account not found: {0}")]
    UnknownAccount(String),
}
