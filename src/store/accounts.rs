//! Supabase-backed player store
//!
//! Tables:
//! - `accounts(username, session_token, connection_id, is_admin, stats, config, map, x, y)`
//! - `inventory(username, item, quantity)`

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::supabase::SupabaseClient;
use super::{BindOutcome, ClientConfig, PlayerStore, StoreError, StoredLocation};
use crate::world::Location;
use crate::ws::identity::ConnectionId;

#[derive(Debug, Deserialize)]
struct UsernameRow {
    username: String,
}

#[derive(Debug, Deserialize)]
struct BindingRow {
    connection_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatsRow {
    stats: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ConfigRow {
    config: Option<ClientConfig>,
}

#[derive(Debug, Deserialize)]
struct LocationRow {
    map: Option<String>,
    x: Option<f64>,
    y: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct AdminRow {
    is_admin: bool,
}

#[derive(Serialize)]
struct BindingUpdate<'a> {
    connection_id: Option<&'a str>,
}

#[derive(Serialize)]
struct ConfigUpdate<'a> {
    config: &'a ClientConfig,
}

#[derive(Serialize)]
struct LocationUpdate<'a> {
    map: &'a str,
    x: f64,
    y: f64,
}

/// Player persistence over the Supabase REST API
#[derive(Clone)]
pub struct SupabaseStore {
    client: SupabaseClient,
}

impl SupabaseStore {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }

    async fn account_field<T: serde::de::DeserializeOwned>(
        &self,
        username: &str,
        select: &str,
    ) -> Result<T, StoreError> {
        let filters = [
            ("username", format!("eq.{}", username)),
            ("select", select.to_string()),
        ];
        self.client
            .get_one("accounts", &filters)
            .await?
            .ok_or_else(|| StoreError::UnknownAccount(username.to_string()))
    }
}

#[async_trait]
impl PlayerStore for SupabaseStore {
    async fn bind_session(
        &self,
        token: &str,
        connection: &ConnectionId,
    ) -> Result<BindOutcome, StoreError> {
        // Only claim rows that are free (or already ours) so two connections
        // racing on the same token cannot both win.
        let filters = [
            ("session_token", format!("eq.{}", token)),
            (
                "or",
                format!("(connection_id.is.null,connection_id.eq.{})", connection),
            ),
            ("select", "username".to_string()),
        ];
        let claimed: Vec<UsernameRow> = self
            .client
            .update_returning(
                "accounts",
                &filters,
                &BindingUpdate {
                    connection_id: Some(connection.as_str()),
                },
            )
            .await?;

        if let Some(row) = claimed.into_iter().next() {
            return Ok(BindOutcome::Bound {
                username: row.username,
            });
        }

        let existing: Option<BindingRow> = self
            .client
            .get_one(
                "accounts",
                &[
                    ("session_token", format!("eq.{}", token)),
                    ("select", "connection_id".to_string()),
                ],
            )
            .await?;

        Ok(match existing {
            Some(BindingRow {
                connection_id: Some(_),
            }) => BindOutcome::AlreadyBound,
            _ => BindOutcome::UnknownToken,
        })
    }

    async fn clear_session(&self, connection: &ConnectionId) -> Result<(), StoreError> {
        self.client
            .update(
                "accounts",
                &[("connection_id", format!("eq.{}", connection))],
                &BindingUpdate {
                    connection_id: None,
                },
            )
            .await?;
        Ok(())
    }

    async fn clear_all_sessions(&self) -> Result<(), StoreError> {
        self.client
            .update(
                "accounts",
                &[("connection_id", "not.is.null".to_string())],
                &BindingUpdate {
                    connection_id: None,
                },
            )
            .await?;
        Ok(())
    }

    async fn inventory(&self, username: &str) -> Result<Vec<serde_json::Value>, StoreError> {
        let filters = [
            ("username", format!("eq.{}", username)),
            ("select", "item,quantity".to_string()),
        ];
        Ok(self.client.get("inventory", &filters).await?)
    }

    async fn stats(&self, username: &str) -> Result<Option<serde_json::Value>, StoreError> {
        let row: StatsRow = self.account_field(username, "stats").await?;
        Ok(row.stats)
    }

    async fn client_config(&self, username: &str) -> Result<Option<ClientConfig>, StoreError> {
        let row: ConfigRow = self.account_field(username, "config").await?;
        Ok(row.config)
    }

    async fn set_client_config(
        &self,
        username: &str,
        config: &ClientConfig,
    ) -> Result<(), StoreError> {
        self.client
            .update(
                "accounts",
                &[("username", format!("eq.{}", username))],
                &ConfigUpdate { config },
            )
            .await?;
        Ok(())
    }

    async fn location(&self, username: &str) -> Result<Option<StoredLocation>, StoreError> {
        let row: LocationRow = self.account_field(username, "map,x,y").await?;
        Ok(row.map.map(|map| StoredLocation {
            map,
            x: row.x,
            y: row.y,
        }))
    }

    async fn set_location(&self, username: &str, location: &Location) -> Result<(), StoreError> {
        self.client
            .update(
                "accounts",
                &[("username", format!("eq.{}", username))],
                &LocationUpdate {
                    map: &location.map,
                    x: location.position.x,
                    y: location.position.y,
                },
            )
            .await?;
        Ok(())
    }

    async fn is_admin(&self, username: &str) -> Result<bool, StoreError> {
        let row: AdminRow = self.account_field(username, "is_admin").await?;
        Ok(row.is_admin)
    }
}
