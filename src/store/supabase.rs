//! Supabase REST API client using service_role key

use reqwest::{Client, Method, RequestBuilder};
use serde::{de::DeserializeOwned, Serialize};

/// Supabase client for server-side database operations
/// Uses service_role key which bypasses RLS - handle with care!
#[derive(Clone)]
pub struct SupabaseClient {
    client: Client,
    base_url: String,
    service_role_key: String,
}

impl SupabaseClient {
    pub fn new(base_url: impl Into<String>, service_role_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            service_role_key: service_role_key.into(),
        }
    }

    /// Get the REST API URL for a table
    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("apikey", &self.service_role_key)
            .header("Authorization", format!("Bearer {}", self.service_role_key))
            .header("Content-Type", "application/json")
    }

    /// Start an authenticated request; filter values are percent-encoded
    fn request(&self, method: Method, table: &str, filters: &[(&str, String)]) -> RequestBuilder {
        self.authorized(self.client.request(method, self.rest_url(table)).query(filters))
    }

    /// Make an authenticated GET request
    pub async fn get<T: DeserializeOwned>(
        &self,
        table: &str,
        filters: &[(&str, String)],
    ) -> Result<Vec<T>, SupabaseError> {
        let response = self
            .request(Method::GET, table, filters)
            .send()
            .await
            .map_err(SupabaseError::Request)?;

        let response = check_status(response).await?;
        response.json().await.map_err(SupabaseError::Parse)
    }

    /// Make an authenticated GET request expecting at most one row
    pub async fn get_one<T: DeserializeOwned>(
        &self,
        table: &str,
        filters: &[(&str, String)],
    ) -> Result<Option<T>, SupabaseError> {
        let mut filters = filters.to_vec();
        filters.push(("limit", "1".to_string()));
        let rows: Vec<T> = self.get(table, &filters).await?;
        Ok(rows.into_iter().next())
    }

    /// Make an authenticated PATCH request (update)
    pub async fn update<T: Serialize>(
        &self,
        table: &str,
        filters: &[(&str, String)],
        data: &T,
    ) -> Result<(), SupabaseError> {
        let response = self
            .request(Method::PATCH, table, filters)
            .json(data)
            .send()
            .await
            .map_err(SupabaseError::Request)?;

        check_status(response).await?;
        Ok(())
    }

    /// PATCH and return the rows that matched the filter.
    ///
    /// PostgREST applies the filter and the update in one statement, so an
    /// empty result means no row satisfied the filter at update time.
    pub async fn update_returning<T: Serialize, R: DeserializeOwned>(
        &self,
        table: &str,
        filters: &[(&str, String)],
        data: &T,
    ) -> Result<Vec<R>, SupabaseError> {
        let response = self
            .request(Method::PATCH, table, filters)
            .header("Prefer", "return=representation")
            .json(data)
            .send()
            .await
            .map_err(SupabaseError::Request)?;

        let response = check_status(response).await?;
        response.json().await.map_err(SupabaseError::Parse)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, SupabaseError> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(SupabaseError::Api {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}

/// Supabase errors
#[derive(Debug, thiserror::Error)]
pub enum SupabaseError {
    #[error("HTTP request failed: {0}")]
    Request(reqwest::Error),

    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("Failed to parse response: {0}")]
    Parse(reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rest_url_ignores_trailing_slash() {
        let client = SupabaseClient::new("https://example.supabase.co/", "key");
        assert_eq!(
            client.rest_url("accounts"),
            "https://example.supabase.co/rest/v1/accounts"
        );
    }

    #[test]
    fn filter_values_are_percent_encoded() {
        let client = SupabaseClient::new("https://example.supabase.co", "key");
        let filters = [
            ("session_token", "eq.t#&x+y".to_string()),
            ("or", "(connection_id.is.null,connection_id.eq.c1)".to_string()),
            ("select", "username".to_string()),
        ];
        let request = client
            .request(Method::PATCH, "accounts", &filters)
            .build()
            .unwrap();

        let url = request.url();
        assert!(url.fragment().is_none());
        assert!(url.query().unwrap().starts_with("session_token=eq.t%23%26x%2By&or="));

        let decoded: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        let expected: Vec<(String, String)> = filters
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        assert_eq!(decoded, expected);
    }
}
