//! Chat translation service

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Translates chat text into a player's language
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str, language: &str) -> Result<String, TranslateError>;
}

/// Returns the text unchanged; used when no translation backend is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughTranslator;

#[async_trait]
impl Translator for PassthroughTranslator {
    async fn translate(&self, text: &str, _language: &str) -> Result<String, TranslateError> {
        Ok(text.to_string())
    }
}

#[derive(Serialize)]
struct TranslateRequest<'a> {
    q: &'a str,
    source: &'static str,
    target: &'a str,
    format: &'static str,
}

#[derive(Deserialize)]
struct TranslateResponse {
    #[serde(rename = "translatedText")]
    translated_text: String,
}

/// LibreTranslate-compatible HTTP backend
#[derive(Clone)]
pub struct HttpTranslator {
    client: Client,
    url: String,
}

impl HttpTranslator {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Translator for HttpTranslator {
    async fn translate(&self, text: &str, language: &str) -> Result<String, TranslateError> {
        let response = self
            .client
            .post(&self.url)
            .json(&TranslateRequest {
                q: text,
                source: "auto",
                target: language,
                format: "text",
            })
            .send()
            .await
            .map_err(TranslateError::Request)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TranslateError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TranslateResponse = response.json().await.map_err(TranslateError::Parse)?;
        Ok(parsed.translated_text)
    }
}

/// Translation errors
#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
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

    #[tokio::test]
    async fn passthrough_returns_input() {
        let translated = PassthroughTranslator.translate("hola", "en").await.unwrap();
        assert_eq!(translated, "hola");
    }

    #[test]
    fn request_uses_libretranslate_shape() {
        let body = serde_json::to_value(TranslateRequest {
            q: "hi",
            source: "auto",
            target: "fr",
            format: "text",
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({ "q": "hi", "source": "auto", "target": "fr", "format": "text" })
        );
    }
}
