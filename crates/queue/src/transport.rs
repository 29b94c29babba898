//! External messaging API client.
//!
//! The dispatcher talks to the platform through the [`MessagingApi`] trait
//! so tests can substitute a double. Platform errors are discriminated by
//! type, not by shape-sniffing caught exceptions: rate-limit responses get
//! their own variant carrying the server's backoff hint.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::warn;
use url::Url;

/// Formatting and delivery options attached to a message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageOptions {
    /// Markup mode understood by the platform (e.g. `MarkdownV2`, `HTML`).
    pub parse_mode: Option<String>,
    /// Deliver without a notification sound.
    pub disable_notification: bool,
    /// Suppress link previews.
    pub disable_web_page_preview: bool,
    /// Inline keyboard or other reply markup, passed through verbatim.
    pub reply_markup: Option<serde_json::Value>,
}

/// Error returned by the external messaging API.
#[derive(Debug, Error)]
pub enum SendError {
    /// The platform itself rate limited the call. Retry after the hinted
    /// number of seconds when present, otherwise with default backoff.
    #[error("platform rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited {
        /// Server-suggested backoff in seconds, when provided.
        retry_after_secs: Option<u64>,
    },

    /// The platform rejected the call with an error response.
    #[error("platform error {code}: {description}")]
    Platform {
        /// HTTP status code.
        code: u16,
        /// Platform-supplied description.
        description: String,
    },

    /// The call never reached the platform.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Outbound messaging API consumed by the dispatcher.
#[async_trait]
pub trait MessagingApi: Send + Sync {
    /// Deliver a message to a target conversation.
    async fn send_message(
        &self,
        target: &str,
        text: &str,
        options: &MessageOptions,
    ) -> Result<(), SendError>;
}

/// Error payload shape of a platform error response.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ApiErrorParameters>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

/// HTTP client for a Telegram-style bot API.
#[derive(Clone)]
pub struct BotApiClient {
    http: Client,
    send_message_url: Url,
}

impl BotApiClient {
    /// Create a client for the given API base URL and bot token.
    ///
    /// # Errors
    /// Returns an error if the base URL is malformed.
    pub fn new(api_url: &str, token: &str) -> Result<Self, SendError> {
        // Built from the full string: Url::join would read the token's
        // colon as a scheme separator and drop the base entirely.
        let base = api_url.trim_end_matches('/');
        let send_message_url = Url::parse(&format!("{base}/bot{token}/sendMessage"))
            .map_err(|e| SendError::Transport(format!("invalid API URL: {e}")))?;

        #[allow(clippy::expect_used)] // Client build only fails with incompatible TLS settings
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Ok(Self {
            http,
            send_message_url,
        })
    }
}

#[async_trait]
impl MessagingApi for BotApiClient {
    async fn send_message(
        &self,
        target: &str,
        text: &str,
        options: &MessageOptions,
    ) -> Result<(), SendError> {
        let mut body = json!({
            "chat_id": target,
            "text": text,
            "disable_notification": options.disable_notification,
            "disable_web_page_preview": options.disable_web_page_preview,
        });
        if let Some(parse_mode) = &options.parse_mode {
            body["parse_mode"] = json!(parse_mode);
        }
        if let Some(markup) = &options.reply_markup {
            body["reply_markup"] = markup.clone();
        }

        let response = self
            .http
            .post(self.send_message_url.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| SendError::Transport(e.to_string()))?;

        let status = response.status();

        if status.is_success() {
            return Ok(());
        }

        if status.as_u16() == 429 {
            // Prefer the body hint, fall back to the Retry-After header.
            let header_hint = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let body_hint = response
                .json::<ApiErrorBody>()
                .await
                .ok()
                .and_then(|b| b.parameters.and_then(|p| p.retry_after));

            let retry_after_secs = body_hint.or(header_hint);
            warn!(target = %target, retry_after = ?retry_after_secs, "Platform rate limited send");
            return Err(SendError::RateLimited { retry_after_secs });
        }

        let description = response
            .json::<ApiErrorBody>()
            .await
            .ok()
            .and_then(|b| b.description)
            .unwrap_or_else(|| "unknown platform error".to_string());

        Err(SendError::Platform {
            code: status.as_u16(),
            description,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_client_builds_send_url() {
        let client = BotApiClient::new("https://api.telegram.org", "12345:token").unwrap();
        assert_eq!(
            client.send_message_url.as_str(),
            "https://api.telegram.org/bot12345:token/sendMessage"
        );
    }

    #[test]
    fn test_client_builds_send_url_with_trailing_slash() {
        let client = BotApiClient::new("https://api.telegram.org/", "12345:token").unwrap();
        assert_eq!(
            client.send_message_url.as_str(),
            "https://api.telegram.org/bot12345:token/sendMessage"
        );
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        assert!(BotApiClient::new("not a url", "t").is_err());
    }

    #[test]
    fn test_options_default_serialization() {
        let options = MessageOptions::default();
        let json = serde_json::to_value(&options).unwrap();
        assert_eq!(json["disable_notification"], false);
        assert!(json["parse_mode"].is_null());
    }
}
