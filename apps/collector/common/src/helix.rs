use crate::BroadcastMetadata;
use crate::error::ServiceError;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Source of broadcast status. Implementations do no scheduling of their own.
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// Current metadata; an offline broadcast is a successful fetch with `is_live == false`.
    async fn fetch(&self) -> Result<BroadcastMetadata, ServiceError>;

    async fn is_live(&self) -> Result<bool, ServiceError> {
        Ok(self.fetch().await?.is_live)
    }
}

#[derive(Debug, Deserialize)]
pub struct HelixStreamsResponse {
    pub data: Vec<HelixStream>,
}

#[derive(Debug, Deserialize)]
pub struct HelixStream {
    #[serde(default)]
    pub game_name: String,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "type", default)]
    pub stream_type: String,
}

impl From<HelixStream> for BroadcastMetadata {
    fn from(stream: HelixStream) -> Self {
        Self {
            game_name: stream.game_name,
            title: stream.title,
            // Helix only lists running streams, "live" is the only type in practice
            is_live: stream.stream_type.is_empty() || stream.stream_type == "live",
        }
    }
}

#[derive(Clone)]
pub struct HelixClient {
    client: Client,
    base_url: String,
    client_id: String,
    token: String,
    user_login: String,
}

impl HelixClient {
    pub fn new(
        base_url: &str,
        client_id: &str,
        token: &str,
        user_login: &str,
    ) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ServiceError::Fetch(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            client_id: client_id.to_string(),
            token: token.to_string(),
            user_login: user_login.to_lowercase(),
        })
    }

    /// The channel's running stream, if any
    pub async fn current_stream(&self) -> Result<Option<HelixStream>, ServiceError> {
        let url = format!("{}/streams", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[("user_login", self.user_login.as_str())])
            .bearer_auth(&self.token)
            .header("Client-Id", &self.client_id)
            .send()
            .await
            .map_err(|e| ServiceError::Fetch(format!("Request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let wait_time_secs = response
                .headers()
                .get("Ratelimit-Reset")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<i64>().ok())
                .map(|reset| (reset - Utc::now().timestamp()).max(1) as u64)
                .unwrap_or(30);
            return Err(ServiceError::RateLimited { wait_time_secs });
        }
        if !status.is_success() {
            return Err(ServiceError::Fetch(format!(
                "Status endpoint returned {}",
                status
            )));
        }

        let body = response
            .json::<HelixStreamsResponse>()
            .await
            .map_err(|e| ServiceError::Fetch(format!("Failed to parse response: {}", e)))?;

        debug!(
            "Status endpoint listed {} streams for {}",
            body.data.len(),
            self.user_login
        );
        Ok(body.data.into_iter().next())
    }
}

#[async_trait]
impl StatusSource for HelixClient {
    async fn fetch(&self) -> Result<BroadcastMetadata, ServiceError> {
        Ok(self
            .current_stream()
            .await?
            .map(BroadcastMetadata::from)
            .unwrap_or_else(BroadcastMetadata::offline))
    }
}
