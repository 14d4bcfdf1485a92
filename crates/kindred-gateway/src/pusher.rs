use async_trait::async_trait;
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use sha2::Sha256;
use tracing::trace;
use uuid::Uuid;

use kindred_types::events::{UserEvent, user_channel};

use crate::fanout::{Fanout, FanoutError};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone)]
pub struct PusherConfig {
    pub app_id: String,
    pub key: String,
    pub secret: String,
    pub cluster: String,
}

/// Fanout over a Pusher Channels compatible HTTP API.
pub struct PusherFanout {
    http: reqwest::Client,
    config: PusherConfig,
    base_url: String,
}

impl PusherFanout {
    pub fn new(config: PusherConfig) -> Self {
        let base_url = format!("https://api-{}.pusher.com", config.cluster);
        Self {
            http: reqwest::Client::new(),
            config,
            base_url,
        }
    }

    /// Point at a different host (self-hosted, compatible servers, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn events_path(&self) -> String {
        format!("/apps/{}/events", self.config.app_id)
    }

    /// Build the signed query string for a `POST /apps/{id}/events` body.
    fn signed_query(&self, body: &str, timestamp: i64) -> Result<String, FanoutError> {
        let body_md5 = hex::encode(Md5::digest(body.as_bytes()));
        // Parameters must be in key order; the signature covers this exact string.
        let query = format!(
            "auth_key={}&auth_timestamp={}&auth_version=1.0&body_md5={}",
            self.config.key, timestamp, body_md5
        );
        let to_sign = format!("POST\n{}\n{}", self.events_path(), query);

        let mut mac = HmacSha256::new_from_slice(self.config.secret.as_bytes())
            .map_err(|e| FanoutError::Unavailable(format!("bad pusher secret: {e}")))?;
        mac.update(to_sign.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        Ok(format!("{query}&auth_signature={signature}"))
    }
}

#[async_trait]
impl Fanout for PusherFanout {
    async fn publish(&self, user_id: Uuid, event: &UserEvent) -> Result<(), FanoutError> {
        let body = serde_json::json!({
            "name": event.name(),
            "channels": [user_channel(user_id)],
            "data": event.data_json()?,
        })
        .to_string();

        let query = self.signed_query(&body, chrono::Utc::now().timestamp())?;
        let url = format!("{}{}?{}", self.base_url, self.events_path(), query);

        let resp = self
            .http
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FanoutError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        trace!("Pusher accepted {} for {}", event.name(), user_id);
        Ok(())
    }
}
