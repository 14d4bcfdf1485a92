use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::json;
use uuid::Uuid;

use kindred_types::api::{
    ConversationsResponse, ErrorBody, MatchListResponse, MessageHistoryResponse, ReadReceiptRequest,
    ReadReceiptResponse, RecordActionRequest, RecordActionResponse, SendMessageRequest, SendMessageResponse,
    SignalResponse, TypingRequest,
};
use kindred_types::models::{ActionKind, ConversationView, MessageType};

use crate::error::ClientError;
use crate::typing::TypingSignal;

/// Typed client for the REST surface, authenticated as one user.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
    }

    pub async fn record_action(&self, target_user_id: Uuid, action: ActionKind) -> Result<RecordActionResponse, ClientError> {
        let req = RecordActionRequest { target_user_id, action };
        parse(self.request(Method::POST, "/matches").json(&req).send().await?).await
    }

    pub async fn matches(&self) -> Result<MatchListResponse, ClientError> {
        parse(self.request(Method::GET, "/matches").send().await?).await
    }

    pub async fn mark_seen(&self, match_id: Uuid) -> Result<(), ClientError> {
        expect_ok(self.request(Method::POST, &format!("/matches/{match_id}/seen")).send().await?).await
    }

    pub async fn unmatch(&self, match_id: Uuid) -> Result<(), ClientError> {
        expect_ok(self.request(Method::DELETE, &format!("/matches/{match_id}")).send().await?).await
    }

    pub async fn conversations(&self) -> Result<Vec<ConversationView>, ClientError> {
        let resp: ConversationsResponse = parse(self.request(Method::GET, "/conversations").send().await?).await?;
        Ok(resp.conversations)
    }

    pub async fn send_message(
        &self,
        receiver_id: Uuid,
        content: impl Into<String>,
        message_type: MessageType,
    ) -> Result<SendMessageResponse, ClientError> {
        let req = SendMessageRequest {
            receiver_id,
            content: content.into(),
            message_type,
        };
        parse(self.request(Method::POST, "/messages/send").json(&req).send().await?).await
    }

    pub async fn messages(&self, match_id: Uuid, page: u32, limit: u32) -> Result<MessageHistoryResponse, ClientError> {
        let resp = self
            .request(Method::GET, &format!("/messages/{match_id}"))
            .query(&[("page", page), ("limit", limit)])
            .send()
            .await?;
        parse(resp).await
    }

    pub async fn typing(&self, match_id: Uuid, receiver_id: Uuid, is_typing: bool) -> Result<SignalResponse, ClientError> {
        let req = TypingRequest {
            match_id,
            receiver_id,
            is_typing,
        };
        parse(self.request(Method::POST, "/typing").json(&req).send().await?).await
    }

    pub async fn read_receipt(&self, match_id: Uuid) -> Result<ReadReceiptResponse, ClientError> {
        let req = ReadReceiptRequest { match_id };
        parse(self.request(Method::POST, "/read-receipt").json(&req).send().await?).await
    }

    pub async fn delete_account(&self) -> Result<(), ClientError> {
        expect_ok(self.request(Method::DELETE, "/account").send().await?).await
    }
}

#[async_trait]
impl TypingSignal for ApiClient {
    async fn set_typing(&self, match_id: Uuid, receiver_id: Uuid, is_typing: bool) -> Result<(), ClientError> {
        self.typing(match_id, receiver_id, is_typing).await.map(|_| ())
    }
}

async fn parse<T: DeserializeOwned>(resp: Response) -> Result<T, ClientError> {
    let status = resp.status();
    let bytes = resp.bytes().await?;
    if !status.is_success() {
        let message = serde_json::from_slice::<ErrorBody>(&bytes)
            .map(|b| b.error)
            .unwrap_or_else(|_| String::from_utf8_lossy(&bytes).into_owned());
        return Err(ClientError::Server {
            status: status.as_u16(),
            message,
        });
    }
    Ok(serde_json::from_slice(&bytes)?)
}

async fn expect_ok(resp: Response) -> Result<(), ClientError> {
    let body: serde_json::Value = parse(resp).await?;
    if body.get("success") == Some(&json!(true)) {
        Ok(())
    } else {
        Err(ClientError::Server {
            status: 200,
            message: format!("unexpected response {body}"),
        })
    }
}
