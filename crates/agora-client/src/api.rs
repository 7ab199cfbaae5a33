//! Typed wrapper over the Agora HTTP API.

use std::time::Duration;

use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use agora_shared::protocol::{
    AdminCredential, AuthRequest, AuthResponse, BlockRequest, ClearMessagesResponse,
    EditMessageRequest, FailureResponse, HealthResponse, MeResponse, MessageDto,
    MessagesResponse, ReactionRequest, ReactionResponse, RegisterRequest, SendMessageRequest,
    SendMessageResponse, StatsResponse, SuccessResponse, UnblockRequest,
};
use agora_shared::types::MessageId;

use crate::error::ClientError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn set_token(&mut self, token: Option<String>) {
        self.token = token;
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, format!("{}{path}", self.base_url));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send a request and decode the success body. Any `{success: false}`
    /// body becomes [`ClientError::Api`], whatever the HTTP status.
    async fn call<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ClientError> {
        let response = builder.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;

        let value: Value = serde_json::from_slice(&bytes).map_err(|e| {
            ClientError::UnexpectedResponse(format!("HTTP {status}: undecodable body: {e}"))
        })?;

        if value.get("success") == Some(&Value::Bool(false)) {
            let failure: FailureResponse = serde_json::from_value(value)
                .map_err(|e| ClientError::UnexpectedResponse(e.to_string()))?;
            return Err(ClientError::Api {
                status: status.as_u16(),
                code: failure.error,
            });
        }
        if !status.is_success() {
            return Err(ClientError::UnexpectedResponse(format!("HTTP {status}")));
        }

        serde_json::from_value(value).map_err(|e| ClientError::UnexpectedResponse(e.to_string()))
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        self.call(self.request(Method::POST, path).json(body)).await
    }

    /// Liveness probe. Any 4xx/5xx, or no answer at all, means the service
    /// is blocked or unreachable for this client.
    pub async fn health(&self) -> Result<HealthResponse, ClientError> {
        let response = self
            .request(Method::GET, "/health")
            .send()
            .await
            .map_err(|e| {
                tracing::debug!(error = %e, "health probe got no answer");
                ClientError::Unavailable { status: None }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Unavailable {
                status: Some(status.as_u16()),
            });
        }
        Ok(response.json().await?)
    }

    pub async fn stats(&self) -> Result<StatsResponse, ClientError> {
        self.call(self.request(Method::GET, "/stats")).await
    }

    // ------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------

    pub async fn authenticate(
        &self,
        name: &str,
        password: Option<&str>,
    ) -> Result<AuthResponse, ClientError> {
        let body = AuthRequest {
            name: Some(name.to_string()),
            username: None,
            password: password.map(str::to_string),
        };
        self.post("/auth", &body).await
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<AuthResponse, ClientError> {
        let body = AuthRequest {
            name: None,
            username: Some(username.to_string()),
            password: Some(password.to_string()),
        };
        self.post("/auth/login", &body).await
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<AuthResponse, ClientError> {
        self.post("/auth/register", request).await
    }

    pub async fn me(&self) -> Result<MeResponse, ClientError> {
        self.call(self.request(Method::GET, "/me")).await
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    /// Full snapshot of the log, oldest first.
    pub async fn list_messages(&self) -> Result<Vec<MessageDto>, ClientError> {
        let response: MessagesResponse = self.call(self.request(Method::GET, "/messages")).await?;
        Ok(response.messages)
    }

    /// One page counted from the newest end.
    pub async fn list_page(&self, page: u32, limit: u32) -> Result<MessagesResponse, ClientError> {
        self.call(
            self.request(Method::GET, "/messages")
                .query(&[("page", page), ("limit", limit)]),
        )
        .await
    }

    pub async fn send_message(
        &self,
        request: &SendMessageRequest,
    ) -> Result<MessageId, ClientError> {
        let response: SendMessageResponse = self.post("/send-message", request).await?;
        Ok(response.message_id)
    }

    pub async fn edit_message(&self, id: MessageId, body: &str) -> Result<(), ClientError> {
        let _: SuccessResponse = self
            .call(
                self.request(Method::PATCH, &format!("/message/{id}"))
                    .json(&EditMessageRequest {
                        message: body.to_string(),
                    }),
            )
            .await?;
        Ok(())
    }

    pub async fn react(&self, id: MessageId, emoji: &str) -> Result<ReactionResponse, ClientError> {
        let body = ReactionRequest {
            emoji: emoji.to_string(),
        };
        self.post(&format!("/message/{id}/reactions"), &body).await
    }

    // ------------------------------------------------------------------
    // Moderation
    // ------------------------------------------------------------------

    pub async fn delete_message(
        &self,
        id: MessageId,
        admin_password: Option<&str>,
    ) -> Result<(), ClientError> {
        let _: SuccessResponse = self
            .call(
                self.request(Method::DELETE, &format!("/message/{id}"))
                    .json(&credential(admin_password)),
            )
            .await?;
        Ok(())
    }

    pub async fn clear_messages(&self, admin_password: Option<&str>) -> Result<u64, ClientError> {
        let response: ClearMessagesResponse = self
            .call(
                self.request(Method::DELETE, "/clear-messages")
                    .json(&credential(admin_password)),
            )
            .await?;
        Ok(response.deleted_count)
    }

    pub async fn block_ip(&self, request: &BlockRequest) -> Result<(), ClientError> {
        let _: SuccessResponse = self.post("/block-ip", request).await?;
        Ok(())
    }

    pub async fn block_user(&self, request: &BlockRequest) -> Result<(), ClientError> {
        let _: SuccessResponse = self.post("/block-user", request).await?;
        Ok(())
    }

    pub async fn unblock(&self, request: &UnblockRequest) -> Result<(), ClientError> {
        let _: SuccessResponse = self.post("/unblock", request).await?;
        Ok(())
    }
}

fn credential(admin_password: Option<&str>) -> AdminCredential {
    AdminCredential {
        admin_password: admin_password.map(str::to_string),
    }
}
