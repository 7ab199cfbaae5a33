//! # agora-client
//!
//! Client side of the Agora polling protocol: a typed HTTP API wrapper, a
//! [`Timeline`] that reconciles optimistic sends with the authoritative
//! log, and a background poller that reports [`SyncEvent`]s.

pub mod api;
pub mod error;
pub mod events;
pub mod poller;
pub mod sync;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use agora_shared::constants::{
    DEFAULT_HTTP_PORT, DEFAULT_MAX_MESSAGE_LENGTH, DEFAULT_POLL_INTERVAL_MS,
};
use agora_shared::protocol::{AuthResponse, HealthResponse, SendMessageRequest};
use agora_shared::types::MessageId;
use tokio::sync::mpsc;

pub use crate::api::ApiClient;
pub use crate::error::ClientError;
pub use crate::events::SyncEvent;
pub use crate::poller::PollerHandle;
pub use crate::sync::{Provisional, Timeline, TimelineEntry};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_url: String,
    pub poll_interval: Duration,
    /// Local pre-flight limit; the server's limit is authoritative.
    pub max_message_length: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: format!("http://localhost:{DEFAULT_HTTP_PORT}"),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
        }
    }
}

/// One signed-in (or anonymous) participant of the room.
pub struct ChatClient {
    api: ApiClient,
    timeline: Arc<Mutex<Timeline>>,
    config: ClientConfig,
    display_name: Option<String>,
}

impl ChatClient {
    /// Probe `/health` before anything else. A blocked or unreachable
    /// service yields [`ClientError::Unavailable`] so the UI can show its
    /// own state instead of the room.
    pub async fn connect(config: ClientConfig) -> Result<(Self, HealthResponse), ClientError> {
        let api = ApiClient::new(&config.server_url)?;
        let health = api.health().await?;
        tracing::info!(server = %api.base_url(), version = %health.version, "Connected");

        let client = Self {
            api,
            timeline: Arc::new(Mutex::new(Timeline::new(config.max_message_length))),
            config,
            display_name: None,
        };
        Ok((client, health))
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn timeline(&self) -> Arc<Mutex<Timeline>> {
        self.timeline.clone()
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    fn adopt(&mut self, auth: AuthResponse) -> AuthResponse {
        self.api.set_token(Some(auth.token.clone()));
        self.display_name = Some(auth.user.display_name.clone());
        auth
    }

    /// Guest or admin sign-in by display name.
    pub async fn authenticate(
        &mut self,
        name: &str,
        password: Option<&str>,
    ) -> Result<AuthResponse, ClientError> {
        let auth = self.api.authenticate(name, password).await?;
        Ok(self.adopt(auth))
    }

    pub async fn login(
        &mut self,
        username: &str,
        password: &str,
    ) -> Result<AuthResponse, ClientError> {
        let auth = self.api.login(username, password).await?;
        Ok(self.adopt(auth))
    }

    /// Optimistic send: the text shows up in the timeline at once, is
    /// acknowledged when the server accepts it and withdrawn when it does
    /// not.
    pub async fn send(&self, body: &str) -> Result<MessageId, ClientError> {
        let name = self.display_name.clone().unwrap_or_default();
        let provisional = poller::lock(&self.timeline).begin_send(&name, body)?;

        let request = SendMessageRequest {
            name: (!name.is_empty()).then(|| name.clone()),
            message: body.to_string(),
            ..Default::default()
        };

        match self.api.send_message(&request).await {
            Ok(id) => {
                poller::lock(&self.timeline).confirm_send(&provisional.temp_id, id);
                Ok(id)
            }
            Err(e) => {
                poller::lock(&self.timeline).fail_send(&provisional.temp_id);
                tracing::warn!(error = %e, "Send failed");
                Err(e)
            }
        }
    }

    /// Start polling with the current session.
    pub fn start_polling(&self) -> (PollerHandle, mpsc::Receiver<SyncEvent>) {
        poller::spawn_poller(self.api.clone(), self.timeline.clone(), self.config.poll_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_shared::error::{ErrorCode, ValidationError};

    use crate::poller::tests::{spawn_mock, Mode};
    use crate::sync::ProvisionalState;

    fn config(server_url: String) -> ClientConfig {
        ClientConfig {
            server_url,
            poll_interval: Duration::from_millis(20),
            max_message_length: 50,
        }
    }

    #[tokio::test]
    async fn test_connect_reports_blocked_state() {
        let (mock, base) = spawn_mock().await;
        mock.set_mode(Mode::Blocked);
        let err = ChatClient::connect(config(base)).await.err().unwrap();
        assert!(matches!(err, ClientError::Unavailable { status: Some(403) }));
    }

    #[tokio::test]
    async fn test_connect_unreachable() {
        // Bind then drop to get a port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = ChatClient::connect(config(format!("http://{addr}")))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ClientError::Unavailable { status: None }));
    }

    #[tokio::test]
    async fn test_optimistic_send_round_trip() {
        let (_mock, base) = spawn_mock().await;
        let (client, health) = ChatClient::connect(config(base)).await.unwrap();
        assert_eq!(health.status, "healthy");

        let id = client.send("hello").await.unwrap();
        {
            let timeline = client.timeline();
            let timeline = poller::lock(&timeline);
            assert_eq!(timeline.provisional().len(), 1);
            assert_eq!(timeline.provisional()[0].state, ProvisionalState::Acknowledged(id));
        }

        let (handle, mut rx) = client.start_polling();
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert_eq!(event, Some(SyncEvent::SnapshotChanged { messages: 1 }));
        {
            let timeline = client.timeline();
            let timeline = poller::lock(&timeline);
            assert!(timeline.provisional().is_empty());
            assert_eq!(timeline.snapshot()[0].id, id);
        }
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_send_is_withdrawn() {
        let (_mock, base) = spawn_mock().await;
        let (client, _) = ChatClient::connect(config(base)).await.unwrap();

        let err = client.send(&"x".repeat(51)).await.unwrap_err();
        assert!(matches!(err, ClientError::Validation(ValidationError::MessageTooLong { .. })));

        assert!(poller::lock(&client.timeline()).is_empty());

        // Passes the local check, refused by the server.
        let (mock, base) = spawn_mock().await;
        let (client, _) = ChatClient::connect(config(base)).await.unwrap();
        mock.set_mode(Mode::Failing);
        let err = client.send("lost").await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::UpstreamUnavailable));
        assert!(err.is_transient());
        assert!(poller::lock(&client.timeline()).is_empty());
    }
}
