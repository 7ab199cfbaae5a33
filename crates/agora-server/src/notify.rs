//! Best-effort admin notifications.
//!
//! Request handlers hand a [`Notification`] to the [`Notifier`] and move
//! on: delivery runs on a spawned task, and a failing sink is logged at
//! `warn` and otherwise ignored.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;

use agora_shared::types::{MessageId, MessageKind, NetworkIdentity, UserId};

use crate::config::{ServerConfig, TelegramConfig};

const PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    NewMessage {
        author: String,
        kind: MessageKind,
        body: String,
    },
    NameChanged {
        identity: NetworkIdentity,
        previous: String,
        current: String,
    },
    AdminLogin {
        identity: NetworkIdentity,
    },
    IdentityBlocked {
        identity: NetworkIdentity,
        reason: String,
    },
    UserBlocked {
        user: UserId,
        display_name: String,
        reason: String,
    },
    IdentityUnblocked {
        identity: NetworkIdentity,
    },
    MessageDeleted {
        id: MessageId,
        author: String,
    },
    MessagesCleared {
        count: u64,
    },
}

impl Notification {
    fn is_chat_traffic(&self) -> bool {
        matches!(self, Notification::NewMessage { .. })
    }

    pub fn render(&self, instance: &str) -> String {
        let line = match self {
            Notification::NewMessage { author, kind, body } => {
                let preview: String = body.chars().take(PREVIEW_CHARS).collect();
                let ellipsis = if body.chars().count() > PREVIEW_CHARS { "…" } else { "" };
                match kind {
                    MessageKind::File | MessageKind::Voice => {
                        format!("{author} shared a {}: {preview}{ellipsis}", kind.as_str())
                    }
                    _ => format!("{author}: {preview}{ellipsis}"),
                }
            }
            Notification::NameChanged {
                identity,
                previous,
                current,
            } => format!("{identity} changed name from {previous} to {current}"),
            Notification::AdminLogin { identity } => format!("Admin logged in from {identity}"),
            Notification::IdentityBlocked { identity, reason } => {
                format!("Blocked {identity}: {reason}")
            }
            Notification::UserBlocked {
                user,
                display_name,
                reason,
            } => format!("Blocked user {display_name} ({user}): {reason}"),
            Notification::IdentityUnblocked { identity } => format!("Unblocked {identity}"),
            Notification::MessageDeleted { id, author } => {
                format!("Deleted message {id} by {author}")
            }
            Notification::MessagesCleared { count } => format!("Cleared {count} messages"),
        };
        format!("[{instance}] {line}")
    }
}

/// Destination for rendered notifications.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, text: &str) -> anyhow::Result<()>;
}

/// Telegram Bot API `sendMessage`.
pub struct TelegramSink {
    client: reqwest::Client,
    endpoint: String,
    chat_id: String,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

impl TelegramSink {
    pub fn new(config: &TelegramConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint: format!("{}/bot{}/sendMessage", config.api_base, config.bot_token),
            chat_id: config.chat_id.clone(),
        })
    }
}

#[async_trait]
impl NotificationSink for TelegramSink {
    async fn deliver(&self, text: &str) -> anyhow::Result<()> {
        self.client
            .post(&self.endpoint)
            .json(&SendMessage {
                chat_id: &self.chat_id,
                text,
            })
            .send()
            .await
            .context("telegram request failed")?
            .error_for_status()
            .context("telegram rejected the message")?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct Notifier {
    sink: Option<Arc<dyn NotificationSink>>,
    notify_on_message: bool,
    instance: Arc<str>,
}

impl Notifier {
    pub fn new(
        sink: Option<Arc<dyn NotificationSink>>,
        notify_on_message: bool,
        instance: &str,
    ) -> Self {
        Self {
            sink,
            notify_on_message,
            instance: Arc::from(instance),
        }
    }

    pub fn disabled() -> Self {
        Self::new(None, false, "")
    }

    /// Build the notifier described by the configuration. A sink that
    /// cannot be constructed disables notifications instead of failing
    /// startup.
    pub fn from_config(config: &ServerConfig) -> Self {
        let sink = config.telegram.as_ref().and_then(|telegram| {
            match TelegramSink::new(telegram) {
                Ok(sink) => Some(Arc::new(sink) as Arc<dyn NotificationSink>),
                Err(e) => {
                    tracing::warn!(error = %e, "telegram notifications disabled");
                    None
                }
            }
        });
        if sink.is_none() {
            tracing::info!("admin notifications disabled");
        }
        Self::new(sink, config.notify_on_message, &config.instance_name)
    }

    pub fn notify(&self, notification: Notification) {
        let Some(sink) = self.sink.clone() else {
            return;
        };
        if notification.is_chat_traffic() && !self.notify_on_message {
            return;
        }

        let text = notification.render(&self.instance);
        tokio::spawn(async move {
            if let Err(e) = sink.deliver(&text).await {
                tracing::warn!(error = %e, "notification not delivered");
            }
        });
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::Mutex;

    /// Sink that keeps every delivered text.
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub delivered: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn deliver(&self, text: &str) -> anyhow::Result<()> {
            self.delivered.lock().await.push(text.to_string());
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl NotificationSink for FailingSink {
        async fn deliver(&self, _text: &str) -> anyhow::Result<()> {
            anyhow::bail!("chat unreachable")
        }
    }

    /// Wait until `sink` has received at least `n` notifications.
    pub(crate) async fn wait_for(sink: &RecordingSink, n: usize) -> Vec<String> {
        for _ in 0..100 {
            {
                let delivered = sink.delivered.lock().await;
                if delivered.len() >= n {
                    return delivered.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        sink.delivered.lock().await.clone()
    }

    #[tokio::test]
    async fn test_delivers_rendered_text() {
        let sink = Arc::new(RecordingSink::default());
        let notifier =
            Notifier::new(Some(sink.clone() as Arc<dyn NotificationSink>), true, "Agora");

        notifier.notify(Notification::MessagesCleared { count: 3 });

        let delivered = wait_for(&sink, 1).await;
        assert_eq!(delivered, vec!["[Agora] Cleared 3 messages".to_string()]);
    }

    #[tokio::test]
    async fn test_chat_traffic_suppressed_when_disabled() {
        let sink = Arc::new(RecordingSink::default());
        let notifier =
            Notifier::new(Some(sink.clone() as Arc<dyn NotificationSink>), false, "Agora");

        notifier.notify(Notification::NewMessage {
            author: "Alice".into(),
            kind: MessageKind::Text,
            body: "hi".into(),
        });
        notifier.notify(Notification::AdminLogin {
            identity: NetworkIdentity::new("10.0.0.1"),
        });

        wait_for(&sink, 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        let delivered = sink.delivered.lock().await.clone();
        assert_eq!(delivered.len(), 1);
        assert!(delivered[0].contains("Admin logged in from 10.0.0.1"));
    }

    #[tokio::test]
    async fn test_failing_sink_is_swallowed() {
        let sink = Arc::new(FailingSink) as Arc<dyn NotificationSink>;
        let notifier = Notifier::new(Some(sink), true, "Agora");
        notifier.notify(Notification::MessagesCleared { count: 1 });
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[test]
    fn test_preview_is_truncated() {
        let text = Notification::NewMessage {
            author: "Bob".into(),
            kind: MessageKind::Text,
            body: "x".repeat(150),
        }
        .render("Agora");
        assert!(text.ends_with('…'));
        assert_eq!(text.chars().filter(|c| *c == 'x').count(), PREVIEW_CHARS);
    }
}
