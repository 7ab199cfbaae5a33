//! Server configuration loaded from environment variables.
//!
//! Non-secret settings have defaults so a local instance starts with only
//! the two secrets set. Secrets are validated eagerly: a missing or weak
//! value aborts startup instead of surfacing on the first request.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

use agora_shared::constants::{
    APP_NAME, DEFAULT_HTTP_PORT, DEFAULT_MAX_ATTACHMENT_BYTES, DEFAULT_MAX_MESSAGE_LENGTH,
    DEFAULT_SESSION_TTL_HOURS,
};
use agora_store::MessageLimits;
use thiserror::Error;

/// Minimum accepted length of `SESSION_SECRET`.
pub const MIN_SESSION_SECRET_LENGTH: usize = 16;

const DEFAULT_TELEGRAM_API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Telegram Bot API destination for admin notifications.
#[derive(Clone, PartialEq, Eq)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
    pub api_base: String,
}

impl fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &"<redacted>")
            .field("chat_id", &self.chat_id)
            .field("api_base", &self.api_base)
            .finish()
    }
}

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP API.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:3000`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `./agora.db`
    pub database_path: PathBuf,

    /// Argon2 PHC string of the admin password.
    /// Env: `ADMIN_PASSWORD_HASH` (required)
    pub admin_password_hash: String,

    /// Secret the session signing key is derived from.
    /// Env: `SESSION_SECRET` (required, at least 16 characters)
    pub session_secret: String,

    /// Env: `SESSION_TTL_HOURS`
    /// Default: `24`
    pub session_ttl_hours: i64,

    /// Maximum message body, in characters.
    /// Env: `MAX_MESSAGE_LENGTH`
    /// Default: `500`
    pub max_message_length: usize,

    /// Maximum decoded attachment size, in bytes.
    /// Env: `MAX_ATTACHMENT_BYTES`
    /// Default: `5242880`
    pub max_attachment_bytes: usize,

    /// Read the client address from `X-Forwarded-For` / `X-Real-IP`
    /// before the socket peer. Only enable behind a trusted proxy.
    /// Env: `TRUST_PROXY_HEADERS` (true/false)
    /// Default: `false`
    pub trust_proxy_headers: bool,

    /// Env: `TELEGRAM_BOT_TOKEN`, `TELEGRAM_CHAT_ID`, `TELEGRAM_API_BASE`.
    /// Notifications are disabled unless both token and chat id are set.
    pub telegram: Option<TelegramConfig>,

    /// Notify on every new message, not only on moderation events.
    /// Env: `NOTIFY_ON_MESSAGE`
    /// Default: `true`
    pub notify_on_message: bool,

    /// Env: `INSTANCE_NAME`
    /// Default: `"Agora"`
    pub instance_name: String,
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("database_path", &self.database_path)
            .field("admin_password_hash", &"<redacted>")
            .field("session_secret", &"<redacted>")
            .field("session_ttl_hours", &self.session_ttl_hours)
            .field("max_message_length", &self.max_message_length)
            .field("max_attachment_bytes", &self.max_attachment_bytes)
            .field("trust_proxy_headers", &self.trust_proxy_headers)
            .field("telegram", &self.telegram)
            .field("notify_on_message", &self.notify_on_message)
            .field("instance_name", &self.instance_name)
            .finish()
    }
}

impl ServerConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let admin_password_hash = get("ADMIN_PASSWORD_HASH")
            .ok_or(ConfigError::Missing("ADMIN_PASSWORD_HASH"))?
            .trim()
            .to_string();
        if !admin_password_hash.starts_with("$argon2") {
            return Err(ConfigError::Invalid {
                var: "ADMIN_PASSWORD_HASH",
                reason: "expected an Argon2 PHC string (see `agora-server hash-password`)".into(),
            });
        }

        let session_secret = get("SESSION_SECRET").ok_or(ConfigError::Missing("SESSION_SECRET"))?;
        if session_secret.chars().count() < MIN_SESSION_SECRET_LENGTH {
            return Err(ConfigError::Invalid {
                var: "SESSION_SECRET",
                reason: format!("must be at least {MIN_SESSION_SECRET_LENGTH} characters"),
            });
        }

        let http_addr = match get("HTTP_ADDR") {
            Some(addr) => parse_var("HTTP_ADDR", &addr)?,
            None => ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
        };

        let session_ttl_hours: i64 = match get("SESSION_TTL_HOURS") {
            Some(v) => parse_var("SESSION_TTL_HOURS", &v)?,
            None => DEFAULT_SESSION_TTL_HOURS,
        };
        if session_ttl_hours <= 0 {
            return Err(ConfigError::Invalid {
                var: "SESSION_TTL_HOURS",
                reason: "must be positive".into(),
            });
        }

        let max_message_length = match get("MAX_MESSAGE_LENGTH") {
            Some(v) => parse_var("MAX_MESSAGE_LENGTH", &v)?,
            None => DEFAULT_MAX_MESSAGE_LENGTH,
        };

        let max_attachment_bytes = match get("MAX_ATTACHMENT_BYTES") {
            Some(v) => parse_var("MAX_ATTACHMENT_BYTES", &v)?,
            None => DEFAULT_MAX_ATTACHMENT_BYTES,
        };

        let telegram = match (get("TELEGRAM_BOT_TOKEN"), get("TELEGRAM_CHAT_ID")) {
            (Some(bot_token), Some(chat_id)) => Some(TelegramConfig {
                bot_token,
                chat_id,
                api_base: get("TELEGRAM_API_BASE")
                    .map(|b| b.trim_end_matches('/').to_string())
                    .unwrap_or_else(|| DEFAULT_TELEGRAM_API_BASE.to_string()),
            }),
            _ => None,
        };

        Ok(Self {
            http_addr,
            database_path: get("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./agora.db")),
            admin_password_hash,
            session_secret,
            session_ttl_hours,
            max_message_length,
            max_attachment_bytes,
            trust_proxy_headers: get("TRUST_PROXY_HEADERS")
                .map(|v| parse_flag(&v))
                .unwrap_or(false),
            telegram,
            notify_on_message: get("NOTIFY_ON_MESSAGE").map(|v| parse_flag(&v)).unwrap_or(true),
            instance_name: get("INSTANCE_NAME").unwrap_or_else(|| APP_NAME.to_string()),
        })
    }

    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.session_ttl_hours)
    }

    pub fn message_limits(&self) -> MessageLimits {
        MessageLimits {
            max_body_chars: self.max_message_length,
            max_attachment_bytes: self.max_attachment_bytes,
        }
    }
}

fn parse_var<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
        var,
        reason: e.to_string(),
    })
}

fn parse_flag(value: &str) -> bool {
    let value = value.trim();
    value != "false" && value != "0"
}
