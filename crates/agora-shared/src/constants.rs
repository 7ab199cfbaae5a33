/// Application name
pub const APP_NAME: &str = "Agora";

/// Display name reserved for the administrator (compared case-insensitively)
pub const RESERVED_ADMIN_NAME: &str = "admin";

/// Default maximum message body length, in characters
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 500;

/// Maximum display name length, in characters
pub const MAX_DISPLAY_NAME_LENGTH: usize = 50;

/// Username length bounds for registered accounts
pub const MIN_USERNAME_LENGTH: usize = 3;
pub const MAX_USERNAME_LENGTH: usize = 32;

/// Credential length bounds for registered accounts
pub const MIN_PASSWORD_LENGTH: usize = 6;
pub const MAX_PASSWORD_LENGTH: usize = 128;

/// Maximum length of a reaction emoji, in characters
pub const MAX_EMOJI_LENGTH: usize = 16;

/// Default maximum attachment payload (5 MiB)
pub const DEFAULT_MAX_ATTACHMENT_BYTES: usize = 5 * 1024 * 1024;

/// Default session lifetime in hours
pub const DEFAULT_SESSION_TTL_HOURS: i64 = 24;

/// Client polling interval in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 3000;

/// Pagination bounds for `GET /messages?page&limit`
pub const DEFAULT_PAGE_LIMIT: u32 = 50;
pub const MAX_PAGE_LIMIT: u32 = 200;

/// Default HTTP API port
pub const DEFAULT_HTTP_PORT: u16 = 3000;

/// Prefix for client-side provisional message ids
pub const PROVISIONAL_ID_PREFIX: &str = "temp-";

/// Key derivation contexts (BLAKE3)
pub const KDF_CONTEXT_SESSION_KEY: &str = "agora-session-signing-key-v1";
