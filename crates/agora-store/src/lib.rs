//! # agora-store
//!
//! SQLite persistence for the Agora chat service.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed operations for every domain
//! record: users and their achievements, the ordered message log with its
//! reactions, the block list, the append-only audit log and message
//! tombstones. Callers that share one handle across tasks serialize access
//! to it; multi-step updates go through [`Database::atomically`].

pub mod audit;
pub mod blocklist;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod reactions;
pub mod users;

mod error;
mod rows;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
