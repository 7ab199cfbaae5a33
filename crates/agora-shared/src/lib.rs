//! Types shared by the Agora server, store and polling client.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod session;
pub mod types;
pub mod validation;
