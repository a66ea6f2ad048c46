//! # palaver-store
//!
//! Relational storage for palaver, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for the presence
//! tracker (`users` rows) and the message logs (`messages` for the room,
//! `private_messages` for sender/receiver pairs). Every timestamp is taken
//! from the handle's [`palaver_shared::Clock`].

pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod presence;
pub mod private_messages;
pub mod users;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
