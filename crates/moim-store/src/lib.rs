//! # moim-store
//!
//! Local persistence for the moim client, backed by SQLite.
//!
//! Holds the process-wide notification list and the client settings. The
//! crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for every record.

pub mod database;
pub mod migrations;
pub mod models;
pub mod notifications;
pub mod settings;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
