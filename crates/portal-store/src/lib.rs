//! # portal-store
//!
//! Message persistence for the employee portal, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle wrapping a
//! `rusqlite::Connection`. Messages are append-only: they are inserted once
//! and then read back by channel or by conversation pair, newest first.

pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
