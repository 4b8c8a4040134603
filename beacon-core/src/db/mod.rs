//! Durable local state
//!
//! This module provides the storage layer using SQLite with:
//! - Schema migrations
//! - A key-value store trait with SQLite and in-memory implementations

pub mod schema;
pub mod store;

pub use store::{KeyValueStore, MemoryStore, SqliteStore};
