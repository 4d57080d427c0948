//! Parley storage crate - SQLite persistence for recorded user reactions.
//!
//! Provides a WAL-mode SQLite database with migrations and an append-only
//! repository for feedback, UI events, translation requests and leads.

pub mod db;
pub mod migrations;
pub mod repository;

pub use db::Database;
pub use repository::RecordRepository;
