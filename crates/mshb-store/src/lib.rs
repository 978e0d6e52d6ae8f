//! # mshb-store
//!
//! The platform's relational tables and RPC functions, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for every table. Every
//! write is also published as a [`RowChange`](mshb_shared::types::RowChange)
//! on a broadcast channel so realtime subscribers can react to it.
//! Object storage buckets live in [`storage`].

pub mod assets;
pub mod channels;
pub mod database;
pub mod friendships;
pub mod invites;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod profiles;
pub mod reactions;
pub mod read_status;
pub mod rpc;
pub mod servers;
pub mod storage;
pub mod subscriptions;
pub mod threads;
pub mod voice;

mod error;
mod rows;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
pub use rows::{now, ts};
pub use storage::BucketStore;
