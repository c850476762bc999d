//! `uptime-store` — the shared state the ping orchestrator coordinates through.
//!
//! # Overview
//!
//! Two contracts live here:
//!
//! * [`CoordinationStore`]: a key-value store with single-key atomic
//!   operations, per-key expiry and list-by-prefix. Every piece of
//!   cross-invocation state (locks, cycles, cancellation markers, job
//!   definitions, trigger instants) goes through it.
//! * [`HistoryStore`]: an append-only log of probe results per service with
//!   a retention horizon.
//!
//! | Backend         | Use                                          |
//! |-----------------|----------------------------------------------|
//! | `MemoryStore`   | tests, single-process deployments            |
//! | `SqliteStore`   | shared file, several gateway processes       |
//! | `MemoryHistory` | tests                                        |
//! | `SqliteHistory` | production history with retention purging    |

pub mod db;
pub mod error;
pub mod history;
pub mod kv;
pub mod memory;
pub mod sqlite;

pub use error::{Result, StoreError};
pub use history::HistoryStore;
pub use kv::CoordinationStore;
pub use memory::{MemoryHistory, MemoryStore};
pub use sqlite::{SqliteHistory, SqliteStore};
