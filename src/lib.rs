//! # Curator
//!
//! Resolution and deduplication engine for generated media recommendations.
//!
//! A generative source proposes loose `{title, year, medium}` candidates
//! per category. Curator resolves each one to a canonical catalog id,
//! drops anything already in the library or recommended under the same
//! category within the exclusion window, enriches the survivors with
//! catalog metadata, and records what was shown so later batches stay
//! disjoint from earlier ones.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────┐   ┌───────────┐   ┌──────────┐
//! │ Generator │──▶│ Resolver │──▶│ Exclusion │──▶│  Output  │
//! │  (chat)   │   │  (TMDb)  │   │  filter   │   │ + history│
//! └───────────┘   └────┬─────┘   └─────┬─────┘   └────┬─────┘
//!                      │  cache        │ inventory    │
//!                      ▼               ▼              ▼
//!                 ┌─────────────────────────────────────────┐
//!                 │                 SQLite                  │
//!                 └─────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite [`Store`](curator_core::store::Store) |
//! | [`error`] | Provider error taxonomy |
//! | [`catalog`] | Catalog metadata provider (TMDb) |
//! | [`resolver`] | Metadata resolver with cache |
//! | [`pipeline`] | Per-category resolution pipeline |
//! | [`inventory`] | Library inventory provider (Plex) |
//! | [`generator`] | Generative candidate source |
//! | [`watch_history`] | Watch history taste profile (Tautulli) |
//! | [`batch`] | Batch runner and single-batch guard |
//! | [`server`] | HTTP status surface |
//! | [`status`] | CLI status and history output |

pub mod batch;
pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod generator;
pub mod http;
pub mod inventory;
pub mod migrate;
pub mod pipeline;
pub mod resolver;
pub mod server;
pub mod sqlite_store;
pub mod status;
pub mod watch_history;

pub use curator_core::exclusion;
pub use curator_core::models;
pub use curator_core::store;
