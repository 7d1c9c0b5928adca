//! # Curator Core
//!
//! Shared, runtime-agnostic logic for Curator: data models, the store
//! abstraction, and the exclusion filter that keeps recommendation batches
//! disjoint from the library and from recent history.
//!
//! This crate contains no tokio, sqlx, or HTTP dependencies.

pub mod exclusion;
pub mod models;
pub mod store;
