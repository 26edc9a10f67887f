//! `PostgreSQL` request store for Curare.
//!
//! This crate provides the production implementation of the
//! [`RequestStore`](curare_core::store::RequestStore) and
//! [`CatalogStore`](curare_core::store::CatalogStore) traits from
//! `curare-core`. It uses sqlx and supports:
//!
//! - Atomic submission (request, case patients and symptoms in one transaction)
//! - Guarded transitions as single conditional `UPDATE`s
//! - Read-your-writes: the post-write aggregate is read in the same transaction
//! - Durable per-provider dismissals
//! - Embedded migrations (`migrations/`)
//!
//! # Example
//!
//! ```no_run
//! use curare_postgres::PostgresRequestStore;
//! use curare_core::store::RequestStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresRequestStore::connect("postgres://localhost/curare").await?;
//!     store.migrate().await?;
//!     let waiting = store.find_unclaimed(20, None).await?;
//!     println!("{} requests waiting", waiting.len());
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod catalog;
mod rows;
mod store;

pub use store::PostgresRequestStore;
