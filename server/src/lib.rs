//! Curare care-request API server.
//!
//! Wires the `PostgreSQL` store, the care service and the Axum router
//! together. Configuration comes from the environment; see [`Config`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;

pub use config::Config;
