//! HTTP request handlers.
//!
//! Handlers are thin: extract the caller and inputs, call one
//! [`CareService`](curare_runtime::CareService) operation, serialize the
//! result. Domain errors become [`AppError`](crate::AppError) responses.

pub mod admin;
pub mod care_requests;
pub mod catalog;
pub mod feed;
pub mod health;
pub mod metrics;
pub mod provider;
