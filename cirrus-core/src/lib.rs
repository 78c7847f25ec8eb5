//! Cirrus Core
//!
//! Core library for reconciling declared infrastructure against a cloud API:
//! the resource model, the provider trait, attribute schemas, per-parent
//! locking and polling for asynchronous operations.

pub mod lock;
pub mod provider;
pub mod resource;
pub mod schema;
pub mod wait;
