//! Core daemon REST client.
//!
//! This module provides a `CoreApi` trait over the daemon's app, instance,
//! job, export and import endpoints, and an HTTP implementation of it.

mod http;
mod types;

pub use http::HttpCoreClient;
pub use types::*;
