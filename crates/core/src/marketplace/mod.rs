//! Marketplace access: authentication, license tickets, published releases.

mod http;
mod types;

pub use http::HttpMarketplace;
pub use types::*;
