//! Client for the upstream read API: a rate-limited HTTP client, the wire
//! types, and the adapters implementing the core source traits.

pub mod api;
pub mod client;
pub mod error;
pub mod types;

#[cfg(test)]
mod test_server;

pub use api::UpstreamApi;
pub use client::RateLimitedClient;
pub use error::{Result, UpstreamError};
