//! HTTP client for the engine proxy.
//!
//! Implements both collaborator traits from `commbridge-service-traits`:
//! expression evaluation goes through the proxy's message service endpoint,
//! lifecycle queries through its status and start endpoints.

pub mod client;
pub mod service;

pub use {client::ProxyClient, service::ProxyEngine};
