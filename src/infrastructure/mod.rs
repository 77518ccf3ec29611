//! Infrastructure layer
//!
//! Adapters implementing the domain ports, plus configuration and logging.

pub mod config;
pub mod logging;
pub mod persistence;
pub mod transport;

pub use persistence::InMemorySink;
