//! Port trait definitions (Hexagonal Architecture)
//!
//! - Transport: persistent duplex channel to the orchestration service
//! - RequestTransport: one-request-per-operation fallback
//! - MemorySink: persistence for exported swarm memory

pub mod memory_sink;
pub mod transport;

pub use memory_sink::MemorySink;
pub use transport::{Duplex, RequestTransport, Transport};
