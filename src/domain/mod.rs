//! Domain layer for the swarm client
//!
//! This module contains the error taxonomy, domain models, and port traits.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{ClientError, ClientResult, ErrorKind};
