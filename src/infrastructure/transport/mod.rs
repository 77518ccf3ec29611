//! Transport adapters
//!
//! - WebSocket: persistent socket channel
//! - HTTP: one request per operation fallback
//! - Mock: in-process test double

pub mod http;
pub mod mock;
pub mod websocket;

pub use http::HttpRequestTransport;
pub use mock::{MockReply, MockTransport, RecordedCall};
pub use websocket::WebSocketTransport;
