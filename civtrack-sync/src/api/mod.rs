//! HTTP API handlers

pub mod health;
pub mod sse;
pub mod sync;

pub use health::health_routes;
pub use sse::sync_event_stream;
pub use sync::sync_routes;
