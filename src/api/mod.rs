//! Operator HTTP surface: usage, emergency stop, cache control, metrics.

pub mod rest;
pub mod websocket;

pub use rest::{create_router, ApiState};
