//! HTTP and WebSocket surface
//!
//! A warp server exposing run submission, status, clarification, the live event stream, and the
//! health/metrics endpoints. Handlers only talk to the orchestrator and the run registry.

pub mod http;
pub mod websocket;

pub use http::{routes, serve, ApiState};
pub use websocket::TerminalMessage;
