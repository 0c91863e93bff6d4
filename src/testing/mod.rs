//! Testing utilities and mock implementations
//!
//! Stand-ins for the inference backend, document extraction, web search, and observers so the
//! pipeline can be exercised without network access.

pub mod mocks;

pub use mocks::*;
