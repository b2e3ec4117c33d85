//! Library surface for the xdptrace binary and its integration tests.

pub mod errors;
pub mod loader;
pub mod shape;
pub mod stats;
