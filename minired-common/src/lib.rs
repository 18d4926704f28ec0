// minired-common - Shared buffer and error definitions for minired
//
// This crate holds the pieces both the reactor and the client depend on.

pub mod buffer;
pub mod error;

// Re-export for convenience
pub use buffer::*;
pub use error::*;
