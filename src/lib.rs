//! TRON deposit balancer
//!
//! Consumes sweep requests from the broker and moves user deposits to the
//! admin wallet, topping up fee currency when an address cannot pay.

pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod queue;
pub mod recovery;
pub mod sweep;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
