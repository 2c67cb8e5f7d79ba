//! Shared domain types for the BSS operator dashboard client.

pub mod camera;
pub mod config;
pub mod detection;
pub mod events;
pub mod protocol;
pub mod session;

mod errors;

pub use errors::{BssError, Result};
