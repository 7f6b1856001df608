//! Hub error type

use insteon_core::{CacheError, CommandError};
use thiserror::Error;

use crate::transport::TransportError;

/// Errors from talking to the hub
///
/// A command the device never confirms is not an error: verification
/// returns `Ok(false)` and status queries return `Ok(None)`.
#[derive(Error, Debug)]
pub enum HubError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Invalid command: {0}")]
    Command(#[from] CommandError),
    #[error("State cache error: {0}")]
    Cache(#[from] CacheError),
}
