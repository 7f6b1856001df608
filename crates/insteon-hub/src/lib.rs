//! Insteon Hub - Async client for the Insteon Hub's local HTTP interface
//!
//! This crate sends commands to the hub and matches them against what
//! shows up in its response buffer:
//! - HTTP transport with basic auth
//! - Buffer polling and response correlation with bounded retries
//! - Cached device status with background refresh
//! - Thin wrappers per device type

pub mod client;
pub mod correlate;
pub mod devices;
pub mod error;
pub mod status;
pub mod transport;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use client::{Hub, HubSettings};
pub use correlate::{DeviceIdentity, RetryPolicy};
pub use devices::{Dimmer, Fan, FanSpeed, Group, OnOffOutlet, Ramp, Socket, Switch};
pub use error::HubError;
pub use status::StatusReading;
pub use transport::{HttpTransport, HubAddress, Transport, TransportError, TransportResponse};
