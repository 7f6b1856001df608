//! Insteon Core - Protocol types for talking to an Insteon Hub
//!
//! This crate holds everything that does not need the network:
//! - Command encoding into hub request paths
//! - PLM message layouts and hub buffer decoding
//! - Device catalog (category/sub-category to model name)
//! - Persisted per-device status cache and refresh lock

pub mod buffer;
pub mod catalog;
pub mod command;
pub mod device;
pub mod message;
pub mod state;

pub use buffer::{BufferSnapshot, DecodeError};
pub use catalog::{Catalog, CatalogError, CategoryInfo, ModelInfo};
pub use command::{brightness_to_hex, brightness_to_level, CommandError, HubCommand, Method};
pub use device::DeviceId;
pub use message::{Message, MessageKind};
pub use state::{CacheEntry, CacheError, DeviceState, FileStateStore, Lookup, StateStore};
