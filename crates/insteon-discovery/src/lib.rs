//! Insteon Discovery - Find the devices linked to a hub
//!
//! Walks the hub modem's ALL-Link database, identifies each device with an
//! ID request and names it through the device catalog.

pub mod links;

pub use links::{
    discover_links, LinkDirectory, LinkEvent, LinkRecord, LinkScanConfig, LinkScanner,
    LinkedDevice,
};
