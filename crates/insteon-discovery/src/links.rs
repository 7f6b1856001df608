//! Link discovery
//!
//! The hub's modem keeps an ALL-Link database of every device linked to it.
//! Reading it is a cursor walk: `0269` fetches the first record, `026A` each
//! following one, and the modem NAKs once the table is exhausted. Every
//! record arrives as an ALL-Link Record Response (`0257`). Devices are then
//! identified with an ID request and named through the catalog.

use insteon_core::catalog::UNKNOWN;
use insteon_core::command::{self, hub_cmd};
use insteon_core::{Catalog, DeviceId, Message, MessageKind};
use insteon_hub::{DeviceIdentity, Hub, HubError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Upper bound on records read in one walk
pub const DEFAULT_MAX_RECORDS: usize = 1024;

/// One entry of the modem's ALL-Link database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRecord {
    pub device: DeviceId,
    pub group: u8,
    pub flags: u8,
    pub link_data: [u8; 3],
}

impl LinkRecord {
    /// Parse a `0257` message
    pub fn from_message(msg: &Message) -> Option<Self> {
        if msg.kind != MessageKind::AllLinkRecord {
            return None;
        }
        let byte = |name: &str| msg.get(name).and_then(|v| u8::from_str_radix(v, 16).ok());

        let device = DeviceId::from_parts(msg.get("id_high")?, msg.get("id_mid")?, msg.get("id_low")?).ok()?;
        Some(Self {
            device,
            group: byte("group")?,
            flags: byte("flags")?,
            link_data: [byte("link_data_1")?, byte("link_data_2")?, byte("link_data_3")?],
        })
    }

    /// The hub controls this device for the group (flags bit 6)
    pub fn is_controller(&self) -> bool {
        self.flags & 0x40 != 0
    }
}

/// A linked device and what the catalog says about it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedDevice {
    pub cat: String,
    pub sub_cat: String,
    pub cat_name: String,
    pub cat_type: String,
    pub model_name: String,
    pub sku: String,
    /// Groups the device appears in, in discovery order
    pub groups: Vec<u8>,
}

impl LinkedDevice {
    fn describe(identity: Option<&DeviceIdentity>, catalog: &Catalog) -> Self {
        let Some(identity) = identity else {
            return Self::unknown();
        };

        let category = catalog.lookup_category(&identity.cat, &identity.sub_cat);
        let model = catalog.lookup_model(&identity.cat, &identity.sub_cat, None);

        Self {
            cat: identity.cat.clone(),
            sub_cat: identity.sub_cat.clone(),
            cat_name: category.map_or_else(|| UNKNOWN.to_string(), |c| c.name.clone()),
            cat_type: category.map_or_else(|| UNKNOWN.to_string(), |c| c.kind.clone()),
            model_name: model.map_or_else(|| UNKNOWN.to_string(), |m| m.name.clone()),
            sku: model.map_or_else(|| UNKNOWN.to_string(), |m| m.sku.clone()),
            groups: Vec::new(),
        }
    }

    fn unknown() -> Self {
        Self {
            cat: UNKNOWN.to_string(),
            sub_cat: UNKNOWN.to_string(),
            cat_name: UNKNOWN.to_string(),
            cat_type: UNKNOWN.to_string(),
            model_name: UNKNOWN.to_string(),
            sku: UNKNOWN.to_string(),
            groups: Vec::new(),
        }
    }
}

/// Every linked device, keyed by id
pub type LinkDirectory = BTreeMap<DeviceId, LinkedDevice>;

/// Progress of a walk
#[derive(Debug, Clone)]
pub enum LinkEvent {
    ScanStarted,
    /// First record seen for a device
    DeviceFound { id: DeviceId, device: LinkedDevice },
    /// A further record for a known device
    GroupAdded { id: DeviceId, group: u8 },
    ScanCompleted { devices: usize, records: usize },
}

#[derive(Debug, Clone)]
pub struct LinkScanConfig {
    /// Polls to wait for the modem to echo each record request
    pub echo_attempts: u32,
    pub max_records: usize,
}

impl Default for LinkScanConfig {
    fn default() -> Self {
        Self {
            echo_attempts: 3,
            max_records: DEFAULT_MAX_RECORDS,
        }
    }
}

/// Outcome of one get-first / get-next request
struct RecordBatch {
    records: Vec<LinkRecord>,
    /// The modem acknowledged, so there may be further records
    more: bool,
}

/// Walks the hub's ALL-Link database
pub struct LinkScanner {
    hub: Hub,
    catalog: Catalog,
    config: LinkScanConfig,
    event_tx: broadcast::Sender<LinkEvent>,
}

impl LinkScanner {
    pub fn new(hub: Hub, catalog: Catalog, config: LinkScanConfig) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            hub,
            catalog,
            config,
            event_tx,
        }
    }

    /// Subscribe to scan progress
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: LinkEvent) {
        // No receivers is fine
        let _ = self.event_tx.send(event);
    }

    /// Read the whole database and identify each device
    pub async fn scan(&self) -> Result<LinkDirectory, HubError> {
        info!("Reading hub ALL-Link database");
        self.emit(LinkEvent::ScanStarted);

        let mut directory = LinkDirectory::new();
        let mut records = 0;
        let mut request = hub_cmd::GET_FIRST_ALL_LINK;

        loop {
            let batch = self.request_record(request).await?;
            for record in batch.records {
                records += 1;
                self.add_record(&mut directory, record).await;
            }

            if !batch.more {
                break;
            }
            if records >= self.config.max_records {
                warn!(records, "Record limit reached, stopping walk");
                break;
            }
            request = hub_cmd::GET_NEXT_ALL_LINK;
        }

        info!(devices = directory.len(), records, "ALL-Link database read");
        self.emit(LinkEvent::ScanCompleted {
            devices: directory.len(),
            records,
        });
        Ok(directory)
    }

    /// Send one record request and collect what it produces
    async fn request_record(&self, request: u16) -> Result<RecordBatch, HubError> {
        let echo_kind = if request == hub_cmd::GET_FIRST_ALL_LINK {
            MessageKind::GetFirstAllLink
        } else {
            MessageKind::GetNextAllLink
        };

        let _exchange = self.hub.exclusive().await;
        self.hub.dispatch(&command::hub_direct(request)).await?;

        let policy = self.hub.retry_policy(self.config.echo_attempts);
        let mut records = Vec::new();
        let mut acked = false;

        for attempt in 1..=policy.max_attempts {
            tokio::time::sleep(policy.interval).await;
            let snapshot = self.hub.poll().await?;

            records.extend(snapshot.messages.iter().filter_map(LinkRecord::from_message));

            match snapshot.echo(echo_kind) {
                Some(echo) if echo.is_nak() => {
                    debug!(request = %format!("{:04X}", request), "End of ALL-Link database");
                    return Ok(RecordBatch {
                        records,
                        more: false,
                    });
                }
                Some(_) => acked = true,
                None => {}
            }

            if acked && !records.is_empty() {
                break;
            }
            debug!(attempt, acked, "Waiting for ALL-Link record");
        }

        if !acked {
            warn!(request = %format!("{:04X}", request), "Hub did not answer record request");
        }
        Ok(RecordBatch {
            records,
            more: acked,
        })
    }

    async fn add_record(&self, directory: &mut LinkDirectory, record: LinkRecord) {
        debug!(
            device = %record.device,
            group = record.group,
            controller = record.is_controller(),
            "ALL-Link record"
        );

        if let Some(device) = directory.get_mut(&record.device) {
            if !device.groups.contains(&record.group) {
                device.groups.push(record.group);
                self.emit(LinkEvent::GroupAdded {
                    id: record.device.clone(),
                    group: record.group,
                });
            }
            return;
        }

        let identity = match self.hub.id_request(&record.device).await {
            Ok(identity) => identity,
            Err(e) => {
                warn!(device = %record.device, error = %e, "ID request failed");
                None
            }
        };

        let mut device = LinkedDevice::describe(identity.as_ref(), &self.catalog);
        device.groups.push(record.group);
        info!(
            device = %record.device,
            group = record.group,
            cat_type = %device.cat_type,
            model = %device.model_name,
            "Found linked device"
        );

        self.emit(LinkEvent::DeviceFound {
            id: record.device.clone(),
            device: device.clone(),
        });
        directory.insert(record.device, device);
    }
}

/// Read the hub's ALL-Link database with default settings
pub async fn discover_links(hub: &Hub, catalog: &Catalog) -> Result<LinkDirectory, HubError> {
    LinkScanner::new(hub.clone(), catalog.clone(), LinkScanConfig::default())
        .scan()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use insteon_hub::testing::{fast_settings, FakeHub, MemoryStore};
    use std::sync::Arc;

    fn hub(fake: &Arc<FakeHub>) -> Hub {
        Hub::new(fake.clone(), Arc::new(MemoryStore::default()), fast_settings())
    }

    fn id(s: &str) -> DeviceId {
        DeviceId::parse(s).unwrap()
    }

    #[test]
    fn test_record_from_message() {
        let snapshot = insteon_core::buffer::decode("0257E20140565B012045");
        let record = LinkRecord::from_message(&snapshot.messages[0]).unwrap();
        assert_eq!(record.device, id("40565B"));
        assert_eq!(record.group, 1);
        assert_eq!(record.link_data, [0x01, 0x20, 0x45]);
        assert!(record.is_controller());

        let echo = insteon_core::buffer::decode("026906");
        assert!(LinkRecord::from_message(&echo.messages[0]).is_none());
    }

    #[tokio::test]
    async fn test_walk_merges_groups() {
        let fake = Arc::new(FakeHub::new());
        fake.on_command("0269", "0269060257E20140565B012045");
        fake.on_command("026A", "026A060257E20042902E012E41");
        fake.on_command("026A", "026A060257A20240565B012045");
        fake.on_command("026A", "026A15");
        fake.on_command("026240565B0F1000", "025040565B0120458F0100");
        fake.on_command("026242902E0F1000", "025042902E012E418F0100");

        let directory = discover_links(&hub(&fake), &Catalog::builtin()).await.unwrap();
        assert_eq!(directory.len(), 2);

        let dimmer = &directory[&id("40565B")];
        assert_eq!(dimmer.groups, vec![1, 2]);
        assert_eq!(dimmer.cat, "01");
        assert_eq!(dimmer.cat_type, "dimmer");
        assert_eq!(dimmer.model_name, "SwitchLinc Dimmer (Dual-Band)");
        assert_eq!(dimmer.sku, "2477D");

        let fan = &directory[&id("42902E")];
        assert_eq!(fan.groups, vec![0]);
        assert_eq!(fan.model_name, "FanLinc");

        // One identity query per device, not per record
        let id_requests = fake
            .dispatched()
            .into_iter()
            .filter(|hex| hex.ends_with("0F1000"))
            .count();
        assert_eq!(id_requests, 2);
    }

    #[tokio::test]
    async fn test_identity_failure_records_unknown() {
        let fake = Arc::new(FakeHub::new());
        fake.on_command("0269", "0269060257E20140565B012045");
        fake.on_command("026A", "026A15");

        let directory = discover_links(&hub(&fake), &Catalog::builtin()).await.unwrap();
        let device = &directory[&id("40565B")];
        assert_eq!(device.model_name, UNKNOWN);
        assert_eq!(device.cat_name, UNKNOWN);
        assert_eq!(device.groups, vec![1]);
    }

    #[tokio::test]
    async fn test_empty_database() {
        let fake = Arc::new(FakeHub::new());
        fake.on_command("0269", "026915");

        let directory = discover_links(&hub(&fake), &Catalog::builtin()).await.unwrap();
        assert!(directory.is_empty());
        assert_eq!(fake.dispatched(), vec!["0269"]);
    }

    #[tokio::test]
    async fn test_silent_hub_ends_walk() {
        let fake = Arc::new(FakeHub::new());
        let directory = discover_links(&hub(&fake), &Catalog::builtin()).await.unwrap();
        assert!(directory.is_empty());
    }

    #[tokio::test]
    async fn test_events_are_published() {
        let fake = Arc::new(FakeHub::new());
        fake.on_command("0269", "0269060257E20140565B012045");
        fake.on_command("026A", "026A15");

        let scanner = LinkScanner::new(hub(&fake), Catalog::builtin(), LinkScanConfig::default());
        let mut events = scanner.subscribe();
        scanner.scan().await.unwrap();

        assert!(matches!(events.recv().await.unwrap(), LinkEvent::ScanStarted));
        assert!(matches!(events.recv().await.unwrap(), LinkEvent::DeviceFound { .. }));
        assert!(matches!(
            events.recv().await.unwrap(),
            LinkEvent::ScanCompleted { devices: 1, records: 1 }
        ));
    }

    #[test]
    fn test_directory_serializes() {
        let mut directory = LinkDirectory::new();
        let mut device = LinkedDevice::unknown();
        device.groups.push(1);
        directory.insert(id("40565B"), device);

        let json = serde_json::to_value(&directory).unwrap();
        assert_eq!(json["40565B"]["groups"][0], 1);
        assert_eq!(json["40565B"]["sku"], "unknown");
    }
}
