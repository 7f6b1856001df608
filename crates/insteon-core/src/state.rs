//! Persisted device state
//!
//! Status responses are cached per device in a JSON blob
//! (`<DEVICEID>.state`) so that repeated status queries, including ones from
//! separate processes, do not each cost a round trip through the hub.
//! Entries carry an absolute expiry. A single advisory lock file guards the
//! background refresh so only one refresh runs at a time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::device::DeviceId;
use crate::message::Message;

/// Age after which a refresh lock is considered abandoned
pub const DEFAULT_LOCK_STALE_AFTER: Duration = Duration::from_secs(60);

const LOCK_FILE: &str = "commands.lock";

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Corrupt state for {device}: {reason}")]
    Corrupt { device: DeviceId, reason: String },
}

/// A cached status response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub expires_at: DateTime<Utc>,
    pub response: Message,
}

/// Result of looking up a cache key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup<'a> {
    Fresh(&'a Message),
    Stale(&'a Message),
    Missing,
}

/// All cached responses for one device, keyed by `cmd1 + cmd2`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceState {
    #[serde(default)]
    pub entries: BTreeMap<String, CacheEntry>,
}

impl DeviceState {
    pub fn key(cmd1: u8, cmd2: u8) -> String {
        format!("{:02X}{:02X}", cmd1, cmd2)
    }

    pub fn lookup(&self, cmd1: u8, cmd2: u8, now: DateTime<Utc>) -> Lookup<'_> {
        match self.entries.get(&Self::key(cmd1, cmd2)) {
            Some(entry) if entry.expires_at > now => Lookup::Fresh(&entry.response),
            Some(entry) => Lookup::Stale(&entry.response),
            None => Lookup::Missing,
        }
    }

    pub fn insert(
        &mut self,
        cmd1: u8,
        cmd2: u8,
        response: Message,
        ttl: chrono::Duration,
        now: DateTime<Utc>,
    ) {
        self.entries.insert(
            Self::key(cmd1, cmd2),
            CacheEntry {
                expires_at: now + ttl,
                response,
            },
        );
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Storage for per-device state and the refresh lock
pub trait StateStore: Send + Sync {
    /// Load a device's state; a device never written reads as empty
    fn read(&self, device: &DeviceId) -> Result<DeviceState, CacheError>;

    fn write(&self, device: &DeviceId, state: &DeviceState) -> Result<(), CacheError>;

    /// Drop every entry for a device
    fn clear(&self, device: &DeviceId) -> Result<(), CacheError> {
        self.write(device, &DeviceState::default())
    }

    /// Take the refresh lock. `Ok(false)` means a refresh is in progress.
    fn try_acquire_lock(&self) -> Result<bool, CacheError>;

    fn release_lock(&self) -> Result<(), CacheError>;
}

/// State files in a directory, one per device
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
    lock_stale_after: Duration,
}

impl FileStateStore {
    /// Open a store rooted at `dir`, creating the directory if needed
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            lock_stale_after: DEFAULT_LOCK_STALE_AFTER,
        })
    }

    pub fn with_lock_stale_after(mut self, age: Duration) -> Self {
        self.lock_stale_after = age;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn state_path(&self, device: &DeviceId) -> PathBuf {
        self.dir.join(format!("{}.state", device))
    }

    pub fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    fn parse(device: &DeviceId, content: &str) -> Result<DeviceState, CacheError> {
        serde_json::from_str(content).map_err(|e| CacheError::Corrupt {
            device: device.clone(),
            reason: e.to_string(),
        })
    }

    fn create_lock(&self) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.lock_path())?;
        writeln!(file, "{} {}", std::process::id(), Utc::now().to_rfc3339())?;
        Ok(())
    }

    fn lock_age(&self) -> std::io::Result<Duration> {
        let modified = std::fs::metadata(self.lock_path())?.modified()?;
        Ok(SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO))
    }
}

impl StateStore for FileStateStore {
    fn read(&self, device: &DeviceId) -> Result<DeviceState, CacheError> {
        let content = match std::fs::read_to_string(self.state_path(device)) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(DeviceState::default()),
            Err(e) => return Err(e.into()),
        };

        match Self::parse(device, &content) {
            Ok(state) => Ok(state),
            Err(e) => {
                warn!(device = %device, error = %e, "Discarding corrupt device state");
                let empty = DeviceState::default();
                self.write(device, &empty)?;
                Ok(empty)
            }
        }
    }

    fn write(&self, device: &DeviceId, state: &DeviceState) -> Result<(), CacheError> {
        let content = serde_json::to_string_pretty(state)?;
        let tmp = self.dir.join(format!(".{}.{}.tmp", device, Uuid::new_v4()));
        std::fs::write(&tmp, content)?;
        if let Err(e) = std::fs::rename(&tmp, self.state_path(device)) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    fn try_acquire_lock(&self) -> Result<bool, CacheError> {
        match self.create_lock() {
            Ok(()) => return Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e.into()),
        }

        let age = match self.lock_age() {
            Ok(age) => age,
            // Released between our attempt and the metadata read
            Err(e) if e.kind() == ErrorKind::NotFound => Duration::MAX,
            Err(e) => return Err(e.into()),
        };
        if age < self.lock_stale_after {
            debug!(age_secs = age.as_secs(), "Refresh lock held");
            return Ok(false);
        }

        warn!(age_secs = age.as_secs(), "Taking over abandoned refresh lock");
        match std::fs::remove_file(self.lock_path()) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        match self.create_lock() {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn release_lock(&self) -> Result<(), CacheError> {
        match std::fs::remove_file(self.lock_path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
