//! Cached device status
//!
//! Status requests are slow (several seconds through the hub), so answers
//! are kept in the state store with a short TTL. An expired answer is still
//! returned immediately while a background task fetches a fresh one.

use chrono::Utc;
use insteon_core::command;
use insteon_core::{DeviceId, Lookup, Message, MessageKind, StateStore};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::client::Hub;
use crate::error::HubError;

/// A status response and where it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReading {
    pub response: Message,
    pub from_cache: bool,
    /// Served from an expired entry while a refresh runs
    pub stale: bool,
}

impl StatusReading {
    /// On level (cmd2) for a `19 00` request, LED flags for `19 01`
    pub fn value(&self) -> Option<u8> {
        self.response
            .cmd2()
            .and_then(|v| u8::from_str_radix(v, 16).ok())
    }

    /// ALL-Link database delta, carried in cmd1 of a status response
    pub fn database_delta(&self) -> Option<u8> {
        self.response
            .cmd1()
            .and_then(|v| u8::from_str_radix(v, 16).ok())
    }

    /// Level as a 0-100 percentage
    pub fn percent(&self) -> Option<u8> {
        self.value()
            .map(|level| ((u32::from(level) * 100 + 127) / 255) as u8)
    }
}

/// Releases the refresh lock when the refresh task ends, however it ends
struct RefreshLock(Arc<dyn StateStore>);

impl Drop for RefreshLock {
    fn drop(&mut self) {
        if let Err(e) = self.0.release_lock() {
            warn!(error = %e, "Failed to release refresh lock");
        }
    }
}

impl Hub {
    /// Status for a device, from cache when possible
    ///
    /// `Ok(None)` means the device did not answer; nothing is cached then.
    pub async fn get_status(
        &self,
        device: &DeviceId,
        cmd1: u8,
        cmd2: u8,
    ) -> Result<Option<StatusReading>, HubError> {
        let state = self.store().read(device)?;

        match state.lookup(cmd1, cmd2, Utc::now()) {
            Lookup::Fresh(response) => {
                debug!(device = %device, "Status served from cache");
                return Ok(Some(StatusReading {
                    response: response.clone(),
                    from_cache: true,
                    stale: false,
                }));
            }
            Lookup::Stale(response) => {
                debug!(device = %device, "Cached status expired, refreshing in background");
                self.spawn_refresh(device.clone(), cmd1, cmd2);
                return Ok(Some(StatusReading {
                    response: response.clone(),
                    from_cache: true,
                    stale: true,
                }));
            }
            Lookup::Missing => {}
        }

        info!(device = %device, "No cached status, querying device");
        let response = self.fetch_status(device, cmd1, cmd2).await?;
        Ok(response.map(|response| StatusReading {
            response,
            from_cache: false,
            stale: false,
        }))
    }

    /// Drop every cached response for a device
    pub fn invalidate(&self, device: &DeviceId) -> Result<(), HubError> {
        self.store().clear(device)?;
        debug!(device = %device, "Cleared cached state");
        Ok(())
    }

    /// Query the device and cache its answer
    async fn fetch_status(
        &self,
        device: &DeviceId,
        cmd1: u8,
        cmd2: u8,
    ) -> Result<Option<Message>, HubError> {
        let cmd = command::direct(device.as_str(), cmd1, cmd2, None)?;
        let policy = self.retry_policy(self.settings().status_attempts);

        // Held until the cache write, so a confirmed command cannot be
        // followed by a write of status read before it
        let _exchange = self.exclusive().await;
        let response = self
            .exchange_unlocked(&cmd, policy, |m| {
                m.kind == MessageKind::StandardReceived && m.is_from(device) && m.is_direct_ack()
            })
            .await?;

        let Some(response) = response else {
            info!(device = %device, "No status response");
            return Ok(None);
        };

        let ttl = chrono::Duration::from_std(self.settings().cache_ttl)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let mut state = self.store().read(device)?;
        state.insert(cmd1, cmd2, response.clone(), ttl, Utc::now());
        self.store().write(device, &state)?;

        Ok(Some(response))
    }

    /// Refresh an expired entry on a detached task, unless one is running
    fn spawn_refresh(&self, device: DeviceId, cmd1: u8, cmd2: u8) {
        match self.store().try_acquire_lock() {
            Ok(true) => {}
            Ok(false) => {
                debug!(device = %device, "Refresh already in progress");
                return;
            }
            Err(e) => {
                warn!(device = %device, error = %e, "Could not take refresh lock");
                return;
            }
        }

        let hub = self.clone();
        let lock = RefreshLock(self.store().clone());
        let handle = tokio::spawn(async move {
            let _lock = lock;
            match hub.fetch_status(&device, cmd1, cmd2).await {
                Ok(Some(_)) => debug!(device = %device, "Background refresh complete"),
                Ok(None) => debug!(device = %device, "Background refresh got no response"),
                Err(e) => warn!(device = %device, error = %e, "Background refresh failed"),
            }
        });
        self.track_refresh(handle);
    }
}
