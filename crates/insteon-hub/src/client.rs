//! Hub client: dispatch commands and read the response buffer

use insteon_core::buffer::{self, BufferSnapshot};
use insteon_core::{command, DeviceId, HubCommand, StateStore};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::correlate::RetryPolicy;
use crate::error::HubError;
use crate::transport::Transport;

/// Timing knobs for correlation and caching
#[derive(Debug, Clone)]
pub struct HubSettings {
    /// Sleep between buffer polls
    pub poll_interval: Duration,
    /// Poll attempts when confirming a command
    pub verify_attempts: u32,
    /// Poll attempts when fetching a status response
    pub status_attempts: u32,
    /// Re-send the command every this many attempts (0 disables)
    pub redispatch_every: u32,
    /// How long a cached status response stays fresh
    pub cache_ttl: Duration,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            verify_attempts: 3,
            status_attempts: 9,
            redispatch_every: 3,
            cache_ttl: Duration::from_secs(20),
        }
    }
}

/// Handle to one hub
///
/// Cheap to clone; clones share the transport and state store.
#[derive(Clone)]
pub struct Hub {
    transport: Arc<dyn Transport>,
    store: Arc<dyn StateStore>,
    settings: HubSettings,
    /// Held for a whole dispatch-to-last-poll exchange
    exchange: Arc<AsyncMutex<()>>,
    refreshes: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Hub {
    pub fn new(transport: Arc<dyn Transport>, store: Arc<dyn StateStore>, settings: HubSettings) -> Self {
        Self {
            transport,
            store,
            settings,
            exchange: Arc::new(AsyncMutex::new(())),
            refreshes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn settings(&self) -> &HubSettings {
        &self.settings
    }

    pub(crate) fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Exclusive use of the hub buffer
    ///
    /// Every poll clears the buffer, so one exchange must finish before the
    /// next command goes out. While holding it use `dispatch` and `poll`
    /// directly; the correlating methods take it themselves.
    pub async fn exclusive(&self) -> AsyncMutexGuard<'_, ()> {
        self.exchange.lock().await
    }

    pub(crate) fn track_refresh(&self, handle: JoinHandle<()>) {
        let mut refreshes = self.refreshes.lock().unwrap_or_else(PoisonError::into_inner);
        refreshes.retain(|h| !h.is_finished());
        refreshes.push(handle);
    }

    /// Wait for background status refreshes started through this hub
    ///
    /// Refreshes run detached; a short-lived process calls this before
    /// exiting so they are not cancelled with the runtime.
    pub async fn wait_for_refreshes(&self) {
        let handles = std::mem::take(
            &mut *self.refreshes.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background refresh task failed");
            }
        }
    }

    /// Retry policy with this hub's interval and re-dispatch period
    pub fn retry_policy(&self, max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            interval: self.settings.poll_interval,
            redispatch_every: self.settings.redispatch_every,
        }
    }

    /// Send a request and return the response body
    pub async fn dispatch(&self, cmd: &HubCommand) -> Result<String, HubError> {
        debug!(command = %cmd, "Dispatching");
        let response = self.transport.execute(cmd.method, &cmd.path).await?;
        Ok(response.body)
    }

    /// Send a standard direct command without waiting for a reply
    pub async fn direct_command(&self, device: &DeviceId, cmd1: u8, cmd2: u8) -> Result<(), HubError> {
        let cmd = command::direct(device.as_str(), cmd1, cmd2, None)?;
        info!(device = %device, cmd1 = %format!("{:02X}", cmd1), cmd2 = %format!("{:02X}", cmd2), "Direct command");
        self.dispatch(&cmd).await?;
        Ok(())
    }

    /// Broadcast a scene command to an ALL-Link group
    pub async fn scene_command(&self, group: u8, cmd: u8) -> Result<(), HubError> {
        info!(group, cmd = %format!("{:02X}", cmd), "Scene command");
        self.dispatch(&command::scene(group, cmd)).await?;
        Ok(())
    }

    /// Read and decode the buffer without clearing it
    pub async fn read_buffer(&self) -> Result<BufferSnapshot, HubError> {
        let body = self.dispatch(&command::read_buffer()).await?;
        Ok(buffer::decode_response(&body))
    }

    pub async fn clear_buffer(&self) -> Result<(), HubError> {
        self.dispatch(&command::clear_buffer()).await?;
        Ok(())
    }

    /// Read, decode, then clear the buffer
    ///
    /// Each message is returned by exactly one poll.
    pub async fn poll(&self) -> Result<BufferSnapshot, HubError> {
        let snapshot = self.read_buffer().await?;
        self.clear_buffer().await?;
        debug!(
            messages = snapshot.messages.len(),
            success = snapshot.success,
            "Polled hub buffer"
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fast_settings, FakeHub, MemoryStore};
    use insteon_core::{Method, MessageKind};

    fn hub(fake: &Arc<FakeHub>) -> Hub {
        Hub::new(fake.clone(), Arc::new(MemoryStore::default()), fast_settings())
    }

    #[tokio::test]
    async fn test_poll_reads_then_clears() {
        let fake = Arc::new(FakeHub::new());
        fake.push_buffer("026906");
        let hub = hub(&fake);

        let snapshot = hub.poll().await.unwrap();
        assert_eq!(snapshot.messages.len(), 1);
        assert_eq!(snapshot.messages[0].kind, MessageKind::GetFirstAllLink);
        assert!(fake.buffer().is_empty());

        let requests = fake.requests();
        assert_eq!(requests[0].method, Method::Get);
        assert_eq!(requests[0].path, "/buffstatus.xml");
        assert_eq!(requests[1].path, "/1?XB=M=1");

        let snapshot = hub.poll().await.unwrap();
        assert!(!snapshot.success);
        assert_eq!(snapshot.message, "Empty buffer");
    }

    #[tokio::test]
    async fn test_direct_and_scene_paths() {
        let fake = Arc::new(FakeHub::new());
        let hub = hub(&fake);
        let device = DeviceId::parse("40565b").unwrap();

        hub.direct_command(&device, 0x11, 0xBF).await.unwrap();
        hub.scene_command(1, 0x13).await.unwrap();

        assert_eq!(fake.dispatched(), vec!["026240565B0F11BF", "1301"]);
    }

    #[tokio::test]
    async fn test_transport_failure_propagates() {
        let fake = Arc::new(FakeHub::new());
        fake.fail_with_status(Some(503));
        let hub = hub(&fake);

        let err = hub.poll().await.unwrap_err();
        assert!(matches!(err, HubError::Transport(_)));
    }
}
