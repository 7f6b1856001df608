//! Response correlation
//!
//! The hub gives no request/response pairing. After dispatching a command
//! we poll the buffer until a message from the right device shows up, or
//! give up after a bounded number of attempts. Commands are re-sent
//! periodically in case the first transmission was lost on the powerline.

use insteon_core::command::{self, opcode};
use insteon_core::{DeviceId, HubCommand, Message};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::client::Hub;
use crate::error::HubError;

/// Bounds for one correlation loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
    /// Re-send the command on every attempt divisible by this (0 disables)
    pub redispatch_every: u32,
}

impl RetryPolicy {
    pub fn should_redispatch(&self, attempt: u32) -> bool {
        self.redispatch_every > 0 && attempt % self.redispatch_every == 0
    }
}

/// Category, sub-category and firmware reported by an ID request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub cat: String,
    pub sub_cat: String,
    pub firmware: String,
}

impl DeviceIdentity {
    /// Read the identity out of a device's SET button broadcast
    ///
    /// The "to" address of the broadcast carries the identity bytes.
    pub fn from_broadcast(msg: &Message) -> Option<Self> {
        Some(Self {
            cat: msg.get("id_high")?.to_string(),
            sub_cat: msg.get("id_mid")?.to_string(),
            firmware: msg.get("id_low")?.to_string(),
        })
    }
}

impl Hub {
    /// Dispatch `cmd` and poll until `matcher` accepts a buffered message
    ///
    /// Holds the exchange gate throughout, so no other command or poll on
    /// this hub can clear the reply. Returns `Ok(None)` once the attempts
    /// are used up.
    pub async fn await_response<F>(
        &self,
        cmd: &HubCommand,
        policy: RetryPolicy,
        matcher: F,
    ) -> Result<Option<Message>, HubError>
    where
        F: FnMut(&Message) -> bool,
    {
        let _exchange = self.exclusive().await;
        self.exchange_unlocked(cmd, policy, matcher).await
    }

    /// [`Hub::await_response`] for a caller already holding [`Hub::exclusive`]
    pub(crate) async fn exchange_unlocked<F>(
        &self,
        cmd: &HubCommand,
        policy: RetryPolicy,
        mut matcher: F,
    ) -> Result<Option<Message>, HubError>
    where
        F: FnMut(&Message) -> bool,
    {
        self.dispatch(cmd).await?;

        for attempt in 1..=policy.max_attempts {
            if policy.should_redispatch(attempt) {
                debug!(attempt, command = %cmd, "Re-sending command");
                self.dispatch(cmd).await?;
            }
            tokio::time::sleep(policy.interval).await;

            let snapshot = self.poll().await?;
            if let Some(msg) = snapshot.messages.into_iter().find(|m| matcher(m)) {
                debug!(attempt, raw = %msg.raw, "Matched response");
                return Ok(Some(msg));
            }
            debug!(attempt, max = policy.max_attempts, "No matching response yet");
        }

        Ok(None)
    }

    /// Send a direct command and wait for the device to echo it back
    pub async fn send_and_verify(
        &self,
        device: &DeviceId,
        cmd1: u8,
        cmd2: u8,
        max_attempts: u32,
    ) -> Result<bool, HubError> {
        let cmd = command::direct(device.as_str(), cmd1, cmd2, None)?;
        self.verify(device, &cmd, cmd1, cmd2, max_attempts).await
    }

    /// As [`Hub::send_and_verify`], with an extended payload
    pub async fn send_and_verify_extended(
        &self,
        device: &DeviceId,
        cmd1: u8,
        cmd2: u8,
        data: &[u8],
        max_attempts: u32,
    ) -> Result<bool, HubError> {
        let cmd = command::direct(device.as_str(), cmd1, cmd2, Some(data))?;
        self.verify(device, &cmd, cmd1, cmd2, max_attempts).await
    }

    async fn verify(
        &self,
        device: &DeviceId,
        cmd: &HubCommand,
        cmd1: u8,
        cmd2: u8,
        max_attempts: u32,
    ) -> Result<bool, HubError> {
        info!(
            device = %device,
            cmd1 = %format!("{:02X}", cmd1),
            cmd2 = %format!("{:02X}", cmd2),
            "Sending command"
        );

        let policy = self.retry_policy(max_attempts);
        // Held through the invalidation below
        let _exchange = self.exclusive().await;
        let response = self
            .exchange_unlocked(cmd, policy, |m| m.is_from(device) && m.has_commands(cmd1, cmd2))
            .await?;

        if response.is_none() {
            info!(device = %device, attempts = max_attempts, "No confirmation from device");
            return Ok(false);
        }

        info!(device = %device, "Command confirmed");
        if opcode::is_mutating(cmd1) {
            if let Err(e) = self.invalidate(device) {
                warn!(device = %device, error = %e, "Failed to invalidate cached state");
            }
        }
        Ok(true)
    }

    /// Ask a device for its category, sub-category and firmware
    pub async fn id_request(&self, device: &DeviceId) -> Result<Option<DeviceIdentity>, HubError> {
        let cmd = command::direct(device.as_str(), opcode::ID_REQUEST, 0x00, None)?;
        let policy = self.retry_policy(self.settings().verify_attempts);

        let response = self
            .await_response(&cmd, policy, |m| m.is_from(device) && m.is_broadcast())
            .await?;

        let identity = response.as_ref().and_then(DeviceIdentity::from_broadcast);
        match &identity {
            Some(id) => info!(device = %device, cat = %id.cat, sub_cat = %id.sub_cat, "Device identified"),
            None => info!(device = %device, "No identity response"),
        }
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fast_settings, FakeHub, MemoryStore};
    use insteon_core::{DeviceState, StateStore};
    use std::sync::Arc;

    fn device() -> DeviceId {
        DeviceId::parse("40565B").unwrap()
    }

    fn setup() -> (Arc<FakeHub>, Arc<MemoryStore>, Hub) {
        let fake = Arc::new(FakeHub::new());
        let store = Arc::new(MemoryStore::default());
        let hub = Hub::new(fake.clone(), store.clone(), fast_settings());
        (fake, store, hub)
    }

    #[test]
    fn test_redispatch_schedule() {
        let policy = RetryPolicy {
            max_attempts: 9,
            interval: Duration::from_millis(1),
            redispatch_every: 3,
        };
        let resent: Vec<u32> = (1..=9).filter(|a| policy.should_redispatch(*a)).collect();
        assert_eq!(resent, vec![3, 6, 9]);

        let never = RetryPolicy {
            redispatch_every: 0,
            ..policy
        };
        assert!(!never.should_redispatch(3));
    }

    #[tokio::test]
    async fn test_on_at_75_percent_verifies() {
        let (fake, _, hub) = setup();
        fake.on_command(
            "026240565B0F11BF",
            "026240565B0F11BF06025040565B4A1B2C2F11BF",
        );

        let level = insteon_core::brightness_to_level(75);
        assert_eq!(level, 0xBF);
        assert!(hub.send_and_verify(&device(), 0x11, level, 3).await.unwrap());
        assert_eq!(fake.dispatched(), vec!["026240565B0F11BF"]);
    }

    #[tokio::test]
    async fn test_mismatched_level_fails_after_attempts() {
        let (fake, _, hub) = setup();
        fake.on_command("026240565B0F11BF", "025040565B4A1B2C2F1100");

        assert!(!hub.send_and_verify(&device(), 0x11, 0xBF, 3).await.unwrap());
        // First send plus one re-send on the third attempt
        assert_eq!(fake.dispatched().len(), 2);
    }

    #[tokio::test]
    async fn test_other_device_does_not_match() {
        let (fake, _, hub) = setup();
        fake.on_command("026240565B0F11BF", "02501122334A1B2C2F11BF");

        assert!(!hub.send_and_verify(&device(), 0x11, 0xBF, 2).await.unwrap());
    }

    #[tokio::test]
    async fn test_confirmed_mutation_clears_cache() {
        let (fake, store, hub) = setup();
        let mut state = DeviceState::default();
        let cached = insteon_core::buffer::decode("025040565B4A1B2C2F0080").messages.remove(0);
        state.insert(0x19, 0x00, cached, chrono::Duration::seconds(20), chrono::Utc::now());
        store.write(&device(), &state).unwrap();

        fake.on_command("026240565B0F1300", "025040565B4A1B2C2F1300");
        assert!(hub.send_and_verify(&device(), 0x13, 0x00, 3).await.unwrap());
        assert!(store.read(&device()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_beep_keeps_cache() {
        let (fake, store, hub) = setup();
        let mut state = DeviceState::default();
        let cached = insteon_core::buffer::decode("025040565B4A1B2C2F0080").messages.remove(0);
        state.insert(0x19, 0x00, cached, chrono::Duration::seconds(20), chrono::Utc::now());
        store.write(&device(), &state).unwrap();

        fake.on_command("026240565B0F3000", "025040565B4A1B2C2F3000");
        assert!(hub.send_and_verify(&device(), 0x30, 0x00, 3).await.unwrap());
        assert!(!store.read(&device()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_extended_send_path() {
        let (fake, _, hub) = setup();
        let device = DeviceId::parse("42902E").unwrap();
        fake.on_command(
            "026242902E1F11FF02000000000000000000000000EE",
            "025042902E4A1B2C2F11FF",
        );

        assert!(hub
            .send_and_verify_extended(&device, 0x11, 0xFF, &[0x02], 3)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_id_request_reads_broadcast() {
        let (fake, _, hub) = setup();
        // Broadcast to 01.20.45: dimmer, SwitchLinc, firmware 45
        fake.on_command("026240565B0F1000", "026240565B0F100006025040565B0120458F0100");

        let identity = hub.id_request(&device()).await.unwrap().unwrap();
        assert_eq!(
            identity,
            DeviceIdentity {
                cat: "01".to_string(),
                sub_cat: "20".to_string(),
                firmware: "45".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_id_request_without_reply() {
        let (_, _, hub) = setup();
        assert_eq!(hub.id_request(&device()).await.unwrap(), None);
    }
}
