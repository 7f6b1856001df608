//! In-memory stand-ins for a hub and a state store
//!
//! `FakeHub` behaves like the hub's HTTP interface closely enough for the
//! correlation loops: commands are recorded, scripted replies are appended
//! to a buffer, `buffstatus.xml` serves that buffer and `XB=M=1` empties it.

use async_trait::async_trait;
use insteon_core::{CacheError, DeviceId, DeviceState, HubCommand, Method, StateStore};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::client::HubSettings;
use crate::transport::{Transport, TransportError, TransportResponse};

/// Hub settings with millisecond polling
pub fn fast_settings() -> HubSettings {
    HubSettings {
        poll_interval: Duration::from_millis(1),
        ..HubSettings::default()
    }
}

#[derive(Default)]
struct FakeState {
    buffer: String,
    replies: HashMap<String, VecDeque<String>>,
    requests: Vec<HubCommand>,
    fail_status: Option<u16>,
}

/// Scripted hub
#[derive(Default)]
pub struct FakeHub {
    state: Mutex<FakeState>,
}

impl FakeHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue buffer content to append the next time `command_hex` is sent
    ///
    /// `command_hex` is the part of the request between `?` and `=I=`,
    /// e.g. `026240565B0F1900` or `0269`. Each send consumes one reply.
    pub fn on_command(&self, command_hex: &str, reply: &str) {
        self.lock()
            .replies
            .entry(command_hex.to_ascii_uppercase())
            .or_default()
            .push_back(reply.to_string());
    }

    /// Append raw hex to the buffer, as unsolicited traffic would
    pub fn push_buffer(&self, hex: &str) {
        self.lock().buffer.push_str(hex);
    }

    pub fn buffer(&self) -> String {
        self.lock().buffer.clone()
    }

    /// Every request received, in order
    pub fn requests(&self) -> Vec<HubCommand> {
        self.lock().requests.clone()
    }

    /// Command hex of every device, scene or modem command received
    pub fn dispatched(&self) -> Vec<String> {
        self.lock()
            .requests
            .iter()
            .filter_map(|r| command_hex(&r.path).map(String::from))
            .collect()
    }

    /// Answer every request with this HTTP status instead
    pub fn fail_with_status(&self, status: Option<u16>) {
        self.lock().fail_status = status;
    }
}

fn command_hex(path: &str) -> Option<&str> {
    let (_, query) = path.split_once('?')?;
    query.split_once("=I=").map(|(hex, _)| hex)
}

#[async_trait]
impl Transport for FakeHub {
    async fn execute(&self, method: Method, path: &str) -> Result<TransportResponse, TransportError> {
        let mut state = self.lock();
        state.requests.push(HubCommand {
            method,
            path: path.to_string(),
        });

        if let Some(status) = state.fail_status {
            return Err(match status {
                401 => TransportError::Unauthorized,
                status => TransportError::Status {
                    status,
                    path: path.to_string(),
                },
            });
        }

        let mut body = String::new();
        match (method, path) {
            (Method::Get, "/buffstatus.xml") => {
                body = format!("<response><BS>{}</BS></response>", state.buffer);
            }
            (Method::Post, "/1?XB=M=1") => state.buffer.clear(),
            (Method::Post, path) => {
                let reply = command_hex(path)
                    .map(|hex| hex.to_ascii_uppercase())
                    .and_then(|hex| state.replies.get_mut(&hex).and_then(VecDeque::pop_front));
                if let Some(reply) = reply {
                    state.buffer.push_str(&reply);
                }
            }
            (Method::Get, _) => {
                return Err(TransportError::Status {
                    status: 404,
                    path: path.to_string(),
                })
            }
        }

        Ok(TransportResponse { status: 200, body })
    }
}

/// State store kept in memory
#[derive(Default)]
pub struct MemoryStore {
    states: Mutex<HashMap<DeviceId, DeviceState>>,
    locked: Mutex<bool>,
}

impl MemoryStore {
    pub fn is_locked(&self) -> bool {
        *self.locked.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StateStore for MemoryStore {
    fn read(&self, device: &DeviceId) -> Result<DeviceState, CacheError> {
        let states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(states.get(device).cloned().unwrap_or_default())
    }

    fn write(&self, device: &DeviceId, state: &DeviceState) -> Result<(), CacheError> {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(device.clone(), state.clone());
        Ok(())
    }

    fn try_acquire_lock(&self) -> Result<bool, CacheError> {
        let mut locked = self.locked.lock().unwrap_or_else(PoisonError::into_inner);
        if *locked {
            return Ok(false);
        }
        *locked = true;
        Ok(true)
    }

    fn release_lock(&self) -> Result<(), CacheError> {
        *self.locked.lock().unwrap_or_else(PoisonError::into_inner) = false;
        Ok(())
    }
}
