//! Per-device-type wrappers
//!
//! Each wrapper knows the command bytes for one kind of device and forwards
//! to [`Hub::send_and_verify`], [`Hub::get_status`] or a scene broadcast.

use insteon_core::command::opcode;
use insteon_core::{brightness_to_level, DeviceId};
use std::str::FromStr;
use tracing::info;

use crate::client::Hub;
use crate::error::HubError;
use crate::status::StatusReading;

/// Status request cmd2 selecting the on level
const STATUS_LEVEL: u8 = 0x00;
/// Status request cmd2 selecting the LED flags
const STATUS_LED: u8 = 0x01;
/// Status request cmd2 for the fan motor of a FanLinc
const STATUS_FAN: u8 = 0x03;

/// Extended payload addressing the second load of a two-load device
const SECOND_LOAD: &[u8] = &[0x02];

fn status_selector(led: bool) -> u8 {
    if led {
        STATUS_LED
    } else {
        STATUS_LEVEL
    }
}

/// On/off switch (SwitchLinc Relay, ApplianceLinc)
#[derive(Clone)]
pub struct Switch {
    hub: Hub,
    device: DeviceId,
}

impl Switch {
    pub fn new(hub: Hub, device: DeviceId) -> Self {
        Self { hub, device }
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device
    }

    fn attempts(&self) -> u32 {
        self.hub.settings().verify_attempts
    }

    pub async fn on(&self) -> Result<bool, HubError> {
        self.hub.send_and_verify(&self.device, opcode::ON, 0xFF, self.attempts()).await
    }

    pub async fn off(&self) -> Result<bool, HubError> {
        self.hub.send_and_verify(&self.device, opcode::OFF, 0xFF, self.attempts()).await
    }

    pub async fn beep(&self) -> Result<bool, HubError> {
        self.hub.send_and_verify(&self.device, opcode::BEEP, 0x00, self.attempts()).await
    }

    /// On level, or LED flags with `led` set
    pub async fn status(&self, led: bool) -> Result<Option<StatusReading>, HubError> {
        self.hub
            .get_status(&self.device, opcode::STATUS_REQUEST, status_selector(led))
            .await
    }
}

/// Direction for a manual level change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ramp {
    Up,
    Down,
}

/// Dimmable light (SwitchLinc Dimmer, LampLinc)
#[derive(Clone)]
pub struct Dimmer {
    hub: Hub,
    device: DeviceId,
}

impl Dimmer {
    pub fn new(hub: Hub, device: DeviceId) -> Self {
        Self { hub, device }
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device
    }

    async fn send(&self, cmd1: u8, cmd2: u8) -> Result<bool, HubError> {
        let attempts = self.hub.settings().verify_attempts;
        self.hub.send_and_verify(&self.device, cmd1, cmd2, attempts).await
    }

    /// Turn on at a brightness percentage
    pub async fn on(&self, percent: u8) -> Result<bool, HubError> {
        self.send(opcode::ON, brightness_to_level(percent)).await
    }

    /// Turn on at the locally saved level
    pub async fn on_saved(&self) -> Result<bool, HubError> {
        self.send(opcode::ON_FAST, 0x00).await
    }

    pub async fn off(&self) -> Result<bool, HubError> {
        self.send(opcode::OFF, 0x00).await
    }

    pub async fn off_instant(&self) -> Result<bool, HubError> {
        self.send(opcode::OFF_FAST, 0x00).await
    }

    pub async fn change_level(&self, percent: u8) -> Result<bool, HubError> {
        self.send(opcode::SET_LEVEL, brightness_to_level(percent)).await
    }

    pub async fn brighten_step(&self) -> Result<bool, HubError> {
        self.send(opcode::BRIGHTEN_STEP, 0x00).await
    }

    pub async fn dim_step(&self) -> Result<bool, HubError> {
        self.send(opcode::DIM_STEP, 0x00).await
    }

    /// Begin ramping; the device keeps going until [`Dimmer::stop_change`]
    pub async fn start_change(&self, ramp: Ramp) -> Result<bool, HubError> {
        let direction = match ramp {
            Ramp::Up => 0x01,
            Ramp::Down => 0x00,
        };
        self.send(opcode::START_CHANGE, direction).await
    }

    pub async fn stop_change(&self) -> Result<bool, HubError> {
        self.send(opcode::STOP_CHANGE, 0x00).await
    }

    pub async fn beep(&self) -> Result<bool, HubError> {
        self.send(opcode::BEEP, 0x00).await
    }

    pub async fn status(&self, led: bool) -> Result<Option<StatusReading>, HubError> {
        self.hub
            .get_status(&self.device, opcode::STATUS_REQUEST, status_selector(led))
            .await
    }
}

/// FanLinc fan speed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanSpeed {
    Off,
    Low,
    Medium,
    High,
}

impl FanSpeed {
    pub fn level(&self) -> u8 {
        match self {
            FanSpeed::Off => 0x00,
            FanSpeed::Low => 0x55,
            FanSpeed::Medium => 0xAA,
            FanSpeed::High => 0xFF,
        }
    }

    /// Nearest speed for a reported motor level
    pub fn from_level(level: u8) -> Self {
        match level {
            0x00 => FanSpeed::Off,
            0x01..=0x7F => FanSpeed::Low,
            0x80..=0xD4 => FanSpeed::Medium,
            _ => FanSpeed::High,
        }
    }
}

impl FromStr for FanSpeed {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(FanSpeed::Off),
            "low" => Ok(FanSpeed::Low),
            "medium" | "med" => Ok(FanSpeed::Medium),
            "high" => Ok(FanSpeed::High),
            other => Err(format!("unknown fan speed {:?} (off, low, medium, high)", other)),
        }
    }
}

impl std::fmt::Display for FanSpeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FanSpeed::Off => write!(f, "off"),
            FanSpeed::Low => write!(f, "low"),
            FanSpeed::Medium => write!(f, "medium"),
            FanSpeed::High => write!(f, "high"),
        }
    }
}

/// Fan half of a FanLinc; the light half is a [`Dimmer`]
#[derive(Clone)]
pub struct Fan {
    hub: Hub,
    device: DeviceId,
}

impl Fan {
    pub fn new(hub: Hub, device: DeviceId) -> Self {
        Self { hub, device }
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device
    }

    pub async fn on(&self, speed: FanSpeed) -> Result<bool, HubError> {
        info!(device = %self.device, speed = %speed, "Fan speed");
        let attempts = self.hub.settings().verify_attempts;
        self.hub
            .send_and_verify_extended(&self.device, opcode::ON, speed.level(), SECOND_LOAD, attempts)
            .await
    }

    pub async fn off(&self) -> Result<bool, HubError> {
        let attempts = self.hub.settings().verify_attempts;
        self.hub
            .send_and_verify_extended(&self.device, opcode::OFF, 0x00, SECOND_LOAD, attempts)
            .await
    }

    pub async fn status(&self) -> Result<Option<StatusReading>, HubError> {
        self.hub
            .get_status(&self.device, opcode::STATUS_REQUEST, STATUS_FAN)
            .await
    }

    /// Current speed, from the motor level in a fan status reply
    pub async fn speed(&self) -> Result<Option<FanSpeed>, HubError> {
        let reading = self.status().await?;
        Ok(reading.and_then(|r| r.value()).map(FanSpeed::from_level))
    }
}

/// Which socket of a two-outlet device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Socket {
    Top,
    Bottom,
}

/// On/Off Outlet with independently switched sockets
#[derive(Clone)]
pub struct OnOffOutlet {
    hub: Hub,
    device: DeviceId,
}

impl OnOffOutlet {
    pub fn new(hub: Hub, device: DeviceId) -> Self {
        Self { hub, device }
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device
    }

    async fn switch(&self, socket: Socket, cmd1: u8) -> Result<bool, HubError> {
        let attempts = self.hub.settings().verify_attempts;
        match socket {
            Socket::Top => {
                self.hub
                    .send_and_verify(&self.device, cmd1, 0xFF, attempts)
                    .await
            }
            Socket::Bottom => {
                self.hub
                    .send_and_verify_extended(&self.device, cmd1, 0xFF, SECOND_LOAD, attempts)
                    .await
            }
        }
    }

    pub async fn on(&self, socket: Socket) -> Result<bool, HubError> {
        self.switch(socket, opcode::ON).await
    }

    pub async fn off(&self, socket: Socket) -> Result<bool, HubError> {
        self.switch(socket, opcode::OFF).await
    }

    pub async fn beep(&self) -> Result<bool, HubError> {
        let attempts = self.hub.settings().verify_attempts;
        self.hub
            .send_and_verify(&self.device, opcode::BEEP, 0x00, attempts)
            .await
    }

    /// LED flags carry the state of both sockets
    pub async fn status(&self) -> Result<Option<StatusReading>, HubError> {
        self.hub
            .get_status(&self.device, opcode::STATUS_REQUEST, STATUS_LED)
            .await
    }
}

/// ALL-Link group (scene) on the hub
///
/// Scene broadcasts are not acknowledged per device, so these only report
/// whether the hub accepted the request.
#[derive(Clone)]
pub struct Group {
    hub: Hub,
    group: u8,
}

impl Group {
    pub fn new(hub: Hub, group: u8) -> Self {
        Self { hub, group }
    }

    pub fn id(&self) -> u8 {
        self.group
    }

    pub async fn on(&self) -> Result<(), HubError> {
        self.hub.scene_command(self.group, opcode::ON).await
    }

    pub async fn off(&self) -> Result<(), HubError> {
        self.hub.scene_command(self.group, opcode::OFF).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fast_settings, FakeHub, MemoryStore};
    use std::sync::Arc;

    fn hub(fake: &Arc<FakeHub>) -> Hub {
        Hub::new(fake.clone(), Arc::new(MemoryStore::default()), fast_settings())
    }

    #[test]
    fn test_fan_speed_parsing() {
        assert_eq!("Medium".parse::<FanSpeed>(), Ok(FanSpeed::Medium));
        assert!("turbo".parse::<FanSpeed>().is_err());
        assert_eq!(FanSpeed::Low.level(), 0x55);
        assert_eq!(FanSpeed::from_level(0xAA), FanSpeed::Medium);
        assert_eq!(FanSpeed::from_level(0xFF), FanSpeed::High);
    }

    #[tokio::test]
    async fn test_dimmer_commands() {
        let fake = Arc::new(FakeHub::new());
        fake.on_command("026240565B0F11BF", "025040565B4A1B2C2F11BF");
        fake.on_command("026240565B0F1701", "025040565B4A1B2C2F1701");
        let dimmer = Dimmer::new(hub(&fake), DeviceId::parse("40565B").unwrap());

        assert!(dimmer.on(75).await.unwrap());
        assert!(dimmer.start_change(Ramp::Up).await.unwrap());
    }

    #[tokio::test]
    async fn test_fan_uses_extended_payload() {
        let fake = Arc::new(FakeHub::new());
        // 0x11 + 0xAA + 0x02 = 0xBD, checksum 0x43
        fake.on_command(
            "026242902E1F11AA0200000000000000000000000043",
            "025042902E4A1B2C2F11AA",
        );
        let fan = Fan::new(hub(&fake), DeviceId::parse("42902E").unwrap());

        assert!(fan.on(FanSpeed::Medium).await.unwrap());
    }

    #[tokio::test]
    async fn test_fan_speed_from_status() {
        let fake = Arc::new(FakeHub::new());
        fake.on_command("026242902E0F1903", "025042902E4A1B2C2F00AA");
        let fan = Fan::new(hub(&fake), DeviceId::parse("42902E").unwrap());

        assert_eq!(fan.speed().await.unwrap(), Some(FanSpeed::Medium));
    }

    #[tokio::test]
    async fn test_outlet_sockets() {
        let fake = Arc::new(FakeHub::new());
        fake.on_command("02624A1B2C0F11FF", "02504A1B2C4A1B2C2F11FF");
        // 0x13 + 0xFF + 0x02 = 0x114, low byte 0x14, checksum 0xEC
        fake.on_command(
            "02624A1B2C1F13FF02000000000000000000000000EC",
            "02504A1B2C4A1B2C2F13FF",
        );
        let outlet = OnOffOutlet::new(hub(&fake), DeviceId::parse("4A1B2C").unwrap());

        assert!(outlet.on(Socket::Top).await.unwrap());
        assert!(outlet.off(Socket::Bottom).await.unwrap());
    }

    #[tokio::test]
    async fn test_group_broadcast() {
        let fake = Arc::new(FakeHub::new());
        let group = Group::new(hub(&fake), 0x01);

        group.on().await.unwrap();
        group.off().await.unwrap();
        assert_eq!(fake.dispatched(), vec!["1101", "1301"]);
    }

    #[tokio::test]
    async fn test_switch_status_led() {
        let fake = Arc::new(FakeHub::new());
        fake.on_command("026240565B0F1901", "025040565B4A1B2C2F0203");
        let switch = Switch::new(hub(&fake), DeviceId::parse("40565B").unwrap());

        let reading = switch.status(true).await.unwrap().unwrap();
        assert_eq!(reading.value(), Some(0x03));
        assert_eq!(reading.database_delta(), Some(0x02));
    }
}
