//! Hub command encoding
//!
//! The hub accepts PLM commands as hex strings embedded in an HTTP query.
//! Everything here is pure: the functions build the request path, the
//! transport layer sends it.
//!
//! Grammar (all hex upper-case):
//! - direct: `/3?0262<id><type>F<cmd1><cmd2>[<28 hex extended>]=I=3`
//! - scene:  `/0?<cmd><group>=I=0`
//! - hub:    `/3?<cmd>=I=3` (direct) or `/3?<cmd>=I=0` (short)
//! - buffer: `GET /buffstatus.xml`, clear with `POST /1?XB=M=1`

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::device::DeviceId;

/// Direct command opcodes (cmd1)
pub mod opcode {
    pub const ID_REQUEST: u8 = 0x10;
    pub const ON: u8 = 0x11;
    pub const ON_FAST: u8 = 0x12;
    pub const OFF: u8 = 0x13;
    pub const OFF_FAST: u8 = 0x14;
    pub const BRIGHTEN_STEP: u8 = 0x15;
    pub const DIM_STEP: u8 = 0x16;
    pub const START_CHANGE: u8 = 0x17;
    pub const STOP_CHANGE: u8 = 0x18;
    pub const STATUS_REQUEST: u8 = 0x19;
    pub const SET_LEVEL: u8 = 0x21;
    pub const BEEP: u8 = 0x30;

    /// Commands that only read from a device and leave its state unchanged
    pub fn is_mutating(cmd1: u8) -> bool {
        !matches!(cmd1, ID_REQUEST | STATUS_REQUEST | BEEP)
    }
}

/// Hub (PLM) commands addressed to the modem itself
pub mod hub_cmd {
    pub const GET_FIRST_ALL_LINK: u16 = 0x0269;
    pub const GET_NEXT_ALL_LINK: u16 = 0x026A;
}

/// Extended payload size in bytes, checksum included
pub const EXTENDED_PAYLOAD_LEN: usize = 14;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Invalid device id {0:?}: expected 6 hex characters")]
    InvalidDeviceId(String),
    #[error("Extended payload too long: {0} bytes (max {max})", max = EXTENDED_PAYLOAD_LEN)]
    PayloadTooLong(usize),
}

/// HTTP method used for a hub request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
    Get,
    Post,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
        }
    }
}

/// A request to the hub: method plus path-and-query relative to the hub URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubCommand {
    pub method: Method,
    pub path: String,
}

impl HubCommand {
    fn post(path: String) -> Self {
        Self {
            method: Method::Post,
            path,
        }
    }
}

impl std::fmt::Display for HubCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// Encode a direct command to a single device
///
/// With `extended` set the flags byte becomes `1F` and the payload is
/// padded to 13 data bytes followed by an I2CS checksum. A caller passing
/// the full 14 bytes supplies its own checksum.
pub fn direct(
    device_id: &str,
    cmd1: u8,
    cmd2: u8,
    extended: Option<&[u8]>,
) -> Result<HubCommand, CommandError> {
    let device = DeviceId::parse(device_id)?;

    let (msg_type, payload) = match extended {
        None => ('0', String::new()),
        Some(data) => ('1', hex::encode_upper(extended_payload(cmd1, cmd2, data)?)),
    };

    Ok(HubCommand::post(format!(
        "/3?0262{}{}F{:02X}{:02X}{}=I=3",
        device, msg_type, cmd1, cmd2, payload
    )))
}

/// Encode a scene (ALL-Link group) broadcast
pub fn scene(group: u8, cmd: u8) -> HubCommand {
    HubCommand::post(format!("/0?{:02X}{:02X}=I=0", cmd, group))
}

/// Encode a command addressed to the hub's modem
pub fn hub_direct(cmd: u16) -> HubCommand {
    HubCommand::post(format!("/3?{:04X}=I=3", cmd))
}

/// Encode a short-form hub command (no device id or flags byte)
pub fn hub_short(cmd: u16) -> HubCommand {
    HubCommand::post(format!("/3?{:04X}=I=0", cmd))
}

/// Read the hub's response buffer
pub fn read_buffer() -> HubCommand {
    HubCommand {
        method: Method::Get,
        path: "/buffstatus.xml".to_string(),
    }
}

/// Clear the hub's response buffer
pub fn clear_buffer() -> HubCommand {
    HubCommand::post("/1?XB=M=1".to_string())
}

/// Convert a brightness percentage into the hex level byte
pub fn brightness_to_hex(percent: u8) -> String {
    format!("{:02X}", brightness_to_level(percent))
}

/// Convert a brightness percentage into a 0-255 level
pub fn brightness_to_level(percent: u8) -> u8 {
    let percent = u32::from(percent.min(100));
    (percent * 255 / 100) as u8
}

fn extended_payload(cmd1: u8, cmd2: u8, data: &[u8]) -> Result<Vec<u8>, CommandError> {
    if data.len() > EXTENDED_PAYLOAD_LEN {
        return Err(CommandError::PayloadTooLong(data.len()));
    }
    if data.len() == EXTENDED_PAYLOAD_LEN {
        return Ok(data.to_vec());
    }

    let mut payload = data.to_vec();
    payload.resize(EXTENDED_PAYLOAD_LEN - 1, 0);
    payload.push(i2cs_checksum(cmd1, cmd2, &payload));
    Ok(payload)
}

/// Two's complement of the low byte of cmd1 + cmd2 + data
fn i2cs_checksum(cmd1: u8, cmd2: u8, data: &[u8]) -> u8 {
    let sum = data
        .iter()
        .fold(cmd1.wrapping_add(cmd2), |acc, b| acc.wrapping_add(*b));
    sum.wrapping_neg()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_brightness_to_hex() {
        assert_eq!(brightness_to_hex(0), "00");
        assert_eq!(brightness_to_hex(50), "7F");
        assert_eq!(brightness_to_hex(75), "BF");
        assert_eq!(brightness_to_hex(100), "FF");
        assert_eq!(brightness_to_hex(250), "FF");
    }

    #[test]
    fn test_direct_standard() {
        let cmd = direct("40565b", opcode::ON, brightness_to_level(75), None).unwrap();
        assert_eq!(cmd.method, Method::Post);
        assert_eq!(cmd.path, "/3?026240565B0F11BF=I=3");
    }

    #[test]
    fn test_direct_rejects_bad_id() {
        assert_eq!(
            direct("4056", opcode::ON, 0xFF, None),
            Err(CommandError::InvalidDeviceId("4056".to_string()))
        );
    }

    #[test]
    fn test_direct_extended_pads_and_checksums() {
        let cmd = direct("42902E", opcode::ON, 0xFF, Some(&[0x02])).unwrap();
        // 0x11 + 0xFF + 0x02 = 0x112, low byte 0x12, checksum 0xEE
        assert_eq!(
            cmd.path,
            "/3?026242902E1F11FF02000000000000000000000000EE=I=3"
        );
        let payload = cmd.path.split("1F11FF").nth(1).unwrap();
        assert_eq!(payload.trim_end_matches("=I=3").len(), 28);
    }

    #[test]
    fn test_direct_extended_full_payload_is_kept() {
        let data = [0xAB; EXTENDED_PAYLOAD_LEN];
        let cmd = direct("42902E", 0x2E, 0x00, Some(&data)).unwrap();
        assert!(cmd.path.ends_with(&format!("{}=I=3", "AB".repeat(14))));
        assert_eq!(
            direct("42902E", 0x2E, 0x00, Some(&[0u8; 15])),
            Err(CommandError::PayloadTooLong(15))
        );
    }

    #[test]
    fn test_checksum_wraps() {
        // Low byte of the sum is zero, so the checksum must be 00, not 100
        assert_eq!(i2cs_checksum(0x80, 0x80, &[0; 13]), 0x00);
        assert_eq!(i2cs_checksum(0x2E, 0x00, &[0x01; 13]), 0xC5);
    }

    #[test]
    fn test_scene_and_hub_commands() {
        assert_eq!(scene(1, opcode::ON).path, "/0?1101=I=0");
        assert_eq!(hub_direct(hub_cmd::GET_FIRST_ALL_LINK).path, "/3?0269=I=3");
        assert_eq!(hub_short(hub_cmd::GET_NEXT_ALL_LINK).path, "/3?026A=I=0");
        assert_eq!(read_buffer().to_string(), "GET /buffstatus.xml");
        assert_eq!(clear_buffer().to_string(), "POST /1?XB=M=1");
    }

    #[test]
    fn test_mutating_commands() {
        assert!(opcode::is_mutating(opcode::ON));
        assert!(opcode::is_mutating(opcode::SET_LEVEL));
        assert!(!opcode::is_mutating(opcode::STATUS_REQUEST));
        assert!(!opcode::is_mutating(opcode::ID_REQUEST));
    }
}
