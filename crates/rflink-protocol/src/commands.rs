//! Device addressing and command encoding.
//!
//! Consumers address devices with one underscore-joined string,
//! `<protocol>_<id>[_<switch>]` (`newkaku_000001_01`). Protocol names that
//! contain characters outside `[a-z0-9_]` go through a translation table so
//! that the string can be turned back into the exact wire protocol name.

use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{PacketError, PacketResult};
use crate::packet::{Origin, UNKNOWN};

/// Separator between device id components.
pub const DEVICE_ID_SEP: char = '_';

/// Device id used for packets without a protocol.
pub const UNKNOWN_DEVICE_ID: &str = "rflink";

/// Protocols whose wire names do not survive normalization on their own.
const TRANSLATED_PROTOCOLS: &[&str] = &[
    "Ikea Koppla",
    "Alecto V1",
    "Alecto V2",
    "UPM/Esic",
    "Oregon TempHygro",
    "Oregon BTHR",
    "Oregon Rain",
    "Oregon Rain2",
    "Oregon Wind",
    "Oregon Wind2",
    "Oregon UVN128/138",
    "Plieger York",
    "Byron SX",
];

/// Bidirectional protocol name table, built once.
struct Translations {
    forward: HashMap<String, String>,
    reverse: HashMap<String, String>,
}

static TRANSLATIONS: Lazy<Translations> = Lazy::new(|| {
    let mut forward = HashMap::new();
    let mut reverse = HashMap::new();
    for name in TRANSLATED_PROTOCOLS {
        let wire = name.to_lowercase();
        let token = normalize_protocol(&wire);
        reverse.insert(token.clone(), wire.clone());
        forward.insert(wire, token);
    }
    Translations { forward, reverse }
});

/// Reduce a protocol name to `[a-z0-9_]`.
pub fn normalize_protocol(protocol: &str) -> String {
    protocol
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_')
        .collect()
}

/// Translate a lower-cased wire protocol name into its id token.
pub fn protocol_token(protocol: &str) -> String {
    TRANSLATIONS
        .forward
        .get(protocol)
        .cloned()
        .unwrap_or_else(|| normalize_protocol(protocol))
}

/// Translate an id token back into the wire protocol name.
///
/// Tokens of protocols missing from the table come back unchanged, which is
/// only correct for names that were already normalized.
pub fn protocol_name(token: &str) -> String {
    TRANSLATIONS
        .reverse
        .get(token)
        .cloned()
        .unwrap_or_else(|| token.to_string())
}

/// Addressing triple of a device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId {
    /// Lower-cased wire protocol name.
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub switch: Option<String>,
}

impl DeviceId {
    pub fn new(protocol: impl Into<String>, id: impl Into<String>, switch: impl Into<String>) -> Self {
        DeviceId {
            protocol: protocol.into(),
            id: Some(id.into()),
            switch: Some(switch.into()),
        }
    }

    /// The device id of packets with no protocol.
    pub fn unknown() -> Self {
        DeviceId {
            protocol: UNKNOWN.to_string(),
            id: None,
            switch: None,
        }
    }

    /// Serialize into the underscore-joined form.
    ///
    /// ```
    /// use rflink_protocol::DeviceId;
    ///
    /// assert_eq!(DeviceId::new("ikea koppla", "000080", "0").serialize(), "ikeakoppla_000080_0");
    /// ```
    pub fn serialize(&self) -> String {
        let protocol = if self.protocol == UNKNOWN {
            UNKNOWN_DEVICE_ID.to_string()
        } else {
            protocol_token(&self.protocol)
        };

        let mut out = protocol;
        for part in [&self.id, &self.switch].into_iter().flatten() {
            if !part.is_empty() {
                out.push(DEVICE_ID_SEP);
                out.push_str(part);
            }
        }
        out
    }

    /// Parse the underscore-joined form.
    ///
    /// Protocol names may contain underscores themselves (`dooya_v4`), so
    /// the id and switch are split off from the right.
    ///
    /// ```
    /// use rflink_protocol::DeviceId;
    ///
    /// let device = DeviceId::deserialize("dooya_v4_6d5f8e00_3f").unwrap();
    /// assert_eq!(device.protocol, "dooya_v4");
    /// assert_eq!(device.id.as_deref(), Some("6d5f8e00"));
    /// assert_eq!(device.switch.as_deref(), Some("3f"));
    /// ```
    pub fn deserialize(device_id: &str) -> PacketResult<DeviceId> {
        if device_id.is_empty() {
            return Err(PacketError::InvalidDeviceId(device_id.to_string()));
        }
        if device_id == UNKNOWN_DEVICE_ID {
            return Ok(DeviceId::unknown());
        }

        let mut parts: Vec<&str> = device_id.rsplitn(3, DEVICE_ID_SEP).collect();
        parts.reverse();

        let protocol = parts[0];
        if protocol.is_empty() {
            return Err(PacketError::InvalidDeviceId(device_id.to_string()));
        }
        Ok(DeviceId {
            protocol: protocol_name(protocol),
            id: parts.get(1).map(|s| s.to_string()),
            switch: parts.get(2).map(|s| s.to_string()),
        })
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}

/// Serialize a device id. See [`DeviceId::serialize`].
pub fn serialize_device_id(device: &DeviceId) -> String {
    device.serialize()
}

/// Parse a device id. See [`DeviceId::deserialize`].
pub fn deserialize_device_id(device_id: &str) -> PacketResult<DeviceId> {
    DeviceId::deserialize(device_id)
}

/// Debug toggles are sent as a single control field rather than the
/// device command template.
const DEBUG_TOGGLES: &[&str] = &["rfdebug", "rfudebug", "qrfdebug"];

/// A command for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCommand {
    pub device: DeviceId,
    pub command: String,
}

impl DeviceCommand {
    pub fn new(device: DeviceId, command: impl Into<String>) -> Self {
        DeviceCommand {
            device,
            command: command.into(),
        }
    }

    /// Build a command from a serialized device id and an action.
    pub fn parse(device_id: &str, command: impl Into<String>) -> PacketResult<Self> {
        Ok(DeviceCommand::new(deserialize_device_id(device_id)?, command))
    }

    /// Encode as a wire line, without the CRLF terminator.
    ///
    /// ```
    /// use rflink_protocol::{DeviceCommand, DeviceId};
    ///
    /// let cmd = DeviceCommand::new(DeviceId::new("newkaku", "000001", "01"), "on");
    /// assert_eq!(cmd.encode(), "10;newkaku;000001;01;on;");
    /// ```
    pub fn encode(&self) -> String {
        let protocol = self.device.protocol.as_str();
        if DEBUG_TOGGLES.contains(&protocol) {
            return format!(
                "{};{}={};",
                Origin::Master.node_id(),
                protocol.to_uppercase(),
                self.command.to_uppercase()
            );
        }

        let mut out = format!("{};{};", Origin::Master.node_id(), protocol);
        for part in [&self.device.id, &self.device.switch].into_iter().flatten() {
            out.push_str(part);
            out.push(';');
        }
        out.push_str(&self.command);
        out.push(';');
        out
    }
}

/// Encode a device command. See [`DeviceCommand::encode`].
pub fn encode_packet(command: &DeviceCommand) -> String {
    command.encode()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translation_is_bijective() {
        let translations = &*TRANSLATIONS;
        assert_eq!(translations.forward.len(), translations.reverse.len());
        for (wire, token) in &translations.forward {
            assert_eq!(translations.reverse.get(token), Some(wire));
        }
    }

    #[test]
    fn test_serialize() {
        assert_eq!(DeviceId::new("newkaku", "000001", "01").serialize(), "newkaku_000001_01");
        assert_eq!(DeviceId::new("alecto v4", "000080", "0").serialize(), "alectov4_000080_0");
        assert_eq!(DeviceId::unknown().serialize(), "rflink");

        let sensor = DeviceId {
            protocol: "upm/esic".to_string(),
            id: Some("0001".to_string()),
            switch: None,
        };
        assert_eq!(sensor.serialize(), "upmesic_0001");
    }

    #[test]
    fn test_deserialize() {
        let device = DeviceId::deserialize("ikeakoppla_000080_0").unwrap();
        assert_eq!(device, DeviceId::new("ikea koppla", "000080", "0"));

        let device = DeviceId::deserialize("mertik_gv60_038527_13").unwrap();
        assert_eq!(device, DeviceId::new("mertik_gv60", "038527", "13"));

        assert_eq!(DeviceId::deserialize("rflink").unwrap(), DeviceId::unknown());
        assert!(DeviceId::deserialize("").is_err());
    }

    #[test]
    fn test_deserialize_short_forms() {
        let device = DeviceId::deserialize("rfdebug").unwrap();
        assert_eq!(device.protocol, "rfdebug");
        assert_eq!(device.id, None);

        let device = DeviceId::deserialize("upmesic_0001").unwrap();
        assert_eq!(device.protocol, "upm/esic");
        assert_eq!(device.id.as_deref(), Some("0001"));
        assert_eq!(device.switch, None);
    }

    #[test]
    fn test_encode_debug_toggle() {
        let cmd = DeviceCommand::parse("rfdebug", "on").unwrap();
        assert_eq!(cmd.encode(), "10;RFDEBUG=ON;");
        let cmd = DeviceCommand::parse("qrfdebug", "off").unwrap();
        assert_eq!(cmd.encode(), "10;QRFDEBUG=OFF;");
    }

    #[test]
    fn test_encode_translated_protocol() {
        let cmd = DeviceCommand::parse("ikeakoppla_000080_0", "on").unwrap();
        assert_eq!(encode_packet(&cmd), "10;ikea koppla;000080;0;on;");
    }
}
