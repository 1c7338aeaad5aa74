//! Decomposition of packets into independently addressable events.

use std::fmt;

use serde::Serialize;

use crate::commands::{serialize_device_id, DEVICE_ID_SEP, UNKNOWN_DEVICE_ID};
use crate::fields::{abbreviation, FieldValue};
use crate::packet::{DebugData, DecodedPacket, PacketKind};

/// Id carried by every raw debug event.
pub const RAW_EVENT_ID: &str = "raw";

/// One signal derived from a packet.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Event {
    /// A switch changed state (or was commanded to).
    Switch { id: String, command: String },
    /// Firmware identification.
    Version {
        id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        version: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        revision: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        hardware: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        firmware: Option<String>,
    },
    /// A single sensor reading.
    Sensor {
        id: String,
        sensor: String,
        value: FieldValue,
        unit: Option<String>,
    },
    /// Raw debug output.
    Raw {
        id: String,
        value: Option<String>,
        tm: Option<String>,
        pulses: Option<String>,
    },
}

impl Event {
    pub fn id(&self) -> &str {
        match self {
            Event::Switch { id, .. }
            | Event::Version { id, .. }
            | Event::Sensor { id, .. }
            | Event::Raw { id, .. } => id,
        }
    }

    /// The command of a switch event.
    pub fn command(&self) -> Option<&str> {
        match self {
            Event::Switch { command, .. } => Some(command),
            _ => None,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let opt = |v: &Option<String>| v.clone().unwrap_or_default();
        match self {
            Event::Switch { id, command } => write!(f, "{:<32} {}", id, command),
            Event::Version {
                id,
                version,
                revision,
                hardware,
                firmware,
            } => {
                write!(f, "{:<32} ", id)?;
                if let Some(hardware) = hardware {
                    write!(f, "{} {} ", hardware, opt(firmware))?;
                }
                write!(f, "V{} R{}", opt(version), opt(revision))
            }
            Event::Sensor { id, value, unit, .. } => match unit {
                Some(unit) => write!(f, "{:<32} {} {}", id, value, unit),
                None => write!(f, "{:<32} {}", id, value),
            },
            Event::Raw { id, value, .. } => write!(f, "{:<32} {}", id, opt(value)),
        }
    }
}

/// Decompose a packet into events, stamping `update_time` with the current
/// wall clock.
pub fn decompose(packet: &DecodedPacket) -> Vec<Event> {
    decompose_at(packet, chrono::Utc::now().timestamp())
}

/// Decompose a packet into events, stamping `update_time` with `now`
/// (seconds since the epoch).
///
/// ```
/// use rflink_protocol::{decode_packet, decompose_at, Event};
///
/// let packet = decode_packet("20;06;NewKaku;ID=000001;SWITCH=01;CMD=ON;").unwrap();
/// assert_eq!(
///     decompose_at(&packet, 0),
///     vec![Event::Switch { id: "newkaku_000001_01".into(), command: "on".into() }]
/// );
/// ```
pub fn decompose_at(packet: &DecodedPacket, now: i64) -> Vec<Event> {
    let device_id = serialize_device_id(&packet.device_id());

    if let Some(command) = &packet.command {
        return vec![Event::Switch {
            id: device_id,
            command: command.clone(),
        }];
    }

    if let Some(version) = packet.version() {
        let (hardware, firmware) = match &packet.kind {
            PacketKind::Banner(banner) => (
                Some(banner.hardware.clone()),
                Some(banner.firmware.clone()),
            ),
            _ => (
                packet.fields.text("hardware").map(str::to_string),
                packet.fields.text("firmware").map(str::to_string),
            ),
        };
        return vec![Event::Version {
            id: device_id,
            version: Some(version.to_string()),
            revision: packet.revision().map(str::to_string),
            hardware,
            firmware,
        }];
    }

    if device_id == "debug" {
        let text = |name: &str| packet.fields.text(name).map(str::to_string);
        let (value, tm) = match &packet.kind {
            PacketKind::Debug(DebugData::Rts { p1 }) => (Some(p1.clone()), None),
            PacketKind::Debug(DebugData::Timing { tm }) => (text("pulses(usec)"), Some(tm.clone())),
            _ => (text("pulses(usec)"), None),
        };
        return vec![Event::Raw {
            id: RAW_EVENT_ID.to_string(),
            value,
            tm,
            pulses: text("pulses"),
        }];
    }

    let mut events: Vec<Event> = packet
        .fields
        .iter()
        .filter_map(|(name, field)| {
            let abbrev = abbreviation(name)?;
            Some(Event::Sensor {
                id: format!("{}{}{}", device_id, DEVICE_ID_SEP, abbrev),
                sensor: name.to_string(),
                value: field.value.clone(),
                unit: field.unit.map(str::to_string),
            })
        })
        .collect();

    if device_id != UNKNOWN_DEVICE_ID {
        events.push(Event::Sensor {
            id: format!("{}{}update_time", device_id, DEVICE_ID_SEP),
            sensor: "update_time".to_string(),
            value: FieldValue::Int(now),
            unit: Some("s".to_string()),
        });
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode_packet;

    #[test]
    fn test_sensor_events() {
        let packet = decode_packet("20;2D;UPM/Esic;ID=0001;TEMP=00cf;HUM=16;BAT=OK;").unwrap();
        let events = decompose_at(&packet, 1_700_000_000);
        assert_eq!(events.len(), 4);
        assert_eq!(
            events[0],
            Event::Sensor {
                id: "upmesic_0001_temp".to_string(),
                sensor: "temperature".to_string(),
                value: FieldValue::Float(20.7),
                unit: Some("°C".to_string()),
            }
        );
        assert_eq!(events[1].id(), "upmesic_0001_hum");
        assert_eq!(events[2].id(), "upmesic_0001_bat");
        assert_eq!(
            events[3],
            Event::Sensor {
                id: "upmesic_0001_update_time".to_string(),
                sensor: "update_time".to_string(),
                value: FieldValue::Int(1_700_000_000),
                unit: Some("s".to_string()),
            }
        );
    }

    #[test]
    fn test_rain_uses_short_abbreviation() {
        let packet = decode_packet("20;08;UPM/Esic;ID=1003;RAINTOT=0010;BAT=OK;").unwrap();
        let events = decompose_at(&packet, 0);
        assert_eq!(events[0].id(), "upmesic_1003_rain");
    }

    #[test]
    fn test_version_event() {
        let packet = decode_packet("20;01;VER=1.1;REV=45;BUILD=04;").unwrap();
        let events = decompose_at(&packet, 0);
        assert_eq!(
            events,
            vec![Event::Version {
                id: "rflink".to_string(),
                version: Some("1.1".to_string()),
                revision: Some("45".to_string()),
                hardware: None,
                firmware: None,
            }]
        );
    }

    #[test]
    fn test_unknown_protocol_has_no_update_time() {
        let packet = decode_packet("20;01;RFDEBUG=ON;").unwrap();
        assert!(decompose_at(&packet, 0).is_empty());
    }

    #[test]
    fn test_raw_debug_event() {
        let packet = decode_packet("20;75;DEBUG;Pulses=90;Pulses(uSec)=1200,2760,120;").unwrap();
        assert_eq!(
            decompose_at(&packet, 0),
            vec![Event::Raw {
                id: "raw".to_string(),
                value: Some("1200,2760,120".to_string()),
                tm: Some("75".to_string()),
                pulses: Some("90".to_string()),
            }]
        );
    }

    #[test]
    fn test_display() {
        let switch = Event::Switch {
            id: "newkaku_000001_01".to_string(),
            command: "on".to_string(),
        };
        assert_eq!(switch.to_string(), format!("{:<32} on", "newkaku_000001_01"));

        let sensor = Event::Sensor {
            id: "x_hum".to_string(),
            sensor: "humidity".to_string(),
            value: FieldValue::Int(16),
            unit: Some("%".to_string()),
        };
        assert!(sensor.to_string().ends_with(" 16 %"));

        let version = Event::Version {
            id: "rflink".to_string(),
            version: Some("1.1".to_string()),
            revision: Some("45".to_string()),
            hardware: Some("Nodo".to_string()),
            firmware: Some("RadioFrequencyLink".to_string()),
        };
        assert_eq!(
            version.to_string(),
            format!("{:<32} Nodo RadioFrequencyLink V1.1 R45", "rflink")
        );
    }
}
