//! Decoding of wire packets into structured form.
//!
//! A gateway line looks like `20;06;Kaku;ID=41;SWITCH=1;CMD=ON;`: node id,
//! sequence number, then either a protocol name followed by `KEY=value`
//! attributes, or one of the fixed gateway messages (banner, `OK`,
//! `CMD UNKNOWN`, `PONG`, debug output, free-form info text).

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::commands::DeviceId;
use crate::error::{PacketError, PacketResult};
use crate::fields::{field_spec, FieldValue};
use crate::grammar::DELIM;

/// Protocol sentinel for packets that do not name a protocol.
pub const UNKNOWN: &str = "unknown";

/// Substring identifying the startup banner.
const BANNER_MARKER: &str = "RFLink Gateway";

static BANNER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<hardware>[a-zA-Z\s]+) - (?P<firmware>[a-zA-Z\s]+) V(?P<version>[0-9\.]+) - R(?P<revision>[0-9\.]+)",
    )
    .expect("banner pattern must compile")
});

/// Where a packet originated, from its leading node id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// `10`: a command issued by the host.
    Master,
    /// `11`: the gateway echoing a command it transmitted.
    Echo,
    /// `20`: a report produced by the gateway.
    Gateway,
}

impl Origin {
    /// Map a wire node id to its origin.
    pub fn from_node_id(node_id: &str) -> Option<Origin> {
        match node_id {
            "10" => Some(Origin::Master),
            "11" => Some(Origin::Echo),
            "20" => Some(Origin::Gateway),
            _ => None,
        }
    }

    /// The wire node id.
    pub fn node_id(&self) -> &'static str {
        match self {
            Origin::Master => "10",
            Origin::Echo => "11",
            Origin::Gateway => "20",
        }
    }
}

/// A decoded attribute with its display unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    pub value: FieldValue,
    pub unit: Option<&'static str>,
}

/// Ordered attribute map. Keeps wire order, a repeated key replaces the
/// earlier value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields {
    entries: Vec<(String, Field)>,
}

impl Fields {
    pub fn new() -> Self {
        Fields::default()
    }

    /// Insert or replace a field.
    pub fn insert(&mut self, name: impl Into<String>, field: Field) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = field,
            None => self.entries.push((name, field)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, f)| f)
    }

    /// Get a field's value.
    pub fn value(&self, name: &str) -> Option<&FieldValue> {
        self.get(name).map(|f| &f.value)
    }

    /// Get a field's value if it is text.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.value(name).and_then(FieldValue::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Field)> {
        self.entries.iter().map(|(n, f)| (n.as_str(), f))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Hardware and firmware identification from the startup banner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Banner {
    pub hardware: String,
    pub firmware: String,
    pub version: String,
    pub revision: String,
}

/// Debug output variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugData {
    /// `Debug;RTS P1;<hex>;` raw RTS frame.
    Rts { p1: String },
    /// `DEBUG;Pulses=..;Pulses(uSec)=..;` pulse timing, tagged with the
    /// packet sequence.
    Timing { tm: String },
}

/// Packet category.
#[derive(Debug, Clone, PartialEq)]
pub enum PacketKind {
    /// Device report or bare `KEY=value` attributes.
    Report,
    /// Command acknowledgment (`OK` or `CMD UNKNOWN`).
    Response { ok: bool },
    /// Keep-alive reply.
    Pong,
    /// Startup banner.
    Banner(Banner),
    /// Free-form informational text.
    Message(String),
    /// Debug output.
    Debug(DebugData),
}

/// A structured packet.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPacket {
    pub node: Origin,
    /// Lower-cased protocol name, [`UNKNOWN`] for gateway messages.
    pub protocol: String,
    pub kind: PacketKind,
    pub id: Option<String>,
    pub switch: Option<String>,
    pub command: Option<String>,
    /// Remaining attributes, renamed through the field table.
    pub fields: Fields,
}

impl DecodedPacket {
    fn new(node: Origin, kind: PacketKind) -> Self {
        DecodedPacket {
            node,
            protocol: UNKNOWN.to_string(),
            kind,
            id: None,
            switch: None,
            command: None,
            fields: Fields::new(),
        }
    }

    /// The acknowledgment outcome, if this is a response packet.
    pub fn ok(&self) -> Option<bool> {
        match self.kind {
            PacketKind::Response { ok } => Some(ok),
            _ => None,
        }
    }

    pub fn is_response(&self) -> bool {
        self.ok().is_some()
    }

    pub fn is_pong(&self) -> bool {
        self.kind == PacketKind::Pong
    }

    /// Diagnostic text for negative responses.
    pub fn response(&self) -> Option<&'static str> {
        match self.kind {
            PacketKind::Response { ok: false } => Some("command_unknown"),
            _ => None,
        }
    }

    /// Firmware version, from the banner or a `VER=` attribute.
    pub fn version(&self) -> Option<&str> {
        match &self.kind {
            PacketKind::Banner(banner) => Some(&banner.version),
            _ => self.fields.text("version"),
        }
    }

    /// Firmware revision, from the banner or a `REV=` attribute.
    pub fn revision(&self) -> Option<&str> {
        match &self.kind {
            PacketKind::Banner(banner) => Some(&banner.revision),
            _ => self.fields.text("revision"),
        }
    }

    pub fn has_unknown_protocol(&self) -> bool {
        self.protocol == UNKNOWN
    }

    /// The addressing triple of this packet.
    pub fn device_id(&self) -> DeviceId {
        DeviceId {
            protocol: self.protocol.clone(),
            id: self.id.clone(),
            switch: self.switch.clone(),
        }
    }

    /// Store one lower-cased attribute, routing addressing keys to their
    /// dedicated slots.
    fn set_attribute(&mut self, key: &str, raw: &str) {
        let spec = field_spec(key);
        let value = match spec.and_then(|s| s.conversion) {
            Some(conversion) => match conversion.apply(key, raw) {
                Ok(value) => value,
                Err(err) => {
                    log::warn!("{}", err);
                    return;
                }
            },
            None => FieldValue::from(raw),
        };
        let name = spec.map_or(key, |s| s.name);

        match (name, value) {
            ("id", FieldValue::Text(v)) => self.id = Some(v),
            ("switch", FieldValue::Text(v)) => self.switch = Some(v),
            ("command", FieldValue::Text(v)) => self.command = Some(v),
            (name, value) => self.fields.insert(
                name,
                Field {
                    value,
                    unit: spec.and_then(|s| s.unit),
                },
            ),
        }
    }

    fn parse_attributes(&mut self, attrs: &str) {
        for attr in attrs.trim_matches(';').split(DELIM).filter(|a| !a.is_empty()) {
            let attr = attr.to_lowercase();
            if let Some((key, value)) = attr.split_once('=') {
                self.set_attribute(key, value);
            }
        }
    }

    /// Kaku receivers report short ids; pad them to the 6 hex digits used
    /// when addressing the same device.
    fn normalize_kaku_id(&mut self) {
        if self.protocol != "kaku" {
            return;
        }
        if let Some(id) = self.id.as_mut() {
            if id.len() < 6 {
                *id = format!("{:0>6}", id);
            }
        }
    }
}

fn parse_banner(text: &str) -> Option<Banner> {
    let caps = BANNER_RE.captures(text)?;
    Some(Banner {
        hardware: caps["hardware"].to_string(),
        firmware: caps["firmware"].to_string(),
        version: caps["version"].to_string(),
        revision: caps["revision"].to_string(),
    })
}

fn split_node(line: &str) -> PacketResult<(Origin, &str)> {
    let (node_id, rest) = line
        .split_once(DELIM)
        .ok_or_else(|| PacketError::InvalidPacket(line.to_string()))?;
    let node =
        Origin::from_node_id(node_id).ok_or_else(|| PacketError::UnknownNode(node_id.to_string()))?;
    Ok((node, rest))
}

/// Break a gateway packet down into its primitives.
///
/// Attribute values that fail conversion are logged and skipped; the rest
/// of the packet still decodes.
///
/// ```
/// use rflink_protocol::{decode_packet, Origin};
///
/// let packet = decode_packet("20;06;Kaku;ID=41;SWITCH=1;CMD=ON;").unwrap();
/// assert_eq!(packet.node, Origin::Gateway);
/// assert_eq!(packet.protocol, "kaku");
/// assert_eq!(packet.id.as_deref(), Some("000041"));
/// assert_eq!(packet.switch.as_deref(), Some("1"));
/// assert_eq!(packet.command.as_deref(), Some("on"));
/// ```
pub fn decode_packet(line: &str) -> PacketResult<DecodedPacket> {
    let (node, mut rest) = split_node(line)?;
    if node == Origin::Echo {
        // echoes embed the gateway node id: `11;20;0B;NewKaku;...`
        rest = rest.strip_prefix("20;").unwrap_or(rest);
    }

    let mut parts = rest.splitn(3, DELIM);
    let sequence = parts.next().unwrap_or_default();
    let head = parts.next().unwrap_or_default();
    let mut attrs = parts.next().unwrap_or_default().to_string();

    let mut packet = DecodedPacket::new(node, PacketKind::Report);

    if head.contains('=') {
        attrs = format!("{}{}{}", head, DELIM, attrs);
    } else if head.contains(BANNER_MARKER) {
        packet.kind = match parse_banner(head) {
            Some(banner) => PacketKind::Banner(banner),
            None => PacketKind::Message(head.to_string()),
        };
    } else if head == "PONG" {
        packet.kind = PacketKind::Pong;
    } else if head.eq_ignore_ascii_case("debug") {
        packet.protocol = "debug".to_string();
        packet.kind = if attrs.starts_with("RTS P1") {
            let p1 = attrs.trim_matches(';').split(DELIM).nth(1).unwrap_or_default();
            PacketKind::Debug(DebugData::Rts { p1: p1.to_string() })
        } else {
            PacketKind::Debug(DebugData::Timing {
                tm: sequence.to_string(),
            })
        };
    } else if head == "CMD UNKNOWN" {
        packet.kind = PacketKind::Response { ok: false };
    } else if head == "OK" {
        packet.kind = PacketKind::Response { ok: true };
    } else if node == Origin::Gateway && attrs.is_empty() {
        packet.kind = PacketKind::Message(head.to_string());
    } else if !head.is_empty() {
        packet.protocol = head.to_lowercase();
    }

    packet.parse_attributes(&attrs);
    packet.normalize_kaku_id();
    Ok(packet)
}

/// Decode a transmit packet sent by a downstream client.
///
/// Clients send the abbreviated command form `10;<protocol>;<id>;<switch>;<command>;`
/// where fields are positional rather than `KEY=value` attributes.
///
/// ```
/// use rflink_protocol::decode_tx_packet;
///
/// let packet = decode_tx_packet("10;NewKaku;000001;01;ON;").unwrap();
/// assert_eq!(packet.protocol, "newkaku");
/// assert_eq!(packet.command.as_deref(), Some("ON"));
/// ```
pub fn decode_tx_packet(line: &str) -> PacketResult<DecodedPacket> {
    let (node, rest) = split_node(line)?;
    let (protocol, attrs) = rest
        .split_once(DELIM)
        .ok_or(PacketError::MissingField("protocol"))?;

    let mut packet = DecodedPacket::new(node, PacketKind::Report);
    packet.protocol = protocol.to_lowercase();

    let mut positional = attrs.trim_matches(';').split(DELIM).filter(|a| !a.is_empty());
    packet.id = positional.next().map(str::to_string);
    packet.switch = positional.next().map(str::to_string);
    packet.command = positional.next().map(str::to_string);

    packet.normalize_kaku_id();
    Ok(packet)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_switch_report() {
        let packet = decode_packet("20;46;Kaku;ID=44;SWITCH=4;CMD=OFF;").unwrap();
        assert_eq!(packet.command.as_deref(), Some("off"));
        assert_eq!(packet.switch.as_deref(), Some("4"));
        assert_eq!(packet.id.as_deref(), Some("000044"));
    }

    #[test]
    fn test_decode_sensor_units() {
        let packet = decode_packet("20;36;Alecto V1;ID=0334;TEMP=800d;HUM=33;BAT=OK;").unwrap();
        assert_eq!(packet.protocol, "alecto v1");
        let temp = packet.fields.get("temperature").unwrap();
        assert_eq!(temp.value, FieldValue::Float(-1.3));
        assert_eq!(temp.unit, Some("°C"));
        assert_eq!(packet.fields.value("humidity"), Some(&FieldValue::Int(33)));
        assert_eq!(packet.fields.text("battery"), Some("ok"));
        assert_eq!(packet.fields.get("battery").unwrap().unit, None);
    }

    #[test]
    fn test_decode_banner() {
        let packet =
            decode_packet("20;00;Nodo RadioFrequencyLink - RFLink Gateway V1.1 - R45;").unwrap();
        assert_eq!(
            packet.kind,
            PacketKind::Banner(Banner {
                hardware: "Nodo RadioFrequencyLink".to_string(),
                firmware: "RFLink Gateway".to_string(),
                version: "1.1".to_string(),
                revision: "45".to_string(),
            })
        );
        assert!(packet.has_unknown_protocol());
    }

    #[test]
    fn test_decode_version_attributes() {
        let packet = decode_packet("20;01;VER=1.1;REV=45;BUILD=04;").unwrap();
        assert!(packet.has_unknown_protocol());
        assert_eq!(packet.version(), Some("1.1"));
        assert_eq!(packet.revision(), Some("45"));
        assert_eq!(packet.fields.text("build"), Some("04"));
    }

    #[test]
    fn test_decode_responses() {
        let ok = decode_packet("20;02;OK;").unwrap();
        assert_eq!(ok.ok(), Some(true));

        let unknown = decode_packet("20;01;CMD UNKNOWN;").unwrap();
        assert_eq!(unknown.ok(), Some(false));
        assert_eq!(unknown.response(), Some("command_unknown"));
    }

    #[test]
    fn test_decode_pong() {
        let packet = decode_packet("20;01;PONG;").unwrap();
        assert!(packet.is_pong());
        assert!(!packet.is_response());
    }

    #[test]
    fn test_decode_message() {
        let packet = decode_packet("20;00;Internal Pullup on RF-in disabled;").unwrap();
        assert_eq!(
            packet.kind,
            PacketKind::Message("Internal Pullup on RF-in disabled".to_string())
        );
    }

    #[test]
    fn test_decode_debug() {
        let rts = decode_packet("20;84;Debug;RTS P1;a63f33003cf000665a5a;").unwrap();
        assert_eq!(rts.protocol, "debug");
        assert_eq!(
            rts.kind,
            PacketKind::Debug(DebugData::Rts {
                p1: "a63f33003cf000665a5a".to_string()
            })
        );

        let timing = decode_packet("20;75;DEBUG;Pulses=90;Pulses(uSec)=1200,2760,120;").unwrap();
        assert_eq!(timing.kind, PacketKind::Debug(DebugData::Timing { tm: "75".to_string() }));
        assert_eq!(timing.fields.text("pulses"), Some("90"));
        assert_eq!(timing.fields.text("pulses(usec)"), Some("1200,2760,120"));
    }

    #[test]
    fn test_decode_echo() {
        let packet = decode_packet("11;20;0B;NewKaku;ID=000005;SWITCH=2;CMD=ON;").unwrap();
        assert_eq!(packet.node, Origin::Echo);
        assert_eq!(packet.protocol, "newkaku");
        assert_eq!(packet.id.as_deref(), Some("000005"));
    }

    #[test]
    fn test_bad_attribute_is_skipped() {
        let packet = decode_packet("20;2D;UPM/Esic;ID=0001;TEMP=zz;HUM=16;").unwrap();
        assert!(!packet.fields.contains("temperature"));
        assert_eq!(packet.fields.value("humidity"), Some(&FieldValue::Int(16)));
    }

    #[test]
    fn test_command_keeps_extra_equals() {
        let packet = decode_packet("20;9A;FA500;ID=0000db9e;SWITCH=01;CMD=SET_LEVEL=2;").unwrap();
        assert_eq!(packet.command.as_deref(), Some("set_level=2"));
    }

    #[test]
    fn test_unknown_node() {
        assert_eq!(
            decode_packet("30;00;OK;").unwrap_err(),
            PacketError::UnknownNode("30".to_string())
        );
    }

    #[test]
    fn test_decode_tx_packet() {
        let packet = decode_tx_packet("10;Kaku;41;1;ON;").unwrap();
        assert_eq!(packet.node, Origin::Master);
        assert_eq!(packet.id.as_deref(), Some("000041"));
        assert_eq!(packet.switch.as_deref(), Some("1"));
        assert_eq!(packet.command.as_deref(), Some("ON"));

        let ping = decode_tx_packet("10;PING;").unwrap();
        assert_eq!(ping.protocol, "ping");
        assert!(ping.command.is_none());
    }
}
