//! RFLink Gateway Wire Protocol
//!
//! This crate provides the pure, I/O free part of talking to an RFLink
//! 433MHz gateway: validating and decoding packet lines, encoding device
//! commands, addressing devices by a stable string id, and breaking packets
//! down into independently addressable events.
//!
//! # Protocol Overview
//!
//! The gateway speaks a line based text protocol over serial (57600 baud) or
//! a TCP bridge:
//!
//! - **Packets** are `;` delimited and terminated with CRLF.
//! - **Node id** leads every packet: `10` (host command), `11` (echo of a
//!   transmitted command), `20` (gateway report).
//! - **Reports** carry a sequence number, a protocol name and `KEY=value`
//!   attributes: `20;2D;UPM/Esic;ID=0001;TEMP=00cf;HUM=16;BAT=OK;`
//! - **Commands** are positional: `10;NewKaku;000001;01;ON;`
//! - **Responses** to commands are `20;<seq>;OK;` or `20;<seq>;CMD UNKNOWN;`.
//!
//! # Example
//!
//! ```
//! use rflink_protocol::{decode_packet, decompose_at, DeviceCommand, PacketFramer};
//!
//! let mut framer = PacketFramer::new();
//! framer.push(b"20;2D;UPM/Esic;ID=0001;TEMP=00cf;HUM=16;BAT=OK;\r\n");
//! let line = framer.next_packet().unwrap();
//!
//! let packet = decode_packet(&line).unwrap();
//! for event in decompose_at(&packet, 0) {
//!     println!("{}", event);
//! }
//!
//! let cmd = DeviceCommand::parse("newkaku_000001_01", "on").unwrap();
//! assert_eq!(cmd.encode(), "10;newkaku;000001;01;on;");
//! ```

mod codec;
mod commands;
mod error;
mod events;
mod fields;
mod grammar;
mod packet;

pub use codec::*;
pub use commands::*;
pub use error::*;
pub use events::*;
pub use fields::*;
pub use grammar::*;
pub use packet::*;
