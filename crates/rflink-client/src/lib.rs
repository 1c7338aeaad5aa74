//! Async RFLink gateway connection.
//!
//! This crate drives a gateway over a serial port or TCP bridge: it frames
//! and decodes incoming packets, matches command acknowledgments to the
//! command that is in flight, and turns reports into filtered events.
//!
//! # Example
//!
//! ```rust,no_run
//! use rflink_client::{connect, ConnectionConfig, Endpoint, Handlers, IgnoreList};
//!
//! # async fn run() -> rflink_client::ClientResult<()> {
//! let handlers = Handlers::new().on_event(|event| println!("{}", event));
//! let config = ConnectionConfig::default().with_ignore(IgnoreList::new(["kaku_*"]));
//! let conn = connect(&Endpoint::serial("/dev/ttyACM0"), handlers, config).await?;
//!
//! let outcome = conn.send_command_ack("newkaku_000001_01", "on").await?;
//! println!("command {}", outcome);
//! conn.close().await;
//! # Ok(())
//! # }
//! ```

mod ack;
mod config;
mod connection;
mod error;
mod pipeline;
pub mod transport;

pub use ack::*;
pub use config::*;
pub use connection::*;
pub use error::*;
pub use pipeline::*;
