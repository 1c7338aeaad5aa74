//! Multi-client TCP relay for an RFLink gateway.
//!
//! Many consumers can share one gateway: gateway reports are broadcast to
//! every connected client, and client commands are funnelled through a
//! single upstream connection so acknowledgments stay matched to the
//! command that caused them.
//!
//! ```rust,no_run
//! use rflink_client::Endpoint;
//! use rflink_proxy::ProxyConfig;
//!
//! # async fn run() -> rflink_proxy::ProxyResult<()> {
//! let config = ProxyConfig::default().with_endpoint(Endpoint::tcp("rflink.local", 1234));
//! let relay = rflink_proxy::start(config).await?;
//! println!("relaying on {}", relay.local_addr());
//! relay.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod server;

pub use config::*;
pub use error::*;
pub use server::*;
