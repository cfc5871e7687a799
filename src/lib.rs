// MIT License - Copyright (c) 2026 Peter Wright
// Async client for the WattBox integration protocol
//
//! # wattbox-client
//!
//! Client for the SnapAV WattBox integration protocol (v2.4), spoken over
//! telnet or TLS.
//!
//! A single authenticated connection is shared by every caller. Commands
//! issued concurrently are queued and sent one at a time; each reply is
//! matched to the oldest outstanding command. Lines the device pushes on
//! its own (`~OutletStatus=...`) are delivered as events. The connection
//! logs in again and replays queued commands after transport faults,
//! backing off exponentially between attempts.
//!
//! ## Quick Start
//!
//! ```no_run
//! use wattbox_client::{ClientConfig, ClientEvent, WattBox};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ClientConfig::builder()
//!         .host("192.168.1.50")
//!         .credentials("wattbox", "wattbox")
//!         .build();
//!
//!     let wattbox = WattBox::connect(config).await?;
//!
//!     let mut events = wattbox.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             if let ClientEvent::Unsolicited(msg) = event {
//!                 println!("{}", msg);
//!             }
//!         }
//!     });
//!
//!     println!("{:#?}", wattbox.system_info().await?);
//!     wattbox.outlet_off(4).await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     wattbox.close().await;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod codec;
pub mod config;
pub mod connection;
pub mod constants;
pub mod device;
mod dispatcher;
pub mod error;
pub mod event;
pub mod models;
pub mod protocol;
pub mod retry;
pub mod transport;

// Re-exports for convenience
pub use codec::{CommandKind, Line};
pub use config::{AuthConfig, ClientConfig, ClientConfigBuilder, TlsConfig, TransportKind};
pub use connection::{CallbackGuard, Connection, ConnectionState};
pub use device::WattBox;
pub use error::{Result, WattBoxError};
pub use event::{ClientEvent, EventReceiver};
pub use models::{
    DeviceCapabilities, DeviceInfo, OutletAction, OutletInfo, OutletMode, OutletPower,
    PowerStatus, RebootOperation, SystemInfo, UnsolicitedMessage, UpsStatus,
};
pub use protocol::{Command, Reply};
pub use transport::{BoxedStream, ConnectFuture, Connector};
