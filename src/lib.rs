//! # udp_led_rs
//!
//! An async Rust library for discovering and controlling LED devices on the
//! local network over UDP broadcast.
//!
//! Devices listen for JSON commands on a broadcast port and answer on a
//! separate listen port. A [`Controller`] owns both sockets, runs a
//! background listener that records every device it hears from, and offers
//! discovery plus fire-and-forget commands (color, power, effect, status).
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use udp_led_rs::{Brightness, Color, Controller, ControllerConfig, PowerMode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut controller = Controller::start(ControllerConfig::default()).await?;
//!
//!     let devices = controller.discover(Duration::from_secs(3)).await;
//!     println!("Found {} device(s)", devices.len());
//!
//!     // Everyone red, then switch one device off.
//!     controller.set_color(&Color::rgb(255, 0, 0), Brightness::new(), None).await?;
//!     if let Some(device) = devices.first() {
//!         controller.set_power(&PowerMode::Off, Some(device.address)).await?;
//!     }
//!
//!     controller.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Discovery**: broadcast a `discover` request and collect replies with [`Controller::discover`]
//! - **Colors**: RGB plus brightness using [`Color`] and [`Brightness`]
//! - **Effects**: firmware effects with [`Effect`] and [`Speed`]
//! - **Power Control**: on/off with [`PowerMode`]
//! - **Live Replies**: observe every decoded reply via [`Controller::on_reply`]
//!
//! ## Communication
//!
//! Commands are flat JSON objects carrying a `cmd` discriminator and a
//! `timestamp`, sent to port 9999 by default. Devices reply to port 9998
//! with a JSON object that should include a `device_id`. Delivery is
//! best-effort; nothing is retried or acknowledged.

pub mod codec;
mod command;
mod config;
mod controller;
mod discovery;
mod dispatcher;
mod errors;
mod listener;
mod registry;
pub mod runtime;
mod transport;
mod types;

// Re-export public API
pub use codec::{Envelope, Reply};
pub use command::Command;
pub use config::ControllerConfig;
pub use controller::{Controller, Diagnostics};
pub use discovery::{Discovery, DiscoveryPhase};
pub use dispatcher::Dispatcher;
pub use errors::{Error, ErrorKind};
pub use listener::{Listener, ListenerStats, ReplyCallback, synthetic_device_id};
pub use registry::{DeviceRecord, DeviceRegistry, DiscoveredDevice};
pub use transport::{MAX_DATAGRAM, Received, Transport};
pub use types::{Brightness, Color, Effect, PowerMode, Speed};
