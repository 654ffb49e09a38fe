//! # lifx_lights_rs
//!
//! An async Rust library for discovering and controlling LIFX smart lights
//! on the local network.
//!
//! This crate provides a **runtime-agnostic** engine that discovers lights
//! via UDP broadcast, keeps a live registry of their attributes (label,
//! group, location, power, color), resolves selector expressions like
//! `group:Kitchen` to concrete device sets, and fans control commands out
//! to those sets concurrently with per-device success/failure reporting.
//!
//! The wire protocol itself (packet encoding and the UDP socket) is a
//! pluggable collaborator: bring any [`Transport`] implementation and the
//! rest of the engine works against it, which is also how the crate tests
//! itself without a network.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use lifx_lights_rs::{Client, PowerState, Transport};
//!
//! async fn run(transport: Arc<dyn Transport>) -> Result<(), lifx_lights_rs::Error> {
//!     let client = Client::new(transport);
//!     client.start_discovery();
//!
//!     // Give the first discovery cycle a moment to land.
//!     tokio::time::sleep(Duration::from_secs(2)).await;
//!
//!     for light in client.list_lights("all").await.lights {
//!         println!("{} {:?}", light.serial, light.label);
//!     }
//!
//!     client.set_power("group:Kitchen", PowerState::On, 500).await?;
//!     client.set_color("label:Desk", &serde_json::json!("red"), 0).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Discovery**: periodic broadcast with boot-time repeat and staleness
//!   eviction, driven by [`DiscoveryLoop`]
//! - **Registry**: idempotent, serial-keyed device store with one-time
//!   attribute enrichment ([`DeviceRegistry`])
//! - **Selectors**: `all`, bare serials, and `serial:`/`label:`/`group:`/
//!   `location:` prefixes ([`Selector`])
//! - **Colors**: named colors, `#RRGGBB`, and partial HSBK objects, all
//!   normalized to the device-native quad ([`Hsbk`])
//! - **Batch control**: bounded concurrent fan-out with per-call deadlines
//!   and independent per-device results ([`Dispatcher`])
//!
//! ## Selector grammar
//!
//! `all | <serial> | serial:<id> | label:<name> | group:<name> |
//! location:<name>`. Unknown prefixes are accepted and simply match
//! nothing.
//!
//! ## Runtime Selection
//!
//! This library is runtime-agnostic. Select your preferred runtime using
//! feature flags:
//!
//! ### Using tokio (default)
//!
//! ```toml
//! [dependencies]
//! lifx-lights-rs = "0.1"
//! tokio = { version = "1", features = ["rt-multi-thread", "macros"] }
//! ```
//!
//! ### Using async-std
//!
//! ```toml
//! [dependencies]
//! lifx-lights-rs = { version = "0.1", default-features = false, features = ["runtime-async-std"] }
//! async-std = { version = "1.12", features = ["attributes"] }
//! ```
//!
//! ### Using smol
//!
//! ```toml
//! [dependencies]
//! lifx-lights-rs = { version = "0.1", default-features = false, features = ["runtime-smol"] }
//! smol = "2"
//! ```
//!
//! ## Feature Flags
//!
//! - `runtime-tokio` (default): Use the tokio async runtime
//! - `runtime-async-std`: Use the async-std runtime
//! - `runtime-smol`: Use the smol runtime

mod client;
mod discovery;
mod dispatch;
mod errors;
mod fetch;
mod groups;
mod registry;
pub mod runtime;
pub mod selector;
mod transport;
mod types;

// Re-export public API
pub use client::{
    BrightnessReport, Client, ClientOptions, ColorReport, LightEntry, LightsReport, ToggleReport,
};
pub use discovery::DiscoveryLoop;
pub use dispatch::{CommandResult, Dispatcher, Operation, Outcome};
pub use errors::Error;
pub use groups::{Group, GroupRegistry};
pub use registry::{Device, DeviceEvent, DeviceInfo, DeviceRegistry};
pub use selector::Selector;
pub use transport::{Announcement, Query, Request, Response, Transport};
pub use types::{Hsbk, PowerState};
