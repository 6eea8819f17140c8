// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `upgw` - A Rust library to monitor and control Unisenza Plus gateways
//! and thermostats.
//!
//! The cloud service exposes every device as an AWS IoT device shadow. This
//! library keeps an in-memory model of the gateways and their HVAC devices
//! in sync with those shadows over one MQTT session per gateway.
//!
//! # Supported Features
//!
//! - **Device discovery**: Gateways and thermostats from the service API
//! - **State refresh**: Current temperature, setpoint, mode, running state
//! - **Control**: Target temperature and system mode
//! - **Live updates**: Pushed shadow documents update the model and notify
//!   subscribers
//! - **Recovery**: Automatic reconnection with availability tracking
//!
//! # Quick Start
//!
//! The identity provider and the handshake signer are supplied by the
//! application.
//!
//! ```no_run
//! use std::sync::Arc;
//! use upgw::{Client, ClientBuilder, ClientConfig, SystemMode};
//! use upgw::transport::{HandshakeSigner, MqttConnector};
//! # use upgw::api::IdentityProvider;
//!
//! # async fn run(
//! #     identity: Arc<dyn IdentityProvider>,
//! #     signer: Arc<dyn HandshakeSigner>,
//! # ) -> upgw::Result<()> {
//! let config = ClientConfig::from_env();
//! let connector = MqttConnector::from_config(&config, signer);
//!
//! let builder = ClientBuilder::new()
//!     .with_config(config)
//!     .with_identity_provider(identity)
//!     .with_connector(Arc::new(connector));
//! let client = Client::connect(builder, "user@example.com", "secret").await?;
//!
//! client.refresh_all_devices().await?;
//! for device in client.devices() {
//!     println!("{}: {:?}", device.name(), device.current_temperature());
//!     device.update_target_temperature(21.5).await?;
//!     device.update_system_mode(SystemMode::Heat).await?;
//! }
//!
//! client.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Logging
//!
//! The library logs through [`tracing`]. Install any subscriber to see
//! connection, request and reconnection events.

pub mod api;
mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod model;
pub mod shadow;
pub mod subscription;
pub mod transport;

pub use client::{Client, ClientBuilder, DeviceHandle};
pub use config::{ClientConfig, ReconnectionPolicy};
pub use error::{Error, IdentityError, ParseError, ProtocolError, Result};
pub use model::{
    Attribute, AttributeChange, AttributeChanges, Device, DeviceType, Gateway, HvacDevice,
    Occupant, RunningState, SystemMode,
};
pub use subscription::SubscriptionId;
