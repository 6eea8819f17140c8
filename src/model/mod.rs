// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory device model.
//!
//! - [`Gateway`] - a gateway and its fixed list of child devices
//! - [`Device`] / [`HvacDevice`] - observable devices holding attribute snapshots
//! - [`AttributeChanges`] - change sets applied to devices and sent to the service
//!
//! Devices do not know about shadow sessions. Refresh and update requests
//! go through the [`Refresher`] and [`Updater`] bound at construction.

mod attributes;
mod device;
mod gateway;

pub use attributes::{
    Attribute, AttributeChange, AttributeChanges, Attributes, DeviceAttributes, DeviceType,
    GatewayAttributes, HvacAttributes, Occupant, RunningState, SystemMode,
};
pub use device::{Device, DeviceSubscriber, DeviceTarget, HvacDevice, Refresher, Updater};
pub use gateway::Gateway;
