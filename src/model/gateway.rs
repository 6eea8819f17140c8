// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Gateways and the devices they manage.

use std::ops::Deref;
use std::sync::Arc;

use crate::model::attributes::{GatewayAttributes, HvacAttributes, Occupant};
use crate::model::device::{Device, HvacDevice, Refresher, Updater};

/// A gateway acting between Unisenza devices and the cloud service.
///
/// The children are created together with the gateway and the list never
/// changes afterwards. Devices added or removed on the service side appear
/// only after the client repopulates its devices.
pub struct Gateway {
    device: Device<GatewayAttributes>,
    children: Vec<Arc<HvacDevice>>,
}

impl Gateway {
    /// Creates a gateway and its children.
    ///
    /// The gateway and every child dispatch refresh and update requests
    /// through the same `refresher` and `updater`, bound to this gateway.
    pub fn new(
        attributes: GatewayAttributes,
        children: impl IntoIterator<Item = HvacAttributes>,
        refresher: Arc<dyn Refresher>,
        updater: Arc<dyn Updater>,
    ) -> Self {
        let gateway_code = attributes.common.device_code.clone();
        let children = children
            .into_iter()
            .map(|child| {
                Arc::new(HvacDevice::new(
                    child,
                    gateway_code.clone(),
                    Arc::clone(&refresher),
                    Arc::clone(&updater),
                ))
            })
            .collect();

        Self {
            device: Device::new(attributes, gateway_code, refresher, updater),
            children,
        }
    }

    /// Returns the devices managed by this gateway.
    #[must_use]
    pub fn children(&self) -> &[Arc<HvacDevice>] {
        &self.children
    }

    /// Returns the child with the given device code.
    #[must_use]
    pub fn child(&self, device_code: &str) -> Option<&Arc<HvacDevice>> {
        self.children
            .iter()
            .find(|child| child.device_code() == device_code)
    }

    /// Returns the device codes of the gateway and all of its children.
    #[must_use]
    pub fn thing_codes(&self) -> Vec<String> {
        std::iter::once(self.device_code().to_string())
            .chain(self.children.iter().map(|c| c.device_code().to_string()))
            .collect()
    }

    /// Returns the occupant of the gateway.
    #[must_use]
    pub fn occupant(&self) -> Occupant {
        self.attributes().occupant.clone()
    }

    /// Returns the IP address of the gateway.
    #[must_use]
    pub fn ip_address(&self) -> Option<String> {
        self.attributes().ip_address.clone()
    }

    /// Returns the MAC address of the gateway.
    #[must_use]
    pub fn mac_address(&self) -> Option<String> {
        self.attributes().mac_address.clone()
    }
}

impl Deref for Gateway {
    type Target = Device<GatewayAttributes>;

    fn deref(&self) -> &Self::Target {
        &self.device
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("device", &self.device)
            .field("children", &self.children.len())
            .finish()
    }
}
