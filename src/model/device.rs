// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Observable devices.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::Result;
use crate::model::attributes::{
    AttributeChange, AttributeChanges, Attributes, DeviceType, HvacAttributes, RunningState,
    SystemMode,
};
use crate::subscription::{CallbackList, SubscriptionId};

/// Identifies a device together with the gateway it is reached through.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceTarget {
    /// Code of the gateway owning the shadow session.
    pub gateway_code: String,
    /// Code of the device itself.
    pub device_code: String,
}

/// Refreshes the state of a device from the cloud service.
#[async_trait]
pub trait Refresher: Send + Sync {
    /// Requests the current state of `target` and applies it to the model.
    async fn refresh(&self, target: &DeviceTarget) -> Result<()>;
}

/// Sends attribute changes of a device to the cloud service.
#[async_trait]
pub trait Updater: Send + Sync {
    /// Publishes `changes` for `target`.
    async fn update(&self, target: &DeviceTarget, changes: &AttributeChanges) -> Result<()>;
}

/// Callback notified with the device and the changes applied to it.
pub type DeviceSubscriber<A> = dyn Fn(&Device<A>, &AttributeChanges) + Send + Sync;

/// A managed device.
///
/// A device is a live handle for data managed by a [`Client`](crate::Client).
/// It holds the latest attribute snapshot, which is replaced as a whole on
/// every change, and notifies subscribers after each replacement.
pub struct Device<A: Attributes> {
    attributes: RwLock<Arc<A>>,
    subscribers: CallbackList<DeviceSubscriber<A>>,
    target: DeviceTarget,
    refresher: Arc<dyn Refresher>,
    updater: Arc<dyn Updater>,
}

/// A HVAC device (smart thermostat).
pub type HvacDevice = Device<HvacAttributes>;

impl<A: Attributes> Device<A> {
    /// Creates a device reached through the gateway `gateway_code`.
    pub fn new(
        attributes: A,
        gateway_code: impl Into<String>,
        refresher: Arc<dyn Refresher>,
        updater: Arc<dyn Updater>,
    ) -> Self {
        let target = DeviceTarget {
            gateway_code: gateway_code.into(),
            device_code: attributes.common().device_code.clone(),
        };
        Self {
            attributes: RwLock::new(Arc::new(attributes)),
            subscribers: CallbackList::new(),
            target,
            refresher,
            updater,
        }
    }

    /// Returns the current attribute snapshot.
    #[must_use]
    pub fn attributes(&self) -> Arc<A> {
        Arc::clone(&self.attributes.read())
    }

    /// Returns the device id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.attributes.read().common().id
    }

    /// Returns the device type.
    #[must_use]
    pub fn device_type(&self) -> DeviceType {
        self.attributes.read().common().device_type
    }

    /// Returns the device code.
    #[must_use]
    pub fn device_code(&self) -> &str {
        &self.target.device_code
    }

    /// Returns the code of the gateway this device is reached through.
    #[must_use]
    pub fn gateway_code(&self) -> &str {
        &self.target.gateway_code
    }

    /// Returns the device and gateway codes.
    #[must_use]
    pub fn target(&self) -> &DeviceTarget {
        &self.target
    }

    /// Returns the device model.
    #[must_use]
    pub fn model(&self) -> String {
        self.attributes.read().common().model.clone()
    }

    /// Returns the device name.
    #[must_use]
    pub fn name(&self) -> String {
        self.attributes.read().common().name.clone()
    }

    /// Returns the firmware version.
    #[must_use]
    pub fn firmware_version(&self) -> Option<String> {
        self.attributes.read().common().firmware_version.clone()
    }

    /// Returns `true` if the cloud connection is established and the
    /// upstream reports the device available.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.attributes.read().common().available
    }

    /// Applies changes to the in-memory attributes.
    ///
    /// The changes are not sent to the cloud service. An empty change set
    /// does nothing. Otherwise the new snapshot is committed before any
    /// subscriber runs, and subscribers are called in registration order.
    pub fn set_attributes(&self, changes: &AttributeChanges) {
        if changes.is_empty() {
            return;
        }

        {
            let mut current = self.attributes.write();
            let next = current.evolve(changes);
            *current = Arc::new(next);
        }

        tracing::debug!(
            device = %self.target.device_code,
            changes = changes.len(),
            "Device attributes changed"
        );

        self.subscribers
            .dispatch(|subscriber| subscriber(self, changes));
    }

    /// Registers a callback notified after every attribute change.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Device<A>, &AttributeChanges) + Send + Sync + 'static,
    {
        self.subscribers.add(Arc::new(callback))
    }

    /// Removes a callback registered with [`subscribe`](Self::subscribe).
    ///
    /// Returns `true` if the callback was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.remove(id)
    }

    /// Refreshes the state of the device from the cloud service.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Client`](crate::Error::Client) if the request fails.
    pub async fn refresh(&self) -> Result<()> {
        self.refresher.refresh(&self.target).await
    }

    /// Sends attribute changes to the cloud service.
    ///
    /// The in-memory attributes change only once the service echoes the
    /// applied state; use [`subscribe`](Self::subscribe) to observe that.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Client`](crate::Error::Client) if the request fails.
    pub async fn update(&self, changes: &AttributeChanges) -> Result<()> {
        self.updater.update(&self.target, changes).await
    }
}

impl HvacDevice {
    /// Returns the manufacturer.
    #[must_use]
    pub fn manufacturer(&self) -> Option<String> {
        self.attributes.read().manufacturer.clone()
    }

    /// Returns the serial number.
    #[must_use]
    pub fn serial_number(&self) -> Option<String> {
        self.attributes.read().serial_number.clone()
    }

    /// Returns the system mode.
    #[must_use]
    pub fn system_mode(&self) -> Option<SystemMode> {
        self.attributes.read().system_mode
    }

    /// Returns the running state.
    #[must_use]
    pub fn running_state(&self) -> Option<RunningState> {
        self.attributes.read().running_state
    }

    /// Returns the setpoint temperature.
    #[must_use]
    pub fn target_temperature(&self) -> Option<f64> {
        self.attributes.read().target_temperature
    }

    /// Returns the measured temperature.
    #[must_use]
    pub fn current_temperature(&self) -> Option<f64> {
        self.attributes.read().current_temperature
    }

    /// Returns the minimum setpoint temperature.
    #[must_use]
    pub fn min_temp(&self) -> Option<f64> {
        self.attributes.read().min_temp
    }

    /// Returns the maximum setpoint temperature.
    #[must_use]
    pub fn max_temp(&self) -> Option<f64> {
        self.attributes.read().max_temp
    }

    /// Updates the system mode.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Client`](crate::Error::Client) if the request fails.
    pub async fn update_system_mode(&self, mode: SystemMode) -> Result<()> {
        self.update(&AttributeChanges::new().with(AttributeChange::SystemMode(mode)))
            .await
    }

    /// Updates the setpoint temperature.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Client`](crate::Error::Client) if the request fails.
    pub async fn update_target_temperature(&self, temperature: f64) -> Result<()> {
        self.update(&AttributeChanges::new().with(AttributeChange::TargetTemperature(temperature)))
            .await
    }
}

impl<A: Attributes> std::fmt::Debug for Device<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("target", &self.target)
            .field("attributes", &self.attributes())
            .field("subscribers", &self.subscribers.len())
            .finish_non_exhaustive()
    }
}
