// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Attribute records and change sets.
//!
//! Attribute records are immutable snapshots. A change set never mutates a
//! record in place; [`Attributes::evolve`] produces a new record with the
//! changed fields applied, leaving earlier snapshots untouched for readers
//! that still hold them.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ParseError;

/// Type of a managed device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// A gateway bridging devices to the cloud service.
    Gateway,
    /// A heating device (smart thermostat).
    Hvac,
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gateway => write!(f, "gateway"),
            Self::Hvac => write!(f, "hvac"),
        }
    }
}

/// HVAC system mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SystemMode {
    /// Heating is switched off.
    Off,
    /// Heating is enabled.
    Heat,
}

impl SystemMode {
    /// Returns the value used on the wire.
    #[must_use]
    pub fn value(self) -> i64 {
        match self {
            Self::Off => 0,
            Self::Heat => 4,
        }
    }
}

impl TryFrom<i64> for SystemMode {
    type Error = ParseError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Off),
            4 => Ok(Self::Heat),
            other => Err(ParseError::InvalidValue {
                field: "system_mode".to_string(),
                message: format!("unknown system mode {other}"),
            }),
        }
    }
}

/// HVAC running state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunningState {
    /// The device is not heating.
    Idle,
    /// The device is heating.
    Heating,
}

impl RunningState {
    /// Returns the value used on the wire.
    #[must_use]
    pub fn value(self) -> i64 {
        match self {
            Self::Idle => 0,
            Self::Heating => 1,
        }
    }
}

impl TryFrom<i64> for RunningState {
    type Error = ParseError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Idle),
            1 => Ok(Self::Heating),
            other => Err(ParseError::InvalidValue {
                field: "running_state".to_string(),
                message: format!("unknown running state {other}"),
            }),
        }
    }
}

/// The cloud identity that owns a gateway.
///
/// Transport credentials are issued per occupant, so the occupant is the key
/// of the [`CredentialStore`](crate::credentials::CredentialStore).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Occupant {
    /// Occupant id.
    pub id: Uuid,
    /// Cognito identity of the occupant.
    pub identity_id: String,
}

/// Attributes common to every device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceAttributes {
    /// Device id assigned by the cloud service.
    pub id: Uuid,
    /// Device type.
    pub device_type: DeviceType,
    /// Device code, also the name of its shadow thing.
    pub device_code: String,
    /// Device model.
    pub model: String,
    /// Device name.
    pub name: String,
    /// Firmware version.
    pub firmware_version: Option<String>,
    /// Whether the device is reachable through the cloud service.
    pub available: bool,
}

impl DeviceAttributes {
    /// Creates common attributes with no firmware and unavailable.
    #[must_use]
    pub fn new(
        id: Uuid,
        device_type: DeviceType,
        device_code: impl Into<String>,
        model: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id,
            device_type,
            device_code: device_code.into(),
            model: model.into(),
            name: name.into(),
            firmware_version: None,
            available: false,
        }
    }

    fn apply(&mut self, change: &AttributeChange) -> bool {
        match change {
            AttributeChange::FirmwareVersion(version) => {
                self.firmware_version = Some(version.clone());
            }
            AttributeChange::Available(available) => self.available = *available,
            _ => return false,
        }
        true
    }
}

/// Attributes of a gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayAttributes {
    /// Common attributes.
    pub common: DeviceAttributes,
    /// Gateway occupant.
    pub occupant: Occupant,
    /// IP address of the gateway.
    pub ip_address: Option<String>,
    /// MAC address of the gateway.
    pub mac_address: Option<String>,
}

impl GatewayAttributes {
    /// Creates gateway attributes.
    #[must_use]
    pub fn new(common: DeviceAttributes, occupant: Occupant) -> Self {
        Self {
            common,
            occupant,
            ip_address: None,
            mac_address: None,
        }
    }
}

/// Attributes of a HVAC device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HvacAttributes {
    /// Common attributes.
    pub common: DeviceAttributes,
    /// Device manufacturer.
    pub manufacturer: Option<String>,
    /// Serial number.
    pub serial_number: Option<String>,
    /// The system mode (state) of the device.
    pub system_mode: Option<SystemMode>,
    /// The running state (action) of the device.
    pub running_state: Option<RunningState>,
    /// The setpoint temperature.
    pub target_temperature: Option<f64>,
    /// The current temperature as measured by the device.
    pub current_temperature: Option<f64>,
    /// Minimum setpoint temperature.
    pub min_temp: Option<f64>,
    /// Maximum setpoint temperature.
    pub max_temp: Option<f64>,
}

impl HvacAttributes {
    /// Creates HVAC attributes with no reported state.
    #[must_use]
    pub fn new(common: DeviceAttributes) -> Self {
        Self {
            common,
            manufacturer: None,
            serial_number: None,
            system_mode: None,
            running_state: None,
            target_temperature: None,
            current_temperature: None,
            min_temp: None,
            max_temp: None,
        }
    }
}

/// The closed set of attributes that can change after construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Attribute {
    /// [`DeviceAttributes::firmware_version`]
    FirmwareVersion,
    /// [`DeviceAttributes::available`]
    Available,
    /// [`GatewayAttributes::ip_address`]
    IpAddress,
    /// [`GatewayAttributes::mac_address`]
    MacAddress,
    /// [`HvacAttributes::manufacturer`]
    Manufacturer,
    /// [`HvacAttributes::serial_number`]
    SerialNumber,
    /// [`HvacAttributes::system_mode`]
    SystemMode,
    /// [`HvacAttributes::running_state`]
    RunningState,
    /// [`HvacAttributes::target_temperature`]
    TargetTemperature,
    /// [`HvacAttributes::current_temperature`]
    CurrentTemperature,
    /// [`HvacAttributes::min_temp`]
    MinTemp,
    /// [`HvacAttributes::max_temp`]
    MaxTemp,
}

/// A new value for one [`Attribute`].
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeChange {
    /// New firmware version.
    FirmwareVersion(String),
    /// New availability.
    Available(bool),
    /// New IP address.
    IpAddress(String),
    /// New MAC address.
    MacAddress(String),
    /// New manufacturer.
    Manufacturer(String),
    /// New serial number.
    SerialNumber(String),
    /// New system mode.
    SystemMode(SystemMode),
    /// New running state.
    RunningState(RunningState),
    /// New setpoint temperature.
    TargetTemperature(f64),
    /// New measured temperature.
    CurrentTemperature(f64),
    /// New minimum setpoint.
    MinTemp(f64),
    /// New maximum setpoint.
    MaxTemp(f64),
}

impl AttributeChange {
    /// Returns the attribute this change applies to.
    #[must_use]
    pub fn attribute(&self) -> Attribute {
        match self {
            Self::FirmwareVersion(_) => Attribute::FirmwareVersion,
            Self::Available(_) => Attribute::Available,
            Self::IpAddress(_) => Attribute::IpAddress,
            Self::MacAddress(_) => Attribute::MacAddress,
            Self::Manufacturer(_) => Attribute::Manufacturer,
            Self::SerialNumber(_) => Attribute::SerialNumber,
            Self::SystemMode(_) => Attribute::SystemMode,
            Self::RunningState(_) => Attribute::RunningState,
            Self::TargetTemperature(_) => Attribute::TargetTemperature,
            Self::CurrentTemperature(_) => Attribute::CurrentTemperature,
            Self::MinTemp(_) => Attribute::MinTemp,
            Self::MaxTemp(_) => Attribute::MaxTemp,
        }
    }
}

/// A set of attribute changes, at most one per [`Attribute`].
///
/// Inserting a second change for the same attribute replaces the first.
///
/// # Examples
///
/// ```
/// use upgw::model::{Attribute, AttributeChange, AttributeChanges, SystemMode};
///
/// let changes = AttributeChanges::new()
///     .with(AttributeChange::TargetTemperature(21.5))
///     .with(AttributeChange::SystemMode(SystemMode::Heat));
///
/// assert_eq!(changes.len(), 2);
/// assert_eq!(
///     changes.get(Attribute::TargetTemperature),
///     Some(&AttributeChange::TargetTemperature(21.5))
/// );
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeChanges {
    changes: BTreeMap<Attribute, AttributeChange>,
}

impl AttributeChanges {
    /// Creates an empty change set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a change, returning the updated set.
    #[must_use]
    pub fn with(mut self, change: AttributeChange) -> Self {
        self.insert(change);
        self
    }

    /// Adds a change, replacing any earlier change of the same attribute.
    pub fn insert(&mut self, change: AttributeChange) {
        self.changes.insert(change.attribute(), change);
    }

    /// Returns the change for an attribute, if present.
    #[must_use]
    pub fn get(&self, attribute: Attribute) -> Option<&AttributeChange> {
        self.changes.get(&attribute)
    }

    /// Returns `true` if the set contains a change for the attribute.
    #[must_use]
    pub fn contains(&self, attribute: Attribute) -> bool {
        self.changes.contains_key(&attribute)
    }

    /// Returns the number of changes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Returns `true` if there are no changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Iterates the changes in attribute order.
    pub fn iter(&self) -> impl Iterator<Item = &AttributeChange> {
        self.changes.values()
    }
}

impl FromIterator<AttributeChange> for AttributeChanges {
    fn from_iter<T: IntoIterator<Item = AttributeChange>>(iter: T) -> Self {
        let mut changes = Self::new();
        for change in iter {
            changes.insert(change);
        }
        changes
    }
}

impl Extend<AttributeChange> for AttributeChanges {
    fn extend<T: IntoIterator<Item = AttributeChange>>(&mut self, iter: T) {
        for change in iter {
            self.insert(change);
        }
    }
}

/// An attribute record that can be evolved by a change set.
pub trait Attributes: Clone + fmt::Debug + Send + Sync + 'static {
    /// Returns the attributes common to every device.
    fn common(&self) -> &DeviceAttributes;

    /// Applies one change in place. Returns `false` if the change does not
    /// apply to this record type.
    fn apply(&mut self, change: &AttributeChange) -> bool;

    /// Returns a new record with every applicable change applied.
    ///
    /// Changes that do not apply to this record type are skipped.
    #[must_use]
    fn evolve(&self, changes: &AttributeChanges) -> Self {
        let mut next = self.clone();
        for change in changes.iter() {
            if !next.apply(change) {
                tracing::debug!(
                    device = %self.common().device_code,
                    attribute = ?change.attribute(),
                    "Ignoring attribute not applicable to device"
                );
            }
        }
        next
    }
}

impl Attributes for GatewayAttributes {
    fn common(&self) -> &DeviceAttributes {
        &self.common
    }

    fn apply(&mut self, change: &AttributeChange) -> bool {
        match change {
            AttributeChange::IpAddress(address) => self.ip_address = Some(address.clone()),
            AttributeChange::MacAddress(address) => self.mac_address = Some(address.clone()),
            other => return self.common.apply(other),
        }
        true
    }
}

impl Attributes for HvacAttributes {
    fn common(&self) -> &DeviceAttributes {
        &self.common
    }

    fn apply(&mut self, change: &AttributeChange) -> bool {
        match change {
            AttributeChange::Manufacturer(value) => self.manufacturer = Some(value.clone()),
            AttributeChange::SerialNumber(value) => self.serial_number = Some(value.clone()),
            AttributeChange::SystemMode(mode) => self.system_mode = Some(*mode),
            AttributeChange::RunningState(state) => self.running_state = Some(*state),
            AttributeChange::TargetTemperature(value) => self.target_temperature = Some(*value),
            AttributeChange::CurrentTemperature(value) => self.current_temperature = Some(*value),
            AttributeChange::MinTemp(value) => self.min_temp = Some(*value),
            AttributeChange::MaxTemp(value) => self.max_temp = Some(*value),
            other => return self.common.apply(other),
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hvac() -> HvacAttributes {
        HvacAttributes::new(DeviceAttributes::new(
            Uuid::new_v4(),
            DeviceType::Hvac,
            "TH1",
            "TRV",
            "Bedroom",
        ))
    }

    #[test]
    fn system_mode_wire_values() {
        assert_eq!(SystemMode::Off.value(), 0);
        assert_eq!(SystemMode::Heat.value(), 4);
        assert_eq!(SystemMode::try_from(4).unwrap(), SystemMode::Heat);
        assert!(SystemMode::try_from(3).is_err());
    }

    #[test]
    fn running_state_wire_values() {
        assert_eq!(RunningState::try_from(0).unwrap(), RunningState::Idle);
        assert_eq!(RunningState::try_from(1).unwrap(), RunningState::Heating);
        assert!(matches!(
            RunningState::try_from(9),
            Err(ParseError::InvalidValue { .. })
        ));
    }

    #[test]
    fn later_change_replaces_earlier() {
        let changes = AttributeChanges::new()
            .with(AttributeChange::TargetTemperature(20.0))
            .with(AttributeChange::TargetTemperature(22.0));

        assert_eq!(changes.len(), 1);
        assert_eq!(
            changes.get(Attribute::TargetTemperature),
            Some(&AttributeChange::TargetTemperature(22.0))
        );
    }

    #[test]
    fn evolve_leaves_original_untouched() {
        let original = hvac();
        let changes: AttributeChanges = [
            AttributeChange::TargetTemperature(21.5),
            AttributeChange::SystemMode(SystemMode::Heat),
            AttributeChange::Available(true),
        ]
        .into_iter()
        .collect();

        let evolved = original.evolve(&changes);

        assert_eq!(evolved.target_temperature, Some(21.5));
        assert_eq!(evolved.system_mode, Some(SystemMode::Heat));
        assert!(evolved.common.available);
        assert_eq!(original.target_temperature, None);
        assert!(!original.common.available);
    }

    #[test]
    fn evolve_skips_inapplicable_changes() {
        let original = hvac();
        let changes = AttributeChanges::new()
            .with(AttributeChange::IpAddress("10.0.0.2".to_string()))
            .with(AttributeChange::MinTemp(5.0));

        let evolved = original.evolve(&changes);
        assert_eq!(evolved.min_temp, Some(5.0));
        assert_eq!(evolved.common, original.common);
    }

    #[test]
    fn gateway_evolve() {
        let gateway = GatewayAttributes::new(
            DeviceAttributes::new(Uuid::new_v4(), DeviceType::Gateway, "GW1", "U-GW", "Home"),
            Occupant {
                id: Uuid::new_v4(),
                identity_id: "eu-central-1:abc".to_string(),
            },
        );
        let changes = AttributeChanges::new()
            .with(AttributeChange::MacAddress("00:11:22:33:44:55".to_string()))
            .with(AttributeChange::FirmwareVersion("1.2.3".to_string()))
            .with(AttributeChange::TargetTemperature(20.0));

        let evolved = gateway.evolve(&changes);
        assert_eq!(evolved.mac_address.as_deref(), Some("00:11:22:33:44:55"));
        assert_eq!(evolved.common.firmware_version.as_deref(), Some("1.2.3"));
        assert_eq!(evolved.occupant, gateway.occupant);
    }

    #[test]
    fn device_type_display() {
        assert_eq!(DeviceType::Gateway.to_string(), "gateway");
        assert_eq!(
            serde_json::to_string(&DeviceType::Hvac).unwrap(),
            "\"hvac\""
        );
    }
}
