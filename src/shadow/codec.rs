// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Mapping between attribute changes and shadow documents.
//!
//! Device properties live at `state.reported.<endpoint>.properties.<key>`
//! in documents sent by the service, and changes are requested under
//! `state.desired.<endpoint>.properties.<key>`. Property values are
//! strings or integers; temperatures are hundredths of a degree.
//!
//! # Examples
//!
//! ```
//! use serde_json::json;
//! use upgw::model::{AttributeChange, AttributeChanges, DeviceType};
//! use upgw::shadow::codec;
//!
//! let changes = AttributeChanges::new().with(AttributeChange::TargetTemperature(21.5));
//! let desired = codec::encode(&changes, DeviceType::Hvac);
//! assert_eq!(
//!     desired,
//!     json!({"state": {"desired": {"11": {"properties": {
//!         "ep1:sTherS:SetHeatingSetpoint_x100": 2150
//!     }}}}})
//! );
//! ```

use serde_json::{Map, Value, json};

use crate::model::{Attribute, AttributeChange, AttributeChanges, DeviceType, RunningState, SystemMode};

/// Endpoint id grouping the properties of a HVAC device.
pub const HVAC_ENDPOINT: &str = "11";

/// Endpoint id grouping the properties of a gateway.
pub const GATEWAY_ENDPOINT: &str = "0";

type Decode = fn(&Value) -> Result<AttributeChange, String>;
type Encode = fn(&AttributeChange) -> Option<Value>;

const HVAC_REPORTED: &[(Attribute, &str, Decode)] = &[
    (Attribute::SerialNumber, "ep1:sPowerMS:RadSerialNum", |v| {
        text(v).map(AttributeChange::SerialNumber)
    }),
    (Attribute::Manufacturer, "ep1:sBasicS:ManufactureName", |v| {
        text(v).map(AttributeChange::Manufacturer)
    }),
    (Attribute::FirmwareVersion, "ep1:sZDO:FirmwareVersion", |v| {
        text(v).map(AttributeChange::FirmwareVersion)
    }),
    (Attribute::TargetTemperature, "ep1:sTherS:HeatingSetpoint_x100", |v| {
        hundredths(v).map(AttributeChange::TargetTemperature)
    }),
    (Attribute::CurrentTemperature, "ep1:sTherS:LocalTemperature_x100", |v| {
        hundredths(v).map(AttributeChange::CurrentTemperature)
    }),
    (Attribute::MinTemp, "ep1:sTherS:MinHeatSetpoint_x100", |v| {
        hundredths(v).map(AttributeChange::MinTemp)
    }),
    (Attribute::MaxTemp, "ep1:sTherS:MaxHeatSetpoint_x100", |v| {
        hundredths(v).map(AttributeChange::MaxTemp)
    }),
    (Attribute::SystemMode, "ep1:sTherS:RunningMode", |v| {
        let mode = SystemMode::try_from(integer(v)?).map_err(|e| e.to_string())?;
        Ok(AttributeChange::SystemMode(mode))
    }),
    (Attribute::RunningState, "ep1:sTherS:RunningState", |v| {
        let state = RunningState::try_from(integer(v)?).map_err(|e| e.to_string())?;
        Ok(AttributeChange::RunningState(state))
    }),
];

const HVAC_DESIRED: &[(Attribute, &str, Encode)] = &[
    (Attribute::TargetTemperature, "ep1:sTherS:SetHeatingSetpoint_x100", |change| {
        match change {
            // Setpoints are hundredths of a degree; the cast cannot overflow for
            // any physically meaningful temperature.
            #[allow(clippy::cast_possible_truncation)]
            AttributeChange::TargetTemperature(value) => Some(json!((value * 100.0).round() as i64)),
            _ => None,
        }
    }),
    (Attribute::SystemMode, "ep1:sTherS:SetSystemMode", |change| match change {
        AttributeChange::SystemMode(mode) => Some(json!(mode.value())),
        _ => None,
    }),
];

const GATEWAY_REPORTED: &[(Attribute, &str, Decode)] = &[
    (Attribute::FirmwareVersion, "ep0:sGateway:FirmwareVersion", |v| {
        text(v).map(AttributeChange::FirmwareVersion)
    }),
    (Attribute::IpAddress, "ep0:sGateway:IpAddress", |v| {
        text(v).map(AttributeChange::IpAddress)
    }),
    (Attribute::MacAddress, "ep0:sGateway:MacAddress", |v| {
        text(v).map(AttributeChange::MacAddress)
    }),
];

const GATEWAY_DESIRED: &[(Attribute, &str, Encode)] = &[];

fn tables(
    device_type: DeviceType,
) -> (&'static str, &'static [(Attribute, &'static str, Decode)], &'static [(Attribute, &'static str, Encode)]) {
    match device_type {
        DeviceType::Hvac => (HVAC_ENDPOINT, HVAC_REPORTED, HVAC_DESIRED),
        DeviceType::Gateway => (GATEWAY_ENDPOINT, GATEWAY_REPORTED, GATEWAY_DESIRED),
    }
}

/// Decodes the reported state of a shadow document.
///
/// `document` is a shadow response, i.e. an object with a `state.reported`
/// member. Properties that are missing are skipped. Properties whose value
/// cannot be converted are logged and skipped as well; decoding never fails.
/// A `state.reported.connected` flag (`"true"`/`"false"` or a boolean) is
/// decoded as [`AttributeChange::Available`].
#[must_use]
pub fn decode(document: &Value, device_type: DeviceType) -> AttributeChanges {
    let (endpoint, reported_map, _) = tables(device_type);
    let mut changes = AttributeChanges::new();

    let Some(reported) = document.pointer("/state/reported") else {
        return changes;
    };

    if let Some(connected) = reported.get("connected") {
        match flag(connected) {
            Ok(available) => changes.insert(AttributeChange::Available(available)),
            Err(message) => tracing::warn!(
                key = "connected",
                value = %connected,
                error = %message,
                "Failed to parse shadow property"
            ),
        }
    }

    let Some(properties) = reported
        .get(endpoint)
        .and_then(|ep| ep.get("properties"))
        .and_then(Value::as_object)
    else {
        return changes;
    };

    for (attribute, key, decode) in reported_map {
        let Some(value) = properties.get(*key).filter(|v| !v.is_null()) else {
            continue;
        };
        match decode(value) {
            Ok(change) => {
                debug_assert_eq!(change.attribute(), *attribute);
                changes.insert(change);
            }
            Err(message) => tracing::warn!(
                key = %key,
                value = %value,
                error = %message,
                "Failed to parse shadow property"
            ),
        }
    }

    changes
}

/// Encodes attribute changes as a desired-state shadow document.
///
/// Only attributes that can be written for `device_type` are included;
/// everything else is omitted, so the service merges the partial update with
/// the previous desired state.
#[must_use]
pub fn encode(changes: &AttributeChanges, device_type: DeviceType) -> Value {
    let (endpoint, _, desired_map) = tables(device_type);
    let mut properties = Map::new();

    for (attribute, key, encode) in desired_map {
        if let Some(value) = changes.get(*attribute).and_then(encode) {
            properties.insert((*key).to_string(), value);
        }
    }

    json!({"state": {"desired": {endpoint: {"properties": properties}}}})
}

fn text(value: &Value) -> Result<String, String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(format!("expected a string, got {other}")),
    }
}

fn integer(value: &Value) -> Result<i64, String> {
    match value {
        Value::Number(n) => n.as_i64().ok_or_else(|| format!("{n} is not an integer")),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|e| format!("{s:?} is not an integer: {e}")),
        other => Err(format!("expected an integer, got {other}")),
    }
}

fn hundredths(value: &Value) -> Result<f64, String> {
    let raw = match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| format!("{n} is not a number"))?,
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|e| format!("{s:?} is not a number: {e}"))?,
        other => return Err(format!("expected a number, got {other}")),
    };
    if raw.is_finite() {
        Ok(raw / 100.0)
    } else {
        Err(format!("{raw} is not finite"))
    }
}

fn flag(value: &Value) -> Result<bool, String> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(false),
        other => Err(format!("expected \"true\" or \"false\", got {other}")),
    }
}
