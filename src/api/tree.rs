// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Parsing of the device tree returned by the service API.
//!
//! `occupants/slider_list` returns `{"data": [...]}` where gateway entries
//! have `"type": "gateway"` and a `gateway` object. The details of one
//! gateway, `occupants/slider_details`, return `{"data": {"items": [...]}}`
//! where items nest arbitrarily. HVAC devices are the items carrying a
//! `device_code` and no `occupants_permissions` (the gateway itself appears
//! among the items with its permissions).

use serde_json::Value;
use uuid::Uuid;

use crate::error::ParseError;
use crate::model::{DeviceAttributes, DeviceType, GatewayAttributes, HvacAttributes, Occupant};

/// A gateway entry of the slider list.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayEntry {
    /// Id of the gateway, used to request the slider details.
    pub slider_id: String,
    /// Slider type, used to request the slider details.
    pub slider_type: String,
    /// Attributes of the gateway.
    pub attributes: GatewayAttributes,
}

/// Extracts the gateway entries from a slider list, in list order.
///
/// # Errors
///
/// Returns [`ParseError`] if the list or a gateway entry is malformed.
pub fn parse_slider_list(document: &Value) -> Result<Vec<GatewayEntry>, ParseError> {
    let entries = document
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| ParseError::MissingField("data".to_string()))?;

    entries
        .iter()
        .filter(|entry| entry.get("type").and_then(Value::as_str) == Some("gateway"))
        .map(|entry| {
            let attributes = parse_gateway(entry)?;
            Ok(GatewayEntry {
                slider_id: attributes.common.id.to_string(),
                slider_type: DeviceType::Gateway.to_string(),
                attributes,
            })
        })
        .collect()
}

/// Extracts the HVAC devices from the details of one gateway.
///
/// # Errors
///
/// Returns [`ParseError`] if the details or a device item is malformed.
pub fn parse_slider_details(document: &Value) -> Result<Vec<HvacAttributes>, ParseError> {
    let data = document
        .get("data")
        .ok_or_else(|| ParseError::MissingField("data".to_string()))?;

    let mut devices = Vec::new();
    collect_hvac(data, &mut devices)?;
    Ok(devices)
}

fn collect_hvac(node: &Value, devices: &mut Vec<HvacAttributes>) -> Result<(), ParseError> {
    let items = node
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| ParseError::MissingField("items".to_string()))?;

    for item in items {
        if item.get("items").is_some() {
            collect_hvac(item, devices)?;
        } else if item.get("device_code").is_some() && item.get("occupants_permissions").is_none() {
            let common = parse_common(item, DeviceType::Hvac)?;
            devices.push(HvacAttributes::new(common));
        }
    }
    Ok(())
}

fn parse_gateway(entry: &Value) -> Result<GatewayAttributes, ParseError> {
    let gateway = entry
        .get("gateway")
        .ok_or_else(|| ParseError::MissingField("gateway".to_string()))?;
    let common = parse_common(gateway, DeviceType::Gateway)?;

    let occupant = gateway
        .pointer("/occupants_permissions/receiver_occupant")
        .ok_or_else(|| {
            ParseError::MissingField("occupants_permissions.receiver_occupant".to_string())
        })?;
    let occupant = Occupant {
        id: uuid(field(occupant, "id")?, "receiver_occupant.id")?,
        identity_id: text(field(occupant, "identity_id")?, "identity_id")?,
    };

    Ok(GatewayAttributes::new(common, occupant))
}

fn parse_common(node: &Value, device_type: DeviceType) -> Result<DeviceAttributes, ParseError> {
    Ok(DeviceAttributes::new(
        uuid(field(node, "id")?, "id")?,
        device_type,
        text(field(node, "device_code")?, "device_code")?,
        text(field(node, "model")?, "model")?,
        text(field(node, "name")?, "name")?,
    ))
}

fn field<'a>(node: &'a Value, name: &str) -> Result<&'a Value, ParseError> {
    node.get(name)
        .ok_or_else(|| ParseError::MissingField(name.to_string()))
}

fn text(value: &Value, name: &str) -> Result<String, ParseError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(ParseError::InvalidValue {
            field: name.to_string(),
            message: format!("expected a string, got {other}"),
        }),
    }
}

fn uuid(value: &Value, name: &str) -> Result<Uuid, ParseError> {
    let raw = text(value, name)?;
    Uuid::parse_str(&raw).map_err(|e| ParseError::InvalidValue {
        field: name.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const GATEWAY_ID: &str = "4a1d6c7e-0c2b-4b0e-9d55-1f1f0f5a1b01";
    const OCCUPANT_ID: &str = "9b2e7d8f-1d3c-4c1f-8e66-2a2a1a6b2c02";

    fn gateway_json() -> Value {
        json!({
            "id": GATEWAY_ID,
            "device_code": "GW1",
            "model": "U-GW-PLUS",
            "name": "Home",
            "occupants_permissions": {
                "receiver_occupant": {
                    "id": OCCUPANT_ID,
                    "identity_id": "eu-central-1:7f3b",
                }
            }
        })
    }

    #[test]
    fn parse_gateways_from_slider_list() {
        let list = json!({"data": [
            {"id": "room-1", "type": "room", "name": "Living"},
            {"id": GATEWAY_ID, "type": "gateway", "gateway": gateway_json()},
        ]});

        let gateways = parse_slider_list(&list).unwrap();

        assert_eq!(gateways.len(), 1);
        let entry = &gateways[0];
        assert_eq!(entry.slider_id, GATEWAY_ID);
        assert_eq!(entry.slider_type, "gateway");
        assert_eq!(entry.attributes.common.device_code, "GW1");
        assert_eq!(entry.attributes.common.device_type, DeviceType::Gateway);
        assert_eq!(entry.attributes.occupant.identity_id, "eu-central-1:7f3b");
        assert_eq!(entry.attributes.occupant.id.to_string(), OCCUPANT_ID);
        assert!(!entry.attributes.common.available);
    }

    #[test]
    fn details_are_requested_with_the_gateway_id() {
        let list = json!({"data": [
            {"id": "slider-7", "type": "gateway", "gateway": gateway_json()},
        ]});

        let gateways = parse_slider_list(&list).unwrap();

        assert_eq!(gateways[0].slider_id, GATEWAY_ID);
    }

    #[test]
    fn parse_nested_hvac_items() {
        let details = json!({"data": {
            "id": GATEWAY_ID,
            "items": [
                gateway_json(),
                {
                    "id": "0f0e0d0c-0b0a-4908-8706-050403020100",
                    "device_code": "TH1",
                    "model": "TRV",
                    "name": "Bedroom",
                },
                {"name": "Upstairs", "items": [{
                    "id": "1f0e0d0c-0b0a-4908-8706-050403020100",
                    "device_code": "TH2",
                    "model": "TRV",
                    "name": "Office",
                }]},
                {"id": "no-code", "name": "Group without device"},
            ]
        }});

        let devices = parse_slider_details(&details).unwrap();

        let codes: Vec<&str> = devices.iter().map(|d| d.common.device_code.as_str()).collect();
        assert_eq!(codes, vec!["TH1", "TH2"]);
        assert!(devices.iter().all(|d| d.common.device_type == DeviceType::Hvac));
    }

    #[test]
    fn missing_occupant_is_an_error() {
        let mut gateway = gateway_json();
        gateway.as_object_mut().unwrap().remove("occupants_permissions");
        let list = json!({"data": [{"id": GATEWAY_ID, "type": "gateway", "gateway": gateway}]});

        assert!(matches!(
            parse_slider_list(&list),
            Err(ParseError::MissingField(_))
        ));
    }

    #[test]
    fn invalid_uuid_is_an_error() {
        let details = json!({"data": {"items": [
            {"id": "not-a-uuid", "device_code": "TH1", "model": "TRV", "name": "Bedroom"}
        ]}});

        assert!(matches!(
            parse_slider_details(&details),
            Err(ParseError::InvalidValue { .. })
        ));
    }

    #[test]
    fn missing_data_is_an_error() {
        assert!(parse_slider_list(&json!({"error": "boom"})).is_err());
        assert!(parse_slider_details(&json!({})).is_err());
    }
}
