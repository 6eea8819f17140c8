// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory collaborators shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, mpsc};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

use upgw::ProtocolError;
use upgw::api::{IdentityProvider, ServiceApi, Tokens};
use upgw::credentials::{AwsCredentials, CredentialsProvider};
use upgw::error::IdentityError;
use upgw::transport::{ConnectOptions, Connector, EventSource, Link, LinkEvent, LinkPair};

pub const PASSWORD: &str = "secret";
pub const GATEWAY_ID: &str = "4a1d6c7e-0c2b-4b0e-9d55-1f1f0f5a1b01";
pub const OCCUPANT_ID: &str = "9b2e7d8f-1d3c-4c1f-8e66-2a2a1a6b2c02";
pub const IDENTITY_ID: &str = "eu-central-1:7f3b";

/// Waits until `condition` holds, panicking after a few seconds.
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

// ============================================================================
// Credentials and identity
// ============================================================================

pub struct StaticCredentials;

impl CredentialsProvider for StaticCredentials {
    fn credentials(&self) -> Result<AwsCredentials, IdentityError> {
        Ok(AwsCredentials {
            access_key_id: "AKIATEST".to_string(),
            secret_access_key: "secret".to_string(),
            session_token: Some("session".to_string()),
        })
    }
}

#[derive(Default)]
pub struct FakeIdentity {
    pub authenticated: Mutex<Option<String>>,
    pub providers_issued: AtomicUsize,
    pub unavailable: Mutex<Option<String>>,
}

impl FakeIdentity {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl IdentityProvider for FakeIdentity {
    fn authenticate(&self, username: &str, password: &str) -> Result<Tokens, IdentityError> {
        if let Some(message) = self.unavailable.lock().clone() {
            return Err(IdentityError::Other(message));
        }
        if password != PASSWORD {
            return Err(IdentityError::NotAuthorized(
                "Incorrect username or password.".to_string(),
            ));
        }
        *self.authenticated.lock() = Some(username.to_string());
        self.tokens()
    }

    fn check_token(&self) -> Result<bool, IdentityError> {
        Ok(false)
    }

    fn tokens(&self) -> Result<Tokens, IdentityError> {
        Ok(Tokens {
            id_token: "id-token".to_string(),
            access_token: "access-token".to_string(),
        })
    }

    fn credentials_provider(
        &self,
        _identity_id: &str,
    ) -> Result<Arc<dyn CredentialsProvider>, IdentityError> {
        self.providers_issued.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(StaticCredentials))
    }
}

// ============================================================================
// Service API
// ============================================================================

pub struct FakeService {
    pub slider_list: Mutex<Value>,
    pub slider_details: Mutex<HashMap<String, Value>>,
    pub fail_details: Mutex<bool>,
    pub detail_requests: Mutex<Vec<(String, String)>>,
}

impl FakeService {
    /// One gateway `GW1` with children `TH1` and `TH2`.
    pub fn new() -> Arc<Self> {
        let mut details = HashMap::new();
        details.insert(GATEWAY_ID.to_string(), slider_details());
        Arc::new(Self {
            slider_list: Mutex::new(slider_list()),
            slider_details: Mutex::new(details),
            fail_details: Mutex::new(false),
            detail_requests: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ServiceApi for FakeService {
    async fn slider_list(&self, _tokens: &Tokens) -> Result<Value, ProtocolError> {
        Ok(self.slider_list.lock().clone())
    }

    async fn slider_details(
        &self,
        id: &str,
        kind: &str,
        _tokens: &Tokens,
    ) -> Result<Value, ProtocolError> {
        self.detail_requests
            .lock()
            .push((id.to_string(), kind.to_string()));
        if *self.fail_details.lock() {
            return Err(ProtocolError::ConnectionFailed(
                "HTTP 500 - Internal Server Error".to_string(),
            ));
        }
        self.slider_details
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| ProtocolError::ConnectionFailed("HTTP 404 - Not Found".to_string()))
    }
}

pub fn gateway_json() -> Value {
    json!({
        "id": GATEWAY_ID,
        "device_code": "GW1",
        "model": "U-GW-PLUS",
        "name": "Home",
        "occupants_permissions": {
            "receiver_occupant": {"id": OCCUPANT_ID, "identity_id": IDENTITY_ID}
        }
    })
}

pub fn slider_list() -> Value {
    json!({"data": [
        {"id": "room-1", "type": "room", "name": "Living"},
        {"id": "slider-7", "type": "gateway", "gateway": gateway_json()},
    ]})
}

pub fn slider_details() -> Value {
    json!({"data": {"id": GATEWAY_ID, "items": [
        gateway_json(),
        {
            "id": "0f0e0d0c-0b0a-4908-8706-050403020100",
            "device_code": "TH1",
            "model": "TRV",
            "name": "Bedroom",
        },
        {
            "id": "1f0e0d0c-0b0a-4908-8706-050403020100",
            "device_code": "TH2",
            "model": "TRV",
            "name": "Office",
        },
    ]}})
}

/// A reported HVAC document with the given properties.
pub fn reported_hvac(properties: Value) -> Value {
    json!({"state": {"reported": {"connected": "true", "11": {"properties": properties}}}})
}

// ============================================================================
// Transport
// ============================================================================

/// Produces the messages the service sends in reply to a publish.
pub type Responder = dyn Fn(&str, &Value) -> Vec<(String, Value)> + Send + Sync;

/// A recorded publish.
#[derive(Debug, Clone)]
pub struct Published {
    pub topic: String,
    pub payload: Value,
}

impl Published {
    pub fn token(&self) -> String {
        self.payload["clientToken"]
            .as_str()
            .unwrap_or_default()
            .to_string()
    }
}

/// In-memory broker playing the shadow service.
///
/// Every connection is acknowledged immediately. Publishes are recorded
/// and answered by the installed responder.
#[derive(Default)]
pub struct FakeBroker {
    connects: AtomicUsize,
    refuse: AtomicUsize,
    client_ids: Mutex<Vec<String>>,
    subscriptions: Mutex<Vec<Vec<String>>>,
    published: Mutex<Vec<Published>>,
    responder: Mutex<Option<Arc<Responder>>>,
    links: Mutex<Vec<mpsc::Sender<Option<LinkEvent>>>>,
}

impl FakeBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A broker answering every get with `reported` and accepting updates.
    pub fn answering(reported: Value) -> Arc<Self> {
        let broker = Self::new();
        broker.respond_with(move |topic, payload| {
            let token = payload["clientToken"].clone();
            if let Some(thing) = request_thing(topic, "get") {
                let mut document = reported.clone();
                document["clientToken"] = token;
                vec![(response_topic(&thing, "get", "accepted"), document)]
            } else if let Some(thing) = request_thing(topic, "update") {
                let mut document = json!({"state": payload["state"].clone()});
                document["clientToken"] = token;
                vec![(response_topic(&thing, "update", "accepted"), document)]
            } else {
                Vec::new()
            }
        });
        broker
    }

    pub fn respond_with<F>(&self, responder: F)
    where
        F: Fn(&str, &Value) -> Vec<(String, Value)> + Send + Sync + 'static,
    {
        *self.responder.lock() = Some(Arc::new(responder));
    }

    pub fn stop_responding(&self) {
        *self.responder.lock() = None;
    }

    /// Refuses the next `count` connection attempts.
    pub fn refuse_next(&self, count: usize) {
        self.refuse.store(count, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn client_ids(&self) -> Vec<String> {
        self.client_ids.lock().clone()
    }

    pub fn subscriptions(&self) -> Vec<Vec<String>> {
        self.subscriptions.lock().clone()
    }

    pub fn published(&self) -> Vec<Published> {
        self.published.lock().clone()
    }

    /// Sends a message to the most recent connection.
    pub fn push(&self, topic: &str, payload: &Value) {
        self.send(LinkEvent::Message {
            topic: topic.to_string(),
            payload: serde_json::to_vec(payload).unwrap(),
        });
    }

    /// Reports the most recent connection as lost.
    pub fn interrupt(&self) {
        self.send(LinkEvent::Interrupted {
            reason: "connection reset by peer".to_string(),
        });
    }

    /// Reports the most recent connection as recovered by the transport.
    pub fn resume(&self) {
        self.send(LinkEvent::Resumed);
    }

    fn send(&self, event: LinkEvent) {
        if let Some(link) = self.links.lock().last() {
            let _ = link.send(Some(event));
        }
    }
}

/// [`Connector`] opening connections to a [`FakeBroker`].
pub struct FakeConnector(pub Arc<FakeBroker>);

impl FakeBroker {
    pub fn connector(self: &Arc<Self>) -> Arc<dyn Connector> {
        Arc::new(FakeConnector(Arc::clone(self)))
    }
}

impl Connector for FakeConnector {
    fn connect(&self, options: ConnectOptions) -> Result<LinkPair, ProtocolError> {
        let broker = &self.0;
        broker.connects.fetch_add(1, Ordering::SeqCst);
        broker.client_ids.lock().push(options.client_id.clone());

        if broker
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ProtocolError::ConnectionFailed("connection refused".to_string()));
        }

        let (tx, rx) = mpsc::channel();
        let _ = tx.send(Some(LinkEvent::Connected));
        broker.links.lock().push(tx.clone());

        let link = FakeLink {
            broker: Arc::clone(broker),
            events: Mutex::new(tx),
        };
        Ok((Arc::new(link), Box::new(FakeEvents(rx))))
    }
}

struct FakeLink {
    broker: Arc<FakeBroker>,
    events: Mutex<mpsc::Sender<Option<LinkEvent>>>,
}

impl Link for FakeLink {
    fn subscribe(&self, filters: &[String]) -> Result<(), ProtocolError> {
        self.broker.subscriptions.lock().push(filters.to_vec());
        let _ = self.events.lock().send(Some(LinkEvent::Subscribed));
        Ok(())
    }

    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), ProtocolError> {
        let payload: Value = serde_json::from_slice(&payload)?;
        self.broker.published.lock().push(Published {
            topic: topic.to_string(),
            payload: payload.clone(),
        });

        let responder = self.broker.responder.lock().clone();
        if let Some(responder) = responder {
            for (topic, document) in responder(topic, &payload) {
                let _ = self.events.lock().send(Some(LinkEvent::Message {
                    topic,
                    payload: serde_json::to_vec(&document)?,
                }));
            }
        }
        Ok(())
    }

    fn disconnect(&self) -> Result<(), ProtocolError> {
        let _ = self.events.lock().send(None);
        Ok(())
    }
}

struct FakeEvents(mpsc::Receiver<Option<LinkEvent>>);

impl EventSource for FakeEvents {
    fn next_event(&mut self) -> Option<LinkEvent> {
        self.0.recv().ok().flatten()
    }
}

/// Returns the thing of a request topic for `operation`.
pub fn request_thing(topic: &str, operation: &str) -> Option<String> {
    let rest = topic.strip_prefix("$aws/things/")?;
    let (thing, suffix) = rest.split_once('/')?;
    (suffix == format!("shadow/{operation}")).then(|| thing.to_string())
}

pub fn response_topic(thing: &str, operation: &str, outcome: &str) -> String {
    format!("$aws/things/{thing}/shadow/{operation}/{outcome}")
}
