// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shadow session of one gateway.
//!
//! A session owns the live connection used to exchange shadow documents for
//! a gateway and all its devices. It correlates requests with responses,
//! dispatches pushed updates and recovers from connection loss:
//!
//! ```text
//! Connecting -> Active -> Interrupted -> Reconnecting -> Active ... -> Closed
//! ```
//!
//! When the transport resumes on its own, the pending reconnection attempt is
//! abandoned. Either way the reinitialize handler runs once per recovery so
//! the owner can re-read device states.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::{ClientConfig, ReconnectionPolicy};
use crate::credentials::CredentialsProvider;
use crate::error::ProtocolError;
use crate::shadow::connection::{self, Connection, Established};
use crate::shadow::pending::PendingRequests;
use crate::shadow::topic::{Operation, Outcome, ShadowTopic};
use crate::transport::{ConnectOptions, Connector, LinkEvent};

type UpdateHandler = dyn Fn(&str, &Value) + Send + Sync;
type LifecycleHandler = dyn Fn() + Send + Sync;

/// Callbacks of a session.
///
/// Handlers are called from the session's event pump and must not block.
#[derive(Clone)]
pub struct SessionHandlers {
    on_update: Arc<UpdateHandler>,
    on_reinitialize: Arc<LifecycleHandler>,
    on_unavailable: Arc<LifecycleHandler>,
}

impl SessionHandlers {
    /// Creates handlers that ignore every event.
    #[must_use]
    pub fn new() -> Self {
        Self {
            on_update: Arc::new(|_, _| {}),
            on_reinitialize: Arc::new(|| {}),
            on_unavailable: Arc::new(|| {}),
        }
    }

    /// Sets the handler receiving `(device_code, document)` for every pushed
    /// shadow document.
    #[must_use]
    pub fn on_update<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        self.on_update = Arc::new(handler);
        self
    }

    /// Sets the handler called once the session recovered from an interruption.
    #[must_use]
    pub fn on_reinitialize<F>(mut self, handler: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_reinitialize = Arc::new(handler);
        self
    }

    /// Sets the handler called once an interruption outlasted the grace period.
    #[must_use]
    pub fn on_unavailable<F>(mut self, handler: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_unavailable = Arc::new(handler);
        self
    }
}

impl Default for SessionHandlers {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SessionHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandlers").finish_non_exhaustive()
    }
}

/// Everything needed to open a session.
#[derive(Clone)]
pub struct SessionParams {
    /// Code of the gateway, used as client id prefix.
    pub gateway_code: String,
    /// Codes of the things whose shadows the session subscribes to.
    pub thing_codes: Vec<String>,
    /// Credentials used to sign every connection attempt.
    pub credentials: Arc<dyn CredentialsProvider>,
    /// Transport.
    pub connector: Arc<dyn Connector>,
    /// Timeouts and reconnection policy.
    pub config: ClientConfig,
}

impl std::fmt::Debug for SessionParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionParams")
            .field("gateway_code", &self.gateway_code)
            .field("thing_codes", &self.thing_codes)
            .finish_non_exhaustive()
    }
}

/// A live shadow session of one gateway.
pub struct ShadowSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    gateway_code: String,
    thing_codes: Vec<String>,
    credentials: Arc<dyn CredentialsProvider>,
    connector: Arc<dyn Connector>,
    config: ClientConfig,
    handlers: SessionHandlers,
    current: Mutex<Arc<Connection>>,
    pending: Arc<PendingRequests>,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
    pumps: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl ShadowSession {
    /// Opens a session and subscribes to the shadow responses of every thing.
    ///
    /// Returns once every subscription is acknowledged.
    ///
    /// # Errors
    ///
    /// Returns error if the connection cannot be established within the
    /// connection timeout.
    pub async fn open(params: SessionParams, handlers: SessionHandlers) -> Result<Self, ProtocolError> {
        let SessionParams {
            gateway_code,
            thing_codes,
            credentials,
            connector,
            config,
        } = params;

        let established = connection::establish(
            Arc::clone(&connector),
            connect_options(&gateway_code, &config, &credentials),
            response_filters(&thing_codes),
            config.connection_timeout,
        )
        .await?;

        let inner = Arc::new(SessionInner {
            gateway_code,
            thing_codes,
            credentials,
            connector,
            config,
            handlers,
            current: Mutex::new(Arc::clone(&established.connection)),
            pending: PendingRequests::new(),
            reconnect_task: Mutex::new(None),
            pumps: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        SessionInner::start_pump(&inner, established);

        tracing::info!(gateway = %inner.gateway_code, things = inner.thing_codes.len(), "Shadow session opened");

        Ok(Self { inner })
    }

    /// Returns the gateway code.
    #[must_use]
    pub fn gateway_code(&self) -> &str {
        &self.inner.gateway_code
    }

    /// Returns the codes of the subscribed things.
    #[must_use]
    pub fn thing_codes(&self) -> &[String] {
        &self.inner.thing_codes
    }

    /// Returns the client id of the current connection.
    #[must_use]
    pub fn client_id(&self) -> String {
        self.inner.current.lock().client_id().to_string()
    }

    /// Returns `true` once [`close`](Self::close) was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Requests the shadow document of `device_code`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Timeout`] if no response arrives within the
    /// publish timeout, [`ProtocolError::Rejected`] if the service rejects
    /// the request.
    pub async fn get(&self, device_code: &str) -> Result<Value, ProtocolError> {
        self.request(device_code, Operation::Get, Map::new()).await
    }

    /// Sends a desired-state document for `device_code`.
    ///
    /// Returns the accepted document. Pushed updates caused by the request
    /// are dispatched before this returns.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidDocument`] if `document` is not a JSON
    /// object, otherwise as [`get`](Self::get).
    pub async fn update(&self, device_code: &str, document: Value) -> Result<Value, ProtocolError> {
        let Value::Object(body) = document else {
            return Err(ProtocolError::InvalidDocument(
                "update document must be a JSON object".to_string(),
            ));
        };
        self.request(device_code, Operation::Update, body).await
    }

    async fn request(
        &self,
        device_code: &str,
        operation: Operation,
        body: Map<String, Value>,
    ) -> Result<Value, ProtocolError> {
        if self.inner.is_closed() {
            return Err(ProtocolError::NotConnected);
        }

        let timeout = self.inner.config.publish_timeout;
        tokio::time::timeout(timeout, self.exchange(device_code, operation, body))
            .await
            .map_err(|_| {
                tracing::warn!(
                    gateway = %self.inner.gateway_code,
                    device = %device_code,
                    ?operation,
                    "Shadow request timed out"
                );
                ProtocolError::Timeout(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX))
            })?
    }

    async fn exchange(
        &self,
        device_code: &str,
        operation: Operation,
        mut body: Map<String, Value>,
    ) -> Result<Value, ProtocolError> {
        let mut request = self.inner.pending.register();
        body.insert(
            "clientToken".to_string(),
            Value::String(request.token().to_string()),
        );
        let payload = serde_json::to_vec(&body)?;
        let topic = ShadowTopic::request(device_code, operation).to_string();

        tracing::debug!(topic = %topic, token = %request.token(), "Publishing shadow request");

        let link = self.inner.current.lock().link();
        tokio::task::spawn_blocking(move || link.publish(&topic, payload))
            .await
            .map_err(|e| ProtocolError::ChannelClosed(format!("publish task failed: {e}")))??;

        request.wait().await
    }

    /// Closes the session.
    ///
    /// Pending requests fail with [`ProtocolError::NotConnected`]. No handler
    /// runs after this returns.
    ///
    /// # Errors
    ///
    /// Returns error if the disconnect request could not be sent.
    pub async fn close(&self) -> Result<(), ProtocolError> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        tracing::info!(gateway = %self.inner.gateway_code, "Closing shadow session");

        let task = self.inner.reconnect_task.lock().take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }

        self.inner.pending.cancel_all();

        let current = Arc::clone(&*self.inner.current.lock());
        let result = current.shutdown().await;

        let pumps = std::mem::take(&mut *self.inner.pumps.lock());
        for pump in pumps {
            pump.abort();
            let _ = pump.await;
        }

        result
    }
}

impl std::fmt::Debug for ShadowSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShadowSession")
            .field("gateway_code", &self.inner.gateway_code)
            .field("thing_codes", &self.inner.thing_codes)
            .field("closed", &self.inner.is_closed())
            .finish_non_exhaustive()
    }
}

impl SessionInner {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn is_current(&self, connection: &Arc<Connection>) -> bool {
        let current = self.current.lock();
        Arc::ptr_eq(&*current, connection)
    }

    /// Spawns the task dispatching the events of `established`.
    fn start_pump(inner: &Arc<Self>, established: Established) {
        let Established {
            connection,
            mut events,
            early_messages,
        } = established;
        let weak = Arc::downgrade(inner);

        let pump = tokio::spawn(async move {
            for event in early_messages {
                if !Self::handle_event(&weak, &connection, event) {
                    return;
                }
            }
            while let Some(event) = events.recv().await {
                if !Self::handle_event(&weak, &connection, event) {
                    break;
                }
            }
            tracing::debug!(client_id = %connection.client_id(), "Event pump stopped");
        });

        let mut pumps = inner.pumps.lock();
        pumps.retain(|pump| !pump.is_finished());
        pumps.push(pump);
    }

    /// Handles one event. Returns `false` when the pump should stop.
    fn handle_event(weak: &Weak<Self>, connection: &Arc<Connection>, event: LinkEvent) -> bool {
        let Some(inner) = weak.upgrade() else {
            return false;
        };
        if inner.is_closed() {
            return false;
        }
        if !inner.is_current(connection) {
            tracing::trace!(client_id = %connection.client_id(), "Ignoring event of retired connection");
            return true;
        }

        match event {
            LinkEvent::Message { topic, payload } => inner.handle_message(&topic, &payload),
            LinkEvent::Interrupted { reason } => {
                tracing::warn!(gateway = %inner.gateway_code, reason = %reason, "Shadow connection interrupted");
                inner.schedule_recovery();
            }
            LinkEvent::Resumed => inner.resumed(),
            LinkEvent::Connected | LinkEvent::Subscribed => {}
        }
        true
    }

    fn handle_message(&self, topic: &str, payload: &[u8]) {
        let Some(topic) = ShadowTopic::parse(topic) else {
            tracing::debug!(topic = %topic, "Ignoring message on unknown topic");
            return;
        };
        let Some(outcome) = topic.outcome else {
            return;
        };

        let mut document = match serde_json::from_slice::<Value>(payload) {
            Ok(document @ Value::Object(_)) => document,
            Ok(other) => {
                tracing::warn!(topic = %topic, payload = %other, "Shadow payload is not an object");
                Value::Object(Map::new())
            }
            Err(e) => {
                tracing::warn!(topic = %topic, error = %e, "Failed to parse shadow payload");
                Value::Object(Map::new())
            }
        };
        let token = document
            .as_object_mut()
            .and_then(|fields| fields.remove("clientToken"))
            .and_then(|token| match token {
                Value::String(token) => Some(token),
                _ => None,
            });

        match (topic.operation, outcome) {
            (Operation::Update, Outcome::Accepted) => {
                (self.handlers.on_update)(&topic.thing, &document);
                if let Some(token) = token {
                    self.pending.resolve(&token, Ok(document));
                }
            }
            (Operation::Get, Outcome::Accepted) => {
                if let Some(token) = &token
                    && self.pending.resolve(token, Ok(document.clone()))
                {
                    return;
                }
                (self.handlers.on_update)(&topic.thing, &document);
            }
            (operation, Outcome::Rejected) => {
                let code = document.get("code").and_then(Value::as_i64);
                let message = document
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("request rejected")
                    .to_string();
                let resolved = token.as_deref().is_some_and(|token| {
                    self.pending
                        .resolve(token, Err(ProtocolError::Rejected { code, message: message.clone() }))
                });
                if !resolved {
                    tracing::warn!(
                        device = %topic.thing,
                        ?operation,
                        ?code,
                        message = %message,
                        "Unmatched shadow rejection"
                    );
                }
            }
        }
    }

    /// Starts the recovery task unless one is already running.
    fn schedule_recovery(self: &Arc<Self>) {
        let mut slot = self.reconnect_task.lock();
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let policy = self.config.reconnection.clone();
        if !policy.enabled {
            tracing::warn!(gateway = %self.gateway_code, "Automatic reconnection disabled");
        }
        *slot = Some(tokio::spawn(recover(Arc::downgrade(self), policy)));
    }

    fn resumed(&self) {
        let task = self.reconnect_task.lock().take();
        if let Some(task) = task {
            task.abort();
        }
        tracing::info!(gateway = %self.gateway_code, "Shadow connection resumed");
        (self.handlers.on_reinitialize)();
    }

    async fn connect(&self) -> Result<Established, ProtocolError> {
        connection::establish(
            Arc::clone(&self.connector),
            connect_options(&self.gateway_code, &self.config, &self.credentials),
            response_filters(&self.thing_codes),
            self.config.connection_timeout,
        )
        .await
    }
}

/// Runs until the session is back or closed.
///
/// Reports the session unavailable once the grace period elapsed, and
/// retries the connection per `policy` when enabled.
async fn recover(weak: Weak<SessionInner>, policy: ReconnectionPolicy) {
    let unavailable = async {
        if let Some(grace) = policy.unavailable_after {
            tokio::time::sleep(grace).await;
            if let Some(inner) = weak.upgrade()
                && !inner.is_closed()
            {
                tracing::warn!(gateway = %inner.gateway_code, "Shadow session unavailable");
                (inner.handlers.on_unavailable)();
            }
        }
        std::future::pending::<()>().await;
    };

    let retrying = async {
        if policy.enabled {
            reconnect(&weak, &policy).await;
        } else {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = unavailable => {}
        () = retrying => {}
    }
}

async fn reconnect(weak: &Weak<SessionInner>, policy: &ReconnectionPolicy) {
    let mut attempt: u32 = 0;
    loop {
        let delay = policy.delay_for_attempt(attempt);
        tracing::info!(
            attempt = attempt + 1,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Scheduling shadow reconnection"
        );
        tokio::time::sleep(delay).await;

        let Some(inner) = weak.upgrade() else {
            return;
        };
        if inner.is_closed() {
            return;
        }

        match inner.connect().await {
            Ok(established) => {
                let previous = {
                    let mut current = inner.current.lock();
                    if inner.is_closed() {
                        None
                    } else {
                        Some(std::mem::replace(
                            &mut *current,
                            Arc::clone(&established.connection),
                        ))
                    }
                };
                let Some(previous) = previous else {
                    let _ = established.connection.shutdown().await;
                    return;
                };

                // Released before the new pump runs so that its interruption
                // schedules a fresh recovery.
                drop(inner.reconnect_task.lock().take());

                tracing::info!(
                    gateway = %inner.gateway_code,
                    client_id = %established.connection.client_id(),
                    attempt = attempt + 1,
                    "Shadow session reconnected"
                );
                SessionInner::start_pump(&inner, established);
                (inner.handlers.on_reinitialize)();

                tokio::spawn(async move {
                    if let Err(e) = previous.shutdown().await {
                        tracing::debug!(error = %e, "Failed to retire previous connection");
                    }
                });
                return;
            }
            Err(e) => {
                tracing::warn!(
                    gateway = %inner.gateway_code,
                    attempt = attempt + 1,
                    error = %e,
                    "Shadow reconnection failed"
                );
                attempt = attempt.saturating_add(1);
            }
        }
    }
}

fn connect_options(
    gateway_code: &str,
    config: &ClientConfig,
    credentials: &Arc<dyn CredentialsProvider>,
) -> ConnectOptions {
    ConnectOptions {
        client_id: format!("{gateway_code}-{}", Uuid::new_v4()),
        keep_alive: config.keep_alive,
        credentials: Arc::clone(credentials),
    }
}

fn response_filters(thing_codes: &[String]) -> Vec<String> {
    thing_codes
        .iter()
        .flat_map(|thing| ShadowTopic::response_filters(thing))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_cover_every_thing() {
        let filters = response_filters(&["GW1".to_string(), "TH1".to_string()]);

        assert_eq!(filters.len(), 8);
        assert!(filters.contains(&"$aws/things/GW1/shadow/get/accepted".to_string()));
        assert!(filters.contains(&"$aws/things/TH1/shadow/update/rejected".to_string()));
    }

    #[test]
    fn client_ids_are_unique_per_attempt() {
        struct NoCredentials;
        impl CredentialsProvider for NoCredentials {
            fn credentials(
                &self,
            ) -> Result<crate::credentials::AwsCredentials, crate::error::IdentityError> {
                Err(crate::error::IdentityError::Other("none".to_string()))
            }
        }

        let credentials: Arc<dyn CredentialsProvider> = Arc::new(NoCredentials);
        let config = ClientConfig::default();
        let first = connect_options("GW1", &config, &credentials);
        let second = connect_options("GW1", &config, &credentials);

        assert!(first.client_id.starts_with("GW1-"));
        assert_ne!(first.client_id, second.client_id);
        assert_eq!(first.keep_alive, config.keep_alive);
    }
}
