// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Client façade.
//!
//! The [`Client`] authenticates against the identity provider, builds the
//! device model from the service API and keeps it in sync through one shadow
//! session per gateway.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use upgw::{Client, ClientBuilder};
//! # use upgw::api::IdentityProvider;
//! # use upgw::transport::Connector;
//!
//! # async fn example(
//! #     identity: Arc<dyn IdentityProvider>,
//! #     connector: Arc<dyn Connector>,
//! # ) -> upgw::Result<()> {
//! let builder = ClientBuilder::new()
//!     .with_identity_provider(identity)
//!     .with_connector(connector);
//! let client = Client::connect(builder, "user@example.com", "secret").await?;
//!
//! for device in client.devices() {
//!     device.subscribe(|device, _changes| {
//!         println!("{}: {:?}", device.name(), device.target_temperature());
//!     });
//! }
//! client.refresh_all_devices().await?;
//! client.close().await;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::api::tree::{self, GatewayEntry};
use crate::api::{IdentityProvider, ServiceApi, Tokens};
use crate::config::ClientConfig;
use crate::credentials::CredentialStore;
use crate::error::{Error, IdentityError, ProtocolError, Result};
use crate::model::{
    AttributeChange, AttributeChanges, Attributes, Device, DeviceTarget, DeviceType, Gateway,
    GatewayAttributes, HvacDevice, Refresher, Updater,
};
use crate::shadow::{SessionManager, ShadowSession, codec};
use crate::subscription::SubscriptionId;
use crate::transport::Connector;

/// A device managed by the client.
#[derive(Debug, Clone)]
pub enum DeviceHandle {
    /// A gateway.
    Gateway(Arc<Gateway>),
    /// A HVAC device.
    Hvac(Arc<HvacDevice>),
}

impl DeviceHandle {
    /// Returns the device type.
    #[must_use]
    pub fn device_type(&self) -> DeviceType {
        match self {
            Self::Gateway(_) => DeviceType::Gateway,
            Self::Hvac(_) => DeviceType::Hvac,
        }
    }

    /// Returns the device code.
    #[must_use]
    pub fn device_code(&self) -> &str {
        match self {
            Self::Gateway(gateway) => gateway.device_code(),
            Self::Hvac(device) => device.device_code(),
        }
    }

    /// Returns the device name.
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            Self::Gateway(gateway) => gateway.name(),
            Self::Hvac(device) => device.name(),
        }
    }

    fn set_attributes(&self, changes: &AttributeChanges) {
        match self {
            Self::Gateway(gateway) => gateway.set_attributes(changes),
            Self::Hvac(device) => device.set_attributes(changes),
        }
    }
}

/// Builder for [`Client`].
///
/// The identity provider and the connector are required. Without an explicit
/// service API, the HTTP implementation is used (feature `http`).
#[derive(Default)]
pub struct ClientBuilder {
    config: ClientConfig,
    identity: Option<Arc<dyn IdentityProvider>>,
    service: Option<Arc<dyn ServiceApi>>,
    connector: Option<Arc<dyn Connector>>,
}

impl ClientBuilder {
    /// Creates a builder with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the configuration.
    #[must_use]
    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the identity provider.
    #[must_use]
    pub fn with_identity_provider(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Sets the service API.
    #[must_use]
    pub fn with_service_api(mut self, service: Arc<dyn ServiceApi>) -> Self {
        self.service = Some(service);
        self
    }

    /// Sets the transport used by shadow sessions.
    #[must_use]
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Builds the client.
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if a required collaborator is missing.
    pub fn build(self) -> Result<Client> {
        let identity = self
            .identity
            .ok_or_else(|| Error::Configuration("identity provider is required".to_string()))?;
        let connector = self
            .connector
            .ok_or_else(|| Error::Configuration("connector is required".to_string()))?;
        let service = match self.service {
            Some(service) => service,
            None => default_service(&self.config)?,
        };

        Ok(Client::new(self.config, identity, service, connector))
    }
}

#[cfg(feature = "http")]
fn default_service(config: &ClientConfig) -> Result<Arc<dyn ServiceApi>> {
    Ok(Arc::new(crate::api::HttpServiceApi::from_config(config)?))
}

#[cfg(not(feature = "http"))]
fn default_service(_config: &ClientConfig) -> Result<Arc<dyn ServiceApi>> {
    Err(Error::Configuration("service API is required".to_string()))
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("config", &self.config)
            .field("identity", &self.identity.is_some())
            .field("service", &self.service.is_some())
            .field("connector", &self.connector.is_some())
            .finish()
    }
}

/// Client for Unisenza Plus gateways and their devices.
///
/// Cloning is cheap; clones share the same devices and sessions.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    identity: Arc<dyn IdentityProvider>,
    service: Arc<dyn ServiceApi>,
    sessions: SessionManager,
    index: RwLock<DeviceIndex>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    callbacks: Mutex<Vec<SubscriptionId>>,
    closed: AtomicBool,
}

#[derive(Default)]
struct DeviceIndex {
    gateways: Vec<Arc<Gateway>>,
    devices: HashMap<(String, String), DeviceHandle>,
}

impl DeviceIndex {
    fn new(gateways: Vec<Arc<Gateway>>) -> Self {
        let mut devices = HashMap::new();
        for gateway in &gateways {
            let gateway_code = gateway.device_code().to_string();
            devices.insert(
                (gateway_code.clone(), gateway_code.clone()),
                DeviceHandle::Gateway(Arc::clone(gateway)),
            );
            for child in gateway.children() {
                devices.insert(
                    (gateway_code.clone(), child.device_code().to_string()),
                    DeviceHandle::Hvac(Arc::clone(child)),
                );
            }
        }
        Self { gateways, devices }
    }

    fn gateway(&self, gateway_code: &str) -> Option<Arc<Gateway>> {
        self.gateways
            .iter()
            .find(|gateway| gateway.device_code() == gateway_code)
            .cloned()
    }
}

impl Client {
    /// Creates a builder.
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Builds a client, authenticates and populates its devices.
    ///
    /// # Errors
    ///
    /// Returns error if building, authentication or population fails.
    pub async fn connect(builder: ClientBuilder, username: &str, password: &str) -> Result<Self> {
        let client = builder.build()?;
        client.authenticate(username, password).await?;
        client.populate_devices().await?;
        Ok(client)
    }

    fn new(
        config: ClientConfig,
        identity: Arc<dyn IdentityProvider>,
        service: Arc<dyn ServiceApi>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let credentials = Arc::new(CredentialStore::new(Arc::clone(&identity)));
        let inner = Arc::new(ClientInner {
            identity,
            service,
            sessions: SessionManager::new(credentials, connector, config),
            index: RwLock::new(DeviceIndex::default()),
            tasks: Mutex::new(Vec::new()),
            callbacks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&inner);
        let ids = vec![
            inner.sessions.register_update_callback({
                let weak = Weak::clone(&weak);
                move |gateway: &str, device: &str, document: &Value| {
                    if let Some(inner) = weak.upgrade() {
                        inner.on_update(gateway, device, document);
                    }
                }
            }),
            inner.sessions.on_reinitialize({
                let weak = Weak::clone(&weak);
                move |gateway: &str| {
                    if let Some(inner) = weak.upgrade() {
                        ClientInner::on_reinitialize(&inner, gateway);
                    }
                }
            }),
            inner.sessions.on_unavailable(move |gateway: &str| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_unavailable(gateway);
                }
            }),
        ];
        *inner.callbacks.lock() = ids;

        Self { inner }
    }

    // =========================================================================
    // Authentication and devices
    // =========================================================================

    /// Authenticates with the identity provider.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Authentication`] if the credentials are rejected,
    /// [`Error::Identity`] if authentication fails otherwise.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<()> {
        let identity = Arc::clone(&self.inner.identity);
        let user = username.to_string();
        let password = password.to_string();

        let result = tokio::task::spawn_blocking(move || identity.authenticate(&user, &password))
            .await
            .map_err(|e| IdentityError::Other(format!("authentication task failed: {e}")))?;

        match result {
            Ok(_tokens) => {
                tracing::info!(username = %username, "Authenticated");
                Ok(())
            }
            Err(IdentityError::NotAuthorized(message)) => {
                tracing::warn!(username = %username, "Authentication rejected");
                Err(Error::Authentication {
                    username: username.to_string(),
                    source: IdentityError::NotAuthorized(message),
                })
            }
            Err(e) => Err(Error::Identity(e)),
        }
    }

    /// Fetches the gateways and devices from the service API.
    ///
    /// Replaces the previously populated devices.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Client`] if fetching or parsing fails.
    pub async fn populate_devices(&self) -> Result<()> {
        let gateways = self
            .inner
            .fetch_gateways()
            .await
            .map_err(|e| Error::client("failed to populate devices", e))?;

        tracing::info!(
            gateways = gateways.len(),
            devices = gateways.iter().map(|g| g.children().len()).sum::<usize>(),
            "Devices populated"
        );
        *self.inner.index.write() = DeviceIndex::new(gateways);
        Ok(())
    }

    /// Returns the gateways, in service order.
    #[must_use]
    pub fn gateways(&self) -> Vec<Arc<Gateway>> {
        self.inner.index.read().gateways.clone()
    }

    /// Returns the gateway with the given code.
    #[must_use]
    pub fn gateway(&self, gateway_code: &str) -> Option<Arc<Gateway>> {
        self.inner.index.read().gateway(gateway_code)
    }

    /// Returns the HVAC devices of every gateway.
    #[must_use]
    pub fn devices(&self) -> Vec<Arc<HvacDevice>> {
        self.inner
            .index
            .read()
            .gateways
            .iter()
            .flat_map(|gateway| gateway.children().iter().cloned())
            .collect()
    }

    /// Returns the device with the given codes.
    ///
    /// The gateway itself is found under its own code.
    #[must_use]
    pub fn device(&self, gateway_code: &str, device_code: &str) -> Option<DeviceHandle> {
        self.inner
            .index
            .read()
            .devices
            .get(&(gateway_code.to_string(), device_code.to_string()))
            .cloned()
    }

    // =========================================================================
    // Device state
    // =========================================================================

    /// Requests the current state of `device` and applies it to the model.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Client`] naming the device if the request fails.
    pub async fn refresh_device_state<A: Attributes>(
        &self,
        gateway: &Gateway,
        device: &Device<A>,
    ) -> Result<()> {
        self.inner.refresh(gateway, device).await
    }

    /// Sends `changes` for `device`.
    ///
    /// Completes once the service accepted the request. The model changes
    /// when the service pushes the applied state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Client`] naming the device if the request fails.
    pub async fn update_device_state<A: Attributes>(
        &self,
        gateway: &Gateway,
        device: &Device<A>,
        changes: &AttributeChanges,
    ) -> Result<()> {
        self.inner.update(gateway, device, changes).await
    }

    /// Refreshes every device of every gateway concurrently.
    ///
    /// # Errors
    ///
    /// Returns the first failure once every refresh finished. Further
    /// failures are logged.
    pub async fn refresh_all_devices(&self) -> Result<()> {
        let mut refreshes = tokio::task::JoinSet::new();
        for gateway in self.gateways() {
            for child in gateway.children() {
                let inner = Arc::clone(&self.inner);
                let gateway = Arc::clone(&gateway);
                let child = Arc::clone(child);
                refreshes.spawn(async move { inner.refresh(&gateway, &*child).await });
            }
        }

        let mut first_error = None;
        while let Some(joined) = refreshes.join_next().await {
            let result = joined.map_err(|e| {
                Error::client(
                    "refresh task failed",
                    ProtocolError::ChannelClosed(e.to_string()),
                )
            });
            if let Err(e) = result.and_then(|refreshed| refreshed) {
                if first_error.is_none() {
                    first_error = Some(e);
                } else {
                    tracing::warn!(error = %e, "Device refresh failed");
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Returns the session manager.
    #[must_use]
    pub fn sessions(&self) -> &SessionManager {
        &self.inner.sessions
    }

    /// Returns `true` once [`close`](Self::close) was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Closes every session and stops background work.
    ///
    /// Devices stay readable but no longer receive updates.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!("Closing client");

        let ids = std::mem::take(&mut *self.inner.callbacks.lock());
        for id in ids {
            self.inner.sessions.remove_callback(id);
        }

        let tasks = std::mem::take(&mut *self.inner.tasks.lock());
        for task in tasks {
            task.abort();
            let _ = task.await;
        }

        self.inner.sessions.close_all().await;
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("gateways", &self.inner.index.read().gateways.len())
            .field("sessions", &self.inner.sessions)
            .field("closed", &self.inner.is_closed())
            .finish_non_exhaustive()
    }
}

impl ClientInner {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn fetch_gateways(self: &Arc<Self>) -> Result<Vec<Arc<Gateway>>> {
        let identity = Arc::clone(&self.identity);
        let tokens = tokio::task::spawn_blocking(move || identity.tokens())
            .await
            .map_err(|e| IdentityError::Other(format!("token task failed: {e}")))??;

        let list = self.service.slider_list(&tokens).await?;
        let entries = tree::parse_slider_list(&list)?;

        let details: Vec<JoinHandle<std::result::Result<Value, ProtocolError>>> = entries
            .iter()
            .map(|entry| self.spawn_details(entry, &tokens))
            .collect();

        let dispatcher = Arc::new(ClientDispatcher {
            inner: Arc::downgrade(self),
        });
        let mut gateways = Vec::with_capacity(entries.len());
        for (entry, details) in entries.into_iter().zip(details) {
            let document = details
                .await
                .map_err(|e| ProtocolError::ChannelClosed(format!("details task failed: {e}")))??;
            let children = tree::parse_slider_details(&document)?;

            tracing::debug!(
                gateway = %entry.attributes.common.device_code,
                children = children.len(),
                "Gateway discovered"
            );
            gateways.push(Arc::new(Gateway::new(
                entry.attributes,
                children,
                Arc::clone(&dispatcher) as Arc<dyn Refresher>,
                Arc::clone(&dispatcher) as Arc<dyn Updater>,
            )));
        }
        Ok(gateways)
    }

    fn spawn_details(
        &self,
        entry: &GatewayEntry,
        tokens: &Tokens,
    ) -> JoinHandle<std::result::Result<Value, ProtocolError>> {
        let service = Arc::clone(&self.service);
        let id = entry.slider_id.clone();
        let kind = entry.slider_type.clone();
        let tokens = tokens.clone();
        tokio::spawn(async move { service.slider_details(&id, &kind, &tokens).await })
    }

    async fn session_for(&self, gateway: &Gateway) -> Result<Arc<ShadowSession>> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        self.sessions
            .session_for(gateway.device_code(), gateway.thing_codes(), &gateway.occupant())
            .await
    }

    async fn refresh<A: Attributes>(&self, gateway: &Gateway, device: &Device<A>) -> Result<()> {
        let exchange = async {
            let session = self.session_for(gateway).await?;
            let document = session.get(device.device_code()).await?;
            Ok::<_, Error>(codec::decode(&document, device.device_type()))
        };

        match exchange.await {
            Ok(changes) => {
                device.set_attributes(&changes);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(device = %device.device_code(), error = %e, "Refresh failed");
                Err(Error::client(format!("failed to refresh {}", device.name()), e))
            }
        }
    }

    async fn update<A: Attributes>(
        &self,
        gateway: &Gateway,
        device: &Device<A>,
        changes: &AttributeChanges,
    ) -> Result<()> {
        let document = codec::encode(changes, device.device_type());
        tracing::debug!(device = %device.device_code(), document = %document, "Updating device");

        let exchange = async {
            let session = self.session_for(gateway).await?;
            session.update(device.device_code(), document).await?;
            Ok::<_, Error>(())
        };

        exchange.await.map_err(|e| {
            tracing::warn!(device = %device.device_code(), error = %e, "Update failed");
            Error::client(format!("failed to update {}", device.name()), e)
        })
    }

    fn lookup(&self, target: &DeviceTarget) -> Result<(Arc<Gateway>, DeviceHandle)> {
        let index = self.index.read();
        let not_found = || Error::DeviceNotFound {
            gateway_code: target.gateway_code.clone(),
            device_code: target.device_code.clone(),
        };
        let gateway = index.gateway(&target.gateway_code).ok_or_else(not_found)?;
        let device = index
            .devices
            .get(&(target.gateway_code.clone(), target.device_code.clone()))
            .cloned()
            .ok_or_else(not_found)?;
        Ok((gateway, device))
    }

    // =========================================================================
    // Session events
    // =========================================================================

    fn on_update(&self, gateway_code: &str, device_code: &str, document: &Value) {
        let handle = self
            .index
            .read()
            .devices
            .get(&(gateway_code.to_string(), device_code.to_string()))
            .cloned();
        let Some(handle) = handle else {
            tracing::debug!(gateway = %gateway_code, device = %device_code, "Update for unknown device");
            return;
        };

        let changes = codec::decode(document, handle.device_type());
        tracing::debug!(device = %device_code, changes = changes.len(), "Shadow update received");
        handle.set_attributes(&changes);
    }

    fn on_reinitialize(inner: &Arc<Self>, gateway_code: &str) {
        if inner.is_closed() {
            return;
        }
        let Some(gateway) = inner.index.read().gateway(gateway_code) else {
            return;
        };

        gateway.set_attributes(&AttributeChanges::new().with(AttributeChange::Available(true)));

        let task_inner = Arc::clone(inner);
        let task = tokio::spawn(async move {
            for child in gateway.children() {
                if let Err(e) = task_inner.refresh(&gateway, &**child).await {
                    tracing::warn!(error = %e, "Refresh after reconnection failed");
                }
            }
        });

        let mut tasks = inner.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(task);
    }

    fn on_unavailable(&self, gateway_code: &str) {
        let Some(gateway) = self.index.read().gateway(gateway_code) else {
            return;
        };

        let unavailable = AttributeChanges::new().with(AttributeChange::Available(false));
        gateway.set_attributes(&unavailable);
        for child in gateway.children() {
            child.set_attributes(&unavailable);
        }
    }
}

/// Routes device refresh and update requests back to the client.
struct ClientDispatcher {
    inner: Weak<ClientInner>,
}

impl ClientDispatcher {
    fn client(&self) -> Result<Arc<ClientInner>> {
        self.inner
            .upgrade()
            .filter(|inner| !inner.is_closed())
            .ok_or(Error::Closed)
    }
}

#[async_trait]
impl Refresher for ClientDispatcher {
    async fn refresh(&self, target: &DeviceTarget) -> Result<()> {
        let inner = self.client()?;
        let (gateway, handle) = inner.lookup(target)?;
        match handle {
            DeviceHandle::Gateway(_) => {
                let device: &Device<GatewayAttributes> = &gateway;
                inner.refresh(&gateway, device).await
            }
            DeviceHandle::Hvac(device) => inner.refresh(&gateway, &*device).await,
        }
    }
}

#[async_trait]
impl Updater for ClientDispatcher {
    async fn update(&self, target: &DeviceTarget, changes: &AttributeChanges) -> Result<()> {
        let inner = self.client()?;
        let (gateway, handle) = inner.lookup(target)?;
        match handle {
            DeviceHandle::Gateway(_) => {
                let device: &Device<GatewayAttributes> = &gateway;
                inner.update(&gateway, device, changes).await
            }
            DeviceHandle::Hvac(device) => inner.update(&gateway, &*device, changes).await,
        }
    }
}
