// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Registry of shadow sessions, one per gateway.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::config::ClientConfig;
use crate::credentials::CredentialStore;
use crate::error::{Error, IdentityError};
use crate::model::Occupant;
use crate::shadow::session::{SessionHandlers, SessionParams, ShadowSession};
use crate::subscription::{CallbackList, SubscriptionId};
use crate::transport::Connector;

/// Callback receiving `(gateway_code, device_code, document)` for every
/// shadow document pushed by the service.
pub type UpdateCallback = dyn Fn(&str, &str, &Value) + Send + Sync;

/// Callback receiving the code of a gateway whose session changed state.
pub type GatewayCallback = dyn Fn(&str) + Send + Sync;

#[derive(Default)]
struct Callbacks {
    update: CallbackList<UpdateCallback>,
    reinitialize: CallbackList<GatewayCallback>,
    unavailable: CallbackList<GatewayCallback>,
}

/// Manager of the shadow sessions of every gateway.
///
/// Sessions are created lazily on first use and shared afterwards. At most
/// one session exists per gateway, even when several tasks ask for it at
/// the same time. Callbacks registered on the manager receive the events of
/// every session.
pub struct SessionManager {
    credentials: Arc<CredentialStore>,
    connector: Arc<dyn Connector>,
    config: ClientConfig,
    sessions: RwLock<HashMap<String, Arc<ShadowSession>>>,
    creation: Mutex<()>,
    callbacks: Arc<Callbacks>,
}

impl SessionManager {
    /// Creates a manager opening sessions through `connector`.
    pub fn new(
        credentials: Arc<CredentialStore>,
        connector: Arc<dyn Connector>,
        config: ClientConfig,
    ) -> Self {
        Self {
            credentials,
            connector,
            config,
            sessions: RwLock::new(HashMap::new()),
            creation: Mutex::new(()),
            callbacks: Arc::new(Callbacks::default()),
        }
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Returns the session of `gateway_code`, opening it if needed.
    ///
    /// A new session subscribes to the shadows of `thing_codes` and signs its
    /// connections with the credentials of `occupant`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Identity`] if no credentials can be obtained for the
    /// occupant, [`Error::Protocol`] if the session cannot be opened.
    pub async fn session_for(
        &self,
        gateway_code: &str,
        thing_codes: Vec<String>,
        occupant: &Occupant,
    ) -> Result<Arc<ShadowSession>, Error> {
        if let Some(session) = self.sessions.read().get(gateway_code) {
            return Ok(Arc::clone(session));
        }

        let _creation = self.creation.lock().await;
        if let Some(session) = self.sessions.read().get(gateway_code) {
            return Ok(Arc::clone(session));
        }

        tracing::debug!(gateway = %gateway_code, "Creating shadow session");

        let store = Arc::clone(&self.credentials);
        let lookup = occupant.clone();
        let credentials = tokio::task::spawn_blocking(move || store.credentials_for(&lookup))
            .await
            .map_err(|e| IdentityError::Other(format!("credential lookup failed: {e}")))??;

        let params = SessionParams {
            gateway_code: gateway_code.to_string(),
            thing_codes,
            credentials,
            connector: Arc::clone(&self.connector),
            config: self.config.clone(),
        };
        let session = Arc::new(ShadowSession::open(params, self.handlers(gateway_code)).await?);

        self.sessions
            .write()
            .insert(gateway_code.to_string(), Arc::clone(&session));
        Ok(session)
    }

    /// Returns the session of `gateway_code` if one is open.
    #[must_use]
    pub fn session(&self, gateway_code: &str) -> Option<Arc<ShadowSession>> {
        self.sessions.read().get(gateway_code).cloned()
    }

    /// Returns the number of open sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Closes and removes the session of `gateway_code`.
    ///
    /// Returns `false` if no session was open.
    ///
    /// # Errors
    ///
    /// Returns error if the session did not close cleanly. It is removed
    /// regardless.
    pub async fn close_session(&self, gateway_code: &str) -> Result<bool, Error> {
        let session = self.sessions.write().remove(gateway_code);
        match session {
            Some(session) => {
                session.close().await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Closes every session concurrently.
    ///
    /// Failures are logged; every session is removed regardless.
    pub async fn close_all(&self) {
        let sessions: Vec<Arc<ShadowSession>> =
            self.sessions.write().drain().map(|(_, session)| session).collect();
        if sessions.is_empty() {
            return;
        }

        tracing::info!(sessions = sessions.len(), "Closing shadow sessions");

        let mut tasks = tokio::task::JoinSet::new();
        for session in sessions {
            tasks.spawn(async move {
                let result = session.close().await;
                (session.gateway_code().to_string(), result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((gateway, Err(e))) => {
                    tracing::warn!(gateway = %gateway, error = %e, "Failed to close shadow session");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Shadow session close task failed");
                }
            }
        }
    }

    // =========================================================================
    // Callbacks
    // =========================================================================

    /// Registers a callback for shadow documents pushed by any session.
    pub fn register_update_callback<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&str, &str, &Value) + Send + Sync + 'static,
    {
        self.callbacks.update.add(Arc::new(callback))
    }

    /// Registers a callback for sessions that recovered from an interruption.
    pub fn on_reinitialize<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.reinitialize.add(Arc::new(callback))
    }

    /// Registers a callback for sessions interrupted beyond the grace period.
    pub fn on_unavailable<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.unavailable.add(Arc::new(callback))
    }

    /// Removes a callback registered with any of the registration methods.
    ///
    /// Returns `true` if the callback was registered.
    pub fn remove_callback(&self, id: SubscriptionId) -> bool {
        self.callbacks.update.remove(id)
            || self.callbacks.reinitialize.remove(id)
            || self.callbacks.unavailable.remove(id)
    }

    fn handlers(&self, gateway_code: &str) -> SessionHandlers {
        let update = {
            let callbacks = Arc::clone(&self.callbacks);
            let gateway = gateway_code.to_string();
            move |device: &str, document: &Value| {
                callbacks
                    .update
                    .dispatch(|callback| callback(&gateway, device, document));
            }
        };
        let reinitialize = {
            let callbacks = Arc::clone(&self.callbacks);
            let gateway = gateway_code.to_string();
            move || callbacks.reinitialize.dispatch(|callback| callback(&gateway))
        };
        let unavailable = {
            let callbacks = Arc::clone(&self.callbacks);
            let gateway = gateway_code.to_string();
            move || callbacks.unavailable.dispatch(|callback| callback(&gateway))
        };

        SessionHandlers::new()
            .on_update(update)
            .on_reinitialize(reinitialize)
            .on_unavailable(unavailable)
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions", &self.session_count())
            .field("update_callbacks", &self.callbacks.update.len())
            .finish_non_exhaustive()
    }
}
