// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-occupant transport credentials.
//!
//! The MQTT handshake is signed on every connection attempt, including the
//! ones made by the transport while reconnecting. The [`CredentialStore`]
//! hands out one long-lived provider per occupant. Each time that provider
//! is asked for credentials it first lets the identity provider renew its
//! token, and swaps in a freshly issued provider when a renewal happened.
//! Renewals are serialized across all providers of a store since they share
//! one identity token.
//!
//! All calls in this module may block on network I/O and must not run on
//! the async runtime's worker threads.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::api::IdentityProvider;
use crate::error::IdentityError;
use crate::model::Occupant;

/// Temporary AWS credentials used to sign the MQTT handshake.
#[derive(Clone, PartialEq, Eq)]
pub struct AwsCredentials {
    /// Access key id.
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: String,
    /// Session token of temporary credentials.
    pub session_token: Option<String>,
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Source of transport credentials.
///
/// Implementations may block.
pub trait CredentialsProvider: Send + Sync {
    /// Returns credentials valid for signing a new connection.
    ///
    /// # Errors
    ///
    /// Returns an error if credentials cannot be obtained.
    fn credentials(&self) -> Result<AwsCredentials, IdentityError>;
}

/// Credentials provider that follows token renewals of the identity provider.
struct RotatingCredentials {
    identity: Arc<dyn IdentityProvider>,
    identity_id: String,
    refresh: Arc<Mutex<()>>,
    current: Mutex<Arc<dyn CredentialsProvider>>,
}

impl CredentialsProvider for RotatingCredentials {
    fn credentials(&self) -> Result<AwsCredentials, IdentityError> {
        let provider = {
            // Held across the check so concurrent callers share one renewal.
            let _refresh = self.refresh.lock();
            if self.identity.check_token()? {
                tracing::debug!(
                    identity = %self.identity_id,
                    "Identity token renewed, reissuing credentials provider"
                );
                let fresh = self.identity.credentials_provider(&self.identity_id)?;
                *self.current.lock() = fresh;
            }
            Arc::clone(&*self.current.lock())
        };
        provider.credentials()
    }
}

/// Cache of credentials providers keyed by occupant.
pub struct CredentialStore {
    identity: Arc<dyn IdentityProvider>,
    refresh: Arc<Mutex<()>>,
    providers: Mutex<HashMap<Uuid, Arc<RotatingCredentials>>>,
}

impl CredentialStore {
    /// Creates an empty store backed by `identity`.
    pub fn new(identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            identity,
            refresh: Arc::new(Mutex::new(())),
            providers: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the credentials provider for `occupant`, creating it on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the identity provider cannot issue a provider.
    pub fn credentials_for(
        &self,
        occupant: &Occupant,
    ) -> Result<Arc<dyn CredentialsProvider>, IdentityError> {
        let mut providers = self.providers.lock();
        if let Some(provider) = providers.get(&occupant.id) {
            return Ok(Arc::clone(provider) as Arc<dyn CredentialsProvider>);
        }

        tracing::debug!(
            occupant = %occupant.id,
            identity = %occupant.identity_id,
            "Creating credentials provider"
        );
        let wrapped = self.identity.credentials_provider(&occupant.identity_id)?;
        let provider = Arc::new(RotatingCredentials {
            identity: Arc::clone(&self.identity),
            identity_id: occupant.identity_id.clone(),
            refresh: Arc::clone(&self.refresh),
            current: Mutex::new(wrapped),
        });
        providers.insert(occupant.id, Arc::clone(&provider));
        Ok(provider)
    }

    /// Returns the number of cached providers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.lock().len()
    }

    /// Returns `true` if no provider is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.lock().is_empty()
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("providers", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Tokens;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct StaticProvider(String);

    impl CredentialsProvider for StaticProvider {
        fn credentials(&self) -> Result<AwsCredentials, IdentityError> {
            Ok(AwsCredentials {
                access_key_id: self.0.clone(),
                secret_access_key: "secret".to_string(),
                session_token: None,
            })
        }
    }

    #[derive(Default)]
    struct FakeIdentity {
        renew_next: AtomicBool,
        checks: AtomicUsize,
        issued: AtomicUsize,
        in_flight: AtomicUsize,
        overlapped: AtomicBool,
    }

    impl IdentityProvider for FakeIdentity {
        fn authenticate(&self, _username: &str, _password: &str) -> Result<Tokens, IdentityError> {
            unreachable!()
        }

        fn check_token(&self) -> Result<bool, IdentityError> {
            self.checks.fetch_add(1, Ordering::SeqCst);
            if self.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            // Slow enough for concurrent callers to pile up on the lock.
            std::thread::sleep(std::time::Duration::from_millis(2));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(self.renew_next.swap(false, Ordering::SeqCst))
        }

        fn tokens(&self) -> Result<Tokens, IdentityError> {
            unreachable!()
        }

        fn credentials_provider(
            &self,
            identity_id: &str,
        ) -> Result<Arc<dyn CredentialsProvider>, IdentityError> {
            let n = self.issued.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(StaticProvider(format!("{identity_id}#{n}"))))
        }
    }

    fn occupant(identity: &str) -> Occupant {
        Occupant {
            id: Uuid::new_v4(),
            identity_id: identity.to_string(),
        }
    }

    #[test]
    fn provider_is_cached_per_occupant() {
        let identity = Arc::new(FakeIdentity::default());
        let store = CredentialStore::new(identity.clone());
        let alice = occupant("alice");
        let bob = occupant("bob");

        let first = store.credentials_for(&alice).unwrap();
        let second = store.credentials_for(&alice).unwrap();
        store.credentials_for(&bob).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.len(), 2);
        assert_eq!(identity.issued.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn reuses_wrapped_provider_until_renewal() {
        let identity = Arc::new(FakeIdentity::default());
        let store = CredentialStore::new(identity.clone());
        let provider = store.credentials_for(&occupant("alice")).unwrap();

        assert_eq!(provider.credentials().unwrap().access_key_id, "alice#0");
        assert_eq!(provider.credentials().unwrap().access_key_id, "alice#0");

        identity.renew_next.store(true, Ordering::SeqCst);
        assert_eq!(provider.credentials().unwrap().access_key_id, "alice#1");
        assert_eq!(provider.credentials().unwrap().access_key_id, "alice#1");
        assert_eq!(identity.checks.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn concurrent_callers_share_one_renewal() {
        let identity = Arc::new(FakeIdentity::default());
        let store = CredentialStore::new(identity.clone());
        let provider = store.credentials_for(&occupant("alice")).unwrap();
        identity.renew_next.store(true, Ordering::SeqCst);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let provider = Arc::clone(&provider);
                std::thread::spawn(move || provider.credentials().unwrap().access_key_id)
            })
            .collect();
        let keys: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(keys.iter().all(|key| key == "alice#1"));
        assert_eq!(identity.issued.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn renewals_never_overlap_across_occupants() {
        let identity = Arc::new(FakeIdentity::default());
        let store = CredentialStore::new(identity.clone());
        let alice = store.credentials_for(&occupant("alice")).unwrap();
        let bob = store.credentials_for(&occupant("bob")).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let provider = if i % 2 == 0 {
                    Arc::clone(&alice)
                } else {
                    Arc::clone(&bob)
                };
                std::thread::spawn(move || provider.credentials().unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(identity.checks.load(Ordering::SeqCst), 8);
        assert!(!identity.overlapped.load(Ordering::SeqCst));
    }

    #[test]
    fn credentials_debug_is_redacted() {
        let credentials = AwsCredentials {
            access_key_id: "AKIA".to_string(),
            secret_access_key: "very-secret".to_string(),
            session_token: Some("token".to_string()),
        };
        let debug = format!("{credentials:?}");
        assert!(debug.contains("AKIA"));
        assert!(!debug.contains("very-secret"));
        assert!(!debug.contains("\"token\""));
    }
}
