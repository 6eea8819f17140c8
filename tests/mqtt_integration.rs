// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Integration tests for the MQTT transport using mockforge-mqtt.

#![cfg(feature = "mqtt")]

mod common;

use std::sync::Arc;
use std::time::Duration;

use mockforge_mqtt::broker::MqttConfig;
use mockforge_mqtt::start_mqtt_server;
use tokio::time::sleep;

use common::StaticCredentials;
use upgw::ProtocolError;
use upgw::config::{ClientConfig, ReconnectionPolicy};
use upgw::shadow::{SessionHandlers, SessionParams, ShadowSession};
use upgw::transport::{ConnectOptions, Connector, LinkEvent, MqttConnector};

/// Helper to find an available port for testing.
fn get_test_port() -> u16 {
    use std::sync::atomic::{AtomicU16, Ordering};
    static PORT_COUNTER: AtomicU16 = AtomicU16::new(18850);
    PORT_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Starts a mock MQTT broker on the given port.
async fn start_mock_broker(port: u16) {
    let config = MqttConfig {
        port,
        host: "127.0.0.1".to_string(),
        ..Default::default()
    };

    tokio::spawn(async move {
        let _ = start_mqtt_server(config).await;
    });

    // Give the broker time to start, bind to port, and be ready to accept connections
    sleep(Duration::from_millis(500)).await;
}

fn config() -> ClientConfig {
    ClientConfig::default()
        .with_connection_timeout(Duration::from_secs(5))
        .with_keep_alive(Duration::from_secs(5))
        .with_reconnection(ReconnectionPolicy::disabled())
}

fn params(port: u16, things: &[&str]) -> SessionParams {
    SessionParams {
        gateway_code: "GW1".to_string(),
        thing_codes: things.iter().map(ToString::to_string).collect(),
        credentials: Arc::new(StaticCredentials),
        connector: Arc::new(MqttConnector::tcp("127.0.0.1", port)),
        config: config(),
    }
}

// ============================================================================
// Connector
// ============================================================================

mod connector {
    use super::*;

    #[tokio::test]
    async fn connect_reports_handshake() {
        let port = get_test_port();
        start_mock_broker(port).await;

        let connector = MqttConnector::tcp("127.0.0.1", port);
        let options = ConnectOptions {
            client_id: "GW1-connector-test".to_string(),
            keep_alive: Duration::from_secs(5),
            credentials: Arc::new(StaticCredentials),
        };

        let first_event = tokio::task::spawn_blocking(move || {
            let (link, mut events) = connector.connect(options)?;
            let event = events.next_event();
            link.disconnect()?;
            Ok::<_, ProtocolError>(event)
        })
        .await
        .unwrap()
        .unwrap();

        assert_eq!(first_event, Some(LinkEvent::Connected));
    }
}

// ============================================================================
// Shadow session over MQTT
// ============================================================================

mod session {
    use super::*;

    #[tokio::test]
    async fn open_and_close_session() {
        let port = get_test_port();
        start_mock_broker(port).await;

        let session = ShadowSession::open(params(port, &["GW1", "TH1"]), SessionHandlers::new())
            .await
            .unwrap();

        assert!(session.client_id().starts_with("GW1-"));
        assert!(!session.is_closed());

        session.close().await.unwrap();
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn open_fails_without_broker() {
        let port = get_test_port();

        let result = ShadowSession::open(params(port, &["GW1"]), SessionHandlers::new()).await;

        assert!(matches!(
            result,
            Err(ProtocolError::ConnectionFailed(_) | ProtocolError::Timeout(_))
        ));
    }
}
