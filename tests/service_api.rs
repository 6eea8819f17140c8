// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Integration tests for the HTTP service API using wiremock.

#![cfg(feature = "http")]

mod common;

use upgw::api::{HttpServiceApi, ServiceApi, Tokens};
use upgw::config::ClientConfig;
use upgw::{Client, ClientBuilder, ProtocolError};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn tokens() -> Tokens {
    Tokens {
        id_token: "id-token".to_string(),
        access_token: "access-token".to_string(),
    }
}

fn api(server: &MockServer) -> HttpServiceApi {
    HttpServiceApi::new(format!("{}/api/v1", server.uri()), "purmo").unwrap()
}

// ============================================================================
// Requests
// ============================================================================

mod requests {
    use super::*;

    #[tokio::test]
    async fn slider_list_sends_auth_headers() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/occupants/slider_list"))
            .and(header("x-auth-token", "id-token"))
            .and(header("x-access-token", "access-token"))
            .and(header("x-company-code", "purmo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(common::slider_list()))
            .expect(1)
            .mount(&server)
            .await;

        let list = api(&server).slider_list(&tokens()).await.unwrap();

        assert_eq!(list, common::slider_list());
    }

    #[tokio::test]
    async fn slider_details_sends_id_and_type() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/occupants/slider_details"))
            .and(query_param("id", common::GATEWAY_ID))
            .and(query_param("type", "gateway"))
            .and(header("x-company-code", "purmo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(common::slider_details()))
            .expect(1)
            .mount(&server)
            .await;

        let details = api(&server)
            .slider_details(common::GATEWAY_ID, "gateway", &tokens())
            .await
            .unwrap();

        assert_eq!(details["data"]["items"][1]["device_code"], "TH1");
    }

    #[tokio::test]
    async fn error_status_fails_request() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let error = api(&server).slider_list(&tokens()).await.unwrap_err();

        match error {
            ProtocolError::ConnectionFailed(message) => assert_eq!(message, "HTTP 401 - Unauthorized"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn invalid_body_fails_request() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .mount(&server)
            .await;

        let result = api(&server).slider_list(&tokens()).await;

        assert!(matches!(result, Err(ProtocolError::Http(_))));
    }
}

// ============================================================================
// Client over HTTP
// ============================================================================

mod client {
    use super::*;

    #[tokio::test]
    async fn client_uses_configured_service_url() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/occupants/slider_list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(common::slider_list()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/occupants/slider_details"))
            .respond_with(ResponseTemplate::new(200).set_body_json(common::slider_details()))
            .mount(&server)
            .await;

        let broker = common::FakeBroker::new();
        let config = ClientConfig::default()
            .with_service_api_base_url(format!("{}/api/v1", server.uri()))
            .with_service_api_company("purmo");
        let builder = ClientBuilder::new()
            .with_config(config)
            .with_identity_provider(common::FakeIdentity::new())
            .with_connector(broker.connector());

        let client = Client::connect(builder, "user@example.com", common::PASSWORD)
            .await
            .unwrap();

        assert_eq!(client.gateways().len(), 1);
        assert_eq!(client.devices().len(), 2);

        client.close().await;
    }
}
