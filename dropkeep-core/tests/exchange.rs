//! Integration tests for grant exchanges against a mock token endpoint.
//!
//! These tests verify that OAuth2ExchangeClient:
//! - Trades an access code for a token with a refresh value
//! - Trades a refresh value for a new token
//! - Maps provider error responses onto ExchangeError variants

use dropkeep_core::{
    ExchangeClient, ExchangeError, OAuth2ExchangeClient, Secret, provider::ProviderConfig,
};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_string_contains, header_exists, method, path},
};

fn client_for(server: &MockServer) -> OAuth2ExchangeClient {
    let provider = ProviderConfig::dropbox().with_token_url(format!("{}/oauth2/token", server.uri()));
    OAuth2ExchangeClient::new(provider, "app-key", &Secret::new("app-secret")).unwrap()
}

#[tokio::test]
async fn test_authorization_code_exchange() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .and(header_exists("authorization"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=pasted-code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "sl.first",
            "token_type": "bearer",
            "expires_in": 14400,
            "refresh_token": "refresh-1",
            "scope": "files.content.read files.content.write",
            "uid": "12345",
            "account_id": "dbid:abc"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let token = client_for(&server)
        .exchange_authorization_code(&Secret::new("pasted-code"))
        .await
        .unwrap();

    assert_eq!(token.access_token.expose(), "sl.first");
    assert_eq!(token.refresh_token, Some(Secret::new("refresh-1")));
    assert_eq!(token.token_type, "bearer");
    assert_eq!(
        token.expires_at.unwrap() - token.issued_at,
        chrono::Duration::seconds(14400)
    );
}

#[tokio::test]
async fn test_refresh_exchange_without_rotation() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=refresh-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "sl.second",
            "token_type": "bearer",
            "expires_in": 14400
        })))
        .expect(1)
        .mount(&server)
        .await;

    let token = client_for(&server)
        .exchange_refresh_token(&Secret::new("refresh-1"))
        .await
        .unwrap();

    assert_eq!(token.access_token.expose(), "sl.second");
    assert!(token.refresh_token.is_none());
    assert!(token.is_fresh());
}

#[tokio::test]
async fn test_invalid_grant_is_classified() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_grant",
            "error_description": "refresh token is malformed"
        })))
        .mount(&server)
        .await;

    let result = client_for(&server)
        .exchange_refresh_token(&Secret::new("revoked"))
        .await;

    match result {
        Err(ExchangeError::InvalidGrant { description }) => {
            assert_eq!(description, "refresh token is malformed");
        }
        other => panic!("expected InvalidGrant, got {:?}", other),
    }
}

#[tokio::test]
async fn test_other_provider_errors() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_client",
            "error_description": "Invalid client_id or client_secret"
        })))
        .mount(&server)
        .await;

    let result = client_for(&server)
        .exchange_authorization_code(&Secret::new("code"))
        .await;

    match result {
        Err(ExchangeError::Provider { error, .. }) => assert_eq!(error, "invalid_client"),
        other => panic!("expected Provider error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_server_failure_is_request_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .mount(&server)
        .await;

    let result = client_for(&server)
        .exchange_authorization_code(&Secret::new("code"))
        .await;

    assert!(matches!(result, Err(ExchangeError::Request { .. })));
}

#[tokio::test]
async fn test_bootstrap_survives_restart_with_file_store() {
    use std::sync::Arc;

    use dropkeep_core::{CredentialManager, FileStore, SecretTokenStore};

    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let secrets_path = dir.path().join("secrets.json");

    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "sl.persisted",
            "token_type": "bearer",
            "expires_in": 14400,
            "refresh_token": "refresh-1"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let exchange = Arc::new(client_for(&server));

    let store = Arc::new(SecretTokenStore::new(FileStore::open(&secrets_path).unwrap(), "default"));
    let manager = CredentialManager::new("default", store, exchange.clone())
        .with_access_code(Some(Secret::new("pasted-code")));
    let first = manager.acquire_token().await.unwrap();
    drop(manager);

    // A new process sees the persisted token and never reuses the code.
    let store = Arc::new(SecretTokenStore::new(FileStore::open(&secrets_path).unwrap(), "default"));
    let manager = CredentialManager::new("default", store, exchange)
        .with_access_code(Some(Secret::new("pasted-code")));
    let second = manager.acquire_token().await.unwrap();

    assert_eq!(second, first);
}
