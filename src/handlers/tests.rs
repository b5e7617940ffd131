//! # Tests for Handlers
//!
//! Router-level tests driven through `tower::ServiceExt::oneshot` over
//! in-memory stores.

use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
    response::Response,
};
use serde_json::{Value, json};
use tower::ServiceExt;

use crate::config::AppConfig;
use crate::models::credential::{CredentialKey, ProviderCredential};
use crate::models::provider::ProviderId;
use crate::server::{Services, create_app};
use crate::store::{CredentialStore, InMemoryCredentialStore, InMemorySyncJobQueue};

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.crypto_key = Some(vec![5u8; 32]);
    config.google.client_id = Some("google-client".into());
    config.google.client_secret = Some("google-secret".into());
    config
}

fn app_with_store(store: Arc<InMemoryCredentialStore>) -> Router {
    let services = Services::build(
        Arc::new(test_config()),
        reqwest::Client::new(),
        store,
        InMemorySyncJobQueue::new(),
    )
    .unwrap();
    create_app(services.state)
}

fn app() -> Router {
    app_with_store(InMemoryCredentialStore::new())
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_root_handler_returns_expected_service_info() {
    let response = app()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    let body = json_body(response).await;
    assert_eq!(body["service"], "ads-connectors");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_providers_report_configuration() {
    let response = app()
        .oneshot(Request::builder().uri("/providers").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let providers = body.as_array().unwrap();
    assert_eq!(providers.len(), 4);
    let google = providers.iter().find(|p| p["provider"] == "google").unwrap();
    assert_eq!(google["configured"], true);
    assert_eq!(google["pkce"], true);
    let meta = providers.iter().find(|p| p["provider"] == "meta").unwrap();
    assert_eq!(meta["configured"], false);
}

#[tokio::test]
async fn test_connect_returns_authorize_url_with_state() {
    let response = app()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/connect/google?workspace_client_id=ws-1&return_path=%2Fclients%2F1")
                .header("X-User-Id", "user-1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let url = url::Url::parse(body["authorize_url"].as_str().unwrap()).unwrap();
    let query: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
    assert!(!query["state"].is_empty());
    assert_eq!(query["code_challenge_method"], "S256");
    assert_eq!(query["redirect_uri"], "http://localhost:8080/callback/google");
    assert!(!body["flow_nonce"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_connect_requires_user_header() {
    let response = app()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/connect/google")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/problem+json"
    );
}

#[tokio::test]
async fn test_unknown_provider_is_not_found() {
    let response = app()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/connect/snapchat")
                .header("X-User-Id", "user-1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["code"], "UNKNOWN_PROVIDER");
}

#[tokio::test]
async fn test_unconfigured_provider_is_server_error() {
    let response = app()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/connect/linkedin")
                .header("X-User-Id", "user-1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json_body(response).await["code"], "PROVIDER_NOT_CONFIGURED");
}

#[tokio::test]
async fn test_callback_without_nonce_is_rejected() {
    let app = app();
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/connect/google")
                .header("X-User-Id", "user-1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = json_body(response).await;
    let url = url::Url::parse(body["authorize_url"].as_str().unwrap()).unwrap();
    let state = url
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .unwrap();

    let callback = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("code", "auth-code")
        .append_pair("state", &state)
        .finish();
    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/callback/google?{callback}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["code"], "INVALID_STATE");
}

#[tokio::test]
async fn test_callback_reports_consent_denial() {
    let response = app()
        .oneshot(
            Request::builder()
                .uri("/callback/meta?error=access_denied&error_description=Permissions+error")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["code"], "AUTHORIZATION_DENIED");
    assert_eq!(body["details"]["error"], "access_denied");
}

#[tokio::test]
async fn test_metrics_rejects_inverted_range() {
    let response = app()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/metrics")
                .header("X-User-Id", "user-1")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({ "accounts": [], "start": "2024-03-02", "end": "2024-03-01" }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["code"], "VALIDATION_FAILED");
}

#[tokio::test]
async fn test_metrics_reports_failed_accounts_without_failing() {
    let response = app()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/metrics")
                .header("X-User-Id", "user-1")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({
                        "accounts": [
                            { "provider": "meta", "account_id": "123" },
                            { "provider": "pinterest", "account_id": "9" }
                        ],
                        "start": "2024-03-01",
                        "end": "2024-03-31"
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["records"], json!([]));
    let failures = body["failures"].as_array().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0]["provider"], "meta");
    assert_eq!(failures[0]["code"], "CREDENTIAL_NOT_FOUND");
    assert_eq!(body["summary"]["records"], 0);
}

#[tokio::test]
async fn test_disconnect_removes_stored_credential() {
    let store = InMemoryCredentialStore::new();
    store
        .persist(&ProviderCredential {
            user_id: "user-1".into(),
            provider: ProviderId::Tiktok,
            workspace_client_id: None,
            access_token: "tt".into(),
            refresh_token: None,
            scopes: Default::default(),
            bound_account_id: None,
            access_token_expires_at: None,
            refresh_token_expires_at: None,
        })
        .await
        .unwrap();
    let app = app_with_store(store.clone());

    let request = || {
        Request::builder()
            .method("DELETE")
            .uri("/connections/tiktok")
            .header("X-User-Id", "user-1")
            .body(Body::empty())
            .unwrap()
    };
    let response = app.clone().oneshot(request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(
        store
            .get(&CredentialKey::new("user-1", ProviderId::Tiktok, None))
            .await
            .unwrap()
            .is_none()
    );

    let response = app.oneshot(request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_connection_status_follows_credential_lifecycle() {
    let store = InMemoryCredentialStore::new();
    let app = app_with_store(store.clone());
    let status = |app: Router| async move {
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/connections/google?workspace_client_id=ws-9")
                    .header("X-User-Id", "user-3")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        json_body(response).await
    };

    let body = status(app.clone()).await;
    assert_eq!(body["state"], "unauthenticated");
    assert_eq!(body["credential"]["workspace_client_id"], "ws-9");

    let mut credential = ProviderCredential {
        user_id: "user-3".into(),
        provider: ProviderId::Google,
        workspace_client_id: Some("ws-9".into()),
        access_token: "ya29.live".into(),
        refresh_token: Some("1//r".into()),
        scopes: ["https://www.googleapis.com/auth/adwords".to_string()].into(),
        bound_account_id: None,
        access_token_expires_at: Some(chrono::Utc::now() + chrono::Duration::hours(1)),
        refresh_token_expires_at: None,
    };
    store.persist(&credential).await.unwrap();
    let body = status(app.clone()).await;
    assert_eq!(body["state"], "authenticated");
    assert_eq!(body["scopes"][0], "https://www.googleapis.com/auth/adwords");
    assert!(body.get("access_token").is_none());

    credential.access_token_expires_at = Some(chrono::Utc::now() - chrono::Duration::minutes(1));
    store.persist(&credential).await.unwrap();
    assert_eq!(status(app).await["state"], "expired");
}

#[tokio::test]
async fn test_openapi_document_lists_routes() {
    let response = app()
        .oneshot(Request::builder().uri("/openapi.json").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    for path in ["/connect/{provider}", "/callback/{provider}", "/metrics", "/connections/{provider}"] {
        assert!(body["paths"].get(path).is_some(), "missing {path}");
    }
}
