//! End-to-end flow through the HTTP surface: connect, callback against a
//! mocked token endpoint, then a metrics aggregation against a mocked
//! reporting API, with credentials persisted in SQLite.

mod test_utils;

use std::sync::Arc;
use std::time::Duration;

use ads_connectors::crypto::CryptoKey;
use ads_connectors::models::credential::CredentialKey;
use ads_connectors::models::provider::ProviderId;
use ads_connectors::repositories::{CredentialRepository, SyncJobRepository};
use ads_connectors::server::{Services, create_app};
use ads_connectors::store::CredentialStore;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
    response::Response,
};
use serde_json::{Value, json};
use tower::ServiceExt;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_string_contains, header, method, path},
};

struct Harness {
    app: Router,
    credentials: CredentialRepository,
    jobs: SyncJobRepository,
}

async fn harness(server: &MockServer) -> Harness {
    let db = test_utils::setup_test_db().await.unwrap();
    let config = Arc::new(test_utils::config_against(&server.uri()));
    let key = || CryptoKey::new(test_utils::CRYPTO_KEY.to_vec()).unwrap();

    let services = Services::build(
        config,
        reqwest::Client::new(),
        Arc::new(CredentialRepository::new(db.clone(), key())),
        Arc::new(SyncJobRepository::new(db.clone())),
    )
    .unwrap();

    Harness {
        app: create_app(services.state),
        credentials: CredentialRepository::new(db.clone(), key()),
        jobs: SyncJobRepository::new(db),
    }
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn search_result(id: &str, name: &str, date: &str, cost_micros: &str) -> Value {
    json!({
        "campaign": { "id": id, "name": name },
        "segments": { "date": date },
        "metrics": {
            "costMicros": cost_micros,
            "clicks": "40",
            "impressions": "2000",
            "conversions": 4.0,
            "conversionsValue": 200.0
        }
    })
}

/// Runs `POST /connect/google` and returns `(state, flow_nonce)`.
async fn start_connect(app: &Router, user: &str) -> (String, String) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/connect/google?return_path=%2Fdashboard")
                .header("X-User-Id", user)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    let url = url::Url::parse(body["authorize_url"].as_str().unwrap()).unwrap();
    let state = url
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .unwrap();
    (state, body["flow_nonce"].as_str().unwrap().to_string())
}

fn callback_request(state: &str, nonce: &str) -> Request<Body> {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("code", "4/auth-code")
        .append_pair("state", state)
        .finish();
    Request::builder()
        .uri(format!("/callback/google?{query}"))
        .header("X-Flow-Nonce", nonce)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn connect_callback_and_aggregate() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code_verifier="))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "ya29.e2e",
            "refresh_token": "1//e2e-refresh",
            "expires_in": 3599,
            "scope": "https://www.googleapis.com/auth/adwords",
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v17/customers/1234567890/googleAds:search"))
        .and(header("authorization", "Bearer ya29.e2e"))
        .and(header("developer-token", "dev-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                search_result("111", "Brand", "2024-03-01", "10000000"),
                search_result("222", "Prospecting", "2024-03-02", "30000000")
            ]
        })))
        .mount(&server)
        .await;

    let h = harness(&server).await;
    let (state, nonce) = start_connect(&h.app, "user-42").await;

    let response = h.app.clone().oneshot(callback_request(&state, &nonce)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["credential"]["user_id"], "user-42");
    assert_eq!(body["credential"]["provider"], "google");
    assert_eq!(body["return_path"], "/dashboard");

    // The same redirect cannot be redeemed twice; the token mock expects one call.
    let replay = h.app.clone().oneshot(callback_request(&state, &nonce)).await.unwrap();
    assert_eq!(replay.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(replay).await["code"], "INVALID_STATE");

    let key = CredentialKey::new("user-42", ProviderId::Google, None);
    let stored = h.credentials.get(&key).await.unwrap().expect("credential stored");
    assert_eq!(stored.access_token.expose(), "ya29.e2e");
    assert_eq!(stored.refresh_token.as_ref().unwrap().expose(), "1//e2e-refresh");
    assert!(stored.access_token_expires_at.is_some());

    // The backfill job is queued off the request path.
    let mut jobs = Vec::new();
    for _ in 0..50 {
        jobs = h.jobs.list_for(&key).await.unwrap();
        if !jobs.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].job_type, "initial-backfill");
    assert_eq!(jobs[0].status, "queued");

    let response = h
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/metrics")
                .header("X-User-Id", "user-42")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({
                        "accounts": [
                            { "provider": "google", "account_id": "123-456-7890" },
                            { "provider": "tiktok", "account_id": "700001" }
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
    let records = body["records"].as_array().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["campaign_id"], "111");
    assert_eq!(records[0]["spend"], 10.0);
    assert_eq!(records[1]["campaign_name"], "Prospecting");

    let failures = body["failures"].as_array().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0]["provider"], "tiktok");
    assert_eq!(failures[0]["code"], "CREDENTIAL_NOT_FOUND");

    assert_eq!(body["summary"]["records"], 2);
    assert_eq!(body["summary"]["spend"], 40.0);
    assert_eq!(body["summary"]["clicks"], 80);
    assert_eq!(body["summary"]["roas"], 10.0);
}

#[tokio::test]
async fn replayed_state_with_wrong_nonce_is_rejected_before_exchange() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let h = harness(&server).await;
    let (state, _) = start_connect(&h.app, "user-42").await;

    let response = h
        .app
        .clone()
        .oneshot(callback_request(&state, "someone-elses-nonce"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["code"], "INVALID_STATE");

    let key = CredentialKey::new("user-42", ProviderId::Google, None);
    assert!(h.credentials.get(&key).await.unwrap().is_none());
}

#[tokio::test]
async fn provider_rejection_leaves_no_credential() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Bad Request"
        })))
        .mount(&server)
        .await;

    let h = harness(&server).await;
    let (state, nonce) = start_connect(&h.app, "user-7").await;

    let response = h.app.clone().oneshot(callback_request(&state, &nonce)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = json_body(response).await;
    assert_eq!(body["code"], "PROVIDER_ERROR");
    assert_eq!(body["details"]["error_code"], "invalid_grant");

    let key = CredentialKey::new("user-7", ProviderId::Google, None);
    assert!(h.credentials.get(&key).await.unwrap().is_none());
    assert!(h.jobs.list_for(&key).await.unwrap().is_empty());
}
