//! # Server Configuration
//!
//! Wiring of the integration layer behind the HTTP surface, plus the
//! OpenAPI document served at `/openapi.json`.

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::AppConfig;
use crate::connectors::AdapterRegistry;
use crate::crypto::{CryptoError, CryptoKey};
use crate::handlers;
use crate::http;
use crate::locks::KeyedMutex;
use crate::oauth::exchange::clients_from_config;
use crate::oauth::{OAuthFlowService, StateCodec};
use crate::orchestrator::AdsManager;
use crate::repositories::{CredentialRepository, SyncJobRepository};
use crate::store::{CredentialStore, SyncJobQueue};
use crate::telemetry;
use crate::token_refresh::TokenRefreshService;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub oauth: Arc<OAuthFlowService>,
    pub ads: Arc<AdsManager>,
    /// Cancelled on shutdown; request-scoped tokens are children of it
    pub shutdown: CancellationToken,
}

/// Everything the process runs: request state and the refresh loop.
pub struct Services {
    pub state: AppState,
    pub token_refresh: TokenRefreshService,
}

impl Services {
    /// Wire the integration layer over the given store and queue. The
    /// callback flow and the refresh loop share one lock table so grants for
    /// the same credential never overlap.
    pub fn build(
        config: Arc<AppConfig>,
        http: reqwest::Client,
        store: Arc<dyn CredentialStore>,
        queue: Arc<dyn SyncJobQueue>,
    ) -> Result<Self, CryptoError> {
        let state_key = config
            .effective_state_key()
            .ok_or_else(|| CryptoError::InvalidKey("no state key configured".into()))?;
        let codec = Arc::new(StateCodec::new(CryptoKey::new(state_key.to_vec())?));
        let locks = KeyedMutex::new();
        let exchangers = clients_from_config(&config, &http);

        let oauth = OAuthFlowService::new(
            config.clone(),
            codec,
            exchangers.clone(),
            store.clone(),
            queue,
            locks.clone(),
        );
        let registry = AdapterRegistry::from_config(&config, http);
        let ads = AdsManager::from_config(&config, registry, store.clone());
        let token_refresh = TokenRefreshService::new(config.clone(), exchangers, store, locks);

        Ok(Self {
            state: AppState {
                config,
                oauth: Arc::new(oauth),
                ads: Arc::new(ads),
                shutdown: CancellationToken::new(),
            },
            token_refresh,
        })
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/providers", get(handlers::providers::list_providers))
        .route("/connect/{provider}", post(handlers::connect::start_oauth))
        .route("/callback/{provider}", get(handlers::callback::oauth_callback))
        .route("/metrics", post(handlers::metrics::aggregate_metrics))
        .route(
            "/connections/{provider}",
            get(handlers::connections::connection_status).delete(handlers::connections::disconnect),
        )
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(telemetry::trace_context_middleware))
}

/// Starts the server and the token refresh loop, and stops both on Ctrl-C
pub async fn run_server(
    config: AppConfig,
    db: DatabaseConnection,
) -> Result<(), Box<dyn std::error::Error>> {
    let crypto_key = CryptoKey::new(config.crypto_key.clone().unwrap_or_default())?;
    let http = http::build_client(&config.http)?;
    let config = Arc::new(config);

    let store = Arc::new(CredentialRepository::new(db.clone(), crypto_key));
    let queue = Arc::new(SyncJobRepository::new(db));
    let services = Services::build(config.clone(), http, store, queue)?;
    let shutdown = services.state.shutdown.clone();

    let refresher = services.token_refresh;
    let refresh_shutdown = shutdown.clone();
    let refresh_task = tokio::spawn(async move { refresher.run(refresh_shutdown).await });

    let addr = config
        .bind_addr()
        .map_err(|e| format!("Invalid server address: {}", e))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, profile = %config.profile, "Server listening");

    let app = create_app(services.state);
    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown signal received");
            }
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Err(e) = refresh_task.await {
        tracing::error!(error = %e, "Token refresh task ended abnormally");
    }
    Ok(())
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::providers::list_providers,
        crate::handlers::connect::start_oauth,
        crate::handlers::callback::oauth_callback,
        crate::handlers::metrics::aggregate_metrics,
        crate::handlers::connections::connection_status,
        crate::handlers::connections::disconnect,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::models::provider::ProviderId,
            crate::models::credential::CredentialKey,
            crate::models::metrics::CanonicalMetricRecord,
            crate::models::metrics::MetricsSummary,
            crate::models::metrics::AccountFailure,
            crate::connectors::ProviderMetadata,
            crate::oauth::AuthorizationRedirect,
            crate::oauth::ConnectionEstablished,
            crate::oauth::ConnectionStatus,
            crate::models::credential::CredentialState,
            crate::handlers::metrics::MetricsRequest,
            crate::handlers::metrics::AccountRef,
            crate::handlers::metrics::MetricsResponse,
            crate::error::ApiError,
        )
    ),
    tags(
        (name = "root", description = "Service information"),
        (name = "connections", description = "OAuth connect, callback and disconnect"),
        (name = "metrics", description = "Cross-platform campaign metrics"),
    ),
    info(
        title = "Ads Connectors API",
        description = "OAuth connections and normalized campaign metrics for Google, Meta, TikTok and LinkedIn ads",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
