//! Shared fixtures for integration tests: a migrated in-memory database and
//! an application config pointing every provider at one mock server.

#![allow(dead_code)]

use ads_connectors::config::AppConfig;
use ads_connectors::db;
use ads_connectors::models::provider::ProviderId;
use anyhow::Result;
use sea_orm::DatabaseConnection;

pub const CRYPTO_KEY: [u8; 32] = [7u8; 32];

/// Sets up an in-memory SQLite database with all migrations applied.
///
/// The pool is capped at one connection so every query sees the same
/// in-memory database.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let config = AppConfig {
        database_url: "sqlite::memory:".to_string(),
        db_max_connections: 1,
        ..AppConfig::default()
    };
    let conn = db::init_pool(&config).await?;
    db::migrate(&conn).await?;
    Ok(conn)
}

/// Configuration with client credentials for every provider and all token
/// and API endpoints redirected to `base`.
pub fn config_against(base: &str) -> AppConfig {
    let mut config = AppConfig {
        crypto_key: Some(CRYPTO_KEY.to_vec()),
        google_developer_token: Some("dev-token".to_string()),
        ..AppConfig::default()
    };
    for provider in ProviderId::ALL {
        let oauth = match provider {
            ProviderId::Google => &mut config.google,
            ProviderId::Meta => &mut config.meta,
            ProviderId::Tiktok => &mut config.tiktok,
            ProviderId::Linkedin => &mut config.linkedin,
        };
        oauth.client_id = Some(format!("{provider}-client"));
        oauth.client_secret = Some(format!("{provider}-secret"));
        oauth.token_base = base.to_string();
        oauth.api_base = base.to_string();
    }
    config.http.max_retries = 0;
    config
}
