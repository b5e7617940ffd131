//! # Ads Connectors Library
//!
//! Integration layer between a marketing analytics application and the ad
//! platforms it reads from: OAuth connection flows, encrypted credential
//! storage with background refresh, paginated provider adapters and the
//! multi-account metrics aggregator, exposed over an HTTP API.

pub mod auth;
pub mod config;
pub mod connectors;
pub mod crypto;
pub mod db;
pub mod error;
pub mod handlers;
pub mod http;
pub mod locks;
pub mod models;
pub mod normalization;
pub mod oauth;
pub mod orchestrator;
pub mod repositories;
pub mod server;
pub mod store;
pub mod telemetry;
pub mod token_refresh;
pub use migration;
