// src/main.rs
use actix_web::{App, HttpServer, middleware, web};
use anyhow::Context;
use log::{info, warn};
use std::sync::Arc;

mod config;
mod errors;
mod handlers;
mod models;
mod services;

use crate::config::Config;
use crate::services::{AnalysisService, GeminiClient, RequestGate};

#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    analysis: Arc<AnalysisService>,
    gate: Arc<RequestGate>,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    info!("Starting Vigil report service...");

    let config = Config::from_env().context("invalid configuration")?;
    if config.gemini.api_keys.is_empty() {
        warn!("No Gemini API key configured; analyze requests will fail");
    }
    info!(
        "Gemini model {} with {} key(s), {} retries, {}ms timeout, fallback {}",
        config.gemini.model,
        config.gemini.api_keys.len(),
        config.gemini.max_retries,
        config.gemini.timeout.as_millis(),
        if config.fallback_enabled { "enabled" } else { "disabled" }
    );

    let client = GeminiClient::with_http(config.gemini.clone());
    let app_state = AppState {
        analysis: Arc::new(AnalysisService::new(client, config.fallback_enabled)),
        gate: Arc::new(RequestGate::per_minute(config.rate_limit_per_minute)),
        config: Arc::new(config),
    };

    let bind = (app_state.config.host.clone(), app_state.config.port);
    info!("Starting HTTP server on {}:{}", bind.0, bind.1);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .app_data(handlers::json_config(
                app_state.config.max_payload_bytes,
                app_state.config.development,
            ))
            .wrap(middleware::Logger::default())
            .configure(handlers::routes)
    })
    .bind(bind)?
    .run()
    .await?;

    Ok(())
}
