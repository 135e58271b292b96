// src/main.rs
mod api;
mod auth;
mod cache;
mod config;
mod db;
mod error;
mod jobs;
mod llm;
mod mailer;
mod market;
mod memory;
mod models;
mod news;
mod stock;
mod watchlist;
mod workflow;

use crate::api::AppState;
use crate::auth::AuthService;
use crate::config::{Config, StoreKind};
use crate::db::Store;
use crate::error::handle_rejection;
use crate::llm::GeminiClient;
use crate::mailer::{LogMailer, Mailer, SmtpMailer};
use crate::market::FinnhubClient;
use crate::memory::MemoryStore;
use crate::workflow::{worker, EventBus, Workflow};
use env_logger::{Builder, Env};
use log::{error, info, warn};
use reqwest::Client;
use std::sync::Arc;
use tokio::task;
use warp::Filter;

#[tokio::main]
async fn main() {
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return;
        }
    };

    let store: Arc<dyn Store> = match config.store {
        StoreKind::Scylla => match db::init(&config.scylla_node).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                error!("Failed to initialize database: {}", e);
                return;
            }
        },
        StoreKind::Memory => {
            warn!("Using the in-memory store; data is lost on restart.");
            Arc::new(MemoryStore::new())
        }
    };
    info!("Store ready...");

    let client = Client::new();
    let market = Arc::new(FinnhubClient::new(
        client.clone(),
        &config.finnhub_base_url,
        config.finnhub_api_key.clone(),
    ));
    if config.finnhub_api_key.is_none() {
        warn!("FINNHUB_API_KEY is not set; search and news are unavailable.");
    }
    let llm = Arc::new(GeminiClient::new(
        client,
        config.gemini_api_key.clone(),
        &config.gemini_model,
    ));
    let mailer: Arc<dyn Mailer> = match &config.smtp {
        Some(smtp) => match SmtpMailer::new(smtp) {
            Ok(mailer) => Arc::new(mailer),
            Err(e) => {
                error!("Failed to configure SMTP: {}", e);
                return;
            }
        },
        None => {
            warn!("SMTP is not configured; emails will only be logged.");
            Arc::new(LogMailer)
        }
    };

    let (events, rx) = EventBus::channel(100);
    let workflow = Arc::new(Workflow::new(
        store.clone(),
        market.clone(),
        llm,
        mailer,
    ));
    task::spawn(async move {
        worker(workflow, rx).await;
    });

    // Kept for the life of the server.
    let _scheduler = match jobs::start(&config.news_cron, events.clone()).await {
        Ok(scheduler) => scheduler,
        Err(e) => {
            error!("Failed to start the daily news schedule: {}", e);
            return;
        }
    };

    let auth = AuthService::new(
        store.clone(),
        Arc::new(config.jwt_secret.clone()),
        chrono::Duration::hours(config.session_ttl_hours),
        events.clone(),
    );
    let state = AppState {
        store,
        market,
        auth,
        events,
    };

    let api = api::routes(state)
        .recover(handle_rejection)
        .with(warp::log("stock_watchlist"));

    info!("Server running on http://{}", config.bind_addr);
    warp::serve(api).run(config.bind_addr).await;
}
