use std::sync::Arc;

use tracing_subscriber::EnvFilter;

mod app;
mod auth;
mod error;
mod gateway;
mod store;
mod types;

use store::{AuditLog, ConfigStore, KnowledgeStore};
use types::{AdminCredentials, AppState, ProviderCredentials};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let port = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(3000);

    let data_dir = types::resolve_data_dir();
    if let Err(err) = std::fs::create_dir_all(&data_dir) {
        panic!("failed to create data directory {}: {err}", data_dir.display());
    }

    let provider = ProviderCredentials::from_env();
    if !provider.missing().is_empty() {
        tracing::warn!(
            "provider credentials incomplete, outbound sends will fail: {:?}",
            provider.missing()
        );
    }
    let admin = AdminCredentials::from_env();
    if admin.token.is_none() {
        tracing::warn!("RT_ADMIN_TOKEN unset, machine admin routes are disabled");
    }
    if admin.user.is_none() || admin.pass.is_none() {
        tracing::warn!("ADMIN_USER/ADMIN_PASS unset, admin panel login is disabled");
    }

    let state = Arc::new(AppState::new(
        provider,
        admin,
        ConfigStore::load(data_dir.join("config.json")),
        KnowledgeStore::load(data_dir.join("knowledge.txt")),
        AuditLog::new(data_dir.join("events.jsonl")),
    ));

    let router = app::build_router(state);

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind TCP listener");

    tracing::info!("chatguru relay running at http://localhost:{port}");
    axum::serve(listener, router)
        .await
        .expect("server runtime failure");
}
