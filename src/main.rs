mod app;
mod kv;
mod store;
mod types;

use std::{env, sync::Arc};

use tracing_subscriber::EnvFilter;

use crate::app::AppState;
use crate::kv::{KvStore, MemoryKv, RedisKv};
use crate::store::ConversationStore;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let port = env::var("PORT")
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(4000);

    let admin_token = env::var("SUPPORT_ADMIN_TOKEN")
        .ok()
        .filter(|v| !v.trim().is_empty());
    if admin_token.is_none() {
        tracing::warn!("SUPPORT_ADMIN_TOKEN is not set; admin endpoints will reject every request");
    }

    let kv: Arc<dyn KvStore> = match env::var("REDIS_URL").ok().filter(|v| !v.trim().is_empty()) {
        Some(url) => {
            let redis = RedisKv::connect(&url)
                .await
                .expect("failed to connect to redis");
            tracing::info!(url = %url, "connected to redis");
            Arc::new(redis)
        }
        None => {
            tracing::info!("REDIS_URL not set; using in-memory store");
            Arc::new(MemoryKv::default())
        }
    };

    let state = Arc::new(AppState {
        store: ConversationStore::new(kv),
        admin_token,
    });

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind TCP listener");

    tracing::info!("support chat server running at http://localhost:{port}");
    axum::serve(listener, app::router(state))
        .await
        .expect("server runtime failure");
}
