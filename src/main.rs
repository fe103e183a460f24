use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quipoff::api;
use quipoff::config::Config;
use quipoff::llm::{DisabledClient, GatewayClient, ModelClient};
use quipoff::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quipoff=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting quipoff...");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let model: Arc<dyn ModelClient> = match &config.ai_gateway_api_key {
        Some(api_key) => {
            tracing::info!("AI gateway configured at {}", config.ai_gateway_base_url);
            Arc::new(GatewayClient::new(
                api_key.clone(),
                config.ai_gateway_base_url.clone(),
                config.llm_timeout,
            ))
        }
        None => Arc::new(DisabledClient),
    };

    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(AppState::new(config, model));
    let app = api::router(state);

    tracing::info!("Listening on http://{}", bind_addr);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app).await.expect("server error");
}
