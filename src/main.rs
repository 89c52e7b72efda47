use std::sync::Arc;

use agent_marketplace_core::chain_adapter::MockChainAdapter;
use agent_marketplace_core::config::AppConfig;
use agent_marketplace_core::server::configure_app;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_env_filter("agent_marketplace_core=debug,tower_http=debug")
        .init();

    let config = AppConfig::from_env();

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .expect("failed to create database pool");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("failed to run migrations");

    // The production chain adapter (an RPC client against an EVM node) is a
    // collaborator outside the core's scope; this binary runs against the
    // scripted mock so the service is runnable standalone.
    let chain = Arc::new(MockChainAdapter::new());

    let bind_addr = config.bind_addr.clone();
    let app = configure_app(pool, config, chain);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("failed to bind listener");
    info!("agent marketplace core listening on {}", bind_addr);
    axum::serve(listener, app).await.expect("server error");
}
