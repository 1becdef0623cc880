use anyhow::Result;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tracing::info;

mod error;
mod routes;
mod state;

use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    info!("Starting trading bot API server...");

    let state = AppState::new().await?;
    let bind = state.config.api_bind.clone();

    let api = Router::new()
        .route("/bots", post(routes::create_bot).get(routes::list_bots))
        .route("/bots/:bot_id", get(routes::get_bot))
        .route("/bots/:bot_id/start", post(routes::start_bot))
        .route("/bots/:bot_id/stop", post(routes::stop_bot))
        .route("/bots/:bot_id/knobs", post(routes::update_bot_knobs))
        .route("/jobs", get(routes::list_jobs))
        .route("/jobs/:job_id", get(routes::get_job))
        .route("/trades", get(routes::list_trades))
        .route("/portfolio", get(routes::latest_portfolio))
        .route("/portfolio/:bot_id", get(routes::bot_portfolio))
        .route("/market/tickers", get(routes::market_tickers))
        .route("/market/ohlcv", get(routes::market_ohlcv));

    let app = Router::new()
        .route("/health", get(routes::health))
        .route("/sse", get(routes::sse))
        .nest("/api", api)
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!("API server listening on http://{}", bind);
    axum::serve(listener, app).await?;

    Ok(())
}
