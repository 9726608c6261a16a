use std::{net::SocketAddr, sync::Arc};

use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
use config::Config;
mod db;
use db::MySqlStore;
mod model;
use model::ModelRegistry;
mod response;
mod routes;
use routes::AppState;
mod utils;
use utils::ensure_model_exists;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    info!(
        host = %config.db_host,
        port = config.db_port,
        user = %config.db_user,
        database = %config.db_name,
        "database configured"
    );

    ensure_model_exists(
        &config.nutrient_model_path,
        config.nutrient_model_url.as_deref(),
        "NUTRIENT_MODEL_URL",
    )
    .await?;
    ensure_model_exists(
        &config.plant_model_path,
        config.plant_model_url.as_deref(),
        "PLANT_MODEL_URL",
    )
    .await?;

    let models = ModelRegistry::load(&config)?;
    let store = MySqlStore::connect_lazy(&config);

    let state = AppState {
        models,
        store: Arc::new(store),
        allowed_extensions: config.allowed_extensions.iter().cloned().collect(),
    };
    let app = routes::router(state, config.body_limit_bytes());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Listening on http://{}", addr);
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
