use film_recommender::config::{AppConfig, StoreConfig};
use film_recommender::handlers::recommendations::global_handler;
use film_recommender::models::db::Database;
use film_recommender::services::cronjobs::schedule_jobs;
use film_recommender::services::engine::RecommendationEngine;
use film_recommender::services::memory::InMemoryStore;
use film_recommender::services::mssql::SqlServerStore;
use std::sync::Arc;
use warp::Filter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    env_logger::init();

    let config = AppConfig::from_env()?;

    let db = match &config.store {
        StoreConfig::Memory => {
            log::warn!("Using the in-memory store, nothing survives a restart");
            Database::from_store(InMemoryStore::new())
        }
        StoreConfig::SqlServer(settings) => Database::from_store(SqlServerStore::connect(settings).await?),
    };

    let engine = Arc::new(RecommendationEngine::new(config.engine.clone(), db.clone()));

    // Keep the scheduler alive for the lifetime of the server
    let _scheduler = match &config.schedule {
        Some(schedule) => Some(schedule_jobs(engine.clone(), schedule).await?),
        None => {
            log::info!("No recompute schedule configured");
            None
        }
    };

    let routes = global_handler(engine).with(warp::log("film_recommender"));

    log::info!("Listening on {}", config.bind_addr);
    warp::serve(routes).run(config.bind_addr).await;

    db.close().await?;
    Ok(())
}
