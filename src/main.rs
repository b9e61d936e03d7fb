// src/main.rs
use actix_web::{App, HttpServer, middleware::Logger, web};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod auth;
mod billing;
mod config;
mod db;
mod features;
mod gate;
mod meetings;
mod models;
mod payments;
mod paywall;
mod store;
mod usage;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    tracing::info!("Starting club paywall service");

    dotenv::dotenv().ok();
    let config = config::Config::from_env().expect("Failed to load config from environment");

    let pool = PgPool::connect(&config.database_url)
        .await
        .expect("Failed to connect to Postgres");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run database migrations");

    let accountant = usage::UsageAccountant::new(
        Arc::new(db::PgUsageStore::new(pool.clone())),
        Arc::new(usage::SystemClock),
    );
    let plans = billing::plan_cache(config.plan_cache_ttl_secs);
    let paypal = payments::PayPalClient::from_config(&config);
    let http = reqwest::Client::new();

    if config.google_credentials().is_none() {
        tracing::warn!("Google credentials missing, /meetings is disabled");
    }

    billing::spawn_expiry_sweep(pool.clone(), Duration::from_secs(config.expiry_sweep_secs));

    let bind_address = config.bind_address.clone();
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(pool.clone()))
            .app_data(web::Data::new(accountant.clone()))
            .app_data(web::Data::new(plans.clone()))
            .app_data(web::Data::new(paypal.clone()))
            .app_data(web::Data::new(http.clone()))
            .app_data(web::Data::new(config.clone()))
            .wrap(Logger::default())
            .configure(auth::init_routes)
            .configure(paywall::init_routes)
            .configure(billing::init_routes)
            .configure(meetings::init_routes)
    })
    .bind(bind_address)?
    .run()
    .await
}
