use std::{sync::Arc, time::Duration};

use crate::{
    assistant::{Assistant, CompletionClient, HttpCompletionClient},
    backend::BookingBackend,
    booking_service::BookingService,
    configuration::Configuration,
    configuration_handler::ConfigurationHandler,
    database_interface::DatabaseInterface,
    http::create_app,
    local_store::LocalStore,
};
use axum::Router;
use tokio::{task::spawn_blocking, time::sleep};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod assistant;
mod backend;
mod booking_service;
mod configuration;
mod configuration_handler;
mod database_interface;
mod error;
mod http;
mod local_store;
mod reservation;
mod schema;
#[cfg(test)]
mod testutils;
mod timezone;
mod types;

#[derive(Clone)]
pub struct AppState<B: BookingBackend> {
    pub bookings: BookingService<B>,
    pub assistant: Arc<Assistant<B>>,
    pub admin_password: Option<String>,
}

fn build_state<B: BookingBackend>(backend: B, configuration: &impl Configuration) -> AppState<B> {
    let llm = configuration.llm_base_url().map(|base_url| {
        info!(%base_url, model = %configuration.llm_model(), "Using language model");
        Arc::new(HttpCompletionClient::new(
            &base_url,
            configuration.llm_model(),
            configuration.llm_api_key(),
        )) as Arc<dyn CompletionClient>
    });
    if configuration.admin_password().is_none() {
        warn!("No admin password configured, provider routes are unprotected");
    }

    AppState {
        bookings: BookingService::new(backend.clone(), configuration.reservation_strategy()),
        assistant: Arc::new(Assistant::new(
            backend,
            llm,
            configuration.llm_timeout(),
            configuration.offer_suppression_window(),
        )),
        admin_password: configuration.admin_password(),
    }
}

/// Builds the state on the blocking pool. Picking the reservation strategy may query the store.
async fn start<B: BookingBackend>(
    backend: B,
    configuration: &ConfigurationHandler,
) -> std::io::Result<AppState<B>> {
    let configuration = configuration.clone();
    spawn_blocking(move || build_state(backend, &configuration))
        .await
        .map_err(std::io::Error::other)
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("###################");
    println!("# Therapy Booking #");
    println!("###################");

    let configuration = ConfigurationHandler::parse_arguments();

    let address = format!("0.0.0.0:{}", configuration.port());
    println!("Accessible at:\n{address}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    let app: Router = if let Some(database_url) = configuration.database_url() {
        let pool_size = configuration.database_pool_size();
        let backend = loop {
            let url = database_url.clone();
            match spawn_blocking(move || DatabaseInterface::new(&url, pool_size)).await {
                Ok(Ok(backend)) => {
                    info!("Successfully connected to database");
                    break backend;
                }
                Ok(Err(err)) => {
                    error!(?err, "Failed to establish database connection. Retry in 1 sec. You may want to restart without a database (bookings kept in memory only).");
                }
                Err(err) => error!(?err, "Database connection task failed. Retry in 1 sec."),
            }
            sleep(Duration::from_secs(1)).await;
        };
        create_app(start(backend, &configuration).await?)
    } else {
        warn!("No database configured, bookings are kept in memory only");
        create_app(start(LocalStore::default(), &configuration).await?)
    };

    axum::serve(listener, app).await
}
