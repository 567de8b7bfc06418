mod departments;
mod employees;
mod events;
mod problem;
mod products;
mod router;
mod telemetry;
#[cfg(test)]
mod testing;

use std::net::SocketAddr;

use tracing::info;

use orgsvc_storage::Database;
use orgsvc_util::{load_env_file, AppConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;

    let storage = Database::connect(&config.database_url).await?;
    storage.run_migrations().await?;

    let events = events::EventHub::new();
    let state = router::AppState::new(&config, metrics, events, storage)?;

    let addr: SocketAddr = config.bind_addr;
    info!(
        stage = "app",
        %addr,
        env = %config.environment.as_str(),
        service = config.service.as_str(),
        department_service = %config.department_service_url,
        employee_service = %config.employee_service_url,
        "starting HTTP server"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router::app_router(state))
        .await
        .map_err(|err| err.into())
}
