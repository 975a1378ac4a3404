//! The Small Delivery - order lifecycle sync core
//!
//! Keeps a customer, courier or restaurant client's view of its delivery
//! orders in step with the REST backend. The backend is polled, not pushed:
//! each role session owns a [`store::ReconciliationStore`], refreshed by the
//! [`poller`] and written to by that role's gateway in [`roles`]. Status
//! changes observed along the way are turned into local notifications by
//! [`notifier::ChangeNotifier`].

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod models;
pub mod notifier;
pub mod poller;
pub mod preferences;
pub mod roles;
pub mod status;
pub mod storage;
pub mod store;

pub use api::{CourierApi, CustomerApi, HttpBackend, RestaurantApi, TaskList};
pub use config::ClientConfig;
pub use db::LocalDb;
pub use error::{DeliveryError, DeliveryResult};
pub use models::{
    DeliveryTask, IncidentReport, LineItem, NewOrder, Order, Rating, RestaurantOrder,
};
pub use notifier::{ChangeNotifier, LogSink, Notification, NotificationSink, RecordingSink};
pub use roles::{
    CourierFeed, CourierGateway, CourierStore, CustomerFeed, CustomerGateway, CustomerStore,
    RestaurantFeed, RestaurantGateway, RestaurantStore,
};
pub use status::{Bucket, OrderStatus, Role};
pub use store::{ReconciliationStore, RefreshOutcome, RoleFeed, StoreSnapshot};

/// Headless entry point: poll the backend for the configured role until
/// Ctrl-C, logging every notification.
pub fn run() -> anyhow::Result<()> {
    let config = ClientConfig::from_env()?;

    let log_dir = logging::get_log_dir(&config.data_dir);
    let _log_guard = logging::init(&log_dir).map_err(anyhow::Error::msg)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_sha = env!("BUILD_GIT_SHA"),
        built_at = env!("BUILD_TIMESTAMP"),
        "Starting The Small Delivery"
    );
    info!(config = ?config, "Configuration loaded");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve(config))
}

async fn serve(config: ClientConfig) -> anyhow::Result<()> {
    let db = Arc::new(LocalDb::init(&config.data_dir).map_err(anyhow::Error::msg)?);
    let backend = Arc::new(HttpBackend::new(
        &config.api_url,
        config.token_source(),
        config.request_timeout,
    )?);

    let probe = backend.check_connectivity().await;
    if probe.success {
        info!(api_url = %config.api_url, latency_ms = ?probe.latency_ms, "Backend reachable");
    } else {
        warn!(
            api_url = %config.api_url,
            error = probe.error.as_deref().unwrap_or("unknown"),
            "Backend not reachable yet, polling anyway"
        );
    }

    let cancel = CancellationToken::new();
    let handle = spawn_role_loop(&config, db, backend, cancel.clone());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    cancel.cancel();
    if let Err(e) = handle.await {
        error!(error = %e, "Refresh loop ended abnormally");
    }
    info!("Stopped");
    Ok(())
}

fn spawn_role_loop(
    config: &ClientConfig,
    db: Arc<LocalDb>,
    backend: Arc<HttpBackend>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let sink: Arc<dyn NotificationSink> = Arc::new(LogSink);
    let notifier = ChangeNotifier::new(config.role, db, sink);
    let interval = config.poll_interval;

    match config.role {
        Role::Customer => {
            let store = Arc::new(CustomerStore::new(CustomerFeed::new(backend), notifier));
            poller::start_refresh_loop(store, interval, cancel)
        }
        Role::Courier => {
            let store = Arc::new(CourierStore::new(CourierFeed::new(backend), notifier));
            poller::start_refresh_loop(store, interval, cancel)
        }
        Role::Restaurant => {
            let store = Arc::new(RestaurantStore::new(RestaurantFeed::new(backend), notifier));
            poller::start_refresh_loop(store, interval, cancel)
        }
    }
}
