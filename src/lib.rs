pub mod application;
pub mod domain;
pub mod infrastructure;

use application::bootstrap::bootstrap_workspace;
use application::logging::init_logging;
use application::sync_engine::{RetryPolicy, SyncEngine};
use domain::time_window::TimeWindowManager;
use infrastructure::config::load_session_from_env;
use infrastructure::connectivity::{ConnectivityMonitor, HttpConnectivityProbe};
use infrastructure::error::InfraError;
use infrastructure::push_client::ReqwestPushClient;
use infrastructure::storage::LocalStore;
use infrastructure::timer_repository::SqliteTimerRepository;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::info;

/// Runs the background sync daemon for the workspace until Ctrl-C.
pub async fn run(workspace_root: &Path) -> Result<(), InfraError> {
    let bootstrap = bootstrap_workspace(workspace_root)?;
    init_logging(&bootstrap.logs_dir)?;
    let session = load_session_from_env()?;
    let app = &bootstrap.config.app;

    let store = Arc::new(LocalStore::open(&bootstrap.database_path)?);
    let database = store.path().display().to_string();
    let repository = Arc::new(SqliteTimerRepository::new(store));
    let manager =
        TimeWindowManager::new(&bootstrap.config.organization).map_err(InfraError::InvalidConfig)?;
    let organization_id = manager.organization_id().map(str::to_string);
    let time_windows = Arc::new(RwLock::new(manager));
    let push_client = Arc::new(ReqwestPushClient::new(
        app.push_endpoint()?,
        session.api_token.clone(),
    )?);
    let monitor = Arc::new(ConnectivityMonitor::new(
        Arc::new(HttpConnectivityProbe::new(app.health_endpoint()?)?),
        false,
    ));

    let engine = Arc::new(
        SyncEngine::new(repository, push_client, time_windows, session.session.clone())
            .with_retry_policy(RetryPolicy::from(&app.retry))
            .with_lookback_weeks(app.sync_lookback_weeks),
    );

    info!(
        workspace = %bootstrap.workspace_root.display(),
        %database,
        employee_id = %session.session.employee_id,
        organization_id = ?organization_id,
        "sync daemon started"
    );

    let watcher = tokio::spawn({
        let monitor = Arc::clone(&monitor);
        let every = Duration::from_secs(app.connectivity_interval_seconds);
        async move { monitor.watch(every).await }
    });

    engine
        .run(
            monitor.subscribe(),
            Duration::from_secs(app.sync_interval_seconds),
            async {
                let _ = tokio::signal::ctrl_c().await;
            },
        )
        .await;

    watcher.abort();
    info!("sync daemon stopped");
    Ok(())
}
