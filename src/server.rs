//! Process wiring for `rostore serve`.
//!
//! Startup order:
//!
//! 1. Load config.kdl and apply CLI overrides
//! 2. Resolve env overrides into a [`ConfigState`]
//! 3. Seed the side file if it is missing, then load it
//! 4. Start the sync scheduler (when a git store is configured), dropping to
//!    writable mode if the working copy holds local changes

//! 5. Start the side file watcher
//! 6. Serve the management API until Ctrl+C

use axum::Router;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{
    ConfigState, ReadOnlySettings, ServerConfig, load_config, load_side_file, persist_both, resolve_settings,
    start_side_file_watcher,
};
use crate::management::{AuthGuard, AuthSettings, ManagementHandler, router};
use crate::storage::{GitCliRepository, Repository};
use crate::sync::SyncScheduler;
use crate::{Error, Result};

/// Default main configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config.kdl";

/// Options for [`Server::prepare`].
#[derive(Debug, Clone)]
pub struct ServeOptions {
    pub config_path: PathBuf,
    /// Overrides `host` from the config file.
    pub host: Option<String>,
    /// Overrides `port` from the config file.
    pub port: Option<u16>,
    pub local_password: Option<String>,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            host: None,
            port: None,
            local_password: None,
        }
    }
}

/// Bring the live settings in line with the side file.
///
/// A missing side file is first written from the resolved values so both
/// persisted copies agree. Parse failures are logged and leave the process
/// in writable mode.
pub fn initialize_state(config: &ServerConfig) -> Arc<ConfigState> {
    let resolved = resolve_settings(config);
    info!(
        read_only = resolved.read_only.value,
        read_only_source = %resolved.read_only.source,
        sync_interval_minutes = resolved.sync_interval_minutes.value,
        sync_interval_source = %resolved.sync_interval_minutes.source,
        "Resolved read-only storage settings"
    );

    let state = Arc::new(ConfigState::new(
        resolved.read_only.value,
        resolved.sync_interval_minutes.value,
    ));

    let side_file = config.side_file_path();
    if !side_file.exists() {
        if let Err(e) = persist_both(
            resolved.read_only.value,
            resolved.sync_interval_minutes.value,
            &side_file,
        ) {
            warn!(path = %side_file.display(), error = %e, "Failed to create read-only storage file");
        }
    }
    if let Err(e) = load_side_file(state.as_ref(), &side_file) {
        warn!(path = %side_file.display(), error = %e, "Failed to load read-only storage file");
    }

    state
}

/// Refuse a read-only boot that would hard-reset over local work.
///
/// When `state` is read-only and the working copy has pending changes (or
/// they cannot be checked), read-only mode is switched off in memory only.
/// The persisted files keep the operator's setting; enabling read-only again
/// goes through the usual pending-change check. Returns whether read-only
/// mode is still on.
pub fn guard_read_only_startup(state: &ConfigState, scheduler: &SyncScheduler) -> bool {
    if !state.is_read_only_storage() {
        return false;
    }
    match scheduler.has_pending_local_changes() {
        Ok(false) => true,
        Ok(true) => {
            warn!("Working copy has pending local changes, starting in writable mode");
            state.set_read_only_storage(false);
            false
        }
        Err(e) => {
            warn!(error = %e, "Cannot check for pending changes, starting in writable mode");
            state.set_read_only_storage(false);
            false
        }
    }
}

/// A fully wired server that has not started listening yet.
pub struct Server {
    addr: SocketAddr,
    handler: Arc<ManagementHandler>,
    scheduler: Option<SyncScheduler>,
    watcher: JoinHandle<()>,
    cancel: CancellationToken,
}

impl Server {
    /// Load configuration and start the background tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn prepare(options: ServeOptions) -> Result<Self> {
        let file_config = load_config(&options.config_path)?;
        let mut config = file_config.clone();
        if let Some(host) = options.host {
            config.host = host;
        }
        if let Some(port) = options.port {
            config.port = port;
        }

        let ip: IpAddr = config
            .host
            .parse()
            .map_err(|e| Error::InvalidConfig(format!("Invalid host address '{}': {}", config.host, e)))?;
        let addr = SocketAddr::from((ip, config.port));

        let state = initialize_state(&config);

        let scheduler = match GitCliRepository::from_config(&config) {
            Some(repository) => {
                info!(dir = %repository.repository_dir().display(), "Using git store");
                let scheduler = SyncScheduler::new(Arc::new(repository)).with_config(state.clone());
                guard_read_only_startup(&state, &scheduler);
                scheduler.start()?;
                Some(scheduler)
            }
            None => {
                info!("No git store configured, sync scheduler disabled");
                None
            }
        };

        let cancel = CancellationToken::new();
        let watcher = start_side_file_watcher(state.clone(), &config.side_file_path(), cancel.clone())?;

        let auth = AuthGuard::new(AuthSettings::from_env(
            &config.remote_management,
            options.local_password,
        ));
        // CLI overrides stay out of anything written back to config.kdl.
        let handler = Arc::new(ManagementHandler::new(
            state,
            file_config,
            options.config_path,
            scheduler.clone(),
            auth,
        ));

        Ok(Self {
            addr,
            handler,
            scheduler,
            watcher,
            cancel,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn handler(&self) -> &Arc<ManagementHandler> {
        &self.handler
    }

    /// Token that shuts the server down when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn router(&self) -> Router {
        router(self.handler.clone())
    }

    /// Serve until Ctrl+C or the cancel token fires, then stop background tasks.
    pub async fn run(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        info!(addr = %listener.local_addr()?, "Management API listening");

        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(self.cancel.clone()))
            .await;

        self.shutdown().await;
        result.map_err(Error::from)
    }

    async fn shutdown(self) {
        self.cancel.cancel();
        if let Some(scheduler) = &self.scheduler {
            scheduler.stop();
        }
        if let Err(e) = self.watcher.await {
            warn!(error = %e, "Side file watcher task failed");
        }
        info!("Server stopped");
    }
}

async fn shutdown_signal(cancel: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "Failed to listen for Ctrl+C");
                cancel.cancelled().await;
            }
        }
        _ = cancel.cancelled() => {}
    }
    info!("Shutting down");
}

/// Prepare and run a server with `options`.
pub async fn start_server(options: ServeOptions) -> Result<()> {
    Server::prepare(options)?.run().await
}
