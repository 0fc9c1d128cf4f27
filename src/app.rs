//! Wires the sync engine to the configured server.

use std::sync::Arc;
use stillwell_core::{
    check_server, Connectivity, CredentialFlag, HttpRemote, StoreError, SyncEngine, SystemClock,
};

use crate::config::Config;

/// Probes the server when sync is configured.
pub async fn probe(config: &Config) -> bool {
    match (&config.sync.server_url.value, config.sync.is_configured()) {
        (Some(url), true) => {
            let reachable = check_server(url).await;
            if !reachable {
                tracing::info!("Server {} unreachable, working offline", url);
            }
            reachable
        }
        _ => false,
    }
}

/// Opens the engine in the configured data directory.
///
/// Without a server URL and API key the engine runs permanently offline and
/// every write stays in the local queue.
pub fn open_engine(config: &Config, online: bool) -> Result<SyncEngine, StoreError> {
    let server_url = config.sync.server_url.value.clone().unwrap_or_default();
    let api_key = config.sync.api_key.value.clone();
    let credentials = CredentialFlag::new(api_key.is_some());

    SyncEngine::open(
        config.data_dir.value.clone(),
        config.sync.settings.value.clone(),
        Arc::new(HttpRemote::new(server_url, api_key.unwrap_or_default())),
        Arc::new(credentials),
        Arc::new(SystemClock),
        Connectivity::new(online && config.sync.is_configured()),
    )
}

/// Opens the engine and, when the server answers, flushes the queue and
/// pulls the server's state before the command runs.
pub async fn connect(config: &Config) -> Result<SyncEngine, StoreError> {
    let online = probe(config).await;
    let engine = open_engine(config, online)?;
    if engine.connectivity().is_online() {
        let summary = engine.sync_now().await;
        tracing::debug!(
            "Synced on load: {} sent, {} still queued",
            summary.drain.succeeded,
            summary.drain.remaining
        );
    }
    Ok(engine)
}
