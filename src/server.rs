//! Server bootstrap.
//!
//! Wires together configuration, the slashing database, the signer
//! registry, the sign dispatcher, and the Axum router. Initialisation is
//! two-phase: the consensus signer set loads first, then proxy keystores
//! resolve against it by identifier.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::dispatcher::{CommitBoostContext, SignDispatcher};
use crate::domain::{Hash256, KeyType};
use crate::error::{Result, SignerError};
use crate::keymanager::{DeleteKeystoresProcessor, ImportKeystoresProcessor};
use crate::signing::{
    load_metadata_directory, ArtifactSigner, CommitBoostParameters, KeystoreFileManager,
    MappedResults, ProxyKeyGenerator, SignerRegistry, SignerSupplier, UnconfiguredConnectors,
    VaultConnectors,
};
use crate::slashing::{open_database, DbValidatorManager, Pruner, SlashingProtection};

/// Which chain surface the service exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceMode {
    Eth1,
    Eth2,
}

/// Slashing-store pruning settings.
#[derive(Debug, Clone)]
pub struct PruningConfig {
    pub enabled: bool,
    pub epochs_to_keep: u64,
    pub slots_per_epoch: u64,
    pub interval_hours: u64,
}

impl Default for PruningConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            epochs_to_keep: 250,
            slots_per_epoch: 32,
            interval_hours: 24,
        }
    }
}

/// Server configuration.
#[derive(Clone)]
pub struct Config {
    pub mode: ServiceMode,
    pub listen_addr: SocketAddr,
    pub key_store_path: PathBuf,
    pub slashing_db_url: Option<String>,
    pub genesis_validators_root: Option<Hash256>,
    pub genesis_fork_version: [u8; 4],
    pub chain_id: Option<u64>,
    pub key_manager_api_enabled: bool,
    pub commit_boost: Option<CommitBoostParameters>,
    pub pruning: PruningConfig,
    pub reload_keep_stale_keys: bool,
}

impl Config {
    pub fn new(mode: ServiceMode, key_store_path: PathBuf) -> Self {
        Self {
            mode,
            listen_addr: ([0, 0, 0, 0], 9000).into(),
            key_store_path,
            slashing_db_url: None,
            genesis_validators_root: None,
            genesis_fork_version: [0, 0, 0, 0],
            chain_id: None,
            key_manager_api_enabled: false,
            commit_boost: None,
            pruning: PruningConfig::default(),
            reload_keep_stale_keys: false,
        }
    }
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<SignDispatcher>,
    pub registry: Arc<SignerRegistry>,
    pub slashing: Option<Arc<SlashingProtection>>,
    pub delete_processor: Option<Arc<DeleteKeystoresProcessor>>,
    pub import_processor: Option<Arc<ImportKeystoresProcessor>>,
    pub key_manager_enabled: bool,
    pub commit_boost_enabled: bool,
    pub json_rpc_enabled: bool,
}

/// Supplies signers by scanning the key-store directory for metadata files.
struct DirectorySupplier {
    key_store_path: PathBuf,
    connectors: Arc<dyn VaultConnectors>,
    chain_id: Option<u64>,
}

#[async_trait::async_trait]
impl SignerSupplier for DirectorySupplier {
    async fn supply(&self) -> MappedResults<ArtifactSigner> {
        match load_metadata_directory(&self.key_store_path, self.connectors.as_ref(), self.chain_id)
            .await
        {
            Ok(outcome) => outcome.signers,
            Err(e) => {
                error!(error = %e, "failed to scan key store directory");
                MappedResults::errored(1)
            }
        }
    }
}

/// Build the application state from configuration.
pub async fn build_state(
    config: &Config,
    connectors: Arc<dyn VaultConnectors>,
) -> Result<AppState> {
    let files = Arc::new(KeystoreFileManager::new(config.key_store_path.clone()));

    let supplier = Arc::new(DirectorySupplier {
        key_store_path: config.key_store_path.clone(),
        connectors,
        chain_id: config.chain_id,
    });
    let registry = SignerRegistry::new(
        supplier,
        config.commit_boost.clone(),
        config.reload_keep_stale_keys,
        None,
    );
    let report = registry.load().await?;
    info!(
        loaded = report.loaded,
        metadata_errors = report.metadata_errors,
        proxy_errors = report.proxy_errors,
        "initial signer load complete"
    );

    let slashing = match (&config.mode, &config.slashing_db_url) {
        (ServiceMode::Eth2, Some(url)) => {
            let pool = open_database(url).await?;
            let store = Arc::new(SlashingProtection::new(pool));
            let gvr = config.genesis_validators_root.ok_or_else(|| {
                SignerError::Internal(
                    "eth2 mode with slashing protection requires a genesis validators root"
                        .to_string(),
                )
            })?;
            store.register_genesis_validators_root(&gvr).await?;
            let identifiers: Vec<String> = registry
                .snapshot()
                .available()
                .into_iter()
                .filter(|identifier| {
                    registry
                        .get(identifier)
                        .map(|signer| signer.key_type() == KeyType::Bls)
                        .unwrap_or(false)
                })
                .collect();
            store.register_validators(&identifiers).await?;
            Some(store)
        }
        _ => None,
    };

    let commit_boost_context = match (&config.commit_boost, config.genesis_validators_root) {
        (Some(parameters), Some(gvr)) => Some(CommitBoostContext {
            generator: Arc::new(ProxyKeyGenerator::new(parameters.clone())),
            genesis_fork_version: config.genesis_fork_version,
            genesis_validators_root: gvr,
        }),
        (Some(_), None) => {
            warn!("commit boost API requires a genesis validators root; disabling");
            None
        }
        _ => None,
    };
    let commit_boost_enabled = commit_boost_context.is_some();

    let dispatcher = Arc::new(SignDispatcher::new(
        registry.clone(),
        slashing.clone(),
        commit_boost_context,
    ));

    let (delete_processor, import_processor) = match (&slashing, config.key_manager_api_enabled) {
        (Some(store), true) => {
            let validators = Arc::new(DbValidatorManager::new(
                store.pool().clone(),
                files.clone(),
            ));
            (
                Some(Arc::new(DeleteKeystoresProcessor::new(
                    registry.clone(),
                    store.clone(),
                    files.clone(),
                ))),
                Some(Arc::new(ImportKeystoresProcessor::new(
                    registry.clone(),
                    store.clone(),
                    validators,
                ))),
            )
        }
        _ => (None, None),
    };

    Ok(AppState {
        dispatcher,
        registry,
        slashing,
        delete_processor,
        import_processor,
        key_manager_enabled: config.key_manager_api_enabled,
        commit_boost_enabled,
        json_rpc_enabled: config.mode == ServiceMode::Eth1,
    })
}

/// Run the server until SIGINT/SIGTERM.
pub async fn run(config: Config, connectors: Arc<dyn VaultConnectors>) -> Result<()> {
    let state = build_state(&config, connectors).await?;

    if config.pruning.enabled {
        if let Some(store) = &state.slashing {
            spawn_pruning_task(store.clone(), config.pruning.clone());
        }
    }

    let app = crate::api::router(state);
    let listener = TcpListener::bind(config.listen_addr).await?;
    info!(addr = %config.listen_addr, "signer listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| SignerError::Internal(format!("server terminated: {e}")))
}

fn spawn_pruning_task(store: Arc<SlashingProtection>, config: PruningConfig) {
    tokio::spawn(async move {
        let pruner = Pruner::new(
            store.pool().clone(),
            config.epochs_to_keep,
            config.slots_per_epoch,
        );
        let mut interval =
            tokio::time::interval(Duration::from_secs(config.interval_hours.max(1) * 3600));
        loop {
            interval.tick().await;
            if let Err(e) = pruner.prune().await {
                error!(error = %e, "pruning pass failed");
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

/// Default connectors when no cloud backend is configured.
pub fn default_connectors() -> Arc<dyn VaultConnectors> {
    Arc::new(UnconfiguredConnectors)
}
