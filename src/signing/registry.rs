//! The signer registry.
//!
//! Process-wide mapping from public-key identifier to signer, plus the
//! per-consensus-key proxy signer sets. Every mutation is serialised on one
//! worker task fed by a channel, giving the maps a total order of
//! modifications; readers clone an immutable snapshot and never block the
//! worker. The async mutators resolve only after the mutation is visible.

use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use super::loader::{load_keystore_signers, MappedResults};
use super::proxy::CommitBoostParameters;
use super::signer::ArtifactSigner;
use crate::domain::{normalise_identifier, KeyType};
use crate::error::{Result, SignerError};

/// Supplies the full signer set on load/reload: metadata directories,
/// bulk loaders, whatever the deployment configures.
#[async_trait::async_trait]
pub trait SignerSupplier: Send + Sync {
    async fn supply(&self) -> MappedResults<ArtifactSigner>;
}

/// Invoked after each load with the loaded and stale identifier sets.
pub type PostLoadCallback = Arc<dyn Fn(&[String], &[String]) + Send + Sync>;

/// Outcome of a load/reload pass, kept for the healthcheck.
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub loaded: usize,
    pub stale: Vec<String>,
    pub metadata_errors: u32,
    pub proxy_errors: u32,
}

/// Immutable view of the registry maps.
#[derive(Default)]
pub struct RegistrySnapshot {
    signers: HashMap<String, Arc<ArtifactSigner>>,
    proxies: HashMap<String, Vec<Arc<ArtifactSigner>>>,
}

impl RegistrySnapshot {
    pub fn get(&self, identifier: &str) -> Option<Arc<ArtifactSigner>> {
        self.signers.get(identifier).cloned()
    }

    /// Look a proxy signer up by its own identifier.
    pub fn get_proxy(&self, identifier: &str) -> Option<Arc<ArtifactSigner>> {
        self.proxies
            .values()
            .flatten()
            .find(|signer| signer.identifier() == identifier)
            .cloned()
    }

    pub fn available(&self) -> BTreeSet<String> {
        self.signers.keys().cloned().collect()
    }

    /// Proxy identifiers of a consensus key, grouped by key type.
    pub fn proxy_identifiers(&self, consensus: &str) -> BTreeMap<KeyType, Vec<String>> {
        let mut grouped: BTreeMap<KeyType, Vec<String>> = BTreeMap::new();
        if let Some(proxies) = self.proxies.get(consensus) {
            for signer in proxies {
                grouped
                    .entry(signer.key_type())
                    .or_default()
                    .push(signer.identifier().to_string());
            }
        }
        grouped
    }

    /// Look an execution-layer signer up by its Ethereum address form.
    pub fn find_by_eth_address(&self, address: &str) -> Option<Arc<ArtifactSigner>> {
        self.signers
            .values()
            .find(|signer| {
                signer
                    .eth_address()
                    .map(|bytes| crate::crypto::ecdsa::eth_address_hex(&bytes) == address)
                    .unwrap_or(false)
            })
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.signers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signers.is_empty()
    }
}

enum Mutation {
    Load {
        reload: bool,
        ack: oneshot::Sender<LoadReport>,
    },
    Add {
        signer: Arc<ArtifactSigner>,
        ack: oneshot::Sender<()>,
    },
    Remove {
        identifier: String,
        ack: oneshot::Sender<()>,
    },
    AddProxy {
        signer: Arc<ArtifactSigner>,
        consensus: String,
        ack: oneshot::Sender<()>,
    },
}

/// The registry handle shared by HTTP handlers.
pub struct SignerRegistry {
    mutations: mpsc::UnboundedSender<Mutation>,
    snapshot: Arc<RwLock<Arc<RegistrySnapshot>>>,
    last_report: Arc<RwLock<Option<LoadReport>>>,
}

impl SignerRegistry {
    pub fn new(
        supplier: Arc<dyn SignerSupplier>,
        commit_boost: Option<CommitBoostParameters>,
        keep_stale_on_reload: bool,
        post_load: Option<PostLoadCallback>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let snapshot = Arc::new(RwLock::new(Arc::new(RegistrySnapshot::default())));
        let last_report = Arc::new(RwLock::new(None));

        let worker = Worker {
            signers: HashMap::new(),
            proxies: HashMap::new(),
            supplier,
            commit_boost,
            keep_stale_on_reload,
            post_load,
            snapshot: snapshot.clone(),
            last_report: last_report.clone(),
        };
        tokio::spawn(worker.run(rx));

        Arc::new(Self {
            mutations: tx,
            snapshot,
            last_report,
        })
    }

    /// Current snapshot. Cheap to clone; safe to hold across awaits.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.snapshot.read().clone()
    }

    pub fn get(&self, identifier: &str) -> Option<Arc<ArtifactSigner>> {
        self.snapshot().get(&normalise_identifier(identifier))
    }

    pub fn get_proxy(&self, identifier: &str) -> Option<Arc<ArtifactSigner>> {
        self.snapshot().get_proxy(&normalise_identifier(identifier))
    }

    pub fn find_by_eth_address(&self, address: &str) -> Option<Arc<ArtifactSigner>> {
        self.snapshot()
            .find_by_eth_address(&normalise_identifier(address))
    }

    pub fn available(&self) -> BTreeSet<String> {
        self.snapshot().available()
    }

    pub fn proxy_identifiers(&self, consensus: &str) -> BTreeMap<KeyType, Vec<String>> {
        self.snapshot()
            .proxy_identifiers(&normalise_identifier(consensus))
    }

    pub fn last_load_report(&self) -> Option<LoadReport> {
        self.last_report.read().clone()
    }

    /// Initial load.
    pub async fn load(&self) -> Result<LoadReport> {
        self.submit_load(false).await
    }

    /// Replace (or merge, when configured to keep stale keys) the signer set.
    pub async fn reload(&self) -> Result<LoadReport> {
        self.submit_load(true).await
    }

    pub async fn add(&self, signer: ArtifactSigner) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.mutations
            .send(Mutation::Add {
                signer: Arc::new(signer),
                ack,
            })
            .map_err(|_| worker_stopped())?;
        done.await.map_err(|_| worker_stopped())
    }

    pub async fn remove(&self, identifier: &str) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.mutations
            .send(Mutation::Remove {
                identifier: normalise_identifier(identifier),
                ack,
            })
            .map_err(|_| worker_stopped())?;
        done.await.map_err(|_| worker_stopped())
    }

    pub async fn add_proxy(&self, signer: ArtifactSigner, consensus: &str) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.mutations
            .send(Mutation::AddProxy {
                signer: Arc::new(signer),
                consensus: normalise_identifier(consensus),
                ack,
            })
            .map_err(|_| worker_stopped())?;
        done.await.map_err(|_| worker_stopped())
    }

    async fn submit_load(&self, reload: bool) -> Result<LoadReport> {
        let (ack, done) = oneshot::channel();
        self.mutations
            .send(Mutation::Load { reload, ack })
            .map_err(|_| worker_stopped())?;
        done.await.map_err(|_| worker_stopped())
    }
}

fn worker_stopped() -> SignerError {
    SignerError::Internal("registry worker stopped".to_string())
}

struct Worker {
    signers: HashMap<String, Arc<ArtifactSigner>>,
    proxies: HashMap<String, Vec<Arc<ArtifactSigner>>>,
    supplier: Arc<dyn SignerSupplier>,
    commit_boost: Option<CommitBoostParameters>,
    keep_stale_on_reload: bool,
    post_load: Option<PostLoadCallback>,
    snapshot: Arc<RwLock<Arc<RegistrySnapshot>>>,
    last_report: Arc<RwLock<Option<LoadReport>>>,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Mutation>) {
        while let Some(mutation) = rx.recv().await {
            match mutation {
                Mutation::Load { reload, ack } => {
                    let report = self.load(reload).await;
                    self.publish();
                    *self.last_report.write() = Some(report.clone());
                    let _ = ack.send(report);
                }
                Mutation::Add { signer, ack } => {
                    info!(identifier = signer.identifier(), "loaded new signer");
                    self.signers.insert(signer.identifier().to_string(), signer);
                    self.publish();
                    let _ = ack.send(());
                }
                Mutation::Remove { identifier, ack } => {
                    info!(identifier = %identifier, "removed signer");
                    self.signers.remove(&identifier);
                    self.proxies.remove(&identifier);
                    self.publish();
                    let _ = ack.send(());
                }
                Mutation::AddProxy {
                    signer,
                    consensus,
                    ack,
                } => {
                    info!(
                        proxy = signer.identifier(),
                        consensus = %consensus,
                        "loaded new proxy signer"
                    );
                    self.proxies.entry(consensus).or_default().push(signer);
                    self.publish();
                    let _ = ack.send(());
                }
            }
        }
    }

    async fn load(&mut self, reload: bool) -> LoadReport {
        let old_keys: BTreeSet<String> = self.signers.keys().cloned().collect();
        let supplied = self.supplier.supply().await;
        let metadata_errors = supplied.error_count;

        let mut new_signers: HashMap<String, Arc<ArtifactSigner>> = HashMap::new();
        for signer in supplied.values {
            let identifier = signer.identifier().to_string();
            if new_signers.contains_key(&identifier) {
                warn!(identifier = %identifier, "duplicate key while loading, keeping first");
                continue;
            }
            new_signers.insert(identifier, Arc::new(signer));
        }

        if reload && self.keep_stale_on_reload {
            for (identifier, signer) in &self.signers {
                new_signers
                    .entry(identifier.clone())
                    .or_insert_with(|| signer.clone());
            }
        }

        let new_keys: BTreeSet<String> = new_signers.keys().cloned().collect();
        let stale: Vec<String> = old_keys.difference(&new_keys).cloned().collect();
        let loaded: Vec<String> = new_keys.iter().cloned().collect();

        self.signers = new_signers;
        // proxy sets die with their consensus identifier
        self.proxies.retain(|consensus, _| self.signers.contains_key(consensus));

        let proxy_errors = self.load_proxy_signers();

        info!(total = self.signers.len(), "signers currently loaded in memory");

        if let Some(callback) = &self.post_load {
            callback(&loaded, &stale);
        }

        LoadReport {
            loaded: self.signers.len(),
            stale,
            metadata_errors,
            proxy_errors,
        }
    }

    fn load_proxy_signers(&mut self) -> u32 {
        let Some(parameters) = &self.commit_boost else {
            return 0;
        };
        let mut errors = 0;
        for identifier in self.signers.keys().cloned().collect::<Vec<_>>() {
            for key_type in [KeyType::Bls, KeyType::Secp256k1] {
                let dir = parameters
                    .proxy_keystores_path
                    .join(&identifier)
                    .join(key_type.dir_name());
                if !dir.is_dir() {
                    continue;
                }
                let results = load_keystore_signers(
                    &dir,
                    &parameters.proxy_keystores_password_file,
                    key_type,
                );
                errors += results.error_count;
                let entry = self.proxies.entry(identifier.clone()).or_default();
                for signer in results.values {
                    if entry
                        .iter()
                        .any(|existing| existing.identifier() == signer.identifier())
                    {
                        continue;
                    }
                    entry.push(Arc::new(signer));
                }
            }
        }
        errors
    }

    fn publish(&self) {
        let view = RegistrySnapshot {
            signers: self.signers.clone(),
            proxies: self.proxies.clone(),
        };
        *self.snapshot.write() = Arc::new(view);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::bls::BlsKeyPair;
    use crate::crypto::ecdsa::SecpKeyPair;
    use parking_lot::Mutex;

    struct FixedSupplier {
        secrets: Vec<[u8; 32]>,
    }

    #[async_trait::async_trait]
    impl SignerSupplier for FixedSupplier {
        async fn supply(&self) -> MappedResults<ArtifactSigner> {
            let mut results = MappedResults::empty();
            for secret in &self.secrets {
                results.add(ArtifactSigner::bls_local(
                    BlsKeyPair::from_secret_bytes(secret).unwrap(),
                ));
            }
            results
        }
    }

    fn bls_secret() -> [u8; 32] {
        BlsKeyPair::generate().secret_key_bytes()
    }

    #[tokio::test]
    async fn load_publishes_signers() {
        let secret = bls_secret();
        let registry = SignerRegistry::new(
            Arc::new(FixedSupplier {
                secrets: vec![secret],
            }),
            None,
            false,
            None,
        );
        let report = registry.load().await.unwrap();
        assert_eq!(report.loaded, 1);

        let identifier = format!(
            "0x{}",
            hex::encode(BlsKeyPair::from_secret_bytes(&secret).unwrap().public_key_bytes())
        );
        assert!(registry.get(&identifier).is_some());
        // case variants resolve to the same signer
        assert!(registry.get(&identifier.to_uppercase()).is_some());
    }

    #[tokio::test]
    async fn remove_completes_after_visibility() {
        let secret = bls_secret();
        let registry = SignerRegistry::new(
            Arc::new(FixedSupplier {
                secrets: vec![secret],
            }),
            None,
            false,
            None,
        );
        registry.load().await.unwrap();
        let identifier = registry.available().iter().next().unwrap().clone();

        registry.remove(&identifier).await.unwrap();
        assert!(registry.get(&identifier).is_none());
    }

    #[tokio::test]
    async fn reload_reports_stale_keys() {
        let first = bls_secret();
        let supplier = Arc::new(SwappableSupplier {
            secrets: Mutex::new(vec![first]),
        });
        let registry = SignerRegistry::new(supplier.clone(), None, false, None);
        registry.load().await.unwrap();
        let old_identifier = registry.available().iter().next().unwrap().clone();

        *supplier.secrets.lock() = vec![bls_secret()];
        let report = registry.reload().await.unwrap();
        assert_eq!(report.stale, vec![old_identifier.clone()]);
        assert!(registry.get(&old_identifier).is_none());
    }

    #[tokio::test]
    async fn reload_can_keep_stale_keys() {
        let first = bls_secret();
        let supplier = Arc::new(SwappableSupplier {
            secrets: Mutex::new(vec![first]),
        });
        let registry = SignerRegistry::new(supplier.clone(), None, true, None);
        registry.load().await.unwrap();
        let old_identifier = registry.available().iter().next().unwrap().clone();

        *supplier.secrets.lock() = vec![bls_secret()];
        let report = registry.reload().await.unwrap();
        assert!(report.stale.is_empty());
        assert_eq!(report.loaded, 2);
        assert!(registry.get(&old_identifier).is_some());
    }

    #[tokio::test]
    async fn proxies_group_by_key_type_and_die_with_consensus_key() {
        let secret = bls_secret();
        let registry = SignerRegistry::new(
            Arc::new(FixedSupplier {
                secrets: vec![secret],
            }),
            None,
            false,
            None,
        );
        registry.load().await.unwrap();
        let consensus = registry.available().iter().next().unwrap().clone();

        let bls_proxy = ArtifactSigner::bls_local(BlsKeyPair::generate());
        let ecdsa_proxy = ArtifactSigner::k256(SecpKeyPair::generate());
        let bls_proxy_id = bls_proxy.identifier().to_string();
        let ecdsa_proxy_id = ecdsa_proxy.identifier().to_string();

        registry.add_proxy(bls_proxy, &consensus).await.unwrap();
        registry.add_proxy(ecdsa_proxy, &consensus).await.unwrap();

        let grouped = registry.proxy_identifiers(&consensus);
        assert_eq!(grouped[&KeyType::Bls], vec![bls_proxy_id.clone()]);
        assert_eq!(grouped[&KeyType::Secp256k1], vec![ecdsa_proxy_id]);
        assert!(registry.get_proxy(&bls_proxy_id).is_some());

        registry.remove(&consensus).await.unwrap();
        assert!(registry.proxy_identifiers(&consensus).is_empty());
        assert!(registry.get_proxy(&bls_proxy_id).is_none());
    }

    #[tokio::test]
    async fn post_load_callback_sees_loaded_and_stale_sets() {
        let first = bls_secret();
        let supplier = Arc::new(SwappableSupplier {
            secrets: Mutex::new(vec![first]),
        });
        let observed: Arc<Mutex<Vec<(Vec<String>, Vec<String>)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = observed.clone();
        let callback: PostLoadCallback = Arc::new(move |loaded, stale| {
            sink.lock().push((loaded.to_vec(), stale.to_vec()));
        });

        let registry = SignerRegistry::new(supplier.clone(), None, false, Some(callback));
        registry.load().await.unwrap();
        *supplier.secrets.lock() = vec![bls_secret()];
        registry.reload().await.unwrap();

        let calls = observed.lock();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0.len(), 1);
        assert!(calls[0].1.is_empty());
        // the reload reports the replaced key as stale
        assert_eq!(calls[1].1, calls[0].0);
    }

    struct SwappableSupplier {
        secrets: Mutex<Vec<[u8; 32]>>,
    }

    #[async_trait::async_trait]
    impl SignerSupplier for SwappableSupplier {
        async fn supply(&self) -> MappedResults<ArtifactSigner> {
            let mut results = MappedResults::empty();
            for secret in self.secrets.lock().iter() {
                results.add(ArtifactSigner::bls_local(
                    BlsKeyPair::from_secret_bytes(secret).unwrap(),
                ));
            }
            results
        }
    }
}
