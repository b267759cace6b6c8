use std::sync::Arc;

use anyhow::{Context, Result};
use passmeta_core::config::AppConfig;
use passmeta_crypto::Passphrase;
use passmeta_db::{FileStore, LocalStore};
use passmeta_sync::remote::HttpRemoteClient;
use passmeta_sync::{PassFileManager, RemoteClient, SessionKeys, SyncEngine, SyncOptions};

/// Everything a command needs, wired from configuration.
pub struct Services {
    pub manager: PassFileManager,
    pub keys: Arc<SessionKeys>,
    /// `None` when no server is configured.
    pub engine: Option<SyncEngine>,
}

impl Services {
    pub fn new(
        store: Arc<dyn LocalStore>,
        remote: Option<Arc<dyn RemoteClient>>,
        config: &AppConfig,
    ) -> Self {
        let keys = Arc::new(SessionKeys::new());
        let kdf = config.crypto.kdf_params();
        let manager = PassFileManager::new(Arc::clone(&store), Arc::clone(&keys), kdf);
        let engine = remote.map(|remote| {
            let options = SyncOptions {
                max_concurrent: config.sync.max_concurrent,
                kdf,
            };
            SyncEngine::new(store, remote, Arc::clone(&keys), options)
        });
        Self {
            manager,
            keys,
            engine,
        }
    }
}

pub fn create_store(config: &AppConfig) -> Result<Arc<dyn LocalStore>> {
    let store = FileStore::open(&config.storage.path)
        .with_context(|| format!("opening passfile store at {}", config.storage.path.display()))?;
    Ok(Arc::new(store))
}

pub fn create_remote(config: &AppConfig) -> Result<Option<Arc<dyn RemoteClient>>> {
    if !config.remote.is_configured() {
        tracing::debug!("No remote server configured, sync disabled");
        return Ok(None);
    }
    let client = HttpRemoteClient::new(
        &config.remote.base_url,
        config.remote.api_token.clone(),
        config.remote.request_timeout(),
    )?;
    Ok(Some(Arc::new(client)))
}

pub fn create_services(config: &AppConfig) -> Result<Services> {
    let store = create_store(config)?;
    let remote = create_remote(config)?;
    Ok(Services::new(store, remote, config))
}

pub fn prompt_passphrase(prompt: &str) -> Result<Passphrase> {
    let pass = rpassword::prompt_password(prompt)?;
    if pass.is_empty() {
        anyhow::bail!("Passphrase cannot be empty");
    }
    Ok(Passphrase::new(pass))
}

/// Prompt twice and require both entries to match.
pub fn prompt_new_passphrase() -> Result<Passphrase> {
    let first = prompt_passphrase("New passphrase: ")?;
    let second = prompt_passphrase("Repeat passphrase: ")?;
    if first != second {
        anyhow::bail!("Passphrases do not match");
    }
    Ok(first)
}
