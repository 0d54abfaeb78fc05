use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use pinboard_core::{AuthToken, PinboardClient, PinboardError};
use tracing::{debug, info};

use crate::storage::{StorageError, TokenStorage};
use crate::sync::cache::CacheStore;
use crate::sync::engine::{DEFAULT_PAGE_SIZE, EngineError, SyncEngine};
use crate::sync::reconcile::ReconcileDelta;
use crate::sync::session::{ListingKey, PassOutcome, SyncSession};

const DEFAULT_API_URL: &str = "https://api.pinboard.in/v1/";
const DEFAULT_TIMEOUT_SECS: u64 = 10;
const APP_DIR_NAME: &str = "pinmark";
const CACHE_DB_NAME: &str = "cache.db";
const SHARED_DIR_NAME: &str = "shared";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub token_override: Option<String>,
    pub api_url: String,
    pub db_path: PathBuf,
    pub shared_dir: PathBuf,
    pub page_size: u32,
    pub timeout: Duration,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let home = dirs::home_dir().context("home directory is unavailable")?;
        let data_root = default_data_root();
        Ok(Self::from_lookup(&home, &data_root, |name| {
            std::env::var(name).ok()
        }))
    }

    /// Resolves every setting through `lookup`, falling back to defaults
    /// under `data_root` for values that are unset or unparseable.
    pub fn from_lookup<F>(home: &Path, data_root: &Path, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let token_override = non_empty("PINMARK_TOKEN").map(|value| value.trim().to_string());
        let api_url = non_empty("PINMARK_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let db_path = non_empty("PINMARK_DB")
            .map(|value| expand_with_home(&value, home))
            .unwrap_or_else(|| data_root.join(CACHE_DB_NAME));
        let shared_dir = non_empty("PINMARK_SHARED_DIR")
            .map(|value| expand_with_home(&value, home))
            .unwrap_or_else(|| data_root.join(SHARED_DIR_NAME));
        let page_size = read_u64(&lookup, "PINMARK_PAGE_SIZE", u64::from(DEFAULT_PAGE_SIZE));
        let page_size = u32::try_from(page_size).unwrap_or(DEFAULT_PAGE_SIZE);
        let timeout = Duration::from_secs(read_u64(
            &lookup,
            "PINMARK_TIMEOUT_SECS",
            DEFAULT_TIMEOUT_SECS,
        ));

        Self {
            token_override,
            api_url,
            db_path,
            shared_dir,
            page_size,
            timeout,
        }
    }

    pub fn token_storage(&self) -> Result<TokenStorage, StorageError> {
        TokenStorage::new(&self.shared_dir)
    }

    pub fn client(&self, token: AuthToken) -> Result<PinboardClient, PinboardError> {
        PinboardClient::with_options(&self.api_url, token, self.timeout)
    }
}

pub struct AppRuntime {
    config: AppConfig,
    session: SyncSession,
}

impl AppRuntime {
    pub async fn bootstrap(config: AppConfig) -> anyhow::Result<Self> {
        let token = resolve_token(&config)?;
        Self::connect(config, token).await
    }

    pub async fn connect(config: AppConfig, token: AuthToken) -> anyhow::Result<Self> {
        let client = config
            .client(token)
            .with_context(|| format!("invalid api url {:?}", config.api_url))?;
        let cache = CacheStore::open(&config.db_path)
            .await
            .with_context(|| format!("failed to open cache at {}", config.db_path.display()))?;
        let engine = SyncEngine::new(client, cache).with_page_size(config.page_size);
        debug!(
            db = %config.db_path.display(),
            page_size = engine.page_size(),
            "runtime ready"
        );
        Ok(Self {
            config,
            session: SyncSession::new(Arc::new(engine)),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn session(&self) -> &SyncSession {
        &self.session
    }

    /// Refreshes the listing, then follows up to `pages - 1` further pages.
    pub async fn sync_pages(
        &self,
        key: &ListingKey,
        pages: u32,
    ) -> Result<ReconcileDelta, EngineError> {
        let mut total = ReconcileDelta::default();
        if let PassOutcome::Applied(delta) = self.session.refresh(key).await? {
            total.absorb(delta);
        }
        for _ in 1..pages {
            match self.session.load_more(key).await? {
                PassOutcome::Applied(delta) => total.absorb(delta),
                PassOutcome::Exhausted | PassOutcome::Skipped => break,
            }
        }
        Ok(total)
    }
}

/// Checks the token against the remote and persists it.
pub async fn login(config: &AppConfig, raw_token: &str) -> anyhow::Result<AuthToken> {
    let token = AuthToken::parse(raw_token).context("token must look like username:SECRET")?;
    verify_token(config, &token).await?;
    config
        .token_storage()
        .context("failed to initialize token storage")?
        .save_token(token.as_str())
        .context("failed to save token")?;
    info!(user = token.username(), "token saved");
    Ok(token)
}

pub async fn verify_token(config: &AppConfig, token: &AuthToken) -> anyhow::Result<()> {
    let client = config.client(token.clone())?;
    match client.recent_posts(1).await {
        Ok(_) => Ok(()),
        Err(PinboardError::Auth) => anyhow::bail!("the remote service rejected this token"),
        Err(err) => Err(err).context("failed to verify token"),
    }
}

/// Removes the saved token and every cached record.
pub async fn logout(config: &AppConfig) -> anyhow::Result<()> {
    config
        .token_storage()
        .context("failed to initialize token storage")?
        .delete_token()
        .context("failed to remove saved token")?;
    purge_local_data(config).await
}

pub async fn purge_local_data(config: &AppConfig) -> anyhow::Result<()> {
    if !config.db_path.exists() {
        return Ok(());
    }
    let cache = CacheStore::open(&config.db_path)
        .await
        .with_context(|| format!("failed to open cache at {}", config.db_path.display()))?;
    cache.clear().await.context("failed to clear cache")?;
    info!(db = %config.db_path.display(), "local data removed");
    Ok(())
}

fn resolve_token(config: &AppConfig) -> anyhow::Result<AuthToken> {
    if let Some(raw) = &config.token_override {
        return AuthToken::parse(raw).context("PINMARK_TOKEN is malformed");
    }
    let storage = config
        .token_storage()
        .context("failed to initialize token storage")?;
    match storage.get_token() {
        Ok(token) => Ok(token),
        Err(StorageError::TokenNotFound) => {
            anyhow::bail!("no saved token, run `pinmark login <username:TOKEN>` first")
        }
        Err(err) => Err(err).context("failed to read saved token"),
    }
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn default_data_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR_NAME)
}

fn read_u64<F>(lookup: &F, name: &str, default: u64) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "app_tests.rs"]
mod tests;
