use crate::rest::RestStore;
use anyhow::Context;
use dash_types::TabularStore;
use once_cell::sync::OnceCell;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub url: String,
    pub key: String,
    pub schema: Option<String>,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub requests_per_minute: Option<u64>,
}

impl StoreConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        let url: String = envmnt::get_parse("STORE_URL").context("STORE_URL not set")?;
        let key: String = envmnt::get_parse("STORE_KEY").context("STORE_KEY not set")?;
        if url.trim().is_empty() || key.trim().is_empty() {
            return Err(anyhow::anyhow!("STORE_URL and STORE_KEY must not be empty"));
        }
        Ok(Self {
            url,
            key,
            schema: envmnt::get_parse("STORE_SCHEMA")
                .ok()
                .filter(|s: &String| !s.is_empty()),
            timeout: Duration::from_secs(envmnt::get_parse("STORE_TIMEOUT_SECS").unwrap_or(60)),
            connect_timeout: Duration::from_secs(10),
            requests_per_minute: envmnt::get_parse("STORE_RPM")
                .ok()
                .filter(|rpm: &u64| *rpm > 0),
        })
    }
}

/// Hands out one store handle per provider, built on first use.
pub struct ConnectionProvider {
    config: StoreConfig,
    store: OnceCell<Arc<RestStore>>,
}

impl ConnectionProvider {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            store: OnceCell::new(),
        }
    }

    /// Must be called inside a Tokio runtime when rate limiting is configured.
    pub fn connect(&self) -> Result<Arc<dyn TabularStore>, anyhow::Error> {
        let store = self
            .store
            .get_or_try_init(|| RestStore::new(&self.config).map(Arc::new))
            .with_context(|| format!("Unable to build client for {}", self.config.url))?;
        Ok(store.clone())
    }
}
