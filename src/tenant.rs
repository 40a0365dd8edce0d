use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::engine::{Engine, EngineOptions};
use crate::limits::*;
use crate::sweeper;

/// Settings every tenant engine is started with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantOptions {
    pub compact_threshold: u64,
    pub sweep_interval: Duration,
    pub engine: EngineOptions,
}

impl Default for TenantOptions {
    fn default() -> Self {
        Self {
            compact_threshold: 1000,
            sweep_interval: Duration::from_secs(5),
            engine: EngineOptions::default(),
        }
    }
}

/// Manages per-tenant engines. Each tenant (a hotel group) gets its own
/// Engine, WAL, hold sweeper and compactor.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    options: TenantOptions,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, options: TenantOptions) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            options,
        }
    }

    /// Get or lazily create the engine for the given tenant.
    pub fn get_or_create(&self, tenant: &str) -> std::io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(tenant) {
            return Ok(engine.value().clone());
        }
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "tenant name too long",
            ));
        }

        // The name is the WAL file name, so it must already be path-safe.
        // Silently stripping characters would let two names share one WAL.
        if tenant.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty tenant name",
            ));
        }
        if !tenant.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "tenant name may only contain letters, digits, '_' and '-'",
            ));
        }

        if self.engines.len() >= MAX_TENANTS {
            return Err(std::io::Error::other("too many tenants"));
        }

        // Two first requests for one tenant must not open its WAL twice.
        let engine = match self.engines.entry(tenant.to_string()) {
            Entry::Occupied(e) => return Ok(e.get().clone()),
            Entry::Vacant(slot) => {
                let wal_path = self.data_dir.join(format!("{tenant}.wal"));
                let engine = Arc::new(Engine::new(wal_path, self.options.engine)?);
                slot.insert(engine.clone());
                engine
            }
        };

        let sweeper_engine = engine.clone();
        let every = self.options.sweep_interval;
        tokio::spawn(async move {
            sweeper::run_sweeper(sweeper_engine, every).await;
        });
        let compactor_engine = engine.clone();
        let threshold = self.options.compact_threshold;
        tokio::spawn(async move {
            sweeper::run_compactor(compactor_engine, threshold, every).await;
        });

        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        tracing::info!("tenant {tenant:?} loaded");
        Ok(engine)
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}
