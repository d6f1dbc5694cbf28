use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tracing::info;

use crate::catalog::Catalog;
use crate::compactor;
use crate::engine::Engine;
use crate::limits::*;

/// Per-tenant engines, keyed by the database name of the pgwire connection.
/// Each tenant gets its own Engine, WAL file and compactor task; the catalog
/// is shared.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    /// Held while a tenant's WAL is recovered, never while a map shard is.
    opening: Mutex<()>,
    data_dir: PathBuf,
    compact_threshold: u64,
    catalog: Arc<dyn Catalog>,
}

/// Keep `[A-Za-z0-9_-]` so a tenant name cannot escape the data directory.
fn sanitize(tenant: &str) -> io::Result<String> {
    if tenant.len() > MAX_TENANT_NAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "tenant name too long",
        ));
    }
    let safe_name: String = tenant
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    if safe_name.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "empty tenant name",
        ));
    }
    Ok(safe_name)
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, catalog: Arc<dyn Catalog>) -> Self {
        Self {
            engines: DashMap::new(),
            opening: Mutex::new(()),
            data_dir,
            compact_threshold,
            catalog,
        }
    }

    /// Get or lazily create the engine for a tenant. Names that sanitize to
    /// the same string share one engine.
    pub fn get_or_create(&self, tenant: &str) -> io::Result<Arc<Engine>> {
        let safe_name = sanitize(tenant)?;
        if let Some(engine) = self.engines.get(&safe_name) {
            return Ok(engine.value().clone());
        }

        // Lookups of open tenants never wait on this; racing opens of the
        // same tenant must not both recover its WAL.
        let _opening = self.opening.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(engine) = self.engines.get(&safe_name) {
            return Ok(engine.value().clone());
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(io::Error::other("too many tenants"));
        }

        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let engine = Arc::new(Engine::new(wal_path, self.catalog.clone())?);
        self.engines.insert(safe_name.clone(), engine.clone());

        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            compactor::run_compactor(compactor_engine, threshold).await;
        });

        info!("opened tenant {safe_name} ({} entries)", engine.entry_count());
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }

    pub fn tenant_count(&self) -> usize {
        self.engines.len()
    }
}
