//! Shared test utilities

use std::sync::Arc;

use axum::Router;
use tempfile::TempDir;

use hercules_base::config::CacheBackend;
use hercules_base::http::routes::{AppState, router};
use hercules_base::patch::cache::{LookupCache, MemoryCache, SqliteCache};
use hercules_base::patch::catalog::{PatchCatalog, SqliteCatalog};
use hercules_base::patch::identifier::VersionIdentifier;
use hercules_base::patch::lookup::LookupService;
use hercules_base::patch::publish::{PublishRequest, PublishService};

pub const SECRET: &str = "test-secret";

/// Services backed by a throwaway SQLite catalog and the chosen cache
pub struct TestServices {
    _temp_dir: TempDir,
    pub catalog: Arc<SqliteCatalog>,
    pub cache: Arc<dyn LookupCache>,
    pub lookup: Arc<LookupService>,
    pub publish: Arc<PublishService>,
}

impl TestServices {
    pub fn new() -> Self {
        Self::with_cache(CacheBackend::Memory)
    }

    pub fn with_cache(backend: CacheBackend) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let catalog = Arc::new(SqliteCatalog::new(&db_path).unwrap());
        let cache: Arc<dyn LookupCache> = match backend {
            CacheBackend::Memory => Arc::new(MemoryCache::default()),
            CacheBackend::Sqlite => Arc::new(SqliteCache::new(&db_path).unwrap()),
        };

        let dyn_catalog: Arc<dyn PatchCatalog> = catalog.clone();

        Self {
            _temp_dir: temp_dir,
            lookup: Arc::new(LookupService::new(dyn_catalog.clone(), cache.clone())),
            publish: Arc::new(PublishService::new(
                dyn_catalog,
                cache.clone(),
                Some(SECRET.to_string()),
            )),
            catalog,
            cache,
        }
    }

    /// Whether a lookup result for `version` is currently cached
    #[allow(dead_code)]
    pub fn is_cached(&self, version: &str) -> bool {
        let key = VersionIdentifier::parse(version).unwrap();
        self.cache.get(&key).unwrap().is_some()
    }

    pub fn router(&self) -> Router {
        router(AppState {
            lookup: self.lookup.clone(),
            publish: self.publish.clone(),
            cache: self.cache.clone(),
        })
    }
}

/// Build a publish body with the test secret
pub fn publish_body(os: &str, version: (u64, u64, u64), url: &str, hash: &str) -> serde_json::Value {
    serde_json::json!({
        "authToken": SECRET,
        "url": url,
        "os": os,
        "major": version.0,
        "minor": version.1,
        "patch": version.2,
        "hash": hash
    })
}

#[allow(dead_code)]
pub fn publish_request(os: &str, version: (u64, u64, u64), url: &str, hash: &str) -> PublishRequest {
    serde_json::from_value(publish_body(os, version, url, hash)).unwrap()
}
