//! Memoized lookup results keyed by the exact client version
//!
//! Entries are disposable: dropping any of them only costs a catalog query.
//! Every cache carries a generation counter. `invalidate_all` bumps it before
//! clearing, `put` is refused when the generation changed since the caller
//! started its catalog query, and `get` ignores entries from older
//! generations. Together these keep a lookup that raced a publish from
//! leaving a pre-publish result behind.

use std::collections::HashMap;
use std::hash::{BuildHasher, RandomState};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use tracing::{debug, info};

use crate::patch::error::StorageError;
use crate::patch::identifier::VersionIdentifier;
use crate::patch::sqlite::{Database, to_sql_int, version_params};
use crate::patch::types::PatchList;

pub trait LookupCache: Send + Sync + 'static {
    /// Exact-key lookup
    fn get(&self, key: &VersionIdentifier) -> Result<Option<PatchList>, StorageError>;

    /// Store `entries` if no invalidation happened since `generation` was read.
    ///
    /// Returns `false` when the result was dropped as stale.
    fn put(
        &self,
        key: &VersionIdentifier,
        entries: PatchList,
        generation: u64,
    ) -> Result<bool, StorageError>;

    /// Drop every entry
    fn invalidate_all(&self) -> Result<(), StorageError>;

    /// Current generation; read it before querying the catalog
    fn generation(&self) -> u64;
}

// =============================================================================
// In-memory
// =============================================================================

type Shard = RwLock<HashMap<VersionIdentifier, (u64, PatchList)>>;

/// Sharded in-process map. Readers never block each other, and writers only
/// contend when their keys hash to the same shard.
pub struct MemoryCache {
    shards: Box<[Shard]>,
    hasher: RandomState,
    generation: AtomicU64,
}

impl MemoryCache {
    pub fn new(shard_count: usize) -> Self {
        let shards = (0..shard_count.max(1))
            .map(|_| RwLock::new(HashMap::new()))
            .collect();

        Self {
            shards,
            hasher: RandomState::new(),
            generation: AtomicU64::new(0),
        }
    }

    fn shard(&self, key: &VersionIdentifier) -> &Shard {
        let index = self.hasher.hash_one(key) as usize % self.shards.len();
        &self.shards[index]
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        let generation = self.generation();
        self.shards
            .iter()
            .map(|shard| {
                shard
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .values()
                    .filter(|(g, _)| *g == generation)
                    .count()
            })
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(crate::config::CACHE_SHARDS)
    }
}

// Poisoned shards are still usable caches
impl LookupCache for MemoryCache {
    fn get(&self, key: &VersionIdentifier) -> Result<Option<PatchList>, StorageError> {
        let generation = self.generation();
        let shard = self.shard(key).read().unwrap_or_else(PoisonError::into_inner);

        Ok(shard
            .get(key)
            .filter(|(g, _)| *g == generation)
            .map(|(_, entries)| entries.clone()))
    }

    fn put(
        &self,
        key: &VersionIdentifier,
        entries: PatchList,
        generation: u64,
    ) -> Result<bool, StorageError> {
        let mut shard = self.shard(key).write().unwrap_or_else(PoisonError::into_inner);

        // Checked under the shard lock so a concurrent clear cannot slip in
        // between the check and the insert
        if self.generation.load(Ordering::Acquire) != generation {
            return Ok(false);
        }

        shard.insert(key.clone(), (generation, entries));
        Ok(true)
    }

    fn invalidate_all(&self) -> Result<(), StorageError> {
        let previous = self.generation.fetch_add(1, Ordering::AcqRel);

        for shard in self.shards.iter() {
            shard.write().unwrap_or_else(PoisonError::into_inner).clear();
        }

        debug!("Memory cache invalidated (generation {})", previous + 1);
        Ok(())
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

// =============================================================================
// SQLite
// =============================================================================

/// Lookup results persisted in a `responses` table
pub struct SqliteCache {
    db: Database,
    generation: AtomicU64,
}

impl SqliteCache {
    pub fn new(db_path: &Path) -> Result<Self, StorageError> {
        info!("Initializing response cache at {:?}", db_path);

        let db = Database::open(db_path)?;
        {
            let conn = db.writer()?;
            conn.execute(
                r#"
                CREATE TABLE IF NOT EXISTS responses (
                    platform TEXT NOT NULL,
                    major INTEGER NOT NULL,
                    minor INTEGER NOT NULL,
                    patch INTEGER NOT NULL,
                    generation INTEGER NOT NULL,
                    body BLOB NOT NULL,
                    PRIMARY KEY (platform, major, minor, patch)
                )
                "#,
                [],
            )?;

            // Rows left by a previous process may predate its last publish
            let dropped = conn.execute("DELETE FROM responses", [])?;
            debug!("Dropped {} cached responses from previous run", dropped);
        }

        Ok(Self {
            db,
            generation: AtomicU64::new(0),
        })
    }
}

impl LookupCache for SqliteCache {
    fn get(&self, key: &VersionIdentifier) -> Result<Option<PatchList>, StorageError> {
        let (major, minor, patch) = version_params(key)?;
        let generation = to_sql_int(self.generation())?;

        self.db.read(|conn| {
            let result = conn.query_row(
                r#"
                SELECT body FROM responses
                WHERE platform = ?1 AND major = ?2 AND minor = ?3 AND patch = ?4
                  AND generation = ?5
                "#,
                (key.platform().as_str(), major, minor, patch, generation),
                |row| row.get::<_, Vec<u8>>(0),
            );

            match result {
                Ok(body) => Ok(Some(PatchList::from_body(body))),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn put(
        &self,
        key: &VersionIdentifier,
        entries: PatchList,
        generation: u64,
    ) -> Result<bool, StorageError> {
        let (major, minor, patch) = version_params(key)?;
        let conn = self.db.writer()?;

        // invalidate_all deletes under this same lock after bumping
        if self.generation.load(Ordering::Acquire) != generation {
            return Ok(false);
        }

        conn.execute(
            r#"
            INSERT OR REPLACE INTO responses (platform, major, minor, patch, generation, body)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            (
                key.platform().as_str(),
                major,
                minor,
                patch,
                to_sql_int(generation)?,
                entries.body().as_ref(),
            ),
        )?;

        Ok(true)
    }

    fn invalidate_all(&self) -> Result<(), StorageError> {
        // Bumped first: even if the DELETE fails, old rows are no longer served
        let previous = self.generation.fetch_add(1, Ordering::AcqRel);

        let conn = self.db.writer()?;
        let deleted = conn.execute("DELETE FROM responses", [])?;

        debug!(
            "Deleted {} cached responses (generation {})",
            deleted,
            previous + 1
        );
        Ok(())
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::identifier::Platform;
    use crate::patch::types::PatchEntry;
    use rstest::rstest;
    use tempfile::TempDir;

    fn key(platform: Platform, major: u64, minor: u64, patch: u64) -> VersionIdentifier {
        VersionIdentifier::new(platform, major, minor, patch)
    }

    fn entries(names: &[&str]) -> PatchList {
        let entries: Vec<PatchEntry> = names
            .iter()
            .map(|name| PatchEntry {
                name: name.to_string(),
                md5: format!("md5-{name}"),
                url: format!("https://cdn.example/{name}"),
            })
            .collect();
        PatchList::from_entries(&entries).unwrap()
    }

    enum Backend {
        Memory,
        Sqlite,
    }

    fn open(backend: Backend) -> (TempDir, Box<dyn LookupCache>) {
        let temp_dir = TempDir::new().unwrap();
        let cache: Box<dyn LookupCache> = match backend {
            Backend::Memory => Box::new(MemoryCache::new(4)),
            Backend::Sqlite => Box::new(SqliteCache::new(&temp_dir.path().join("test.db")).unwrap()),
        };
        (temp_dir, cache)
    }

    #[rstest]
    #[case(Backend::Memory)]
    #[case(Backend::Sqlite)]
    fn get_returns_what_put_stored(#[case] backend: Backend) {
        let (_temp_dir, cache) = open(backend);
        let k = key(Platform::Linux, 1, 2, 2);

        assert_eq!(cache.get(&k).unwrap(), None);

        let generation = cache.generation();
        assert!(cache.put(&k, entries(&["1.2.3"]), generation).unwrap());

        assert_eq!(cache.get(&k).unwrap(), Some(entries(&["1.2.3"])));
    }

    #[rstest]
    #[case(Backend::Memory)]
    #[case(Backend::Sqlite)]
    fn get_matches_exact_key_only(#[case] backend: Backend) {
        let (_temp_dir, cache) = open(backend);
        let generation = cache.generation();
        cache
            .put(&key(Platform::Linux, 1, 2, 2), entries(&["1.2.3"]), generation)
            .unwrap();

        assert_eq!(cache.get(&key(Platform::Linux, 1, 2, 1)).unwrap(), None);
        assert_eq!(cache.get(&key(Platform::Windows, 1, 2, 2)).unwrap(), None);
    }

    #[rstest]
    #[case(Backend::Memory)]
    #[case(Backend::Sqlite)]
    fn put_overwrites_existing_entry(#[case] backend: Backend) {
        let (_temp_dir, cache) = open(backend);
        let k = key(Platform::Mac, 1, 0, 0);
        let generation = cache.generation();

        cache.put(&k, entries(&["1.0.1"]), generation).unwrap();
        cache.put(&k, entries(&["1.0.1", "1.0.2"]), generation).unwrap();

        assert_eq!(cache.get(&k).unwrap(), Some(entries(&["1.0.1", "1.0.2"])));
    }

    #[rstest]
    #[case(Backend::Memory)]
    #[case(Backend::Sqlite)]
    fn invalidate_all_drops_every_entry(#[case] backend: Backend) {
        let (_temp_dir, cache) = open(backend);
        let generation = cache.generation();
        for platform in Platform::ALL {
            cache
                .put(&key(platform, 1, 0, 0), entries(&["1.0.1"]), generation)
                .unwrap();
        }

        cache.invalidate_all().unwrap();

        for platform in Platform::ALL {
            assert_eq!(cache.get(&key(platform, 1, 0, 0)).unwrap(), None);
        }
        assert_eq!(cache.generation(), generation + 1);
    }

    #[rstest]
    #[case(Backend::Memory)]
    #[case(Backend::Sqlite)]
    fn put_with_generation_from_before_invalidation_is_dropped(#[case] backend: Backend) {
        let (_temp_dir, cache) = open(backend);
        let k = key(Platform::Linux, 1, 2, 2);

        // A lookup reads the generation, then a publish lands before it stores
        let observed = cache.generation();
        cache.invalidate_all().unwrap();

        assert!(!cache.put(&k, entries(&[]), observed).unwrap());
        assert_eq!(cache.get(&k).unwrap(), None);
    }

    #[rstest]
    #[case(Backend::Memory)]
    #[case(Backend::Sqlite)]
    fn empty_result_is_cached(#[case] backend: Backend) {
        let (_temp_dir, cache) = open(backend);
        let k = key(Platform::Windows, 9, 9, 9);

        cache.put(&k, entries(&[]), cache.generation()).unwrap();

        assert_eq!(cache.get(&k).unwrap(), Some(entries(&[])));
    }

    #[test]
    fn memory_cache_len_counts_live_entries() {
        let cache = MemoryCache::new(2);
        assert!(cache.is_empty());

        for patch in 0..10 {
            cache
                .put(&key(Platform::Linux, 1, 0, patch), entries(&[]), 0)
                .unwrap();
        }
        assert_eq!(cache.len(), 10);

        cache.invalidate_all().unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn memory_cache_with_zero_shards_still_works() {
        let cache = MemoryCache::new(0);
        let k = key(Platform::Linux, 1, 0, 0);

        cache.put(&k, entries(&["1.0.1"]), 0).unwrap();
        assert_eq!(cache.get(&k).unwrap(), Some(entries(&["1.0.1"])));
    }

    #[test]
    fn sqlite_cache_starts_empty_after_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let k = key(Platform::Linux, 1, 0, 0);

        {
            let cache = SqliteCache::new(&db_path).unwrap();
            cache.put(&k, entries(&["1.0.1"]), 0).unwrap();
        }

        let cache = SqliteCache::new(&db_path).unwrap();
        assert_eq!(cache.get(&k).unwrap(), None);
    }

    #[test]
    fn sqlite_cache_get_does_not_wait_for_writer() {
        let temp_dir = TempDir::new().unwrap();
        let cache = SqliteCache::new(&temp_dir.path().join("test.db")).unwrap();
        let k = key(Platform::Linux, 1, 0, 0);
        cache.put(&k, entries(&["1.0.1"]), 0).unwrap();

        let _writer = cache.db.writer().unwrap();

        assert_eq!(cache.get(&k).unwrap(), Some(entries(&["1.0.1"])));
        assert_eq!(cache.get(&key(Platform::Mac, 1, 0, 0)).unwrap(), None);
    }

    #[test]
    fn sqlite_cache_returns_stored_body_verbatim() {
        let temp_dir = TempDir::new().unwrap();
        let cache = SqliteCache::new(&temp_dir.path().join("test.db")).unwrap();
        let k = key(Platform::Windows, 2, 0, 0);
        let stored = entries(&["2.0.1", "2.1.0"]);

        cache.put(&k, stored.clone(), 0).unwrap();

        let cached = cache.get(&k).unwrap().unwrap();
        assert_eq!(cached.body(), stored.body());
    }
}
