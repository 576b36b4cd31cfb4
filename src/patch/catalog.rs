//! Durable, append-only catalog of published patches

use std::path::Path;

use chrono::DateTime;
#[cfg(test)]
use mockall::automock;
use rusqlite::types::Type;
use rusqlite::{Connection, Row};
use tracing::{debug, info};

use crate::patch::error::StorageError;
use crate::patch::identifier::{Platform, VersionIdentifier};
use crate::patch::sqlite::{Database, component, version_params};
use crate::patch::types::PatchRecord;

/// Schema migrations
/// Each version contains a list of SQL statements to execute
const MIGRATIONS: &[&[&str]] = &[
    // v1: one record per (platform, version tuple)
    &[
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_patches_version ON patches(platform, major, minor, patch)",
    ],
];

/// Source of truth for published patch records
#[cfg_attr(test, automock)]
pub trait PatchCatalog: Send + Sync + 'static {
    /// Every record of `version`'s platform strictly newer than `version`,
    /// ascending by numeric (major, minor, patch).
    fn query_newer(&self, version: &VersionIdentifier) -> Result<Vec<PatchRecord>, StorageError>;

    /// Append a record atomically. Nothing is visible if this fails.
    fn append(&self, record: &PatchRecord) -> Result<(), StorageError>;

    /// Every record for `platform`, ascending by version
    fn list(&self, platform: Platform) -> Result<Vec<PatchRecord>, StorageError>;
}

pub struct SqliteCatalog {
    db: Database,
}

impl SqliteCatalog {
    pub fn new(db_path: &Path) -> Result<Self, StorageError> {
        info!("Opening patch catalog at {:?}", db_path);

        let catalog = Self {
            db: Database::open(db_path)?,
        };

        catalog.create_schema()?;
        info!("Patch catalog ready");

        Ok(catalog)
    }

    fn create_schema(&self) -> Result<(), StorageError> {
        debug!("Creating catalog schema");

        let conn = self.db.writer()?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS patches (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                platform TEXT NOT NULL,
                major INTEGER NOT NULL,
                minor INTEGER NOT NULL,
                patch INTEGER NOT NULL,
                url TEXT NOT NULL,
                hash TEXT NOT NULL,
                published_at INTEGER NOT NULL
            )
            "#,
            [],
        )?;

        Self::apply_migrations(&conn)?;

        debug!("Catalog schema created successfully");
        Ok(())
    }

    /// Apply pending migrations based on user_version pragma
    fn apply_migrations(conn: &Connection) -> Result<(), StorageError> {
        let current_version: i32 =
            conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

        for (i, statements) in MIGRATIONS.iter().enumerate() {
            let version = (i + 1) as i32;
            if version > current_version {
                for sql in *statements {
                    conn.execute(sql, [])?;
                }
                debug!("Applied migration v{}", version);
            }
        }

        let target_version = MIGRATIONS.len() as i32;
        if target_version > current_version {
            conn.pragma_update(None, "user_version", target_version)?;
            debug!("Updated schema version to v{}", target_version);
        }

        Ok(())
    }

    fn record_from_row(platform: Platform, row: &Row<'_>) -> rusqlite::Result<PatchRecord> {
        let published_at: i64 = row.get(5)?;
        let published_at = DateTime::from_timestamp_millis(published_at).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                5,
                Type::Integer,
                format!("publish timestamp {published_at} out of range").into(),
            )
        })?;

        Ok(PatchRecord {
            version: VersionIdentifier::new(
                platform,
                component(row, 0)?,
                component(row, 1)?,
                component(row, 2)?,
            ),
            url: row.get(3)?,
            hash: row.get(4)?,
            published_at,
        })
    }
}

fn is_unique_violation(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

impl PatchCatalog for SqliteCatalog {
    fn query_newer(&self, version: &VersionIdentifier) -> Result<Vec<PatchRecord>, StorageError> {
        let platform = version.platform();
        let (major, minor, patch) = version_params(version)?;

        let records = self.db.read(|conn| {
            // Compare the numeric columns; "10" sorts before "9" as text
            let mut stmt = conn.prepare_cached(
                r#"
                SELECT major, minor, patch, url, hash, published_at FROM patches
                WHERE platform = ?1
                  AND (major > ?2
                       OR (major = ?2 AND (minor > ?3
                                           OR (minor = ?3 AND patch > ?4))))
                ORDER BY major, minor, patch
                "#,
            )?;

            let records = stmt
                .query_map((platform.as_str(), major, minor, patch), |row| {
                    Self::record_from_row(platform, row)
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(records)
        })?;

        debug!("Catalog has {} patches newer than {}", records.len(), version);
        Ok(records)
    }

    fn append(&self, record: &PatchRecord) -> Result<(), StorageError> {
        let version = &record.version;
        let (major, minor, patch) = version_params(version)?;

        let mut conn = self.db.writer()?;
        let tx = conn.transaction()?;

        let inserted = tx.execute(
            r#"
            INSERT INTO patches (platform, major, minor, patch, url, hash, published_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            (
                version.platform().as_str(),
                major,
                minor,
                patch,
                &record.url,
                &record.hash,
                record.published_at.timestamp_millis(),
            ),
        );

        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(StorageError::DuplicateVersion(version.to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        tx.commit()?;

        info!("Appended patch {} ({})", version, record.url);
        Ok(())
    }

    fn list(&self, platform: Platform) -> Result<Vec<PatchRecord>, StorageError> {
        self.db.read(|conn| {
            let mut stmt = conn.prepare_cached(
                r#"
                SELECT major, minor, patch, url, hash, published_at FROM patches
                WHERE platform = ?1
                ORDER BY major, minor, patch
                "#,
            )?;

            let records = stmt
                .query_map([platform.as_str()], |row| Self::record_from_row(platform, row))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(records)
        })
    }
}
