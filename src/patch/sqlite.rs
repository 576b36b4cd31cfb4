//! SQLite connection handling shared by the catalog and the response cache
//!
//! Writes go through one connection behind a mutex. Reads check out their own
//! read-only connection from a small idle pool, so concurrent lookups never
//! wait on each other or on a writer (WAL mode lets readers run alongside it).

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rusqlite::types::Type;
use rusqlite::{Connection, OpenFlags, Row};
use tracing::debug;

use crate::patch::error::StorageError;
use crate::patch::identifier::VersionIdentifier;

/// Idle read connections kept around for reuse
const MAX_IDLE_READERS: usize = 8;

/// How long a statement waits on a locked database before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Database {
    path: PathBuf,
    writer: Mutex<Connection>,
    readers: Mutex<Vec<Connection>>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;

        // Enable WAL mode so readers are not blocked by the writer
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(conn),
            readers: Mutex::new(Vec::new()),
        })
    }

    /// Acquire the single writer connection
    pub fn writer(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.writer.lock().map_err(|_| StorageError::LockPoisoned)
    }

    /// Run `f` on a read-only connection of its own
    pub fn read<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let idle = self.idle_readers().pop();
        let conn = match idle {
            Some(conn) => conn,
            None => self.open_reader()?,
        };

        let result = f(&conn);

        let mut idle = self.idle_readers();
        if idle.len() < MAX_IDLE_READERS {
            idle.push(conn);
        }
        result
    }

    // The pool only holds interchangeable connections
    fn idle_readers(&self) -> MutexGuard<'_, Vec<Connection>> {
        self.readers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open_reader(&self) -> Result<Connection, StorageError> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY
                | OpenFlags::SQLITE_OPEN_NO_MUTEX
                | OpenFlags::SQLITE_OPEN_URI,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        debug!("Opened read connection to {:?}", self.path);
        Ok(conn)
    }
}

/// Version components are stored as SQLite INTEGER (i64)
pub fn to_sql_int(value: u64) -> rusqlite::Result<i64> {
    i64::try_from(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

/// `(major, minor, patch)` ready to bind
pub fn version_params(version: &VersionIdentifier) -> rusqlite::Result<(i64, i64, i64)> {
    Ok((
        to_sql_int(version.major())?,
        to_sql_int(version.minor())?,
        to_sql_int(version.patch())?,
    ))
}

/// Read a non-negative INTEGER column
pub fn component(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let value: i64 = row.get(idx)?;
    u64::try_from(value)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e)))
}
