//! Fingerprint store - SQLite cache of strong fingerprints

use crate::error::{Error, Result};
use crate::hash::Fingerprints;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// A cached row. Rows are keyed by `(sample_fingerprint, file_size, modified_ns)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntry {
    pub sample_fingerprint: String,
    pub sha1: String,
    pub crc32: String,
    pub file_size: u64,
    pub modified_ns: i64,
    /// Unix timestamp (seconds) of the insert
    pub inserted_at: i64,
}

impl CacheEntry {
    pub fn fingerprints(&self) -> Fingerprints {
        Fingerprints {
            sha1: self.sha1.clone(),
            crc32: self.crc32.clone(),
            size: self.file_size,
        }
    }
}

/// What [`FingerprintStore::insert`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// No row existed for the key
    Inserted,
    /// An identical row already existed
    Unchanged,
    /// A row with the same key but different fingerprints was replaced
    Replaced,
}

/// Persistent cache of strong fingerprints
pub struct FingerprintStore {
    conn: Connection,
}

/// Get the default store path (~/.romcheck/fingerprints.db)
pub fn default_store_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".romcheck").join("fingerprints.db"))
}

impl FingerprintStore {
    /// Open (or create) a store at `path`, creating the table if it doesn't exist
    pub fn open(path: &Path) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Open the store at the default location, creating the directory if needed
    pub fn open_default() -> Result<Self> {
        let path = default_store_path().ok_or(Error::NoHomeDir)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        Self::open(&path)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        create_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Find the cached row for a file, if any
    pub fn lookup(
        &self,
        sample_fingerprint: &str,
        file_size: u64,
        modified_ns: i64,
    ) -> Result<Option<CacheEntry>> {
        lookup_row(&self.conn, sample_fingerprint, file_size, modified_ns)
    }

    /// Cache the strong fingerprints of a file.
    ///
    /// Re-inserting identical values is a no-op. If the key already maps to
    /// different fingerprints (a sample fingerprint collision that size and
    /// mtime failed to separate), the old row is replaced and a warning logged.
    pub fn insert(
        &mut self,
        sample_fingerprint: &str,
        sums: &Fingerprints,
        file_size: u64,
        modified_ns: i64,
    ) -> Result<InsertOutcome> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut outcome = InsertOutcome::Inserted;
        if let Some(existing) = lookup_row(&tx, sample_fingerprint, file_size, modified_ns)? {
            if existing.sha1 == sums.sha1 && existing.crc32 == sums.crc32 {
                return Ok(InsertOutcome::Unchanged);
            }
            log::warn!(
                "Cached checksums for sample {} differ from computed ones (sha1 {} -> {}); replacing",
                sample_fingerprint,
                existing.sha1,
                sums.sha1
            );
            tx.execute(
                "DELETE FROM files WHERE samplesum = ?1 AND filesize = ?2 AND modtime = ?3",
                params![sample_fingerprint, file_size as i64, modified_ns],
            )?;
            outcome = InsertOutcome::Replaced;
        }

        tx.execute(
            "INSERT INTO files (samplesum, sha1, crc32, filesize, modtime, updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                sample_fingerprint,
                sums.sha1,
                sums.crc32,
                file_size as i64,
                modified_ns,
                Utc::now().timestamp(),
            ],
        )?;
        tx.commit()?;

        log::debug!("Cached checksums for sample {}", sample_fingerprint);
        Ok(outcome)
    }

    /// Number of cached rows
    pub fn len(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// Create the cache table if it doesn't exist
fn create_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(include_str!("schema.sql"))?;
    Ok(())
}

fn lookup_row(
    conn: &Connection,
    sample_fingerprint: &str,
    file_size: u64,
    modified_ns: i64,
) -> Result<Option<CacheEntry>> {
    let entry = conn
        .query_row(
            "SELECT samplesum, sha1, crc32, filesize, modtime, updated
             FROM files
             WHERE samplesum = ?1 AND filesize = ?2 AND modtime = ?3",
            params![sample_fingerprint, file_size as i64, modified_ns],
            |row| {
                Ok(CacheEntry {
                    sample_fingerprint: row.get(0)?,
                    sha1: row.get(1)?,
                    crc32: row.get(2)?,
                    file_size: row.get::<_, i64>(3)? as u64,
                    modified_ns: row.get(4)?,
                    inserted_at: row.get(5)?,
                })
            },
        )
        .optional()?;
    Ok(entry)
}
