//! Persistent SQLite store for resolved records.
//!
//! One table per [`RecordKind`], each with the composite primary key of its
//! [`CacheKey`]. Writes are insert-or-ignore: the first payload stored for a
//! key wins, and inserting a key that already exists is a silent no-op.
//! Records only disappear through [`CacheStore::ensure_schema`] with
//! `reset = true` or an explicit [`CacheStore::invalidate`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags, OptionalExtension, params_from_iter};
use thiserror::Error;

use crate::model::{CacheKey, CacheRecord, RecordKind};

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Row counts per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub authors: usize,
    pub author_year: usize,
    pub author_size: usize,
    pub sources: usize,
}

impl CacheStats {
    pub fn get(&self, kind: RecordKind) -> usize {
        match kind {
            RecordKind::Author => self.authors,
            RecordKind::AuthorYear => self.author_year,
            RecordKind::AuthorSize => self.author_size,
            RecordKind::SourceYear => self.sources,
        }
    }

    pub fn total(&self) -> usize {
        self.authors + self.author_year + self.author_size + self.sources
    }
}

/// Open a SQLite connection with WAL mode and standard pragmas.
fn open_sqlite(path: &Path) -> Result<Connection, rusqlite::Error> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = Connection::open_with_flags(path, flags)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA busy_timeout = 5000;",
    )?;
    Ok(conn)
}

/// The record cache. Owns a single connection; one process drives it at a time.
pub struct CacheStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl CacheStore {
    /// Open (or create) the cache file at `path` and make sure every table exists.
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = open_sqlite(path)?;
        let store = Self {
            conn,
            path: Some(path.to_path_buf()),
        };
        store.ensure_schema(false)?;
        tracing::debug!(path = %path.display(), "opened record cache");
        Ok(store)
    }

    /// A throwaway in-memory cache.
    pub fn open_in_memory() -> Result<Self, CacheError> {
        let store = Self {
            conn: Connection::open_in_memory()?,
            path: None,
        };
        store.ensure_schema(false)?;
        Ok(store)
    }

    /// Location of the backing file, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Create all record tables if absent.
    ///
    /// With `reset = true` every table is dropped and recreated first, which
    /// irreversibly discards all cached records.
    pub fn ensure_schema(&self, reset: bool) -> Result<(), CacheError> {
        let tx = self.conn.unchecked_transaction()?;
        for kind in RecordKind::ALL {
            if reset {
                tx.execute_batch(&format!("DROP TABLE IF EXISTS {}", kind.table()))?;
            }
            tx.execute_batch(&kind.create_sql())?;
        }
        tx.commit()?;
        if reset {
            tracing::info!("record cache reset: all tables dropped and recreated");
        }
        Ok(())
    }

    /// The subset of `keys` stored for `R`'s kind.
    pub fn lookup<R: CacheRecord>(&self, keys: &[R::Key]) -> Result<HashSet<R::Key>, CacheError> {
        let mut present = HashSet::new();
        if keys.is_empty() {
            return Ok(present);
        }
        let kind = R::KIND;
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT 1 FROM {} WHERE {}",
            kind.table(),
            kind.key_predicate()
        ))?;
        for key in keys {
            if present.contains(key) {
                continue;
            }
            if stmt.exists(params_from_iter(key.to_sql()))? {
                present.insert(key.clone());
            }
        }
        tracing::trace!(
            table = kind.table(),
            requested = keys.len(),
            hits = present.len(),
            "cache lookup"
        );
        Ok(present)
    }

    /// Stored records for the keys that are present, in first-occurrence order.
    pub fn fetch<R: CacheRecord>(&self, keys: &[R::Key]) -> Result<Vec<R>, CacheError> {
        let mut records = Vec::new();
        if keys.is_empty() {
            return Ok(records);
        }
        let kind = R::KIND;
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {} FROM {} WHERE {}",
            kind.column_list(),
            kind.table(),
            kind.key_predicate()
        ))?;
        let mut seen = HashSet::new();
        for key in keys {
            if !seen.insert(key.clone()) {
                continue;
            }
            if let Some(record) = stmt
                .query_row(params_from_iter(key.to_sql()), R::from_row)
                .optional()?
            {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Insert records, skipping any whose key is already stored.
    ///
    /// Returns the number of rows actually written.
    pub fn insert<R: CacheRecord>(&self, records: &[R]) -> Result<usize, CacheError> {
        if records.is_empty() {
            return Ok(0);
        }
        let kind = R::KIND;
        let placeholders = (1..=kind.columns().len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let tx = self.conn.unchecked_transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare_cached(&format!(
                "INSERT OR IGNORE INTO {} ({}) VALUES ({})",
                kind.table(),
                kind.column_list(),
                placeholders
            ))?;
            for record in records {
                written += stmt.execute(params_from_iter(record.to_sql()))?;
            }
        }
        tx.commit()?;
        tracing::trace!(
            table = kind.table(),
            offered = records.len(),
            written,
            "cache insert"
        );
        Ok(written)
    }

    /// Insert a single record. Returns `false` if its key was already stored.
    pub fn insert_one<R: CacheRecord>(&self, record: &R) -> Result<bool, CacheError> {
        Ok(self.insert(std::slice::from_ref(record))? == 1)
    }

    /// Delete the given keys so that a later resolve queries them again.
    ///
    /// Returns the number of rows deleted.
    pub fn invalidate<R: CacheRecord>(&self, keys: &[R::Key]) -> Result<usize, CacheError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let kind = R::KIND;
        let tx = self.conn.unchecked_transaction()?;
        let mut deleted = 0;
        {
            let mut stmt = tx.prepare_cached(&format!(
                "DELETE FROM {} WHERE {}",
                kind.table(),
                kind.key_predicate()
            ))?;
            for key in keys {
                deleted += stmt.execute(params_from_iter(key.to_sql()))?;
            }
        }
        tx.commit()?;
        if deleted > 0 {
            tracing::debug!(table = kind.table(), deleted, "invalidated cached records");
        }
        Ok(deleted)
    }

    /// Number of rows stored for `kind`.
    pub fn count(&self, kind: RecordKind) -> Result<usize, CacheError> {
        let n: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", kind.table()),
            [],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        Ok(CacheStats {
            authors: self.count(RecordKind::Author)?,
            author_year: self.count(RecordKind::AuthorYear)?,
            author_size: self.count(RecordKind::AuthorSize)?,
            sources: self.count(RecordKind::SourceYear)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        AuthorKey, AuthorRecord, AuthorSizeRecord, AuthorYearKey, SourceYearKey,
        SourceYearRecord,
    };

    fn author(auth_id: i64, surname: &str) -> AuthorRecord {
        AuthorRecord {
            auth_id,
            eid: format!("9-s2.0-{auth_id}"),
            surname: Some(surname.to_string()),
            initials: None,
            givenname: None,
            affiliation: None,
            documents: 3,
            affiliation_id: None,
            city: None,
            country: Some("Germany".into()),
            areas: None,
        }
    }

    #[test]
    fn ensure_schema_is_repeatable() {
        let store = CacheStore::open_in_memory().unwrap();
        store.ensure_schema(false).unwrap();
        store.ensure_schema(false).unwrap();
        assert_eq!(store.stats().unwrap(), CacheStats::default());
    }

    #[test]
    fn reset_drops_all_records() {
        let store = CacheStore::open_in_memory().unwrap();
        store.insert(&[author(1, "Rose")]).unwrap();
        store
            .insert(&[AuthorSizeRecord {
                auth_id: 1,
                year: 2010,
                n_pubs: 0,
            }])
            .unwrap();
        assert_eq!(store.stats().unwrap().total(), 2);

        store.ensure_schema(true).unwrap();
        assert_eq!(store.stats().unwrap().total(), 0);
    }

    #[test]
    fn insert_is_idempotent_and_never_overwrites() {
        let store = CacheStore::open_in_memory().unwrap();
        assert_eq!(store.insert(&[author(1, "Rose")]).unwrap(), 1);
        assert_eq!(store.insert(&[author(1, "Kalbe")]).unwrap(), 0);
        assert!(!store.insert_one(&author(1, "Other")).unwrap());
        assert_eq!(store.count(RecordKind::Author).unwrap(), 1);

        let stored: Vec<AuthorRecord> = store.fetch(&[AuthorKey { auth_id: 1 }]).unwrap();
        assert_eq!(stored[0].surname.as_deref(), Some("Rose"));
    }

    #[test]
    fn duplicate_keys_within_one_batch_are_skipped() {
        let store = CacheStore::open_in_memory().unwrap();
        let written = store
            .insert(&[author(1, "Rose"), author(2, "Kalbe"), author(1, "Again")])
            .unwrap();
        assert_eq!(written, 2);
    }

    #[test]
    fn lookup_empty_keys() {
        let store = CacheStore::open_in_memory().unwrap();
        assert!(store.lookup::<AuthorRecord>(&[]).unwrap().is_empty());
        assert!(store.fetch::<AuthorRecord>(&[]).unwrap().is_empty());
    }

    #[test]
    fn lookup_returns_present_subset() {
        let store = CacheStore::open_in_memory().unwrap();
        store.insert(&[author(1, "Rose"), author(3, "Kalbe")]).unwrap();
        let keys: Vec<AuthorKey> = [1, 2, 3, 1]
            .into_iter()
            .map(|auth_id| AuthorKey { auth_id })
            .collect();
        let present = store.lookup::<AuthorRecord>(&keys).unwrap();
        assert_eq!(present.len(), 2);
        assert!(present.contains(&AuthorKey { auth_id: 1 }));
        assert!(present.contains(&AuthorKey { auth_id: 3 }));
    }

    #[test]
    fn kinds_sharing_a_key_type_are_separate_tables() {
        let store = CacheStore::open_in_memory().unwrap();
        store
            .insert(&[AuthorSizeRecord {
                auth_id: 53164702100,
                year: 2017,
                n_pubs: 6,
            }])
            .unwrap();
        let key = AuthorYearKey {
            auth_id: 53164702100,
            year: 2017,
        };
        assert_eq!(store.lookup::<AuthorSizeRecord>(&[key]).unwrap().len(), 1);
        assert!(
            store
                .lookup::<crate::model::AuthorYearRecord>(&[key])
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn source_auids_round_trip_through_text_column() {
        let store = CacheStore::open_in_memory().unwrap();
        let record = SourceYearRecord {
            source_id: 22900,
            year: 2010,
            n_pubs: 3,
            auids: vec![53164702100, 57197093438],
        };
        store.insert(&[record.clone()]).unwrap();
        let fetched: Vec<SourceYearRecord> = store
            .fetch(&[SourceYearKey {
                source_id: 22900,
                year: 2010,
            }])
            .unwrap();
        assert_eq!(fetched, vec![record]);
    }

    #[test]
    fn invalidate_removes_only_given_keys() {
        let store = CacheStore::open_in_memory().unwrap();
        store.insert(&[author(1, "Rose"), author(2, "Kalbe")]).unwrap();
        let deleted = store
            .invalidate::<AuthorRecord>(&[AuthorKey { auth_id: 2 }, AuthorKey { auth_id: 9 }])
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.count(RecordKind::Author).unwrap(), 1);
    }

    #[test]
    fn open_creates_parent_directories_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.sqlite");
        {
            let store = CacheStore::open(&path).unwrap();
            store.insert(&[author(7, "Rose")]).unwrap();
            assert_eq!(store.path(), Some(path.as_path()));
        }
        let reopened = CacheStore::open(&path).unwrap();
        assert_eq!(reopened.count(RecordKind::Author).unwrap(), 1);
    }
}
