//! Persistent exact-match `(domain, url)` filter, backed by `sqlite`.
//!
//! Ported from `illume/filter/persistent_key_filter.py`. The schema, the
//! `sqlite_master` corruption check, and the "one flag per pair, each pair
//! committed independently" bulk-insert semantics (`spec.md` §5's
//! cancellation-safety requirement) all mirror the source 1:1.

use std::path::Path;

use twox_hash::XxHash64;
use std::hash::Hasher;

use crate::error::{CrawlError, Result};

const CREATE_TABLE: &str = "CREATE TABLE filter (domain BLOB, url BLOB, PRIMARY KEY (domain, url))";
const CREATE_DOMAIN_IDX: &str = "CREATE INDEX domain_idx ON filter (domain)";
const CREATE_URL_IDX: &str = "CREATE INDEX url_idx ON filter (url)";

const CHECK_TABLES: &str = "SELECT name FROM sqlite_master WHERE \
    (type = 'table' AND name = 'filter') OR \
    (type = 'index' AND name = 'domain_idx') OR \
    (type = 'index' AND name = 'url_idx')";

const INSERT: &str = "INSERT INTO filter (domain, url) VALUES (?, ?)";
const CHECK_DOMAIN: &str = "SELECT 1 FROM filter WHERE domain = ? LIMIT 1";
const CHECK_BOTH: &str = "SELECT 1 FROM filter WHERE domain = ? AND url = ? LIMIT 1";
const SELECT_ALL: &str = "SELECT domain, url FROM filter";

/// Hash width (in bytes) of a persisted key, per config key
/// `FILTER_HASHER_KEY_SIZE`.
pub fn hash_key(input: &str, key_size: usize) -> Vec<u8> {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(input.as_bytes());
    let digest = hasher.finish().to_be_bytes();
    digest[..key_size.min(8)].to_vec()
}

/// The ground-truth exact `(domain, url)` set. The bloom filters in front of
/// it are a cache; this is authoritative.
pub struct PersistentKeyFilter {
    conn: sqlite::Connection,
    key_size: usize,
}

impl PersistentKeyFilter {
    pub fn open(path: impl AsRef<Path>, key_size: usize) -> Result<Self> {
        let path = path.as_ref();
        let existed = path.exists();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = sqlite::open(path)?;

        if !existed {
            conn.execute(CREATE_TABLE)?;
            conn.execute(CREATE_DOMAIN_IDX)?;
            conn.execute(CREATE_URL_IDX)?;
        } else if !Self::tables_exist(&conn)? {
            return Err(CrawlError::DatabaseCorrupt(
                "filter database is missing expected tables/indices".to_string(),
            ));
        }

        Ok(Self { conn, key_size })
    }

    fn tables_exist(conn: &sqlite::Connection) -> Result<bool> {
        let mut count = 0;
        conn.iterate(CHECK_TABLES, |_| {
            count += 1;
            true
        })?;
        Ok(count == 3)
    }

    /// Insert a single `(domain, url)` pair. Primary-key collisions are
    /// reported as `Ok(false)` rather than propagated, matching the
    /// idempotent "first writer wins" semantics `spec.md` §5 relies on.
    pub fn add(&self, domain: &str, url: &str) -> Result<bool> {
        let domain_key = hash_key(domain, self.key_size);
        let url_key = hash_key(url, self.key_size);
        let mut stmt = self.conn.prepare(INSERT)?;
        stmt.bind((1, domain_key.as_slice()))?;
        stmt.bind((2, url_key.as_slice()))?;
        match stmt.next() {
            Ok(_) => Ok(true),
            Err(e) if e.code == Some(19) => Ok(false), // SQLITE_CONSTRAINT
            Err(e) => Err(e.into()),
        }
    }

    /// Insert many pairs, one success/fail flag per pair, each committed
    /// independently (`spec.md` §5: a cancelled insert sequence must not
    /// leave half-written multi-row batches).
    pub fn add_bulk<'a>(&self, pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Vec<Result<bool>> {
        pairs.into_iter().map(|(d, u)| self.add(d, u)).collect()
    }

    pub fn exists_domain(&self, domain: &str) -> Result<bool> {
        let key = hash_key(domain, self.key_size);
        self.query_exists(CHECK_DOMAIN, &[key.as_slice()])
    }

    pub fn exists_url(&self, domain: &str, url: &str) -> Result<bool> {
        let domain_key = hash_key(domain, self.key_size);
        let url_key = hash_key(url, self.key_size);
        self.query_exists(CHECK_BOTH, &[domain_key.as_slice(), url_key.as_slice()])
    }

    fn query_exists(&self, query: &str, params: &[&[u8]]) -> Result<bool> {
        let mut stmt = self.conn.prepare(query)?;
        for (i, p) in params.iter().enumerate() {
            stmt.bind((i + 1, *p))?;
        }
        Ok(matches!(stmt.next()?, sqlite::State::Row))
    }

    /// Iterate every persisted `(domain_hash, url_hash)` pair, used to
    /// repopulate the bloom filters at worker start (`spec.md` §3: "Bloom
    /// filters are process-local and rebuilt at worker start by scanning the
    /// persistent filter").
    pub fn scan(&self, mut visit: impl FnMut(&[u8], &[u8])) -> Result<()> {
        let mut stmt = self.conn.prepare(SELECT_ALL)?;
        while let sqlite::State::Row = stmt.next()? {
            let domain: Vec<u8> = stmt.read(0)?;
            let url: Vec<u8> = stmt.read(1)?;
            visit(&domain, &url);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_schema_on_first_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("filter.db");
        let filter = PersistentKeyFilter::open(&path, 8).unwrap();
        assert!(!filter.exists_domain("example.test").unwrap());
    }

    #[test]
    fn reopen_detects_intact_schema() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("filter.db");
        {
            PersistentKeyFilter::open(&path, 8).unwrap();
        }
        assert!(PersistentKeyFilter::open(&path, 8).is_ok());
    }

    #[test]
    fn duplicate_insert_succeeds_once_and_leaves_one_row() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("filter.db");
        let filter = PersistentKeyFilter::open(&path, 8).unwrap();

        assert!(filter.add("example.test", "http://example.test/a").unwrap());
        assert!(!filter.add("example.test", "http://example.test/a").unwrap());

        let mut rows = 0;
        filter.scan(|_, _| rows += 1).unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn exists_queries_reflect_inserted_pair() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("filter.db");
        let filter = PersistentKeyFilter::open(&path, 8).unwrap();
        filter.add("example.test", "http://example.test/a").unwrap();

        assert!(filter.exists_domain("example.test").unwrap());
        assert!(filter.exists_url("example.test", "http://example.test/a").unwrap());
        assert!(!filter.exists_url("example.test", "http://example.test/b").unwrap());
    }
}
