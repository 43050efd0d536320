//! # CaseCache
//!
//! The gateway's record of every case it has seen, keyed by case id.
//! Processors read and write whole entries: there is no partial-field update.
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use thiserror::Error;

/// Enumeration of errors for operations with a `CaseCache`.
/// Errors can originate from sqlx and are wrapped by us to provide additional context.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("pool creation failed with: {error}")]
    PoolCreationError { error: sqlx::Error },
    #[error("{command} query failed with: {error}")]
    QueryError { command: String, error: sqlx::Error },
    #[error("case cache is unavailable: {0}")]
    Unavailable(String),
}

/// Case kind tag stored alongside each entry.
pub const HOUSEHOLD_KIND: i32 = 0;

/// The tracked state of a single case.
#[derive(Deserialize, Serialize, Debug, PartialEq, Eq, Clone, sqlx::FromRow)]
pub struct CaseCacheEntry {
    pub case_id: String,
    /// Whether the field tool has created this case yet.
    pub exists_in_field: bool,
    /// Whether a questionnaire has been linked to this case.
    pub delivered: bool,
    pub access_info: Option<String>,
    pub care_codes: Option<String>,
    pub kind: i32,
}

impl CaseCacheEntry {
    /// An entry with every flag unset, as seen before any processor touched the case.
    pub fn new(case_id: &str) -> Self {
        Self {
            case_id: case_id.to_owned(),
            exists_in_field: false,
            delivered: false,
            access_info: None,
            care_codes: None,
            kind: HOUSEHOLD_KIND,
        }
    }
}

pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Keyed store of `CaseCacheEntry` records.
///
/// `put` must be linearizable with `get` on the same key. No locking is provided across
/// keys or across a `get` followed by a `put`: callers creating a case must go through
/// `insert_if_absent` to be safe against a concurrent creator of the same id.
#[async_trait]
pub trait CaseCache: Send + Sync {
    async fn get(&self, case_id: &str) -> CacheResult<Option<CaseCacheEntry>>;

    /// Upsert an entry, replacing every field stored under its case id.
    async fn put(&self, entry: &CaseCacheEntry) -> CacheResult<()>;

    /// Store an entry only if its case id is not tracked yet.
    /// Returns `false` when an entry was already present, in which case nothing is written.
    async fn insert_if_absent(&self, entry: &CaseCacheEntry) -> CacheResult<bool>;

    /// Remove an entry. Never called by processors: removal is an administrative operation.
    async fn delete(&self, case_id: &str) -> CacheResult<bool>;
}

/// A `CaseCache` implemented on top of a PostgreSQL table.
pub struct PgCaseCache {
    table: String,
    pool: PgPool,
}

impl PgCaseCache {
    /// Initialize a new PgCaseCache backed by table in PostgreSQL.
    /// Connections are established lazily on first use.
    pub fn new(table: &str, url: &str, max_connections: u32) -> CacheResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_lazy(url)
            .map_err(|error| CacheError::PoolCreationError { error })?;

        Ok(Self {
            table: table.to_owned(),
            pool,
        })
    }

    /// Initialize a new PgCaseCache from an existing pool.
    pub fn new_from_pool(table: &str, pool: PgPool) -> Self {
        Self {
            table: table.to_owned(),
            pool,
        }
    }
}

#[async_trait]
impl CaseCache for PgCaseCache {
    async fn get(&self, case_id: &str) -> CacheResult<Option<CaseCacheEntry>> {
        let base_query = format!(
            r#"
SELECT
    case_id, exists_in_field, delivered, access_info, care_codes, kind
FROM
    "{0}"
WHERE
    case_id = $1
            "#,
            &self.table
        );

        sqlx::query_as::<_, CaseCacheEntry>(&base_query)
            .bind(case_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| CacheError::QueryError {
                command: "SELECT".to_owned(),
                error,
            })
    }

    async fn put(&self, entry: &CaseCacheEntry) -> CacheResult<()> {
        let base_query = format!(
            r#"
INSERT INTO "{0}"
    (case_id, exists_in_field, delivered, access_info, care_codes, kind)
VALUES
    ($1, $2, $3, $4, $5, $6)
ON CONFLICT (case_id) DO UPDATE SET
    exists_in_field = EXCLUDED.exists_in_field,
    delivered = EXCLUDED.delivered,
    access_info = EXCLUDED.access_info,
    care_codes = EXCLUDED.care_codes,
    kind = EXCLUDED.kind,
    last_updated = NOW()
            "#,
            &self.table
        );

        sqlx::query(&base_query)
            .bind(&entry.case_id)
            .bind(entry.exists_in_field)
            .bind(entry.delivered)
            .bind(&entry.access_info)
            .bind(&entry.care_codes)
            .bind(entry.kind)
            .execute(&self.pool)
            .await
            .map_err(|error| CacheError::QueryError {
                command: "UPSERT".to_owned(),
                error,
            })?;

        Ok(())
    }

    async fn insert_if_absent(&self, entry: &CaseCacheEntry) -> CacheResult<bool> {
        let base_query = format!(
            r#"
INSERT INTO "{0}"
    (case_id, exists_in_field, delivered, access_info, care_codes, kind)
VALUES
    ($1, $2, $3, $4, $5, $6)
ON CONFLICT (case_id) DO NOTHING
            "#,
            &self.table
        );

        let result = sqlx::query(&base_query)
            .bind(&entry.case_id)
            .bind(entry.exists_in_field)
            .bind(entry.delivered)
            .bind(&entry.access_info)
            .bind(&entry.care_codes)
            .bind(entry.kind)
            .execute(&self.pool)
            .await
            .map_err(|error| CacheError::QueryError {
                command: "INSERT".to_owned(),
                error,
            })?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete(&self, case_id: &str) -> CacheResult<bool> {
        let base_query = format!(r#"DELETE FROM "{0}" WHERE case_id = $1"#, &self.table);

        let result = sqlx::query(&base_query)
            .bind(case_id)
            .execute(&self.pool)
            .await
            .map_err(|error| CacheError::QueryError {
                command: "DELETE".to_owned(),
                error,
            })?;

        Ok(result.rows_affected() == 1)
    }
}

/// An in-memory `CaseCache` with the same contract as `PgCaseCache`.
/// Every operation takes the lock once, so `insert_if_absent` is atomic per key.
#[derive(Clone, Default)]
pub struct MemoryCaseCache {
    entries: Arc<RwLock<HashMap<String, CaseCacheEntry>>>,
    unavailable: bool,
}

impl MemoryCaseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A cache that fails every operation, to exercise store outages.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    /// Seed an entry, bypassing the trait.
    pub fn with_entry(self, entry: CaseCacheEntry) -> Self {
        self.write_entries()
            .insert(entry.case_id.clone(), entry);
        self
    }

    pub fn len(&self) -> usize {
        self.read_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_entries().is_empty()
    }

    pub fn snapshot(&self) -> HashMap<String, CaseCacheEntry> {
        self.read_entries().clone()
    }

    fn check_available(&self) -> CacheResult<()> {
        if self.unavailable {
            Err(CacheError::Unavailable("memory cache disabled".to_owned()))
        } else {
            Ok(())
        }
    }

    fn read_entries(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, CaseCacheEntry>> {
        match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_entries(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, CaseCacheEntry>> {
        match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl CaseCache for MemoryCaseCache {
    async fn get(&self, case_id: &str) -> CacheResult<Option<CaseCacheEntry>> {
        self.check_available()?;
        Ok(self.read_entries().get(case_id).cloned())
    }

    async fn put(&self, entry: &CaseCacheEntry) -> CacheResult<()> {
        self.check_available()?;
        self.write_entries()
            .insert(entry.case_id.clone(), entry.clone());
        Ok(())
    }

    async fn insert_if_absent(&self, entry: &CaseCacheEntry) -> CacheResult<bool> {
        self.check_available()?;
        let mut entries = self.write_entries();
        if entries.contains_key(&entry.case_id) {
            return Ok(false);
        }
        entries.insert(entry.case_id.clone(), entry.clone());
        Ok(true)
    }

    async fn delete(&self, case_id: &str) -> CacheResult<bool> {
        self.check_available()?;
        Ok(self.write_entries().remove(case_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(case_id: &str) -> CaseCacheEntry {
        CaseCacheEntry {
            access_info: Some("Ring the bell twice".to_owned()),
            care_codes: Some("1,2,Dangerous dog".to_owned()),
            ..CaseCacheEntry::new(case_id)
        }
    }

    #[tokio::test]
    async fn test_memory_cache_round_trip() {
        let cache = MemoryCaseCache::new();
        let written = entry("2b7a3a1e-7c12-4d52-a8a4-0f2c1a7d0e11");

        cache.put(&written).await.unwrap();
        let read = cache.get(&written.case_id).await.unwrap();

        assert_eq!(read, Some(written));
    }

    #[tokio::test]
    async fn test_memory_cache_put_replaces_whole_entry() {
        let cache = MemoryCaseCache::new().with_entry(entry("a"));

        cache.put(&CaseCacheEntry::new("a")).await.unwrap();

        let read = cache.get("a").await.unwrap().unwrap();
        assert_eq!(read.access_info, None);
        assert_eq!(read.care_codes, None);
    }

    #[tokio::test]
    async fn test_memory_cache_insert_if_absent() {
        let cache = MemoryCaseCache::new();

        assert!(cache.insert_if_absent(&entry("a")).await.unwrap());
        assert!(!cache
            .insert_if_absent(&CaseCacheEntry::new("a"))
            .await
            .unwrap());

        // The losing insert must not overwrite the first one.
        let read = cache.get("a").await.unwrap().unwrap();
        assert_eq!(read, entry("a"));
    }

    #[tokio::test]
    async fn test_memory_cache_delete() {
        let cache = MemoryCaseCache::new().with_entry(entry("a"));

        assert!(cache.delete("a").await.unwrap());
        assert!(!cache.delete("a").await.unwrap());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_memory_cache_fails() {
        let cache = MemoryCaseCache::unavailable();

        match cache.get("a").await {
            Err(CacheError::Unavailable(_)) => {}
            other => panic!("expected Unavailable, got {:?}", other),
        }
    }

    #[sqlx::test(migrations = "../migrations")]
    #[ignore = "requires a running PostgreSQL instance"]
    async fn test_pg_cache_round_trip(db: PgPool) {
        let cache = PgCaseCache::new_from_pool("gateway_cache", db);
        let written = entry("8ed3fc08-e95f-44db-a6d7-cde4e76a6182");

        assert_eq!(cache.get(&written.case_id).await.unwrap(), None);
        cache.put(&written).await.unwrap();

        let read = cache.get(&written.case_id).await.unwrap();
        assert_eq!(read, Some(written.clone()));

        let updated = CaseCacheEntry {
            delivered: true,
            ..written.clone()
        };
        cache.put(&updated).await.unwrap();
        assert_eq!(cache.get(&written.case_id).await.unwrap(), Some(updated));
    }

    #[sqlx::test(migrations = "../migrations")]
    #[ignore = "requires a running PostgreSQL instance"]
    async fn test_pg_cache_insert_if_absent(db: PgPool) {
        let cache = PgCaseCache::new_from_pool("gateway_cache", db);
        let first = entry("d8b1a0e9-51a6-4e0c-b6a4-66d8d1e0c001");

        assert!(cache.insert_if_absent(&first).await.unwrap());
        assert!(!cache
            .insert_if_absent(&CaseCacheEntry::new(&first.case_id))
            .await
            .unwrap());
        assert_eq!(cache.get(&first.case_id).await.unwrap(), Some(first.clone()));

        assert!(cache.delete(&first.case_id).await.unwrap());
        assert_eq!(cache.get(&first.case_id).await.unwrap(), None);
    }
}
