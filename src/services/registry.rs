//! src/services/registry.rs
//!
//! Archive registry: durable metadata for every live upload. The engine and
//! reclaimer only see the `ArchiveRegistry` trait; `SqliteRegistry` is the
//! production implementation over a shared sqlx pool.
//!
//! Each operation is a single statement, so SQLite's per-statement atomicity
//! is the only isolation relied on. No transaction spans a whole pass.

use crate::models::archive::Archive;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("archive not found")]
    NotFound,
    #[error("archive `{0}` conflicts with an existing record")]
    Conflict(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

#[async_trait]
pub trait ArchiveRegistry: Send + Sync {
    /// Insert a new record. `Conflict` if its name or token is taken.
    async fn insert(&self, archive: &Archive) -> RegistryResult<()>;

    async fn find_by_token(&self, token: &str) -> RegistryResult<Archive>;

    async fn delete_by_token(&self, token: &str) -> RegistryResult<()>;

    /// All records whose expiration is at or before `now`, oldest first.
    async fn list_expired(&self, now: DateTime<Utc>) -> RegistryResult<Vec<Archive>>;

    /// Remove a record by id. Returns whether a row was actually removed;
    /// a concurrent deleter getting there first is not an error.
    async fn delete_by_id(&self, id: Uuid) -> RegistryResult<bool>;
}

/// SQLite-backed registry.
#[derive(Clone)]
pub struct SqliteRegistry {
    db: Arc<SqlitePool>,
}

impl SqliteRegistry {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Apply the embedded schema, one statement at a time.
    pub async fn migrate(&self) -> RegistryResult<usize> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        for stmt in &statements {
            tracing::debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }

        Ok(statements.len())
    }
}

#[async_trait]
impl ArchiveRegistry for SqliteRegistry {
    async fn insert(&self, archive: &Archive) -> RegistryResult<()> {
        match sqlx::query(
            "INSERT INTO archives (id, name, upload, expiration, token)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(archive.id)
        .bind(&archive.name)
        .bind(archive.uploaded_at)
        .bind(archive.expires_at)
        .bind(&archive.token)
        .execute(&*self.db)
        .await
        {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => {
                Err(RegistryError::Conflict(archive.name.clone()))
            }
            Err(err) => Err(RegistryError::Sqlx(err)),
        }
    }

    async fn find_by_token(&self, token: &str) -> RegistryResult<Archive> {
        sqlx::query_as::<_, Archive>(
            "SELECT id, name, upload, expiration, token
             FROM archives WHERE token = ?",
        )
        .bind(token)
        .fetch_optional(&*self.db)
        .await?
        .ok_or(RegistryError::NotFound)
    }

    async fn delete_by_token(&self, token: &str) -> RegistryResult<()> {
        let result = sqlx::query("DELETE FROM archives WHERE token = ?")
            .bind(token)
            .execute(&*self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RegistryError::NotFound);
        }
        Ok(())
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> RegistryResult<Vec<Archive>> {
        let rows = sqlx::query_as::<_, Archive>(
            "SELECT id, name, upload, expiration, token
             FROM archives WHERE expiration <= ?
             ORDER BY expiration ASC",
        )
        .bind(now)
        .fetch_all(&*self.db)
        .await?;
        Ok(rows)
    }

    async fn delete_by_id(&self, id: Uuid) -> RegistryResult<bool> {
        let result = sqlx::query("DELETE FROM archives WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use sqlx::sqlite::SqlitePoolOptions;

    /// Fresh in-memory registry with the schema applied. One connection so
    /// every query sees the same in-memory database.
    pub(crate) async fn memory_registry() -> SqliteRegistry {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let registry = SqliteRegistry::new(Arc::new(pool));
        registry.migrate().await.unwrap();
        registry
    }

    pub(crate) fn archive(name: &str, token: &str, uploaded_at: DateTime<Utc>, lifetime: Duration) -> Archive {
        Archive {
            id: Uuid::new_v4(),
            name: name.to_string(),
            uploaded_at,
            expires_at: uploaded_at + lifetime,
            token: token.to_string(),
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn migrate_reports_statements() {
        let registry = memory_registry().await;
        assert_eq!(registry.migrate().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn insert_then_find_by_token() {
        let registry = memory_registry().await;
        let record = archive("abc.txt", "tok-1", t0(), Duration::hours(1));
        registry.insert(&record).await.unwrap();

        let found = registry.find_by_token("tok-1").await.unwrap();
        assert_eq!(found, record);
    }

    #[tokio::test]
    async fn unknown_token_is_not_found() {
        let registry = memory_registry().await;
        assert!(matches!(
            registry.find_by_token("missing").await,
            Err(RegistryError::NotFound)
        ));
        assert!(matches!(
            registry.delete_by_token("missing").await,
            Err(RegistryError::NotFound)
        ));
        assert!(matches!(
            registry.find_by_token("").await,
            Err(RegistryError::NotFound)
        ));
    }

    #[tokio::test]
    async fn duplicate_name_or_token_conflicts() {
        let registry = memory_registry().await;
        registry
            .insert(&archive("same", "tok-a", t0(), Duration::hours(1)))
            .await
            .unwrap();

        let same_name = archive("same", "tok-b", t0(), Duration::hours(1));
        assert!(matches!(
            registry.insert(&same_name).await,
            Err(RegistryError::Conflict(name)) if name == "same"
        ));

        let same_token = archive("other", "tok-a", t0(), Duration::hours(1));
        assert!(matches!(
            registry.insert(&same_token).await,
            Err(RegistryError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn delete_by_token_removes_once() {
        let registry = memory_registry().await;
        registry
            .insert(&archive("gone", "tok", t0(), Duration::hours(1)))
            .await
            .unwrap();

        registry.delete_by_token("tok").await.unwrap();
        assert!(matches!(
            registry.delete_by_token("tok").await,
            Err(RegistryError::NotFound)
        ));
    }

    #[tokio::test]
    async fn list_expired_uses_inclusive_cutoff() {
        let registry = memory_registry().await;
        let now = t0();
        let past = archive("past", "t1", now - Duration::days(2), Duration::days(1));
        let exact = archive("exact", "t2", now - Duration::minutes(10), Duration::minutes(10));
        let future = archive("future", "t3", now, Duration::milliseconds(1));
        for record in [&past, &exact, &future] {
            registry.insert(record).await.unwrap();
        }

        let expired = registry.list_expired(now).await.unwrap();
        let names: Vec<_> = expired.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["past", "exact"]);
    }

    #[tokio::test]
    async fn list_expired_orders_sub_second_timestamps() {
        let registry = memory_registry().await;
        let now = t0();
        // Mixed fractional precision must still compare chronologically.
        let a = archive("a", "ta", now - Duration::minutes(20), Duration::minutes(10) + Duration::milliseconds(500));
        let b = archive("b", "tb", now - Duration::minutes(20), Duration::minutes(10));
        let c = archive("c", "tc", now, Duration::milliseconds(250));
        for record in [&a, &b, &c] {
            registry.insert(record).await.unwrap();
        }

        let expired = registry.list_expired(now).await.unwrap();
        let names: Vec<_> = expired.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn delete_by_id_is_idempotent() {
        let registry = memory_registry().await;
        let record = archive("x", "tx", t0(), Duration::hours(1));
        registry.insert(&record).await.unwrap();

        assert!(registry.delete_by_id(record.id).await.unwrap());
        assert!(!registry.delete_by_id(record.id).await.unwrap());
    }
}
