use anyhow::{Context, Result};
use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, ErrorCode, OptionalExtension};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use super::{Kind, ObjectStore, Revision, StoreError, Versioned};

pub type DbPool = Pool<SqliteConnectionManager>;

/// Initialize database with connection pool and run migrations
pub fn init_db(path: &Path) -> Result<DbPool> {
    info!("Initializing database at: {:?}", path);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create data directory {:?}", parent))?;
        }
    }

    let manager = SqliteConnectionManager::file(path)
        .with_init(|conn| conn.busy_timeout(Duration::from_secs(5)));
    let pool = Pool::builder()
        .max_size(10)
        .build(manager)
        .context("Failed to create connection pool")?;

    let conn = pool.get().context("Failed to get database connection")?;
    run_migrations(&conn)?;

    info!("Database initialized successfully");
    Ok(pool)
}

fn run_migrations(conn: &Connection) -> Result<()> {
    let migrations = [include_str!("../../migrations/001_objects.sql")];

    for (i, migration) in migrations.iter().enumerate() {
        info!("Running migration {}", i + 1);
        conn.execute_batch(migration)
            .with_context(|| format!("Failed to run migration {}", i + 1))?;
    }

    Ok(())
}

/// Helper for async database operations (spawn_blocking wrapper)
pub async fn execute_async<F, T>(pool: &DbPool, f: F) -> Result<T, StoreError>
where
    F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let conn = pool.get().context("Failed to get database connection")?;
        f(&conn)
    })
    .await
    .context("Task join error")?
}

fn now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

fn backend(err: rusqlite::Error, what: &str) -> StoreError {
    StoreError::Backend(anyhow::Error::new(err).context(what.to_string()))
}

fn current_revision(conn: &Connection, kind: Kind, name: &str) -> Result<Option<Revision>, StoreError> {
    conn.query_row(
        "SELECT revision FROM objects WHERE kind = ?1 AND name = ?2",
        rusqlite::params![kind.as_str(), name],
        |row| row.get::<_, i64>(0),
    )
    .optional()
    .map(|rev| rev.map(|r| r as Revision))
    .map_err(|e| backend(e, "Failed to query revision"))
}

/// SQLite-backed object store. One row per object, revision bumped on
/// every write.
#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(init_db(path)?))
    }
}

#[async_trait]
impl ObjectStore for SqliteStore {
    async fn get(&self, kind: Kind, name: &str) -> Result<Option<Versioned>, StoreError> {
        let name = name.to_string();
        execute_async(&self.pool, move |conn| {
            conn.query_row(
                "SELECT data, revision FROM objects WHERE kind = ?1 AND name = ?2",
                rusqlite::params![kind.as_str(), name],
                |row| {
                    Ok(Versioned {
                        data: row.get(0)?,
                        revision: row.get::<_, i64>(1)? as Revision,
                    })
                },
            )
            .optional()
            .map_err(|e| backend(e, "Failed to get object"))
        })
        .await
    }

    async fn create(&self, kind: Kind, name: &str, data: String) -> Result<Revision, StoreError> {
        let name = name.to_string();
        execute_async(&self.pool, move |conn| {
            match conn.execute(
                "INSERT INTO objects (kind, name, data, revision, updated_at)
                 VALUES (?1, ?2, ?3, 1, ?4)",
                rusqlite::params![kind.as_str(), name, data, now()],
            ) {
                Ok(_) => {
                    debug!("Created {} {}", kind, name);
                    Ok(1)
                }
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == ErrorCode::ConstraintViolation =>
                {
                    Err(StoreError::AlreadyExists { kind, name })
                }
                Err(e) => Err(backend(e, "Failed to insert object")),
            }
        })
        .await
    }

    async fn update(
        &self,
        kind: Kind,
        name: &str,
        data: String,
        expected: Revision,
    ) -> Result<Revision, StoreError> {
        let name = name.to_string();
        execute_async(&self.pool, move |conn| {
            let rows_updated = conn
                .execute(
                    "UPDATE objects SET data = ?1, revision = revision + 1, updated_at = ?2
                     WHERE kind = ?3 AND name = ?4 AND revision = ?5",
                    rusqlite::params![data, now(), kind.as_str(), name, expected as i64],
                )
                .map_err(|e| backend(e, "Failed to update object"))?;

            if rows_updated == 1 {
                debug!("Updated {} {} to revision {}", kind, name, expected + 1);
                return Ok(expected + 1);
            }

            match current_revision(conn, kind, &name)? {
                Some(actual) => Err(StoreError::Conflict {
                    kind,
                    name,
                    expected,
                    actual,
                }),
                None => Err(StoreError::NotFound { kind, name }),
            }
        })
        .await
    }

    async fn create_or_update(
        &self,
        kind: Kind,
        name: &str,
        data: String,
    ) -> Result<Revision, StoreError> {
        let name = name.to_string();
        execute_async(&self.pool, move |conn| {
            conn.query_row(
                "INSERT INTO objects (kind, name, data, revision, updated_at)
                 VALUES (?1, ?2, ?3, 1, ?4)
                 ON CONFLICT(kind, name) DO UPDATE SET
                     data = excluded.data,
                     revision = objects.revision + 1,
                     updated_at = excluded.updated_at
                 RETURNING revision",
                rusqlite::params![kind.as_str(), name, data, now()],
                |row| row.get::<_, i64>(0),
            )
            .map(|rev| rev as Revision)
            .map_err(|e| backend(e, "Failed to upsert object"))
        })
        .await
    }

    async fn delete(&self, kind: Kind, name: &str) -> Result<bool, StoreError> {
        let name = name.to_string();
        execute_async(&self.pool, move |conn| {
            let rows_deleted = conn
                .execute(
                    "DELETE FROM objects WHERE kind = ?1 AND name = ?2",
                    rusqlite::params![kind.as_str(), name],
                )
                .map_err(|e| backend(e, "Failed to delete object"))?;
            Ok(rows_deleted > 0)
        })
        .await
    }

    async fn list(&self, kind: Kind) -> Result<Vec<(String, Versioned)>, StoreError> {
        execute_async(&self.pool, move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT name, data, revision FROM objects WHERE kind = ?1 ORDER BY name",
                )
                .map_err(|e| backend(e, "Failed to prepare statement"))?;

            let objects = stmt
                .query_map(rusqlite::params![kind.as_str()], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        Versioned {
                            data: row.get(1)?,
                            revision: row.get::<_, i64>(2)? as Revision,
                        },
                    ))
                })
                .map_err(|e| backend(e, "Failed to query objects"))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| backend(e, "Failed to collect objects"))?;

            Ok(objects)
        })
        .await
    }
}
