//! SQLite task table and its prepared statements.
//!
//! [`TaskStore`] wraps a SQLite connection pool. Opening a store applies the
//! migrations found in the configured schema directory. Preparing a statement
//! compiles it against the live schema, which is the expensive step worth
//! caching, so callers go through a [`StatementCache`]: it prepares each
//! distinct statement once and releases all of them on close.

mod statement;

pub use statement::{ExecResult, GET_TASK, INSERT_TASK, LIST_TASKS, PreparedStatement, Value};

use crate::cache::{Preparer, ResourceCache};
use crate::common::{Error, Result, types::Task};
use core::str::FromStr;
use sqlx::Executor;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Statement cache over a [`TaskStore`], keyed by statement text.
pub type StatementCache = ResourceCache<TaskStore>;

/// Filename that opens a private in-memory database instead of a file.
pub const IN_MEMORY: &str = ":memory:";

/// Where the task database lives and how it is migrated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// Path of the SQLite file, created with its parent directory if missing,
    /// or [`IN_MEMORY`].
    pub filename: String,
    /// Directory of `<version>_<name>.sql` migrations applied on open. `None`
    /// opens the database as it is.
    pub schema_directory: Option<PathBuf>,
    /// Upper bound on pooled connections. In-memory databases always use one.
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            filename: "./data/data.db".to_owned(),
            schema_directory: Some(PathBuf::from("./schema")),
            max_connections: 4,
        }
    }
}

impl DatabaseConfig {
    /// An in-memory database migrated from `schema_directory`.
    pub fn in_memory(schema_directory: impl Into<PathBuf>) -> Self {
        Self {
            filename: IN_MEMORY.to_owned(),
            schema_directory: Some(schema_directory.into()),
            max_connections: 1,
        }
    }
}

/// Shared handle to the task database.
#[derive(Clone, Debug)]
pub struct TaskStore {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    pool: SqlitePool,
    prepared: AtomicUsize,
    open: AtomicUsize,
}

impl TaskStore {
    /// Opens (creating if needed) and migrates the database described by
    /// `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Database`] if the file cannot be created or opened,
    /// or if a migration fails.
    pub async fn open(config: &DatabaseConfig) -> Result<Self> {
        let pool = if config.filename == IN_MEMORY {
            // The database lives only as long as a connection to it, so the
            // pool keeps exactly one open.
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(SqliteConnectOptions::from_str("sqlite::memory:")?)
                .await?
        } else {
            let path = Path::new(&config.filename);
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|err| Error::Database {
                        message: format!("failed to create {}: {err}", parent.display()),
                    })?;
            }
            let options = SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal);
            SqlitePoolOptions::new()
                .max_connections(config.max_connections.max(1))
                .connect_with(options)
                .await?
        };

        let store = Self {
            inner: Arc::new(Inner {
                pool,
                prepared: AtomicUsize::new(0),
                open: AtomicUsize::new(0),
            }),
        };
        if let Some(directory) = &config.schema_directory {
            store.migrate(directory).await?;
        }

        tracing::debug!(filename = %config.filename, "task store opened");
        Ok(store)
    }

    /// Applies every migration in `directory` not yet recorded in the
    /// database.
    pub async fn migrate(&self, directory: &Path) -> Result<()> {
        let migrator = Migrator::new(directory).await?;
        migrator.run(&self.inner.pool).await?;
        tracing::debug!(directory = %directory.display(), "schema migrated");
        Ok(())
    }

    /// Total number of statements successfully prepared by this store.
    pub fn prepared_statements(&self) -> usize {
        self.inner.prepared.load(Ordering::Relaxed)
    }

    /// Number of prepared statements not yet released.
    pub fn open_statements(&self) -> usize {
        self.inner.open.load(Ordering::Relaxed)
    }

    /// Closes every pooled connection. Statements run afterwards fail.
    pub async fn close(&self) {
        self.inner.pool.close().await;
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.inner.pool
    }

    pub(crate) fn statement_released(&self) {
        self.inner.open.fetch_sub(1, Ordering::Relaxed);
    }
}

impl Preparer for TaskStore {
    type Resource = PreparedStatement;
    type Error = Error;

    fn prepare(&self, sql: &str) -> impl Future<Output = Result<PreparedStatement>> + Send {
        async move {
            let statement = self.inner.pool.prepare(sql).await?;
            let statement = sqlx::Statement::to_owned(&statement);
            self.inner.prepared.fetch_add(1, Ordering::Relaxed);
            self.inner.open.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(sql, "statement prepared");
            Ok(PreparedStatement::new(self.clone(), statement))
        }
    }
}

impl ResourceCache<TaskStore> {
    /// Prepares (or reuses) `sql` and runs it as a read.
    pub async fn query(&self, sql: &str, args: &[Value]) -> Result<Vec<Task>> {
        self.get(sql).await?.query(args).await
    }

    /// Prepares (or reuses) `sql` and runs it as a write.
    pub async fn execute(&self, sql: &str, args: &[Value]) -> Result<ExecResult> {
        self.get(sql).await?.execute(args).await
    }
}
