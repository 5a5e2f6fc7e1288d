use super::TaskStore;
use crate::cache::Release;
use crate::common::{Error, Result, types::Task};
use chrono::{DateTime, Utc};
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteRow, SqliteStatement};
use sqlx::{Row, Statement};
use std::sync::atomic::{AtomicBool, Ordering};

/// Lists every task ordered by id. Takes no arguments.
pub const LIST_TASKS: &str = "select id, created, title, description from tasks order by id";

/// Fetches a single task. Takes the task id.
pub const GET_TASK: &str = "select id, created, title, description from tasks where id = ?";

/// Inserts a task. Takes the creation time, the title and the description.
pub const INSERT_TASK: &str = "insert into tasks (created, title, description) values (?, ?, ?)";

/// A statement argument.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    Id(u64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Self::Id(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}

/// Outcome of a write statement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExecResult {
    pub last_insert_id: u64,
    pub rows_affected: u64,
}

/// A statement prepared against a [`TaskStore`].
///
/// Reads (statements that return columns) run through [`query`](Self::query),
/// everything else through [`execute`](Self::execute). Statements are safe to
/// share between tasks. Once released, every further use fails with
/// [`Error::StatementReleased`].
#[derive(Debug)]
pub struct PreparedStatement {
    statement: SqliteStatement<'static>,
    store: TaskStore,
    released: AtomicBool,
}

impl PreparedStatement {
    pub(crate) fn new(store: TaskStore, statement: SqliteStatement<'static>) -> Self {
        Self {
            statement,
            store,
            released: AtomicBool::new(false),
        }
    }

    pub fn sql(&self) -> &str {
        self.statement.sql()
    }

    /// Number of `?` parameters the statement expects.
    pub fn params(&self) -> usize {
        self.statement
            .parameters()
            .map_or(0, |params| params.either(<[_]>::len, |count| count))
    }

    /// Runs a read statement and returns the matching tasks.
    pub async fn query(&self, args: &[Value]) -> Result<Vec<Task>> {
        self.check(args, "query", true)?;
        let rows = bind(self.statement.query(), args)?
            .fetch_all(self.store.pool())
            .await?;
        rows.iter().map(task_from_row).collect()
    }

    /// Runs a write statement.
    pub async fn execute(&self, args: &[Value]) -> Result<ExecResult> {
        self.check(args, "execute", false)?;
        let done = bind(self.statement.query(), args)?
            .execute(self.store.pool())
            .await?;
        let last_insert_id =
            u64::try_from(done.last_insert_rowid()).map_err(|_| Error::Database {
                message: format!("invalid row id {}", done.last_insert_rowid()),
            })?;
        Ok(ExecResult {
            last_insert_id,
            rows_affected: done.rows_affected(),
        })
    }

    fn check(&self, args: &[Value], operation: &'static str, read: bool) -> Result<()> {
        if self.released.load(Ordering::Acquire) {
            return Err(Error::StatementReleased);
        }
        if self.statement.columns().is_empty() == read {
            return Err(Error::StatementKind {
                sql: self.sql().to_owned(),
                operation,
            });
        }
        let expected = self.params();
        if args.len() != expected {
            return Err(Error::InvalidArguments {
                reason: format!("expected {expected} arguments, got {}", args.len()),
            });
        }
        Ok(())
    }
}

impl Release for PreparedStatement {
    type Error = Error;

    fn release(&self) -> Result<()> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Err(Error::StatementReleased);
        }
        self.store.statement_released();
        Ok(())
    }
}

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

fn bind<'q>(mut query: SqliteQuery<'q>, args: &[Value]) -> Result<SqliteQuery<'q>> {
    for (position, arg) in args.iter().enumerate() {
        query = match arg {
            Value::Id(id) => {
                let id = i64::try_from(*id).map_err(|_| Error::InvalidArguments {
                    reason: format!("argument {position} is out of range: {id}"),
                })?;
                query.bind(id)
            }
            Value::Text(text) => query.bind(text.clone()),
            Value::Timestamp(ts) => query.bind(*ts),
        };
    }
    Ok(query)
}

// NULL columns read as empty values.
fn task_from_row(row: &SqliteRow) -> Result<Task> {
    let id: i64 = row.try_get("id")?;
    let created: Option<DateTime<Utc>> = row.try_get("created")?;
    let title: Option<String> = row.try_get("title")?;
    let description: Option<String> = row.try_get("description")?;

    Ok(Task {
        id: u64::try_from(id).map_err(|_| Error::Database {
            message: format!("invalid task id {id}"),
        })?,
        created: created.unwrap_or_default(),
        title: title.unwrap_or_default(),
        description: description.unwrap_or_default(),
    })
}
