use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{Connection, OpenFlags};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument};

use crate::config::StoreConfig;
use crate::error::{wrap_store, Error, Result};
use crate::query::{self, InsertTemplate, SqlQuery};
use crate::value::{Conditions, Fields, Row, Value};

/// Returned by [`CrudStore::insert_rows_returning_id`] when the batch is empty.
pub const NO_ROW_ID: i64 = -1;

/// Everything needed to open a connection to the store file.
#[derive(Debug, Clone)]
pub struct ConnectionDescriptor {
    path: PathBuf,
    flags: OpenFlags,
    busy_timeout: Option<Duration>,
}

impl ConnectionDescriptor {
    fn from_config(config: &StoreConfig) -> Self {
        Self {
            path: config.store_path(),
            flags: OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            // SQLite takes the timeout as an i32 millisecond count.
            busy_timeout: config
                .busy_timeout()
                .map(|timeout| timeout.min(Duration::from_millis(i32::MAX as u64))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a fresh connection. It is closed when dropped.
    pub fn connect(&self) -> rusqlite::Result<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags)?;
        if let Some(timeout) = self.busy_timeout {
            conn.busy_timeout(timeout)?;
        }
        Ok(conn)
    }
}

impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file:{}", self.path.display())
    }
}

/// Create the store file if it is missing, seeding it from the base resource
/// when one is configured.
fn ensure_store_file(config: &StoreConfig) -> Result<()> {
    let path = config.store_path();
    if path.exists() {
        if path.is_file() {
            return Ok(());
        }
        return Err(Error::configuration(format!(
            "store path {} exists but is not a file",
            path.display()
        )));
    }
    fs::create_dir_all(&config.directory)?;

    if let Some(resource) = config.base_resource_path() {
        if !resource.is_file() {
            return Err(Error::configuration(format!(
                "base resource {} does not exist",
                resource.display()
            )));
        }
        return seed_store_file(&resource, &path, &config.directory);
    }

    match OpenOptions::new().write(true).create_new(true).open(&path) {
        Ok(_) => {
            info!(path = %path.display(), "created store file");
            Ok(())
        }
        // Another caller created it in the meantime.
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Stage the copy in `directory` and move it into place only once complete,
/// so an interrupted copy never shows up as an existing store.
fn seed_store_file(resource: &Path, path: &Path, directory: &Path) -> Result<()> {
    let mut staged = NamedTempFile::new_in(directory)?;
    io::copy(&mut File::open(resource)?, staged.as_file_mut())?;
    staged.as_file().sync_all()?;
    match staged.persist_noclobber(path) {
        Ok(_) => {
            info!(path = %path.display(), resource = %resource.display(), "seeded store file");
            Ok(())
        }
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e.error.into()),
    }
}

fn execute_batch(descriptor: &ConnectionDescriptor, statement: &str) -> Result<()> {
    debug!(statement, "executing statement");
    let conn = descriptor.connect()?;
    conn.execute_batch(statement)?;
    Ok(())
}

fn count(descriptor: &ConnectionDescriptor, query: &SqlQuery) -> Result<i64> {
    debug!(statement = %query.statement, "counting rows");
    let conn = descriptor.connect()?;
    let count = conn.query_row(&query.statement, [], |row| row.get(0))?;
    Ok(count)
}

/// Run the template once per row on a single connection. No transaction is
/// opened, so a failure leaves earlier rows committed.
fn insert_batch(
    descriptor: &ConnectionDescriptor,
    template: &InsertTemplate,
    rows: &[Row],
) -> Result<i64> {
    debug!(statement = %template.statement, rows = rows.len(), "inserting rows");
    let conn = descriptor.connect()?;
    let mut stmt = conn.prepare(&template.statement)?;
    for row in rows {
        let params = template.bind(row);
        stmt.execute(params.as_named().as_slice())?;
    }
    drop(stmt);
    let id = conn.query_row("SELECT last_insert_rowid()", [], |row| row.get(0))?;
    Ok(id)
}

fn read(descriptor: &ConnectionDescriptor, query: &SqlQuery) -> Result<Vec<Row>> {
    debug!(statement = %query.statement, "reading rows");
    let conn = descriptor.connect()?;
    let mut stmt = conn.prepare(&query.statement)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let params = query.params.as_named();
    let rows = stmt.query_map(params.as_slice(), |row| {
        let mut fields = Row::new();
        for (i, column) in columns.iter().enumerate() {
            fields.insert(column, row.get::<_, Value>(i)?);
        }
        Ok(fields)
    })?;
    let rows = rows.collect::<rusqlite::Result<Vec<_>>>()?;
    debug!(count = rows.len(), "read rows");
    Ok(rows)
}

/// Execute a single mutating statement, wrapping every SQLite failure with `context`.
fn mutate(
    descriptor: &ConnectionDescriptor,
    query: &SqlQuery,
    context: &'static str,
) -> Result<usize> {
    debug!(statement = %query.statement, "executing mutation");
    let conn = descriptor.connect().map_err(wrap_store(context))?;
    let changed = conn
        .execute(&query.statement, query.params.as_named().as_slice())
        .map_err(wrap_store(context))?;
    debug!(changed, "mutation applied");
    Ok(changed)
}

/// CRUD surface over a table-oriented store.
///
/// Arguments are validated before any connection is opened. Every call uses
/// its own connection.
#[async_trait]
pub trait CrudStore: Send + Sync {
    /// Run a statement that returns no rows.
    async fn execute_statement(&self, statement: &str) -> Result<()>;

    async fn is_table_empty(&self, table: &str) -> Result<bool>;

    /// Insert `rows` only when `table` has no rows. Returns whether the table was empty.
    async fn insert_if_empty(&self, table: &str, rows: Vec<Row>) -> Result<bool> {
        if !self.is_table_empty(table).await? {
            return Ok(false);
        }
        self.insert_rows(table, rows).await?;
        Ok(true)
    }

    /// Insert every row. All rows must name the same columns as the first,
    /// compared ASCII case-insensitively.
    async fn insert_rows(&self, table: &str, rows: Vec<Row>) -> Result<()>;

    /// Like [`insert_rows`](Self::insert_rows) but returns the rowid of the
    /// last inserted row, or [`NO_ROW_ID`] for an empty batch.
    async fn insert_rows_returning_id(&self, table: &str, rows: Vec<Row>) -> Result<i64>;

    /// All rows, ordered by the configured order column.
    async fn read_all(&self, table: &str) -> Result<Vec<Row>>;

    async fn read_where(&self, table: &str, conditions: &Conditions) -> Result<Vec<Row>>;

    /// Returns the number of rows changed.
    async fn update_where(
        &self,
        table: &str,
        values: &Fields,
        conditions: &Conditions,
    ) -> Result<usize>;

    async fn update_all(&self, table: &str, values: &Fields) -> Result<usize>;

    async fn delete_where(&self, table: &str, conditions: &Conditions) -> Result<usize>;
}

/// Handle to a single SQLite database file.
///
/// Holds no live connection; cloning is cheap.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    descriptor: Arc<ConnectionDescriptor>,
    order_column: Arc<str>,
}

impl SqliteStore {
    /// Open the store at `directory/file_name` with default settings.
    pub fn new(directory: impl Into<PathBuf>, file_name: impl Into<String>) -> Result<Self> {
        Self::open(StoreConfig::new(directory, file_name))
    }

    /// Validate `config` and create the store file if it does not exist.
    pub fn open(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        ensure_store_file(&config)?;
        Ok(Self {
            descriptor: Arc::new(ConnectionDescriptor::from_config(&config)),
            order_column: Arc::from(config.order_column.as_str()),
        })
    }

    pub fn path(&self) -> &Path {
        self.descriptor.path()
    }

    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    /// Column `read_all` orders by.
    pub fn order_column(&self) -> &str {
        &self.order_column
    }

    async fn run_blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&ConnectionDescriptor) -> Result<T> + Send + 'static,
    {
        let descriptor = Arc::clone(&self.descriptor);
        tokio::task::spawn_blocking(move || f(&descriptor))
            .await
            .map_err(|e| Error::Task(e.to_string()))?
    }

    async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<Option<i64>> {
        let Some(template) = InsertTemplate::for_rows(table, &rows)? else {
            debug!(table, "empty batch, nothing to insert");
            return Ok(None);
        };
        self.run_blocking(move |d| insert_batch(d, &template, &rows))
            .await
            .map(Some)
    }
}

#[async_trait]
impl CrudStore for SqliteStore {
    #[instrument(level = "debug", skip(self, statement))]
    async fn execute_statement(&self, statement: &str) -> Result<()> {
        if statement.trim().is_empty() {
            return Err(Error::argument("statement must not be empty"));
        }
        let statement = statement.to_string();
        self.run_blocking(move |d| execute_batch(d, &statement)).await
    }

    #[instrument(level = "debug", skip(self))]
    async fn is_table_empty(&self, table: &str) -> Result<bool> {
        let query = query::count_rows(table)?;
        let rows = self.run_blocking(move |d| count(d, &query)).await?;
        Ok(rows == 0)
    }

    #[instrument(level = "debug", skip(self, rows), fields(batch = rows.len()))]
    async fn insert_rows(&self, table: &str, rows: Vec<Row>) -> Result<()> {
        self.insert(table, rows).await.map(|_| ())
    }

    #[instrument(level = "debug", skip(self, rows), fields(batch = rows.len()))]
    async fn insert_rows_returning_id(&self, table: &str, rows: Vec<Row>) -> Result<i64> {
        Ok(self.insert(table, rows).await?.unwrap_or(NO_ROW_ID))
    }

    #[instrument(level = "debug", skip(self))]
    async fn read_all(&self, table: &str) -> Result<Vec<Row>> {
        let query = query::select_all(table, &self.order_column)?;
        self.run_blocking(move |d| read(d, &query)).await
    }

    #[instrument(level = "debug", skip(self, conditions))]
    async fn read_where(&self, table: &str, conditions: &Conditions) -> Result<Vec<Row>> {
        let query = query::select_where(table, conditions)?;
        self.run_blocking(move |d| read(d, &query)).await
    }

    #[instrument(level = "debug", skip(self, values, conditions))]
    async fn update_where(
        &self,
        table: &str,
        values: &Fields,
        conditions: &Conditions,
    ) -> Result<usize> {
        let query = query::update_where(table, values, conditions)?;
        self.run_blocking(move |d| mutate(d, &query, "update failed"))
            .await
    }

    #[instrument(level = "debug", skip(self, values))]
    async fn update_all(&self, table: &str, values: &Fields) -> Result<usize> {
        let query = query::update_all(table, values)?;
        self.run_blocking(move |d| mutate(d, &query, "update failed"))
            .await
    }

    #[instrument(level = "debug", skip(self, conditions))]
    async fn delete_where(&self, table: &str, conditions: &Conditions) -> Result<usize> {
        let query = query::delete_where(table, conditions)?;
        self.run_blocking(move |d| mutate(d, &query, "delete failed"))
            .await
    }
}
