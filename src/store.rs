//! SQLite host store.
//!
//! Hosts live in a single table:
//!
//! ```sql
//! CREATE TABLE hosts (hostname TEXT NOT NULL UNIQUE, apps TEXT)
//! ```
//!
//! Ingestion appends hostnames in batches, enrichment fills in `apps` with a
//! JSON object mapping technology name to version.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::analyze::{AppStore, HostnameSource};
use crate::record::Record;
use crate::sink::BatchStore;
use crate::{Error, Result};

/// Environment variable naming the database.
pub const DB_ENV: &str = "DB";

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS hosts (
    hostname TEXT NOT NULL UNIQUE,
    apps TEXT
)";
const INSERT_HOST: &str = "INSERT INTO hosts (hostname) VALUES (?1)";
const UPDATE_APPS: &str = "UPDATE hosts SET apps = ?1 WHERE hostname = ?2";
const SELECT_HOSTNAMES: &str = "SELECT hostname FROM hosts";

/// Where the store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub busy_timeout: Duration,
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout: Duration::from_secs(30),
        }
    }

    /// Parse a location, accepting an optional `sqlite://` prefix.
    pub fn parse(uri: &str) -> Result<Self> {
        let path = uri.strip_prefix("sqlite://").unwrap_or(uri).trim();
        if path.is_empty() {
            return Err(Error::Config("empty database location".to_string()));
        }
        Ok(Self::new(path))
    }

    /// Read the location from the `DB` environment variable.
    pub fn from_env() -> Result<Self> {
        match std::env::var(DB_ENV) {
            Ok(uri) => Self::parse(&uri),
            Err(_) => Err(Error::Config(format!(
                "please specify the database via environment {} (export {}=sqlite://hosts.db)",
                DB_ENV, DB_ENV
            ))),
        }
    }
}

/// Connection to the host store.
pub struct SqliteStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open a database file.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let conn = Connection::open(&config.path)?;
        conn.busy_timeout(config.busy_timeout)?;
        // Readers must not block the writer while enrichment scans the table.
        let mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        log::debug!("Journal mode {}", mode);
        log::info!("Connected to database {:?}", config.path);
        Ok(Self {
            conn,
            path: Some(config.path.clone()),
        })
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
            path: None,
        })
    }

    /// Database file, if not in memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Create the hosts table if it does not exist.
    pub fn ensure_schema(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Number of stored hosts.
    pub fn count(&self) -> Result<u64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM hosts", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    /// Stored technology map of a host.
    pub fn apps(&self, hostname: &str) -> Result<Option<String>> {
        let apps = self
            .conn
            .query_row(
                "SELECT apps FROM hosts WHERE hostname = ?1",
                params![hostname],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(apps.flatten())
    }
}

impl BatchStore for SqliteStore {
    fn begin(&mut self) -> Result<()> {
        // A statement that cannot be prepared fails every insert of the batch.
        self.conn.prepare_cached(INSERT_HOST)?;
        self.conn.execute_batch("BEGIN")?;
        Ok(())
    }

    fn insert(&mut self, record: &Record) -> Result<()> {
        let hostname = match record {
            Record::Dns(entry) => &entry.name,
            Record::Host(host) => &host.address,
        };
        let mut stmt = self.conn.prepare_cached(INSERT_HOST)?;
        stmt.execute(params![hostname])?;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }
}

impl HostnameSource for SqliteStore {
    fn scan(&mut self, visit: &mut dyn FnMut(String) -> Result<()>) -> Result<u64> {
        let mut stmt = self.conn.prepare(SELECT_HOSTNAMES)?;
        let mut rows = stmt.query([])?;
        let mut count = 0;

        while let Some(row) = rows.next()? {
            let hostname: String = row.get(0)?;
            visit(hostname)?;
            count += 1;
        }

        Ok(count)
    }
}

impl AppStore for SqliteStore {
    fn update_apps(&mut self, hostname: &str, apps: &str) -> Result<usize> {
        let mut stmt = self.conn.prepare_cached(UPDATE_APPS)?;
        Ok(stmt.execute(params![apps, hostname])?)
    }
}
