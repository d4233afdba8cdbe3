//! Catalog loader backed by a pgstac PostgreSQL database.
//!
//! Each worker owns a single connection. It is health-checked before use and
//! transparently re-established; if re-establishing fails the caller gets a
//! retryable `Transport` error.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::Connection;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, instrument, warn};

use stac_common::{CollectionDocument, StacError, StacResult};

/// How item records are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadMode {
    /// Fail on an existing id
    Insert,
    /// Replace an existing id
    #[default]
    Upsert,
}

impl LoadMode {
    fn item_sql(&self) -> &'static str {
        match self {
            LoadMode::Insert => "SELECT pgstac.create_item($1)",
            LoadMode::Upsert => "SELECT pgstac.upsert_item($1)",
        }
    }
}

impl FromStr for LoadMode {
    type Err = StacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "insert" => Ok(LoadMode::Insert),
            "upsert" => Ok(LoadMode::Upsert),
            other => Err(StacError::Config(format!("unknown load method: {}", other))),
        }
    }
}

impl fmt::Display for LoadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadMode::Insert => write!(f, "insert"),
            LoadMode::Upsert => write!(f, "upsert"),
        }
    }
}

/// Writes normalized records into the catalog.
#[async_trait]
pub trait CatalogLoader: Send {
    /// Load every record of an NDJSON file in one transaction.
    ///
    /// Returns the number of records written.
    async fn load_items(&mut self, ndjson_path: &Path, mode: LoadMode) -> StacResult<u64>;

    /// Create a collection. Fails if the id already exists.
    async fn create_collection(&mut self, collection: &CollectionDocument) -> StacResult<()>;
}

/// Where to connect.
#[derive(Clone, Default)]
pub struct DatabaseConfig {
    /// Full connection URL; when absent the libpq `PG*` variables are used
    pub url: Option<String>,
}

impl DatabaseConfig {
    fn connect_options(&self) -> StacResult<PgConnectOptions> {
        match &self.url {
            Some(url) => url
                .parse::<PgConnectOptions>()
                .map_err(|e| StacError::Config(format!("Invalid database URL: {}", e))),
            None => Ok(PgConnectOptions::new()),
        }
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = if self.url.is_some() { "url" } else { "PG* environment" };
        f.debug_struct("DatabaseConfig")
            .field("source", &source)
            .finish()
    }
}

/// pgstac catalog over one lazily opened connection.
pub struct PgStacCatalog {
    config: DatabaseConfig,
    conn: Option<PgConnection>,
}

impl PgStacCatalog {
    /// Create a catalog handle; the connection opens on first use.
    pub fn new(config: DatabaseConfig) -> StacResult<Self> {
        // Validate eagerly so a bad URL is a startup error.
        config.connect_options()?;
        Ok(Self { config, conn: None })
    }

    /// Create a catalog handle and open the connection now.
    pub async fn connect(config: DatabaseConfig) -> StacResult<Self> {
        let mut catalog = Self::new(config)?;
        catalog.ensure_healthy().await?;
        Ok(catalog)
    }

    /// Return a live connection, reconnecting if the current one is gone.
    pub async fn ensure_healthy(&mut self) -> StacResult<&mut PgConnection> {
        let alive = match self.conn.as_mut() {
            Some(conn) => match conn.ping().await {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "Catalog connection failed health check, reconnecting");
                    false
                }
            },
            None => false,
        };

        if !alive {
            let options = self.config.connect_options()?;
            let conn = PgConnection::connect_with(&options)
                .await
                .map_err(|e| StacError::Transport(format!("Catalog reconnect failed: {}", e)))?;
            info!("Catalog connection established");
            self.conn = Some(conn);
        }

        self.conn
            .as_mut()
            .ok_or_else(|| StacError::Transport("Catalog connection unavailable".to_string()))
    }

    /// Drop a connection that produced a connectivity error.
    fn discard_if_broken(&mut self, err: &StacError) {
        if err.is_retryable() {
            self.conn = None;
        }
    }
}

/// SQLSTATE classes that will fail identically on retry: data exceptions,
/// integrity violations, syntax/undefined objects and pgstac's own raises.
fn sqlstate_is_permanent(code: &str) -> bool {
    matches!(&code[..code.len().min(2)], "22" | "23" | "42" | "P0")
}

fn classify(what: &str, err: sqlx::Error) -> StacError {
    match &err {
        sqlx::Error::Database(db) => {
            let code = db.code().map(|c| c.into_owned()).unwrap_or_default();
            let reason = format!("{} failed [{}]: {}", what, code, db.message());
            if sqlstate_is_permanent(&code) {
                StacError::load_permanent(reason)
            } else {
                StacError::load_retryable(reason)
            }
        }
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::Encode(_) => StacError::load_permanent(format!("{} failed: {}", what, err)),
        _ => StacError::load_retryable(format!("{} failed: {}", what, err)),
    }
}

/// Parse the non-blank lines of an NDJSON file.
pub fn read_ndjson(path: &Path) -> StacResult<Vec<Value>> {
    let text = std::fs::read_to_string(path)?;
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .enumerate()
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|e| {
                StacError::MalformedInput(format!("{} line {}: {}", path.display(), i + 1, e))
            })
        })
        .collect()
}

#[async_trait]
impl CatalogLoader for PgStacCatalog {
    #[instrument(skip(self), fields(path = %ndjson_path.display()))]
    async fn load_items(&mut self, ndjson_path: &Path, mode: LoadMode) -> StacResult<u64> {
        let records = read_ndjson(ndjson_path)?;
        if records.is_empty() {
            return Err(StacError::MalformedInput(format!(
                "{} contains no records",
                ndjson_path.display()
            )));
        }

        let conn = self.ensure_healthy().await?;
        let result = async {
            let mut tx = conn.begin().await.map_err(|e| classify("BEGIN", e))?;
            for record in &records {
                sqlx::query(mode.item_sql())
                    .bind(record)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| classify("Item load", e))?;
            }
            tx.commit().await.map_err(|e| classify("COMMIT", e))?;
            Ok::<u64, StacError>(records.len() as u64)
        }
        .await;

        match &result {
            Ok(count) => debug!(count, %mode, "Loaded items"),
            Err(e) => self.discard_if_broken(e),
        }
        result
    }

    #[instrument(skip(self, collection), fields(collection = %collection.id()))]
    async fn create_collection(&mut self, collection: &CollectionDocument) -> StacResult<()> {
        let conn = self.ensure_healthy().await?;
        let result = sqlx::query("SELECT pgstac.create_collection($1)")
            .bind(collection.body())
            .execute(&mut *conn)
            .await
            .map(|_| ())
            .map_err(|e| classify("Collection load", e));

        if let Err(e) = &result {
            self.discard_if_broken(e);
        }
        result
    }
}
