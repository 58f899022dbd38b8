use std::sync::Arc;

use libsql::{Builder, Connection};

use crate::config::DatabaseConfig;
use crate::error::Result;

use super::schema;

/// Where the database lives, derived from `DATABASE_URL` and
/// `DATABASE_LOCAL_PATH`.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Location {
    Memory,
    File(String),
    Remote { url: String, token: String },
    /// Local file kept in sync with a remote primary.
    Replica { path: String, url: String, token: String },
}

impl Location {
    fn from_config(config: &DatabaseConfig) -> Self {
        let url = config.url.as_str();
        let remote = ["libsql://", "https://", "http://"]
            .iter()
            .any(|scheme| url.starts_with(scheme));

        if !remote {
            return match url {
                ":memory:" => Self::Memory,
                _ => Self::File(url.strip_prefix("file:").unwrap_or(url).to_string()),
            };
        }

        let token = config.auth_token.clone().unwrap_or_default();
        match &config.local_path {
            Some(path) => Self::Replica {
                path: path.clone(),
                url: url.to_string(),
                token,
            },
            None => Self::Remote {
                url: url.to_string(),
                token,
            },
        }
    }

    async fn open(&self) -> Result<libsql::Database> {
        let db = match self {
            Self::Memory => Builder::new_local(":memory:").build().await?,
            Self::File(path) => Builder::new_local(path).build().await?,
            Self::Remote { url, token } => {
                Builder::new_remote(url.clone(), token.clone()).build().await?
            }
            Self::Replica { path, url, token } => {
                Builder::new_remote_replica(path, url.clone(), token.clone())
                    .build()
                    .await?
            }
        };
        Ok(db)
    }
}

/// SQLite tuning read from `DATABASE_BUSY_TIMEOUT_MS`,
/// `DATABASE_JOURNAL_MODE` and `DATABASE_SYNCHRONOUS`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Pragmas {
    busy_timeout_ms: u64,
    journal_mode: &'static str,
    synchronous: &'static str,
}

impl Pragmas {
    const JOURNAL_MODES: &'static [&'static str] =
        &["WAL", "DELETE", "TRUNCATE", "PERSIST", "MEMORY", "OFF"];
    const SYNCHRONOUS_LEVELS: &'static [&'static str] = &["NORMAL", "OFF", "FULL", "EXTRA"];

    fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok();
        Self::parse(
            var("DATABASE_BUSY_TIMEOUT_MS").as_deref(),
            var("DATABASE_JOURNAL_MODE").as_deref(),
            var("DATABASE_SYNCHRONOUS").as_deref(),
        )
    }

    /// Unknown or missing values fall back to the first entry of each list.
    fn parse(busy_timeout_ms: Option<&str>, journal_mode: Option<&str>, synchronous: Option<&str>) -> Self {
        fn pick(allowed: &'static [&'static str], value: Option<&str>) -> &'static str {
            value
                .and_then(|value| {
                    allowed
                        .iter()
                        .find(|mode| mode.eq_ignore_ascii_case(value.trim()))
                })
                .copied()
                .unwrap_or(allowed[0])
        }

        Self {
            busy_timeout_ms: busy_timeout_ms
                .and_then(|value| value.trim().parse().ok())
                .unwrap_or(5000),
            journal_mode: pick(Self::JOURNAL_MODES, journal_mode),
            synchronous: pick(Self::SYNCHRONOUS_LEVELS, synchronous),
        }
    }

    async fn apply(&self, conn: &Connection) {
        let statements = [
            ("busy_timeout", self.busy_timeout_ms.to_string()),
            ("journal_mode", self.journal_mode.to_string()),
            ("synchronous", self.synchronous.to_string()),
        ];
        for (pragma, value) in statements {
            if let Err(error) = conn.execute_batch(&format!("PRAGMA {pragma} = {value}")).await {
                tracing::warn!(pragma, value = %value, error = %error, "Failed to apply SQLite pragma");
            }
        }
    }
}

/// Shared handle to the message store.
#[derive(Clone)]
pub struct Database {
    inner: Arc<libsql::Database>,
    replica: bool,
}

impl Database {
    /// Opens the database and creates the schema if needed.
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let location = Location::from_config(config);
        let database = Self {
            inner: Arc::new(location.open().await?),
            replica: matches!(location, Location::Replica { .. }),
        };

        let conn = database.connect()?;
        if !matches!(location, Location::Remote { .. }) {
            Pragmas::from_env().apply(&conn).await;
        }
        schema::init_schema(&conn, config.embedding_dimensions).await?;

        Ok(database)
    }

    pub fn connect(&self) -> Result<Connection> {
        Ok(self.inner.connect()?)
    }

    /// Pulls and pushes replica frames. Databases that are not embedded
    /// replicas have nothing to sync.
    pub async fn sync(&self) -> Result<()> {
        if !self.replica {
            tracing::debug!("Not a replica, skipping sync");
            return Ok(());
        }

        match self.inner.sync().await {
            Ok(replicated) => {
                tracing::info!(?replicated, "Database synced");
                Ok(())
            }
            Err(error) => {
                tracing::warn!(error = %error, "Database sync failed");
                Err(error.into())
            }
        }
    }
}
