//! Credentials loading and validation.
//!
//! Pipeline projects keep database credentials in a YAML file under a
//! `credentials.postgres` mapping:
//!
//! ```yaml
//! credentials:
//!   postgres:
//!     host: db.internal
//!     port: 5432
//!     dbname: inventory
//!     user: pipeline
//!     password: secret
//! ```

use std::fmt;
use std::path::Path;

use serde::Deserialize;

use crate::error::{DbError, Result};

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Credential entries, keyed by backend.
    pub credentials: Credentials,
}

/// Credential entries.
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    /// PostgreSQL connection details.
    pub postgres: PostgresCredentials,
}

/// PostgreSQL connection details.
#[derive(Clone, Deserialize)]
pub struct PostgresCredentials {
    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub dbname: String,

    /// Username.
    pub user: String,

    /// Password.
    pub password: String,
}

fn default_pg_port() -> u16 {
    5432
}

// Keeps the password out of logs and error output.
impl fmt::Debug for PostgresCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresCredentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        let pg = &self.credentials.postgres;
        if pg.host.is_empty() {
            return Err(DbError::Config(
                "credentials.postgres.host is required".into(),
            ));
        }
        if pg.dbname.is_empty() {
            return Err(DbError::Config(
                "credentials.postgres.dbname is required".into(),
            ));
        }
        if pg.user.is_empty() {
            return Err(DbError::Config(
                "credentials.postgres.user is required".into(),
            ));
        }
        if pg.port == 0 {
            return Err(DbError::Config(
                "credentials.postgres.port must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// The PostgreSQL credentials entry.
    pub fn db_credentials(&self) -> &PostgresCredentials {
        &self.credentials.postgres
    }
}

impl PostgresCredentials {
    /// Build a connection string for tokio-postgres.
    pub fn connection_string(&self) -> String {
        format!(
            "host={} port={} dbname={} user={} password={}",
            self.host, self.port, self.dbname, self.user, self.password
        )
    }
}
