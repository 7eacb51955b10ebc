use std::env;
use std::net::SocketAddr;

use crate::error::ServerError;

const DEFAULT_DATABASE_URL: &str = "sqlite:progress.sqlite3?mode=rwc";
const DEFAULT_BIND: &str = "127.0.0.1:8787";

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub database_url: String,
    pub bind: SocketAddr,
}

impl ServerConfig {
    /// Read `PROGRESS_DB_URL` and `PROGRESS_BIND`, with local defaults.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::InvalidBind` if the bind address does not parse.
    pub fn from_env() -> Result<Self, ServerError> {
        let database_url = env::var("PROGRESS_DB_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DATABASE_URL.into());
        let bind = env::var("PROGRESS_BIND")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BIND.into());
        Self::new(database_url, &bind)
    }

    /// # Errors
    ///
    /// Returns `ServerError::InvalidBind` if `bind` does not parse.
    pub fn new(database_url: impl Into<String>, bind: &str) -> Result<Self, ServerError> {
        let bind = bind
            .trim()
            .parse()
            .map_err(|_| ServerError::InvalidBind {
                raw: bind.to_string(),
            })?;
        Ok(Self {
            database_url: database_url.into(),
            bind,
        })
    }
}
