use std::env;

use crate::error::CatalogError;
use crate::query::DeletePolicy;

const DEFAULT_DATABASE_URL: &str = "catalog.db";
const DEFAULT_POOL_SIZE: u32 = 8;
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Config {
    pub database_url: String,
    pub pool_size: u32,
    pub redis_url: Option<String>,
    pub host: String,
    pub port: u16,
    pub delete_policy: DeletePolicy,
}

impl Config {
    /// Reads the configuration from the process environment. Call after
    /// `dotenv::dotenv()` so a local `.env` file is honoured.
    pub(crate) fn from_env() -> Result<Self, CatalogError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, CatalogError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let pool_size = match var("DATABASE_POOL_SIZE") {
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(0) | Err(_) => {
                    return Err(CatalogError::Config(format!(
                        "DATABASE_POOL_SIZE must be a positive integer, got '{}'",
                        raw
                    )))
                }
                Ok(size) => size,
            },
            None => DEFAULT_POOL_SIZE,
        };

        let port = match var("PORT") {
            Some(raw) => raw.trim().parse::<u16>().map_err(|_| {
                CatalogError::Config(format!("PORT must be a valid port number, got '{}'", raw))
            })?,
            None => DEFAULT_PORT,
        };

        let delete_policy = match var("DELETE_POLICY") {
            Some(raw) => raw.parse()?,
            None => DeletePolicy::default(),
        };

        Ok(Config {
            database_url: var("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            pool_size,
            redis_url: var("REDIS_URL"),
            host: var("BIND_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
            delete_policy,
        })
    }
}
