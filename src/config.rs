use std::{env, time::Duration};

use anyhow::Context;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_CONCURRENCY_LIMIT: usize = 100;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub db_max_connections: u32,
    pub concurrency_limit: usize,
    pub request_timeout: Duration,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup. Unparseable numbers fall back
    /// to their defaults.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").context("DATABASE_URL must be set")?;
        let host = lookup("APP_HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port = parse_or(&lookup, "APP_PORT", DEFAULT_PORT);
        let db_max_connections = parse_or(&lookup, "DB_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS);
        let concurrency_limit = parse_or(&lookup, "CONCURRENCY_LIMIT", DEFAULT_CONCURRENCY_LIMIT);
        let timeout_secs = parse_or(&lookup, "REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS);
        Ok(Self {
            port,
            database_url,
            host,
            db_max_connections,
            concurrency_limit,
            request_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|raw| raw.trim().parse::<T>().ok())
        .unwrap_or(default)
}
