use std::time::Duration;

use anyhow::{Context, Result};
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub database_url: String,
    /// Event publishing is skipped when unset.
    pub redis_url: Option<String>,
    pub http_addr: String,
    pub db_max_connections: u32,
    pub lock_timeout: Duration,
    /// Companies whose system account map is checked at startup.
    pub company_ids: Vec<Uuid>,
}

impl ServiceConfig {
    pub fn from_env(default_http_addr: &str) -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is required")?;
        let redis_url = std::env::var("REDIS_URL")
            .ok()
            .filter(|value| !value.trim().is_empty());
        let http_addr =
            std::env::var("HTTP_ADDR").unwrap_or_else(|_| default_http_addr.to_string());

        let db_max_connections = match std::env::var("DB_MAX_CONNECTIONS") {
            Ok(raw) => raw
                .parse()
                .context("DB_MAX_CONNECTIONS must be a positive integer")?,
            Err(_) => 10,
        };
        let lock_timeout_ms: u64 = match std::env::var("LOCK_TIMEOUT_MS") {
            Ok(raw) => raw
                .parse()
                .context("LOCK_TIMEOUT_MS must be a number of milliseconds")?,
            Err(_) => 5_000,
        };
        let company_ids = match std::env::var("PKS_COMPANY_IDS") {
            Ok(raw) => parse_company_ids(&raw)?,
            Err(_) => Vec::new(),
        };

        Ok(Self {
            database_url,
            redis_url,
            http_addr,
            db_max_connections,
            lock_timeout: Duration::from_millis(lock_timeout_ms),
            company_ids,
        })
    }
}

fn parse_company_ids(raw: &str) -> Result<Vec<Uuid>> {
    raw.split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| {
            Uuid::parse_str(value)
                .with_context(|| format!("invalid company id in PKS_COMPANY_IDS: {value}"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn company_ids_are_comma_separated() {
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let parsed = parse_company_ids(&format!("{first}, {second},")).unwrap();
        assert_eq!(parsed, vec![first, second]);
        assert!(parse_company_ids("not-a-uuid").is_err());
    }
}
