use std::str::FromStr;

use anyhow::Context;
use serde::Deserialize;

use crate::billing::Pricing;
use crate::usage::UsageLimits;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

/// Page size bounds for query endpoints.
#[derive(Debug, Clone, Copy)]
pub struct QueryConfig {
    pub default_limit: i64,
    pub max_limit: i64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_limit: 100,
            max_limit: 10_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub jwt: JwtConfig,
    pub limits: UsageLimits,
    pub pricing: Pricing,
    pub query: QueryConfig,
}

fn required(key: &str) -> anyhow::Result<String> {
    std::env::var(key).with_context(|| format!("{key} must be set"))
}

/// Parses `key` when present; a malformed value is an error, not a fallback.
fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(v) => v.trim().parse().with_context(|| format!("parse {key}")),
        Err(_) => Ok(default),
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = required("DATABASE_URL")?;
        let jwt = JwtConfig {
            secret: required("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "dataportal".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "dataportal-users".into()),
            ttl_minutes: env_or("JWT_TTL_MINUTES", 30)?,
            refresh_ttl_minutes: env_or("JWT_REFRESH_TTL_MINUTES", 60 * 24 * 7)?,
        };
        let defaults = QueryConfig::default();
        let query = QueryConfig {
            default_limit: env_or("QUERY_DEFAULT_LIMIT", defaults.default_limit)?,
            max_limit: env_or("QUERY_MAX_LIMIT", defaults.max_limit)?,
        };
        if query.max_limit < 1 || !(1..=query.max_limit).contains(&query.default_limit) {
            anyhow::bail!("QUERY_DEFAULT_LIMIT must be between 1 and QUERY_MAX_LIMIT");
        }

        Ok(Self {
            database_url,
            max_connections: env_or("DB_MAX_CONNECTIONS", 10)?,
            jwt,
            limits: UsageLimits::from_env()?,
            pricing: Pricing::from_env()?,
            query,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_or_falls_back_and_rejects_garbage() {
        assert_eq!(env_or("DATAPORTAL_TEST_UNSET_KEY", 7u32).unwrap(), 7);

        std::env::set_var("DATAPORTAL_TEST_MAX_CONN", " 25 ");
        assert_eq!(env_or("DATAPORTAL_TEST_MAX_CONN", 10u32).unwrap(), 25);

        std::env::set_var("DATAPORTAL_TEST_BAD_LIMIT", "lots");
        let err = env_or("DATAPORTAL_TEST_BAD_LIMIT", 100i64).unwrap_err();
        assert!(err.to_string().contains("DATAPORTAL_TEST_BAD_LIMIT"));
    }

    #[test]
    fn query_defaults() {
        let q = QueryConfig::default();
        assert_eq!((q.default_limit, q.max_limit), (100, 10_000));
    }
}
