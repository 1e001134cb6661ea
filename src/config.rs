use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::AppError;

/// Deployment environment, read once at startup from `APP_ENV`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Production,
    Development,
    Test,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

impl FromStr for Environment {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "production" | "prod" => Ok(Environment::Production),
            "development" | "dev" => Ok(Environment::Development),
            "test" => Ok(Environment::Test),
            other => Err(AppError::configuration(format!("APP_ENV '{other}' is not recognised"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub environment: Environment,
    pub session_secret: Arc<Vec<u8>>,
    pub session_ttl_hours: i64,
    pub principal_cache_ttl: Duration,
    pub principal_cache_capacity: u64,
    pub lookup_timeout: Duration,
    /// Development-only: authenticate every request as a fixed super admin.
    pub dev_bypass: bool,
}

impl AuthConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Unset means production: the bypass has to be asked for explicitly.
        let environment = match lookup("APP_ENV") {
            Some(value) => value.parse()?,
            None => Environment::Production,
        };

        let secret = lookup("SESSION_SECRET")
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::configuration("SESSION_SECRET not set"))?;

        Ok(Self {
            environment,
            session_secret: Arc::new(secret.into_bytes()),
            session_ttl_hours: parse_or(&lookup, "SESSION_TTL_HOURS", 24)?,
            principal_cache_ttl: Duration::from_secs(parse_or(&lookup, "PRINCIPAL_CACHE_TTL_SECS", 300)?),
            principal_cache_capacity: parse_or(&lookup, "PRINCIPAL_CACHE_CAPACITY", 10_000)?,
            lookup_timeout: Duration::from_millis(parse_or(&lookup, "AUTH_LOOKUP_TIMEOUT_MS", 5_000)?),
            dev_bypass: parse_or(&lookup, "AUTH_DEV_BYPASS", false)?,
        })
    }

    /// Config for tests and tooling; never reads the process environment.
    pub fn for_environment(environment: Environment, secret: &str) -> Self {
        Self {
            environment,
            session_secret: Arc::new(secret.as_bytes().to_vec()),
            session_ttl_hours: 24,
            principal_cache_ttl: Duration::from_secs(300),
            principal_cache_capacity: 10_000,
            lookup_timeout: Duration::from_secs(5),
            dev_bypass: false,
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::configuration(format!("{key} has an invalid value '{raw}'"))),
        None => Ok(default),
    }
}
