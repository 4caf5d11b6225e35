use std::time::Duration;

use crate::errors::AppError;

/// Service settings read from the environment (after `.env` is loaded).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    pub access_log_workers: usize,
    pub access_log_queue_capacity: usize,
    pub access_log_shutdown: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let database_url = std::env::var("DATABASE_URL").map_err(|_| AppError::configuration("DATABASE_URL not set"))?;

        Ok(Self {
            database_url,
            port: env_or("APP_PORT", 8000)?,
            access_log_workers: env_or("ACCESS_LOG_WORKERS", 2)?,
            access_log_queue_capacity: env_or("ACCESS_LOG_QUEUE_CAPACITY", 1024)?,
            access_log_shutdown: Duration::from_secs(env_or("ACCESS_LOG_SHUTDOWN_SECS", 5)?),
        })
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::configuration(format!("{key} must be a valid integer"))),
        Err(_) => Ok(default),
    }
}
