use std::env;
use std::time::Duration;

use crate::error::DispatchError;

/// How long each armed timeout waits before the sweeper may act on it.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutPolicy {
    pub no_worker: chrono::Duration,
    pub trip_no_show: chrono::Duration,
    pub parcel_no_show: chrono::Duration,
    pub payment: chrono::Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            no_worker: chrono::Duration::seconds(120),
            trip_no_show: chrono::Duration::minutes(7),
            parcel_no_show: chrono::Duration::minutes(10),
            payment: chrono::Duration::minutes(15),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub event_buffer_size: usize,
    pub sweep_interval: Duration,
    pub timeouts: TimeoutPolicy,
}

impl Config {
    pub fn from_env() -> Result<Self, DispatchError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            sweep_interval: Duration::from_secs(parse_or_default("SWEEP_INTERVAL_SECS", 5)?),
            timeouts: TimeoutPolicy {
                no_worker: chrono::Duration::seconds(parse_or_default(
                    "NO_WORKER_TIMEOUT_SECS",
                    120,
                )?),
                trip_no_show: chrono::Duration::seconds(parse_or_default(
                    "TRIP_NO_SHOW_TIMEOUT_SECS",
                    420,
                )?),
                parcel_no_show: chrono::Duration::seconds(parse_or_default(
                    "PARCEL_NO_SHOW_TIMEOUT_SECS",
                    600,
                )?),
                payment: chrono::Duration::seconds(parse_or_default(
                    "PAYMENT_TIMEOUT_SECS",
                    900,
                )?),
            },
        })
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, DispatchError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| DispatchError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
