//! Configuration management for the patient sync engine

use std::env;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::sync::{DropoutGuard, ReconcileOptions, RetryPolicy, TiePolicy};

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    pub device: DeviceConfig,
    pub reconcile: ReconcileConfig,
    pub retry: RetryConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// Written into `syncMeta.updatedBy` on push
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileConfig {
    pub grace_period_ms: i64,
    pub tie_policy: TiePolicy,
    pub dropout_min_local: usize,
    pub dropout_max_removal_ratio: f64,
    pub dropout_max_remote_ratio: f64,
}

/// Raw retry settings; validated by [`SyncConfig::retry_policy`]
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: i64,
    pub base_delay_ms: i64,
    pub attempt_timeout_ms: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let guard = DropoutGuard::default();
        SyncConfig {
            device: DeviceConfig {
                id: "local-device".to_string(),
            },
            reconcile: ReconcileConfig {
                grace_period_ms: 30_000,
                tie_policy: TiePolicy::default(),
                dropout_min_local: guard.min_local_count,
                dropout_max_removal_ratio: guard.max_removal_ratio,
                dropout_max_remote_ratio: guard.max_remote_ratio,
            },
            retry: RetryConfig {
                max_attempts: 3,
                base_delay_ms: 1_000,
                attempt_timeout_ms: 15_000,
            },
            database: DatabaseConfig {
                url: "sqlite:./patients.db".to_string(),
            },
        }
    }
}

impl SyncConfig {
    /// Load `.env` if present, then read the environment
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    /// Read settings from the environment, falling back to defaults for
    /// unset variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = SyncConfig::default();

        let tie_policy = match env::var("SYNC_TIE_POLICY") {
            Ok(raw) => raw.parse::<TiePolicy>()?,
            Err(_) => defaults.reconcile.tie_policy,
        };

        Ok(SyncConfig {
            device: DeviceConfig {
                id: env::var("SYNC_DEVICE_ID").unwrap_or(defaults.device.id),
            },
            reconcile: ReconcileConfig {
                grace_period_ms: parse_var(
                    "SYNC_GRACE_PERIOD_MS",
                    defaults.reconcile.grace_period_ms,
                )?,
                tie_policy,
                dropout_min_local: parse_var(
                    "SYNC_DROPOUT_MIN_LOCAL",
                    defaults.reconcile.dropout_min_local,
                )?,
                dropout_max_removal_ratio: parse_var(
                    "SYNC_DROPOUT_MAX_REMOVAL_RATIO",
                    defaults.reconcile.dropout_max_removal_ratio,
                )?,
                dropout_max_remote_ratio: parse_var(
                    "SYNC_DROPOUT_MAX_REMOTE_RATIO",
                    defaults.reconcile.dropout_max_remote_ratio,
                )?,
            },
            retry: RetryConfig {
                max_attempts: parse_var("SYNC_MAX_ATTEMPTS", defaults.retry.max_attempts)?,
                base_delay_ms: parse_var("SYNC_BASE_DELAY_MS", defaults.retry.base_delay_ms)?,
                attempt_timeout_ms: parse_var(
                    "SYNC_ATTEMPT_TIMEOUT_MS",
                    defaults.retry.attempt_timeout_ms,
                )?,
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or(defaults.database.url),
            },
        })
    }

    pub fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions {
            grace_period_ms: self.reconcile.grace_period_ms,
            tie_policy: self.reconcile.tie_policy,
            dropout_guard: DropoutGuard {
                min_local_count: self.reconcile.dropout_min_local,
                max_removal_ratio: self.reconcile.dropout_max_removal_ratio,
                max_remote_ratio: self.reconcile.dropout_max_remote_ratio,
            },
        }
    }

    pub fn retry_policy(&self) -> Result<RetryPolicy, ConfigError> {
        Ok(RetryPolicy::new(
            self.retry.max_attempts,
            self.retry.base_delay_ms,
            self.retry.attempt_timeout_ms,
        )?)
    }
}

fn parse_var<T: FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { var, value: raw }),
        Err(_) => Ok(default),
    }
}
