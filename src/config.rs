//! Configuration for the ledger and the analytics engine
//!
//! Both structs deserialize from TOML with every field optional; omitted fields take the
//! defaults below.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::ConfigError;
use crate::journal::JournalLevel;
use crate::transaction::TransactionKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Retries after the store reports that its tail moved
    pub max_append_retries: u32,
    /// Base delay between retries; each attempt adds random jitter up to the same amount
    pub retry_backoff_ms: u64,
    /// Per-subscriber buffer of the change notifier
    pub notifier_capacity: usize,
    pub journal_capacity: usize,
    pub journal_level: JournalLevel,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_append_retries: 3,
            retry_backoff_ms: 5,
            notifier_capacity: 1024,
            journal_capacity: 10_000,
            journal_level: JournalLevel::Info,
        }
    }
}

impl LedgerConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.notifier_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "notifier_capacity".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn with_max_append_retries(mut self, retries: u32) -> Self {
        self.max_append_retries = retries;
        self
    }

    pub fn with_retry_backoff_ms(mut self, ms: u64) -> Self {
        self.retry_backoff_ms = ms;
        self
    }

    pub fn with_notifier_capacity(mut self, capacity: usize) -> Self {
        self.notifier_capacity = capacity;
        self
    }
}

/// Longest accepted forecast look-back, in days
pub const MAX_FORECAST_WINDOW_DAYS: i64 = 36_500;

/// Thresholds and policies used by the anomaly detectors and stock forecasts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// First UTC hour considered working time
    pub working_hours_start: u32,
    /// First UTC hour after working time
    pub working_hours_end: u32,
    /// The only role expected to perform MOVE
    pub logistics_role: String,
    /// Ordered stages stock is expected to pass through
    pub logistics_route: Vec<String>,
    /// Outlier threshold in standard deviations above the mean
    pub sigma_multiplier: f64,
    /// Quantities at or below this are never statistical outliers
    pub quantity_floor: u64,
    /// Transaction kinds considered normal for each role
    pub role_policies: BTreeMap<String, BTreeSet<TransactionKind>>,
    /// Look-back window for outflow velocity
    pub forecast_window_days: i64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        use TransactionKind::*;

        let profile = [UserUpdateProfile, UserChangePassword];
        let mut role_policies = BTreeMap::new();
        role_policies.insert(
            "Admin".to_string(),
            TransactionKind::ALL.iter().copied().filter(|k| *k != Genesis).collect(),
        );
        role_policies.insert(
            "Inventory Manager".to_string(),
            [CreateItem, StockIn, StockOut, Move, AdminEditItem, DeleteItem]
                .into_iter()
                .chain(profile)
                .collect(),
        );
        role_policies.insert(
            "Warehouse Staff".to_string(),
            [StockIn, StockOut, Move].into_iter().chain(profile).collect(),
        );
        role_policies.insert(
            "Logistics".to_string(),
            [Move].into_iter().chain(profile).collect(),
        );
        role_policies.insert("Auditor".to_string(), profile.into_iter().collect());

        Self {
            working_hours_start: 6,
            working_hours_end: 22,
            logistics_role: "Logistics".to_string(),
            logistics_route: vec![
                "Warehouse".to_string(),
                "Distribution Center".to_string(),
                "Retailer".to_string(),
            ],
            sigma_multiplier: 3.0,
            quantity_floor: 10,
            role_policies,
            forecast_window_days: 30,
        }
    }
}

impl AnalyticsConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.working_hours_start > 23 || self.working_hours_end > 24 {
            return Err(ConfigError::Invalid {
                field: "working_hours".to_string(),
                reason: "hours must lie within a day".to_string(),
            });
        }
        if self.working_hours_start >= self.working_hours_end {
            return Err(ConfigError::Invalid {
                field: "working_hours".to_string(),
                reason: "start must precede end".to_string(),
            });
        }
        if !self.sigma_multiplier.is_finite() || self.sigma_multiplier < 0.0 {
            return Err(ConfigError::Invalid {
                field: "sigma_multiplier".to_string(),
                reason: "must be a non-negative number".to_string(),
            });
        }
        if self.forecast_window_days <= 0 || self.forecast_window_days > MAX_FORECAST_WINDOW_DAYS {
            return Err(ConfigError::Invalid {
                field: "forecast_window_days".to_string(),
                reason: format!("must lie in 1..={}", MAX_FORECAST_WINDOW_DAYS),
            });
        }
        Ok(())
    }

    pub fn with_working_hours(mut self, start: u32, end: u32) -> Self {
        self.working_hours_start = start;
        self.working_hours_end = end;
        self
    }

    pub fn with_sigma_multiplier(mut self, sigma: f64) -> Self {
        self.sigma_multiplier = sigma;
        self
    }

    pub fn with_quantity_floor(mut self, floor: u64) -> Self {
        self.quantity_floor = floor;
        self
    }

    pub fn with_logistics_route(mut self, route: Vec<String>) -> Self {
        self.logistics_route = route;
        self
    }

    /// Whether `kind` is normal for `role`. Unknown roles have no normal kinds.
    pub fn is_typical(&self, role: &str, kind: TransactionKind) -> bool {
        self.role_policies
            .get(role)
            .map(|kinds| kinds.contains(&kind))
            .unwrap_or(false)
    }
}
