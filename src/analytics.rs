//! # Anomaly & Analytics Engine
//!
//! Read-side scans over the full chain. Three detectors run independently and may flag the
//! same block:
//!
//! - **Rule-based**: off-hours activity, moves by a role other than logistics, and moves that
//!   skip a stage of the logistics route.
//! - **Statistical**: per transaction kind, quantities above `mean + k·σ` (population σ) that
//!   also exceed an absolute floor.
//! - **Behavioral**: the first time, in chain order, that an actor performs a kind atypical for
//!   their role.
//!
//! Also provides `daysToEmpty` forecasts from recent outflow.

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::debug;

use crate::config::AnalyticsConfig;
use crate::error::{ConfigError, LedgerError};
use crate::replay_engine::{Cutoff, ReplayEngine};
use crate::transaction::{Actor, Transaction, TransactionKind};
use crate::types::{Block, BlockHash};

/// One flagged block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyFlag {
    pub index: u64,
    pub hash: BlockHash,
    pub timestamp: DateTime<Utc>,
    pub kind: TransactionKind,
    pub actor: Option<Actor>,
    /// Ranking key; higher is more suspicious
    pub score: f64,
    pub reasons: Vec<String>,
}

impl AnomalyFlag {
    fn new(block: &Block, score: f64, reasons: Vec<String>) -> Self {
        Self {
            index: block.index,
            hash: block.hash,
            timestamp: block.timestamp,
            kind: block.transaction.kind(),
            actor: block.transaction.actor().cloned(),
            score,
            reasons,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyReport {
    pub rule_based: Vec<AnomalyFlag>,
    pub statistical: Vec<AnomalyFlag>,
    pub behavioral: Vec<AnomalyFlag>,
    /// Distinct blocks flagged by at least one detector
    pub flagged_unique: usize,
    /// Non-genesis blocks scanned
    pub total_transactions: usize,
    pub flagged_percentage: f64,
}

/// Projected depletion of one SKU
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockForecast {
    pub sku: String,
    pub stock: u64,
    pub avg_daily_outflow: f64,
    /// `None` when there was no outflow in the window
    pub days_to_empty: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct AnomalyEngine {
    config: AnalyticsConfig,
    replay: ReplayEngine,
}

impl AnomalyEngine {
    pub fn new(config: AnalyticsConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            replay: ReplayEngine::new(),
        })
    }

    /// Replay engine used to rebuild stock for forecasts
    pub fn with_replay_engine(mut self, replay: ReplayEngine) -> Self {
        self.replay = replay;
        self
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    /// Run all three detectors over `chain`
    pub fn scan(&self, chain: &[Block]) -> AnomalyReport {
        let (rule_based, (statistical, behavioral)) = rayon::join(
            || self.rule_based(chain),
            || rayon::join(|| self.statistical(chain), || self.behavioral(chain)),
        );

        let flagged: HashSet<u64> = rule_based
            .iter()
            .chain(&statistical)
            .chain(&behavioral)
            .map(|f| f.index)
            .collect();
        let total_transactions = chain.iter().filter(|b| !b.is_genesis()).count();
        let flagged_percentage = if total_transactions == 0 {
            0.0
        } else {
            flagged.len() as f64 * 100.0 / total_transactions as f64
        };

        debug!(
            rule_based = rule_based.len(),
            statistical = statistical.len(),
            behavioral = behavioral.len(),
            flagged = flagged.len(),
            total_transactions,
            "Anomaly scan complete"
        );

        AnomalyReport {
            rule_based,
            statistical,
            behavioral,
            flagged_unique: flagged.len(),
            total_transactions,
            flagged_percentage,
        }
    }

    /// Off-hours activity and logistics violations. Scored by the number of rules hit.
    pub fn rule_based(&self, chain: &[Block]) -> Vec<AnomalyFlag> {
        let mut flags: Vec<AnomalyFlag> = chain
            .iter()
            .filter(|b| !b.is_genesis())
            .filter_map(|block| {
                let reasons = self.rule_violations(block);
                (!reasons.is_empty()).then(|| AnomalyFlag::new(block, reasons.len() as f64, reasons))
            })
            .collect();
        rank(&mut flags);
        flags
    }

    fn rule_violations(&self, block: &Block) -> Vec<String> {
        let mut reasons = Vec::new();

        let hour = block.timestamp.hour();
        if hour < self.config.working_hours_start || hour >= self.config.working_hours_end {
            reasons.push(format!("Activity at {:02}:00 UTC is outside working hours", hour));
        }

        if let Transaction::Move(movement) = &block.transaction {
            if movement.actor.role != self.config.logistics_role {
                reasons.push(format!(
                    "MOVE performed by role '{}' instead of '{}'",
                    movement.actor.role, self.config.logistics_role
                ));
            }

            let route = &self.config.logistics_route;
            let stage = |name: &str| route.iter().position(|s| s == name);
            if let (Some(from), Some(to)) = (stage(&movement.from_location), stage(&movement.to_location)) {
                if to > from + 1 {
                    let skipped = route[from + 1..to].join(", ");
                    reasons.push(format!(
                        "MOVE from {} to {} skips {}",
                        movement.from_location, movement.to_location, skipped
                    ));
                }
            }
        }
        reasons
    }

    /// Quantity outliers per transaction kind. Scored by z-score.
    pub fn statistical(&self, chain: &[Block]) -> Vec<AnomalyFlag> {
        let mut by_kind: BTreeMap<TransactionKind, Vec<(&Block, u64)>> = BTreeMap::new();
        for block in chain.iter().filter(|b| !b.is_genesis()) {
            if let Some(quantity) = block.transaction.quantity() {
                by_kind
                    .entry(block.transaction.kind())
                    .or_default()
                    .push((block, quantity));
            }
        }

        let mut flags = Vec::new();
        for (kind, samples) in &by_kind {
            let n = samples.len() as f64;
            let mean = samples.iter().map(|(_, q)| *q as f64).sum::<f64>() / n;
            let variance = samples
                .iter()
                .map(|(_, q)| (*q as f64 - mean).powi(2))
                .sum::<f64>()
                / n;
            let std_dev = variance.sqrt();
            let threshold = mean + self.config.sigma_multiplier * std_dev;

            for (block, quantity) in samples {
                let q = *quantity as f64;
                if q > threshold && *quantity > self.config.quantity_floor && std_dev > 0.0 {
                    let z = (q - mean) / std_dev;
                    flags.push(AnomalyFlag::new(
                        block,
                        z,
                        vec![format!(
                            "{} quantity {} is {:.2}σ above the mean {:.2}",
                            kind, quantity, z, mean
                        )],
                    ));
                }
            }
        }
        rank(&mut flags);
        flags
    }

    /// First atypical kind per actor, in chain order. Scored by severity.
    pub fn behavioral(&self, chain: &[Block]) -> Vec<AnomalyFlag> {
        let mut seen: HashMap<&str, BTreeSet<TransactionKind>> = HashMap::new();
        let mut flags = Vec::new();

        for block in chain.iter().filter(|b| !b.is_genesis()) {
            // Blocks appended without a stamped actor have no identity to track.
            let Some(actor) = block.transaction.actor().filter(|a| !a.employee_id.is_empty()) else {
                continue;
            };
            let kind = block.transaction.kind();
            let first_time = seen.entry(actor.employee_id.as_str()).or_default().insert(kind);
            if !first_time || self.config.is_typical(&actor.role, kind) {
                continue;
            }

            let role = if actor.role.is_empty() { "unknown" } else { actor.role.as_str() };
            flags.push(AnomalyFlag::new(
                block,
                self.severity(&actor.role, kind),
                vec![format!("First {} by {} (role '{}')", kind, actor.employee_id, role)],
            ));
        }
        rank(&mut flags);
        flags
    }

    // Administrative kinds outrank inventory kinds, which outrank profile edits.
    // Roles the policy does not know are one step more severe.
    fn severity(&self, role: &str, kind: TransactionKind) -> f64 {
        let base = if !kind.is_mutating() {
            1.0
        } else if kind.affects_inventory() {
            2.0
        } else {
            3.0
        };
        if self.config.role_policies.contains_key(role) {
            base
        } else {
            base + 1.0
        }
    }

    /// Days until each live SKU runs out at its recent `STOCK_OUT` rate.
    ///
    /// Stock is taken from the chain as of `reference`; outflow is averaged over the configured
    /// window ending there.
    pub fn forecast(
        &self,
        chain: &[Block],
        reference: DateTime<Utc>,
    ) -> Result<Vec<StockForecast>, LedgerError> {
        let days = self.config.forecast_window_days;
        let window_start = reference
            .checked_sub_signed(Duration::days(days))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut outflow: HashMap<&str, u64> = HashMap::new();
        for block in chain {
            if block.timestamp <= window_start || block.timestamp > reference {
                continue;
            }
            if let Transaction::StockOut(change) = &block.transaction {
                let total = outflow.entry(change.sku.as_str()).or_default();
                *total = total.saturating_add(change.quantity);
            }
        }

        let snapshot = self.replay.state_at(chain, Cutoff::Timestamp(reference))?;
        let forecasts = snapshot
            .state
            .active_products()
            .map(|product| {
                let stock = product.total_stock();
                let avg_daily_outflow =
                    outflow.get(product.sku.as_str()).copied().unwrap_or(0) as f64 / days as f64;
                let days_to_empty = (avg_daily_outflow > 0.0).then(|| stock as f64 / avg_daily_outflow);
                StockForecast {
                    sku: product.sku.clone(),
                    stock,
                    avg_daily_outflow,
                    days_to_empty,
                }
            })
            .collect();
        Ok(forecasts)
    }
}

/// Score descending, then most recent block first
fn rank(flags: &mut [AnomalyFlag]) {
    flags.sort_by(|a, b| b.score.total_cmp(&a.score).then(b.index.cmp(&a.index)));
}
