use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::debug;

use crate::config::ValidatorConfig;
use crate::models::{Direction, Signal, Trade};
use crate::tracking::quality::{self, QualityReport, TradeFlags};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    MissingStop,
    MissingTarget,
    MissingEntry,
    NegativePrice,
    StopWrongSide,
    TargetWrongSide,
    StopTooClose,
    TargetTooClose,
    ZeroRisk,
    RewardRiskTooLow,
    RewardRiskTooHigh,
    LowConfidence,
    ClusterLimit,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::MissingStop => "missing_sl",
            RejectReason::MissingTarget => "missing_tp",
            RejectReason::MissingEntry => "missing_entry",
            RejectReason::NegativePrice => "negative_price",
            RejectReason::StopWrongSide => "sl_wrong_side",
            RejectReason::TargetWrongSide => "tp_wrong_side",
            RejectReason::StopTooClose => "sl_too_close",
            RejectReason::TargetTooClose => "tp_too_close",
            RejectReason::ZeroRisk => "zero_risk",
            RejectReason::RewardRiskTooLow => "rr_too_low",
            RejectReason::RewardRiskTooHigh => "rr_too_high",
            RejectReason::LowConfidence => "low_confidence",
            RejectReason::ClusterLimit => "mass_signal",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub accepted: bool,
    pub reason: Option<RejectReason>,
    pub detail: String,
}

impl Verdict {
    fn pass() -> Self {
        Self {
            accepted: true,
            reason: None,
            detail: "OK".to_string(),
        }
    }

    fn reject(reason: RejectReason, detail: String) -> Self {
        Self {
            accepted: false,
            reason: Some(reason),
            detail,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidatorStats {
    pub checked: u64,
    pub passed: u64,
    pub rejected: u64,
    pub pass_rate: f64,
    pub by_reason: BTreeMap<String, u64>,
}

/// Gatekeeper between strategy output and the tracker. Session counters are
/// for monitoring only and never affect a verdict; the cluster counter is
/// reset at the start of each batch.
pub struct SignalValidator {
    cfg: ValidatorConfig,
    clusters: HashMap<(String, Direction), usize>,
    checked: u64,
    passed: u64,
    rejected: BTreeMap<RejectReason, u64>,
}

impl SignalValidator {
    pub fn new(cfg: ValidatorConfig) -> Self {
        Self {
            cfg,
            clusters: HashMap::new(),
            checked: 0,
            passed: 0,
            rejected: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.cfg
    }

    pub fn reset_cycle(&mut self) {
        self.clusters.clear();
    }

    pub fn validate(&mut self, sig: &Signal) -> Verdict {
        self.checked += 1;
        let verdict = self.check(sig);
        match verdict.reason {
            Some(reason) => {
                *self.rejected.entry(reason).or_insert(0) += 1;
                debug!("Rejected {} {}: {} ({})", sig.strategy_id, sig.symbol, reason, verdict.detail);
            }
            None => self.passed += 1,
        }
        verdict
    }

    fn check(&mut self, sig: &Signal) -> Verdict {
        let entry = sig.entry_price;
        let stop = sig.stop_loss;
        let targets = sig.targets();
        let dir = sig.direction;

        if stop == 0.0 || !stop.is_finite() {
            return Verdict::reject(RejectReason::MissingStop, format!("SL=0 for {}", sig.symbol));
        }
        let Some(&tp) = targets.first() else {
            return Verdict::reject(RejectReason::MissingTarget, format!("TP=0 for {}", sig.symbol));
        };
        if entry == 0.0 || !entry.is_finite() {
            return Verdict::reject(RejectReason::MissingEntry, format!("Entry=0 for {}", sig.symbol));
        }
        if entry < 0.0 || stop < 0.0 || targets.iter().any(|t| *t < 0.0) {
            return Verdict::reject(RejectReason::NegativePrice, format!("Entry={} SL={}", entry, stop));
        }

        if !dir.is_loss_side(entry, stop) {
            return Verdict::reject(
                RejectReason::StopWrongSide,
                format!("{} but SL({}) on profit side of entry({})", dir, stop, entry),
            );
        }
        if let Some(bad) = targets.iter().find(|t| !dir.is_profit_side(entry, **t)) {
            return Verdict::reject(
                RejectReason::TargetWrongSide,
                format!("{} but TP({}) on loss side of entry({})", dir, bad, entry),
            );
        }

        let stop_dist = (entry - stop).abs() / entry;
        if stop_dist < self.cfg.min_stop_distance_pct {
            return Verdict::reject(
                RejectReason::StopTooClose,
                format!("SL distance={:.6} < {}", stop_dist, self.cfg.min_stop_distance_pct),
            );
        }
        let target_dist = (tp - entry).abs() / entry;
        if target_dist < self.cfg.min_target_distance_pct {
            return Verdict::reject(
                RejectReason::TargetTooClose,
                format!("TP distance={:.6} < {}", target_dist, self.cfg.min_target_distance_pct),
            );
        }

        let risk = (entry - stop).abs();
        if risk <= 0.0 {
            return Verdict::reject(RejectReason::ZeroRisk, "Risk=0".to_string());
        }
        let rr = (tp - entry).abs() / risk;
        if rr < self.cfg.min_rr {
            return Verdict::reject(
                RejectReason::RewardRiskTooLow,
                format!("R:R={:.2} < {}", rr, self.cfg.min_rr),
            );
        }
        if rr > self.cfg.max_rr {
            return Verdict::reject(
                RejectReason::RewardRiskTooHigh,
                format!("R:R={:.2} > {}", rr, self.cfg.max_rr),
            );
        }

        if !sig.confidence.is_finite() || sig.confidence < self.cfg.min_confidence {
            return Verdict::reject(
                RejectReason::LowConfidence,
                format!("Confidence={} < {}", sig.confidence, self.cfg.min_confidence),
            );
        }

        let count = self
            .clusters
            .entry((sig.symbol.clone(), dir))
            .or_insert(0);
        *count += 1;
        if *count > self.cfg.cluster_cap {
            return Verdict::reject(
                RejectReason::ClusterLimit,
                format!("{} {} already has {} signals this cycle", sig.symbol, dir, self.cfg.cluster_cap),
            );
        }

        Verdict::pass()
    }

    /// Validate one cycle's candidates, best confidence first so the cluster
    /// cap keeps the strongest signals.
    pub fn validate_batch(&mut self, mut signals: Vec<Signal>) -> Vec<Signal> {
        self.reset_cycle();
        signals.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        signals
            .into_iter()
            .filter(|s| self.validate(s).accepted)
            .collect()
    }

    pub fn stats(&self) -> ValidatorStats {
        let rejected: u64 = self.rejected.values().sum();
        ValidatorStats {
            checked: self.checked,
            passed: self.passed,
            rejected,
            pass_rate: (self.passed as f64 / self.checked.max(1) as f64 * 1000.0).round() / 10.0,
            by_reason: self
                .rejected
                .iter()
                .map(|(r, n)| (r.as_str().to_string(), *n))
                .collect(),
        }
    }

    pub fn flag_trade(&self, trade: &Trade) -> TradeFlags {
        quality::flag_trade(trade, &self.cfg)
    }

    pub fn flag_quality(&self, trades: &[Trade]) -> QualityReport {
        quality::flag_quality(trades)
    }
}
