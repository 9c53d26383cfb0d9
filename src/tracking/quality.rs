use chrono::Timelike;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::config::ValidatorConfig;
use crate::models::{Direction, Outcome, Trade};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Clean,
    Suspect,
    Unreliable,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityFlag {
    HighRecovery,
    PerfectWrSuspicious,
    SurvivorshipBias,
    DirectionBias,
    DateClustering,
    TimeClustering,
    DuplicatePnl,
    LowPnlDiversity,
    DuplicateEntryPrice,
    AllRecoveryExits,
    NoLossesSuspicious,
}

impl QualityFlag {
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            QualityFlag::SurvivorshipBias
                | QualityFlag::AllRecoveryExits
                | QualityFlag::PerfectWrSuspicious
                | QualityFlag::DuplicateEntryPrice
                | QualityFlag::DateClustering
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub quality: Quality,
    pub flags: Vec<QualityFlag>,
    pub clean_trades: usize,
    pub total_trades: usize,
    pub recovery_pct: f64,
    pub win_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeFlags {
    pub recovery: bool,
    pub missing_stop: bool,
    pub abnormal_rr: bool,
    pub rr_value: f64,
}

pub fn flag_trade(trade: &Trade, cfg: &ValidatorConfig) -> TradeFlags {
    let recovery = trade.exit_reason.is_some_and(|r| r.is_recovery());
    let missing_stop = trade.initial_stop == 0.0;
    let risk = trade.initial_risk();
    if trade.entry_price != 0.0 && !missing_stop && trade.tp1 != 0.0 && risk > 0.0 {
        let rr = (trade.tp1 - trade.entry_price).abs() / risk;
        TradeFlags {
            recovery,
            missing_stop,
            abnormal_rr: rr > cfg.max_rr || rr < cfg.min_rr,
            rr_value: (rr * 100.0).round() / 100.0,
        }
    } else {
        TradeFlags {
            recovery,
            missing_stop,
            abnormal_rr: true,
            rr_value: 0.0,
        }
    }
}

/// Heuristic reliability assessment of a strategy's closed history.
pub fn flag_quality(trades: &[Trade]) -> QualityReport {
    let total = trades.len();
    if total == 0 {
        return QualityReport {
            quality: Quality::Unknown,
            flags: Vec::new(),
            clean_trades: 0,
            total_trades: 0,
            recovery_pct: 0.0,
            win_rate: 0.0,
        };
    }

    let mut flags = Vec::new();
    let share = |n: usize| n as f64 / total as f64 * 100.0;

    let is_recovery = |t: &Trade| t.exit_reason.is_some_and(|r| r.is_recovery());
    let recoveries = trades.iter().filter(|t| is_recovery(t)).count();
    let recovery_pct = share(recoveries);
    if recovery_pct > 50.0 {
        flags.push(QualityFlag::HighRecovery);
    }

    let wins = trades.iter().filter(|t| t.outcome == Some(Outcome::Win)).count();
    let win_rate = share(wins);
    if wins == total && total >= 10 {
        flags.push(QualityFlag::PerfectWrSuspicious);
    }
    if wins == total && total >= 5 && recoveries > 0 {
        flags.push(QualityFlag::SurvivorshipBias);
    }

    if total >= 10 {
        let longs = share(trades.iter().filter(|t| t.direction == Direction::Long).count());
        if !(10.0..=90.0).contains(&longs) {
            flags.push(QualityFlag::DirectionBias);
        }
    }

    let max_bucket = |keys: Vec<String>| -> usize {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for k in keys {
            *counts.entry(k).or_insert(0) += 1;
        }
        counts.into_values().max().unwrap_or(0)
    };

    let dates = trades
        .iter()
        .map(|t| t.opened_at.format("%Y-%m-%d").to_string())
        .collect();
    if max_bucket(dates) as f64 / total as f64 > 0.6 {
        flags.push(QualityFlag::DateClustering);
    }
    let hours = trades.iter().map(|t| t.opened_at.hour().to_string()).collect();
    if max_bucket(hours) as f64 / total as f64 > 0.8 {
        flags.push(QualityFlag::TimeClustering);
    }

    let unique_pnls: HashSet<i64> = trades
        .iter()
        .map(|t| (t.pnl_pips * 100.0).round() as i64)
        .collect();
    if total >= 5 && unique_pnls.len() <= 2 {
        flags.push(QualityFlag::DuplicatePnl);
    }
    if total >= 20 && unique_pnls.len() <= 5 {
        flags.push(QualityFlag::LowPnlDiversity);
    }

    let entries = trades
        .iter()
        .filter(|t| t.entry_price != 0.0)
        .map(|t| format!("{:.4}", t.entry_price))
        .collect();
    if total >= 5 && max_bucket(entries) as f64 / total as f64 > 0.7 {
        flags.push(QualityFlag::DuplicateEntryPrice);
    }

    if total >= 5 {
        let reasons: HashSet<_> = trades.iter().map(|t| t.exit_reason).collect();
        if reasons.len() == 1 && trades.iter().all(is_recovery) {
            flags.push(QualityFlag::AllRecoveryExits);
        }
    }

    let total_pnl: f64 = trades.iter().map(|t| t.pnl_usd).sum();
    let has_losses = trades.iter().any(|t| t.outcome == Some(Outcome::Loss));
    if total_pnl > 0.0 && !has_losses && total >= 10 {
        flags.push(QualityFlag::NoLossesSuspicious);
    }

    let clean_trades = trades
        .iter()
        .filter(|t| !is_recovery(t) && t.initial_stop != 0.0)
        .count();

    let quality = if flags.iter().any(|f| f.is_critical()) || flags.len() >= 3 {
        Quality::Unreliable
    } else if !flags.is_empty() {
        Quality::Suspect
    } else {
        Quality::Clean
    };

    QualityReport {
        quality,
        flags,
        clean_trades,
        total_trades: total,
        recovery_pct: (recovery_pct * 10.0).round() / 10.0,
        win_rate: (win_rate * 10.0).round() / 10.0,
    }
}
