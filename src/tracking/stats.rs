use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::models::{Outcome, Trade};
use crate::tracking::store::StrategyRecord;

const EQUITY_POINTS: usize = 100;
/// Reported when a strategy has profits and no losing trades.
const PROFIT_FACTOR_CAP: f64 = 99.9;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SymbolStats {
    pub total: usize,
    pub wins: usize,
    pub win_rate: f64,
    pub pnl: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExitStats {
    pub count: usize,
    pub pnl: f64,
    pub avg_pnl: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HourStats {
    pub count: usize,
    pub win_rate: f64,
    pub pnl: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentTrade {
    pub outcome: Option<Outcome>,
    pub pnl: f64,
    pub symbol: String,
    pub closed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyStats {
    pub strategy_id: String,
    pub strategy_name: String,
    pub category: String,
    pub total: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub avg_pnl: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub best_trade: f64,
    pub worst_trade: f64,
    pub profit_factor: f64,
    pub max_win_streak: usize,
    pub max_loss_streak: usize,
    pub avg_duration_min: f64,
    pub max_drawdown: f64,
    pub equity_curve: Vec<f64>,
    pub by_symbol: BTreeMap<String, SymbolStats>,
    pub by_exit_reason: BTreeMap<String, ExitStats>,
    pub by_hour: BTreeMap<u32, HourStats>,
    pub last_5: Vec<RecentTrade>,
    pub first_trade: Option<DateTime<Utc>>,
    pub last_trade: Option<DateTime<Utc>>,
}

/// Aggregate a strategy's closed history. Trades are stored newest first.
pub fn compute_strategy_stats(record: &StrategyRecord) -> StrategyStats {
    let trades = &record.trades;
    let mut stats = StrategyStats {
        strategy_id: record.strategy_id.clone(),
        strategy_name: record.strategy_id.clone(),
        ..Default::default()
    };
    if trades.is_empty() {
        return stats;
    }

    let newest = &trades[0];
    if !newest.strategy_name.is_empty() {
        stats.strategy_name = newest.strategy_name.clone();
    }
    stats.category = newest.category.clone();

    let pnls: Vec<f64> = trades.iter().map(|t| t.pnl_usd).collect();
    let win_pnls: Vec<f64> = trades.iter().filter(|t| is_win(t)).map(|t| t.pnl_usd).collect();
    let loss_pnls: Vec<f64> = trades
        .iter()
        .filter(|t| t.outcome == Some(Outcome::Loss))
        .map(|t| t.pnl_usd)
        .collect();

    stats.total = trades.len();
    stats.wins = win_pnls.len();
    stats.losses = loss_pnls.len();
    stats.win_rate = pct(stats.wins, stats.total);
    stats.total_pnl = round2(pnls.iter().sum());
    stats.avg_pnl = round2(mean(&pnls));
    stats.avg_win = round2(mean(&win_pnls));
    stats.avg_loss = round2(mean(&loss_pnls));
    stats.best_trade = round2(pnls.iter().copied().fold(f64::MIN, f64::max));
    stats.worst_trade = round2(pnls.iter().copied().fold(f64::MAX, f64::min));

    let gross_profit: f64 = pnls.iter().filter(|p| **p > 0.0).sum();
    let gross_loss: f64 = pnls.iter().filter(|p| **p < 0.0).sum::<f64>().abs();
    stats.profit_factor = if gross_loss > 0.0 {
        round2(gross_profit / gross_loss)
    } else if gross_profit > 0.0 {
        PROFIT_FACTOR_CAP
    } else {
        0.0
    };

    // Streaks and equity run oldest to newest.
    let mut current = 0;
    let mut previous: Option<Option<Outcome>> = None;
    let mut running = 0.0;
    let mut equity = Vec::with_capacity(trades.len());
    for t in trades.iter().rev() {
        if previous == Some(t.outcome) {
            current += 1;
        } else {
            current = 1;
        }
        match t.outcome {
            Some(Outcome::Win) => stats.max_win_streak = stats.max_win_streak.max(current),
            Some(Outcome::Loss) => stats.max_loss_streak = stats.max_loss_streak.max(current),
            None => {}
        }
        previous = Some(t.outcome);

        running += t.pnl_usd;
        equity.push(round2(running));
    }

    let mut peak = 0.0_f64;
    let mut max_dd = 0.0_f64;
    for eq in &equity {
        peak = peak.max(*eq);
        max_dd = max_dd.max(peak - eq);
    }
    stats.max_drawdown = round2(max_dd);
    let skip = equity.len().saturating_sub(EQUITY_POINTS);
    stats.equity_curve = equity.split_off(skip);

    let durations: Vec<f64> = trades
        .iter()
        .map(|t| t.duration_minutes)
        .filter(|d| *d > 0.0)
        .collect();
    stats.avg_duration_min = round1(mean(&durations));

    for t in trades {
        let sym = stats.by_symbol.entry(t.symbol.clone()).or_default();
        sym.total += 1;
        sym.wins += is_win(t) as usize;
        sym.pnl += t.pnl_usd;

        let reason = t
            .exit_reason
            .map(|r| r.as_str().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let exit = stats.by_exit_reason.entry(reason).or_default();
        exit.count += 1;
        exit.pnl += t.pnl_usd;
    }
    for sym in stats.by_symbol.values_mut() {
        sym.win_rate = pct(sym.wins, sym.total);
        sym.pnl = round2(sym.pnl);
    }
    for exit in stats.by_exit_reason.values_mut() {
        exit.avg_pnl = round2(exit.pnl / exit.count as f64);
        exit.pnl = round2(exit.pnl);
    }

    let mut hour_wins: HashMap<u32, usize> = HashMap::new();
    for t in trades {
        let hour = t.opened_at.hour();
        let bucket = stats.by_hour.entry(hour).or_default();
        bucket.count += 1;
        bucket.pnl += t.pnl_usd;
        if is_win(t) {
            *hour_wins.entry(hour).or_default() += 1;
        }
    }
    for (hour, bucket) in stats.by_hour.iter_mut() {
        bucket.win_rate = pct(hour_wins.get(hour).copied().unwrap_or(0), bucket.count);
        bucket.pnl = round2(bucket.pnl);
    }

    stats.last_5 = trades
        .iter()
        .take(5)
        .map(|t| RecentTrade {
            outcome: t.outcome,
            pnl: t.pnl_usd,
            symbol: t.symbol.clone(),
            closed_at: t.closed_at,
        })
        .collect();
    stats.first_trade = trades.last().map(|t| t.opened_at);
    stats.last_trade = newest.closed_at;

    stats
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorySummary {
    pub category: String,
    pub strategies: usize,
    pub total_trades: usize,
    pub wins: usize,
    pub win_rate: f64,
    pub total_pnl: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolSummary {
    pub symbol: String,
    pub strategies: usize,
    pub total_trades: usize,
    pub wins: usize,
    pub win_rate: f64,
    pub total_pnl: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryComparison {
    pub by_category: Vec<CategorySummary>,
    pub by_symbol: Vec<SymbolSummary>,
}

/// Roll every strategy's history up by category and by symbol, best PnL first.
pub fn compare_categories(records: &[StrategyRecord]) -> CategoryComparison {
    #[derive(Default)]
    struct Acc {
        total: usize,
        wins: usize,
        pnl: f64,
        strategies: BTreeSet<String>,
    }

    let mut by_cat: BTreeMap<String, Acc> = BTreeMap::new();
    let mut by_sym: BTreeMap<String, Acc> = BTreeMap::new();

    for record in records {
        let Some(first) = record.trades.first() else {
            continue;
        };
        let category = if first.category.is_empty() {
            "other".to_string()
        } else {
            first.category.clone()
        };
        let cat = by_cat.entry(category).or_default();
        cat.strategies.insert(record.strategy_id.clone());
        for t in &record.trades {
            cat.total += 1;
            cat.wins += is_win(t) as usize;
            cat.pnl += t.pnl_usd;

            let sym = by_sym.entry(t.symbol.clone()).or_default();
            sym.total += 1;
            sym.wins += is_win(t) as usize;
            sym.pnl += t.pnl_usd;
            sym.strategies.insert(record.strategy_id.clone());
        }
    }

    let mut by_category: Vec<CategorySummary> = by_cat
        .into_iter()
        .map(|(category, acc)| CategorySummary {
            category,
            strategies: acc.strategies.len(),
            total_trades: acc.total,
            wins: acc.wins,
            win_rate: pct(acc.wins, acc.total),
            total_pnl: round2(acc.pnl),
        })
        .collect();
    by_category.sort_by(|a, b| b.total_pnl.total_cmp(&a.total_pnl));

    let mut by_symbol: Vec<SymbolSummary> = by_sym
        .into_iter()
        .map(|(symbol, acc)| SymbolSummary {
            symbol,
            strategies: acc.strategies.len(),
            total_trades: acc.total,
            wins: acc.wins,
            win_rate: pct(acc.wins, acc.total),
            total_pnl: round2(acc.pnl),
        })
        .collect();
    by_symbol.sort_by(|a, b| b.total_pnl.total_cmp(&a.total_pnl));

    CategoryComparison {
        by_category,
        by_symbol,
    }
}

fn is_win(t: &Trade) -> bool {
    t.outcome == Some(Outcome::Win)
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn pct(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        round1(part as f64 / total as f64 * 100.0)
    }
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Direction, ExitReason};
    use crate::test_helpers::{make_trade, t0};
    use chrono::Duration;

    fn closed(id: &str, pnl: f64, minutes: i64) -> Trade {
        let mut t = make_trade(id, Direction::Long, 100.0, 90.0, &[120.0]);
        t.finalize(100.0 + pnl, if pnl > 0.0 { ExitReason::Tp } else { ExitReason::Sl },
            t0() + Duration::minutes(minutes), 1.0, 1.0);
        t
    }

    fn record(trades: Vec<Trade>) -> StrategyRecord {
        StrategyRecord {
            strategy_id: "s1".to_string(),
            trades,
        }
    }

    #[test]
    fn break_even_exits_score_as_wins() {
        let mut be = make_trade("be", Direction::Long, 100.0, 90.0, &[130.0]);
        be.finalize(100.0, ExitReason::BreakEven, t0() + Duration::minutes(15), 1.0, 1.0);
        let stats = compute_strategy_stats(&record(vec![be, closed("a", 10.0, 20)]));
        assert_eq!(stats.wins, 2);
        assert_eq!(stats.losses, 0);
        assert_eq!(stats.win_rate, 100.0);
        assert_eq!(stats.max_win_streak, 2);
    }

    #[test]
    fn empty_record() {
        let stats = compute_strategy_stats(&record(vec![]));
        assert_eq!(stats.total, 0);
        assert_eq!(stats.strategy_id, "s1");
    }

    #[test]
    fn aggregates_newest_first_history() {
        // Oldest: +10, -5, +20, +5 (newest)
        let trades = vec![
            closed("d", 5.0, 30),
            closed("c", 20.0, 60),
            closed("b", -5.0, 10),
            closed("a", 10.0, 20),
        ];
        let stats = compute_strategy_stats(&record(trades));
        assert_eq!(stats.total, 4);
        assert_eq!(stats.wins, 3);
        assert_eq!(stats.losses, 1);
        assert_eq!(stats.win_rate, 75.0);
        assert_eq!(stats.total_pnl, 30.0);
        assert_eq!(stats.profit_factor, 7.0);
        assert_eq!(stats.max_win_streak, 2);
        assert_eq!(stats.max_loss_streak, 1);
        assert_eq!(stats.equity_curve, vec![10.0, 5.0, 25.0, 30.0]);
        assert_eq!(stats.max_drawdown, 5.0);
        assert_eq!(stats.avg_duration_min, 30.0);
        assert_eq!(stats.by_exit_reason["sl"].count, 1);
        assert_eq!(stats.by_symbol["US30"].total, 4);
        assert_eq!(stats.by_hour[&12].count, 4);
        assert_eq!(stats.last_5.len(), 4);
        assert_eq!(stats.last_5[0].pnl, 5.0);
    }

    #[test]
    fn profit_factor_without_losses() {
        let stats = compute_strategy_stats(&record(vec![closed("a", 10.0, 5)]));
        assert_eq!(stats.profit_factor, 99.9);
    }

    #[test]
    fn equity_curve_is_bounded() {
        let trades: Vec<Trade> = (0..150).map(|i| closed(&i.to_string(), 1.0, 5)).collect();
        let stats = compute_strategy_stats(&record(trades));
        assert_eq!(stats.equity_curve.len(), 100);
        assert_eq!(*stats.equity_curve.last().unwrap(), 150.0);
    }

    #[test]
    fn categories_sorted_by_pnl() {
        let mut a = record(vec![closed("a", 10.0, 5)]);
        a.trades[0].category = "trend".to_string();
        let mut b = record(vec![closed("b", -4.0, 5)]);
        b.strategy_id = "s2".to_string();
        b.trades[0].category = String::new();

        let cmp = compare_categories(&[b, a]);
        assert_eq!(cmp.by_category[0].category, "trend");
        assert_eq!(cmp.by_category[1].category, "other");
        assert_eq!(cmp.by_symbol[0].strategies, 2);
        assert_eq!(cmp.by_symbol[0].total_pnl, 6.0);
    }
}
