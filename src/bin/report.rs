use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

use signal_tracker::config::Config;
use signal_tracker::tracking::{
    compare_categories, flag_quality, FileStore, StrategyStats, TradeStore,
};

fn print_stats(stats: &StrategyStats) {
    println!("\n{}", "=".repeat(70));
    println!("  {} [{}] ({})", stats.strategy_name, stats.strategy_id, stats.category);
    println!("{}", "=".repeat(70));
    if stats.total == 0 {
        println!("  No closed trades yet");
        return;
    }
    println!("  Trades:        {} ({} W / {} L)", stats.total, stats.wins, stats.losses);
    println!("  Win Rate:      {:.1}%", stats.win_rate);
    println!("  PnL:           ${:+.2} (avg ${:+.2})", stats.total_pnl, stats.avg_pnl);
    println!("  Avg Win/Loss:  ${:+.2} / ${:+.2}", stats.avg_win, stats.avg_loss);
    println!("  Best/Worst:    ${:+.2} / ${:+.2}", stats.best_trade, stats.worst_trade);
    println!("  Profit Factor: {:.2}", stats.profit_factor);
    println!("  Streaks:       {} W / {} L", stats.max_win_streak, stats.max_loss_streak);
    println!("  Max DD:        ${:.2}", stats.max_drawdown);
    println!("  Avg Duration:  {:.0} min", stats.avg_duration_min);

    if !stats.by_exit_reason.is_empty() {
        println!();
        println!("  EXITS");
        println!("  ───────────────────────────────────");
        for (reason, s) in &stats.by_exit_reason {
            println!("  {:<18} {:>4} trades  ${:+.2}", reason, s.count, s.pnl);
        }
    }
    if !stats.by_symbol.is_empty() {
        println!();
        println!("  SYMBOLS");
        println!("  ───────────────────────────────────");
        for (symbol, s) in &stats.by_symbol {
            println!("  {:<10} {:>4} trades  {:.1}% WR  ${:+.2}", symbol, s.total, s.win_rate, s.pnl);
        }
    }
}

fn main() -> Result<()> {
    let cfg = Config::from_env();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .init();

    let store = TradeStore::new(Arc::new(FileStore::from_config(&cfg.store)), cfg.store.clone());

    let status = store.tracker_status(false);
    println!("╔══════════════════════════════════════════════════════════╗");
    println!("║          SIGNAL TRACKER REPORT                           ║");
    println!("╚══════════════════════════════════════════════════════════╝");
    println!("  Data dir:    {}", cfg.store.data_dir.display());
    println!("  Last cycle:  {}", status.last_cycle.map(|t| t.to_rfc3339()).unwrap_or_else(|| "never".into()));
    println!("  Cycles:      {}", status.total_cycles);
    println!("  Signals:     {}", status.total_signals);
    println!("  Closes:      {}", status.total_closes);
    println!("  Active:      {}", status.active_trades);
    for (symbol, n) in &status.active_by_symbol {
        println!("    {:<10} {}", symbol, n);
    }
    println!("  Strategies:  {}", status.strategies_tracked);

    let args: Vec<String> = std::env::args().skip(1).collect();
    let ids = if args.is_empty() { store.strategy_ids() } else { args };

    for id in &ids {
        let (record, stats) = store.get_strategy_records(id);
        print_stats(&stats);
        let quality = flag_quality(&record.trades);
        let flags: Vec<String> = quality
            .flags
            .iter()
            .map(|f| serde_json::to_string(f).unwrap_or_default().trim_matches('"').to_string())
            .collect();
        println!(
            "  Quality:       {:?} ({} clean of {}, {:.1}% recovered){}",
            quality.quality,
            quality.clean_trades,
            quality.total_trades,
            quality.recovery_pct,
            if flags.is_empty() { String::new() } else { format!(" [{}]", flags.join(", ")) }
        );
    }

    let comparison = compare_categories(&store.all_records());
    if !comparison.by_category.is_empty() {
        println!("\n{}", "=".repeat(70));
        println!("  CATEGORIES");
        println!("{}", "=".repeat(70));
        for c in &comparison.by_category {
            println!(
                "  {:<14} {:>3} strategies {:>5} trades  {:.1}% WR  ${:+.2}",
                c.category, c.strategies, c.total_trades, c.win_rate, c.total_pnl
            );
        }
    }

    Ok(())
}
