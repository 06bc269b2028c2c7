//! Trade analytics derived from the blotter contents
//!
//! Every function here is pure over the current trade rows and is recomputed from scratch on
//! each publish of the view. Nothing is cached or patched incrementally.

use crate::shared::types::{EquityPoint, TradePoint};
use indexmap::IndexMap;
use itertools::Itertools;
use rust_decimal::Decimal;
use serde::Serialize;

/// Bucket label for trades without a strategy
pub const UNKNOWN_STRATEGY: &str = "Unknown";

/// Bucket label for trades without a timeframe
pub const UNKNOWN_TIMEFRAME: &str = "N/A";

/// Aggregate analytics over one trade collection
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct TradeMetrics {
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    /// wins / (wins + losses), 0..=1
    pub win_rate: f64,
    pub total_pnl: Decimal,
    pub avg_pnl: Decimal,
    pub equity_curve: Vec<EquityPoint>,
    pub max_drawdown: Decimal,
    pub avg_trade_drawdown: Decimal,
    pub by_strategy: IndexMap<String, usize>,
    pub by_timeframe: IndexMap<String, usize>,
}

impl TradeMetrics {
    pub fn compute(trades: &[TradePoint]) -> Self {
        let (wins, losses) = win_loss_counts(trades);
        let total_pnl = total_pnl(trades);
        let equity_curve = equity_curve(trades);
        let max_drawdown = max_drawdown(&equity_curve);

        Self {
            total_trades: trades.len(),
            wins,
            losses,
            win_rate: ratio(wins, wins + losses),
            total_pnl,
            avg_pnl: avg_pnl(trades),
            equity_curve,
            max_drawdown,
            avg_trade_drawdown: avg_trade_drawdown(trades),
            by_strategy: group_by_strategy(trades),
            by_timeframe: group_by_timeframe(trades),
        }
    }

    /// Win rate as a percentage, as displayed on the dashboard
    pub fn win_rate_pct(&self) -> f64 {
        self.win_rate * 100.0
    }

    /// Balance at the end of the equity curve
    pub fn final_balance(&self) -> Decimal {
        self.equity_curve
            .last()
            .map(|point| point.balance)
            .unwrap_or(Decimal::ZERO)
    }
}

/// Closed winning and losing trade counts. A pnl of exactly zero (or missing) is neither.
pub fn win_loss_counts(trades: &[TradePoint]) -> (usize, usize) {
    trades
        .iter()
        .filter(|trade| trade.is_closed())
        .filter_map(|trade| trade.pnl)
        .fold((0, 0), |(wins, losses), pnl| {
            if pnl > Decimal::ZERO {
                (wins + 1, losses)
            } else if pnl < Decimal::ZERO {
                (wins, losses + 1)
            } else {
                (wins, losses)
            }
        })
}

/// wins / (wins + losses), 0 when no closed trade has a non-zero pnl
pub fn win_rate(trades: &[TradePoint]) -> f64 {
    let (wins, losses) = win_loss_counts(trades);
    ratio(wins, wins + losses)
}

/// Sum of pnl over all trades, open ones included, missing pnl as zero
pub fn total_pnl(trades: &[TradePoint]) -> Decimal {
    trades.iter().map(TradePoint::pnl_or_zero).sum()
}

/// total pnl / trade count, 0 for an empty collection
pub fn avg_pnl(trades: &[TradePoint]) -> Decimal {
    if trades.is_empty() {
        return Decimal::ZERO;
    }
    total_pnl(trades) / Decimal::from(trades.len())
}

/// Cumulative realised pnl over closed trades in close-time order.
///
/// Trades closing at the same instant keep their relative order in `trades`.
pub fn equity_curve(trades: &[TradePoint]) -> Vec<EquityPoint> {
    trades
        .iter()
        .filter(|trade| trade.is_closed())
        .filter_map(|trade| trade.closed_at.map(|closed_at| (closed_at, trade.pnl_or_zero())))
        .sorted_by_key(|(closed_at, _)| *closed_at)
        .scan(Decimal::ZERO, |balance, (date, pnl)| {
            *balance += pnl;
            Some(EquityPoint {
                date,
                balance: *balance,
            })
        })
        .collect()
}

/// Largest peak-to-trough decline of the equity curve, starting from a zero peak
pub fn max_drawdown(curve: &[EquityPoint]) -> Decimal {
    let mut peak = Decimal::ZERO;
    let mut worst = Decimal::ZERO;

    for point in curve {
        peak = peak.max(point.balance);
        worst = worst.max(peak - point.balance);
    }

    worst
}

/// Mean of the per-trade `max_drawdown` over closed trades that report one
pub fn avg_trade_drawdown(trades: &[TradePoint]) -> Decimal {
    let drawdowns: Vec<Decimal> = trades
        .iter()
        .filter(|trade| trade.is_closed())
        .filter_map(|trade| trade.max_drawdown)
        .collect();

    if drawdowns.is_empty() {
        return Decimal::ZERO;
    }
    drawdowns.iter().sum::<Decimal>() / Decimal::from(drawdowns.len())
}

/// Trade counts per strategy in order of first appearance
pub fn group_by_strategy(trades: &[TradePoint]) -> IndexMap<String, usize> {
    count_by(trades, |trade| trade.strategy.as_deref(), UNKNOWN_STRATEGY)
}

/// Trade counts per timeframe in order of first appearance
pub fn group_by_timeframe(trades: &[TradePoint]) -> IndexMap<String, usize> {
    count_by(trades, |trade| trade.timeframe.as_deref(), UNKNOWN_TIMEFRAME)
}

fn count_by<'a, F>(
    trades: &'a [TradePoint],
    field: F,
    default_label: &'static str,
) -> IndexMap<String, usize>
where
    F: Fn(&'a TradePoint) -> Option<&'a str>,
{
    let mut buckets = IndexMap::new();
    for trade in trades {
        let label = field(trade).unwrap_or(default_label);
        *buckets.entry(label.to_string()).or_insert(0) += 1;
    }
    buckets
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    numerator as f64 / denominator as f64
}
