//! Trade ledger, equity curve and performance summary
//!
//! Trades are recorded in exit order. Position size is derived from the
//! balance at recording time, so the equity curve compounds. Fees follow the
//! venue model: limit entries and take-profit exits pay the maker rate, stop
//! exits pay the taker rate.

use super::config::EngineConfig;
use super::fill::ExitReason;
use super::setup::{Direction, Setup};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// One closed trade with its realized economics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    pub setup_id: Uuid,
    pub zone_id: Uuid,
    pub direction: Direction,
    pub entry_price: f64,
    pub exit_price: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub exit_reason: ExitReason,
    /// Units of the instrument
    pub size: f64,
    /// Net of fees
    pub pnl: f64,
    pub fees: f64,
    pub rr: f64,
    pub risk_pct: f64,
    pub balance_after: f64,
}

/// Balance after each closed trade.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EquityPoint {
    pub time: DateTime<Utc>,
    pub balance: f64,
    /// Drawdown from the running peak at this point, as a fraction
    pub drawdown: f64,
}

/// Aggregate performance over the whole run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    /// Percent of trades with positive net pnl
    pub win_rate: f64,
    pub total_pnl: f64,
    pub total_pnl_pct: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub profit_factor: f64,
    /// Mean net pnl per trade
    pub expectancy: f64,
    /// Deepest peak-to-trough drop of the equity curve, as a fraction
    pub max_drawdown: f64,
    pub avg_rr: f64,
    pub initial_balance: f64,
    pub final_balance: f64,
}

/// Accumulates trades and the equity curve for one backtest run.
#[derive(Debug, Clone)]
pub struct Ledger {
    risk_per_trade: f64,
    maker_fee: f64,
    taker_fee: f64,
    initial_balance: f64,
    balance: f64,
    peak_balance: f64,
    max_drawdown: f64,
    trades: Vec<Trade>,
    equity: Vec<EquityPoint>,
}

impl Ledger {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            risk_per_trade: config.risk_per_trade,
            maker_fee: config.maker_fee,
            taker_fee: config.taker_fee,
            initial_balance: config.initial_balance,
            balance: config.initial_balance,
            peak_balance: config.initial_balance,
            max_drawdown: 0.0,
            trades: Vec::new(),
            equity: Vec::new(),
        }
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn equity_curve(&self) -> &[EquityPoint] {
        &self.equity
    }

    /// Record a closed trade and return it. Size risks `risk_per_trade` of
    /// the current balance over the stop distance; the balance then compounds.
    pub fn record(
        &mut self,
        setup: &Setup,
        entry_time: DateTime<Utc>,
        exit_time: DateTime<Utc>,
        exit_price: f64,
        exit_reason: ExitReason,
    ) -> Trade {
        let stop_distance = (setup.entry_price - setup.stop_loss).abs();
        let size = self.risk_per_trade * self.balance / stop_distance;

        let gross = match setup.direction {
            Direction::Long => (exit_price - setup.entry_price) * size,
            Direction::Short => (setup.entry_price - exit_price) * size,
        };

        // Limit entry always pays maker; the exit rate depends on how it left
        let exit_fee_rate = match exit_reason {
            ExitReason::TakeProfit => self.maker_fee,
            ExitReason::StopLoss => self.taker_fee,
        };
        let fees = setup.entry_price * size * self.maker_fee + exit_price * size * exit_fee_rate;
        let pnl = gross - fees;

        self.balance += pnl;
        self.peak_balance = self.peak_balance.max(self.balance);
        let drawdown = if self.peak_balance > 0.0 {
            (self.peak_balance - self.balance) / self.peak_balance
        } else {
            0.0
        };
        self.max_drawdown = self.max_drawdown.max(drawdown);

        info!(
            setup = %setup.id,
            direction = %setup.direction,
            reason = %exit_reason,
            pnl,
            balance = self.balance,
            "trade closed"
        );

        let id = Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("trade:{}", setup.id).as_bytes());
        let trade = Trade {
            id,
            setup_id: setup.id,
            zone_id: setup.zone_id,
            direction: setup.direction,
            entry_price: setup.entry_price,
            exit_price,
            entry_time,
            exit_time,
            exit_reason,
            size,
            pnl,
            fees,
            rr: setup.rr,
            risk_pct: setup.risk_pct,
            balance_after: self.balance,
        };
        self.trades.push(trade.clone());
        self.equity.push(EquityPoint {
            time: exit_time,
            balance: self.balance,
            drawdown,
        });
        trade
    }

    pub fn summary(&self) -> Summary {
        let total_trades = self.trades.len();
        let wins: Vec<f64> = self.trades.iter().filter(|t| t.pnl > 0.0).map(|t| t.pnl).collect();
        let losses: Vec<f64> = self.trades.iter().filter(|t| t.pnl <= 0.0).map(|t| t.pnl).collect();

        let total_pnl = self.balance - self.initial_balance;
        let gross_wins: f64 = wins.iter().sum();
        let gross_losses: f64 = losses.iter().map(|p| p.abs()).sum();

        let mean = |v: &[f64]| if v.is_empty() { 0.0 } else { v.iter().sum::<f64>() / v.len() as f64 };

        let profit_factor = if gross_losses > 0.0 {
            gross_wins / gross_losses
        } else if gross_wins > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let avg_rr = if total_trades == 0 {
            0.0
        } else {
            self.trades.iter().map(|t| t.rr).sum::<f64>() / total_trades as f64
        };

        Summary {
            total_trades,
            wins: wins.len(),
            losses: losses.len(),
            win_rate: if total_trades == 0 {
                0.0
            } else {
                wins.len() as f64 / total_trades as f64 * 100.0
            },
            total_pnl,
            total_pnl_pct: if self.initial_balance > 0.0 {
                total_pnl / self.initial_balance * 100.0
            } else {
                0.0
            },
            avg_win: mean(&wins),
            avg_loss: mean(&losses),
            profit_factor,
            expectancy: if total_trades == 0 { 0.0 } else { total_pnl / total_trades as f64 },
            max_drawdown: self.max_drawdown,
            avg_rr,
            initial_balance: self.initial_balance,
            final_balance: self.balance,
        }
    }
}
