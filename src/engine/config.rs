//! Engine configuration
//!
//! One immutable struct passed in at construction. The core never reads
//! environment variables or any other ambient state.

use serde::{Deserialize, Serialize};

/// Parameters for zone setups, fill simulation and the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Minimum reward:risk for a setup to be emitted (default: 2.0)
    pub min_rr: f64,
    /// Take-profit distance as a multiple of risk (default: 2.0)
    pub target_rr: f64,
    /// Minimum stop distance as % of entry price (default: 0.3)
    pub min_sl_pct: f64,
    /// Maximum stop distance as % of entry price (default: 5.0)
    pub max_sl_pct: f64,
    /// Stop buffer beyond the adverse excursion, as a fraction (default: 0.002 = 0.2%)
    pub sl_buffer_pct: f64,
    /// Fraction of balance risked per trade (default: 0.02)
    pub risk_per_trade: f64,
    /// Fee rate for resting limit fills: entry and TP exits (default: 0.0018)
    pub maker_fee: f64,
    /// Fee rate for aggressive fills: SL exits (default: 0.0045)
    pub taker_fee: f64,
    /// Closed lower-timeframe bars a pending limit order may wait before
    /// expiring (default: 16, one higher-timeframe period on 4h/15m)
    pub limit_expiry_bars: usize,
    /// Starting account balance (default: 10_000.0)
    pub initial_balance: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_rr: 2.0,
            target_rr: 2.0,
            min_sl_pct: 0.3,
            max_sl_pct: 5.0,
            sl_buffer_pct: 0.002,
            risk_per_trade: 0.02,
            maker_fee: 0.0018,
            taker_fee: 0.0045,
            limit_expiry_bars: 16,
            initial_balance: 10_000.0,
        }
    }
}
