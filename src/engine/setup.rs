//! Trade setup derivation from zone resolutions
//!
//! A rejected zone signals a reversal: the setup trades against the zone's
//! direction. A held zone signals continuation. Entry is a resting limit at
//! the zone's gap-edge boundary, the stop sits beyond the post-entry adverse
//! excursion, and the target is a fixed reward multiple of the risk. Setups
//! that fail the risk gates are silently dropped.

use super::config::EngineConfig;
use super::lifecycle::{ResolutionEvent, ZoneResolution};
use super::zone::ZoneKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

/// A candidate trade built once per resolved zone; immutable after creation
/// and consumed exactly once by the fill simulator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Setup {
    pub id: Uuid,
    pub zone_id: Uuid,
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    /// Stop distance as % of entry price
    pub risk_pct: f64,
    /// Reward:risk at the derived prices
    pub rr: f64,
    /// Open time of the lower-timeframe bar on which the setup was built
    pub created_at: DateTime<Utc>,
    pub expires_after_bars: usize,
}

/// Derives setups from resolution events under the configured risk gates.
#[derive(Debug, Clone)]
pub struct SetupBuilder {
    config: EngineConfig,
}

impl SetupBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Build the setup for a resolution event, or `None` if any gate fails.
    /// `created_at` is the open time of the lower-timeframe signal bar.
    pub fn build(&self, event: &ResolutionEvent, created_at: DateTime<Utc>) -> Option<Setup> {
        let zone = &event.zone;

        let direction = match (zone.kind, event.resolution) {
            (ZoneKind::Bullish, ZoneResolution::Held) => Direction::Long,
            (ZoneKind::Bullish, ZoneResolution::Rejected) => Direction::Short,
            (ZoneKind::Bearish, ZoneResolution::Held) => Direction::Short,
            (ZoneKind::Bearish, ZoneResolution::Rejected) => Direction::Long,
        };

        // Limit entry at the gap-edge boundary of the zone
        let entry_price = match zone.kind {
            ZoneKind::Bullish => zone.bottom,
            ZoneKind::Bearish => zone.top,
        };

        // Stop beyond the adverse excursion seen between entry and resolution
        let stop_loss = match direction {
            Direction::Long => zone.low_inside? * (1.0 - self.config.sl_buffer_pct),
            Direction::Short => zone.high_inside? * (1.0 + self.config.sl_buffer_pct),
        };

        // Signed risk: the stop must sit on the losing side of the entry
        let risk = match direction {
            Direction::Long => entry_price - stop_loss,
            Direction::Short => stop_loss - entry_price,
        };
        if !risk.is_finite() || risk <= 0.0 {
            debug!(zone = %zone.id, "setup dropped: stop on wrong side of entry");
            return None;
        }

        let take_profit = match direction {
            Direction::Long => entry_price + risk * self.config.target_rr,
            Direction::Short => entry_price - risk * self.config.target_rr,
        };

        let reward = (take_profit - entry_price).abs();
        let rr = reward / risk;
        if rr < self.config.min_rr {
            debug!(zone = %zone.id, rr, "setup dropped: below min reward:risk");
            return None;
        }

        let risk_pct = risk / entry_price * 100.0;
        if risk_pct < self.config.min_sl_pct || risk_pct > self.config.max_sl_pct {
            debug!(zone = %zone.id, risk_pct, "setup dropped: stop distance out of bounds");
            return None;
        }

        let id = Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("setup:{}", zone.id).as_bytes());
        Some(Setup {
            id,
            zone_id: zone.id,
            direction,
            entry_price,
            stop_loss,
            take_profit,
            risk_pct,
            rr,
            created_at,
            expires_after_bars: self.config.limit_expiry_bars,
        })
    }
}
