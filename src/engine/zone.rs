//! Fair value gap zones and their state machine
//!
//! A zone is a 3-bar price imbalance on the higher timeframe. Its `top` and
//! `bottom` never change after creation; only the state and the derived
//! entry/resolution fields do. State transitions are strictly monotonic.

use super::candles::{Candle, Timeframe};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Direction of the imbalance that formed the zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ZoneKind {
    Bullish,
    Bearish,
}

impl std::fmt::Display for ZoneKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ZoneKind::Bullish => write!(f, "BULLISH"),
            ZoneKind::Bearish => write!(f, "BEARISH"),
        }
    }
}

/// Lifecycle state of a zone. No back-transitions: Active -> Entered ->
/// (Held | Rejected), with Invalidated reachable from Active and Entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ZoneState {
    /// Formed, price has not yet revisited the zone
    Active,
    /// Price has overlapped the zone, resolution pending
    Entered,
    /// First post-entry close respected the zone (continuation)
    Held,
    /// First post-entry close broke through the zone (failed pullback)
    Rejected,
    /// Price passed fully through the zone before a resolution
    Invalidated,
}

impl std::fmt::Display for ZoneState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ZoneState::Active => write!(f, "ACTIVE"),
            ZoneState::Entered => write!(f, "ENTERED"),
            ZoneState::Held => write!(f, "HELD"),
            ZoneState::Rejected => write!(f, "REJECTED"),
            ZoneState::Invalidated => write!(f, "INVALIDATED"),
        }
    }
}

/// A detected imbalance zone on the higher timeframe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zone {
    pub id: Uuid,
    pub kind: ZoneKind,
    pub top: f64,
    pub bottom: f64,
    /// Open time of the bar that completed the 3-bar pattern
    pub formed_at: DateTime<Utc>,
    pub timeframe: Timeframe,
    pub state: ZoneState,
    /// Open time of the bar that first overlapped the zone
    pub entered_at: Option<DateTime<Utc>>,
    /// Open time of the bar whose close resolved the zone
    pub resolved_at: Option<DateTime<Utc>>,
    /// Running max high across bars from entry through resolution
    pub high_inside: Option<f64>,
    /// Running min low across bars from entry through resolution
    pub low_inside: Option<f64>,
}

impl Zone {
    pub fn new(kind: ZoneKind, top: f64, bottom: f64, formed_at: DateTime<Utc>, timeframe: Timeframe) -> Self {
        // Content-derived id so identical inputs always yield identical zones
        let name = format!("{}:{}:{:.8}:{:.8}:{}", timeframe, kind, top, bottom, formed_at.timestamp_millis());
        let id = Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes());
        Self {
            id,
            kind,
            top,
            bottom,
            formed_at,
            timeframe,
            state: ZoneState::Active,
            entered_at: None,
            resolved_at: None,
            high_inside: None,
            low_inside: None,
        }
    }

    /// Does the bar's range overlap the zone?
    pub fn overlaps(&self, candle: &Candle) -> bool {
        candle.high >= self.bottom && candle.low <= self.top
    }

    /// Has the bar passed entirely beyond the zone (whole range below a
    /// bullish zone / above a bearish one)? Checked before entry and
    /// resolution on every bar.
    pub fn fully_passed(&self, candle: &Candle) -> bool {
        match self.kind {
            ZoneKind::Bullish => candle.high < self.bottom,
            ZoneKind::Bearish => candle.low > self.top,
        }
    }

    /// Does a bar close violate the zone (close through the far boundary)?
    pub fn close_violates(&self, close: f64) -> bool {
        match self.kind {
            ZoneKind::Bullish => close < self.bottom,
            ZoneKind::Bearish => close > self.top,
        }
    }

    /// Fold a bar's extremes into the post-entry excursion tracking.
    pub(crate) fn note_excursion(&mut self, candle: &Candle) {
        self.high_inside = Some(match self.high_inside {
            Some(h) => h.max(candle.high),
            None => candle.high,
        });
        self.low_inside = Some(match self.low_inside {
            Some(l) => l.min(candle.low),
            None => candle.low,
        });
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, ZoneState::Active | ZoneState::Entered)
    }
}
