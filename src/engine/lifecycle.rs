//! Zone lifecycle tracking
//!
//! Owns every zone from detection to resolution and advances state one closed
//! higher-timeframe bar at a time. Invalidation is checked before entry and
//! resolution on every bar. Resolution is evaluated only on bars strictly
//! after the entry bar, at bar close, and is emitted exactly once per zone.

use super::candles::Candle;
use super::zone::{Zone, ZoneState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Terminal resolution of an entered zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ZoneResolution {
    /// Post-entry close respected the zone: trade the zone's own direction
    Held,
    /// Post-entry close broke the zone: failed pullback, reversal signal
    Rejected,
}

/// Emitted once when a zone reaches Held or Rejected. Carries a snapshot of
/// the zone with `resolved_at` and the post-entry excursion filled in.
#[derive(Debug, Clone)]
pub struct ResolutionEvent {
    pub zone: Zone,
    pub resolution: ZoneResolution,
    pub resolved_at: DateTime<Utc>,
}

/// Per-bar lifecycle transitions.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    Entered { zone_id: Uuid },
    Invalidated { zone_id: Uuid },
    Resolved(ResolutionEvent),
}

/// Tracks all open zones; zones leave the set on resolution or invalidation.
#[derive(Debug, Default)]
pub struct ZoneTracker {
    open_zones: Vec<Zone>,
}

impl ZoneTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopt a freshly detected zone. Duplicates (same id) are ignored so
    /// re-scanned detection windows cannot double-track a zone.
    pub fn insert(&mut self, zone: Zone) {
        if self.open_zones.iter().any(|z| z.id == zone.id) {
            return;
        }
        debug!(zone = %zone.id, kind = %zone.kind, top = zone.top, bottom = zone.bottom, "tracking zone");
        self.open_zones.push(zone);
    }

    pub fn open_zones(&self) -> &[Zone] {
        &self.open_zones
    }

    /// Advance every open zone with the next closed higher-timeframe bar.
    /// Bars must arrive in time order; the engine enforces that upstream.
    pub fn on_bar(&mut self, candle: &Candle) -> Vec<LifecycleEvent> {
        let mut events = Vec::new();

        for zone in &mut self.open_zones {
            // A zone formed by this bar starts life on the next one
            if candle.open_time <= zone.formed_at {
                continue;
            }

            // Invalidation wins over entry and resolution on the same bar
            if zone.fully_passed(candle) {
                zone.state = ZoneState::Invalidated;
                debug!(zone = %zone.id, "zone invalidated");
                events.push(LifecycleEvent::Invalidated { zone_id: zone.id });
                continue;
            }

            match zone.state {
                ZoneState::Active => {
                    if zone.overlaps(candle) {
                        zone.state = ZoneState::Entered;
                        zone.entered_at = Some(candle.open_time);
                        zone.note_excursion(candle);
                        debug!(zone = %zone.id, close = candle.close, "zone entered");
                        events.push(LifecycleEvent::Entered { zone_id: zone.id });
                    }
                }
                ZoneState::Entered => {
                    zone.note_excursion(candle);
                    let resolution = if zone.close_violates(candle.close) {
                        ZoneResolution::Rejected
                    } else {
                        ZoneResolution::Held
                    };
                    zone.state = match resolution {
                        ZoneResolution::Held => ZoneState::Held,
                        ZoneResolution::Rejected => ZoneState::Rejected,
                    };
                    zone.resolved_at = Some(candle.open_time);
                    debug!(zone = %zone.id, ?resolution, close = candle.close, "zone resolved");
                    events.push(LifecycleEvent::Resolved(ResolutionEvent {
                        zone: zone.clone(),
                        resolution,
                        resolved_at: candle.open_time,
                    }));
                }
                // Terminal states are pruned below and never revisited
                ZoneState::Held | ZoneState::Rejected | ZoneState::Invalidated => {}
            }
        }

        self.open_zones.retain(|z| z.is_open());
        events
    }
}
