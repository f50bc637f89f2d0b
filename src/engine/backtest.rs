//! Backtest engine
//!
//! Wires detection, lifecycle, setup building, fill simulation and the ledger
//! behind two entry points: `on_higher_bar` and `on_lower_bar` for incremental
//! feeding, and `run` which replays two full series through the same handlers.
//! Every handler consumes only closed bars, so batch and incremental runs over
//! the same data produce identical ledgers.
//!
//! Causality is enforced by construction. A resolution computed at a
//! higher-timeframe close becomes a setup on the first lower-timeframe bar
//! closing strictly after it, and the resulting limit order is only eligible
//! to fill from the bar after that.

use super::candles::{validate_candle, Candle, CandleSeries, SeriesError, Timeframe};
use super::config::EngineConfig;
use super::detector::detect_zone;
use super::fill::{OrderOutcome, OrderSimulator};
use super::ledger::{EquityPoint, Ledger, Summary, Trade};
use super::lifecycle::{LifecycleEvent, ResolutionEvent, ZoneTracker};
use super::setup::{Setup, SetupBuilder};
use super::zone::Zone;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("lower timeframe {lower} must be shorter than higher timeframe {higher}")]
    TimeframeOrder { higher: Timeframe, lower: Timeframe },
    #[error("out-of-order {timeframe} bar: {current} is not after {previous}")]
    OutOfOrderBar {
        timeframe: Timeframe,
        previous: DateTime<Utc>,
        current: DateTime<Utc>,
    },
    #[error(transparent)]
    Series(#[from] SeriesError),
}

/// Everything observable that happened while processing one bar.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    ZoneDetected(Zone),
    ZoneEntered { zone_id: Uuid },
    ZoneInvalidated { zone_id: Uuid },
    ZoneResolved(ResolutionEvent),
    SetupCreated(Setup),
    OrderExpired { setup_id: Uuid },
    TradeClosed(Trade),
}

/// Final output of a run, ready for reporting or serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestReport {
    pub summary: Summary,
    pub parameters: EngineConfig,
    pub trades: Vec<Trade>,
    pub equity: Vec<EquityPoint>,
}

pub struct Engine {
    config: EngineConfig,
    higher_tf: Timeframe,
    lower_tf: Timeframe,
    tracker: ZoneTracker,
    builder: SetupBuilder,
    ledger: Ledger,
    /// Sliding detection window of the last closed higher-timeframe bars
    window: Vec<Candle>,
    /// Resolutions waiting for their lower-timeframe signal bar
    pending_signals: Vec<ResolutionEvent>,
    orders: Vec<OrderSimulator>,
    /// Zones that already produced an order; one order per zone, ever
    ordered_zones: HashSet<Uuid>,
    last_higher: Option<DateTime<Utc>>,
    last_lower: Option<DateTime<Utc>>,
    higher_seen: usize,
    lower_seen: usize,
}

impl Engine {
    /// The lower timeframe must be strictly shorter than the higher one;
    /// otherwise setup creation times could precede their zone resolutions.
    pub fn new(
        config: EngineConfig,
        higher_tf: Timeframe,
        lower_tf: Timeframe,
    ) -> Result<Self, EngineError> {
        if lower_tf.duration() >= higher_tf.duration() {
            return Err(EngineError::TimeframeOrder {
                higher: higher_tf,
                lower: lower_tf,
            });
        }
        Ok(Self {
            higher_tf,
            lower_tf,
            tracker: ZoneTracker::new(),
            builder: SetupBuilder::new(config.clone()),
            ledger: Ledger::new(&config),
            config,
            window: Vec::with_capacity(3),
            pending_signals: Vec::new(),
            orders: Vec::new(),
            ordered_zones: HashSet::new(),
            last_higher: None,
            last_lower: None,
            higher_seen: 0,
            lower_seen: 0,
        })
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn open_zones(&self) -> &[Zone] {
        self.tracker.open_zones()
    }

    pub fn report(&self) -> BacktestReport {
        BacktestReport {
            summary: self.ledger.summary(),
            parameters: self.config.clone(),
            trades: self.ledger.trades().to_vec(),
            equity: self.ledger.equity_curve().to_vec(),
        }
    }

    /// Ingest the next closed higher-timeframe bar: advance zone lifecycles,
    /// then scan the fresh 3-bar window for a new zone.
    pub fn on_higher_bar(&mut self, candle: &Candle) -> Result<Vec<EngineEvent>, EngineError> {
        validate_candle(self.higher_seen, candle)?;
        if let Some(previous) = self.last_higher {
            if candle.open_time <= previous {
                return Err(EngineError::OutOfOrderBar {
                    timeframe: self.higher_tf,
                    previous,
                    current: candle.open_time,
                });
            }
        }
        self.last_higher = Some(candle.open_time);
        self.higher_seen += 1;

        let mut events = Vec::new();
        for event in self.tracker.on_bar(candle) {
            match event {
                LifecycleEvent::Entered { zone_id } => events.push(EngineEvent::ZoneEntered { zone_id }),
                LifecycleEvent::Invalidated { zone_id } => {
                    events.push(EngineEvent::ZoneInvalidated { zone_id })
                }
                LifecycleEvent::Resolved(resolution) => {
                    self.pending_signals.push(resolution.clone());
                    events.push(EngineEvent::ZoneResolved(resolution));
                }
            }
        }

        self.window.push(candle.clone());
        if self.window.len() > 3 {
            self.window.remove(0);
        }
        if let [first, middle, third] = self.window.as_slice() {
            if let Some(zone) = detect_zone(first, middle, third, self.higher_tf) {
                info!(zone = %zone.id, kind = %zone.kind, top = zone.top, bottom = zone.bottom, "zone detected");
                self.tracker.insert(zone.clone());
                events.push(EngineEvent::ZoneDetected(zone));
            }
        }

        Ok(events)
    }

    /// Ingest the next closed lower-timeframe bar: advance live orders first,
    /// then turn eligible resolutions into setups. An order armed here first
    /// sees price on the following bar.
    pub fn on_lower_bar(&mut self, candle: &Candle) -> Result<Vec<EngineEvent>, EngineError> {
        validate_candle(self.lower_seen, candle)?;
        if let Some(previous) = self.last_lower {
            if candle.open_time <= previous {
                return Err(EngineError::OutOfOrderBar {
                    timeframe: self.lower_tf,
                    previous,
                    current: candle.open_time,
                });
            }
        }
        self.last_lower = Some(candle.open_time);
        self.lower_seen += 1;

        let mut events = Vec::new();

        let mut finished = Vec::new();
        for (index, order) in self.orders.iter_mut().enumerate() {
            match order.on_bar(candle) {
                Some(OrderOutcome::Filled {
                    entry_time,
                    exit_time,
                    exit_price,
                    exit_reason,
                }) => {
                    let trade = self
                        .ledger
                        .record(order.setup(), entry_time, exit_time, exit_price, exit_reason);
                    events.push(EngineEvent::TradeClosed(trade));
                    finished.push(index);
                }
                Some(OrderOutcome::Expired) => {
                    events.push(EngineEvent::OrderExpired {
                        setup_id: order.setup().id,
                    });
                    finished.push(index);
                }
                None => {}
            }
        }
        for index in finished.into_iter().rev() {
            self.orders.remove(index);
        }

        // A resolution is actionable once this bar closes strictly after the
        // resolving higher-timeframe close
        let lower_close = candle.close_time(self.lower_tf);
        let higher_duration = self.higher_tf.duration();
        let eligible: Vec<ResolutionEvent> = {
            let mut taken = Vec::new();
            self.pending_signals.retain(|signal| {
                if lower_close > signal.resolved_at + higher_duration {
                    taken.push(signal.clone());
                    false
                } else {
                    true
                }
            });
            taken
        };

        for signal in eligible {
            if !self.ordered_zones.insert(signal.zone.id) {
                continue;
            }
            if let Some(setup) = self.builder.build(&signal, candle.open_time) {
                debug!(setup = %setup.id, direction = %setup.direction, entry = setup.entry_price, "limit order placed");
                self.orders.push(OrderSimulator::new(setup.clone(), self.lower_tf));
                events.push(EngineEvent::SetupCreated(setup));
            }
        }

        Ok(events)
    }

    /// Replay two full series through the incremental handlers, interleaved in
    /// close-time order with lower-timeframe bars first on ties.
    pub fn run(
        &mut self,
        higher: &CandleSeries,
        lower: &CandleSeries,
    ) -> Result<Vec<EngineEvent>, EngineError> {
        let higher_bars = higher.candles();
        let lower_bars = lower.candles();
        let mut events = Vec::new();
        let (mut h, mut l) = (0, 0);

        while h < higher_bars.len() || l < lower_bars.len() {
            let take_lower = match (higher_bars.get(h), lower_bars.get(l)) {
                (Some(hb), Some(lb)) => {
                    lb.close_time(lower.timeframe()) <= hb.close_time(higher.timeframe())
                }
                (None, Some(_)) => true,
                _ => false,
            };
            if take_lower {
                events.extend(self.on_lower_bar(&lower_bars[l])?);
                l += 1;
            } else {
                events.extend(self.on_higher_bar(&higher_bars[h])?);
                h += 1;
            }
        }

        info!(
            trades = self.ledger.trades().len(),
            balance = self.ledger.balance(),
            "run complete"
        );
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fill::ExitReason;
    use crate::engine::setup::Direction;
    use chrono::TimeZone;

    const HTF: u32 = 60;
    const LTF: u32 = 15;

    fn bar(open_minute: i64, open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            open_time: Utc.timestamp_opt(open_minute * 60, 0).unwrap(),
            open,
            high,
            low,
            close,
            volume: 10.0,
        }
    }

    /// Bullish zone [100, 108] formed at minute 120, entered, then rejected at
    /// the close of the bar opening at minute 240.
    fn rejected_zone_higher_bars() -> Vec<Candle> {
        vec![
            bar(0, 95.0, 100.0, 90.0, 98.0),
            bar(60, 98.0, 105.0, 95.0, 104.0),
            bar(120, 109.0, 115.0, 108.0, 114.0),
            bar(180, 103.5, 104.0, 102.0, 103.0),
            bar(240, 100.5, 101.0, 97.0, 98.0),
        ]
    }

    fn higher_series(bars: Vec<Candle>) -> CandleSeries {
        CandleSeries::new(Timeframe::minutes(HTF), bars).unwrap()
    }

    fn lower_series(bars: Vec<Candle>) -> CandleSeries {
        CandleSeries::new(Timeframe::minutes(LTF), bars).unwrap()
    }

    fn engine() -> Engine {
        Engine::new(EngineConfig::default(), Timeframe::minutes(HTF), Timeframe::minutes(LTF))
            .unwrap()
    }

    #[test]
    fn rejected_bullish_zone_trades_short_to_target() {
        let higher = higher_series(rejected_zone_higher_bars());
        // Signal bar at 300, fill bar at 315 crossing entry 100, target bar at 330
        let lower = lower_series(vec![
            bar(300, 98.5, 99.5, 97.5, 98.5),
            bar(315, 99.0, 100.5, 98.5, 99.5),
            bar(330, 99.0, 99.0, 91.0, 92.0),
        ]);

        let mut engine = engine();
        engine.run(&higher, &lower).unwrap();

        let trades = engine.ledger().trades();
        assert_eq!(trades.len(), 1);
        let trade = &trades[0];
        assert_eq!(trade.direction, Direction::Short);
        assert_eq!(trade.entry_price, 100.0);
        assert_eq!(trade.exit_reason, ExitReason::TakeProfit);
        // Stop above the highest post-entry excursion (104), target at 2R
        assert!((trade.exit_price - (100.0 - 2.0 * (104.0 * 1.002 - 100.0))).abs() < 1e-9);
        assert!(trade.pnl > 0.0);
    }

    #[test]
    fn event_times_are_strictly_causal() {
        let higher = higher_series(rejected_zone_higher_bars());
        let lower = lower_series(vec![
            bar(300, 98.5, 99.5, 97.5, 98.5),
            bar(315, 99.0, 100.5, 98.5, 99.5),
            bar(330, 99.0, 99.0, 91.0, 92.0),
        ]);

        let mut engine = engine();
        let events = engine.run(&higher, &lower).unwrap();

        let resolved_at = events
            .iter()
            .find_map(|e| match e {
                EngineEvent::ZoneResolved(r) => Some(r.resolved_at),
                _ => None,
            })
            .unwrap();
        let created_at = events
            .iter()
            .find_map(|e| match e {
                EngineEvent::SetupCreated(s) => Some(s.created_at),
                _ => None,
            })
            .unwrap();
        let trade = &engine.ledger().trades()[0];

        assert!(resolved_at < created_at);
        assert!(created_at < trade.entry_time);
        assert!(trade.entry_time < trade.exit_time);
    }

    #[test]
    fn signal_bar_itself_cannot_fill_the_order() {
        let higher = higher_series(rejected_zone_higher_bars());
        // The signal bar at 300 crosses the entry price; nothing after does
        let lower = lower_series(vec![
            bar(300, 99.0, 100.5, 98.5, 99.5),
            bar(315, 98.5, 99.5, 97.5, 98.5),
        ]);

        let mut engine = engine();
        engine.run(&higher, &lower).unwrap();
        assert!(engine.ledger().trades().is_empty());
    }

    #[test]
    fn unfilled_order_expires_without_a_trade() {
        let mut config = EngineConfig::default();
        config.limit_expiry_bars = 2;
        let higher = higher_series(rejected_zone_higher_bars());
        // Price never returns to the entry at 100
        let lower = lower_series(vec![
            bar(300, 98.5, 99.5, 97.5, 98.5),
            bar(315, 98.0, 98.5, 96.5, 97.0),
            bar(330, 97.0, 97.5, 95.5, 96.0),
            bar(345, 96.0, 96.5, 94.5, 95.0),
        ]);

        let mut engine = Engine::new(config, Timeframe::minutes(HTF), Timeframe::minutes(LTF)).unwrap();
        let events = engine.run(&higher, &lower).unwrap();

        assert!(events.iter().any(|e| matches!(e, EngineEvent::OrderExpired { .. })));
        assert!(engine.ledger().trades().is_empty());
        assert_eq!(engine.ledger().balance(), EngineConfig::default().initial_balance);
    }

    #[test]
    fn at_most_one_order_per_zone() {
        let higher = higher_series(rejected_zone_higher_bars());
        let lower = lower_series(vec![
            bar(300, 98.5, 99.5, 97.5, 98.5),
            bar(315, 99.0, 100.5, 98.5, 99.5),
            bar(330, 99.0, 99.0, 91.0, 92.0),
            // Price revisits the zone after the trade closed
            bar(345, 92.0, 101.0, 91.5, 100.5),
            bar(360, 100.5, 101.0, 99.0, 99.5),
        ]);

        let mut engine = engine();
        let events = engine.run(&higher, &lower).unwrap();

        let setups = events
            .iter()
            .filter(|e| matches!(e, EngineEvent::SetupCreated(_)))
            .count();
        assert_eq!(setups, 1);
        assert_eq!(engine.ledger().trades().len(), 1);
    }

    #[test]
    fn batch_and_incremental_runs_are_identical() {
        let higher = higher_series(rejected_zone_higher_bars());
        let lower = lower_series(vec![
            bar(300, 98.5, 99.5, 97.5, 98.5),
            bar(315, 99.0, 100.5, 98.5, 99.5),
            bar(330, 99.0, 99.0, 91.0, 92.0),
        ]);

        let mut batch = engine();
        batch.run(&higher, &lower).unwrap();

        // Same interleaving fed one bar at a time
        let mut incremental = engine();
        for candle in higher.iter() {
            incremental.on_higher_bar(candle).unwrap();
        }
        for candle in lower.iter() {
            incremental.on_lower_bar(candle).unwrap();
        }

        let a = batch.report();
        let b = incremental.report();
        assert_eq!(a.trades.len(), b.trades.len());
        for (x, y) in a.trades.iter().zip(&b.trades) {
            assert_eq!(x.id, y.id);
            assert_eq!(x.pnl, y.pnl);
            assert_eq!(x.entry_time, y.entry_time);
            assert_eq!(x.exit_time, y.exit_time);
        }
        assert_eq!(a.summary.final_balance, b.summary.final_balance);
    }

    #[test]
    fn repeated_runs_are_deterministic() {
        let higher = higher_series(rejected_zone_higher_bars());
        let lower = lower_series(vec![
            bar(300, 98.5, 99.5, 97.5, 98.5),
            bar(315, 99.0, 100.5, 98.5, 99.5),
            bar(330, 99.0, 99.0, 91.0, 92.0),
        ]);

        let mut first = engine();
        first.run(&higher, &lower).unwrap();
        let mut second = engine();
        second.run(&higher, &lower).unwrap();

        let a = first.ledger().trades();
        let b = second.ledger().trades();
        assert_eq!(a.len(), b.len());
        assert_eq!(a[0].id, b[0].id);
        assert_eq!(a[0].pnl, b[0].pnl);
    }

    #[test]
    fn lower_timeframe_must_be_shorter() {
        let result = Engine::new(
            EngineConfig::default(),
            Timeframe::minutes(15),
            Timeframe::minutes(60),
        );
        assert!(matches!(result, Err(EngineError::TimeframeOrder { .. })));

        let equal = Engine::new(
            EngineConfig::default(),
            Timeframe::minutes(60),
            Timeframe::minutes(60),
        );
        assert!(matches!(equal, Err(EngineError::TimeframeOrder { .. })));
    }

    #[test]
    fn out_of_order_bars_are_rejected() {
        let mut engine = engine();
        engine.on_higher_bar(&bar(60, 95.0, 100.0, 90.0, 98.0)).unwrap();
        let result = engine.on_higher_bar(&bar(60, 95.0, 100.0, 90.0, 98.0));
        assert!(matches!(result, Err(EngineError::OutOfOrderBar { .. })));
    }
}
