//! Deterministic limit-order fill simulation
//!
//! Replays lower-timeframe bars against one resting limit order. The engine
//! only feeds bars strictly after the setup's signal bar, so a signal computed
//! from a bar's close is never actionable on that bar. Intrabar ambiguity is
//! resolved conservatively: if a bar touches both stop and target, the stop
//! wins.

use super::candles::{Candle, Timeframe};
use super::setup::{Direction, Setup};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Why a filled order closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::TakeProfit => write!(f, "TP"),
            ExitReason::StopLoss => write!(f, "SL"),
        }
    }
}

/// Terminal outcome of an order. Expired orders produce no trade.
#[derive(Debug, Clone)]
pub enum OrderOutcome {
    Filled {
        entry_time: DateTime<Utc>,
        exit_time: DateTime<Utc>,
        exit_price: f64,
        exit_reason: ExitReason,
    },
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OrderState {
    Pending,
    Filled,
}

/// One pending limit order being replayed bar by bar.
#[derive(Debug, Clone)]
pub struct OrderSimulator {
    setup: Setup,
    timeframe: Timeframe,
    state: OrderState,
    entry_time: Option<DateTime<Utc>>,
    bars_pending: usize,
}

impl OrderSimulator {
    pub fn new(setup: Setup, timeframe: Timeframe) -> Self {
        Self {
            setup,
            timeframe,
            state: OrderState::Pending,
            entry_time: None,
            bars_pending: 0,
        }
    }

    pub fn setup(&self) -> &Setup {
        &self.setup
    }

    /// Advance the order with the next closed lower-timeframe bar. Returns the
    /// terminal outcome once reached; the caller drops the simulator then.
    pub fn on_bar(&mut self, candle: &Candle) -> Option<OrderOutcome> {
        if self.state == OrderState::Pending {
            if candle.low <= self.setup.entry_price && candle.high >= self.setup.entry_price {
                // Resting limit fills at the limit price, not at open/close
                self.state = OrderState::Filled;
                self.entry_time = Some(candle.open_time);
                debug!(setup = %self.setup.id, price = self.setup.entry_price, "limit order filled");
            } else {
                self.bars_pending += 1;
                if self.bars_pending >= self.setup.expires_after_bars {
                    debug!(setup = %self.setup.id, bars = self.bars_pending, "limit order expired");
                    return Some(OrderOutcome::Expired);
                }
                return None;
            }
        }

        // Filled: check the stop before the target, on the fill bar and after
        let (stop_hit, target_hit) = match self.setup.direction {
            Direction::Long => (
                candle.low <= self.setup.stop_loss,
                candle.high >= self.setup.take_profit,
            ),
            Direction::Short => (
                candle.high >= self.setup.stop_loss,
                candle.low <= self.setup.take_profit,
            ),
        };

        let (exit_price, exit_reason) = if stop_hit {
            (self.setup.stop_loss, ExitReason::StopLoss)
        } else if target_hit {
            (self.setup.take_profit, ExitReason::TakeProfit)
        } else {
            return None;
        };

        let entry_time = self.entry_time?;
        debug!(setup = %self.setup.id, %exit_reason, exit_price, "order closed");
        Some(OrderOutcome::Filled {
            entry_time,
            exit_time: candle.close_time(self.timeframe),
            exit_price,
            exit_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    const TF: u32 = 15;

    fn setup(direction: Direction, entry: f64, stop: f64, target: f64) -> Setup {
        Setup {
            id: Uuid::new_v5(&Uuid::NAMESPACE_OID, b"test-setup"),
            zone_id: Uuid::new_v5(&Uuid::NAMESPACE_OID, b"test-zone"),
            direction,
            entry_price: entry,
            stop_loss: stop,
            take_profit: target,
            risk_pct: 1.0,
            rr: 2.0,
            created_at: Utc.timestamp_opt(0, 0).unwrap(),
            expires_after_bars: 4,
        }
    }

    fn bar(index: i64, high: f64, low: f64) -> Candle {
        Candle {
            open_time: Utc.timestamp_opt((index + 1) * (TF as i64) * 60, 0).unwrap(),
            open: (high + low) / 2.0,
            high,
            low,
            close: (high + low) / 2.0,
            volume: 1.0,
        }
    }

    fn sim(direction: Direction, entry: f64, stop: f64, target: f64) -> OrderSimulator {
        OrderSimulator::new(setup(direction, entry, stop, target), Timeframe::minutes(TF))
    }

    #[test]
    fn fills_when_bar_crosses_limit_then_hits_target() {
        let mut sim = sim(Direction::Long, 100.0, 98.0, 104.0);
        assert!(sim.on_bar(&bar(0, 103.0, 101.0)).is_none());
        assert!(sim.on_bar(&bar(1, 101.0, 99.5)).is_none()); // fill, no exit yet
        let outcome = sim.on_bar(&bar(2, 104.5, 100.5)).unwrap();
        match outcome {
            OrderOutcome::Filled { exit_price, exit_reason, entry_time, exit_time } => {
                assert_eq!(exit_reason, ExitReason::TakeProfit);
                assert_eq!(exit_price, 104.0);
                assert!(exit_time > entry_time);
            }
            OrderOutcome::Expired => panic!("expected fill"),
        }
    }

    #[test]
    fn same_bar_stop_and_target_resolves_as_stop() {
        let mut sim = sim(Direction::Long, 100.0, 98.0, 104.0);
        // One bar crosses the limit, the stop and the target
        let outcome = sim.on_bar(&bar(0, 105.0, 97.0)).unwrap();
        match outcome {
            OrderOutcome::Filled { exit_price, exit_reason, .. } => {
                assert_eq!(exit_reason, ExitReason::StopLoss);
                assert_eq!(exit_price, 98.0);
            }
            OrderOutcome::Expired => panic!("expected fill"),
        }
    }

    #[test]
    fn fill_bar_itself_is_checked_for_exits() {
        let mut sim = sim(Direction::Short, 100.0, 102.0, 96.0);
        // Crosses the limit and the target on the same bar, no stop touch
        let outcome = sim.on_bar(&bar(0, 100.5, 95.5)).unwrap();
        match outcome {
            OrderOutcome::Filled { exit_reason, .. } => assert_eq!(exit_reason, ExitReason::TakeProfit),
            OrderOutcome::Expired => panic!("expected fill"),
        }
    }

    #[test]
    fn expires_after_configured_pending_bars() {
        let mut sim = sim(Direction::Long, 100.0, 98.0, 104.0);
        for i in 0..3 {
            assert!(sim.on_bar(&bar(i, 103.0, 101.0)).is_none());
        }
        let outcome = sim.on_bar(&bar(3, 103.0, 101.0)).unwrap();
        assert!(matches!(outcome, OrderOutcome::Expired));
    }

    #[test]
    fn filled_order_does_not_expire() {
        let mut sim = sim(Direction::Long, 100.0, 98.0, 104.0);
        assert!(sim.on_bar(&bar(0, 101.0, 99.0)).is_none()); // filled
        for i in 1..20 {
            let result = sim.on_bar(&bar(i, 103.0, 100.5));
            assert!(result.is_none(), "order must stay open until SL/TP");
        }
    }

    #[test]
    fn short_stop_checked_before_target() {
        let mut sim = sim(Direction::Short, 100.0, 102.0, 96.0);
        assert!(sim.on_bar(&bar(0, 100.5, 99.0)).is_none()); // fill
        let outcome = sim.on_bar(&bar(1, 102.5, 95.0)).unwrap();
        match outcome {
            OrderOutcome::Filled { exit_reason, exit_price, .. } => {
                assert_eq!(exit_reason, ExitReason::StopLoss);
                assert_eq!(exit_price, 102.0);
            }
            OrderOutcome::Expired => panic!("expected fill"),
        }
    }
}
