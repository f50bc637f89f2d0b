//! Deterministic multi-timeframe imbalance backtest core.
//!
//! Zones are detected on a higher timeframe, their lifecycle resolves at
//! higher-timeframe closes, and the resulting limit orders are simulated
//! against lower-timeframe bars. The same state machines serve batch replay
//! and incremental bar-by-bar feeding, so both paths are bit-identical.

pub mod backtest;
pub mod candles;
pub mod config;
pub mod detector;
pub mod fill;
pub mod ledger;
pub mod lifecycle;
pub mod setup;
pub mod zone;

pub use backtest::{BacktestReport, Engine, EngineError, EngineEvent};
pub use candles::{validate_candle, Candle, CandleSeries, SeriesError, Timeframe};
pub use config::EngineConfig;
pub use detector::{detect_zone, ZoneDetector};
pub use fill::{ExitReason, OrderOutcome, OrderSimulator};
pub use ledger::{EquityPoint, Ledger, Summary, Trade};
pub use lifecycle::{LifecycleEvent, ResolutionEvent, ZoneResolution, ZoneTracker};
pub use setup::{Direction, Setup, SetupBuilder};
pub use zone::{Zone, ZoneKind, ZoneState};
