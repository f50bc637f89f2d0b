// Library crate - exports the backtest engine and its building blocks

pub mod engine;

// Re-export commonly used types
pub use engine::{
    BacktestReport, Candle, CandleSeries, Direction, Engine, EngineConfig, EngineError,
    EngineEvent, ExitReason, Ledger, Setup, Summary, Timeframe, Trade, Zone, ZoneKind, ZoneState,
};
