//! Candle series types and input validation
//!
//! Everything downstream assumes a clean, strictly time-ordered series, so
//! malformed input is rejected here before any bar is processed.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fixed bar duration of a candle series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeframe {
    minutes: u32,
}

impl Timeframe {
    pub fn minutes(minutes: u32) -> Self {
        Self { minutes }
    }

    pub fn duration(&self) -> Duration {
        Duration::minutes(self.minutes as i64)
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.minutes % 60 == 0 {
            write!(f, "{}h", self.minutes / 60)
        } else {
            write!(f, "{}m", self.minutes)
        }
    }
}

/// A single OHLCV bar. `open_time` is the bar's open timestamp; the bar is
/// only considered closed (and actionable) at `open_time + timeframe`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// The instant this bar is fully closed for the given timeframe.
    pub fn close_time(&self, timeframe: Timeframe) -> DateTime<Utc> {
        self.open_time + timeframe.duration()
    }
}

/// Validation failures for a candle series. These are fatal: the run is
/// rejected before processing, never mid-stream.
#[derive(Debug, Error)]
pub enum SeriesError {
    #[error("bar {index}: open time {current} is not after previous bar {previous}")]
    NonMonotonic {
        index: usize,
        previous: DateTime<Utc>,
        current: DateTime<Utc>,
    },
    #[error("bar {index}: prices must be finite and positive")]
    BadPrice { index: usize },
    #[error("bar {index}: range violates low <= open,close <= high")]
    BadRange { index: usize },
    #[error("bar {index}: volume must be finite and non-negative")]
    BadVolume { index: usize },
}

/// Immutable, strictly time-ordered sequence of closed bars for one timeframe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandleSeries {
    timeframe: Timeframe,
    candles: Vec<Candle>,
}

impl CandleSeries {
    /// Validate and wrap a candle vector. Bars must be strictly increasing in
    /// open time with sane OHLC geometry.
    pub fn new(timeframe: Timeframe, candles: Vec<Candle>) -> Result<Self, SeriesError> {
        for (index, candle) in candles.iter().enumerate() {
            validate_candle(index, candle)?;
            if index > 0 {
                let previous = candles[index - 1].open_time;
                if candle.open_time <= previous {
                    return Err(SeriesError::NonMonotonic {
                        index,
                        previous,
                        current: candle.open_time,
                    });
                }
            }
        }
        Ok(Self { timeframe, candles })
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Candle> {
        self.candles.iter()
    }
}

/// Per-bar sanity checks shared by batch and incremental ingestion.
pub fn validate_candle(index: usize, candle: &Candle) -> Result<(), SeriesError> {
    let prices = [candle.open, candle.high, candle.low, candle.close];
    if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
        return Err(SeriesError::BadPrice { index });
    }
    if candle.low > candle.high
        || candle.open < candle.low
        || candle.open > candle.high
        || candle.close < candle.low
        || candle.close > candle.high
    {
        return Err(SeriesError::BadRange { index });
    }
    if !candle.volume.is_finite() || candle.volume < 0.0 {
        return Err(SeriesError::BadVolume { index });
    }
    Ok(())
}
