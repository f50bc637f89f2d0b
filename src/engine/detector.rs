//! 3-bar imbalance detection on the higher timeframe
//!
//! A bullish gap exists when bar i's low clears bar i-2's high; bearish when
//! bar i's high stays under bar i-2's low. The middle bar is deliberately
//! skipped: the gap spans the outer pair. Only fully closed bars may occupy
//! any of the three window slots.

use super::candles::{Candle, CandleSeries, Timeframe};
use super::zone::{Zone, ZoneKind};

/// Detect a zone from a window of 3 consecutive closed bars.
/// `third` is the bar that completes the pattern; its open time becomes the
/// zone's `formed_at`.
pub fn detect_zone(first: &Candle, _middle: &Candle, third: &Candle, timeframe: Timeframe) -> Option<Zone> {
    if third.low > first.high {
        Some(Zone::new(ZoneKind::Bullish, third.low, first.high, third.open_time, timeframe))
    } else if third.high < first.low {
        Some(Zone::new(ZoneKind::Bearish, first.low, third.high, third.open_time, timeframe))
    } else {
        None
    }
}

/// Lazy scan over a closed-bar series, yielding zones in formation order.
/// Cloning the detector restarts the scan from its current position; a fresh
/// `ZoneDetector::new` restarts from the beginning.
#[derive(Debug, Clone)]
pub struct ZoneDetector<'a> {
    series: &'a CandleSeries,
    next_index: usize,
}

impl<'a> ZoneDetector<'a> {
    pub fn new(series: &'a CandleSeries) -> Self {
        Self { series, next_index: 2 }
    }
}

impl Iterator for ZoneDetector<'_> {
    type Item = Zone;

    fn next(&mut self) -> Option<Zone> {
        let candles = self.series.candles();
        while self.next_index < candles.len() {
            let i = self.next_index;
            self.next_index += 1;
            if let Some(zone) = detect_zone(
                &candles[i - 2],
                &candles[i - 1],
                &candles[i],
                self.series.timeframe(),
            ) {
                return Some(zone);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::zone::ZoneKind;
    use chrono::{TimeZone, Utc};

    fn bar(ts_minutes: i64, high: f64, low: f64) -> Candle {
        Candle {
            open_time: Utc.timestamp_opt(ts_minutes * 60, 0).unwrap(),
            open: (high + low) / 2.0,
            high,
            low,
            close: (high + low) / 2.0,
            volume: 1.0,
        }
    }

    fn series(bars: Vec<Candle>) -> CandleSeries {
        CandleSeries::new(Timeframe::minutes(240), bars).unwrap()
    }

    #[test]
    fn detects_bullish_gap_between_outer_bars() {
        // low[2]=108 > high[0]=100 -> bullish zone bottom=100, top=108
        let s = series(vec![bar(0, 100.0, 90.0), bar(240, 105.0, 95.0), bar(480, 115.0, 108.0)]);
        let zones: Vec<Zone> = ZoneDetector::new(&s).collect();
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].kind, ZoneKind::Bullish);
        assert_eq!(zones[0].bottom, 100.0);
        assert_eq!(zones[0].top, 108.0);
        assert_eq!(zones[0].formed_at, Utc.timestamp_opt(480 * 60, 0).unwrap());
    }

    #[test]
    fn detects_bearish_gap() {
        // high[2]=90 < low[0]=95 -> bearish zone top=95, bottom=90
        let s = series(vec![bar(0, 105.0, 95.0), bar(240, 100.0, 92.0), bar(480, 90.0, 85.0)]);
        let zones: Vec<Zone> = ZoneDetector::new(&s).collect();
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].kind, ZoneKind::Bearish);
        assert_eq!(zones[0].top, 95.0);
        assert_eq!(zones[0].bottom, 90.0);
    }

    #[test]
    fn middle_bar_is_ignored() {
        // Middle bar overlaps both outer bars; the gap only needs the outer pair
        let s = series(vec![bar(0, 100.0, 90.0), bar(240, 112.0, 85.0), bar(480, 115.0, 108.0)]);
        let zones: Vec<Zone> = ZoneDetector::new(&s).collect();
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].kind, ZoneKind::Bullish);
    }

    #[test]
    fn no_zone_without_gap() {
        let s = series(vec![bar(0, 100.0, 90.0), bar(240, 105.0, 95.0), bar(480, 110.0, 99.0)]);
        assert_eq!(ZoneDetector::new(&s).count(), 0);
    }

    #[test]
    fn scan_is_restartable() {
        let s = series(vec![bar(0, 100.0, 90.0), bar(240, 105.0, 95.0), bar(480, 115.0, 108.0)]);
        let first: Vec<Zone> = ZoneDetector::new(&s).collect();
        let second: Vec<Zone> = ZoneDetector::new(&s).collect();
        assert_eq!(first.len(), second.len());
        assert_eq!(first[0].id, second[0].id);
    }

    #[test]
    fn overlapping_windows_each_produce_at_most_one_zone() {
        // Two consecutive gaps up
        let s = series(vec![
            bar(0, 100.0, 90.0),
            bar(240, 105.0, 95.0),
            bar(480, 115.0, 108.0),
            bar(720, 125.0, 118.0),
        ]);
        let zones: Vec<Zone> = ZoneDetector::new(&s).collect();
        assert_eq!(zones.len(), 2);
        assert!(zones[0].formed_at < zones[1].formed_at);
    }
}
