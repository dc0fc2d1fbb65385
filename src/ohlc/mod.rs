//! On-the-fly OHLC candle aggregation from the raw tick stream.
//!
//! Candles are derived per query, never stored: the tick log is the source
//! of truth and bucket size is arbitrary. Memory is bounded by the tick
//! fetch cap, not by stream size.

use crate::models::{Candle, Tick};
use std::collections::BTreeMap;

/// Hard cap on ticks folded per query.
pub const TICK_FETCH_CAP: usize = 5_000;

pub const MIN_INTERVAL_SEC: i64 = 10;
pub const MAX_INTERVAL_SEC: i64 = 86_400;

pub fn clamp_interval(interval_sec: i64) -> i64 {
    interval_sec.clamp(MIN_INTERVAL_SEC, MAX_INTERVAL_SEC)
}

/// Fold ticks into candles bucketed by `interval_sec`, returning the last
/// `limit` buckets in ascending order. Empty buckets produce no candle; a
/// tick exactly on a bucket boundary opens the new bucket.
pub fn aggregate(ticks: &[Tick], interval_sec: i64, limit: usize) -> Vec<Candle> {
    let interval_sec = clamp_interval(interval_sec);
    if ticks.is_empty() || limit == 0 {
        return Vec::new();
    }

    let mut ordered: Vec<(i64, f64)> = ticks.iter().map(|t| (t.at_epoch, t.price)).collect();
    ordered.sort_unstable_by(|a, b| a.0.cmp(&b.0));

    let mut buckets: BTreeMap<i64, Candle> = BTreeMap::new();
    for (epoch, price) in ordered {
        let t = epoch.div_euclid(interval_sec) * interval_sec;
        buckets
            .entry(t)
            .and_modify(|c| {
                c.h = c.h.max(price);
                c.l = c.l.min(price);
                c.c = price;
            })
            .or_insert(Candle {
                t,
                o: price,
                h: price,
                l: price,
                c: price,
            });
    }

    let skip = buckets.len().saturating_sub(limit);
    buckets.into_values().skip(skip).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(at_epoch: i64, price: f64) -> Tick {
        Tick {
            id: None,
            at: String::new(),
            at_epoch,
            market: "BTCUSDT".to_string(),
            price,
        }
    }

    #[test]
    fn folds_ticks_into_minute_candles() {
        let ticks = vec![
            tick(1_700_000_000, 100.0),
            tick(1_700_000_030, 110.0),
            tick(1_700_000_059, 105.0),
            tick(1_700_000_061, 120.0),
        ];
        let candles = aggregate(&ticks, 60, 10);
        assert_eq!(candles.len(), 2);
        assert_eq!(
            candles[0],
            Candle { t: 1_700_000_000, o: 100.0, h: 110.0, l: 100.0, c: 105.0 }
        );
        assert_eq!(
            candles[1],
            Candle { t: 1_700_000_060, o: 120.0, h: 120.0, l: 120.0, c: 120.0 }
        );
    }

    #[test]
    fn boundary_tick_opens_the_new_bucket() {
        let ticks = vec![tick(119, 1.0), tick(120, 2.0)];
        let candles = aggregate(&ticks, 60, 10);
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].t, 60);
        assert_eq!(candles[1].t, 120);
        assert_eq!(candles[1].o, 2.0);
    }

    #[test]
    fn gaps_stay_sparse() {
        let ticks = vec![tick(0, 1.0), tick(600, 2.0)];
        let candles = aggregate(&ticks, 60, 10);
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].t, 0);
        assert_eq!(candles[1].t, 600);
    }

    #[test]
    fn unordered_input_is_sorted_before_folding() {
        let ticks = vec![tick(90, 5.0), tick(10, 1.0), tick(50, 3.0)];
        let candles = aggregate(&ticks, 60, 10);
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0], Candle { t: 0, o: 1.0, h: 3.0, l: 1.0, c: 3.0 });
        assert_eq!(candles[1], Candle { t: 60, o: 5.0, h: 5.0, l: 5.0, c: 5.0 });
    }

    #[test]
    fn limit_keeps_the_newest_buckets() {
        let ticks: Vec<Tick> = (0..10).map(|i| tick(i * 60, i as f64)).collect();
        let candles = aggregate(&ticks, 60, 3);
        assert_eq!(candles.len(), 3);
        assert_eq!(candles[0].t, 7 * 60);
        assert_eq!(candles[2].t, 9 * 60);
    }

    #[test]
    fn interval_clamps_to_bounds() {
        assert_eq!(clamp_interval(1), MIN_INTERVAL_SEC);
        assert_eq!(clamp_interval(1_000_000), MAX_INTERVAL_SEC);
        assert_eq!(clamp_interval(60), 60);
    }

    #[test]
    fn candle_shape_invariant_holds() {
        let ticks: Vec<Tick> = [
            (5, 10.0), (12, 7.5), (20, 11.0), (31, 9.0), (44, 10.5), (59, 8.0),
            (61, 12.0), (75, 13.5), (99, 13.0),
        ]
        .iter()
        .map(|&(e, p)| tick(e, p))
        .collect();

        for candle in aggregate(&ticks, 60, 100) {
            assert!(candle.l <= candle.o.min(candle.c));
            assert!(candle.h >= candle.o.max(candle.c));
            assert_eq!(candle.t % 60, 0);
        }
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(aggregate(&[], 60, 10).is_empty());
    }
}
