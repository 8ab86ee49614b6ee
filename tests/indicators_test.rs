//! Integration tests for the indicator calculator

mod common;

use holdview::services::indicators::{
    annotate_bars, bollinger, compute_technicals, macd_series, rsi_series, sma_series,
};

fn rising(n: usize) -> Vec<f64> {
    (1..=n).map(|i| 100.0 + i as f64).collect()
}

#[test]
fn test_rsi_rising_series() {
    let closes = rising(40);
    let rsi = rsi_series(&closes, 14);

    assert!(rsi[..14].iter().all(Option::is_none));
    assert!(rsi[14..].iter().all(|v| *v == Some(100.0)));
}

#[test]
fn test_rsi_mixed_series_in_range() {
    let closes: Vec<f64> = (0..60)
        .map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0 + i as f64 * 0.1)
        .collect();
    for value in rsi_series(&closes, 14).into_iter().flatten() {
        assert!((0.0..=100.0).contains(&value));
    }
}

#[test]
fn test_sma_null_until_window_full() {
    let closes = rising(25);
    let sma = sma_series(&closes, 20);
    assert!(sma[..19].iter().all(Option::is_none));
    // Mean of 101..=120
    assert_eq!(sma[19], Some(110.5));
    assert_eq!(sma[24], Some(115.5));
}

#[test]
fn test_short_series_yields_nulls() {
    let technicals = compute_technicals(&rising(10));
    assert!(technicals.sma_20.is_none());
    assert!(technicals.sma_200.is_none());
    assert!(technicals.rsi_14.is_none());
    assert!(technicals.macd_line.is_none());
    assert!(technicals.bollinger_upper.is_none());

    assert!(compute_technicals(&[]).sma_20.is_none());
}

#[test]
fn test_full_history_technicals() {
    let closes = rising(250);
    let t = compute_technicals(&closes);
    assert_eq!(t.sma_200, Some((151.0 + 350.0) / 2.0));
    assert_eq!(t.rsi_14, Some(100.0));
    // Steady uptrend: fast EMA above slow EMA.
    assert!(t.macd_line.unwrap() > 0.0);
    let (upper, middle, lower) = (
        t.bollinger_upper.unwrap(),
        t.bollinger_middle.unwrap(),
        t.bollinger_lower.unwrap(),
    );
    assert!(upper > middle && middle > lower);
}

#[test]
fn test_bollinger_flat_series_collapses() {
    let bands = bollinger(&[50.0; 20], 20, 2.0).unwrap();
    assert_eq!(bands.upper, 50.0);
    assert_eq!(bands.middle, 50.0);
    assert_eq!(bands.lower, 50.0);
    assert!(bollinger(&[50.0; 19], 20, 2.0).is_none());
}

#[test]
fn test_macd_aligned_to_input() {
    let closes = rising(40);
    let macd = macd_series(&closes, 12, 26, 9);
    assert_eq!(macd.line.len(), 40);
    assert!(macd.line[..25].iter().all(Option::is_none));
    assert!(macd.line[25].is_some());
    assert!(macd.signal[..33].iter().all(Option::is_none));
    assert!(macd.signal[33].is_some());
    assert!(macd.histogram[33].is_some());
}

#[test]
fn test_annotate_bars_sorts_and_fills() {
    let mut bars = common::daily_bars(&rising(30));
    bars.reverse();
    annotate_bars(&mut bars);

    assert!(bars.windows(2).all(|w| w[0].date < w[1].date));
    assert!(bars[18].sma_20.is_none());
    assert_eq!(bars[19].sma_20, Some(110.5));
    assert!(bars[29].sma_50.is_none());
    assert_eq!(bars[14].rsi_14, Some(100.0));
}
