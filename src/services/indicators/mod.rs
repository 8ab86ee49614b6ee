//! Indicator calculator.
//!
//! Pure functions over a chronologically sorted close series. Every series
//! function returns a vector aligned to its input with `None` until enough
//! history has accumulated.

mod bollinger;
mod ema;
mod macd;
mod rsi;
mod sma;

pub use bollinger::{bollinger, BollingerBands};
pub use ema::ema_series;
pub use macd::{macd_series, MacdSeries};
pub use rsi::rsi_series;
pub use sma::{sma, sma_series};

use crate::types::{finite, OhlcvBar, TechnicalIndicators};

pub const RSI_PERIOD: usize = 14;
pub const MACD_FAST: usize = 12;
pub const MACD_SLOW: usize = 26;
pub const MACD_SIGNAL: usize = 9;
pub const BOLLINGER_PERIOD: usize = 20;
pub const BOLLINGER_K: f64 = 2.0;

fn last(series: &[Option<f64>]) -> Option<f64> {
    finite(series.last().copied().flatten())
}

/// Latest value of every indicator for the given closes.
pub fn compute_technicals(closes: &[f64]) -> TechnicalIndicators {
    let macd = macd_series(closes, MACD_FAST, MACD_SLOW, MACD_SIGNAL);
    let bands = bollinger(closes, BOLLINGER_PERIOD, BOLLINGER_K);

    TechnicalIndicators {
        sma_20: finite(sma(closes, 20)),
        sma_50: finite(sma(closes, 50)),
        sma_100: finite(sma(closes, 100)),
        sma_150: finite(sma(closes, 150)),
        sma_200: finite(sma(closes, 200)),
        rsi_14: last(&rsi_series(closes, RSI_PERIOD)),
        macd_line: last(&macd.line),
        macd_signal: last(&macd.signal),
        macd_histogram: last(&macd.histogram),
        bollinger_upper: finite(bands.map(|b| b.upper)),
        bollinger_middle: finite(bands.map(|b| b.middle)),
        bollinger_lower: finite(bands.map(|b| b.lower)),
    }
}

/// Sort bars by date and fill their per-bar indicator fields.
pub fn annotate_bars(bars: &mut [OhlcvBar]) {
    bars.sort_by_key(|b| b.date);
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let sma_20 = sma_series(&closes, 20);
    let sma_50 = sma_series(&closes, 50);
    let rsi_14 = rsi_series(&closes, RSI_PERIOD);

    for (i, bar) in bars.iter_mut().enumerate() {
        bar.sma_20 = finite(sma_20[i]);
        bar.sma_50 = finite(sma_50[i]);
        bar.rsi_14 = finite(rsi_14[i]);
    }
}
