//! Relative Strength Index with Wilder smoothing.

/// RSI aligned to `closes`.
///
/// The first `period` values are `None`. Index `period` is seeded with the simple
/// average gain/loss over the first `period` deltas, later values are smoothed as
/// `avg = (avg * (period - 1) + new) / period`. A zero average loss yields 100.
pub fn rsi_series(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; closes.len()];
    if period == 0 || closes.len() <= period {
        return out;
    }

    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let gain = |d: f64| d.max(0.0);
    let loss = |d: f64| (-d).max(0.0);

    let mut avg_gain = deltas[..period].iter().copied().map(gain).sum::<f64>() / period as f64;
    let mut avg_loss = deltas[..period].iter().copied().map(loss).sum::<f64>() / period as f64;
    out[period] = Some(rsi_value(avg_gain, avg_loss));

    let n = period as f64;
    for (i, delta) in deltas.iter().enumerate().skip(period) {
        avg_gain = (avg_gain * (n - 1.0) + gain(*delta)) / n;
        avg_loss = (avg_loss * (n - 1.0) + loss(*delta)) / n;
        out[i + 1] = Some(rsi_value(avg_gain, avg_loss));
    }
    out
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - (100.0 / (1.0 + rs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rsi_rising_series() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let series = rsi_series(&closes, 14);

        assert!(series[..14].iter().all(Option::is_none));
        assert_eq!(series[14], Some(100.0));
        assert_eq!(series[29], Some(100.0));
    }

    #[test]
    fn test_rsi_bounded() {
        let closes: Vec<f64> = (0..60)
            .map(|i| 100.0 + ((i as f64) * 0.7).sin() * 5.0)
            .collect();
        for value in rsi_series(&closes, 14).into_iter().flatten() {
            assert!((0.0..=100.0).contains(&value));
        }
    }
}
