use crate::models::StockSeries;
use serde::{Deserialize, Serialize};

const TRADING_DAYS_PER_YEAR: f64 = 252.0;
const BARS_PER_YEAR: usize = 252;

/// Calculate Relative Strength Index (RSI)
///
/// RSI measures the magnitude of recent price changes to evaluate
/// overbought or oversold conditions. Prices are oldest first.
///
/// Values:
/// - RSI > 70: Overbought
/// - RSI < 30: Oversold
///
pub fn calculate_rsi(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period + 1 {
        return None;
    }

    let changes: Vec<f64> = prices.windows(2).map(|w| w[1] - w[0]).collect();
    let recent = &changes[changes.len() - period..];

    let avg_gain: f64 = recent.iter().filter(|c| **c > 0.0).sum::<f64>() / period as f64;
    let avg_loss: f64 = recent.iter().filter(|c| **c < 0.0).map(|c| c.abs()).sum::<f64>() / period as f64;

    if avg_loss == 0.0 {
        return Some(100.0);
    }

    let rs = avg_gain / avg_loss;
    Some(100.0 - (100.0 / (1.0 + rs)))
}

/// Simple moving average of the last `period` prices
pub fn calculate_sma(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let sum: f64 = prices.iter().rev().take(period).sum();
    Some(sum / period as f64)
}

/// Annualized standard deviation of daily log returns
pub fn annualized_volatility(prices: &[f64]) -> Option<f64> {
    let returns: Vec<f64> = prices
        .windows(2)
        .filter(|w| w[0] > 0.0 && w[1] > 0.0)
        .map(|w| (w[1] / w[0]).ln())
        .collect();
    if returns.len() < 2 {
        return None;
    }

    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance =
        returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (returns.len() - 1) as f64;
    Some(variance.sqrt() * TRADING_DAYS_PER_YEAR.sqrt())
}

/// Summary statistics derived from a daily series
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StockStats {
    pub current_price: Option<f64>,
    pub period_high: Option<f64>,
    pub period_low: Option<f64>,
    /// Percent change from the oldest bar in the window to the latest
    pub period_change_pct: Option<f64>,
    pub latest_volume: Option<f64>,
    pub rsi_14: Option<f64>,
    pub ma_50: Option<f64>,
    pub ma_200: Option<f64>,
    pub volatility: Option<f64>,
}

impl StockStats {
    pub fn trend(&self) -> Option<&'static str> {
        match (self.ma_50, self.ma_200) {
            (Some(short), Some(long)) if short > long => Some("bullish"),
            (Some(_), Some(_)) => Some("bearish"),
            _ => None,
        }
    }
}

/// Statistics over at most the last year of bars
pub fn stock_stats(series: &StockSeries) -> StockStats {
    let window = &series.bars[..series.bars.len().min(BARS_PER_YEAR)];
    let Some(latest) = window.first() else {
        return StockStats::default();
    };

    let closes: Vec<f64> = window.iter().rev().map(|bar| bar.close).collect();
    let high = window.iter().map(|bar| bar.high).fold(f64::MIN, f64::max);
    let low = window.iter().map(|bar| bar.low).fold(f64::MAX, f64::min);
    let oldest = closes[0];

    StockStats {
        current_price: Some(latest.close),
        period_high: Some(high),
        period_low: Some(low),
        period_change_pct: (oldest != 0.0).then(|| (latest.close - oldest) / oldest * 100.0),
        latest_volume: Some(latest.volume),
        rsi_14: calculate_rsi(&closes, 14),
        ma_50: calculate_sma(&closes, 50),
        ma_200: calculate_sma(&closes, 200),
        volatility: annualized_volatility(&closes),
    }
}
