// Derived metrics computed from decoded records
// Technicals over daily series, growth and health ratios over statements,
// risk classification over all three

pub mod fundamentals;
pub mod risk;
pub mod technical;

pub use fundamentals::{growth_metrics, growth_rate, health_ratios, GrowthMetrics, HealthRatios};
pub use risk::{assess_risk, RiskAssessment, RiskLevel};
pub use technical::{annualized_volatility, calculate_rsi, calculate_sma, stock_stats, StockStats};
