use crate::models::{BalanceSheet, FinancialMetrics};
use serde::{Deserialize, Serialize};

/// Growth rates are capped to ±100%
const GROWTH_CAP: f64 = 100.0;
/// Quarters back for year-over-year comparison
const YOY_PERIODS: usize = 4;

/// Percent growth from `previous` to `current`.
///
/// Zero when either side is zero; `None` when either side is missing.
pub fn growth_rate(current: Option<f64>, previous: Option<f64>) -> Option<f64> {
    let (current, previous) = (current?, previous?);
    if current == 0.0 || previous == 0.0 {
        return Some(0.0);
    }
    let growth = (current - previous) / previous.abs() * 100.0;
    Some(growth.clamp(-GROWTH_CAP, GROWTH_CAP))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GrowthMetrics {
    /// Latest period vs the one before
    pub revenue_growth: Option<f64>,
    /// Latest period vs four periods back
    pub revenue_growth_yoy: Option<f64>,
    pub net_income_growth: Option<f64>,
    pub net_income_growth_yoy: Option<f64>,
    /// Net income / revenue of the latest period, in percent
    pub profit_margin: Option<f64>,
    pub operating_margin: Option<f64>,
}

pub fn growth_metrics(metrics: &FinancialMetrics) -> GrowthMetrics {
    let periods = &metrics.periods;
    let revenue = |i: usize| periods.get(i).and_then(|p| p.revenue);
    let net_income = |i: usize| periods.get(i).and_then(|p| p.net_income);
    let latest = periods.first();

    let margin = |numerator: Option<f64>| match (numerator, latest.and_then(|p| p.revenue)) {
        (Some(n), Some(r)) if r != 0.0 => Some(n / r * 100.0),
        _ => None,
    };

    GrowthMetrics {
        revenue_growth: growth_rate(revenue(0), revenue(1)),
        revenue_growth_yoy: growth_rate(revenue(0), revenue(YOY_PERIODS)),
        net_income_growth: growth_rate(net_income(0), net_income(1)),
        net_income_growth_yoy: growth_rate(net_income(0), net_income(YOY_PERIODS)),
        profit_margin: margin(latest.and_then(|p| p.net_income)),
        operating_margin: margin(latest.and_then(|p| p.operating_income)),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthRatios {
    /// Cash as a percent of total liabilities
    pub cash_to_liabilities: Option<f64>,
    pub debt_to_equity: Option<f64>,
    pub revenue_per_asset: Option<f64>,
}

/// Liquidity, solvency and efficiency ratios from the latest periods
pub fn health_ratios(balance: &BalanceSheet, metrics: Option<&FinancialMetrics>) -> HealthRatios {
    let Some(sheet) = balance.latest() else {
        return HealthRatios::default();
    };

    let cash_to_liabilities = match (sheet.cash, sheet.total_liabilities) {
        (Some(cash), Some(liabilities)) if liabilities != 0.0 => Some(cash / liabilities * 100.0),
        _ => None,
    };

    let equity = sheet.shareholder_equity.or_else(|| match (sheet.total_assets, sheet.total_liabilities) {
        (Some(assets), Some(liabilities)) => Some(assets - liabilities),
        _ => None,
    });
    let debt_to_equity = match (sheet.long_term_debt, equity) {
        (Some(debt), Some(equity)) if equity != 0.0 => Some(debt / equity),
        _ => None,
    };

    let revenue = metrics.and_then(|m| m.latest()).and_then(|p| p.revenue);
    let revenue_per_asset = match (revenue, sheet.total_assets) {
        (Some(revenue), Some(assets)) if assets != 0.0 => Some(revenue / assets),
        _ => None,
    };

    HealthRatios {
        cash_to_liabilities,
        debt_to_equity,
        revenue_per_asset,
    }
}
