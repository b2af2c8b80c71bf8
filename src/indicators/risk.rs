//! Risk classification from profile, balance sheet and price data
//!
//! Three independent views, each left unclassified when its inputs are missing:
//! - Market: beta > 1.3 or volatility > 40% → High; beta < 0.8 and volatility < 20% → Low
//! - Financial: long-term debt over 50% of assets → High; under 20% → Low
//! - Valuation: P/E > 40 → High; P/E < 15 → Low; non-positive P/E → NegativeEarnings

use super::StockStats;
use crate::models::{BalanceSheet, CompanyProfile};
use serde::{Deserialize, Serialize};

const HIGH_BETA: f64 = 1.3;
const LOW_BETA: f64 = 0.8;
// Annualized, as a fraction
const HIGH_VOLATILITY: f64 = 0.40;
const LOW_VOLATILITY: f64 = 0.20;
const HIGH_DEBT_TO_ASSETS: f64 = 0.5;
const LOW_DEBT_TO_ASSETS: f64 = 0.2;
const HIGH_PE: f64 = 40.0;
const LOW_PE: f64 = 15.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
    /// Valuation only: P/E is zero or negative
    NegativeEarnings,
}

impl RiskLevel {
    pub fn label(&self) -> &'static str {
        match self {
            RiskLevel::Low => "Low",
            RiskLevel::Moderate => "Moderate",
            RiskLevel::High => "High",
            RiskLevel::NegativeEarnings => "Negative earnings",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketRisk {
    pub beta: Option<f64>,
    pub volatility: Option<f64>,
    pub level: Option<RiskLevel>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinancialRisk {
    pub debt_to_assets: Option<f64>,
    pub debt_level: Option<RiskLevel>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValuationRisk {
    pub pe_ratio: Option<f64>,
    pub level: Option<RiskLevel>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub market: MarketRisk,
    pub financial: FinancialRisk,
    pub valuation: ValuationRisk,
}

impl RiskAssessment {
    pub fn is_empty(&self) -> bool {
        self.market.level.is_none() && self.financial.debt_level.is_none() && self.valuation.level.is_none()
    }
}

pub fn assess_risk(
    profile: Option<&CompanyProfile>,
    balance: Option<&BalanceSheet>,
    stock: &StockStats,
) -> RiskAssessment {
    let beta = profile.and_then(|p| p.beta);
    let pe_ratio = profile.and_then(|p| p.pe_ratio);
    let debt_to_assets = balance
        .and_then(|b| b.latest())
        .and_then(|sheet| match (sheet.long_term_debt, sheet.total_assets) {
            (Some(debt), Some(assets)) if assets > 0.0 => Some(debt / assets),
            _ => None,
        });

    RiskAssessment {
        market: MarketRisk {
            beta,
            volatility: stock.volatility,
            level: market_level(beta, stock.volatility),
        },
        financial: FinancialRisk {
            debt_to_assets,
            debt_level: debt_to_assets.map(debt_level),
        },
        valuation: ValuationRisk {
            pe_ratio,
            level: pe_ratio.map(valuation_level),
        },
    }
}

fn market_level(beta: Option<f64>, volatility: Option<f64>) -> Option<RiskLevel> {
    if beta.is_none() && volatility.is_none() {
        return None;
    }
    if beta.is_some_and(|b| b > HIGH_BETA) || volatility.is_some_and(|v| v > HIGH_VOLATILITY) {
        return Some(RiskLevel::High);
    }
    // Low needs every available input to agree
    let calm_beta = beta.map_or(true, |b| b < LOW_BETA);
    let calm_volatility = volatility.map_or(true, |v| v < LOW_VOLATILITY);
    if calm_beta && calm_volatility {
        Some(RiskLevel::Low)
    } else {
        Some(RiskLevel::Moderate)
    }
}

fn debt_level(debt_to_assets: f64) -> RiskLevel {
    if debt_to_assets > HIGH_DEBT_TO_ASSETS {
        RiskLevel::High
    } else if debt_to_assets < LOW_DEBT_TO_ASSETS {
        RiskLevel::Low
    } else {
        RiskLevel::Moderate
    }
}

fn valuation_level(pe_ratio: f64) -> RiskLevel {
    if pe_ratio <= 0.0 {
        RiskLevel::NegativeEarnings
    } else if pe_ratio > HIGH_PE {
        RiskLevel::High
    } else if pe_ratio < LOW_PE {
        RiskLevel::Low
    } else {
        RiskLevel::Moderate
    }
}
