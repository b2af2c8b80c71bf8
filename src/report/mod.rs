/// Markdown rendering of aggregated research data
///
/// Used for the raw-data report when narrative generation fails, and by the
/// CLI. Every missing value renders as [`NOT_AVAILABLE`] instead of being
/// omitted.

use crate::indicators::{assess_risk, growth_metrics, health_ratios, stock_stats, RiskLevel};
use crate::models::{AnalysisResult, DataCategory, ResearchResult};
use std::fmt::Write;

pub const NOT_AVAILABLE: &str = "Not Available";

const MAX_HEADLINES: usize = 5;
const MAX_FILINGS: usize = 5;

/// `$1.23B` / `$45.60M` / `$7.00K` / `$12.34`
pub fn format_currency(value: Option<f64>) -> String {
    let Some(value) = value else {
        return NOT_AVAILABLE.to_string();
    };
    let sign = if value < 0.0 { "-" } else { "" };
    let abs = value.abs();
    if abs >= 1e12 {
        format!("{}${:.2}T", sign, abs / 1e12)
    } else if abs >= 1e9 {
        format!("{}${:.2}B", sign, abs / 1e9)
    } else if abs >= 1e6 {
        format!("{}${:.2}M", sign, abs / 1e6)
    } else if abs >= 1e3 {
        format!("{}${:.2}K", sign, abs / 1e3)
    } else {
        format!("{}${:.2}", sign, abs)
    }
}

/// Value already expressed in percent
pub fn format_percentage(value: Option<f64>) -> String {
    value.map_or_else(|| NOT_AVAILABLE.to_string(), |v| format!("{:+.2}%", v))
}

pub fn format_ratio(value: Option<f64>) -> String {
    value.map_or_else(|| NOT_AVAILABLE.to_string(), |v| format!("{:.2}", v))
}

fn format_text(value: Option<&str>) -> String {
    value
        .filter(|v| !v.trim().is_empty())
        .map_or_else(|| NOT_AVAILABLE.to_string(), str::to_string)
}

pub fn markdown_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut table = format!("| {} |\n", headers.join(" | "));
    table.push_str(&format!("|{}\n", " --- |".repeat(headers.len())));
    for row in rows {
        table.push_str(&format!("| {} |\n", row.join(" | ")));
    }
    table
}

/// One-paragraph summary used when narrative generation failed
pub fn fallback_summary(analysis: &AnalysisResult) -> String {
    let total = analysis.company_results.len();
    let with_data: Vec<&str> = analysis
        .company_results
        .iter()
        .filter(|(_, r)| r.has_data())
        .map(|(key, _)| key.as_str())
        .collect();

    if with_data.is_empty() {
        format!(
            "No financial data could be retrieved for {} compan{}. Narrative generation failed.",
            total,
            if total == 1 { "y" } else { "ies" }
        )
    } else {
        format!(
            "Collected data for {} of {} compan{} ({}). Narrative generation failed; the raw data is reported below.",
            with_data.len(),
            total,
            if total == 1 { "y" } else { "ies" },
            with_data.join(", ")
        )
    }
}

/// Raw-data markdown report with an explicit note at the top
pub fn render_fallback(analysis: &AnalysisResult, note: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Research Report: {}\n", analysis.question);
    let _ = writeln!(out, "> **Note:** {}\n", note);

    let _ = writeln!(out, "## Summary\n");
    let _ = writeln!(out, "{}\n", fallback_summary(analysis));

    for (key, result) in &analysis.company_results {
        out.push_str(&render_company(key, result));
    }

    let _ = writeln!(out, "## Data Sources\n");
    if analysis.data_sources.is_empty() {
        let _ = writeln!(out, "- {}", NOT_AVAILABLE);
    } else {
        for source in &analysis.data_sources {
            let _ = writeln!(out, "- {}", source);
        }
    }

    if !analysis.limitations.is_empty() {
        let _ = writeln!(out, "\n## Limitations\n");
        for limitation in &analysis.limitations {
            let _ = writeln!(out, "- {}", limitation);
        }
    }
    out
}

/// Section for one company
pub fn render_company(key: &str, result: &ResearchResult) -> String {
    let mut out = String::new();
    let profile = result.profile();
    let name = profile
        .and_then(|p| p.name.as_deref())
        .unwrap_or(result.subtask.company_name.as_str());
    let _ = writeln!(out, "## {} ({})\n", format_text(Some(name)), key);

    if let Some(error) = &result.error {
        let _ = writeln!(out, "**Error:** {}\n", error);
    }

    let _ = writeln!(out, "### Company Profile\n");
    let _ = writeln!(
        out,
        "{}",
        markdown_table(
            &["Field", "Value"],
            &[
                vec!["Sector".into(), format_text(profile.and_then(|p| p.sector.as_deref()))],
                vec!["Industry".into(), format_text(profile.and_then(|p| p.industry.as_deref()))],
                vec!["Market Cap".into(), format_currency(profile.and_then(|p| p.market_cap))],
                vec!["P/E Ratio".into(), format_ratio(profile.and_then(|p| p.pe_ratio))],
                vec!["EPS".into(), format_ratio(profile.and_then(|p| p.eps))],
            ],
        )
    );

    let metrics = result.financial_metrics();
    let latest = metrics.and_then(|m| m.latest());
    let growth = metrics.map(growth_metrics).unwrap_or_default();
    let _ = writeln!(out, "### Financial Performance\n");
    let _ = writeln!(
        out,
        "{}",
        markdown_table(
            &["Metric", "Value"],
            &[
                vec!["Latest Period".into(), format_text(latest.map(|p| p.fiscal_date.as_str()))],
                vec!["Revenue".into(), format_currency(latest.and_then(|p| p.revenue))],
                vec!["Net Income".into(), format_currency(latest.and_then(|p| p.net_income))],
                vec!["Revenue Growth (QoQ)".into(), format_percentage(growth.revenue_growth)],
                vec!["Revenue Growth (YoY)".into(), format_percentage(growth.revenue_growth_yoy)],
                vec!["Net Income Growth (QoQ)".into(), format_percentage(growth.net_income_growth)],
                vec!["Profit Margin".into(), format_percentage(growth.profit_margin)],
                vec!["Operating Margin".into(), format_percentage(growth.operating_margin)],
            ],
        )
    );

    let health = result
        .balance_sheet()
        .map(|b| health_ratios(b, metrics))
        .unwrap_or_default();
    let _ = writeln!(out, "### Financial Health\n");
    let _ = writeln!(
        out,
        "{}",
        markdown_table(
            &["Ratio", "Value"],
            &[
                vec!["Cash / Liabilities".into(), format_percentage(health.cash_to_liabilities)],
                vec!["Debt / Equity".into(), format_ratio(health.debt_to_equity)],
                vec!["Revenue / Assets".into(), format_ratio(health.revenue_per_asset)],
            ],
        )
    );

    let stats = result.stock_series().map(stock_stats).unwrap_or_default();
    let _ = writeln!(out, "### Stock Performance\n");
    let _ = writeln!(
        out,
        "{}",
        markdown_table(
            &["Metric", "Value"],
            &[
                vec!["Current Price".into(), format_currency(stats.current_price)],
                vec!["52-Week High".into(), format_currency(stats.period_high)],
                vec!["52-Week Low".into(), format_currency(stats.period_low)],
                vec!["Period Change".into(), format_percentage(stats.period_change_pct)],
                vec!["RSI (14)".into(), format_ratio(stats.rsi_14)],
                vec!["Trend".into(), format_text(stats.trend())],
            ],
        )
    );

    let risk = assess_risk(profile, result.balance_sheet(), &stats);
    let level = |level: Option<RiskLevel>| format_text(level.map(|l| l.label()));
    let _ = writeln!(out, "### Risk\n");
    let _ = writeln!(
        out,
        "{}",
        markdown_table(
            &["Risk", "Level", "Basis"],
            &[
                vec![
                    "Market".into(),
                    level(risk.market.level),
                    format!(
                        "beta {}, volatility {}",
                        format_ratio(risk.market.beta),
                        format_percentage(risk.market.volatility.map(|v| v * 100.0))
                    ),
                ],
                vec![
                    "Debt".into(),
                    level(risk.financial.debt_level),
                    format!(
                        "long-term debt / assets {}",
                        format_percentage(risk.financial.debt_to_assets.map(|r| r * 100.0))
                    ),
                ],
                vec![
                    "Valuation".into(),
                    level(risk.valuation.level),
                    format!("P/E {}", format_ratio(risk.valuation.pe_ratio)),
                ],
            ],
        )
    );

    let _ = writeln!(out, "### Recent News\n");
    match result.news() {
        Some(news) => {
            if let Some(answer) = &news.answer {
                let _ = writeln!(out, "{}\n", answer);
            }
            for article in news.articles.iter().take(MAX_HEADLINES) {
                let _ = writeln!(out, "- [{}]({})", article.title, article.url);
            }
            out.push('\n');
        }
        None => {
            let _ = writeln!(out, "{}\n", NOT_AVAILABLE);
        }
    }

    let _ = writeln!(out, "### Recent Filings\n");
    match result.filings() {
        Some(filings) => {
            for filing in filings.filings.iter().take(MAX_FILINGS) {
                let _ = writeln!(out, "- {} filed {}", filing.form, filing.filed);
            }
            out.push('\n');
        }
        None => {
            let _ = writeln!(out, "{}\n", NOT_AVAILABLE);
        }
    }

    let missing = missing_categories(result);
    if !missing.is_empty() {
        let labels: Vec<&str> = missing.iter().map(|c| c.label()).collect();
        let _ = writeln!(out, "_Not Available: {}_\n", labels.join(", "));
    }
    out
}

/// Categories with no populated record
pub fn missing_categories(result: &ResearchResult) -> Vec<DataCategory> {
    DataCategory::ALL
        .into_iter()
        .filter(|c| result.record(*c).is_none())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CategoryData, FinancialMetrics, FinancialPeriod, SourceRecord, SubTask};
    use std::collections::BTreeMap;

    fn result_with_revenue(ticker: &str, revenue: Option<f64>) -> ResearchResult {
        let subtask = SubTask {
            company_name: ticker.to_string(),
            ticker: ticker.to_string(),
            ..Default::default()
        };
        let mut result = ResearchResult::new(subtask, Some(ticker.to_string()));
        if let Some(revenue) = revenue {
            result.records.insert(
                DataCategory::FinancialMetrics,
                SourceRecord::new(
                    "alpha_vantage",
                    CategoryData::FinancialMetrics(FinancialMetrics {
                        periods: vec![FinancialPeriod {
                            fiscal_date: "2024-06-30".to_string(),
                            revenue: Some(revenue),
                            ..Default::default()
                        }],
                    }),
                ),
            );
        } else {
            result.error = Some("Failed to retrieve any valid data from available sources".to_string());
        }
        result
    }

    #[test]
    fn test_format_currency() {
        assert_eq!(format_currency(Some(1_234_000_000.0)), "$1.23B");
        assert_eq!(format_currency(Some(45_600_000.0)), "$45.60M");
        assert_eq!(format_currency(Some(-7_000.0)), "-$7.00K");
        assert_eq!(format_currency(Some(12.5)), "$12.50");
        assert_eq!(format_currency(None), NOT_AVAILABLE);
    }

    #[test]
    fn test_format_percentage() {
        assert_eq!(format_percentage(Some(12.345)), "+12.35%");
        assert_eq!(format_percentage(Some(-3.0)), "-3.00%");
        assert_eq!(format_percentage(None), NOT_AVAILABLE);
    }

    #[test]
    fn test_markdown_table() {
        let table = markdown_table(&["A", "B"], &[vec!["1".into(), "2".into()]]);
        assert_eq!(table, "| A | B |\n| --- | --- |\n| 1 | 2 |\n");
    }

    #[test]
    fn test_fallback_report_marks_missing_data() {
        let mut companies = BTreeMap::new();
        companies.insert("AAPL".to_string(), result_with_revenue("AAPL", Some(85_000_000_000.0)));
        companies.insert("MSFT".to_string(), result_with_revenue("MSFT", None));
        let analysis = AnalysisResult::new("Compare Apple and Microsoft", companies);

        let report = render_fallback(&analysis, "Narrative generation failed");

        assert!(report.contains("Narrative generation failed"));
        assert!(report.contains("## AAPL (AAPL)"));
        assert!(report.contains("$85.00B"));
        assert!(report.contains("**Error:** Failed to retrieve"));
        assert!(report.contains(NOT_AVAILABLE));
        assert!(fallback_summary(&analysis).contains("1 of 2 companies (AAPL)"));
    }

    #[test]
    fn test_company_section_classifies_risk() {
        use crate::models::{BalanceSheet, BalanceSheetPeriod, CompanyProfile};

        let mut result = result_with_revenue("TSLA", Some(25_000_000_000.0));
        result.records.insert(
            DataCategory::Profile,
            SourceRecord::new(
                "alpha_vantage",
                CategoryData::Profile(CompanyProfile {
                    name: Some("Tesla Inc".to_string()),
                    beta: Some(2.3),
                    pe_ratio: Some(72.0),
                    ..Default::default()
                }),
            ),
        );
        result.records.insert(
            DataCategory::BalanceSheet,
            SourceRecord::new(
                "alpha_vantage",
                CategoryData::BalanceSheet(BalanceSheet {
                    periods: vec![BalanceSheetPeriod {
                        fiscal_date: "2024-06-30".to_string(),
                        total_assets: Some(100.0),
                        long_term_debt: Some(10.0),
                        ..Default::default()
                    }],
                }),
            ),
        );

        let section = render_company("TSLA", &result);
        assert!(section.contains("### Risk"));
        assert!(section.contains("| Market | High | beta 2.30"));
        assert!(section.contains("| Debt | Low | long-term debt / assets +10.00% |"));
        assert!(section.contains("| Valuation | High | P/E 72.00 |"));
    }
}
