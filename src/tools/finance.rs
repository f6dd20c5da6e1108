//! Financial lookup adapter
//!
//! Quote-API style endpoints (Yahoo-compatible). Facets select what gets
//! fetched per call: live price, analyst recommendations, fundamentals,
//! company news. Read-only; a facet that fails is reported in the output
//! rather than failing the whole lookup, as long as at least one facet
//! succeeded.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;

use crate::agent::tools::{ArgKind, FinanceFacet, ToolAdapter, ToolArgs, ToolOutput};

pub struct FinanceTool {
    client: reqwest::Client,
    base_url: String,
}

impl FinanceTool {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self { client, base_url: base_url.trim_end_matches('/').to_string() }
    }

    async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<Value> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .query(query)
            .send()
            .await
            .context("Failed to send finance request")?;

        if !response.status().is_success() {
            anyhow::bail!("finance provider error: {}", response.status());
        }

        response.json().await.context("Failed to parse finance response")
    }

    async fn fetch_quote(&self, symbol: &str) -> Result<Value> {
        let body = self.get_json("/v7/finance/quote", &[("symbols", symbol)]).await?;
        body.pointer("/quoteResponse/result/0")
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no quote for '{}'", symbol))
    }

    async fn fetch_recommendations(&self, symbol: &str) -> Result<Value> {
        let body = self
            .get_json(
                &format!("/v10/finance/quoteSummary/{}", symbol),
                &[("modules", "recommendationTrend")],
            )
            .await?;
        body.pointer("/quoteSummary/result/0/recommendationTrend/trend/0")
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no recommendation trend for '{}'", symbol))
    }

    async fn fetch_news(&self, symbol: &str) -> Result<Vec<Value>> {
        let body = self
            .get_json("/v1/finance/search", &[("q", symbol), ("newsCount", "5")])
            .await?;
        Ok(body.get("news").and_then(|n| n.as_array()).cloned().unwrap_or_default())
    }
}

fn num(value: &Value, key: &str) -> Option<f64> {
    value.get(key).and_then(|v| v.as_f64())
}

/// Price summary as a markdown table row set.
pub(crate) fn render_price(symbol: &str, quote: &Value) -> String {
    let name = quote
        .get("longName")
        .or_else(|| quote.get("shortName"))
        .and_then(|v| v.as_str())
        .unwrap_or(symbol);

    let mut rows = vec![
        "| Field | Value |".to_string(),
        "|---|---|".to_string(),
        format!("| Name | {} |", name),
    ];
    if let Some(price) = num(quote, "regularMarketPrice") {
        rows.push(format!("| Price | {:.2} |", price));
    }
    if let Some(change) = num(quote, "regularMarketChangePercent") {
        rows.push(format!("| Change | {:.2}% |", change));
    }
    rows.join("\n")
}

pub(crate) fn render_fundamentals(quote: &Value) -> String {
    let mut rows = vec!["| Fundamental | Value |".to_string(), "|---|---|".to_string()];
    if let Some(cap) = num(quote, "marketCap") {
        rows.push(format!("| Market cap | {:.0} |", cap));
    }
    if let Some(pe) = num(quote, "trailingPE") {
        rows.push(format!("| Trailing P/E | {:.2} |", pe));
    }
    if let Some(eps) = num(quote, "epsTrailingTwelveMonths") {
        rows.push(format!("| EPS (ttm) | {:.2} |", eps));
    }
    if rows.len() == 2 {
        rows.push("| (no fundamentals reported) | - |".to_string());
    }
    rows.join("\n")
}

pub(crate) fn render_recommendations(trend: &Value) -> String {
    let field = |key: &str| trend.get(key).and_then(|v| v.as_i64()).unwrap_or(0);
    format!(
        "Analyst recommendations: strong buy {}, buy {}, hold {}, sell {}, strong sell {}",
        field("strongBuy"),
        field("buy"),
        field("hold"),
        field("sell"),
        field("strongSell"),
    )
}

pub(crate) fn render_news(news: &[Value]) -> String {
    let mut lines = vec!["Recent company news:".to_string()];
    for item in news.iter().take(5) {
        let title = item.get("title").and_then(|v| v.as_str()).unwrap_or("(untitled)");
        match item.get("link").and_then(|v| v.as_str()) {
            Some(link) => lines.push(format!("- {} ({})", title, link)),
            None => lines.push(format!("- {}", title)),
        }
    }
    if lines.len() == 1 {
        lines.push("- none found".to_string());
    }
    lines.join("\n")
}

#[async_trait]
impl ToolAdapter for FinanceTool {
    fn name(&self) -> &str {
        "finance"
    }

    fn accepts(&self) -> ArgKind {
        ArgKind::Finance
    }

    fn description(&self) -> &str {
        "Look up stock data for a ticker: price, analyst recommendations, fundamentals, company news."
    }

    async fn invoke(&self, args: ToolArgs) -> Result<ToolOutput> {
        let ToolArgs::Finance { symbol, facets } = args else {
            anyhow::bail!("finance adapter received a non-finance argument variant");
        };
        let symbol = symbol.to_uppercase();
        let facets = if facets.is_empty() { vec![FinanceFacet::Price] } else { facets };

        let mut sections = Vec::new();
        let mut failures = Vec::new();
        let mut data = serde_json::Map::new();

        for facet in &facets {
            match facet {
                FinanceFacet::Price => match self.fetch_quote(&symbol).await {
                    Ok(quote) => {
                        sections.push(render_price(&symbol, &quote));
                        data.insert("quote".to_string(), quote);
                    }
                    Err(e) => failures.push(format!("price: {}", e)),
                },
                FinanceFacet::Fundamentals => match self.fetch_quote(&symbol).await {
                    Ok(quote) => {
                        sections.push(render_fundamentals(&quote));
                        data.insert("fundamentals".to_string(), quote);
                    }
                    Err(e) => failures.push(format!("fundamentals: {}", e)),
                },
                FinanceFacet::Recommendations => match self.fetch_recommendations(&symbol).await {
                    Ok(trend) => {
                        sections.push(render_recommendations(&trend));
                        data.insert("recommendations".to_string(), trend);
                    }
                    Err(e) => failures.push(format!("recommendations: {}", e)),
                },
                FinanceFacet::News => match self.fetch_news(&symbol).await {
                    Ok(news) => {
                        sections.push(render_news(&news));
                        data.insert("news".to_string(), Value::Array(news));
                    }
                    Err(e) => failures.push(format!("news: {}", e)),
                },
            }
        }

        if sections.is_empty() {
            anyhow::bail!("all facets failed for '{}': {}", symbol, failures.join("; "));
        }

        for failure in &failures {
            sections.push(format!("(unavailable - {})", failure));
        }

        Ok(ToolOutput::text(sections.join("\n\n"))
            .with_data(Value::Object(data))
            .with_citation(format!("https://finance.yahoo.com/quote/{}", symbol)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_price_table() {
        let quote = serde_json::json!({
            "longName": "NVIDIA Corporation",
            "regularMarketPrice": 875.21,
            "regularMarketChangePercent": 1.35
        });
        let table = render_price("NVDA", &quote);
        assert!(table.contains("| Name | NVIDIA Corporation |"));
        assert!(table.contains("| Price | 875.21 |"));
        assert!(table.contains("| Change | 1.35% |"));
    }

    #[test]
    fn test_render_price_falls_back_to_symbol() {
        let table = render_price("NVDA", &serde_json::json!({}));
        assert!(table.contains("| Name | NVDA |"));
    }

    #[test]
    fn test_render_recommendations() {
        let trend = serde_json::json!({"strongBuy": 12, "buy": 20, "hold": 5, "sell": 1, "strongSell": 0});
        let line = render_recommendations(&trend);
        assert!(line.contains("strong buy 12"));
        assert!(line.contains("hold 5"));
    }

    #[test]
    fn test_render_news_with_links() {
        let news = vec![
            serde_json::json!({"title": "Earnings beat", "link": "https://news.example/1"}),
            serde_json::json!({"title": "No link item"}),
        ];
        let rendered = render_news(&news);
        assert!(rendered.contains("- Earnings beat (https://news.example/1)"));
        assert!(rendered.contains("- No link item"));
    }

    #[test]
    fn test_render_news_empty() {
        assert!(render_news(&[]).contains("none found"));
    }
}
