use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use serde::Deserialize;
use sri_core::{
    FactorSpec, Observations, Provider, RetryPolicy, SeriesSource, SourceResponse, SriConfig, SriError,
};

use crate::acquisition::fetch_each;
use crate::http::{build_client, get_json};

const CHART_URL: &str = "https://query2.finance.yahoo.com/v8/finance/chart";

/// Daily closes from the Yahoo Finance chart API.
#[derive(Clone)]
pub struct YahooSource {
    client: Client,
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<QuoteBlock>,
}

#[derive(Debug, Deserialize)]
struct QuoteBlock {
    #[serde(default)]
    close: Vec<Option<f64>>,
}

impl YahooSource {
    pub fn new(client: Client, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    pub fn from_config(config: &SriConfig) -> Self {
        Self::new(build_client(config.http_timeout), config.retry)
    }

    /// Daily close history for one native symbol.
    pub async fn get_closes(&self, symbol: &str, start: NaiveDate) -> Result<Observations, SriError> {
        let period1 = start
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp())
            .unwrap_or_default();
        let period2 = Utc::now().timestamp();

        let url = format!("{}/{}", CHART_URL, symbol);
        let query = [
            ("period1", period1.to_string()),
            ("period2", period2.to_string()),
            ("interval", "1d".to_string()),
        ];

        let envelope: ChartEnvelope = get_json(&self.client, &url, &query, Provider::Yahoo, &self.retry, symbol).await?;
        parse_chart(symbol, envelope)
    }
}

fn parse_chart(symbol: &str, envelope: ChartEnvelope) -> Result<Observations, SriError> {
    if let Some(err) = envelope.chart.error {
        return Err(SriError::provider(
            Provider::Yahoo,
            format!("{} for {}: {}", err.code, symbol, err.description),
        ));
    }

    let result = envelope
        .chart
        .result
        .and_then(|r| r.into_iter().next())
        .ok_or_else(|| SriError::provider(Provider::Yahoo, format!("No chart data found for {}", symbol)))?;

    let closes = result
        .indicators
        .quote
        .into_iter()
        .next()
        .map(|q| q.close)
        .unwrap_or_default();

    let mut observations = Observations::new();
    for (i, ts) in result.timestamp.iter().enumerate() {
        let Some(date) = DateTime::from_timestamp(*ts, 0).map(|dt| dt.date_naive()) else {
            continue;
        };
        let close = closes.get(i).copied().flatten().filter(|v| v.is_finite());
        // Several bars can share a UTC date around session boundaries; keep the latest.
        if close.is_some() || !observations.contains_key(&date) {
            observations.insert(date, close);
        }
    }

    Ok(observations)
}

#[async_trait]
impl SeriesSource for YahooSource {
    fn provider(&self) -> Provider {
        Provider::Yahoo
    }

    /// A single requested symbol comes back as a bare series, several as a table.
    async fn fetch(&self, factors: &[FactorSpec], start: NaiveDate) -> Result<SourceResponse, SriError> {
        if let [only] = factors {
            return Ok(SourceResponse::Series(self.get_closes(&only.symbol, start).await?));
        }

        let table = fetch_each(Provider::Yahoo, factors, |factor| self.get_closes(&factor.symbol, start)).await?;
        Ok(SourceResponse::Table(table))
    }
}
