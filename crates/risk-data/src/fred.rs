use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use sri_core::{
    FactorSpec, Observations, Provider, RetryPolicy, SeriesSource, SourceResponse, SriConfig, SriError,
};

use crate::acquisition::fetch_each;
use crate::http::{build_client, get_json};

const OBSERVATIONS_URL: &str = "https://api.stlouisfed.org/fred/series/observations";

/// FRED marks holidays and unpublished days with this placeholder.
const MISSING_VALUE: &str = ".";

#[derive(Clone)]
pub struct FredSource {
    api_key: String,
    client: Client,
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct ObservationsResponse {
    #[serde(default)]
    observations: Vec<FredObservation>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FredObservation {
    date: String,
    value: String,
}

impl FredSource {
    pub fn new(api_key: String, client: Client, retry: RetryPolicy) -> Self {
        Self {
            api_key,
            client,
            retry,
        }
    }

    pub fn from_config(config: &SriConfig) -> Result<Self, SriError> {
        let api_key = config
            .fred_api_key
            .clone()
            .ok_or_else(|| SriError::Config("FRED_API_KEY must be set when a FRED factor is configured".to_string()))?;
        Ok(Self::new(api_key, build_client(config.http_timeout), config.retry))
    }

    /// Observation history for one FRED series id.
    pub async fn get_series(&self, series_id: &str, start: NaiveDate) -> Result<Observations, SriError> {
        let query = [
            ("series_id", series_id.to_string()),
            ("api_key", self.api_key.clone()),
            ("file_type", "json".to_string()),
            ("observation_start", start.format("%Y-%m-%d").to_string()),
        ];

        let response: ObservationsResponse =
            get_json(&self.client, OBSERVATIONS_URL, &query, Provider::Fred, &self.retry, series_id).await?;
        parse_observations(series_id, response)
    }
}

fn parse_observations(series_id: &str, response: ObservationsResponse) -> Result<Observations, SriError> {
    if let Some(message) = response.error_message {
        return Err(SriError::provider(Provider::Fred, format!("{}: {}", series_id, message)));
    }

    let mut observations = Observations::new();
    for obs in response.observations {
        let date = NaiveDate::parse_from_str(&obs.date, "%Y-%m-%d").map_err(|e| {
            SriError::provider(Provider::Fred, format!("{}: bad date '{}': {}", series_id, obs.date, e))
        })?;
        let value = match obs.value.trim() {
            MISSING_VALUE | "" => None,
            raw => Some(raw.parse::<f64>().map_err(|e| {
                SriError::provider(Provider::Fred, format!("{}: bad value '{}': {}", series_id, raw, e))
            })?),
        };
        observations.insert(date, value.filter(|v| v.is_finite()));
    }

    Ok(observations)
}

#[async_trait]
impl SeriesSource for FredSource {
    fn provider(&self) -> Provider {
        Provider::Fred
    }

    /// One request per series; the result is always a table keyed by series id.
    async fn fetch(&self, factors: &[FactorSpec], start: NaiveDate) -> Result<SourceResponse, SriError> {
        let table = fetch_each(Provider::Fred, factors, |factor| self.get_series(&factor.symbol, start)).await?;
        Ok(SourceResponse::Table(table))
    }
}
