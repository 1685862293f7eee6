use async_trait::async_trait;
use chrono::NaiveDate;

use crate::{FactorSpec, Observations, Provider, RiskFactorSeries, SriError};

/// Raw provider payload before it reaches the panel.
///
/// Providers answer a one-symbol request with a bare series and a multi-symbol
/// request with a table keyed by native symbol. The acquisition boundary folds
/// both into canonical named series.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceResponse {
    Series(Observations),
    Table(Vec<RiskFactorSeries>),
}

impl SourceResponse {
    pub fn is_empty(&self) -> bool {
        match self {
            SourceResponse::Series(obs) => obs.values().all(Option::is_none),
            SourceResponse::Table(series) => series.iter().all(RiskFactorSeries::is_empty),
        }
    }
}

/// Trait for upstream time-series providers
#[async_trait]
pub trait SeriesSource: Send + Sync {
    fn provider(&self) -> Provider;

    /// Fetch `factors` from `start` through today.
    async fn fetch(&self, factors: &[FactorSpec], start: NaiveDate) -> Result<SourceResponse, SriError>;
}
