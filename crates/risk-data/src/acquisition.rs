use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use sri_core::{
    FactorSpec, Observations, Provider, RiskFactorSeries, RiskPanel, SeriesSource, SourceResponse, SriConfig, SriError,
};

use crate::{FredSource, YahooSource};

/// Fetches configured factors from their providers and joins them on date.
pub struct Acquirer {
    sources: BTreeMap<Provider, Arc<dyn SeriesSource>>,
}

impl Acquirer {
    /// Register one handler per provider. Registering a provider twice is a configuration error.
    pub fn new(sources: Vec<Arc<dyn SeriesSource>>) -> Result<Self, SriError> {
        let mut map: BTreeMap<Provider, Arc<dyn SeriesSource>> = BTreeMap::new();
        for source in sources {
            let provider = source.provider();
            if map.insert(provider, source).is_some() {
                return Err(SriError::Config(format!("Provider '{}' registered twice", provider)));
            }
        }
        Ok(Self { sources: map })
    }

    /// Build the live adapters the configuration needs, failing fast on missing credentials.
    pub fn from_config(config: &SriConfig) -> Result<Self, SriError> {
        let mut sources: Vec<Arc<dyn SeriesSource>> = Vec::new();
        if config.uses(Provider::Yahoo) {
            sources.push(Arc::new(YahooSource::from_config(config)));
        }
        if config.uses(Provider::Fred) {
            sources.push(Arc::new(FredSource::from_config(config)?));
        }

        let acquirer = Self::new(sources)?;
        acquirer.check_coverage(&config.factors)?;
        Ok(acquirer)
    }

    pub fn providers(&self) -> Vec<Provider> {
        self.sources.keys().copied().collect()
    }

    fn check_coverage(&self, factors: &[FactorSpec]) -> Result<(), SriError> {
        match factors.iter().find(|f| !self.sources.contains_key(&f.provider)) {
            Some(f) => Err(SriError::Config(format!(
                "No source registered for provider '{}' (factor {})",
                f.provider, f.name
            ))),
            None => Ok(()),
        }
    }

    /// Query every provider for its share of `factors` from `start` to today and outer-join
    /// the canonical series. One failing provider is tolerated while another delivers data.
    pub async fn fetch_raw(&self, factors: &[FactorSpec], start: NaiveDate) -> Result<RiskPanel, SriError> {
        self.check_coverage(factors)?;

        let mut by_provider: BTreeMap<Provider, Vec<FactorSpec>> = BTreeMap::new();
        for factor in factors {
            by_provider.entry(factor.provider).or_default().push(factor.clone());
        }

        let mut collected: Vec<RiskFactorSeries> = Vec::new();
        let mut failures: Vec<String> = Vec::new();

        for (provider, group) in &by_provider {
            let Some(source) = self.sources.get(provider) else {
                continue;
            };
            tracing::info!("Fetching {} factor(s) from {} since {}", group.len(), provider, start);

            let series = match source.fetch(group, start).await {
                Ok(response) => canonicalize(*provider, group, response),
                Err(e) => Err(e),
            };

            match series {
                Ok(series) => {
                    for s in series {
                        if s.is_empty() {
                            tracing::warn!("{} returned no data for {}, excluding it", provider, s.name);
                        } else {
                            collected.push(s);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("{} failed, continuing with remaining sources: {}", provider, e);
                    failures.push(e.to_string());
                }
            }
        }

        if collected.is_empty() {
            let detail = if failures.is_empty() {
                "every source returned empty data".to_string()
            } else {
                failures.join("; ")
            };
            return Err(SriError::Acquisition(format!("No risk factor data available: {}", detail)));
        }

        let panel = RiskPanel::from_series(collected)?;
        tracing::info!(
            "Raw panel: {} rows, columns {:?}",
            panel.len(),
            panel.column_names()
        );
        Ok(panel)
    }
}

/// Fetch every factor of one provider in turn, keyed by native symbol.
///
/// A failing symbol is logged and skipped. The call fails only when every symbol failed.
pub(crate) async fn fetch_each<'a, F, Fut>(
    provider: Provider,
    factors: &'a [FactorSpec],
    mut fetch_one: F,
) -> Result<Vec<RiskFactorSeries>, SriError>
where
    F: FnMut(&'a FactorSpec) -> Fut,
    Fut: Future<Output = Result<Observations, SriError>>,
{
    let mut table = Vec::with_capacity(factors.len());
    let mut failures = Vec::new();

    for factor in factors {
        match fetch_one(factor).await {
            Ok(observations) => {
                tracing::debug!("{} {}: {} observations", provider, factor.symbol, observations.len());
                table.push(RiskFactorSeries::with_observations(&factor.symbol, provider, observations));
            }
            Err(e) => {
                tracing::warn!("{} {} unavailable: {}", provider, factor.symbol, e);
                failures.push(format!("{}: {}", factor.symbol, e));
            }
        }
    }

    if table.is_empty() && !failures.is_empty() {
        return Err(SriError::provider(
            provider,
            format!("No symbol returned data ({})", failures.join("; ")),
        ));
    }
    Ok(table)
}

/// Fold a provider response into series named by canonical factor name.
fn canonicalize(
    provider: Provider,
    requested: &[FactorSpec],
    response: SourceResponse,
) -> Result<Vec<RiskFactorSeries>, SriError> {
    match response {
        SourceResponse::Series(observations) => match requested {
            [only] => Ok(vec![RiskFactorSeries::with_observations(
                only.name.clone(),
                provider,
                observations,
            )]),
            _ => Err(SriError::provider(
                provider,
                format!("Bare series returned for {} requested symbols", requested.len()),
            )),
        },
        SourceResponse::Table(table) => Ok(table
            .into_iter()
            .filter_map(|series| {
                match requested
                    .iter()
                    .find(|f| f.symbol == series.name || f.name == series.name)
                {
                    Some(factor) => Some(RiskFactorSeries {
                        name: factor.name.clone(),
                        provider,
                        observations: series.observations,
                    }),
                    None => {
                        tracing::warn!("{} returned unrequested series '{}', ignoring", provider, series.name);
                        None
                    }
                }
            })
            .collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sri_core::Observations;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn observations(points: &[(NaiveDate, f64)]) -> Observations {
        points.iter().map(|(d, v)| (*d, Some(*v))).collect()
    }

    /// In-memory source answering with a canned response.
    struct StaticSource {
        provider: Provider,
        response: Result<SourceResponse, String>,
    }

    #[async_trait]
    impl SeriesSource for StaticSource {
        fn provider(&self) -> Provider {
            self.provider
        }

        async fn fetch(&self, _factors: &[FactorSpec], _start: NaiveDate) -> Result<SourceResponse, SriError> {
            self.response
                .clone()
                .map_err(|msg| SriError::provider(self.provider, msg))
        }
    }

    fn source(provider: Provider, response: Result<SourceResponse, String>) -> Arc<dyn SeriesSource> {
        Arc::new(StaticSource { provider, response })
    }

    fn yahoo_table() -> SourceResponse {
        SourceResponse::Table(vec![
            RiskFactorSeries::with_observations(
                "^VIX",
                Provider::Yahoo,
                observations(&[(d(2024, 1, 2), 13.2), (d(2024, 1, 3), 14.0)]),
            ),
            RiskFactorSeries::with_observations(
                "^MOVE",
                Provider::Yahoo,
                observations(&[(d(2024, 1, 2), 110.0), (d(2024, 1, 3), 112.5)]),
            ),
        ])
    }

    #[tokio::test]
    async fn test_fetch_raw_joins_and_renames() {
        let fred = SourceResponse::Table(vec![RiskFactorSeries::with_observations(
            "BAMLC0A0CMEY",
            Provider::Fred,
            observations(&[(d(2024, 1, 3), 5.3), (d(2024, 1, 4), 5.4)]),
        )]);
        let acquirer = Acquirer::new(vec![
            source(Provider::Yahoo, Ok(yahoo_table())),
            source(Provider::Fred, Ok(fred)),
        ])
        .unwrap();

        let panel = acquirer.fetch_raw(&FactorSpec::defaults(), d(2024, 1, 1)).await.unwrap();
        assert_eq!(panel.dates(), &[d(2024, 1, 2), d(2024, 1, 3), d(2024, 1, 4)]);
        assert_eq!(panel.column("VIX").unwrap().values, vec![Some(13.2), Some(14.0), None]);
        assert_eq!(panel.column("MOVE").unwrap().values, vec![Some(110.0), Some(112.5), None]);
        assert_eq!(panel.column("BAMLC0A0CMEY").unwrap().values, vec![None, Some(5.3), Some(5.4)]);
    }

    #[tokio::test]
    async fn test_bare_series_is_coerced_to_named_column() {
        let bare = SourceResponse::Series(observations(&[(d(2024, 1, 2), 13.2)]));
        let acquirer = Acquirer::new(vec![source(Provider::Yahoo, Ok(bare))]).unwrap();

        let panel = acquirer.fetch_raw(&[FactorSpec::vix()], d(2024, 1, 1)).await.unwrap();
        assert_eq!(panel.column_names(), vec!["VIX"]);
        assert_eq!(panel.column("VIX").unwrap().values, vec![Some(13.2)]);
    }

    #[tokio::test]
    async fn test_bare_series_for_many_symbols_is_rejected() {
        let bare = SourceResponse::Series(observations(&[(d(2024, 1, 2), 13.2)]));
        let acquirer = Acquirer::new(vec![source(Provider::Yahoo, Ok(bare))]).unwrap();

        let result = acquirer
            .fetch_raw(&[FactorSpec::vix(), FactorSpec::move_index()], d(2024, 1, 1))
            .await;
        assert!(matches!(result, Err(SriError::Acquisition(_))));
    }

    #[tokio::test]
    async fn test_single_failing_source_is_tolerated() {
        let acquirer = Acquirer::new(vec![
            source(Provider::Yahoo, Ok(yahoo_table())),
            source(Provider::Fred, Err("HTTP 500".to_string())),
        ])
        .unwrap();

        let panel = acquirer.fetch_raw(&FactorSpec::defaults(), d(2024, 1, 1)).await.unwrap();
        assert_eq!(panel.column_names(), vec!["VIX", "MOVE"]);
    }

    #[tokio::test]
    async fn test_all_sources_failing_is_acquisition_error() {
        let acquirer = Acquirer::new(vec![
            source(Provider::Yahoo, Err("timeout".to_string())),
            source(Provider::Fred, Ok(SourceResponse::Table(vec![]))),
        ])
        .unwrap();

        let result = acquirer.fetch_raw(&FactorSpec::defaults(), d(2024, 1, 1)).await;
        match result {
            Err(SriError::Acquisition(msg)) => assert!(msg.contains("timeout")),
            other => panic!("expected acquisition error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unregistered_provider_is_config_error() {
        let acquirer = Acquirer::new(vec![source(Provider::Yahoo, Ok(yahoo_table()))]).unwrap();
        let result = acquirer.fetch_raw(&FactorSpec::defaults(), d(2024, 1, 1)).await;
        assert!(matches!(result, Err(SriError::Config(_))));
    }

    #[tokio::test]
    async fn test_fetch_each_skips_failing_symbol() {
        let factors = FactorSpec::defaults();
        let table = fetch_each(Provider::Fred, &factors, |factor| async move {
            if factor.symbol == "^MOVE" {
                Err(SriError::provider(Provider::Fred, "HTTP 400"))
            } else {
                Ok(observations(&[(d(2024, 1, 2), 1.0)]))
            }
        })
        .await
        .unwrap();

        let symbols: Vec<&str> = table.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(symbols, vec!["^VIX", "BAMLC0A0CMEY"]);
        assert!(table.iter().all(|s| s.provider == Provider::Fred));
    }

    #[tokio::test]
    async fn test_fetch_each_fails_when_every_symbol_fails() {
        let factors = vec![FactorSpec::corporate_yield()];
        let result = fetch_each(Provider::Fred, &factors, |_| async {
            Err(SriError::Http("HTTP 503".to_string()))
        })
        .await;

        match result {
            Err(SriError::Provider { provider, message }) => {
                assert_eq!(provider, Provider::Fred);
                assert!(message.contains("BAMLC0A0CMEY"));
            }
            other => panic!("expected provider error, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_provider_registration() {
        let result = Acquirer::new(vec![
            source(Provider::Yahoo, Ok(yahoo_table())),
            source(Provider::Yahoo, Ok(yahoo_table())),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_from_config_registers_needed_providers() {
        let config = SriConfig {
            factors: vec![FactorSpec::vix(), FactorSpec::move_index()],
            ..SriConfig::default()
        };
        let acquirer = Acquirer::from_config(&config).unwrap();
        assert_eq!(acquirer.providers(), vec![Provider::Yahoo]);

        // default factors include a FRED series but no key is configured
        assert!(Acquirer::from_config(&SriConfig::default()).is_err());
    }
}
