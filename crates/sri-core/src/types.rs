use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;

use crate::SriError;

/// Name of the derived index column appended by index construction.
pub const SRI_COLUMN: &str = "SRI";

/// Header of the date column in persisted panels.
pub const DATE_COLUMN: &str = "Date";

/// Date-to-value mapping of a single series. `None` marks a gap.
pub type Observations = BTreeMap<NaiveDate, Option<f64>>;

/// Upstream data provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Provider {
    /// Yahoo Finance chart API (equity and bond volatility indices)
    Yahoo,

    /// Federal Reserve Economic Data (credit spread and yield series)
    Fred,
}

impl Provider {
    pub fn name(&self) -> &'static str {
        match self {
            Provider::Yahoo => "yahoo",
            Provider::Fred => "fred",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Provider {
    type Err = SriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "yahoo" | "yf" => Ok(Provider::Yahoo),
            "fred" => Ok(Provider::Fred),
            other => Err(SriError::Config(format!("Unknown provider '{}'", other))),
        }
    }
}

/// A configured risk factor: canonical column name plus where to fetch it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FactorSpec {
    /// Canonical column name in the panel (e.g. `VIX`)
    pub name: String,
    pub provider: Provider,
    /// Provider-native ticker (e.g. `^VIX`)
    pub symbol: String,
}

impl FactorSpec {
    pub fn new(name: impl Into<String>, provider: Provider, symbol: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provider,
            symbol: symbol.into(),
        }
    }

    /// CBOE equity volatility index. Reference factor for sign alignment.
    pub fn vix() -> Self {
        Self::new("VIX", Provider::Yahoo, "^VIX")
    }

    /// ICE BofAML MOVE bond volatility index.
    pub fn move_index() -> Self {
        Self::new("MOVE", Provider::Yahoo, "^MOVE")
    }

    /// ICE BofA US corporate index effective yield.
    pub fn corporate_yield() -> Self {
        Self::new("BAMLC0A0CMEY", Provider::Fred, "BAMLC0A0CMEY")
    }

    pub fn defaults() -> Vec<FactorSpec> {
        vec![Self::vix(), Self::move_index(), Self::corporate_yield()]
    }

    /// Look up one of the built-in factors by canonical name.
    pub fn known(name: &str) -> Option<FactorSpec> {
        Self::defaults().into_iter().find(|f| f.name == name)
    }
}

impl FromStr for FactorSpec {
    type Err = SriError;

    /// Accepts either a built-in canonical name (`VIX`) or `NAME=provider:SYMBOL`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.split_once('=') {
            None => Self::known(s)
                .ok_or_else(|| SriError::Config(format!("Unknown risk factor '{}'", s))),
            Some((name, target)) => {
                let (provider, symbol) = target.split_once(':').ok_or_else(|| {
                    SriError::Config(format!("Factor '{}' must look like NAME=provider:SYMBOL", s))
                })?;
                let name = name.trim();
                let symbol = symbol.trim();
                if name.is_empty() || symbol.is_empty() {
                    return Err(SriError::Config(format!("Factor '{}' has an empty name or symbol", s)));
                }
                Ok(Self::new(name, provider.parse()?, symbol))
            }
        }
    }
}

/// Named numeric time series from one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactorSeries {
    pub name: String,
    pub provider: Provider,
    pub observations: Observations,
}

impl RiskFactorSeries {
    pub fn new(name: impl Into<String>, provider: Provider) -> Self {
        Self {
            name: name.into(),
            provider,
            observations: Observations::new(),
        }
    }

    pub fn with_observations(name: impl Into<String>, provider: Provider, observations: Observations) -> Self {
        let mut series = Self::new(name, provider);
        for (date, value) in observations {
            series.insert(date, value);
        }
        series
    }

    /// Record a value. Non-finite values are stored as gaps.
    pub fn insert(&mut self, date: NaiveDate, value: Option<f64>) {
        self.observations.insert(date, value.filter(|v| v.is_finite()));
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    /// True when the series carries no usable value at all.
    pub fn is_empty(&self) -> bool {
        self.observations.values().all(Option::is_none)
    }

    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// One panel column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub values: Vec<Option<f64>>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn has_gaps(&self) -> bool {
        self.values.iter().any(Option::is_none)
    }
}

/// Date-indexed table of aligned risk factors.
///
/// Dates are strictly increasing. Every column holds exactly one cell per date.
/// Panels are never mutated in place: transformations return a new panel.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RiskPanel {
    dates: Vec<NaiveDate>,
    columns: Vec<Column>,
}

impl RiskPanel {
    pub fn new(dates: Vec<NaiveDate>, columns: Vec<Column>) -> Result<Self, SriError> {
        if let Some(w) = dates.windows(2).find(|w| w[0] >= w[1]) {
            return Err(SriError::InvalidData(format!(
                "Panel dates must be strictly increasing ({} followed by {})",
                w[0], w[1]
            )));
        }

        let mut seen = HashSet::new();
        for column in &columns {
            if column.name == DATE_COLUMN {
                return Err(SriError::InvalidData(format!("'{}' is reserved for the date index", DATE_COLUMN)));
            }
            if !seen.insert(column.name.as_str()) {
                return Err(SriError::InvalidData(format!("Duplicate column '{}'", column.name)));
            }
            if column.values.len() != dates.len() {
                return Err(SriError::InvalidData(format!(
                    "Column '{}' has {} values for {} dates",
                    column.name,
                    column.values.len(),
                    dates.len()
                )));
            }
        }

        Ok(Self { dates, columns })
    }

    /// Outer-join series on date. Dates missing from a series become gaps.
    pub fn from_series(series: Vec<RiskFactorSeries>) -> Result<Self, SriError> {
        let dates: Vec<NaiveDate> = series
            .iter()
            .flat_map(|s| s.observations.keys().copied())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let columns = series
            .into_iter()
            .map(|s| {
                let values = dates
                    .iter()
                    .map(|d| s.observations.get(d).copied().flatten())
                    .collect();
                Column::new(s.name, values)
            })
            .collect();

        Self::new(dates, columns)
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn has_gaps(&self) -> bool {
        self.columns.iter().any(Column::has_gaps)
    }

    /// Return a new panel with `column` appended, replacing any column of the same name.
    pub fn with_column(&self, column: Column) -> Result<Self, SriError> {
        let mut columns: Vec<Column> = self
            .columns
            .iter()
            .filter(|c| c.name != column.name)
            .cloned()
            .collect();
        columns.push(column);
        Self::new(self.dates.clone(), columns)
    }

    /// Subset of `names` present in the panel, in the requested order.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Self {
        let columns = names
            .iter()
            .filter_map(|n| self.column(n.as_ref()).cloned())
            .collect();
        Self {
            dates: self.dates.clone(),
            columns,
        }
    }

    /// Trailing window of the most recent `n` rows. Values are copied untouched.
    pub fn tail(&self, n: usize) -> Self {
        let start = self.len().saturating_sub(n);
        Self {
            dates: self.dates[start..].to_vec(),
            columns: self
                .columns
                .iter()
                .map(|c| Column::new(c.name.clone(), c.values[start..].to_vec()))
                .collect(),
        }
    }

    /// Most recent row as `(date, [(column, value)])`
    pub fn latest(&self) -> Option<(NaiveDate, Vec<(&str, Option<f64>)>)> {
        let last = self.len().checked_sub(1)?;
        let cells = self
            .columns
            .iter()
            .map(|c| (c.name.as_str(), c.values[last]))
            .collect();
        Some((self.dates[last], cells))
    }
}
