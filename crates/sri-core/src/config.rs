use chrono::{NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::{FactorSpec, Provider, SriError};

pub const DEFAULT_DATA_PATH: &str = "data/risk_factors.csv";

/// What index construction does when the reference factor is not in the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReferencePolicy {
    /// Keep whatever sign the decomposition returned.
    #[default]
    LeaveUnadjusted,

    /// Refuse to build an index whose direction cannot be pinned.
    FailClosed,
}

impl FromStr for ReferencePolicy {
    type Err = SriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "leave" | "leave_unadjusted" | "unadjusted" => Ok(ReferencePolicy::LeaveUnadjusted),
            "fail" | "fail_closed" => Ok(ReferencePolicy::FailClosed),
            other => Err(SriError::Config(format!("Unknown reference policy '{}'", other))),
        }
    }
}

/// Bounded exponential backoff applied per upstream request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// No retries, no sleeping.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (0-based): base * 2^attempt, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

/// Pipeline configuration. Built once at startup and passed down explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SriConfig {
    pub factors: Vec<FactorSpec>,
    /// Canonical name of the factor that fixes the index sign
    pub reference_factor: String,
    pub reference_policy: ReferencePolicy,
    pub start_date: NaiveDate,
    pub data_path: PathBuf,
    /// Day that closes and labels each weekly bin
    pub weekly_anchor: Weekday,
    pub fred_api_key: Option<String>,
    pub retry: RetryPolicy,
    pub http_timeout: Duration,
}

impl Default for SriConfig {
    fn default() -> Self {
        Self {
            factors: FactorSpec::defaults(),
            reference_factor: FactorSpec::vix().name,
            reference_policy: ReferencePolicy::default(),
            start_date: NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or_default(),
            data_path: PathBuf::from(DEFAULT_DATA_PATH),
            weekly_anchor: Weekday::Fri,
            fred_api_key: None,
            retry: RetryPolicy::default(),
            http_timeout: Duration::from_secs(30),
        }
    }
}

impl SriConfig {
    pub fn from_env() -> Result<Self, SriError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SriError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let factors = match get("SRI_FACTORS") {
            Some(list) => list
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(FactorSpec::from_str)
                .collect::<Result<Vec<_>, _>>()?,
            None => defaults.factors,
        };

        let start_date = match get("SRI_START_DATE") {
            Some(v) => NaiveDate::parse_from_str(&v, "%Y-%m-%d")
                .map_err(|e| SriError::Config(format!("SRI_START_DATE '{}': {}", v, e)))?,
            None => defaults.start_date,
        };

        let weekly_anchor = match get("SRI_WEEKLY_ANCHOR") {
            Some(v) => v
                .parse::<Weekday>()
                .map_err(|_| SriError::Config(format!("SRI_WEEKLY_ANCHOR '{}' is not a weekday", v)))?,
            None => defaults.weekly_anchor,
        };

        let retry = RetryPolicy {
            max_attempts: parse_or(get("SRI_RETRY_ATTEMPTS"), "SRI_RETRY_ATTEMPTS", defaults.retry.max_attempts)?,
            base_delay: Duration::from_millis(parse_or(
                get("SRI_RETRY_BASE_MS"),
                "SRI_RETRY_BASE_MS",
                defaults.retry.base_delay.as_millis() as u64,
            )?),
            max_delay: defaults.retry.max_delay,
        };

        let config = Self {
            factors,
            reference_factor: get("SRI_REFERENCE_FACTOR").unwrap_or(defaults.reference_factor),
            reference_policy: match get("SRI_REFERENCE_POLICY") {
                Some(v) => v.parse()?,
                None => defaults.reference_policy,
            },
            start_date,
            data_path: get("SRI_DATA_PATH").map(PathBuf::from).unwrap_or(defaults.data_path),
            weekly_anchor,
            fred_api_key: get("FRED_API_KEY"),
            retry,
            http_timeout: Duration::from_secs(parse_or(
                get("SRI_HTTP_TIMEOUT_SECS"),
                "SRI_HTTP_TIMEOUT_SECS",
                defaults.http_timeout.as_secs(),
            )?),
        };

        config.validate()?;
        Ok(config)
    }

    /// Startup checks shared by every command. Provider credentials are checked
    /// where the acquisition component is built.
    pub fn validate(&self) -> Result<(), SriError> {
        if self.factors.is_empty() {
            return Err(SriError::Config("At least one risk factor must be configured".to_string()));
        }

        let mut seen = HashSet::new();
        for factor in &self.factors {
            if !seen.insert(factor.name.as_str()) {
                return Err(SriError::Config(format!("Risk factor '{}' configured twice", factor.name)));
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(SriError::Config("SRI_RETRY_ATTEMPTS must be at least 1".to_string()));
        }

        Ok(())
    }

    pub fn uses(&self, provider: Provider) -> bool {
        self.factors.iter().any(|f| f.provider == provider)
    }

    pub fn factor_names(&self) -> Vec<String> {
        self.factors.iter().map(|f| f.name.clone()).collect()
    }
}

fn parse_or<T: FromStr>(value: Option<String>, key: &str, default: T) -> Result<T, SriError> {
    match value {
        Some(v) => v
            .parse()
            .map_err(|_| SriError::Config(format!("{} has invalid value '{}'", key, v))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SriConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, SriConfig::default());
        assert!(config.fred_api_key.is_none());
        assert!(config.uses(Provider::Fred));
    }

    #[test]
    fn test_defaults_with_key() {
        let config = SriConfig::from_lookup(lookup(&[("FRED_API_KEY", "abc")])).unwrap();
        assert_eq!(config.fred_api_key.as_deref(), Some("abc"));
        assert_eq!(config.factor_names(), vec!["VIX", "MOVE", "BAMLC0A0CMEY"]);
        assert_eq!(config.reference_factor, "VIX");
        assert_eq!(config.weekly_anchor, Weekday::Fri);
        assert_eq!(config.start_date, NaiveDate::from_ymd_opt(2000, 1, 1).unwrap());
        assert_eq!(config.data_path, PathBuf::from(DEFAULT_DATA_PATH));
        assert_eq!(config.reference_policy, ReferencePolicy::LeaveUnadjusted);
    }

    #[test]
    fn test_overrides() {
        let config = SriConfig::from_lookup(lookup(&[
            ("SRI_FACTORS", "VIX, MOVE"),
            ("SRI_START_DATE", "2015-06-01"),
            ("SRI_WEEKLY_ANCHOR", "wed"),
            ("SRI_REFERENCE_POLICY", "fail"),
        ]))
        .unwrap();
        assert_eq!(config.factor_names(), vec!["VIX", "MOVE"]);
        assert_eq!(config.weekly_anchor, Weekday::Wed);
        assert_eq!(config.reference_policy, ReferencePolicy::FailClosed);
        assert!(!config.uses(Provider::Fred));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(SriConfig::from_lookup(lookup(&[("FRED_API_KEY", "k"), ("SRI_START_DATE", "yesterday")])).is_err());
        assert!(SriConfig::from_lookup(lookup(&[("FRED_API_KEY", "k"), ("SRI_RETRY_ATTEMPTS", "0")])).is_err());
        assert!(SriConfig::from_lookup(lookup(&[("FRED_API_KEY", "k"), ("SRI_FACTORS", "VIX,VIX")])).is_err());
        assert!(SriConfig::from_lookup(lookup(&[("FRED_API_KEY", "k"), ("SRI_WEEKLY_ANCHOR", "someday")])).is_err());
    }

    #[test]
    fn test_retry_delay_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(10), Duration::from_secs(8));
        assert_eq!(RetryPolicy::none().delay_for(3), Duration::ZERO);
    }
}
