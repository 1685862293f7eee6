use serde::Serialize;
use sri_core::{Column, FactorSpec, ReferencePolicy, RiskPanel, SriConfig, SriError, SRI_COLUMN};
use std::path::Path;

use crate::pca::{first_component, PrincipalComponent};
use crate::scaling::{min_max_scale, standardize};

const SRI_MIN: f64 = 0.0;
const SRI_MAX: f64 = 100.0;

/// Sign convention for index construction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexOptions {
    /// Factor whose loading must be non-negative (higher = more stress)
    pub reference_factor: String,
    pub reference_policy: ReferencePolicy,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            reference_factor: FactorSpec::vix().name,
            reference_policy: ReferencePolicy::default(),
        }
    }
}

impl From<&SriConfig> for IndexOptions {
    fn from(config: &SriConfig) -> Self {
        Self {
            reference_factor: config.reference_factor.clone(),
            reference_policy: config.reference_policy,
        }
    }
}

/// Result of index construction
#[derive(Debug, Clone, PartialEq)]
pub enum IndexOutcome {
    /// `SRI` computed for every row
    Computed {
        panel: RiskPanel,
        component: PrincipalComponent,
        /// Whether the raw component was negated to honour the reference sign
        sign_flipped: bool,
    },

    /// No configured factor was present; `SRI` is undefined for every row
    Degraded { panel: RiskPanel },
}

impl IndexOutcome {
    pub fn panel(&self) -> &RiskPanel {
        match self {
            IndexOutcome::Computed { panel, .. } | IndexOutcome::Degraded { panel } => panel,
        }
    }

    pub fn into_panel(self) -> RiskPanel {
        match self {
            IndexOutcome::Computed { panel, .. } | IndexOutcome::Degraded { panel } => panel,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, IndexOutcome::Degraded { .. })
    }

    pub fn component(&self) -> Option<&PrincipalComponent> {
        match self {
            IndexOutcome::Computed { component, .. } => Some(component),
            IndexOutcome::Degraded { .. } => None,
        }
    }

    /// The appended index column.
    pub fn sri(&self) -> &[Option<f64>] {
        self.panel()
            .column(SRI_COLUMN)
            .map(|c| c.values.as_slice())
            .unwrap_or_default()
    }
}

/// Build the Systemic Risk Index over `panel` and append it as the `SRI` column.
///
/// Only the entries of `factor_columns` present in the panel take part. Scaling and
/// min/max are fit on this exact window, so the same date can score differently
/// when the window changes.
pub fn construct_index<S: AsRef<str>>(
    panel: &RiskPanel,
    factor_columns: &[S],
    options: &IndexOptions,
) -> Result<IndexOutcome, SriError> {
    let mut retained: Vec<String> = Vec::new();
    for name in factor_columns.iter().map(AsRef::as_ref) {
        if name == SRI_COLUMN || retained.iter().any(|r| r == name) {
            continue;
        }
        if panel.contains(name) {
            retained.push(name.to_string());
        } else {
            tracing::debug!("Factor {} not in panel, excluded from the index", name);
        }
    }

    if retained.is_empty() {
        tracing::warn!("None of the configured risk factors are present; SRI is undefined");
        let panel = panel.with_column(Column::new(SRI_COLUMN, vec![None; panel.len()]))?;
        return Ok(IndexOutcome::Degraded { panel });
    }

    let factors = panel.select(&retained);
    let z = standardize(factors.columns())?;
    let (component, mut raw) = first_component(&retained, &z)?;

    let sign_flipped = match component.loading(&options.reference_factor) {
        Some(loading) => loading < 0.0,
        None => match options.reference_policy {
            ReferencePolicy::LeaveUnadjusted => {
                tracing::warn!(
                    "Reference factor {} absent; SRI sign left as returned by PCA",
                    options.reference_factor
                );
                false
            }
            ReferencePolicy::FailClosed => {
                return Err(SriError::Computation(format!(
                    "Reference factor {} absent; cannot fix the SRI sign",
                    options.reference_factor
                )));
            }
        },
    };

    let component = if sign_flipped {
        raw.iter_mut().for_each(|v| *v = -*v);
        component.negated()
    } else {
        component
    };

    let sri = min_max_scale(&raw, SRI_MIN, SRI_MAX)?;
    tracing::info!(
        "SRI built from {:?} over {} rows, explained variance {:.1}%",
        retained,
        sri.len(),
        component.explained_variance_ratio * 100.0
    );

    let panel = panel.with_column(Column::new(SRI_COLUMN, sri.into_iter().map(Some).collect()))?;
    Ok(IndexOutcome::Computed {
        panel,
        component,
        sign_flipped,
    })
}

/// Read a persisted panel and build the index over its full history.
pub fn load_index<S: AsRef<str>>(
    path: &Path,
    factor_columns: &[S],
    options: &IndexOptions,
) -> Result<IndexOutcome, SriError> {
    let panel = risk_data::read_panel(path)?;
    construct_index(&panel, factor_columns, options)
}
