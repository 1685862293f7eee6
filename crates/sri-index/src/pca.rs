use nalgebra::{DMatrix, DVector, SymmetricEigen};
use serde::Serialize;
use sri_core::SriError;

/// Leading principal component of a standardized factor matrix
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrincipalComponent {
    /// Coefficient of each factor, in column order
    pub loadings: Vec<(String, f64)>,

    /// Variance captured by the component (largest covariance eigenvalue)
    pub eigenvalue: f64,

    /// Share of total variance captured, 0.0 to 1.0
    pub explained_variance_ratio: f64,
}

impl PrincipalComponent {
    pub fn loading(&self, factor: &str) -> Option<f64> {
        self.loadings.iter().find(|(name, _)| name == factor).map(|(_, l)| *l)
    }

    /// Flip the direction of the component.
    pub fn negated(mut self) -> Self {
        for (_, l) in self.loadings.iter_mut() {
            *l = -*l;
        }
        self
    }
}

/// Extract the first principal component of `z` (rows = dates, columns = factors).
///
/// Returns the component and the score of every row on it. The eigen-decomposition is
/// deterministic for a given input, but the overall sign is arbitrary.
pub fn first_component(names: &[String], z: &DMatrix<f64>) -> Result<(PrincipalComponent, Vec<f64>), SriError> {
    let (rows, cols) = z.shape();
    if cols == 0 || cols != names.len() {
        return Err(SriError::Computation(format!(
            "PCA needs one name per column ({} names, {} columns)",
            names.len(),
            cols
        )));
    }
    if rows < 2 {
        return Err(SriError::Computation(format!("PCA needs at least 2 rows, got {}", rows)));
    }
    if z.iter().any(|v| !v.is_finite()) {
        return Err(SriError::Computation("PCA input contains non-finite values".to_string()));
    }

    let covariance = (z.transpose() * z) / (rows as f64 - 1.0);
    let eigen = SymmetricEigen::new(covariance);

    let (index, eigenvalue) = eigen
        .eigenvalues
        .iter()
        .copied()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .ok_or_else(|| SriError::Computation("Eigen-decomposition returned no eigenvalues".to_string()))?;

    let total: f64 = eigen.eigenvalues.iter().sum();
    if !eigenvalue.is_finite() || !(eigenvalue > 0.0) || !(total > 0.0) {
        return Err(SriError::Computation(format!(
            "Degenerate covariance matrix (leading eigenvalue {})",
            eigenvalue
        )));
    }

    let runner_up = eigen
        .eigenvalues
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != index)
        .map(|(_, v)| *v)
        .fold(f64::NEG_INFINITY, f64::max);
    if (eigenvalue - runner_up).abs() <= 1e-9 * eigenvalue {
        tracing::warn!(
            "Leading eigenvalues are tied ({:.6} vs {:.6}); the first component is not unique",
            eigenvalue,
            runner_up
        );
    }

    let vector: DVector<f64> = eigen.eigenvectors.column(index).into_owned();
    let scores = z * &vector;

    let component = PrincipalComponent {
        loadings: names.iter().cloned().zip(vector.iter().copied()).collect(),
        eigenvalue,
        explained_variance_ratio: eigenvalue / total,
    };

    Ok((component, scores.iter().copied().collect()))
}
