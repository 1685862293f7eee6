use nalgebra::DMatrix;
use sri_core::{Column, SriError};
use statrs::statistics::Statistics;

/// Relative tolerance under which a column's spread counts as zero.
const ZERO_SPREAD: f64 = 1e-12;

/// Z-score each column (population standard deviation) into an `n x k` matrix.
///
/// Mean and deviation are fit on exactly the values passed in. Gaps and non-finite
/// values are rejected. A constant column is centred to zeros with unit scale, so it
/// carries no weight; the call fails only when every column is constant.
pub fn standardize(columns: &[Column]) -> Result<DMatrix<f64>, SriError> {
    let rows = columns.first().map(|c| c.values.len()).unwrap_or(0);
    if rows < 2 {
        return Err(SriError::Computation(format!(
            "Standardization needs at least 2 rows, got {}",
            rows
        )));
    }

    let mut matrix = DMatrix::zeros(rows, columns.len());
    let mut flat = Vec::new();
    for (j, column) in columns.iter().enumerate() {
        if column.values.len() != rows {
            return Err(SriError::Computation(format!(
                "Column '{}' has {} rows, expected {}",
                column.name,
                column.values.len(),
                rows
            )));
        }

        let values = column
            .values
            .iter()
            .enumerate()
            .map(|(i, v)| match v {
                Some(x) if x.is_finite() => Ok(*x),
                _ => Err(SriError::Computation(format!(
                    "Column '{}' has a missing or non-finite value at row {}",
                    column.name, i
                ))),
            })
            .collect::<Result<Vec<f64>, _>>()?;

        let mean = values.iter().mean();
        let std_dev = values.iter().population_std_dev();
        if std_dev.is_finite() && std_dev > ZERO_SPREAD * mean.abs().max(1.0) {
            for (i, x) in values.iter().enumerate() {
                matrix[(i, j)] = (x - mean) / std_dev;
            }
        } else {
            // centred constant column stays all zeros
            flat.push(column.name.as_str());
        }
    }

    if flat.len() == columns.len() {
        return Err(SriError::Computation(format!(
            "Every column is constant ({:?}); standardization is undefined",
            flat
        )));
    }
    if !flat.is_empty() {
        tracing::debug!("Constant column(s) {:?} centred to zero", flat);
    }

    Ok(matrix)
}

/// Map `values` linearly so the window minimum lands on `lo` and the maximum on `hi`.
pub fn min_max_scale(values: &[f64], lo: f64, hi: f64) -> Result<Vec<f64>, SriError> {
    if values.iter().any(|v| !v.is_finite()) {
        return Err(SriError::Computation("Cannot rescale non-finite values".to_string()));
    }

    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    if !(range > 0.0) {
        return Err(SriError::Computation(format!(
            "Cannot rescale a series with zero range ({} values)",
            values.len()
        )));
    }

    Ok(values
        .iter()
        .map(|v| {
            let scaled = lo + (v - min) / range * (hi - lo);
            scaled.clamp(lo.min(hi), lo.max(hi))
        })
        .collect())
}
