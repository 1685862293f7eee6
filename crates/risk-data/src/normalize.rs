use chrono::{Datelike, Duration, NaiveDate, Weekday};
use sri_core::{Column, RiskPanel, SriError};

/// The anchor date closing the week that contains `date` (on or after `date`).
pub fn week_label(date: NaiveDate, anchor: Weekday) -> NaiveDate {
    let ahead = (anchor.num_days_from_monday() + 7 - date.weekday().num_days_from_monday()) % 7;
    date + Duration::days(ahead as i64)
}

fn forward_fill(values: &mut [Option<f64>]) {
    let mut last = None;
    for v in values.iter_mut() {
        match v {
            Some(x) => last = Some(*x),
            None => *v = last,
        }
    }
}

/// Turn a raw daily panel into a dense weekly one.
///
/// Daily gaps are forward-filled, each week keeps its last observation on or before
/// the anchor day, weeks without data inherit the previous week, and rows that still
/// have a gap (late-starting factors) are dropped from the front of history.
pub fn normalize(raw: &RiskPanel, anchor: Weekday) -> Result<RiskPanel, SriError> {
    let (Some(&first), Some(&last)) = (raw.dates().first(), raw.dates().last()) else {
        return RiskPanel::new(
            Vec::new(),
            raw.columns().iter().map(|c| Column::new(c.name.clone(), Vec::new())).collect(),
        );
    };

    let daily: Vec<Vec<Option<f64>>> = raw
        .columns()
        .iter()
        .map(|c| {
            let mut values = c.values.clone();
            forward_fill(&mut values);
            values
        })
        .collect();

    let first_label = week_label(first, anchor);
    let last_label = week_label(last, anchor);
    let weeks = ((last_label - first_label).num_days() / 7 + 1) as usize;
    let labels: Vec<NaiveDate> = (0..weeks)
        .map(|w| first_label + Duration::days(7 * w as i64))
        .collect();

    let mut weekly: Vec<Vec<Option<f64>>> = vec![vec![None; weeks]; daily.len()];
    for (row, date) in raw.dates().iter().enumerate() {
        let week = ((week_label(*date, anchor) - first_label).num_days() / 7) as usize;
        for (col, values) in daily.iter().enumerate() {
            if let Some(v) = values[row] {
                weekly[col][week] = Some(v);
            }
        }
    }

    for values in weekly.iter_mut() {
        forward_fill(values);
    }

    let keep: Vec<usize> = (0..weeks)
        .filter(|&w| weekly.iter().all(|values| values[w].is_some()))
        .collect();
    let dropped = weeks - keep.len();
    if dropped > 0 {
        tracing::debug!("Dropped {} leading week(s) with incomplete factors", dropped);
    }

    let dates = keep.iter().map(|&w| labels[w]).collect();
    let columns = raw
        .columns()
        .iter()
        .zip(weekly)
        .map(|(c, values)| Column::new(c.name.clone(), keep.iter().map(|&w| values[w]).collect()))
        .collect();

    let panel = RiskPanel::new(dates, columns)?;
    tracing::info!(
        "Normalized {} daily rows into {} weekly rows ({:?} anchor)",
        raw.len(),
        panel.len(),
        anchor
    );
    Ok(panel)
}
