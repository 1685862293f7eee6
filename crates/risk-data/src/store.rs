use chrono::{NaiveDate, NaiveDateTime};
use sri_core::{Column, RiskPanel, SriError, DATE_COLUMN};
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use tempfile::NamedTempFile;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Mode of a saved panel before the process umask is applied.
#[cfg(unix)]
const PANEL_MODE: u32 = 0o644;

fn csv_error(path: &Path, e: csv::Error) -> SriError {
    SriError::InvalidData(format!("{}: {}", path.display(), e))
}

/// Write `panel` to `destination` as CSV, replacing any previous file.
///
/// The file is staged next to the destination and renamed into place, so readers
/// see either the old content or the new content.
pub fn persist(panel: &RiskPanel, destination: &Path) -> Result<(), SriError> {
    let dir = match destination.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut staged = stage_in(dir)?;
    {
        let mut writer = csv::Writer::from_writer(staged.as_file_mut());

        let mut header = vec![DATE_COLUMN.to_string()];
        header.extend(panel.columns().iter().map(|c| c.name.clone()));
        writer.write_record(&header).map_err(|e| csv_error(destination, e))?;

        for (row, date) in panel.dates().iter().enumerate() {
            let mut record = Vec::with_capacity(panel.columns().len() + 1);
            record.push(date.format(DATE_FORMAT).to_string());
            // f64 Display is the shortest string that parses back to the same bits
            record.extend(
                panel
                    .columns()
                    .iter()
                    .map(|c| c.values[row].map(|v| v.to_string()).unwrap_or_default()),
            );
            writer.write_record(&record).map_err(|e| csv_error(destination, e))?;
        }
        writer.flush()?;
    }
    staged.as_file_mut().flush()?;
    staged.as_file().sync_all()?;

    staged.persist(destination).map_err(|e| SriError::Io(e.error))?;
    tracing::info!("Saved {} rows to {}", panel.len(), destination.display());
    Ok(())
}

/// Temp file next to the destination, created with regular file permissions
/// instead of the private mode temp files get by default.
#[cfg(unix)]
fn stage_in(dir: &Path) -> io::Result<NamedTempFile> {
    use std::os::unix::fs::PermissionsExt;

    tempfile::Builder::new()
        .prefix(".risk_panel")
        .permissions(std::fs::Permissions::from_mode(PANEL_MODE))
        .tempfile_in(dir)
}

#[cfg(not(unix))]
fn stage_in(dir: &Path) -> io::Result<NamedTempFile> {
    NamedTempFile::new_in(dir)
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .ok()
        .or_else(|| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").ok().map(|dt| dt.date()))
        .or_else(|| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S").ok().map(|dt| dt.date()))
}

/// Read a panel written by [`persist`] (or any CSV with a leading date column).
pub fn read_panel(path: &Path) -> Result<RiskPanel, SriError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(SriError::MissingFile(path.to_path_buf())),
        Err(e) => return Err(e.into()),
    };

    let mut reader = csv::Reader::from_reader(file);
    let headers = reader.headers().map_err(|e| csv_error(path, e))?.clone();
    if headers.is_empty() {
        return Err(SriError::InvalidData(format!("{}: missing header row", path.display())));
    }
    let names: Vec<String> = headers.iter().skip(1).map(|h| h.trim().to_string()).collect();

    let mut dates = Vec::new();
    let mut values: Vec<Vec<Option<f64>>> = vec![Vec::new(); names.len()];

    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(|e| csv_error(path, e))?;
        let raw_date = record.get(0).unwrap_or_default();
        let date = parse_date(raw_date).ok_or_else(|| {
            SriError::InvalidData(format!("{}: row {} has invalid date '{}'", path.display(), line + 1, raw_date))
        })?;
        dates.push(date);

        for (col, cells) in values.iter_mut().enumerate() {
            let cell = record.get(col + 1).unwrap_or_default().trim();
            let value = if cell.is_empty() {
                None
            } else {
                let v: f64 = cell.parse().map_err(|_| {
                    SriError::InvalidData(format!(
                        "{}: row {} column '{}' has invalid number '{}'",
                        path.display(),
                        line + 1,
                        names[col],
                        cell
                    ))
                })?;
                Some(v).filter(|v| v.is_finite())
            };
            cells.push(value);
        }
    }

    let columns = names.into_iter().zip(values).map(|(n, v)| Column::new(n, v)).collect();
    let panel = RiskPanel::new(dates, columns)?;
    tracing::debug!("Loaded {} rows from {}", panel.len(), path.display());
    Ok(panel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sri_core::SRI_COLUMN;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn sample() -> RiskPanel {
        RiskPanel::new(
            vec![d(2024, 1, 5), d(2024, 1, 12), d(2024, 1, 19)],
            vec![
                Column::new("VIX", vec![Some(13.35), Some(0.1 + 0.2), Some(1e-9)]),
                Column::new("MOVE", vec![Some(110.0), Some(112.123456789012), Some(98.5)]),
                Column::new(SRI_COLUMN, vec![None, None, None]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_round_trip_is_exact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("risk_factors.csv");

        let panel = sample();
        persist(&panel, &path).unwrap();
        let loaded = read_panel(&path).unwrap();
        assert_eq!(loaded, panel);
    }

    #[test]
    fn test_persist_is_idempotent_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("risk_factors.csv");

        persist(&sample().tail(1), &path).unwrap();
        persist(&sample(), &path).unwrap();
        let first = std::fs::read(&path).unwrap();
        persist(&sample(), &path).unwrap();
        let second = std::fs::read(&path).unwrap();

        assert_eq!(first, second);
        let text = String::from_utf8(first).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "Date,VIX,MOVE,SRI");
        assert_eq!(lines[1], "2024-01-05,13.35,110,");
        // no staging files left behind
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_saved_panel_follows_umask() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("risk_factors.csv");
        persist(&sample(), &path).unwrap();

        // a plain create() gets 0666 minus the umask
        let plain = dir.path().join("plain.csv");
        File::create(&plain).unwrap();
        let umasked = std::fs::metadata(&plain).unwrap().permissions().mode() & 0o777;

        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, umasked & PANEL_MODE);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.csv");
        assert!(matches!(read_panel(&path), Err(SriError::MissingFile(p)) if p == path));
    }

    #[test]
    fn test_reads_timestamped_dates_and_nan() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("risk_factors.csv");
        std::fs::write(&path, "Date,VIX\n2024-01-05 00:00:00,13.0\n2024-01-12,NaN\n").unwrap();

        let panel = read_panel(&path).unwrap();
        assert_eq!(panel.dates(), &[d(2024, 1, 5), d(2024, 1, 12)]);
        assert_eq!(panel.column("VIX").unwrap().values, vec![Some(13.0), None]);
    }

    #[test]
    fn test_rejects_malformed_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");

        std::fs::write(&path, "Date,VIX\nnot-a-date,13.0\n").unwrap();
        assert!(matches!(read_panel(&path), Err(SriError::InvalidData(_))));

        std::fs::write(&path, "Date,VIX\n2024-01-05,abc\n").unwrap();
        assert!(matches!(read_panel(&path), Err(SriError::InvalidData(_))));

        std::fs::write(&path, "Date,VIX\n2024-01-12,1\n2024-01-05,2\n").unwrap();
        assert!(matches!(read_panel(&path), Err(SriError::InvalidData(_))));
    }
}
