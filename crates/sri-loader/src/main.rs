//! sri-loader: fetch risk factors, persist the weekly panel and build the Systemic Risk Index.
//!
//! Usage:
//!   cargo run -p sri-loader -- fetch                    # download + normalize + save
//!   cargo run -p sri-loader -- index --tail 52          # read back, build SRI, print last 52 weeks
//!   cargo run -p sri-loader -- run --output data/sri.csv
//!
//! Configuration comes from the environment (or `.env`): FRED_API_KEY, SRI_FACTORS,
//! SRI_START_DATE, SRI_DATA_PATH, SRI_REFERENCE_FACTOR, SRI_REFERENCE_POLICY,
//! SRI_WEEKLY_ANCHOR, SRI_RETRY_ATTEMPTS, SRI_RETRY_BASE_MS, SRI_HTTP_TIMEOUT_SECS.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use risk_data::{normalize, persist, Acquirer};
use sri_core::{RiskPanel, SriConfig, SriError};
use sri_index::{load_index, IndexOptions, IndexOutcome};
use std::path::PathBuf;

/// Weeks shown by default, matching the dashboard's display window.
const DEFAULT_TAIL: usize = 90;

#[derive(Debug, Parser)]
#[command(name = "sri-loader", version, about = "Systemic Risk Index pipeline")]
struct Cli {
    /// Persisted panel location (overrides SRI_DATA_PATH)
    #[arg(long, global = true)]
    data: Option<PathBuf>,

    /// First date to request from providers, YYYY-MM-DD (overrides SRI_START_DATE)
    #[arg(long, global = true)]
    start: Option<NaiveDate>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Download, normalize and save the weekly risk factor panel
    Fetch,
    /// Build the SRI from the saved panel
    Index(IndexArgs),
    /// Fetch, then index
    Run(IndexArgs),
}

#[derive(Debug, Args)]
struct IndexArgs {
    /// Number of most recent weeks to print
    #[arg(long, default_value_t = DEFAULT_TAIL)]
    tail: usize,

    /// Also save the panel with its SRI column here
    #[arg(long)]
    output: Option<PathBuf>,

    /// Print the trailing window as JSON instead of a table
    #[arg(long)]
    json: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sri_loader=info,risk_data=info,sri_index=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = SriConfig::from_env().context("invalid configuration")?;
    if let Some(path) = cli.data {
        config.data_path = path;
    }
    if let Some(start) = cli.start {
        config.start_date = start;
    }

    match cli.command {
        Command::Fetch => fetch(&config).await,
        Command::Index(args) => index(&config, &args),
        Command::Run(args) => {
            fetch(&config).await?;
            index(&config, &args)
        }
    }
}

async fn fetch(config: &SriConfig) -> Result<()> {
    let acquirer = Acquirer::from_config(config).context("cannot set up data sources")?;

    tracing::info!(
        "Downloading {:?} since {}",
        config.factor_names(),
        config.start_date
    );
    let raw = acquirer
        .fetch_raw(&config.factors, config.start_date)
        .await
        .context("download failed")?;

    let weekly = normalize(&raw, config.weekly_anchor)?;
    persist(&weekly, &config.data_path)
        .with_context(|| format!("cannot save panel to {}", config.data_path.display()))?;

    tracing::info!("Data saved successfully to {}", config.data_path.display());
    Ok(())
}

fn index(config: &SriConfig, args: &IndexArgs) -> Result<()> {
    let options = IndexOptions::from(config);
    let outcome = match load_index(&config.data_path, &config.factor_names(), &options) {
        Ok(outcome) => outcome,
        Err(SriError::MissingFile(path)) => {
            anyhow::bail!(
                "no saved panel at {}; run `sri-loader fetch` first",
                path.display()
            );
        }
        Err(e) => return Err(e).context("index construction failed"),
    };

    report(&outcome);

    if let Some(output) = &args.output {
        persist(outcome.panel(), output)
            .with_context(|| format!("cannot save indexed panel to {}", output.display()))?;
    }

    let window = outcome.panel().tail(args.tail);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&window)?);
    } else {
        print!("{}", render_table(&window));
    }
    Ok(())
}

fn report(outcome: &IndexOutcome) {
    match outcome {
        IndexOutcome::Computed {
            component,
            sign_flipped,
            ..
        } => {
            let loadings: Vec<String> = component
                .loadings
                .iter()
                .map(|(name, l)| format!("{}={:+.3}", name, l))
                .collect();
            tracing::info!(
                "First component: {} (explained {:.1}%, sign flipped: {})",
                loadings.join(" "),
                component.explained_variance_ratio * 100.0,
                sign_flipped
            );
        }
        IndexOutcome::Degraded { panel } => {
            tracing::warn!(
                "SRI undefined: none of the configured factors are in the panel (columns {:?})",
                panel.column_names()
            );
        }
    }

    if let Some((date, cells)) = outcome.panel().latest() {
        let sri = cells
            .iter()
            .find(|(name, _)| *name == sri_core::SRI_COLUMN)
            .and_then(|(_, v)| *v);
        match sri {
            Some(v) => tracing::info!("Latest SRI ({}): {:.1}", date, v),
            None => tracing::info!("Latest SRI ({}): undefined", date),
        }
    }
}

/// Fixed-width text table of a panel; undefined cells print as `-`.
fn render_table(panel: &RiskPanel) -> String {
    let names = panel.column_names();
    let width = names.iter().map(|n| n.len()).max().unwrap_or(0).max(10);

    let mut out = format!("{:<10}", sri_core::DATE_COLUMN);
    for name in &names {
        out.push_str(&format!(" {:>width$}", name, width = width));
    }
    out.push('\n');

    for (row, date) in panel.dates().iter().enumerate() {
        out.push_str(&date.format("%Y-%m-%d").to_string());
        for column in panel.columns() {
            let cell = match column.values[row] {
                Some(v) => format!("{:.2}", v),
                None => "-".to_string(),
            };
            out.push_str(&format!(" {:>width$}", cell, width = width));
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use sri_core::Column;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parses_global_overrides() {
        let cli = Cli::try_parse_from([
            "sri-loader",
            "index",
            "--tail",
            "12",
            "--data",
            "/tmp/panel.csv",
            "--start",
            "2010-01-01",
        ])
        .unwrap();

        assert_eq!(cli.data, Some(PathBuf::from("/tmp/panel.csv")));
        assert_eq!(cli.start, NaiveDate::from_ymd_opt(2010, 1, 1));
        match cli.command {
            Command::Index(args) => {
                assert_eq!(args.tail, 12);
                assert!(args.output.is_none());
                assert!(!args.json);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_render_table() {
        let panel = RiskPanel::new(
            vec![NaiveDate::from_ymd_opt(2024, 1, 5).unwrap()],
            vec![
                Column::new("VIX", vec![Some(13.456)]),
                Column::new("SRI", vec![None]),
            ],
        )
        .unwrap();

        let table = render_table(&panel);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Date"));
        assert!(lines[1].starts_with("2024-01-05"));
        assert!(lines[1].contains("13.46"));
        assert!(lines[1].trim_end().ends_with('-'));
    }
}
