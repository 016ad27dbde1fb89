//! Fetch subcommand - walk the vacancy id range

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use chrono::NaiveDate;
use clap::Args;
use harvest_core::{RetryPolicy, SharedProgress, Shutdown};
use harvest_hh::DateWindow;

use crate::config::Config;

#[derive(Args, Debug)]
pub struct FetchArgs {
    /// First candidate id (inclusive)
    #[arg(long)]
    pub start: Option<u64>,

    /// Last candidate id (exclusive)
    #[arg(long)]
    pub end: Option<u64>,

    /// Number of parallel workers
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Keep vacancies published in this calendar year
    #[arg(short, long, conflicts_with_all = ["from", "to"])]
    pub year: Option<i32>,

    /// Window start (YYYY-MM-DD, inclusive); requires --to
    #[arg(long, value_parser = parse_date, requires = "to")]
    pub from: Option<NaiveDate>,

    /// Window end (YYYY-MM-DD, exclusive)
    #[arg(long, value_parser = parse_date, requires = "from")]
    pub to: Option<NaiveDate>,

    /// Top-level professional-role category id
    #[arg(long)]
    pub category: Option<String>,

    /// Output JSONL file (appended)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Processed-id checkpoint file
    #[arg(long)]
    pub checkpoint: Option<PathBuf>,

    /// Persist the checkpoint every N settled ids
    #[arg(long)]
    pub flush_every: Option<usize>,

    /// Total attempts per id
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Base backoff in milliseconds (doubled for 429/403)
    #[arg(long)]
    pub retry_delay_ms: Option<u64>,
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("Invalid date format: {e}"))
}

/// Merge config file values with CLI overrides
pub fn build_config(args: FetchArgs, config: &Config) -> Result<harvest_hh::Config> {
    let fetch = &config.fetch;
    let year = args.year.unwrap_or(fetch.year);
    let window = match (args.from, args.to) {
        (Some(from), Some(to)) => DateWindow { from, to },
        _ => DateWindow::year(year).ok_or_else(|| anyhow::anyhow!("Invalid year: {year}"))?,
    };

    Ok(harvest_hh::Config {
        endpoints: config.endpoints(),
        token_file: config.auth.token_file.clone(),
        range: args.start.unwrap_or(fetch.start_id)..args.end.unwrap_or(fetch.end_id),
        workers: args.workers.unwrap_or(fetch.workers),
        retry: RetryPolicy {
            max_retries: args.max_retries.unwrap_or(fetch.max_retries),
            base_delay: Duration::from_millis(args.retry_delay_ms.unwrap_or(fetch.retry_delay_ms)),
        },
        category_id: args.category.unwrap_or_else(|| fetch.category.clone()),
        window,
        checkpoint_file: args.checkpoint.unwrap_or_else(|| fetch.checkpoint_file.clone()),
        output_file: args.output.unwrap_or_else(|| fetch.output_file(year)),
        flush_every: args.flush_every.unwrap_or(fetch.flush_every),
    })
}

pub fn run(
    args: FetchArgs,
    config: &Config,
    shutdown: &Shutdown,
    progress: &SharedProgress,
) -> Result<ExitCode> {
    let hh_config = build_config(args, config)?;

    log::info!("Fetching vacancies");
    log::info!("  Output: {}", hh_config.output_file.display());
    log::info!("  Checkpoint: {}", hh_config.checkpoint_file.display());

    harvest_hh::run(&hh_config, shutdown, progress.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Wrapper {
        #[command(flatten)]
        args: FetchArgs,
    }

    fn parse(argv: &[&str]) -> FetchArgs {
        Wrapper::try_parse_from(std::iter::once("fetch").chain(argv.iter().copied()))
            .unwrap()
            .args
    }

    #[test]
    fn defaults_come_from_config() {
        let built = build_config(parse(&[]), &Config::default()).unwrap();
        assert_eq!(built.range, 90_000_000..120_000_000);
        assert_eq!(built.workers, 10);
        assert_eq!(built.window, DateWindow::year(2024).unwrap());
        assert_eq!(built.output_file, PathBuf::from("vacancies_2024.jsonl"));
        assert_eq!(built.retry, RetryPolicy::default());
    }

    #[test]
    fn cli_overrides_config() {
        let args = parse(&[
            "--start", "100", "--end", "200", "-w", "3", "--year", "2023", "--retry-delay-ms", "50",
        ]);
        let built = build_config(args, &Config::default()).unwrap();
        assert_eq!(built.range, 100..200);
        assert_eq!(built.workers, 3);
        assert_eq!(built.window, DateWindow::year(2023).unwrap());
        assert_eq!(built.output_file, PathBuf::from("vacancies_2023.jsonl"));
        assert_eq!(built.retry.base_delay, Duration::from_millis(50));
    }

    #[test]
    fn explicit_window() {
        let args = parse(&["--from", "2024-04-01", "--to", "2024-05-01"]);
        let built = build_config(args, &Config::default()).unwrap();
        assert_eq!(built.window.from, NaiveDate::from_ymd_opt(2024, 4, 1).unwrap());
        assert_eq!(built.window.to, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
    }

    #[test]
    fn from_without_to_is_rejected() {
        let result =
            Wrapper::try_parse_from(["fetch", "--from", "2024-04-01"].iter().copied());
        assert!(result.is_err());
    }
}
