//! Search subcommand - list vacancies published in a date window

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Args;
use harvest_core::Shutdown;

use crate::config::Config;

#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Window start as the API expects it (e.g. 2024-04-01T00:00:00)
    #[arg(long)]
    pub from: String,

    /// Window end (e.g. 2024-04-30T23:59:59)
    #[arg(long)]
    pub to: String,

    /// Output JSONL file (appended)
    #[arg(short, long, default_value = "vacancies_month.jsonl")]
    pub output: PathBuf,
}

pub fn run(args: SearchArgs, config: &Config, shutdown: &Shutdown) -> Result<ExitCode> {
    harvest_hh::run_search_window(
        &config.endpoints(),
        &config.auth.token_file,
        &args.from,
        &args.to,
        &args.output,
        shutdown,
    )
}
