//! Main execution logic for the vacancy fetcher

use std::path::Path;
use std::process::ExitCode;

use anyhow::Context;
use harvest_core::{CheckpointStore, JsonlSink, SharedProgress, Shutdown, cleanup_tmp_file};

use crate::api::{HhApi, RateLimitedClient};
use crate::auth::{HhTokenEndpoint, TokenManager, TokenStore};
use crate::config::{Config, Endpoints};
use crate::engine::FetchEngine;
use crate::filter::RecordFilter;
use crate::search::{HhSearch, SearchEnd, run_search};
use crate::stats::Summary;
use crate::taxonomy;

/// Token manager backed by the credential file and the OAuth endpoint
pub fn token_manager(endpoints: &Endpoints, token_file: &Path, shutdown: &Shutdown) -> TokenManager {
    let endpoint = HhTokenEndpoint {
        token_url: endpoints.token_url.clone(),
        client_id: endpoints.client_id.clone(),
        client_secret: endpoints.client_secret.clone(),
        shutdown: shutdown.clone(),
    };
    TokenManager::new(TokenStore::new(token_file), Box::new(endpoint))
}

/// Main entry point for the fetch command.
///
/// `Err` means startup failed before any id was dispatched.
pub fn run(config: &Config, shutdown: &Shutdown, progress: SharedProgress) -> anyhow::Result<ExitCode> {
    config.validate()?;
    log::info!(
        "harvest starting: ids {}..{}, workers={}, category={}, window={}",
        config.range.start,
        config.range.end,
        config.workers,
        config.category_id,
        config.window
    );

    for path in [&config.checkpoint_file, &config.token_file] {
        cleanup_tmp_file(path)
            .with_context(|| format!("Failed to clean stale tmp file for {}", path.display()))?;
    }

    let roles = match taxonomy::fetch_allowed_roles(
        &config.endpoints.roles_url,
        &config.category_id,
        &config.retry,
        shutdown,
    ) {
        Ok(roles) => roles,
        Err(e) if shutdown.is_requested() => {
            log::warn!("{e}");
            return Ok(ExitCode::from(130));
        }
        Err(e) => return Err(e.context("Cannot build role allow-list")),
    };

    let checkpoint = CheckpointStore::open(&config.checkpoint_file, config.flush_every)
        .with_context(|| format!("Cannot open checkpoint {}", config.checkpoint_file.display()))?;
    let sink = JsonlSink::open(&config.output_file)
        .with_context(|| format!("Cannot open output {}", config.output_file.display()))?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.workers)
        .thread_name(|i| format!("fetch-{i}"))
        .build()
        .context("Failed to create thread pool")?;

    let client = RateLimitedClient::new(
        HhApi::new(&config.endpoints.vacancies_url, shutdown.clone()),
        config.retry,
        shutdown.clone(),
    );
    let engine = FetchEngine::new(
        client,
        token_manager(&config.endpoints, &config.token_file, shutdown),
        RecordFilter::new(config.window, roles),
        checkpoint,
        sink,
        progress.clone(),
    )
    .with_workers(config.workers);

    let result = pool.install(|| engine.run(config.range.clone()));
    let code = match result {
        Ok(summary) => {
            report(&summary, &progress);
            if summary.interrupted {
                log::warn!("Interrupted; rerun to resume from {}", config.checkpoint_file.display());
                ExitCode::from(130)
            } else {
                log::info!("harvest completed successfully");
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            report(&e.summary, &progress);
            log::error!("{e}");
            ExitCode::from(1)
        }
    };
    Ok(code)
}

/// Entry point for the search command
pub fn run_search_window(
    endpoints: &Endpoints,
    token_file: &Path,
    date_from: &str,
    date_to: &str,
    output_file: &Path,
    shutdown: &Shutdown,
) -> anyhow::Result<ExitCode> {
    let sink = JsonlSink::open(output_file)
        .with_context(|| format!("Cannot open output {}", output_file.display()))?;
    let tokens = token_manager(endpoints, token_file, shutdown);
    let source = HhSearch::new(&endpoints.vacancies_url, date_from, date_to, shutdown.clone());

    log::info!("Searching vacancies published {date_from} .. {date_to}");
    let summary = run_search(&source, &tokens, &sink, shutdown, crate::search::PAGE_PAUSE)?;

    Ok(match summary.end {
        SearchEnd::Exhausted => ExitCode::SUCCESS,
        SearchEnd::Interrupted => ExitCode::from(130),
        SearchEnd::Failed(_) => ExitCode::from(1),
    })
}

fn report(summary: &Summary, progress: &SharedProgress) {
    if progress.is_tty() {
        summary.print();
    } else {
        summary.log();
    }
}
