//! Paginated date-window listing (`GET {vacancies_url}?date_from&date_to&page=N`)

use std::time::{Duration, Instant};

use harvest_core::stream::{self, RawResponse, http_client};
use harvest_core::{HttpError, JsonlSink, Shutdown};
use serde::Deserialize;
use serde_json::Value;

use crate::auth::{AuthError, TokenManager};

pub const PER_PAGE: u32 = 100;
pub const PAGE_PAUSE: Duration = Duration::from_millis(400);

/// One listing page. Implemented over HTTP by [`HhSearch`].
pub trait PageSource: Send + Sync {
    fn page(&self, page: u32, access_token: &str) -> Result<RawResponse, HttpError>;
}

#[derive(Debug, Clone)]
pub struct HhSearch {
    vacancies_url: String,
    date_from: String,
    date_to: String,
    shutdown: Shutdown,
}

impl HhSearch {
    /// `date_from`/`date_to` are passed through as the API expects
    /// (`2024-04-01T00:00:00`)
    pub fn new(vacancies_url: &str, date_from: &str, date_to: &str, shutdown: Shutdown) -> Self {
        Self {
            vacancies_url: vacancies_url.trim_end_matches('/').to_string(),
            date_from: date_from.to_string(),
            date_to: date_to.to_string(),
            shutdown,
        }
    }
}

impl PageSource for HhSearch {
    fn page(&self, page: u32, access_token: &str) -> Result<RawResponse, HttpError> {
        let per_page = PER_PAGE.to_string();
        let page = page.to_string();
        let request = http_client()
            .get(&self.vacancies_url)
            .bearer_auth(access_token)
            .query(&[
                ("date_from", self.date_from.as_str()),
                ("date_to", self.date_to.as_str()),
                ("per_page", per_page.as_str()),
                ("page", page.as_str()),
            ]);
        stream::execute(request, &self.shutdown)
    }
}

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    items: Vec<Value>,
}

/// Why the listing stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchEnd {
    /// An empty page: the window is exhausted
    Exhausted,
    /// Non-2xx status or failed exchange; pages so far are kept
    Failed(String),
    Interrupted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchSummary {
    pub pages: u32,
    pub records: u64,
    pub end: SearchEnd,
    pub elapsed: Duration,
}

/// Walk pages from 0, appending every item to `sink`.
///
/// A single failed page ends the listing without retry. Only token and
/// sink failures are errors.
pub fn run_search<S: PageSource>(
    source: &S,
    tokens: &TokenManager,
    sink: &JsonlSink,
    shutdown: &Shutdown,
    pause: Duration,
) -> anyhow::Result<SearchSummary> {
    let start = Instant::now();
    let mut pages = 0u32;
    let mut records = 0u64;

    let end = loop {
        if shutdown.is_requested() {
            break SearchEnd::Interrupted;
        }
        let token = match tokens.ensure_valid() {
            Ok(token) => token,
            Err(AuthError::Interrupted) => break SearchEnd::Interrupted,
            Err(e) => return Err(e.into()),
        };

        log::info!("Fetching page {pages}");
        let response = match source.page(pages, &token) {
            Ok(r) if r.is_success() => r,
            Ok(r) => {
                let err = r.into_error();
                log::error!("Page {pages}: {err}");
                break SearchEnd::Failed(err.to_string());
            }
            Err(HttpError::Aborted) => break SearchEnd::Interrupted,
            Err(e) => {
                log::error!("Page {pages}: {e}");
                break SearchEnd::Failed(e.to_string());
            }
        };

        let page: Page = match serde_json::from_str(&response.body) {
            Ok(p) => p,
            Err(e) => {
                log::error!("Page {pages}: invalid JSON: {e}");
                break SearchEnd::Failed(format!("invalid JSON: {e}"));
            }
        };
        if page.items.is_empty() {
            log::info!("No more vacancies after {pages} pages");
            break SearchEnd::Exhausted;
        }
        for item in &page.items {
            sink.append(item)?;
        }
        records += page.items.len() as u64;
        pages += 1;

        if !shutdown.sleep(pause) {
            break SearchEnd::Interrupted;
        }
    };

    log::info!(
        "Search finished ({end:?}): {records} vacancies from {pages} pages in {:.1}s into {}",
        start.elapsed().as_secs_f64(),
        sink.path().display()
    );
    Ok(SearchSummary {
        pages,
        records,
        end,
        elapsed: start.elapsed(),
    })
}
