//! Run statistics and the final summary table.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use harvest_core::progress::fmt_num;

use crate::filter::RejectReason;

/// Live counters updated by workers
#[derive(Debug, Default)]
pub struct Counters {
    pub loaded: AtomicU64,
    pub rejected_date: AtomicU64,
    pub rejected_role: AtomicU64,
    pub not_found: AtomicU64,
    pub exhausted: AtomicU64,
    pub stopped: AtomicU64,
}

impl Counters {
    /// Count an accepted record, returning the new total
    pub fn accept(&self) -> u64 {
        self.loaded.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn reject(&self, reason: &RejectReason) {
        let counter = if reason.is_date() {
            &self.rejected_date
        } else {
            &self.rejected_role
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, total: u64, already_processed: u64, elapsed: Duration) -> Summary {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        Summary {
            total,
            already_processed,
            loaded: get(&self.loaded),
            rejected_date: get(&self.rejected_date),
            rejected_role: get(&self.rejected_role),
            not_found: get(&self.not_found),
            exhausted: get(&self.exhausted),
            stopped: get(&self.stopped),
            interrupted: false,
            elapsed,
        }
    }
}

/// Outcome totals of one engine run.
///
/// `total` is the work list size: candidates minus IDs already in the
/// checkpoint. `skipped` counts every settled non-accepted ID.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Summary {
    pub total: u64,
    pub already_processed: u64,
    pub loaded: u64,
    pub rejected_date: u64,
    pub rejected_role: u64,
    pub not_found: u64,
    pub exhausted: u64,
    /// Dispatched but cut short by shutdown (retried next run)
    pub stopped: u64,
    pub interrupted: bool,
    pub elapsed: Duration,
}

impl Summary {
    pub fn skipped(&self) -> u64 {
        self.rejected_date + self.rejected_role + self.not_found + self.exhausted
    }

    /// IDs that reached a terminal outcome this run
    pub fn settled(&self) -> u64 {
        self.loaded + self.skipped()
    }

    pub fn log(&self) {
        log::info!(
            "Total: {}, loaded: {}, skipped: {} (date {}, role {}, not found {}, exhausted {}), stopped: {} [{:.1}s]",
            fmt_num(self.total),
            fmt_num(self.loaded),
            fmt_num(self.skipped()),
            fmt_num(self.rejected_date),
            fmt_num(self.rejected_role),
            fmt_num(self.not_found),
            fmt_num(self.exhausted),
            fmt_num(self.stopped),
            self.elapsed.as_secs_f64()
        );
    }

    /// Format summary table as a string.
    pub fn format_table(&self) -> String {
        let mut table = Table::new();
        let title = if self.interrupted {
            "Fetch (interrupted)"
        } else {
            "Fetch"
        };
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![
                Cell::new(title)
                    .fg(Color::Cyan)
                    .add_attribute(comfy_table::Attribute::Bold),
                Cell::new("Value").fg(Color::Cyan),
                Cell::new("%").fg(Color::Cyan),
            ]);

        let settled = self.settled();
        let mut row = |label: &str, n: u64, share: bool| {
            table.add_row(vec![
                Cell::new(label),
                Cell::new(fmt_num(n)),
                Cell::new(if share {
                    format!("{:.1}", pct(n, settled))
                } else {
                    String::new()
                }),
            ]);
        };
        row("To fetch", self.total, false);
        row("Already processed", self.already_processed, false);
        row("Loaded", self.loaded, true);
        row("Skipped", self.skipped(), true);
        row("  outside date window", self.rejected_date, true);
        row("  role not allowed", self.rejected_role, true);
        row("  not found", self.not_found, true);
        row("  retries exhausted", self.exhausted, true);
        row("Stopped", self.stopped, false);

        table.add_row(vec![
            Cell::new("Elapsed"),
            Cell::new(format!("{:.1}s", self.elapsed.as_secs_f64())),
            Cell::new(""),
        ]);
        table.to_string()
    }

    pub fn print(&self) {
        eprintln!("\n{}", self.format_table());
    }
}

fn pct(n: u64, of: u64) -> f64 {
    if of == 0 {
        0.0
    } else {
        n as f64 / of as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn counters_snapshot() {
        let c = Counters::default();
        c.accept();
        assert_eq!(c.accept(), 2);
        c.reject(&RejectReason::NoMatchingRole);
        c.reject(&RejectReason::OutsideWindow(
            NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
        ));
        c.not_found.fetch_add(3, Ordering::Relaxed);

        let s = c.snapshot(10, 4, Duration::from_secs(1));
        assert_eq!(s.loaded, 2);
        assert_eq!(s.rejected_role, 1);
        assert_eq!(s.rejected_date, 1);
        assert_eq!(s.skipped(), 5);
        assert_eq!(s.settled(), 7);
        assert_eq!(s.already_processed, 4);
    }

    #[test]
    fn pct_zero_total() {
        assert_eq!(pct(5, 0), 0.0);
        assert_eq!(pct(1, 4), 25.0);
    }

    #[test]
    fn table_mentions_interruption() {
        let s = Summary {
            interrupted: true,
            loaded: 1_234,
            ..Default::default()
        };
        let table = s.format_table();
        assert!(table.contains("interrupted"));
        assert!(table.contains("1,234"));
    }
}
