//! Record scope filter: publication date window and role allow-list

use chrono::{DateTime, FixedOffset, NaiveDate};
use rustc_hash::FxHashSet;
use serde_json::Value;

/// Large optional field dropped before persistence
pub const STRIPPED_FIELD: &str = "branded_description";

/// Half-open date range `[from, to)` compared against the record's local date
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateWindow {
    /// Whole calendar year
    pub fn year(year: i32) -> Option<Self> {
        Some(Self {
            from: NaiveDate::from_ymd_opt(year, 1, 1)?,
            to: NaiveDate::from_ymd_opt(year + 1, 1, 1)?,
        })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from <= date && date < self.to
    }
}

impl std::fmt::Display for DateWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.from, self.to)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    MissingPublishedAt,
    InvalidPublishedAt(String),
    OutsideWindow(NaiveDate),
    NoMatchingRole,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingPublishedAt => f.write_str("no published_at"),
            Self::InvalidPublishedAt(s) => write!(f, "unparseable published_at {s:?}"),
            Self::OutsideWindow(d) => write!(f, "published {d} outside window"),
            Self::NoMatchingRole => f.write_str("no allowed professional role"),
        }
    }
}

impl RejectReason {
    /// Date-related rejection (vs. role mismatch)
    pub fn is_date(&self) -> bool {
        !matches!(self, Self::NoMatchingRole)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    InScope,
    OutOfScope(RejectReason),
}

/// Pure scope predicate; both the date and the role check must pass.
#[derive(Debug, Clone)]
pub struct RecordFilter {
    window: DateWindow,
    allowed_roles: FxHashSet<String>,
}

impl RecordFilter {
    pub fn new(window: DateWindow, allowed_roles: FxHashSet<String>) -> Self {
        Self {
            window,
            allowed_roles,
        }
    }

    pub fn classify(&self, record: &Value) -> Classification {
        let Some(raw) = record.get("published_at").and_then(Value::as_str) else {
            return Classification::OutOfScope(RejectReason::MissingPublishedAt);
        };
        let Some(published) = parse_timestamp(raw) else {
            return Classification::OutOfScope(RejectReason::InvalidPublishedAt(raw.to_string()));
        };
        // Calendar date in the record's own offset
        let date = published.date_naive();
        if !self.window.contains(date) {
            return Classification::OutOfScope(RejectReason::OutsideWindow(date));
        }
        if !self.has_allowed_role(record) {
            return Classification::OutOfScope(RejectReason::NoMatchingRole);
        }
        Classification::InScope
    }

    fn has_allowed_role(&self, record: &Value) -> bool {
        record
            .get("professional_roles")
            .and_then(Value::as_array)
            .is_some_and(|roles| {
                roles
                    .iter()
                    .filter_map(|role| role.get("id"))
                    .filter_map(id_string)
                    .any(|id| self.allowed_roles.contains(&id))
            })
    }
}

/// Role ids come as strings or numbers depending on the endpoint
pub(crate) fn id_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// RFC 3339 (`+03:00`) or the API's compact offset form (`+0300`)
pub fn parse_timestamp(s: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(s)
        .or_else(|_| DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%z"))
        .ok()
}

/// Drop [`STRIPPED_FIELD`] from an accepted record
pub fn strip_for_storage(record: &mut Value) {
    if let Some(obj) = record.as_object_mut() {
        obj.remove(STRIPPED_FIELD);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;
    use serde_json::json;

    fn filter() -> RecordFilter {
        let roles = ["96", "104"].into_iter().map(String::from).collect();
        RecordFilter::new(DateWindow::year(2024).unwrap(), roles)
    }

    fn vacancy(published_at: &str, role: &str) -> Value {
        json!({
            "id": "100500",
            "published_at": published_at,
            "professional_roles": [{"id": role, "name": "Программист, разработчик"}],
            "branded_description": "<div>...</div>",
        })
    }

    #[test]
    fn in_window_with_role_accepted() {
        let v = vacancy("2024-06-15T10:00:00+03:00", "96");
        assert_eq!(filter().classify(&v), Classification::InScope);
    }

    #[test]
    fn previous_year_rejected() {
        let v = vacancy("2023-06-15T10:00:00+03:00", "96");
        assert!(matches!(
            filter().classify(&v),
            Classification::OutOfScope(RejectReason::OutsideWindow(_))
        ));
    }

    #[test]
    fn wrong_role_rejected_regardless_of_date() {
        let v = vacancy("2024-06-15T10:00:00+03:00", "1");
        assert_eq!(
            filter().classify(&v),
            Classification::OutOfScope(RejectReason::NoMatchingRole)
        );
    }

    #[test]
    fn compact_offset_parsed() {
        let v = vacancy("2024-01-10T08:30:00+0300", "104");
        assert_eq!(filter().classify(&v), Classification::InScope);
    }

    #[test]
    fn local_date_decides_boundary() {
        // 2023-12-31T22:00Z, but 2024-01-01 in the record's own offset
        let v = vacancy("2024-01-01T01:00:00+03:00", "96");
        assert_eq!(filter().classify(&v), Classification::InScope);
        let ts = parse_timestamp("2024-01-01T01:00:00+03:00").unwrap();
        assert_eq!(ts.date_naive().year(), 2024);
    }

    #[test]
    fn window_end_exclusive() {
        let v = vacancy("2025-01-01T00:00:00+03:00", "96");
        assert!(matches!(
            filter().classify(&v),
            Classification::OutOfScope(RejectReason::OutsideWindow(_))
        ));
    }

    #[test]
    fn missing_and_invalid_dates_rejected() {
        let v = json!({"professional_roles": [{"id": "96"}]});
        assert_eq!(
            filter().classify(&v),
            Classification::OutOfScope(RejectReason::MissingPublishedAt)
        );
        let v = vacancy("15.06.2024", "96");
        assert!(matches!(
            filter().classify(&v),
            Classification::OutOfScope(RejectReason::InvalidPublishedAt(_))
        ));
    }

    #[test]
    fn numeric_role_ids_match() {
        let v = json!({
            "published_at": "2024-03-01T12:00:00+03:00",
            "professional_roles": [{"id": 96}],
        });
        assert_eq!(filter().classify(&v), Classification::InScope);
    }

    #[test]
    fn missing_roles_rejected() {
        let v = json!({"published_at": "2024-03-01T12:00:00+03:00"});
        assert_eq!(
            filter().classify(&v),
            Classification::OutOfScope(RejectReason::NoMatchingRole)
        );
    }

    #[test]
    fn strip_removes_blob_only() {
        let mut v = vacancy("2024-06-15T10:00:00+03:00", "96");
        strip_for_storage(&mut v);
        assert!(v.get(STRIPPED_FIELD).is_none());
        assert_eq!(v["id"], "100500");
        assert_eq!(filter().classify(&v), Classification::InScope);
    }

    #[test]
    fn reject_reason_kinds() {
        assert!(RejectReason::MissingPublishedAt.is_date());
        assert!(!RejectReason::NoMatchingRole.is_date());
    }
}
