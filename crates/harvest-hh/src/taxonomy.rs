//! Professional-role taxonomy: builds the role allow-list for one category

use anyhow::Context;
use harvest_core::retry::{RetryOutcome, retry_with_backoff};
use harvest_core::stream::{self, http_client};
use harvest_core::{RetryPolicy, Shutdown};
use rustc_hash::FxHashSet;
use serde::Deserialize;

use crate::filter::id_string;

#[derive(Debug, Deserialize)]
struct Taxonomy {
    categories: Vec<Category>,
}

#[derive(Debug, Deserialize)]
struct Category {
    id: serde_json::Value,
    #[serde(default)]
    roles: Vec<Role>,
}

#[derive(Debug, Deserialize)]
struct Role {
    id: serde_json::Value,
}

/// Extract role ids under `category_id` from a taxonomy document.
///
/// An unknown category or a category without roles is an error: running
/// with an empty allow-list would silently reject every record.
pub fn parse_allowed_roles(body: &str, category_id: &str) -> anyhow::Result<FxHashSet<String>> {
    let taxonomy: Taxonomy = serde_json::from_str(body).context("Invalid taxonomy JSON")?;
    let category = taxonomy
        .categories
        .iter()
        .find(|c| id_string(&c.id).as_deref() == Some(category_id))
        .with_context(|| format!("Category {category_id} not found in taxonomy"))?;

    let roles: FxHashSet<String> = category.roles.iter().filter_map(|r| id_string(&r.id)).collect();
    anyhow::ensure!(!roles.is_empty(), "Category {category_id} has no roles");
    Ok(roles)
}

/// Fetch the taxonomy once and build the allow-list (retrying 429/5xx)
pub fn fetch_allowed_roles(
    roles_url: &str,
    category_id: &str,
    policy: &RetryPolicy,
    shutdown: &Shutdown,
) -> anyhow::Result<FxHashSet<String>> {
    log::debug!("Fetching role taxonomy from {roles_url}");
    let outcome = retry_with_backoff("taxonomy", policy, shutdown, || {
        stream::execute(http_client().get(roles_url), shutdown)?.error_for_status()
    });
    let body = match outcome {
        RetryOutcome::Done(response) => response.body,
        RetryOutcome::Failed(e) => anyhow::bail!("Failed to fetch role taxonomy: {e}"),
        RetryOutcome::Stopped => anyhow::bail!("Interrupted while fetching role taxonomy"),
    };
    let roles = parse_allowed_roles(&body, category_id)?;
    log::info!("Category {category_id}: {} allowed roles", roles.len());
    Ok(roles)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TAXONOMY: &str = r#"{
        "categories": [
            {"id": "1", "name": "Автомобильный бизнес", "roles": [{"id": "4", "name": "Автомойщик"}]},
            {"id": "11", "name": "Информационные технологии", "roles": [
                {"id": "96", "name": "Программист, разработчик"},
                {"id": "104", "name": "Руководитель группы разработки"},
                {"id": 165, "name": "Дата-сайентист"}
            ]},
            {"id": "12", "name": "Пустая", "roles": []}
        ]
    }"#;

    #[test]
    fn extracts_category_roles() {
        let roles = parse_allowed_roles(TAXONOMY, "11").unwrap();
        assert_eq!(roles.len(), 3);
        assert!(roles.contains("96"));
        assert!(roles.contains("165"));
        assert!(!roles.contains("4"));
    }

    #[test]
    fn unknown_category_is_error() {
        assert!(parse_allowed_roles(TAXONOMY, "999").is_err());
    }

    #[test]
    fn empty_category_is_error() {
        assert!(parse_allowed_roles(TAXONOMY, "12").is_err());
    }

    #[test]
    fn invalid_json_is_error() {
        assert!(parse_allowed_roles("<html>", "11").is_err());
    }
}
