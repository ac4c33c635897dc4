//! Work source adapter: pulls pending rows from the backing store with a
//! primary/fallback table policy, and partitions them into per-category
//! buckets of validated work items.
use crate::model::{RawRow, WorkItem};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("SUPABASE_URL and SUPABASE_KEY must be set")]
    MissingCredentials,
    #[error("invalid store url: {0}")]
    BadUrl(String),
    #[error("store unreachable: {0}")]
    Unreachable(#[from] reqwest::Error),
    #[error("store error {status}: {body}")]
    Api { status: StatusCode, body: String },
}

/// Which table a batch of rows came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceTable {
    Processed,
    ToProcess,
}

impl SourceTable {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTable::Processed => "processed_urls",
            SourceTable::ToProcess => "to_process",
        }
    }
}

/// Result of one fetch: rows plus the table they came from. Both tables
/// empty is the legitimate nothing-to-do outcome, not an error.
#[derive(Debug, Default)]
pub struct Fetched {
    pub rows: Vec<RawRow>,
    pub source: Option<SourceTable>,
}

/// Read access to the backing tables. The fallback policy sits above this
/// seam so tests can script table contents without a live store.
#[async_trait]
pub trait TableStore: Send + Sync {
    async fn select_all(&self, table: SourceTable) -> Result<Vec<RawRow>, SourceError>;
}

/// Query the primary table, falling back to the secondary when it is
/// empty. An unreachable store is an error on either leg; two empty
/// tables are not.
pub async fn fetch_with_fallback(store: &dyn TableStore) -> Result<Fetched, SourceError> {
    let primary = store.select_all(SourceTable::Processed).await?;
    if !primary.is_empty() {
        info!(rows = primary.len(), table = SourceTable::Processed.as_str(), "fetched work");
        return Ok(Fetched {
            rows: primary,
            source: Some(SourceTable::Processed),
        });
    }

    info!("primary table empty, trying fallback");
    let secondary = store.select_all(SourceTable::ToProcess).await?;
    if !secondary.is_empty() {
        info!(rows = secondary.len(), table = SourceTable::ToProcess.as_str(), "fetched work");
        return Ok(Fetched {
            rows: secondary,
            source: Some(SourceTable::ToProcess),
        });
    }

    info!("both tables empty, nothing to do");
    Ok(Fetched::default())
}

/// Partition raw rows into validated per-category buckets, preserving row
/// order. Every known category gets a bucket (possibly empty). Rows with
/// an unknown tag are dropped; rows failing validation are skipped with a
/// warning. Neither is fatal to the batch.
pub fn categorize(rows: &[RawRow], categories: &[String]) -> HashMap<String, Vec<WorkItem>> {
    let mut buckets: HashMap<String, Vec<WorkItem>> = categories
        .iter()
        .map(|c| (c.clone(), Vec::new()))
        .collect();

    for (idx, row) in rows.iter().enumerate() {
        let tag = row.bot.as_deref().unwrap_or("").trim();
        let Some(bucket) = buckets.get_mut(tag) else {
            debug!(idx, tag, "dropping row with unknown category tag");
            continue;
        };
        match WorkItem::from_row(row) {
            Ok(item) => bucket.push(item),
            Err(reason) => warn!(idx, %reason, url = ?row.url, "skipping invalid row"),
        }
    }

    buckets
}

/// REST client for the backing store.
pub struct SupabaseClient {
    http: Client,
    base_url: Url,
    key: String,
}

impl fmt::Debug for SupabaseClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupabaseClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl SupabaseClient {
    pub fn new(base_url: &str, key: String) -> Result<Self, SourceError> {
        let base_url =
            Url::parse(base_url).map_err(|e| SourceError::BadUrl(e.to_string()))?;
        let http = Client::builder()
            .user_agent("postfleet/0.1")
            .no_proxy()
            .build()
            .expect("reqwest client");
        Ok(Self {
            http,
            base_url,
            key,
        })
    }

    /// Construct from `SUPABASE_URL` / `SUPABASE_KEY`.
    pub fn from_env() -> Result<Self, SourceError> {
        let url = std::env::var("SUPABASE_URL").map_err(|_| SourceError::MissingCredentials)?;
        let key = std::env::var("SUPABASE_KEY").map_err(|_| SourceError::MissingCredentials)?;
        if url.trim().is_empty() || key.trim().is_empty() {
            return Err(SourceError::MissingCredentials);
        }
        Self::new(&url, key)
    }

    pub fn build_select_request(&self, table: SourceTable) -> Result<reqwest::Request, SourceError> {
        let mut endpoint = self
            .base_url
            .join(&format!("rest/v1/{}", table.as_str()))
            .map_err(|e| SourceError::BadUrl(e.to_string()))?;
        endpoint.query_pairs_mut().append_pair("select", "*");
        self.http
            .get(endpoint)
            .header("apikey", &self.key)
            .header("Authorization", format!("Bearer {}", self.key))
            .build()
            .map_err(SourceError::Unreachable)
    }
}

#[async_trait]
impl TableStore for SupabaseClient {
    async fn select_all(&self, table: SourceTable) -> Result<Vec<RawRow>, SourceError> {
        let request = self.build_select_request(table)?;
        debug!(url = %request.url(), "querying store");
        let res = self.http.execute(request).await?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(SourceError::Api { status, body });
        }
        Ok(res.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(bot: &str, url: Option<&str>, time: Option<&str>) -> RawRow {
        RawRow {
            title: Some("t".into()),
            url: url.map(str::to_string),
            time: time.map(str::to_string),
            bot: Some(bot.into()),
        }
    }

    fn categories() -> Vec<String> {
        vec!["formula".into(), "tech".into()]
    }

    struct ScriptedStore {
        primary: Vec<RawRow>,
        secondary: Vec<RawRow>,
    }

    #[async_trait]
    impl TableStore for ScriptedStore {
        async fn select_all(&self, table: SourceTable) -> Result<Vec<RawRow>, SourceError> {
            Ok(match table {
                SourceTable::Processed => self.primary.clone(),
                SourceTable::ToProcess => self.secondary.clone(),
            })
        }
    }

    #[tokio::test]
    async fn primary_rows_win() {
        let store = ScriptedStore {
            primary: vec![row("tech", Some("https://a"), Some("2024-01-01T00:00:00Z"))],
            secondary: vec![row("tech", Some("https://b"), Some("2024-01-01T00:00:00Z"))],
        };
        let fetched = fetch_with_fallback(&store).await.unwrap();
        assert_eq!(fetched.source, Some(SourceTable::Processed));
        assert_eq!(fetched.rows.len(), 1);
        assert_eq!(fetched.rows[0].url.as_deref(), Some("https://a"));
    }

    #[tokio::test]
    async fn empty_primary_falls_back() {
        let store = ScriptedStore {
            primary: vec![],
            secondary: vec![
                row("tech", Some("https://1"), Some("2024-01-01T00:00:00Z")),
                row("tech", Some("https://2"), Some("2024-01-01T00:00:00Z")),
                row("tech", Some("https://3"), Some("2024-01-01T00:00:00Z")),
            ],
        };
        let fetched = fetch_with_fallback(&store).await.unwrap();
        assert_eq!(fetched.source, Some(SourceTable::ToProcess));
        assert_eq!(fetched.rows.len(), 3);
    }

    #[tokio::test]
    async fn both_empty_is_not_an_error() {
        let store = ScriptedStore {
            primary: vec![],
            secondary: vec![],
        };
        let fetched = fetch_with_fallback(&store).await.unwrap();
        assert!(fetched.rows.is_empty());
        assert_eq!(fetched.source, None);
    }

    #[tokio::test]
    async fn unreachable_primary_propagates() {
        struct Failing;
        #[async_trait]
        impl TableStore for Failing {
            async fn select_all(&self, _table: SourceTable) -> Result<Vec<RawRow>, SourceError> {
                Err(SourceError::MissingCredentials)
            }
        }
        assert!(fetch_with_fallback(&Failing).await.is_err());
    }

    #[test]
    fn categorize_partitions_in_order() {
        let rows = vec![
            row("tech", Some("https://1"), Some("2024-01-01T00:00:00Z")),
            row("formula", Some("https://2"), Some("2024-01-01T00:00:00Z")),
            row("tech", Some("https://3"), Some("2024-01-01T00:00:00Z")),
        ];
        let buckets = categorize(&rows, &categories());
        let tech: Vec<_> = buckets["tech"].iter().map(|i| i.url.as_str()).collect();
        assert_eq!(tech, vec!["https://1", "https://3"]);
        assert_eq!(buckets["formula"].len(), 1);
    }

    #[test]
    fn unknown_tags_are_dropped_silently() {
        let rows = vec![
            row("gossip", Some("https://1"), Some("2024-01-01T00:00:00Z")),
            row("tech", Some("https://2"), Some("2024-01-01T00:00:00Z")),
        ];
        let buckets = categorize(&rows, &categories());
        assert_eq!(buckets["tech"].len(), 1);
        assert!(buckets.values().map(Vec::len).sum::<usize>() == 1);
    }

    #[test]
    fn invalid_rows_skipped_valid_ones_kept() {
        let rows = vec![
            row("tech", None, Some("2024-01-01T00:00:00Z")),
            row("tech", Some("https://ok"), Some("2024-01-01T00:00:00Z")),
            row("tech", Some("https://no-time"), None),
        ];
        let buckets = categorize(&rows, &categories());
        let tech: Vec<_> = buckets["tech"].iter().map(|i| i.url.as_str()).collect();
        assert_eq!(tech, vec!["https://ok"]);
    }

    #[test]
    fn every_known_category_gets_a_bucket() {
        let buckets = categorize(&[], &categories());
        assert_eq!(buckets.len(), 2);
        assert!(buckets["formula"].is_empty());
    }

    #[test]
    fn select_request_sets_auth_headers() {
        let client = SupabaseClient::new("https://proj.supabase.co/", "anon-key".into()).unwrap();
        let request = client.build_select_request(SourceTable::ToProcess).unwrap();
        assert_eq!(request.method(), reqwest::Method::GET);
        assert_eq!(request.url().path(), "/rest/v1/to_process");
        assert_eq!(request.url().query(), Some("select=*"));
        let headers = request.headers();
        assert_eq!(
            headers.get("apikey").and_then(|h| h.to_str().ok()).unwrap(),
            "anon-key"
        );
        assert_eq!(
            headers
                .get("Authorization")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "Bearer anon-key"
        );
    }
}
