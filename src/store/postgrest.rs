//! PostgREST (Supabase) row access.

use super::{SnapshotRow, SnapshotStore};
use crate::error::{ManglerError, Result};
use crate::recovery::{ExponentialBackoff, RetryConfig, retry_async_with_policy};
use crate::transport::{CallFailure, build_http_client, send_checked};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Cells per `in.(...)` filter, keeping request URLs well under proxy limits.
const FILTER_CHUNK: usize = 200;

/// Rows requested per page. PostgREST deployments cap responses (Supabase
/// defaults to 1000), so reads page until the server returns nothing.
const PAGE_SIZE: usize = 1000;

pub struct PostgrestClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    retry: ExponentialBackoff,
}

impl std::fmt::Debug for PostgrestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgrestClient").finish_non_exhaustive()
    }
}

impl PostgrestClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
        retry: RetryConfig,
    ) -> Result<Self> {
        let base_url = base_url.into();
        let api_key = api_key.into();
        if base_url.trim().is_empty() || api_key.trim().is_empty() {
            return Err(ManglerError::Configuration(
                "row store URL and key are required".into(),
            ));
        }
        Ok(Self {
            http: build_http_client(timeout)?,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            api_key: api_key.trim().to_string(),
            retry: ExponentialBackoff::new(retry),
        })
    }

    pub fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    /// Bulk insert. With `on_conflict` set, duplicate keys are merged, which
    /// also makes the call safe to retry.
    pub async fn insert<T>(&self, table: &str, rows: &[T], on_conflict: Option<&str>) -> Result<()>
    where
        T: Serialize + Sync,
    {
        if rows.is_empty() {
            return Err(ManglerError::invalid_input("no rows to persist"));
        }
        let url = self.table_url(table);
        let idempotent = on_conflict.is_some();
        let prefer = if idempotent {
            "resolution=merge-duplicates,return=minimal"
        } else {
            "return=minimal"
        };

        retry_async_with_policy(
            || async {
                let mut request = self
                    .authorized(self.http.post(&url))
                    .header("Prefer", prefer)
                    .json(rows);
                if let Some(columns) = on_conflict {
                    request = request.query(&[("on_conflict", columns)]);
                }
                send_checked(request, idempotent)
                    .await
                    .map(|_| ())
                    .map_err(CallFailure::into_store)
            },
            &self.retry,
            "store.insert",
        )
        .await
    }

    pub async fn select<T>(&self, table: &str, query: &[(&str, String)]) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
    {
        let url = self.table_url(table);
        retry_async_with_policy(
            || async {
                let response = send_checked(
                    self.authorized(self.http.get(&url)).query(query),
                    true,
                )
                .await
                .map_err(CallFailure::into_store)?;
                response
                    .json::<Vec<T>>()
                    .await
                    .map_err(|e| CallFailure::from_reqwest(&e, true).into_store())
            },
            &self.retry,
            "store.select",
        )
        .await
    }

    /// Every row matching `query`, fetched `PAGE_SIZE` at a time ordered by
    /// `order`. Paging stops at the first empty page, so a server cap below
    /// `PAGE_SIZE` still yields the full result.
    pub async fn select_all<T>(
        &self,
        table: &str,
        query: &[(&str, String)],
        order: &str,
    ) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
    {
        let mut rows = Vec::new();
        loop {
            let mut page_query = query.to_vec();
            page_query.push(("order", order.to_string()));
            page_query.push(("limit", PAGE_SIZE.to_string()));
            page_query.push(("offset", rows.len().to_string()));

            let mut page: Vec<T> = self.select(table, &page_query).await?;
            if page.is_empty() {
                break;
            }
            debug!(table, offset = rows.len(), fetched = page.len(), "fetched page");
            rows.append(&mut page);
        }
        Ok(rows)
    }
}

pub struct PostgrestSnapshotStore {
    client: Arc<PostgrestClient>,
    table: String,
}

impl PostgrestSnapshotStore {
    pub fn new(client: Arc<PostgrestClient>, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
        }
    }
}

/// `in.(A1,B2)` filter value. Cell labels never contain commas or parens.
fn in_filter(cells: &[String]) -> String {
    format!("in.({})", cells.join(","))
}

#[async_trait]
impl SnapshotStore for PostgrestSnapshotStore {
    #[instrument(skip(self, rows), fields(rows = rows.len()))]
    async fn insert_snapshot_rows(&self, rows: &[SnapshotRow]) -> Result<()> {
        self.client
            .insert(&self.table, rows, Some("snapshot_batch_id,cell"))
            .await?;
        debug!(table = %self.table, "stored snapshot rows");
        Ok(())
    }

    #[instrument(skip(self, cells))]
    async fn fetch_snapshot_rows(
        &self,
        batch_id: &str,
        cells: Option<&[String]>,
    ) -> Result<Vec<SnapshotRow>> {
        let batch_filter = format!("eq.{batch_id}");
        let Some(cells) = cells else {
            return self
                .client
                .select_all(
                    &self.table,
                    &[("snapshot_batch_id", batch_filter), ("select", "*".into())],
                    "cell.asc",
                )
                .await;
        };

        let mut rows = Vec::new();
        for chunk in cells.chunks(FILTER_CHUNK) {
            let mut part: Vec<SnapshotRow> = self
                .client
                .select_all(
                    &self.table,
                    &[
                        ("snapshot_batch_id", batch_filter.clone()),
                        ("cell", in_filter(chunk)),
                        ("select", "*".into()),
                    ],
                    "cell.asc",
                )
                .await?;
            rows.append(&mut part);
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use axum::routing::get;
    use axum::{Json, Router, http::Uri};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    fn client() -> PostgrestClient {
        PostgrestClient::new(
            "https://project.supabase.test/",
            "service-key",
            Duration::from_secs(5),
            RetryConfig::none(),
        )
        .unwrap()
    }

    #[test]
    fn table_urls() {
        assert_eq!(
            client().table_url("cell_color_snapshots"),
            "https://project.supabase.test/rest/v1/cell_color_snapshots"
        );
    }

    #[test]
    fn rejects_missing_credentials() {
        assert_matches!(
            PostgrestClient::new("", "key", Duration::from_secs(1), RetryConfig::none()),
            Err(ManglerError::Configuration(_))
        );
        assert_matches!(
            PostgrestClient::new("https://x", " ", Duration::from_secs(1), RetryConfig::none()),
            Err(ManglerError::Configuration(_))
        );
    }

    #[test]
    fn builds_in_filters() {
        assert_eq!(in_filter(&["A1".into(), "B2".into()]), "in.(A1,B2)");
    }

    /// Serves `total` rows for any batch, at most `cap` per response, the way
    /// a PostgREST `max-rows` setting truncates results.
    async fn capped_table(total: usize, cap: usize) -> (String, Arc<AtomicUsize>) {
        let requests = Arc::new(AtomicUsize::new(0));
        let counter = requests.clone();
        let app = Router::new().route(
            "/rest/v1/cell_color_snapshots",
            get(move |uri: Uri| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    let param = |name: &str| -> Option<usize> {
                        uri.query()?
                            .split('&')
                            .find_map(|pair| pair.strip_prefix(name)?.strip_prefix('='))?
                            .parse()
                            .ok()
                    };
                    let offset = param("offset").unwrap_or(0).min(total);
                    let limit = param("limit").unwrap_or(usize::MAX).min(cap);
                    let end = offset.saturating_add(limit).min(total);
                    let rows: Vec<SnapshotRow> = (offset..end)
                        .map(|i| SnapshotRow {
                            snapshot_batch_id: "batch-1".into(),
                            spreadsheet_id: "sheet-123".into(),
                            gid: Some(0),
                            cell: format!("A{}", i + 1),
                            red: 1.0,
                            green: 1.0,
                            blue: 1.0,
                            sheet_url: None,
                        })
                        .collect();
                    Json(rows)
                }
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), requests)
    }

    fn store_at(base_url: &str) -> PostgrestSnapshotStore {
        let client = PostgrestClient::new(
            base_url,
            "service-key",
            Duration::from_secs(5),
            RetryConfig::none(),
        )
        .unwrap();
        PostgrestSnapshotStore::new(Arc::new(client), "cell_color_snapshots")
    }

    #[tokio::test]
    async fn batch_reads_page_past_the_server_row_cap() {
        let (base_url, requests) = capped_table(1500, 1000).await;
        let rows = store_at(&base_url)
            .fetch_snapshot_rows("batch-1", None)
            .await
            .unwrap();

        assert_eq!(rows.len(), 1500);
        let cells: HashSet<&str> = rows.iter().map(|r| r.cell.as_str()).collect();
        assert_eq!(cells.len(), 1500);
        assert!(cells.contains("A1500"));
        // two full pages and the empty one that ends the read
        assert_eq!(requests.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn paging_survives_a_cap_below_the_page_size() {
        let (base_url, _) = capped_table(1200, 500).await;
        let rows = store_at(&base_url)
            .fetch_snapshot_rows("batch-1", None)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1200);
    }

    #[tokio::test]
    async fn empty_insert_is_rejected_before_any_request() {
        let rows: Vec<SnapshotRow> = Vec::new();
        assert_matches!(
            client().insert("t", &rows, None).await,
            Err(ManglerError::InvalidInput(_))
        );
    }
}
