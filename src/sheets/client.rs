use super::auth::{CredentialsSource, TokenProvider};
use super::model::{BatchRequest, BatchUpdateBody, SheetProperties, Spreadsheet};
use super::{GridFields, GridSlice, METADATA_FIELDS, SheetsApi};
use crate::error::{Result, Upstream};
use crate::recovery::{ExponentialBackoff, RetryConfig, retry_async_with_policy};
use crate::transport::{CallFailure, build_http_client, send_checked};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, instrument};

pub const DEFAULT_SHEETS_BASE_URL: &str = "https://sheets.googleapis.com/v4/spreadsheets";

/// Sheets v4 REST client.
pub struct GoogleSheetsClient {
    http: reqwest::Client,
    base_url: String,
    tokens: TokenProvider,
    retry: ExponentialBackoff,
}

impl GoogleSheetsClient {
    pub fn new(
        base_url: impl Into<String>,
        credentials: &CredentialsSource,
        timeout: Duration,
        retry: RetryConfig,
    ) -> Result<Self> {
        let http = build_http_client(timeout)?;
        let tokens = TokenProvider::new(credentials, http.clone())?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
            retry: ExponentialBackoff::new(retry),
        })
    }

    fn spreadsheet_url(&self, spreadsheet_id: &str) -> String {
        format!("{}/{}", self.base_url, spreadsheet_id)
    }

    async fn get_spreadsheet(&self, spreadsheet_id: &str, query: &[(&str, &str)]) -> Result<Spreadsheet> {
        let url = self.spreadsheet_url(spreadsheet_id);
        retry_async_with_policy(
            || async {
                let token = self.tokens.bearer_token().await?;
                let response = send_checked(
                    self.http.get(&url).bearer_auth(token).query(query),
                    true,
                )
                .await
                .map_err(|f| f.into_transport(Upstream::SheetsApi))?;
                response.json::<Spreadsheet>().await.map_err(|e| {
                    CallFailure::from_reqwest(&e, true).into_transport(Upstream::SheetsApi)
                })
            },
            &self.retry,
            "sheets.get",
        )
        .await
    }
}

#[async_trait]
impl SheetsApi for GoogleSheetsClient {
    #[instrument(skip(self))]
    async fn fetch_spreadsheet_metadata(
        &self,
        spreadsheet_id: &str,
    ) -> Result<Vec<SheetProperties>> {
        let spreadsheet = self
            .get_spreadsheet(spreadsheet_id, &[("fields", METADATA_FIELDS)])
            .await?;
        Ok(spreadsheet
            .sheets
            .into_iter()
            .map(|sheet| sheet.properties)
            .collect())
    }

    #[instrument(skip(self))]
    async fn fetch_grid_slice(
        &self,
        spreadsheet_id: &str,
        range: &str,
        fields: GridFields,
    ) -> Result<GridSlice> {
        let spreadsheet = self
            .get_spreadsheet(
                spreadsheet_id,
                &[
                    ("ranges", range),
                    ("includeGridData", "true"),
                    ("fields", fields.mask()),
                ],
            )
            .await?;
        let slice = GridSlice::from_spreadsheet(spreadsheet);
        debug!(cells = slice.cells.len(), "fetched grid slice");
        Ok(slice)
    }

    #[instrument(skip(self, requests), fields(requests = requests.len()))]
    async fn apply_batched_formatting(
        &self,
        spreadsheet_id: &str,
        requests: Vec<BatchRequest>,
    ) -> Result<()> {
        if requests.is_empty() {
            return Ok(());
        }
        let url = format!("{}:batchUpdate", self.spreadsheet_url(spreadsheet_id));
        let body = BatchUpdateBody { requests };

        // Not idempotent from the caller's point of view: only failures that
        // never reached the server are retried.
        retry_async_with_policy(
            || async {
                let token = self.tokens.bearer_token().await?;
                send_checked(self.http.post(&url).bearer_auth(token).json(&body), false)
                    .await
                    .map(|_| ())
                    .map_err(|f| f.into_transport(Upstream::SheetsApi))
            },
            &self.retry,
            "sheets.batchUpdate",
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_urls_without_double_slash() {
        let client = GoogleSheetsClient::new(
            "https://sheets.example.test/v4/spreadsheets/",
            &CredentialsSource::AccessToken("t".into()),
            Duration::from_secs(5),
            RetryConfig::none(),
        )
        .unwrap();
        assert_eq!(
            client.spreadsheet_url("abc"),
            "https://sheets.example.test/v4/spreadsheets/abc"
        );
    }

    #[test]
    fn metadata_mask_requests_grid_dimensions() {
        assert!(METADATA_FIELDS.contains("rowCount"));
        assert!(GridFields::Classification.mask().contains("userEnteredValue"));
        assert!(GridFields::Colors.mask().contains("startRow"));
    }
}
