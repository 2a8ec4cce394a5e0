//! Warehouse REST v2 client.
//!
//! Integers travel as decimal strings and timestamps as epoch milliseconds,
//! so the wire types below keep them as `String` and convert on the way in.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use common::config::WarehouseConfig;

use super::{
    CatalogError, CatalogResult, DatasetMetadata, DatasetRef, ExportJob, ExportService,
    ExtractRequest, TableCatalog, TableKind, TableMetadata, TablePage, TableRef, TableUpdate,
    TerminalStatus, TimePartitioning,
};

/// [`TableCatalog`] and [`ExportService`] backed by the REST API.
#[derive(Debug, Clone)]
pub struct RestCatalog {
    base_url: Url,
    http: reqwest::Client,
    page_size: u32,
    location: Option<String>,
    poll_interval: Duration,
}

impl RestCatalog {
    pub fn new(config: &WarehouseConfig) -> anyhow::Result<Self> {
        let base_url = Url::parse(config.api_base_url.trim_end_matches('/'))
            .with_context(|| format!("Invalid warehouse API URL '{}'", config.api_base_url))?;

        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(token) = &config.access_token {
            headers.insert(
                reqwest::header::AUTHORIZATION,
                reqwest::header::HeaderValue::from_str(&format!("Bearer {token}"))
                    .context("Access token is not a valid header value")?,
            );
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            base_url,
            http,
            page_size: config.page_size,
            location: config.location.clone(),
            poll_interval: config.job_poll_interval,
        })
    }

    fn url(&self, segments: &[&str]) -> CatalogResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                CatalogError::Transport(format!("base URL {} cannot take a path", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn table_url(&self, table: &TableRef) -> CatalogResult<Url> {
        self.url(&[
            "projects",
            table.project_id.as_str(),
            "datasets",
            table.dataset_id.as_str(),
            "tables",
            table.table_id.as_str(),
        ])
    }

    fn list_url(&self, dataset: &DatasetRef, page_token: Option<&str>) -> CatalogResult<Url> {
        let mut url = self.url(&[
            "projects",
            dataset.project_id.as_str(),
            "datasets",
            dataset.dataset_id.as_str(),
            "tables",
        ])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("maxResults", &self.page_size.to_string());
            if let Some(token) = page_token {
                query.append_pair("pageToken", token);
            }
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http.request(method, url)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        resource: &str,
        request: RequestBuilder,
    ) -> CatalogResult<T> {
        let response = request
            .send()
            .await
            .map_err(|e| CatalogError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CatalogError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(status_error(resource, status, &body));
        }

        serde_json::from_str(&body).map_err(|e| CatalogError::Decode {
            resource: resource.to_string(),
            message: e.to_string(),
        })
    }
}

/// Map a non-success response to a [`CatalogError`].
fn status_error(resource: &str, status: StatusCode, body: &str) -> CatalogError {
    let message = serde_json::from_str::<ErrorResponse>(body)
        .ok()
        .and_then(|e| e.error.message)
        .unwrap_or_else(|| body.to_string());

    match status {
        StatusCode::NOT_FOUND => CatalogError::NotFound {
            resource: resource.to_string(),
        },
        StatusCode::PRECONDITION_FAILED => CatalogError::Conflict {
            resource: resource.to_string(),
        },
        _ => CatalogError::Api {
            resource: resource.to_string(),
            status: status.as_u16(),
            message,
        },
    }
}

#[async_trait]
impl TableCatalog for RestCatalog {
    async fn dataset_metadata(&self, dataset: &DatasetRef) -> CatalogResult<DatasetMetadata> {
        let resource = format!("dataset {dataset}");
        let url = self.url(&[
            "projects",
            dataset.project_id.as_str(),
            "datasets",
            dataset.dataset_id.as_str(),
        ])?;
        let wire: DatasetResource = self.send(&resource, self.request(Method::GET, url)).await?;
        wire.into_metadata(&resource)
    }

    async fn list_tables_page(
        &self,
        dataset: &DatasetRef,
        page_token: Option<String>,
    ) -> CatalogResult<TablePage> {
        let resource = format!("dataset {dataset}");
        let url = self.list_url(dataset, page_token.as_deref())?;
        let wire: TableList = self.send(&resource, self.request(Method::GET, url)).await?;
        Ok(wire.into_page())
    }

    async fn table_metadata(&self, table: &TableRef) -> CatalogResult<TableMetadata> {
        let resource = format!("table {table}");
        let url = self.table_url(table)?;
        let wire: TableResource = self.send(&resource, self.request(Method::GET, url)).await?;
        wire.into_metadata(&resource)
    }

    async fn update_table(
        &self,
        table: &TableRef,
        update: TableUpdate,
        etag: &str,
    ) -> CatalogResult<TableMetadata> {
        let resource = format!("table {table}");
        let url = self.table_url(table)?;
        let request = self
            .request(Method::PATCH, url)
            .header(reqwest::header::IF_MATCH, etag)
            .json(&TablePatch::from(update));

        let wire: TableResource = self.send(&resource, request).await?;
        wire.into_metadata(&resource)
    }

    async fn delete_table(&self, table: &TableRef) -> CatalogResult<()> {
        let resource = format!("table {table}");
        let url = self.table_url(table)?;
        let response = self
            .request(Method::DELETE, url)
            .send()
            .await
            .map_err(|e| CatalogError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_error(&resource, status, &body))
    }
}

#[async_trait]
impl ExportService for RestCatalog {
    async fn start_export(
        &self,
        table: &TableRef,
        request: &ExtractRequest,
    ) -> CatalogResult<ExportJob> {
        let resource = format!("export of table {table}");
        let url = self.url(&["projects", table.project_id.as_str(), "jobs"])?;
        let body = JobInsert {
            job_reference: self.location.clone().map(|location| JobLocation { location }),
            configuration: JobConfiguration {
                extract: ExtractConfiguration {
                    source_table: TableReference::from(table),
                    destination_uris: vec![request.destination_uri.clone()],
                    destination_format: request.format.as_api(),
                    compression: request.compression.as_api(),
                },
            },
        };

        let wire: JobResource = self
            .send(&resource, self.request(Method::POST, url).json(&body))
            .await?;

        Ok(ExportJob {
            job_id: wire.job_reference.job_id,
            project_id: wire.job_reference.project_id,
            location: wire.job_reference.location.or_else(|| self.location.clone()),
        })
    }

    async fn wait_for_job(&self, job: &ExportJob) -> CatalogResult<TerminalStatus> {
        let resource = format!("job {}", job.job_id);
        let mut url = self.url(&[
            "projects",
            job.project_id.as_str(),
            "jobs",
            job.job_id.as_str(),
        ])?;
        if let Some(location) = &job.location {
            url.query_pairs_mut().append_pair("location", location);
        }

        loop {
            let wire: JobResource = self
                .send(&resource, self.request(Method::GET, url.clone()))
                .await?;

            if let Some(status) = wire.terminal_status() {
                return Ok(status);
            }

            tracing::debug!(job_id = %job.job_id, "Export job still running");
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

fn parse_i64(resource: &str, field: &str, value: &str) -> CatalogResult<i64> {
    value.parse::<i64>().map_err(|e| CatalogError::Decode {
        resource: resource.to_string(),
        message: format!("{field} '{value}' is not an integer: {e}"),
    })
}

fn parse_millis_duration(
    resource: &str,
    field: &str,
    value: Option<&str>,
) -> CatalogResult<Option<Duration>> {
    value
        .map(|v| {
            let millis = parse_i64(resource, field, v)?;
            u64::try_from(millis)
                .map(Duration::from_millis)
                .map_err(|_| CatalogError::Decode {
                    resource: resource.to_string(),
                    message: format!("{field} '{v}' is negative"),
                })
        })
        .transpose()
}

fn parse_timestamp(
    resource: &str,
    field: &str,
    value: Option<&str>,
) -> CatalogResult<Option<DateTime<Utc>>> {
    value
        .map(|v| {
            let millis = parse_i64(resource, field, v)?;
            DateTime::from_timestamp_millis(millis).ok_or_else(|| CatalogError::Decode {
                resource: resource.to_string(),
                message: format!("{field} '{v}' is out of range"),
            })
        })
        .transpose()
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatasetResource {
    default_table_expiration_ms: Option<String>,
    default_partition_expiration_ms: Option<String>,
}

impl DatasetResource {
    fn into_metadata(self, resource: &str) -> CatalogResult<DatasetMetadata> {
        Ok(DatasetMetadata {
            default_table_expiration: parse_millis_duration(
                resource,
                "defaultTableExpirationMs",
                self.default_table_expiration_ms.as_deref(),
            )?,
            default_partition_expiration: parse_millis_duration(
                resource,
                "defaultPartitionExpirationMs",
                self.default_partition_expiration_ms.as_deref(),
            )?,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableReference {
    project_id: String,
    dataset_id: String,
    table_id: String,
}

impl From<&TableRef> for TableReference {
    fn from(table: &TableRef) -> Self {
        Self {
            project_id: table.project_id.clone(),
            dataset_id: table.dataset_id.clone(),
            table_id: table.table_id.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableList {
    #[serde(default)]
    tables: Vec<TableListEntry>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableListEntry {
    table_reference: TableReference,
}

impl TableList {
    fn into_page(self) -> TablePage {
        TablePage {
            tables: self
                .tables
                .into_iter()
                .map(|entry| TableRef {
                    project_id: entry.table_reference.project_id,
                    dataset_id: entry.table_reference.dataset_id,
                    table_id: entry.table_reference.table_id,
                })
                .collect(),
            next_page_token: self.next_page_token.filter(|t| !t.is_empty()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimePartitioningResource {
    #[serde(rename = "type")]
    partition_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    field: Option<String>,
    /// Serialized as `null` when unset so a patch clears it.
    expiration_ms: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableResource {
    table_reference: TableReference,
    #[serde(rename = "type")]
    kind: Option<String>,
    creation_time: Option<String>,
    last_modified_time: Option<String>,
    expiration_time: Option<String>,
    time_partitioning: Option<TimePartitioningResource>,
    num_bytes: Option<String>,
    etag: Option<String>,
}

impl TableResource {
    fn into_metadata(self, resource: &str) -> CatalogResult<TableMetadata> {
        let creation_time =
            parse_timestamp(resource, "creationTime", self.creation_time.as_deref())?.ok_or_else(
                || CatalogError::Decode {
                    resource: resource.to_string(),
                    message: "creationTime is missing".to_string(),
                },
            )?;
        let last_modified_time =
            parse_timestamp(resource, "lastModifiedTime", self.last_modified_time.as_deref())?
                .unwrap_or(creation_time);
        let expiration_time =
            parse_timestamp(resource, "expirationTime", self.expiration_time.as_deref())?;

        let time_partitioning = self
            .time_partitioning
            .map(|tp| -> CatalogResult<TimePartitioning> {
                Ok(TimePartitioning {
                    expiration: parse_millis_duration(
                        resource,
                        "timePartitioning.expirationMs",
                        tp.expiration_ms.as_deref(),
                    )?,
                    partition_type: tp.partition_type,
                    field: tp.field,
                })
            })
            .transpose()?;

        let num_bytes = match self.num_bytes.as_deref() {
            Some(v) => u64::try_from(parse_i64(resource, "numBytes", v)?).unwrap_or(0),
            None => 0,
        };

        Ok(TableMetadata {
            table_id: self.table_reference.table_id,
            kind: TableKind::from_api(self.kind.as_deref().unwrap_or("TABLE")),
            creation_time,
            last_modified_time,
            expiration_time,
            time_partitioning,
            num_bytes,
            etag: self.etag.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum TablePatch {
    ExpirationTime(Option<String>),
    TimePartitioning(TimePartitioningResource),
}

impl From<TableUpdate> for TablePatch {
    fn from(update: TableUpdate) -> Self {
        match update {
            TableUpdate::ExpirationTime(expiration) => {
                TablePatch::ExpirationTime(expiration.map(|t| t.timestamp_millis().to_string()))
            }
            TableUpdate::TimePartitioning(tp) => {
                TablePatch::TimePartitioning(TimePartitioningResource {
                    partition_type: tp.partition_type,
                    field: tp.field,
                    expiration_ms: tp.expiration.map(|d| d.as_millis().to_string()),
                })
            }
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JobInsert {
    #[serde(skip_serializing_if = "Option::is_none")]
    job_reference: Option<JobLocation>,
    configuration: JobConfiguration,
}

#[derive(Debug, Serialize)]
struct JobLocation {
    location: String,
}

#[derive(Debug, Serialize)]
struct JobConfiguration {
    extract: ExtractConfiguration,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExtractConfiguration {
    source_table: TableReference,
    destination_uris: Vec<String>,
    destination_format: &'static str,
    compression: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobResource {
    job_reference: JobReference,
    status: Option<JobStatusResource>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    project_id: String,
    job_id: String,
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatusResource {
    state: String,
    error_result: Option<JobErrorResource>,
}

#[derive(Debug, Deserialize)]
struct JobErrorResource {
    reason: Option<String>,
    message: Option<String>,
}

impl JobResource {
    /// `None` while the job is still pending or running.
    fn terminal_status(&self) -> Option<TerminalStatus> {
        let status = self.status.as_ref()?;
        if status.state != "DONE" {
            return None;
        }

        Some(match &status.error_result {
            None => TerminalStatus::Done,
            // User cancellation surfaces as "stopped" with a message saying so
            Some(err) if err.reason.as_deref() == Some("stopped") => {
                let cancelled = err
                    .message
                    .as_deref()
                    .is_some_and(|m| m.to_ascii_lowercase().contains("cancel"));
                if cancelled {
                    TerminalStatus::Cancelled
                } else {
                    TerminalStatus::Stopped
                }
            }
            Some(err) => TerminalStatus::Failed(
                err.message
                    .clone()
                    .or_else(|| err.reason.clone())
                    .unwrap_or_else(|| "unknown error".to_string()),
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use common::testing::TestConfigBuilder;

    fn catalog() -> RestCatalog {
        RestCatalog::new(&TestConfigBuilder::new().build().warehouse).unwrap()
    }

    #[test]
    fn test_table_url_is_escaped() {
        let table = DatasetRef::new("my-project", "logs").table("events$20230101");
        let url = catalog().table_url(&table).unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:9050/bigquery/v2/projects/my-project/datasets/logs/tables/events$20230101"
        );
    }

    #[test]
    fn test_decode_table_resource() {
        let body = r#"{
            "tableReference": {"projectId": "p", "datasetId": "d", "tableId": "events_20230101"},
            "type": "TABLE",
            "creationTime": "1672531200000",
            "lastModifiedTime": "1672617600000",
            "timePartitioning": {"type": "DAY", "expirationMs": "86400000"},
            "numBytes": "2048",
            "etag": "abc=="
        }"#;

        let wire: TableResource = serde_json::from_str(body).unwrap();
        let metadata = wire.into_metadata("table p.d.events_20230101").unwrap();

        assert_eq!(metadata.table_id, "events_20230101");
        assert_eq!(metadata.kind, TableKind::Regular);
        assert_eq!(
            metadata.creation_time,
            Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(metadata.expiration_time, None);
        assert_eq!(
            metadata.time_partitioning.unwrap().expiration,
            Some(Duration::from_secs(86_400))
        );
        assert_eq!(metadata.num_bytes, 2048);
        assert_eq!(metadata.etag, "abc==");
    }

    #[test]
    fn test_decode_rejects_garbage_timestamp() {
        let body = r#"{
            "tableReference": {"projectId": "p", "datasetId": "d", "tableId": "t"},
            "creationTime": "yesterday"
        }"#;
        let wire: TableResource = serde_json::from_str(body).unwrap();
        assert!(matches!(
            wire.into_metadata("table p.d.t"),
            Err(CatalogError::Decode { .. })
        ));
    }

    #[test]
    fn test_patch_bodies() {
        let clear = serde_json::to_value(TablePatch::from(TableUpdate::ExpirationTime(None)))
            .unwrap();
        assert_eq!(clear, serde_json::json!({"expirationTime": null}));

        let at = Utc.with_ymd_and_hms(2023, 1, 31, 0, 0, 0).unwrap();
        let set = serde_json::to_value(TablePatch::from(TableUpdate::ExpirationTime(Some(at))))
            .unwrap();
        assert_eq!(set, serde_json::json!({"expirationTime": "1675123200000"}));

        let partition = serde_json::to_value(TablePatch::from(TableUpdate::TimePartitioning(
            TimePartitioning {
                partition_type: "DAY".to_string(),
                field: None,
                expiration: Some(Duration::from_secs(3600)),
            },
        )))
        .unwrap();
        assert_eq!(
            partition,
            serde_json::json!({"timePartitioning": {"type": "DAY", "expirationMs": "3600000"}})
        );
    }

    #[test]
    fn test_status_error_mapping() {
        let body = r#"{"error": {"code": 404, "message": "Not found: Table p:d.t"}}"#;
        assert!(status_error("table p.d.t", StatusCode::NOT_FOUND, body).is_not_found());
        assert!(matches!(
            status_error("table p.d.t", StatusCode::PRECONDITION_FAILED, ""),
            CatalogError::Conflict { .. }
        ));

        let body = r#"{"error": {"code": 403, "message": "Access Denied"}}"#;
        assert_eq!(
            status_error("table p.d.t", StatusCode::FORBIDDEN, body),
            CatalogError::Api {
                resource: "table p.d.t".to_string(),
                status: 403,
                message: "Access Denied".to_string(),
            }
        );
    }

    #[test]
    fn test_job_terminal_status() {
        let running: JobResource = serde_json::from_str(
            r#"{"jobReference": {"projectId": "p", "jobId": "j"}, "status": {"state": "RUNNING"}}"#,
        )
        .unwrap();
        assert_eq!(running.terminal_status(), None);

        let done: JobResource = serde_json::from_str(
            r#"{"jobReference": {"projectId": "p", "jobId": "j"}, "status": {"state": "DONE"}}"#,
        )
        .unwrap();
        assert_eq!(done.terminal_status(), Some(TerminalStatus::Done));

        let failed: JobResource = serde_json::from_str(
            r#"{"jobReference": {"projectId": "p", "jobId": "j"},
                "status": {"state": "DONE", "errorResult": {"reason": "invalid", "message": "bad uri"}}}"#,
        )
        .unwrap();
        assert_eq!(
            failed.terminal_status(),
            Some(TerminalStatus::Failed("bad uri".to_string()))
        );

        let cancelled: JobResource = serde_json::from_str(
            r#"{"jobReference": {"projectId": "p", "jobId": "j"},
                "status": {"state": "DONE", "errorResult": {"reason": "stopped",
                "message": "Job execution was cancelled: User requested cancellation"}}}"#,
        )
        .unwrap();
        assert_eq!(cancelled.terminal_status(), Some(TerminalStatus::Cancelled));

        let stopped: JobResource = serde_json::from_str(
            r#"{"jobReference": {"projectId": "p", "jobId": "j"},
                "status": {"state": "DONE", "errorResult": {"reason": "stopped"}}}"#,
        )
        .unwrap();
        assert_eq!(stopped.terminal_status(), Some(TerminalStatus::Stopped));
    }

    #[test]
    fn test_list_url_carries_page_size_and_token() {
        let config = TestConfigBuilder::new().with_page_size(25).build();
        let catalog = RestCatalog::new(&config.warehouse).unwrap();
        let dataset = DatasetRef::new("p", "logs");

        let first = catalog.list_url(&dataset, None).unwrap();
        assert_eq!(
            first.as_str(),
            "http://127.0.0.1:9050/bigquery/v2/projects/p/datasets/logs/tables?maxResults=25"
        );

        let next = catalog.list_url(&dataset, Some("tok en")).unwrap();
        assert_eq!(next.query(), Some("maxResults=25&pageToken=tok+en"));
    }

    #[test]
    fn test_list_page_drops_empty_token() {
        let list: TableList = serde_json::from_str(
            r#"{"tables": [{"tableReference": {"projectId": "p", "datasetId": "d", "tableId": "a"}}],
                "nextPageToken": ""}"#,
        )
        .unwrap();
        let page = list.into_page();
        assert_eq!(page.tables.len(), 1);
        assert!(page.next_page_token.is_none());
    }
}
