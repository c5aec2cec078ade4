//! GCP Cloud Logging 계열 어댑터.
//!
//! `entries:list` 형태의 호출을 사용합니다. 커서 토큰은 응답의
//! `nextPageToken`을 그대로 보관합니다.

use crate::adapter::{PollBatch, SourceAdapter};
use crate::transport::{HttpTransport, TransportRequest};
use logbridge_core::error::SourceError;
use logbridge_core::pipeline::BoxFuture;
use logbridge_core::types::{Connection, Credentials, Cursor, ProviderKind, RawRecord};
use serde_json::json;
use std::sync::Arc;

const DEFAULT_ENDPOINT: &str = "https://logging.googleapis.com";

pub struct GcpAdapter {
    transport: Arc<dyn HttpTransport>,
}

impl GcpAdapter {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    fn resource<'a>(&self, connection: &'a Connection) -> Result<&'a str, SourceError> {
        connection
            .filter
            .log_group
            .as_deref()
            .filter(|r| !r.is_empty())
            .ok_or_else(|| {
                SourceError::permanent(
                    "gcp connection requires filter.log_group (e.g. projects/my-project)",
                )
            })
    }

    fn list_url(&self, credentials: &Credentials) -> String {
        let base = credentials
            .endpoint
            .as_deref()
            .unwrap_or(DEFAULT_ENDPOINT)
            .trim_end_matches('/');
        format!("{base}/v2/entries:list")
    }

    fn build_body(&self, connection: &Connection, resource: &str, cursor: &Cursor) -> serde_json::Value {
        let mut body = json!({
            "resourceNames": [resource],
            "orderBy": "timestamp asc",
        });
        let mut filters = Vec::new();
        if let Some(filter) = connection.filter.resource_filter.as_deref()
            && !filter.is_empty()
        {
            filters.push(filter.to_string());
        }
        if let Some(query) = connection.filter.query.as_deref()
            && !query.is_empty()
        {
            filters.push(query.to_string());
        }
        if !filters.is_empty() {
            body["filter"] = json!(filters.join(" AND "));
        }
        if let Some(token) = cursor.token.as_deref() {
            body["pageToken"] = json!(token);
        }
        body
    }
}

impl SourceAdapter for GcpAdapter {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Gcp
    }

    fn poll<'a>(
        &'a self,
        connection: &'a Connection,
        credentials: &'a Credentials,
        cursor: &'a Cursor,
    ) -> BoxFuture<'a, Result<PollBatch, SourceError>> {
        Box::pin(async move {
            let resource = self.resource(connection)?;
            let body = self.build_body(connection, resource, cursor);
            let request = TransportRequest::post(self.list_url(credentials), body)
                .bearer(&credentials.token);

            let response = self.transport.execute(request).await?.into_json()?;
            let entries = response
                .get("entries")
                .and_then(|e| e.as_array())
                .cloned()
                .unwrap_or_default();
            let records = entries
                .into_iter()
                .map(|entry| {
                    let native_id = entry
                        .get("insertId")
                        .and_then(|v| v.as_str())
                        .map(str::to_string);
                    let mut record = RawRecord::new(entry);
                    record.native_id = native_id;
                    record
                })
                .collect();

            let next_token = response
                .get("nextPageToken")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .or_else(|| cursor.token.clone());

            Ok(PollBatch {
                records,
                next_token,
            })
        })
    }

    fn test<'a>(
        &'a self,
        connection: &'a Connection,
        credentials: &'a Credentials,
    ) -> BoxFuture<'a, Result<(), SourceError>> {
        Box::pin(async move {
            let resource = self.resource(connection)?;
            let mut body = self.build_body(connection, resource, &Cursor::default());
            body["pageSize"] = json!(1);
            let request = TransportRequest::post(self.list_url(credentials), body)
                .bearer(&credentials.token);
            self.transport.execute(request).await?.into_json()?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{TransportResponse, tests_support::RecordingTransport};
    use logbridge_core::types::ProviderFilter;

    fn connection() -> Connection {
        Connection::new("proj-1", ProviderKind::Gcp, "blob", 30).with_filter(ProviderFilter {
            log_group: Some("projects/acme-prod".to_string()),
            query: Some("severity >= ERROR".to_string()),
            resource_filter: Some(r#"resource.type="gce_instance""#.to_string()),
        })
    }

    #[tokio::test]
    async fn poll_parses_entries_and_page_token() {
        let transport = Arc::new(RecordingTransport::replying(TransportResponse::ok(
            r#"{
                "entries": [
                    {"insertId": "ins-1", "timestamp": "2026-08-01T10:00:00Z",
                     "severity": "ERROR", "textPayload": "boom"}
                ],
                "nextPageToken": "tok-9"
            }"#,
        )));
        let adapter = GcpAdapter::new(transport.clone());

        let batch = adapter
            .poll(&connection(), &Credentials::new("tok"), &Cursor::default())
            .await
            .unwrap();

        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.records[0].native_id.as_deref(), Some("ins-1"));
        assert_eq!(batch.next_token.as_deref(), Some("tok-9"));

        let body = transport.last_request().unwrap().body.unwrap();
        assert_eq!(body["resourceNames"][0], "projects/acme-prod");
        let filter = body["filter"].as_str().unwrap();
        assert!(filter.contains("gce_instance"));
        assert!(filter.contains("severity >= ERROR"));
    }

    #[tokio::test]
    async fn poll_sends_page_token_from_cursor() {
        let transport = Arc::new(RecordingTransport::replying(TransportResponse::ok(
            r#"{"entries": []}"#,
        )));
        let adapter = GcpAdapter::new(transport.clone());

        let cursor = Cursor {
            token: Some("tok-3".to_string()),
            sequence: 2,
        };
        let batch = adapter
            .poll(&connection(), &Credentials::new("tok"), &cursor)
            .await
            .unwrap();

        let body = transport.last_request().unwrap().body.unwrap();
        assert_eq!(body["pageToken"], "tok-3");
        assert_eq!(batch.next_token.as_deref(), Some("tok-3"));
    }

    #[tokio::test]
    async fn test_requests_single_entry() {
        let transport = Arc::new(RecordingTransport::replying(TransportResponse::ok(
            r#"{"entries": []}"#,
        )));
        let adapter = GcpAdapter::new(transport.clone());

        adapter
            .test(&connection(), &Credentials::new("tok"))
            .await
            .unwrap();
        let body = transport.last_request().unwrap().body.unwrap();
        assert_eq!(body["pageSize"], 1);
    }
}
