//! AWS CloudWatch Logs 계열 어댑터.
//!
//! `FilterLogEvents` 형태의 JSON RPC 호출을 사용합니다. 커서 토큰은
//! 응답의 `nextToken`을 그대로 보관합니다.

use crate::adapter::{PollBatch, SourceAdapter};
use crate::transport::{HttpTransport, TransportRequest};
use logbridge_core::error::SourceError;
use logbridge_core::pipeline::BoxFuture;
use logbridge_core::types::{Connection, Credentials, Cursor, ProviderKind, RawRecord};
use serde_json::json;
use std::sync::Arc;

const DEFAULT_REGION: &str = "us-east-1";
const TARGET_FILTER: &str = "Logs_20140328.FilterLogEvents";
const TARGET_DESCRIBE: &str = "Logs_20140328.DescribeLogGroups";

pub struct AwsAdapter {
    transport: Arc<dyn HttpTransport>,
}

impl AwsAdapter {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    fn endpoint(&self, credentials: &Credentials) -> String {
        match &credentials.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => {
                let region = credentials.region.as_deref().unwrap_or(DEFAULT_REGION);
                format!("https://logs.{region}.amazonaws.com/")
            }
        }
    }

    fn request(
        &self,
        credentials: &Credentials,
        target: &str,
        body: serde_json::Value,
    ) -> TransportRequest {
        TransportRequest::post(self.endpoint(credentials), body)
            .header("x-amz-target", target)
            .header("content-type", "application/x-amz-json-1.1")
            .bearer(&credentials.token)
    }

    fn log_group<'a>(&self, connection: &'a Connection) -> Result<&'a str, SourceError> {
        connection
            .filter
            .log_group
            .as_deref()
            .filter(|g| !g.is_empty())
            .ok_or_else(|| SourceError::permanent("aws connection requires filter.log_group"))
    }
}

impl SourceAdapter for AwsAdapter {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Aws
    }

    fn poll<'a>(
        &'a self,
        connection: &'a Connection,
        credentials: &'a Credentials,
        cursor: &'a Cursor,
    ) -> BoxFuture<'a, Result<PollBatch, SourceError>> {
        Box::pin(async move {
            let log_group = self.log_group(connection)?;
            let mut body = json!({ "logGroupName": log_group });
            if let Some(pattern) = connection.filter.query.as_deref()
                && !pattern.is_empty()
            {
                body["filterPattern"] = json!(pattern);
            }
            if let Some(token) = cursor.token.as_deref() {
                body["nextToken"] = json!(token);
            }

            let request = self.request(credentials, TARGET_FILTER, body);
            let response = self.transport.execute(request).await?.into_json()?;

            let events = response
                .get("events")
                .and_then(|e| e.as_array())
                .cloned()
                .unwrap_or_default();
            let records = events
                .into_iter()
                .map(|event| {
                    let native_id = event
                        .get("eventId")
                        .and_then(|v| v.as_str())
                        .map(str::to_string);
                    let mut record = RawRecord::new(event);
                    record.native_id = native_id;
                    record
                })
                .collect();

            // nextToken이 없으면 현재 페이지가 끝: 이전 토큰을 유지해
            // 다음 폴에서 같은 위치부터 이어서 읽는다.
            let next_token = response
                .get("nextToken")
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
            let log_group = self.log_group(connection)?;
            let body = json!({ "logGroupNamePrefix": log_group, "limit": 1 });
            let request = self.request(credentials, TARGET_DESCRIBE, body);
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
        Connection::new("proj-1", ProviderKind::Aws, "blob", 30).with_filter(ProviderFilter {
            log_group: Some("/app/api".to_string()),
            query: Some("ERROR".to_string()),
            resource_filter: None,
        })
    }

    #[tokio::test]
    async fn poll_parses_events_and_next_token() {
        let transport = Arc::new(RecordingTransport::replying(TransportResponse::ok(
            r#"{
                "events": [
                    {"eventId": "e-1", "timestamp": 1700000000000, "message": "boom"},
                    {"eventId": "e-2", "timestamp": 1700000001000, "message": "ok"}
                ],
                "nextToken": "page-2"
            }"#,
        )));
        let adapter = AwsAdapter::new(transport.clone());

        let batch = adapter
            .poll(&connection(), &Credentials::new("tok"), &Cursor::default())
            .await
            .unwrap();

        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.records[0].native_id.as_deref(), Some("e-1"));
        assert_eq!(batch.next_token.as_deref(), Some("page-2"));

        let sent = transport.last_request().unwrap();
        assert!(sent.url.contains("amazonaws.com"));
        let body = sent.body.unwrap();
        assert_eq!(body["logGroupName"], "/app/api");
        assert_eq!(body["filterPattern"], "ERROR");
        assert!(body.get("nextToken").is_none());
    }

    #[tokio::test]
    async fn poll_keeps_previous_token_when_page_ends() {
        let transport = Arc::new(RecordingTransport::replying(TransportResponse::ok(
            r#"{"events": []}"#,
        )));
        let adapter = AwsAdapter::new(transport);

        let cursor = Cursor {
            token: Some("page-7".to_string()),
            sequence: 3,
        };
        let batch = adapter
            .poll(&connection(), &Credentials::new("tok"), &cursor)
            .await
            .unwrap();

        assert!(batch.records.is_empty());
        assert_eq!(batch.next_token.as_deref(), Some("page-7"));
    }

    #[tokio::test]
    async fn poll_requires_log_group() {
        let transport = Arc::new(RecordingTransport::replying(TransportResponse::ok("{}")));
        let adapter = AwsAdapter::new(transport);
        let bare = Connection::new("proj-1", ProviderKind::Aws, "blob", 30);

        let err = adapter
            .poll(&bare, &Credentials::new("tok"), &Cursor::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("log_group"));
    }

    #[tokio::test]
    async fn test_uses_describe_target() {
        let transport = Arc::new(RecordingTransport::replying(TransportResponse::ok(
            r#"{"logGroups": []}"#,
        )));
        let adapter = AwsAdapter::new(transport.clone());

        adapter
            .test(&connection(), &Credentials::new("tok"))
            .await
            .unwrap();

        let sent = transport.last_request().unwrap();
        let target = sent
            .headers
            .iter()
            .find(|(name, _)| name == "x-amz-target")
            .map(|(_, value)| value.as_str());
        assert_eq!(target, Some(TARGET_DESCRIBE));
    }

    #[tokio::test]
    async fn endpoint_override_is_honored() {
        let transport = Arc::new(RecordingTransport::replying(TransportResponse::ok(
            r#"{"events": []}"#,
        )));
        let adapter = AwsAdapter::new(transport.clone());
        let credentials = Credentials::new("tok").with_endpoint("http://localhost:4566/");

        adapter
            .poll(&connection(), &credentials, &Cursor::default())
            .await
            .unwrap();
        assert_eq!(transport.last_request().unwrap().url, "http://localhost:4566/");
    }
}
