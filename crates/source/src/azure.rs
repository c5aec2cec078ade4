//! Azure Monitor(Log Analytics) 계열 어댑터.
//!
//! 워크스페이스 쿼리 API에 KQL을 보내고 컬럼/행 테이블 응답을 레코드로
//! 풉니다. 페이지 토큰이 없는 API라 커서 토큰에 마지막으로 본
//! `TimeGenerated`를 보관하고 쿼리에 하한 조건으로 붙입니다.

use crate::adapter::{PollBatch, SourceAdapter};
use crate::transport::{HttpTransport, TransportRequest};
use logbridge_core::error::SourceError;
use logbridge_core::pipeline::BoxFuture;
use logbridge_core::types::{Connection, Credentials, Cursor, ProviderKind, RawRecord};
use serde_json::{Map, Value, json};
use std::sync::Arc;

const DEFAULT_ENDPOINT: &str = "https://api.loganalytics.io";
const DEFAULT_TABLE: &str = "AppTraces";
const TIME_COLUMN: &str = "TimeGenerated";

pub struct AzureAdapter {
    transport: Arc<dyn HttpTransport>,
}

impl AzureAdapter {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    fn workspace<'a>(&self, connection: &'a Connection) -> Result<&'a str, SourceError> {
        connection
            .filter
            .log_group
            .as_deref()
            .filter(|w| !w.is_empty())
            .ok_or_else(|| {
                SourceError::permanent("azure connection requires filter.log_group (workspace id)")
            })
    }

    fn query_url(&self, credentials: &Credentials, workspace: &str) -> String {
        let base = credentials
            .endpoint
            .as_deref()
            .unwrap_or(DEFAULT_ENDPOINT)
            .trim_end_matches('/');
        format!("{base}/v1/workspaces/{workspace}/query")
    }

    /// 커서 하한과 정렬을 붙인 KQL을 만듭니다.
    fn build_query(&self, connection: &Connection, cursor: &Cursor) -> String {
        let base = connection
            .filter
            .query
            .as_deref()
            .filter(|q| !q.is_empty())
            .unwrap_or(DEFAULT_TABLE);
        let mut query = base.to_string();
        if let Some(since) = cursor.token.as_deref() {
            query.push_str(&format!(" | where {TIME_COLUMN} > datetime({since})"));
        }
        query.push_str(&format!(" | order by {TIME_COLUMN} asc"));
        query
    }
}

/// 테이블 응답(컬럼 배열 + 행 배열)을 행마다 객체로 바꿉니다.
fn rows_to_records(response: &Value) -> Vec<RawRecord> {
    let Some(table) = response
        .get("tables")
        .and_then(|t| t.as_array())
        .and_then(|t| t.first())
    else {
        return Vec::new();
    };
    let columns: Vec<&str> = table
        .get("columns")
        .and_then(|c| c.as_array())
        .map(|cols| {
            cols.iter()
                .filter_map(|c| c.get("name").and_then(|n| n.as_str()))
                .collect()
        })
        .unwrap_or_default();
    let Some(rows) = table.get("rows").and_then(|r| r.as_array()) else {
        return Vec::new();
    };

    rows.iter()
        .filter_map(|row| row.as_array())
        .map(|row| {
            let mut object = Map::new();
            for (column, value) in columns.iter().zip(row.iter()) {
                object.insert((*column).to_string(), value.clone());
            }
            let native_id = object
                .get("_ItemId")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            let mut record = RawRecord::new(Value::Object(object));
            record.native_id = native_id;
            record
        })
        .collect()
}

/// 배치의 마지막 `TimeGenerated`를 다음 커서 토큰으로 고릅니다.
fn last_timestamp(records: &[RawRecord]) -> Option<String> {
    records
        .iter()
        .filter_map(|r| r.payload.get(TIME_COLUMN).and_then(|v| v.as_str()))
        .max()
        .map(str::to_string)
}

impl SourceAdapter for AzureAdapter {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Azure
    }

    fn poll<'a>(
        &'a self,
        connection: &'a Connection,
        credentials: &'a Credentials,
        cursor: &'a Cursor,
    ) -> BoxFuture<'a, Result<PollBatch, SourceError>> {
        Box::pin(async move {
            let workspace = self.workspace(connection)?;
            let query = self.build_query(connection, cursor);
            let request = TransportRequest::post(
                self.query_url(credentials, workspace),
                json!({ "query": query }),
            )
            .bearer(&credentials.token);

            let response = self.transport.execute(request).await?.into_json()?;
            let records = rows_to_records(&response);
            let next_token = last_timestamp(&records).or_else(|| cursor.token.clone());

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
            let workspace = self.workspace(connection)?;
            let query = format!("{} | take 1", self.build_query(connection, &Cursor::default()));
            let request = TransportRequest::post(
                self.query_url(credentials, workspace),
                json!({ "query": query }),
            )
            .bearer(&credentials.token);
            self.transport.execute(request).await?.into_json()?;
            Ok(())
        })
    }
}
