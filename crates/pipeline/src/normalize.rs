//! 공급자별 원시 레코드를 공통 로그 스키마로 정규화합니다.
//!
//! 필수 필드를 읽지 못한 레코드는 버리지 않고 원문을 메시지로 담은
//! 파싱 실패 엔트리로 보존합니다. 수준 문자열 해석은
//! [`LogLevel::from_str_loose`]를 따릅니다.

use chrono::{DateTime, TimeZone, Utc};
use logbridge_core::types::{Connection, LogEntry, LogLevel, ProviderKind, RawRecord};
use serde_json::Value;

/// 원시 레코드 하나를 정규화합니다. 실패해도 항상 엔트리를 돌려줍니다.
pub fn normalize_record(connection: &Connection, record: RawRecord) -> LogEntry {
    let entry = match connection.provider {
        ProviderKind::Aws => normalize_aws(connection, &record.payload),
        ProviderKind::Azure => normalize_azure(connection, &record.payload),
        ProviderKind::Gcp => normalize_gcp(connection, &record.payload),
    };

    let mut entry = match entry {
        Some(entry) => entry,
        None => LogEntry::parse_failed(
            connection.id.clone(),
            connection.project_id.clone(),
            record.payload.to_string(),
        ),
    };
    if let Some(native_id) = record.native_id {
        entry = entry.with_native_id(native_id);
    }
    entry
}

/// CloudWatch 이벤트: `timestamp`(epoch ms) + `message`.
/// 메시지가 JSON 객체면 level / service 필드를 추가로 해석합니다.
fn normalize_aws(connection: &Connection, payload: &Value) -> Option<LogEntry> {
    let millis = payload.get("timestamp")?.as_i64()?;
    let timestamp = Utc.timestamp_millis_opt(millis).single()?;
    let raw_message = payload.get("message")?.as_str()?;

    let mut level = LogLevel::Info;
    let mut service = None;
    let mut message = raw_message.to_string();

    if let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(raw_message) {
        if let Some(value) = string_field(&fields, &["level", "severity", "log.level"]) {
            level = LogLevel::from_str_loose(&value);
        }
        if let Some(value) = string_field(&fields, &["message", "msg"]) {
            message = value;
        }
        service = string_field(&fields, &["service", "service.name", "app"]);
    }

    let mut entry = LogEntry::new(
        connection.id.clone(),
        connection.project_id.clone(),
        timestamp,
        level,
        message,
    );
    if let Some(service) = service {
        entry = entry.with_service(service);
    }
    Some(entry)
}

/// Log Analytics 행: `TimeGenerated` + `Message` + `SeverityLevel`/`Level`.
fn normalize_azure(connection: &Connection, payload: &Value) -> Option<LogEntry> {
    let timestamp = payload
        .get("TimeGenerated")
        .and_then(|v| v.as_str())
        .and_then(parse_rfc3339)?;
    let message = payload.get("Message").and_then(|v| v.as_str())?;

    let level = if let Some(numeric) = payload.get("SeverityLevel").and_then(|v| v.as_i64()) {
        match numeric {
            0 => LogLevel::Debug,
            1 => LogLevel::Info,
            2 => LogLevel::Warn,
            3 => LogLevel::Error,
            _ => LogLevel::Critical,
        }
    } else if let Some(text) = payload.get("Level").and_then(|v| v.as_str()) {
        LogLevel::from_str_loose(text)
    } else {
        LogLevel::Info
    };

    let mut entry = LogEntry::new(
        connection.id.clone(),
        connection.project_id.clone(),
        timestamp,
        level,
        message,
    );
    if let Some(role) = payload.get("AppRoleName").and_then(|v| v.as_str()) {
        entry = entry.with_service(role);
    }
    Some(entry)
}

/// Cloud Logging 엔트리: `timestamp` + `severity` + text/json 페이로드.
fn normalize_gcp(connection: &Connection, payload: &Value) -> Option<LogEntry> {
    let timestamp = payload
        .get("timestamp")
        .and_then(|v| v.as_str())
        .and_then(parse_rfc3339)?;
    let level = payload
        .get("severity")
        .and_then(|v| v.as_str())
        .map(LogLevel::from_str_loose)
        .unwrap_or(LogLevel::Info);

    let message = if let Some(text) = payload.get("textPayload").and_then(|v| v.as_str()) {
        text.to_string()
    } else if let Some(Value::Object(fields)) = payload.get("jsonPayload") {
        string_field(fields, &["message", "msg"])
            .unwrap_or_else(|| Value::Object(fields.clone()).to_string())
    } else {
        return None;
    };

    let service = payload
        .get("resource")
        .and_then(|r| r.get("labels"))
        .and_then(|l| l.get("service_name").or_else(|| l.get("container_name")))
        .and_then(|v| v.as_str())
        .map(str::to_string);

    let mut entry = LogEntry::new(
        connection.id.clone(),
        connection.project_id.clone(),
        timestamp,
        level,
        message,
    );
    if let Some(service) = service {
        entry = entry.with_service(service);
    }
    Some(entry)
}

fn string_field(fields: &serde_json::Map<String, Value>, names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|name| fields.get(*name))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

fn parse_rfc3339(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
