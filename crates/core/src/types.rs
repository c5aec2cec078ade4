//! Logbridge 전역에서 사용하는 도메인 타입 정의.
//!
//! 클라우드 연결, 폴링 커서, 정규화된 로그 엔트리, 알림 규칙과
//! 발생한 알림을 표현합니다. 모든 타입은 serde 직렬화를 지원합니다.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// 로그 심각도 수준. 낮은 순서부터 정렬됩니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl LogLevel {
    /// 공급자별로 제각각인 수준 문자열을 관대하게 해석합니다.
    ///
    /// 인식할 수 없는 값은 `Info`로 처리합니다.
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" | "trace" | "verbose" => LogLevel::Debug,
            "info" | "information" | "notice" | "default" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" | "err" | "severe" => LogLevel::Error,
            "critical" | "crit" | "fatal" | "alert" | "emergency" => LogLevel::Critical,
            _ => LogLevel::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Critical => "critical",
        }
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 알림 심각도.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Medium
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 지원하는 클라우드 로그 공급자 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Aws,
    Azure,
    Gcp,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Aws => "aws",
            ProviderKind::Azure => "azure",
            ProviderKind::Gcp => "gcp",
        }
    }

    /// 설정 파일 등 외부 입력의 공급자 이름을 해석합니다.
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aws" | "cloudwatch" => Some(ProviderKind::Aws),
            "azure" | "azure-monitor" => Some(ProviderKind::Azure),
            "gcp" | "google" | "stackdriver" => Some(ProviderKind::Gcp),
            _ => None,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 연결 수명 주기 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// 등록되었으나 아직 폴링이 시작되지 않음.
    Pending,
    /// 폴링 태스크가 실행 중.
    Active,
    /// 운영자에 의해 일시 중지됨. 커서는 보존됩니다.
    Paused,
    /// 복구 불가능한 오류로 중단됨.
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Pending => "pending",
            ConnectionStatus::Active => "active",
            ConnectionStatus::Paused => "paused",
            ConnectionStatus::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 공급자별 로그 범위 필터.
///
/// 필드 의미는 공급자마다 다릅니다. AWS는 로그 그룹, Azure는 KQL 테이블,
/// GCP는 리소스 필터 표현식을 주로 사용합니다.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_filter: Option<String>,
}

/// 외부에서 등록된 클라우드 로그 연결.
///
/// `credential_blob`은 암호화된 자격 증명 원문입니다. 복호화는 어댑터
/// 호출 직전에 이루어지며 이 구조체는 평문을 보관하지 않습니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    pub project_id: String,
    pub provider: ProviderKind,
    pub credential_blob: String,
    #[serde(default)]
    pub filter: ProviderFilter,
    /// 폴링 주기(초). 설정된 최소값 아래로 내려가지 않습니다.
    pub poll_interval_secs: u64,
    #[serde(default = "default_status")]
    pub status: ConnectionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_success_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

fn default_status() -> ConnectionStatus {
    ConnectionStatus::Pending
}

impl Connection {
    pub fn new(
        project_id: impl Into<String>,
        provider: ProviderKind,
        credential_blob: impl Into<String>,
        poll_interval_secs: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.into(),
            provider,
            credential_blob: credential_blob.into(),
            filter: ProviderFilter::default(),
            poll_interval_secs,
            status: ConnectionStatus::Pending,
            last_success_at: None,
            last_error: None,
        }
    }

    pub fn with_filter(mut self, filter: ProviderFilter) -> Self {
        self.filter = filter;
        self
    }
}

/// 복호화된 자격 증명. 어댑터 호출 동안만 메모리에 존재합니다.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub token: String,
    pub region: Option<String>,
    /// 테스트와 온프레미스 게이트웨이를 위한 엔드포인트 재정의.
    pub endpoint: Option<String>,
}

impl Credentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            region: None,
            endpoint: None,
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}

// 토큰이 로그에 남지 않도록 Debug를 직접 구현합니다.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &"<redacted>")
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// 연결당 폴링 진행 위치.
///
/// `token`은 공급자가 돌려준 불투명 페이지 토큰 또는 타임스탬프이고,
/// `sequence`는 저장소가 관리하는 단조 증가 카운터입니다. 커서 전진은
/// `sequence`를 비교해 확인하는 compare-and-set으로만 허용됩니다.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default)]
    pub sequence: u64,
}

impl Cursor {
    /// 새 공급자 토큰으로 한 칸 전진한 커서를 만듭니다.
    pub fn advanced(&self, token: Option<String>) -> Self {
        Self {
            token,
            sequence: self.sequence + 1,
        }
    }
}

/// 공급자에서 수집한 원시 레코드.
///
/// 어댑터는 공급자 응답을 레코드 단위로 쪼개기만 하고, 필드 해석과
/// 정규화는 스트림 프로세서가 담당합니다. `payload`는 공급자 고유
/// 형태의 JSON 객체입니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// 공급자가 부여한 레코드 고유 ID. 있으면 중복 제거 키로 쓰입니다.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native_id: Option<String>,
    pub payload: serde_json::Value,
}

impl RawRecord {
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            native_id: None,
            payload,
        }
    }

    pub fn with_native_id(mut self, native_id: impl Into<String>) -> Self {
        self.native_id = Some(native_id.into());
        self
    }
}

/// 정규화된 로그 엔트리.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub connection_id: String,
    pub project_id: String,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    /// 공급자 원본 필드. 파싱 실패 시 [`LogEntry::METADATA_PARSE_FAILED`]
    /// 키가 true로 설정되고 원문이 `message`에 들어갑니다.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl LogEntry {
    /// 파싱 실패 표시 메타데이터 키.
    pub const METADATA_PARSE_FAILED: &'static str = "parse_failed";
    /// 공급자 고유 레코드 ID 메타데이터 키. 중복 제거에 사용됩니다.
    pub const METADATA_NATIVE_ID: &'static str = "native_id";

    pub fn new(
        connection_id: impl Into<String>,
        project_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        level: LogLevel,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            connection_id: connection_id.into(),
            project_id: project_id.into(),
            timestamp,
            level,
            message: message.into(),
            service: None,
            metadata: BTreeMap::new(),
        }
    }

    /// 구조를 해석하지 못한 원문 레코드를 감싸는 엔트리를 만듭니다.
    pub fn parse_failed(
        connection_id: impl Into<String>,
        project_id: impl Into<String>,
        raw: impl Into<String>,
    ) -> Self {
        let mut entry = Self::new(connection_id, project_id, Utc::now(), LogLevel::Info, raw);
        entry
            .metadata
            .insert(Self::METADATA_PARSE_FAILED.to_string(), true.into());
        entry
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn with_native_id(mut self, native_id: impl Into<String>) -> Self {
        self.metadata
            .insert(Self::METADATA_NATIVE_ID.to_string(), native_id.into().into());
        self
    }

    /// 공급자 고유 ID가 있으면 돌려줍니다.
    pub fn native_id(&self) -> Option<&str> {
        self.metadata
            .get(Self::METADATA_NATIVE_ID)
            .and_then(|v| v.as_str())
    }

    pub fn is_parse_failed(&self) -> bool {
        self.metadata
            .get(Self::METADATA_PARSE_FAILED)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// 알림 규칙 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// 시간 창 안에서 일치 로그가 임계 개수를 넘으면 발화.
    Threshold,
    /// 메시지가 패턴(정규식)과 일치하면 발화.
    Pattern,
    /// 수준 집합에 속한 로그가 도착하면 발화.
    Level,
    /// 연결 헬스 이벤트(중단, 오류 상태 전이)에 반응.
    ConnectionHealth,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::Threshold => "threshold",
            RuleKind::Pattern => "pattern",
            RuleKind::Level => "level",
            RuleKind::ConnectionHealth => "connection_health",
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 프로젝트별 알림 규칙.
///
/// 종류에 따라 필요한 필드가 다르며 [`AlertRule::validate`]가 검사합니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub project_id: String,
    pub kind: RuleKind,
    #[serde(default)]
    pub severity: Severity,
    /// threshold 규칙: 발화에 필요한 일치 개수.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<u32>,
    /// threshold 규칙: 집계 시간 창(초).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_secs: Option<u64>,
    /// pattern 규칙: 정규식 패턴.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default)]
    pub case_sensitive: bool,
    /// level / threshold 규칙이 대상으로 하는 수준 집합.
    /// 비어 있으면 `Error` 이상을 의미합니다.
    #[serde(default)]
    pub levels: Vec<LogLevel>,
    /// 발화 후 같은 규칙의 재발화를 막는 기간(초). 0이면 엔진 기본값 사용.
    #[serde(default)]
    pub cooldown_secs: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 알림 전달 채널 이름 목록.
    #[serde(default)]
    pub channels: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

impl AlertRule {
    pub fn new(project_id: impl Into<String>, kind: RuleKind) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.into(),
            kind,
            severity: Severity::default(),
            threshold: None,
            window_secs: None,
            pattern: None,
            case_sensitive: false,
            levels: Vec::new(),
            cooldown_secs: 0,
            enabled: true,
            channels: Vec::new(),
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_threshold(mut self, threshold: u32, window_secs: u64) -> Self {
        self.threshold = Some(threshold);
        self.window_secs = Some(window_secs);
        self
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn with_levels(mut self, levels: Vec<LogLevel>) -> Self {
        self.levels = levels;
        self
    }

    pub fn with_cooldown(mut self, cooldown_secs: u64) -> Self {
        self.cooldown_secs = cooldown_secs;
        self
    }

    pub fn with_channels(mut self, channels: Vec<String>) -> Self {
        self.channels = channels;
        self
    }

    /// 규칙 종류별 필수 필드가 채워져 있는지 검사합니다.
    pub fn validate(&self) -> Result<(), String> {
        if self.project_id.is_empty() {
            return Err("project_id must not be empty".to_string());
        }
        match self.kind {
            RuleKind::Threshold => {
                match self.threshold {
                    Some(0) | None => {
                        return Err("threshold rule requires threshold >= 1".to_string());
                    }
                    Some(_) => {}
                }
                match self.window_secs {
                    Some(0) | None => {
                        return Err("threshold rule requires window_secs >= 1".to_string());
                    }
                    Some(_) => {}
                }
            }
            RuleKind::Pattern => {
                let pattern = self.pattern.as_deref().unwrap_or("");
                if pattern.is_empty() {
                    return Err("pattern rule requires a non-empty pattern".to_string());
                }
            }
            RuleKind::Level => {
                if self.levels.is_empty() {
                    return Err("level rule requires at least one level".to_string());
                }
            }
            RuleKind::ConnectionHealth => {}
        }
        Ok(())
    }

    /// 규칙이 대상으로 하는 수준인지 판단합니다. 집합이 비어 있으면
    /// `Error` 이상만 대상입니다.
    pub fn matches_level(&self, level: LogLevel) -> bool {
        if self.levels.is_empty() {
            level >= LogLevel::Error
        } else {
            self.levels.contains(&level)
        }
    }
}

/// 알림 발화 근거.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerDetails {
    /// 이 배치에서 규칙과 일치한 엔트리 수.
    pub matched_count: u64,
    /// threshold 규칙: 시간 창 전체의 누적 일치 수.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_count: Option<u64>,
    /// 일치한 메시지 표본 (최대 개수는 엔진 설정을 따름).
    #[serde(default)]
    pub samples: Vec<String>,
}

/// 규칙 발화로 생성된 알림.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub rule_id: String,
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    pub severity: Severity,
    pub message: String,
    #[serde(default)]
    pub trigger: TriggerDetails,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
}

impl Alert {
    pub fn new(rule: &AlertRule, message: impl Into<String>, trigger: TriggerDetails) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            rule_id: rule.id.clone(),
            project_id: rule.project_id.clone(),
            connection_id: None,
            severity: rule.severity,
            message: message.into(),
            trigger,
            created_at: Utc::now(),
            read: false,
        }
    }

    pub fn with_connection(mut self, connection_id: impl Into<String>) -> Self {
        self.connection_id = Some(connection_id.into());
        self
    }
}

/// 외부 알림 채널로 전달할 요청.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRequest {
    pub alert: Alert,
    pub channels: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_ordering() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Warn < LogLevel::Error);
        assert!(LogLevel::Error < LogLevel::Critical);
    }

    #[test]
    fn log_level_from_str_loose() {
        assert_eq!(LogLevel::from_str_loose("WARNING"), LogLevel::Warn);
        assert_eq!(LogLevel::from_str_loose("fatal"), LogLevel::Critical);
        assert_eq!(LogLevel::from_str_loose("trace"), LogLevel::Debug);
        assert_eq!(LogLevel::from_str_loose("whatever"), LogLevel::Info);
    }

    #[test]
    fn provider_kind_from_str_loose() {
        assert_eq!(ProviderKind::from_str_loose("cloudwatch"), Some(ProviderKind::Aws));
        assert_eq!(ProviderKind::from_str_loose("GCP"), Some(ProviderKind::Gcp));
        assert_eq!(ProviderKind::from_str_loose("oracle"), None);
    }

    #[test]
    fn cursor_advanced_increments_sequence() {
        let cursor = Cursor::default();
        let next = cursor.advanced(Some("page-2".to_string()));
        assert_eq!(next.sequence, 1);
        assert_eq!(next.token.as_deref(), Some("page-2"));

        let again = next.advanced(None);
        assert_eq!(again.sequence, 2);
        assert!(again.token.is_none());
    }

    #[test]
    fn parse_failed_entry_carries_marker() {
        let entry = LogEntry::parse_failed("conn-1", "proj-1", "not json at all");
        assert!(entry.is_parse_failed());
        assert_eq!(entry.message, "not json at all");
        assert_eq!(entry.level, LogLevel::Info);
    }

    #[test]
    fn native_id_roundtrip() {
        let entry = LogEntry::new("c", "p", Utc::now(), LogLevel::Info, "m")
            .with_native_id("evt-123");
        assert_eq!(entry.native_id(), Some("evt-123"));
    }

    #[test]
    fn threshold_rule_requires_threshold_and_window() {
        let rule = AlertRule::new("proj", RuleKind::Threshold);
        assert!(rule.validate().is_err());

        let rule = AlertRule::new("proj", RuleKind::Threshold).with_threshold(5, 60);
        assert!(rule.validate().is_ok());

        let mut rule = AlertRule::new("proj", RuleKind::Threshold).with_threshold(0, 60);
        assert!(rule.validate().is_err());
        rule.threshold = Some(1);
        rule.window_secs = Some(0);
        assert!(rule.validate().is_err());
    }

    #[test]
    fn pattern_rule_requires_pattern() {
        let rule = AlertRule::new("proj", RuleKind::Pattern);
        assert!(rule.validate().is_err());

        let rule = AlertRule::new("proj", RuleKind::Pattern).with_pattern("timeout");
        assert!(rule.validate().is_ok());
    }

    #[test]
    fn level_rule_requires_levels() {
        let rule = AlertRule::new("proj", RuleKind::Level);
        assert!(rule.validate().is_err());

        let rule =
            AlertRule::new("proj", RuleKind::Level).with_levels(vec![LogLevel::Critical]);
        assert!(rule.validate().is_ok());
    }

    #[test]
    fn empty_level_set_means_error_and_above() {
        let rule = AlertRule::new("proj", RuleKind::Threshold).with_threshold(1, 60);
        assert!(!rule.matches_level(LogLevel::Warn));
        assert!(rule.matches_level(LogLevel::Error));
        assert!(rule.matches_level(LogLevel::Critical));
    }

    #[test]
    fn credentials_debug_redacts_token() {
        let creds = Credentials::new("super-secret").with_region("us-east-1");
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn alert_inherits_rule_fields() {
        let rule = AlertRule::new("proj-9", RuleKind::Pattern)
            .with_pattern("panic")
            .with_severity(Severity::High);
        let alert = Alert::new(&rule, "pattern matched", TriggerDetails::default())
            .with_connection("conn-3");
        assert_eq!(alert.rule_id, rule.id);
        assert_eq!(alert.project_id, "proj-9");
        assert_eq!(alert.severity, Severity::High);
        assert_eq!(alert.connection_id.as_deref(), Some("conn-3"));
    }
}
