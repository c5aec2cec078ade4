//! 모듈 사이를 흐르는 이벤트 타입.
//!
//! 소스 어댑터가 만든 로그 배치, 알림 엔진이 만든 알림, 스트림 매니저가
//! 만든 연결 헬스 이벤트가 여기 정의됩니다. 모든 이벤트는 발생 모듈과
//! 트레이스 ID를 담은 [`EventMetadata`]를 가집니다.

use crate::types::{Alert, LogEntry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 소스 어댑터 모듈 이름.
pub const MODULE_SOURCE: &str = "source";
/// 스트림 프로세서 모듈 이름.
pub const MODULE_PIPELINE: &str = "pipeline";
/// 브로드캐스트 허브 모듈 이름.
pub const MODULE_BROADCAST: &str = "broadcast";
/// 스트림 매니저 모듈 이름.
pub const MODULE_MANAGER: &str = "manager";

/// 이벤트 공통 메타데이터.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    pub timestamp: DateTime<Utc>,
    /// 이벤트를 만든 모듈 이름 (`MODULE_*` 상수 중 하나).
    pub source_module: String,
    /// 파이프라인 단계 사이를 관통하는 추적 ID.
    pub trace_id: String,
}

impl EventMetadata {
    /// 새 트레이스를 시작하는 메타데이터를 만듭니다.
    pub fn new(source_module: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            source_module: source_module.into(),
            trace_id: Uuid::new_v4().to_string(),
        }
    }

    /// 기존 트레이스를 이어받되 발생 모듈과 시각을 갱신합니다.
    pub fn propagate(&self, source_module: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            source_module: source_module.into(),
            trace_id: self.trace_id.clone(),
        }
    }
}

/// 모든 이벤트가 구현하는 공통 트레이트.
pub trait Event: Send + Sync {
    fn event_id(&self) -> &str;
    fn metadata(&self) -> &EventMetadata;
    fn event_type(&self) -> &'static str;
}

/// 한 번의 폴링으로 수집되어 정규화를 마친 로그 배치.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEvent {
    pub id: String,
    pub metadata: EventMetadata,
    pub connection_id: String,
    pub project_id: String,
    pub entries: Vec<LogEntry>,
}

impl BatchEvent {
    pub fn new(
        connection_id: impl Into<String>,
        project_id: impl Into<String>,
        entries: Vec<LogEntry>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            metadata: EventMetadata::new(MODULE_SOURCE),
            connection_id: connection_id.into(),
            project_id: project_id.into(),
            entries,
        }
    }
}

impl Event for BatchEvent {
    fn event_id(&self) -> &str {
        &self.id
    }

    fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    fn event_type(&self) -> &'static str {
        "log_batch"
    }
}

/// 알림 엔진이 발화시킨 알림 이벤트.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    pub id: String,
    pub metadata: EventMetadata,
    pub alert: Alert,
}

impl AlertEvent {
    pub fn new(alert: Alert) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            metadata: EventMetadata::new(MODULE_PIPELINE),
            alert,
        }
    }

    /// 배치 이벤트의 트레이스를 이어받아 만듭니다.
    pub fn from_batch(batch: &BatchEvent, alert: Alert) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            metadata: batch.metadata.propagate(MODULE_PIPELINE),
            alert,
        }
    }
}

impl Event for AlertEvent {
    fn event_id(&self) -> &str {
        &self.id
    }

    fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    fn event_type(&self) -> &'static str {
        "alert"
    }
}

/// 연결 헬스 이벤트 사유.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HealthReason {
    /// 폴링 주기의 배수 동안 성공한 폴이 없음.
    Stalled { idle_secs: u64 },
    /// 연결이 오류 상태로 전이함.
    Errored { error: String },
    /// 연결이 복구되어 다시 활성화됨.
    Recovered,
}

/// 스트림 매니저가 발행하는 연결 헬스 이벤트.
///
/// `connection_health` 규칙의 입력이 됩니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthEvent {
    pub id: String,
    pub metadata: EventMetadata,
    pub connection_id: String,
    pub project_id: String,
    pub reason: HealthReason,
}

impl HealthEvent {
    pub fn new(
        connection_id: impl Into<String>,
        project_id: impl Into<String>,
        reason: HealthReason,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            metadata: EventMetadata::new(MODULE_MANAGER),
            connection_id: connection_id.into(),
            project_id: project_id.into(),
            reason,
        }
    }
}

impl Event for HealthEvent {
    fn event_id(&self) -> &str {
        &self.id
    }

    fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    fn event_type(&self) -> &'static str {
        "connection_health"
    }
}
