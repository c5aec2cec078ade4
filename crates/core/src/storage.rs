//! 저장소 트레이트와 인메모리 구현.
//!
//! 실제 배포에서는 외부 데이터베이스 구현이 이 트레이트들을 채우고,
//! 테스트와 단독 실행 모드에서는 인메모리 구현을 사용합니다.
//! 모든 트레이트는 `Arc<dyn …>`으로 공유할 수 있도록 [`BoxFuture`]를
//! 돌려주는 dyn 호환 시그니처를 가집니다.

use crate::error::StorageError;
use crate::pipeline::BoxFuture;
use crate::types::{Alert, AlertRule, Cursor, DeliveryRequest, LogEntry, LogLevel};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

/// 정규화된 로그 엔트리 저장소.
pub trait LogStore: Send + Sync {
    /// 배치를 원자적으로 추가합니다. 부분 성공은 없습니다.
    fn append(&self, entries: Vec<LogEntry>) -> BoxFuture<'_, Result<(), StorageError>>;

    /// threshold 규칙 평가용: 주어진 시각 이후 수준 집합에 속한
    /// 프로젝트 로그 개수를 셉니다. 빈 수준 집합은 `Error` 이상을 뜻합니다.
    fn count_since<'a>(
        &'a self,
        project_id: &'a str,
        levels: &'a [LogLevel],
        since: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<u64, StorageError>>;

    /// 구독 직후 백필용: 프로젝트의 최근 엔트리를 시간 역순으로 돌려줍니다.
    fn recent<'a>(
        &'a self,
        project_id: &'a str,
        limit: usize,
    ) -> BoxFuture<'a, Result<Vec<LogEntry>, StorageError>>;
}

/// 연결별 폴링 커서 저장소.
pub trait CheckpointStore: Send + Sync {
    fn load<'a>(
        &'a self,
        connection_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Cursor>, StorageError>>;

    /// compare-and-set 전진. 저장된 커서의 시퀀스가 `expected_sequence`와
    /// 다르면 [`StorageError::StaleCursor`]로 거부합니다.
    /// 저장된 커서가 없으면 `expected_sequence == 0`일 때만 성공합니다.
    fn advance<'a>(
        &'a self,
        connection_id: &'a str,
        expected_sequence: u64,
        next: Cursor,
    ) -> BoxFuture<'a, Result<(), StorageError>>;
}

/// 프로젝트별 알림 규칙 저장소.
pub trait RuleStore: Send + Sync {
    fn rules_for_project<'a>(
        &'a self,
        project_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<AlertRule>, StorageError>>;
}

/// 발생한 알림의 영속 저장소.
pub trait AlertStore: Send + Sync {
    fn record(&self, alert: Alert) -> BoxFuture<'_, Result<(), StorageError>>;
}

/// 외부 알림 채널(이메일, 웹훅 등)로의 전달 요청 수신자.
///
/// 전달 자체는 이 시스템의 범위 밖입니다. 구현은 요청을 큐에 넣거나
/// 외부 워커에 넘기는 정도의 일만 합니다. 전달 실패가 파이프라인을
/// 멈추지 않도록 반환값이 없습니다.
pub trait NotificationDispatcher: Send + Sync {
    fn dispatch(&self, request: DeliveryRequest) -> BoxFuture<'_, ()>;
}

/// `Vec` 기반 인메모리 로그 저장소.
#[derive(Default)]
pub struct MemoryLogStore {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 테스트 검증용 전체 스냅샷.
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl LogStore for MemoryLogStore {
    fn append(&self, entries: Vec<LogEntry>) -> BoxFuture<'_, Result<(), StorageError>> {
        Box::pin(async move {
            let mut guard = self
                .entries
                .lock()
                .map_err(|_| StorageError::Unavailable("log store poisoned".to_string()))?;
            guard.extend(entries);
            Ok(())
        })
    }

    fn count_since<'a>(
        &'a self,
        project_id: &'a str,
        levels: &'a [LogLevel],
        since: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<u64, StorageError>> {
        Box::pin(async move {
            let guard = self
                .entries
                .lock()
                .map_err(|_| StorageError::Unavailable("log store poisoned".to_string()))?;
            let count = guard
                .iter()
                .filter(|e| e.project_id == project_id && e.timestamp >= since)
                .filter(|e| {
                    if levels.is_empty() {
                        e.level >= LogLevel::Error
                    } else {
                        levels.contains(&e.level)
                    }
                })
                .count() as u64;
            Ok(count)
        })
    }

    fn recent<'a>(
        &'a self,
        project_id: &'a str,
        limit: usize,
    ) -> BoxFuture<'a, Result<Vec<LogEntry>, StorageError>> {
        Box::pin(async move {
            let guard = self
                .entries
                .lock()
                .map_err(|_| StorageError::Unavailable("log store poisoned".to_string()))?;
            let mut matched: Vec<LogEntry> = guard
                .iter()
                .filter(|e| e.project_id == project_id)
                .cloned()
                .collect();
            matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
            matched.truncate(limit);
            Ok(matched)
        })
    }
}

/// `HashMap` 기반 인메모리 체크포인트 저장소.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    cursors: Mutex<HashMap<String, Cursor>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 테스트 준비용: CAS를 거치지 않고 커서를 심습니다.
    pub fn seed(&self, connection_id: impl Into<String>, cursor: Cursor) {
        if let Ok(mut guard) = self.cursors.lock() {
            guard.insert(connection_id.into(), cursor);
        }
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn load<'a>(
        &'a self,
        connection_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Cursor>, StorageError>> {
        Box::pin(async move {
            let guard = self
                .cursors
                .lock()
                .map_err(|_| StorageError::Unavailable("checkpoint store poisoned".to_string()))?;
            Ok(guard.get(connection_id).cloned())
        })
    }

    fn advance<'a>(
        &'a self,
        connection_id: &'a str,
        expected_sequence: u64,
        next: Cursor,
    ) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            let mut guard = self
                .cursors
                .lock()
                .map_err(|_| StorageError::Unavailable("checkpoint store poisoned".to_string()))?;
            let found = guard.get(connection_id).map(|c| c.sequence).unwrap_or(0);
            if found != expected_sequence {
                return Err(StorageError::StaleCursor {
                    connection_id: connection_id.to_string(),
                    expected: expected_sequence,
                    found,
                });
            }
            guard.insert(connection_id.to_string(), next);
            Ok(())
        })
    }
}

/// `HashMap` 기반 인메모리 규칙 저장소.
#[derive(Default)]
pub struct MemoryRuleStore {
    rules: Mutex<HashMap<String, Vec<AlertRule>>>,
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, rule: AlertRule) {
        if let Ok(mut guard) = self.rules.lock() {
            let project_rules = guard.entry(rule.project_id.clone()).or_default();
            if let Some(existing) = project_rules.iter_mut().find(|r| r.id == rule.id) {
                *existing = rule;
            } else {
                project_rules.push(rule);
            }
        }
    }

    pub fn remove(&self, project_id: &str, rule_id: &str) {
        if let Ok(mut guard) = self.rules.lock()
            && let Some(project_rules) = guard.get_mut(project_id)
        {
            project_rules.retain(|r| r.id != rule_id);
        }
    }
}

impl RuleStore for MemoryRuleStore {
    fn rules_for_project<'a>(
        &'a self,
        project_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<AlertRule>, StorageError>> {
        Box::pin(async move {
            let guard = self
                .rules
                .lock()
                .map_err(|_| StorageError::Unavailable("rule store poisoned".to_string()))?;
            Ok(guard.get(project_id).cloned().unwrap_or_default())
        })
    }
}

/// `Vec` 기반 인메모리 알림 저장소.
#[derive(Default)]
pub struct MemoryAlertStore {
    alerts: Mutex<Vec<Alert>>,
}

impl MemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<Alert> {
        self.alerts.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

impl AlertStore for MemoryAlertStore {
    fn record(&self, alert: Alert) -> BoxFuture<'_, Result<(), StorageError>> {
        Box::pin(async move {
            let mut guard = self
                .alerts
                .lock()
                .map_err(|_| StorageError::Unavailable("alert store poisoned".to_string()))?;
            guard.push(alert);
            Ok(())
        })
    }
}

/// 전달 요청을 tracing 로그로만 남기는 기본 디스패처.
#[derive(Default)]
pub struct LoggingDispatcher;

impl NotificationDispatcher for LoggingDispatcher {
    fn dispatch(&self, request: DeliveryRequest) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            tracing::info!(
                alert_id = %request.alert.id,
                project_id = %request.alert.project_id,
                severity = %request.alert.severity,
                channels = ?request.channels,
                "alert delivery requested"
            );
        })
    }
}
