#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//!
//! ```text
//! logbridge-core
//! ├── types     도메인 타입 (Connection, Cursor, LogEntry, AlertRule, Alert)
//! ├── event     모듈 간 이벤트 (BatchEvent, AlertEvent, HealthEvent)
//! ├── error     오류 계층 (LogbridgeError + 하위 오류)
//! ├── config    설정 로딩/검증 (TOML + LOGBRIDGE_* 환경 변수)
//! ├── pipeline  수명 주기 트레이트 (Pipeline, HealthStatus)
//! ├── storage   저장소 트레이트 + 인메모리 구현
//! └── metrics   메트릭 이름 상수
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod metrics;
pub mod pipeline;
pub mod storage;
pub mod types;

pub use config::LogbridgeConfig;
pub use error::{
    BroadcastError, ConfigError, LogbridgeError, ManagerError, PipelineError, SourceError,
    StorageError,
};
pub use event::{AlertEvent, BatchEvent, Event, EventMetadata, HealthEvent, HealthReason};
pub use pipeline::{BoxFuture, HealthStatus, Pipeline};
pub use storage::{
    AlertStore, CheckpointStore, LogStore, MemoryAlertStore, MemoryCheckpointStore,
    MemoryLogStore, MemoryRuleStore, NotificationDispatcher, RuleStore,
};
pub use types::{
    Alert, AlertRule, Connection, ConnectionStatus, Credentials, Cursor, DeliveryRequest,
    LogEntry, LogLevel, ProviderFilter, ProviderKind, RawRecord, RuleKind, Severity,
    TriggerDetails,
};

/// 크레이트 버전 문자열.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
