//! 워크스페이스 전체 오류 계층.
//!
//! 각 도메인 오류는 [`LogbridgeError`]로 `From` 변환되며, 상위 크레이트는
//! `?` 연산자만으로 오류를 전파할 수 있습니다. 소스 어댑터 오류는
//! 재시도 정책의 기준이 되는 일시적/영구적/인증 분류를 가집니다.

use std::time::Duration;
use thiserror::Error;

/// 최상위 오류 타입.
#[derive(Debug, Error)]
pub enum LogbridgeError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("source error: {0}")]
    Source(#[from] SourceError),

    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("broadcast error: {0}")]
    Broadcast(#[from] BroadcastError),

    #[error("manager error: {0}")]
    Manager(#[from] ManagerError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 로딩/검증 오류.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    #[error("failed to parse config: {0}")]
    ParseFailed(String),

    #[error("invalid config value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// 클라우드 공급자 호출 오류.
///
/// 분류가 곧 정책입니다. `Transient`는 지수 백오프로 재시도하고,
/// `Permanent`와 `Auth`는 재시도 없이 연결을 오류 상태로 전이시킵니다.
/// 오류 상태의 연결은 명시적 재활성화 전까지 다시 폴링하지 않습니다.
#[derive(Debug, Error)]
pub enum SourceError {
    /// 재시도 가능한 오류 (429, 5xx, 타임아웃, 네트워크 단절).
    #[error("transient provider error: {reason}")]
    Transient {
        reason: String,
        /// 공급자가 Retry-After 등으로 지정한 대기 시간.
        retry_after: Option<Duration>,
    },

    /// 재시도해도 결과가 같은 오류 (잘못된 필터, 4xx 등).
    #[error("permanent provider error: {reason}")]
    Permanent { reason: String },

    /// 자격 증명 거부 (401, 403).
    #[error("authentication failed: {reason}")]
    Auth { reason: String },
}

impl SourceError {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient {
            reason: reason.into(),
            retry_after: None,
        }
    }

    pub fn transient_after(reason: impl Into<String>, retry_after: Duration) -> Self {
        Self::Transient {
            reason: reason.into(),
            retry_after: Some(retry_after),
        }
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::Permanent {
            reason: reason.into(),
        }
    }

    pub fn auth(reason: impl Into<String>) -> Self {
        Self::Auth {
            reason: reason.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent { .. })
    }

    /// 공급자가 지정한 재시도 대기 시간.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Transient { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// 스트림 프로세서 / 알림 엔진 오류.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// 저장소 재시도 한도를 소진해 배치를 버리지 못한 상태.
    /// 커서는 전진하지 않으며 다음 폴에서 같은 배치를 다시 받습니다.
    #[error("failed to persist batch after {attempts} attempts: {reason}")]
    PersistenceFailure { attempts: u32, reason: String },

    #[error("invalid rule {rule_id}: {reason}")]
    InvalidRule { rule_id: String, reason: String },

    #[error("channel closed: {0}")]
    ChannelClosed(String),
}

/// 브로드캐스트 허브 오류.
#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("subscriber not authorized for project {project_id}")]
    Unauthorized { project_id: String },

    #[error("subscriber disconnected")]
    SubscriberGone,

    #[error("bus error: {0}")]
    Bus(String),
}

/// 스트림 매니저 오류.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// 프로세스/프로젝트 동시 연결 한도 초과.
    #[error("connection limit reached for {scope}: {limit}")]
    ResourceExhausted { scope: String, limit: usize },

    #[error("unknown connection: {connection_id}")]
    UnknownConnection { connection_id: String },

    #[error("connection already registered: {connection_id}")]
    DuplicateConnection { connection_id: String },

    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// 유예 기간 안에 폴링 태스크가 종료하지 않아 강제 중단됨.
    #[error("connection {connection_id} did not stop within grace period")]
    UngracefulStop { connection_id: String },
}

/// 저장소 오류.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("append failed: {0}")]
    AppendFailed(String),

    #[error("query failed: {0}")]
    QueryFailed(String),

    /// compare-and-set 커서 전진이 거부됨. 다른 쓰기가 먼저 일어났거나
    /// 저장된 커서가 예상 시퀀스와 다릅니다.
    #[error("stale cursor for {connection_id}: expected sequence {expected}, found {found}")]
    StaleCursor {
        connection_id: String,
        expected: u64,
        found: u64,
    },

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    /// 재시도해 볼 가치가 있는 오류인지 판단합니다.
    /// `StaleCursor`는 재시도 대상이 아닙니다.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::AppendFailed(_) | Self::Unavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_error_classification() {
        let e = SourceError::transient("rate limited");
        assert!(e.is_transient());
        assert!(!e.is_auth());

        let e = SourceError::auth("bad token");
        assert!(e.is_auth());
        assert!(!e.is_transient());

        let e = SourceError::permanent("bad filter");
        assert!(e.is_permanent());
        assert!(!e.is_transient());
        assert!(!e.is_auth());
    }

    #[test]
    fn transient_error_carries_retry_after() {
        let e = SourceError::transient_after("throttled", Duration::from_secs(7));
        assert_eq!(e.retry_after(), Some(Duration::from_secs(7)));
        assert_eq!(SourceError::permanent("x").retry_after(), None);
    }

    #[test]
    fn stale_cursor_is_not_retryable() {
        let e = StorageError::StaleCursor {
            connection_id: "c1".to_string(),
            expected: 4,
            found: 5,
        };
        assert!(!e.is_retryable());
        assert!(StorageError::Unavailable("down".to_string()).is_retryable());
    }

    #[test]
    fn errors_convert_to_top_level() {
        fn returns_top_level() -> Result<(), LogbridgeError> {
            Err(SourceError::auth("expired"))?;
            Ok(())
        }
        let err = returns_top_level().unwrap_err();
        assert!(matches!(err, LogbridgeError::Source(_)));
        assert!(err.to_string().contains("authentication failed"));
    }
}
