//! WebSocket 와이어 프레임.
//!
//! 모든 프레임은 `type` 태그를 가진 JSON 객체로 직렬화됩니다.

use chrono::{DateTime, Utc};
use logbridge_core::types::{Alert, ConnectionStatus, LogEntry, LogLevel};
use serde::{Deserialize, Serialize};

use crate::stats::ProjectStats;

/// 서버 → 클라이언트 프레임.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// 구독 성립 확인.
    Subscribed {
        subscriber_id: String,
        project_id: String,
    },
    /// 신규 로그 엔트리 배치.
    Logs { entries: Vec<LogEntry> },
    /// 발화한 알림.
    Alert { alert: Alert },
    /// 연결 상태 변화.
    ConnectionStatus {
        connection_id: String,
        status: ConnectionStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// 요청에 따른 과거 로그 백필. 시간 역순으로 정렬됩니다.
    Backfill { entries: Vec<LogEntry> },
    /// 역압으로 프레임이 버려졌음을 알리는 유실 통지.
    Gap { dropped: u64 },
    /// 프로젝트 스트림 통계.
    Stats { stats: ProjectStats },
    /// 유휴 연결 유지용 하트비트.
    Heartbeat { timestamp: DateTime<Utc> },
    /// [`ClientFrame::Ping`] 응답.
    Pong { timestamp: DateTime<Utc> },
    /// 수준 필터 변경 확인. 빈 목록은 필터 없음을 뜻합니다.
    FiltersUpdated { levels: Vec<LogLevel> },
    /// 프로토콜/권한 오류.
    Error { code: String, message: String },
}

impl ServerFrame {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn heartbeat() -> Self {
        Self::Heartbeat {
            timestamp: Utc::now(),
        }
    }

    pub fn pong() -> Self {
        Self::Pong {
            timestamp: Utc::now(),
        }
    }
}

/// 클라이언트 → 서버 프레임.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// 프로젝트 스트림 구독. 토큰 검증을 통과해야 성립합니다.
    Subscribe { project_id: String, token: String },
    /// 최근 로그 백필 요청.
    RequestLogs {
        #[serde(default)]
        limit: Option<usize>,
    },
    /// 구독 세션의 수준 필터 교체. 빈 목록은 필터 해제입니다.
    SetFilters { levels: Vec<LogLevel> },
    /// 프로젝트 스트림 통계 요청.
    RequestStats,
    /// 하트비트 응답 겸 생존 신호.
    Ping,
}
