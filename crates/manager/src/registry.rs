//! 연결 레지스트리.
//!
//! 등록된 연결과 그 폴링 태스크의 현재 상태를 한곳에서 관리합니다.
//! 상태 전이는 허용 표를 통과해야 하고, 활성화는 프로세스/프로젝트
//! 동시 실행 한도를 넘을 수 없습니다. 잠금은 짧은 동기 구간에서만
//! 잡으며 await를 품지 않습니다.

use chrono::Utc;
use logbridge_core::error::ManagerError;
use logbridge_core::types::{Connection, ConnectionStatus, ProviderKind};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// 연결 하나의 런타임 상태.
pub struct ConnectionEntry {
    pub connection: Connection,
    pub consecutive_failures: u32,
    /// 마지막 폴링 성공 시각 (단조 시계). 중단 판정에 사용됩니다.
    pub last_success: Option<Instant>,
    /// 활성화 시각. 성공이 아직 없을 때의 중단 판정 기준점입니다.
    pub activated_at: Option<Instant>,
    pub(crate) cancel: Option<CancellationToken>,
    pub(crate) task: Option<JoinHandle<()>>,
}

/// `GET /api/connections` 응답용 요약.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSummary {
    pub id: String,
    pub project_id: String,
    pub provider: ProviderKind,
    pub status: ConnectionStatus,
    pub poll_interval_secs: u64,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success_at: Option<chrono::DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

pub struct ConnectionRegistry {
    max_per_process: usize,
    max_per_project: usize,
    entries: HashMap<String, ConnectionEntry>,
}

pub type SharedRegistry = Arc<Mutex<ConnectionRegistry>>;

fn transition_allowed(from: ConnectionStatus, to: ConnectionStatus) -> bool {
    use ConnectionStatus::*;
    // 회복 불가능한 실패는 어느 상태에서든 Error로 떨어질 수 있다
    if to == Error {
        return true;
    }
    matches!(
        (from, to),
        (Pending, Active)
            | (Active, Paused)
            | (Active, Pending)
            | (Paused, Active)
            | (Paused, Pending)
            | (Error, Active)
            | (Error, Paused)
            | (Error, Pending)
    )
}

impl ConnectionRegistry {
    pub fn new(max_per_process: usize, max_per_project: usize) -> Self {
        Self {
            max_per_process,
            max_per_project,
            entries: HashMap::new(),
        }
    }

    pub fn shared(max_per_process: usize, max_per_project: usize) -> SharedRegistry {
        Arc::new(Mutex::new(Self::new(max_per_process, max_per_project)))
    }

    pub fn insert(&mut self, connection: Connection) -> Result<(), ManagerError> {
        if self.entries.contains_key(&connection.id) {
            return Err(ManagerError::DuplicateConnection {
                connection_id: connection.id.clone(),
            });
        }
        self.entries.insert(
            connection.id.clone(),
            ConnectionEntry {
                connection,
                consecutive_failures: 0,
                last_success: None,
                activated_at: None,
                cancel: None,
                task: None,
            },
        );
        Ok(())
    }

    pub fn remove(&mut self, connection_id: &str) -> Option<ConnectionEntry> {
        self.entries.remove(connection_id)
    }

    pub fn contains(&self, connection_id: &str) -> bool {
        self.entries.contains_key(connection_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.connection.status == ConnectionStatus::Active)
            .count()
    }

    pub fn active_count_for_project(&self, project_id: &str) -> usize {
        self.entries
            .values()
            .filter(|e| {
                e.connection.status == ConnectionStatus::Active
                    && e.connection.project_id == project_id
            })
            .count()
    }

    /// 활성화 가능 여부를 확인하고 Active로 전이합니다.
    /// 한도 검사와 전이를 한 잠금 안에서 처리해 경쟁을 막습니다.
    pub fn activate(&mut self, connection_id: &str) -> Result<Connection, ManagerError> {
        // 한도 계산은 가변 차용 전에 끝낸다
        let process_active = self.active_count();
        let entry = self
            .entries
            .get(connection_id)
            .ok_or_else(|| ManagerError::UnknownConnection {
                connection_id: connection_id.to_string(),
            })?;
        let from = entry.connection.status;
        if !transition_allowed(from, ConnectionStatus::Active) {
            return Err(ManagerError::InvalidTransition {
                from: from.to_string(),
                to: ConnectionStatus::Active.to_string(),
            });
        }
        if process_active >= self.max_per_process {
            return Err(ManagerError::ResourceExhausted {
                scope: "process".to_string(),
                limit: self.max_per_process,
            });
        }
        let project_id = entry.connection.project_id.clone();
        if self.active_count_for_project(&project_id) >= self.max_per_project {
            return Err(ManagerError::ResourceExhausted {
                scope: format!("project {project_id}"),
                limit: self.max_per_project,
            });
        }

        let entry = self
            .entries
            .get_mut(connection_id)
            .expect("entry checked above");
        entry.connection.status = ConnectionStatus::Active;
        entry.consecutive_failures = 0;
        entry.activated_at = Some(Instant::now());
        Ok(entry.connection.clone())
    }

    /// Active 이외의 전이 (일시 중지, 오류, 복구 준비).
    pub fn transition(
        &mut self,
        connection_id: &str,
        to: ConnectionStatus,
    ) -> Result<(), ManagerError> {
        let entry = self
            .entries
            .get_mut(connection_id)
            .ok_or_else(|| ManagerError::UnknownConnection {
                connection_id: connection_id.to_string(),
            })?;
        let from = entry.connection.status;
        if from == to {
            return Ok(());
        }
        if !transition_allowed(from, to) {
            return Err(ManagerError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        entry.connection.status = to;
        Ok(())
    }

    /// 폴링 성공 기록. 직전까지의 연속 실패 횟수를 돌려줍니다.
    pub fn mark_success(&mut self, connection_id: &str) -> u32 {
        let Some(entry) = self.entries.get_mut(connection_id) else {
            return 0;
        };
        let prior = entry.consecutive_failures;
        entry.consecutive_failures = 0;
        entry.last_success = Some(Instant::now());
        entry.connection.last_success_at = Some(Utc::now());
        entry.connection.last_error = None;
        prior
    }

    /// 폴링 실패 기록. 누적 연속 실패 횟수를 돌려줍니다.
    pub fn mark_failure(&mut self, connection_id: &str, error: &str) -> u32 {
        let Some(entry) = self.entries.get_mut(connection_id) else {
            return 0;
        };
        entry.consecutive_failures += 1;
        entry.connection.last_error = Some(error.to_string());
        entry.consecutive_failures
    }

    pub fn snapshot(&self, connection_id: &str) -> Option<Connection> {
        self.entries
            .get(connection_id)
            .map(|e| e.connection.clone())
    }

    pub fn summaries(&self) -> Vec<ConnectionSummary> {
        let mut summaries: Vec<ConnectionSummary> = self
            .entries
            .values()
            .map(|e| ConnectionSummary {
                id: e.connection.id.clone(),
                project_id: e.connection.project_id.clone(),
                provider: e.connection.provider,
                status: e.connection.status,
                poll_interval_secs: e.connection.poll_interval_secs,
                consecutive_failures: e.consecutive_failures,
                last_success_at: e.connection.last_success_at,
                last_error: e.connection.last_error.clone(),
            })
            .collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    pub(crate) fn attach_task(
        &mut self,
        connection_id: &str,
        cancel: CancellationToken,
        task: JoinHandle<()>,
    ) {
        if let Some(entry) = self.entries.get_mut(connection_id) {
            entry.cancel = Some(cancel);
            entry.task = Some(task);
        }
    }

    pub(crate) fn take_task(
        &mut self,
        connection_id: &str,
    ) -> Option<(CancellationToken, JoinHandle<()>)> {
        let entry = self.entries.get_mut(connection_id)?;
        match (entry.cancel.take(), entry.task.take()) {
            (Some(cancel), Some(task)) => Some((cancel, task)),
            _ => None,
        }
    }

    /// 중단된 활성 연결 목록. `(연결, 마지막 성공 이후 경과 초)`.
    pub fn stalled(&self, stall_factor: u32, floor_secs: u64) -> Vec<(Connection, u64)> {
        let now = Instant::now();
        self.entries
            .values()
            .filter(|e| e.connection.status == ConnectionStatus::Active)
            .filter_map(|e| {
                let reference = e.last_success.or(e.activated_at)?;
                let idle = now.duration_since(reference).as_secs();
                let interval = e.connection.poll_interval_secs.max(floor_secs);
                if idle > interval * u64::from(stall_factor) {
                    Some((e.connection.clone(), idle))
                } else {
                    None
                }
            })
            .collect()
    }
}
