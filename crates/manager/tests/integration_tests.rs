//! 매니저 수명 주기 통합 테스트.
//!
//! 대본(script)대로 응답하는 어댑터와 인메모리 저장소로 등록 → 활성화 →
//! 폴링 → 실패 전이 → 정지 흐름 전체를 검증합니다. 시간은 tokio의
//! 일시 정지 시계를 써서 폴링 주기와 백오프를 실시간 대기 없이 돌립니다.

use logbridge_broadcast::{BroadcastHub, HubHandle, InMemoryBus, ServerFrame};
use logbridge_core::config::{AlertConfig, BroadcastConfig, ManagerConfig, ProcessorConfig};
use logbridge_core::error::{ManagerError, SourceError};
use logbridge_core::pipeline::BoxFuture;
use logbridge_core::storage::{
    CheckpointStore, LoggingDispatcher, MemoryAlertStore, MemoryCheckpointStore, MemoryLogStore,
    MemoryRuleStore,
};
use logbridge_core::types::{Connection, ConnectionStatus, Credentials, Cursor, ProviderKind,
    RawRecord};
use logbridge_manager::{AdapterProvider, ManagerDeps, PlaintextResolver, StreamManager};
use logbridge_pipeline::alert::AlertEngine;
use logbridge_source::adapter::{PollBatch, SourceAdapter};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 폴 한 번에 대한 대본 항목.
enum ScriptStep {
    Batch(Vec<RawRecord>, Option<String>),
    Fail(SourceError),
    Hang,
}

/// 대본을 순서대로 소진하는 어댑터. 대본이 끝나면 빈 배치를 마지막
/// 토큰과 함께 돌려줍니다 (새 레코드 없는 공급자 흉내).
struct ScriptedAdapter {
    steps: Mutex<VecDeque<ScriptStep>>,
    last_token: Mutex<Option<String>>,
    polls: AtomicU32,
    tests: AtomicU32,
}

impl ScriptedAdapter {
    fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            last_token: Mutex::new(None),
            polls: AtomicU32::new(0),
            tests: AtomicU32::new(0),
        }
    }

    fn poll_count(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }

    fn test_count(&self) -> u32 {
        self.tests.load(Ordering::SeqCst)
    }
}

impl SourceAdapter for ScriptedAdapter {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Aws
    }

    fn poll<'a>(
        &'a self,
        _connection: &'a Connection,
        _credentials: &'a Credentials,
        _cursor: &'a Cursor,
    ) -> BoxFuture<'a, Result<PollBatch, SourceError>> {
        Box::pin(async move {
            self.polls.fetch_add(1, Ordering::SeqCst);
            let step = self.steps.lock().unwrap().pop_front();
            match step {
                Some(ScriptStep::Batch(records, next_token)) => {
                    *self.last_token.lock().unwrap() = next_token.clone();
                    Ok(PollBatch {
                        records,
                        next_token,
                    })
                }
                Some(ScriptStep::Fail(err)) => Err(err),
                Some(ScriptStep::Hang) => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
                None => Ok(PollBatch {
                    records: Vec::new(),
                    next_token: self.last_token.lock().unwrap().clone(),
                }),
            }
        })
    }

    fn test<'a>(
        &'a self,
        _connection: &'a Connection,
        _credentials: &'a Credentials,
    ) -> BoxFuture<'a, Result<(), SourceError>> {
        Box::pin(async move {
            self.tests.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

struct FixedProvider(Arc<ScriptedAdapter>);

impl AdapterProvider for FixedProvider {
    fn adapter(&self, _kind: ProviderKind) -> Arc<dyn SourceAdapter> {
        self.0.clone()
    }
}

struct Harness {
    manager: StreamManager,
    adapter: Arc<ScriptedAdapter>,
    log_store: Arc<MemoryLogStore>,
    checkpoints: Arc<MemoryCheckpointStore>,
    hub: HubHandle,
}

fn config() -> ManagerConfig {
    ManagerConfig {
        error_threshold: 3,
        stop_grace_secs: 2,
        ..ManagerConfig::default()
    }
}

fn harness(config: ManagerConfig, steps: Vec<ScriptStep>) -> Harness {
    let adapter = Arc::new(ScriptedAdapter::new(steps));
    let log_store = Arc::new(MemoryLogStore::new());
    let checkpoints = Arc::new(MemoryCheckpointStore::new());
    let hub = BroadcastHub::new(BroadcastConfig::default(), Arc::new(InMemoryBus::new(64)))
        .handle();
    let alert_engine = Arc::new(AlertEngine::new(
        Arc::new(MemoryRuleStore::new()),
        Arc::new(MemoryAlertStore::new()),
        log_store.clone(),
        Arc::new(LoggingDispatcher),
        AlertConfig::default(),
    ));
    let manager = StreamManager::new(
        config,
        ProcessorConfig::default(),
        ManagerDeps {
            adapters: Arc::new(FixedProvider(adapter.clone())),
            resolver: Arc::new(PlaintextResolver),
            checkpoints: checkpoints.clone(),
            log_store: log_store.clone(),
            alert_engine,
            hub: hub.clone(),
        },
    );
    Harness {
        manager,
        adapter,
        log_store,
        checkpoints,
        hub,
    }
}

fn record(id: &str, message: &str) -> RawRecord {
    RawRecord::new(json!({
        "timestamp": 1_700_000_000_000_i64,
        "message": message,
    }))
    .with_native_id(id)
}

fn aws_connection() -> Connection {
    Connection::new("proj-1", ProviderKind::Aws, "plain-token", 30)
}

impl Harness {
    fn status_of(&self, connection_id: &str) -> Option<ConnectionStatus> {
        self.manager
            .list()
            .into_iter()
            .find(|s| s.id == connection_id)
            .map(|s| s.status)
    }
}

/// 일시 정지 시계에서는 sleep이 즉시 흐르므로 이 루프는 실시간을
/// 거의 쓰지 않습니다. 한 스텝이 250ms이므로 폴링 주기 여러 번을
/// 가상 시간으로 충분히 덮습니다.
async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..2_000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    panic!("condition not reached");
}

#[tokio::test(start_paused = true)]
async fn successful_polls_persist_entries_and_advance_cursor() {
    let h = harness(
        config(),
        vec![
            ScriptStep::Batch(
                vec![record("e1", "first"), record("e2", "second")],
                Some("t1".to_string()),
            ),
            ScriptStep::Batch(vec![record("e3", "third")], Some("t2".to_string())),
        ],
    );
    let id = h.manager.register(aws_connection()).unwrap();
    h.manager.activate(&id).await.unwrap();

    let store = h.log_store.clone();
    wait_until(move || store.len() == 3).await;
    h.manager.pause(&id).await.unwrap();

    let cursor = h.checkpoints.load(&id).await.unwrap().unwrap();
    // 빈 폴도 사이클이므로 시퀀스는 성공한 사이클 수만큼 전진한다
    assert!(cursor.sequence >= 2);
    assert_eq!(cursor.token.as_deref(), Some("t2"));
    assert_eq!(h.status_of(&id), Some(ConnectionStatus::Paused));

    let entries = h.log_store.snapshot();
    assert!(entries.iter().all(|e| e.project_id == "proj-1"));
    assert!(entries.iter().any(|e| e.message == "third"));
}

#[tokio::test(start_paused = true)]
async fn replayed_records_are_not_persisted_twice() {
    // 체크포인트 전진 실패 후 재폴링 상황: 같은 레코드가 두 사이클에
    // 걸쳐 도착해도 중복 제거가 이중 기록을 막아야 한다
    let h = harness(
        config(),
        vec![
            ScriptStep::Batch(vec![record("e1", "dup")], Some("t1".to_string())),
            ScriptStep::Batch(vec![record("e1", "dup")], Some("t1".to_string())),
        ],
    );
    let id = h.manager.register(aws_connection()).unwrap();
    h.manager.activate(&id).await.unwrap();

    let adapter = h.adapter.clone();
    wait_until(move || adapter.poll_count() >= 2).await;
    h.manager.pause(&id).await.unwrap();

    assert_eq!(h.log_store.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_connection_is_idempotent_and_leaves_cursor_untouched() {
    let h = harness(config(), Vec::new());
    let connection = aws_connection();

    h.manager.test_connection(&connection).await.unwrap();
    h.manager.test_connection(&connection).await.unwrap();

    assert_eq!(h.adapter.test_count(), 2);
    assert_eq!(h.adapter.poll_count(), 0);
    assert!(h.checkpoints.load(&connection.id).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn repeated_failures_transition_to_error_and_notify_subscribers() {
    // 사이클 안 재시도를 꺼서 일시적 오류가 매 사이클 실패로 누적되게 한다
    let h = harness(
        ManagerConfig {
            retry_max: 0,
            ..config()
        },
        vec![
            ScriptStep::Fail(SourceError::transient("throttled")),
            ScriptStep::Fail(SourceError::transient("throttled")),
            ScriptStep::Fail(SourceError::transient("throttled")),
        ],
    );
    let subscriber = h.hub.subscribe("proj-1");
    subscriber.drain();

    let id = h.manager.register(aws_connection()).unwrap();
    h.manager.activate(&id).await.unwrap();

    let manager = &h.manager;
    let id_clone = id.clone();
    wait_until(move || {
        manager
            .list()
            .into_iter()
            .find(|s| s.id == id_clone)
            .is_some_and(|s| s.status == ConnectionStatus::Error)
    })
    .await;

    let summary = h
        .manager
        .list()
        .into_iter()
        .find(|s| s.id == id)
        .unwrap();
    assert_eq!(summary.consecutive_failures, 3);
    assert!(summary.last_error.as_deref().unwrap_or("").contains("throttled"));

    let frames = subscriber.drain();
    assert!(frames.iter().any(|f| matches!(
        f,
        ServerFrame::ConnectionStatus { connection_id, status: ConnectionStatus::Error, .. }
            if connection_id == &id
    )));

    // 운영자 복구: Error → Active 재활성화
    h.manager.resume(&id).await.unwrap();
    assert_eq!(h.status_of(&id), Some(ConnectionStatus::Active));
    h.manager.pause(&id).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn auth_failure_marks_connection_errored() {
    let h = harness(
        config(),
        vec![ScriptStep::Fail(SourceError::auth("token revoked"))],
    );
    let subscriber = h.hub.subscribe("proj-1");
    subscriber.drain();

    let id = h.manager.register(aws_connection()).unwrap();
    h.manager.activate(&id).await.unwrap();

    let manager = &h.manager;
    let id_clone = id.clone();
    wait_until(move || {
        manager
            .list()
            .into_iter()
            .find(|s| s.id == id_clone)
            .is_some_and(|s| s.status == ConnectionStatus::Error)
    })
    .await;

    // 한 번만 시도하고 멈춘다: 인증 오류는 재시도 대상이 아니다
    assert_eq!(h.adapter.poll_count(), 1);
    let frames = subscriber.drain();
    assert!(frames.iter().any(|f| matches!(
        f,
        ServerFrame::ConnectionStatus { status: ConnectionStatus::Error, reason: Some(reason), .. }
            if reason.contains("token revoked")
    )));

    // 재설정 후 명시적 재활성화로만 되살아난다
    h.manager.resume(&id).await.unwrap();
    assert_eq!(h.status_of(&id), Some(ConnectionStatus::Active));
    h.manager.pause(&id).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn permanent_error_marks_connection_errored_without_retry() {
    // 영구 오류 뒤에 배치가 남아 있어도 다시 폴링하지 않아야 한다
    let h = harness(
        config(),
        vec![
            ScriptStep::Fail(SourceError::permanent("bad filter")),
            ScriptStep::Batch(vec![record("e1", "never fetched")], None),
        ],
    );
    let id = h.manager.register(aws_connection()).unwrap();
    h.manager.activate(&id).await.unwrap();

    let manager = &h.manager;
    let id_clone = id.clone();
    wait_until(move || {
        manager
            .list()
            .into_iter()
            .find(|s| s.id == id_clone)
            .is_some_and(|s| s.status == ConnectionStatus::Error)
    })
    .await;

    assert_eq!(h.adapter.poll_count(), 1);
    assert_eq!(h.log_store.len(), 0);
    let summary = h.manager.list().into_iter().find(|s| s.id == id).unwrap();
    assert!(summary.last_error.as_deref().unwrap_or("").contains("bad filter"));
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried_within_the_cycle() {
    let h = harness(
        config(),
        vec![
            ScriptStep::Fail(SourceError::transient("throttled")),
            ScriptStep::Fail(SourceError::transient("throttled")),
            ScriptStep::Batch(vec![record("e1", "after retry")], Some("t1".to_string())),
        ],
    );
    let id = h.manager.register(aws_connection()).unwrap();
    h.manager.activate(&id).await.unwrap();

    let store = h.log_store.clone();
    wait_until(move || store.len() == 1).await;

    // 재시도는 같은 사이클 안에서 일어나므로 실패 누적이 남지 않는다
    let summary = h.manager.list().into_iter().find(|s| s.id == id).unwrap();
    assert_eq!(summary.status, ConnectionStatus::Active);
    assert_eq!(summary.consecutive_failures, 0);
    assert!(h.adapter.poll_count() >= 3);
    h.manager.pause(&id).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn activation_is_capped_per_process() {
    let h = harness(
        ManagerConfig {
            max_active_per_process: 1,
            ..config()
        },
        Vec::new(),
    );
    let first = h.manager.register(aws_connection()).unwrap();
    let second = h
        .manager
        .register(Connection::new("proj-2", ProviderKind::Aws, "plain-token", 30))
        .unwrap();

    h.manager.activate(&first).await.unwrap();
    let err = h.manager.activate(&second).await.unwrap_err();
    assert!(matches!(err, ManagerError::ResourceExhausted { limit: 1, .. }));

    // 일시 중지가 자리를 비우면 두 번째 연결이 들어갈 수 있다
    h.manager.pause(&first).await.unwrap();
    h.manager.activate(&second).await.unwrap();
    h.manager.pause(&second).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_a_hung_poll_within_grace() {
    let h = harness(
        ManagerConfig {
            stop_grace_secs: 1,
            call_timeout_secs: 600,
            ..config()
        },
        vec![ScriptStep::Hang],
    );
    let id = h.manager.register(aws_connection()).unwrap();
    h.manager.activate(&id).await.unwrap();

    let adapter = h.adapter.clone();
    wait_until(move || adapter.poll_count() == 1).await;

    // 공급자 호출이 영원히 끝나지 않아도 취소는 호출 중간에 먹힌다.
    // 사이클이 완료되지 않았으므로 커서는 전진하지 않는다.
    h.manager.stop_connection(&id).await.unwrap();
    assert_eq!(h.status_of(&id), Some(ConnectionStatus::Pending));
    assert!(h.checkpoints.load(&id).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn health_sweep_marks_stalled_connections_errored() {
    use logbridge_core::pipeline::Pipeline;

    // 공급자 호출이 돌아오지 않는 연결: 스윕이 중단으로 판정해야 한다
    let mut h = harness(
        ManagerConfig {
            poll_interval_floor_secs: 1,
            health_sweep_secs: 1,
            stall_factor: 1,
            call_timeout_secs: 600,
            stop_grace_secs: 1,
            ..config()
        },
        vec![ScriptStep::Hang],
    );
    let subscriber = h.hub.subscribe("proj-1");
    subscriber.drain();

    let id = h
        .manager
        .register(Connection::new("proj-1", ProviderKind::Aws, "plain-token", 1))
        .unwrap();
    h.manager.activate(&id).await.unwrap();
    Pipeline::start(&mut h.manager).await.unwrap();

    let manager = &h.manager;
    let id_clone = id.clone();
    wait_until(move || {
        manager
            .list()
            .into_iter()
            .find(|s| s.id == id_clone)
            .is_some_and(|s| s.status == ConnectionStatus::Error)
    })
    .await;

    // 운영 화면에도 중단 사유가 남아야 한다
    let summary = h.manager.list().into_iter().find(|s| s.id == id).unwrap();
    assert!(summary.last_error.as_deref().unwrap_or("").contains("stalled"));
    let frames = subscriber.drain();
    assert!(frames.iter().any(|f| matches!(
        f,
        ServerFrame::ConnectionStatus { status: ConnectionStatus::Error, reason: Some(reason), .. }
            if reason.contains("stalled")
    )));

    // 사이클이 완주하지 못했으므로 커서는 전진하지 않는다
    assert!(h.checkpoints.load(&id).await.unwrap().is_none());
    Pipeline::stop(&mut h.manager).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn remove_deletes_the_connection() {
    let h = harness(
        config(),
        vec![ScriptStep::Batch(vec![record("e1", "only")], None)],
    );
    let id = h.manager.register(aws_connection()).unwrap();
    h.manager.activate(&id).await.unwrap();

    let store = h.log_store.clone();
    wait_until(move || store.len() == 1).await;

    h.manager.remove(&id).await.unwrap();
    assert!(h.manager.list().is_empty());

    let err = h.manager.remove(&id).await.unwrap_err();
    assert!(matches!(err, ManagerError::UnknownConnection { .. }));
}

#[tokio::test(start_paused = true)]
async fn register_normalizes_poll_interval() {
    let h = harness(config(), Vec::new());

    let fast = Connection::new("proj-1", ProviderKind::Aws, "t", 1);
    let fast_id = h.manager.register(fast).unwrap();
    let unset = Connection::new("proj-1", ProviderKind::Aws, "t", 0);
    let unset_id = h.manager.register(unset).unwrap();

    let summaries = h.manager.list();
    let floor = summaries.iter().find(|s| s.id == fast_id).unwrap();
    assert_eq!(floor.poll_interval_secs, 5);
    let default = summaries.iter().find(|s| s.id == unset_id).unwrap();
    assert_eq!(default.poll_interval_secs, 30);
    assert!(summaries.iter().all(|s| s.status == ConnectionStatus::Pending));
}

#[tokio::test(start_paused = true)]
async fn duplicate_registration_is_rejected() {
    let h = harness(config(), Vec::new());
    let connection = aws_connection();
    h.manager.register(connection.clone()).unwrap();
    let err = h.manager.register(connection).unwrap_err();
    assert!(matches!(err, ManagerError::DuplicateConnection { .. }));
}
