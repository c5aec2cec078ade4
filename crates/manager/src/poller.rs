//! 연결당 폴링 루프.
//!
//! 한 사이클은 폴링 → 처리(정규화/중복 제거/영속화) → 알림 평가 →
//! 팬아웃 → 체크포인트 전진 순서로 진행됩니다. 체크포인트가 마지막이므로
//! 중간 실패는 커서를 전진시키지 않고, 다음 사이클이 같은 구간을 다시
//! 읽습니다(최소 1회 전달). 오류 분류에 따라:
//!
//! - 일시적 오류: 지수 백오프로 사이클 안에서 재시도
//! - 인증/영구 오류: 즉시 오류 상태 전이, 루프 종료
//! - 그 외(영속화, 체크포인트 등): 연속 실패 누적, 임계값 도달 시 오류
//!   상태 전이와 루프 종료

use crate::credentials::CredentialResolver;
use crate::registry::SharedRegistry;
use logbridge_broadcast::HubHandle;
use logbridge_core::config::ManagerConfig;
use logbridge_core::error::{SourceError, StorageError};
use logbridge_core::event::{HealthEvent, HealthReason};
use logbridge_core::metrics as metric_names;
use logbridge_core::storage::CheckpointStore;
use logbridge_core::types::{Connection, ConnectionStatus};
use logbridge_pipeline::alert::AlertEngine;
use logbridge_pipeline::processor::StreamProcessor;
use logbridge_source::adapter::SourceAdapter;
use logbridge_source::retry::backoff_delay;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// 폴링 태스크가 쓰는 의존성 묶음.
pub struct PollerDeps {
    pub connection_id: String,
    pub registry: SharedRegistry,
    pub adapter: Arc<dyn SourceAdapter>,
    pub resolver: Arc<dyn CredentialResolver>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub alert_engine: Arc<AlertEngine>,
    pub hub: HubHandle,
    pub config: ManagerConfig,
    pub processor: StreamProcessor,
    pub cancel: CancellationToken,
}

/// 폴링 루프 본체. 취소되거나 연결이 비활성 상태로 전이하면 끝납니다.
pub async fn run_poller(mut deps: PollerDeps) {
    let interval = poll_interval(&deps);
    tracing::info!(
        connection_id = %deps.connection_id,
        interval_secs = interval.as_secs(),
        "poller started"
    );

    loop {
        if let ControlFlow::Break(()) = poll_once(&mut deps).await {
            break;
        }
        tokio::select! {
            _ = deps.cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    tracing::info!(connection_id = %deps.connection_id, "poller stopped");
}

fn poll_interval(deps: &PollerDeps) -> Duration {
    let configured = deps
        .registry
        .lock()
        .ok()
        .and_then(|r| r.snapshot(&deps.connection_id))
        .map(|c| c.poll_interval_secs)
        .unwrap_or(deps.config.default_poll_interval_secs);
    Duration::from_secs(configured.max(deps.config.poll_interval_floor_secs))
}

async fn poll_once(deps: &mut PollerDeps) -> ControlFlow<()> {
    let Some(connection) = snapshot(deps) else {
        return ControlFlow::Break(());
    };
    if connection.status != ConnectionStatus::Active {
        return ControlFlow::Break(());
    }
    let provider = connection.provider.as_str();

    let credentials = match deps.resolver.resolve(&connection).await {
        Ok(credentials) => credentials,
        Err(err) => return source_failure(deps, &connection, err).await,
    };

    let cursor = match deps.checkpoints.load(&connection.id).await {
        Ok(cursor) => cursor.unwrap_or_default(),
        Err(err) => {
            return generic_failure(deps, &connection, &format!("checkpoint load failed: {err}"))
                .await;
        }
    };

    // 공급자 호출: 일시적 오류는 사이클 안에서 백오프 재시도
    let mut attempt = 0u32;
    let batch = loop {
        attempt += 1;
        let call = deps
            .adapter
            .poll(&connection, &credentials, &cursor);
        let outcome = tokio::select! {
            _ = deps.cancel.cancelled() => return ControlFlow::Break(()),
            outcome = tokio::time::timeout(deps.config.call_timeout(), call) => outcome,
        };
        let err = match outcome {
            Ok(Ok(batch)) => break batch,
            Ok(Err(err)) => err,
            Err(_) => SourceError::transient(format!(
                "provider call timed out after {}s",
                deps.config.call_timeout_secs
            )),
        };

        if err.is_transient() && attempt <= deps.config.retry_max {
            let delay = backoff_delay(
                attempt,
                Duration::from_millis(deps.config.backoff_base_ms),
                Duration::from_secs(deps.config.backoff_cap_secs),
                err.retry_after(),
            );
            tracing::warn!(
                connection_id = %connection.id,
                attempt,
                retry_max = deps.config.retry_max,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient poll failure, backing off"
            );
            tokio::select! {
                _ = deps.cancel.cancelled() => return ControlFlow::Break(()),
                _ = tokio::time::sleep(delay) => continue,
            }
        }
        metrics::counter!(
            metric_names::SOURCE_POLLS_TOTAL,
            "provider" => provider.to_string(),
            "outcome" => "failure",
        )
        .increment(1);
        return source_failure(deps, &connection, err).await;
    };

    metrics::counter!(
        metric_names::SOURCE_POLLS_TOTAL,
        "provider" => provider.to_string(),
        "outcome" => "success",
    )
    .increment(1);
    metrics::counter!(
        metric_names::SOURCE_RECORDS_TOTAL,
        "provider" => provider.to_string(),
    )
    .increment(batch.records.len() as u64);

    // 처리: 실패 시 커서를 전진시키지 않고 다음 사이클이 재시도
    let processed = match deps.processor.process(&connection, batch.records).await {
        Ok(processed) => processed,
        Err(err) => return generic_failure(deps, &connection, &err.to_string()).await,
    };

    // 알림은 팬아웃보다 먼저 평가해 알림 프레임이 로그 프레임과 같은
    // 사이클에 나가게 한다
    let alerts = deps.alert_engine.evaluate_batch(&processed.event).await;
    for alert in &alerts {
        if let Err(err) = deps.hub.publish_alert(alert).await {
            tracing::warn!(connection_id = %connection.id, error = %err, "alert fanout failed");
        }
    }
    if let Err(err) = deps.hub.publish_batch(&processed.event).await {
        tracing::warn!(connection_id = %connection.id, error = %err, "batch fanout failed");
    }

    // 체크포인트 전진 (compare-and-set)
    let next = cursor.advanced(batch.next_token);
    match deps
        .checkpoints
        .advance(&connection.id, cursor.sequence, next)
        .await
    {
        Ok(()) => {}
        Err(StorageError::StaleCursor {
            expected, found, ..
        }) => {
            // 다른 쓰기가 먼저 전진시켰다. 전진을 포기하면 다음 사이클이
            // 최신 커서를 다시 읽고, 중복 제거가 이중 기록을 막는다.
            tracing::warn!(
                connection_id = %connection.id,
                expected,
                found,
                "cursor advance lost compare-and-set race"
            );
        }
        Err(err) => {
            return generic_failure(deps, &connection, &format!("checkpoint advance failed: {err}"))
                .await;
        }
    }

    finish_success(deps, &connection).await;
    ControlFlow::Continue(())
}

fn snapshot(deps: &PollerDeps) -> Option<Connection> {
    deps.registry
        .lock()
        .ok()
        .and_then(|r| r.snapshot(&deps.connection_id))
}

async fn finish_success(deps: &PollerDeps, connection: &Connection) {
    let prior_failures = deps
        .registry
        .lock()
        .map(|mut r| r.mark_success(&connection.id))
        .unwrap_or(0);

    if prior_failures > 0 {
        tracing::info!(
            connection_id = %connection.id,
            prior_failures,
            "connection recovered"
        );
        let event = HealthEvent::new(
            connection.id.clone(),
            connection.project_id.clone(),
            HealthReason::Recovered,
        );
        publish_health(deps, &event).await;
    }
}

/// 공급자 오류 처리. 인증/영구 오류는 재시도 없이 오류 상태로 전이합니다.
async fn source_failure(
    deps: &PollerDeps,
    connection: &Connection,
    err: SourceError,
) -> ControlFlow<()> {
    if err.is_auth() || err.is_permanent() {
        tracing::error!(
            connection_id = %connection.id,
            error = %err,
            "unrecoverable source error, marking connection errored"
        );
        if let Ok(mut registry) = deps.registry.lock() {
            registry.mark_failure(&connection.id, &err.to_string());
        }
        announce_error(deps, connection, &err.to_string()).await;
        return ControlFlow::Break(());
    }
    // 재시도 한도를 소진한 일시적 오류만 여기로 온다
    generic_failure(deps, connection, &err.to_string()).await
}

/// 실패 누적 처리. 연속 실패가 임계값에 이르면 오류 상태로 전이합니다.
/// 영속화/체크포인트 실패처럼 재시도 가치가 있는 경로에만 씁니다.
async fn generic_failure(
    deps: &PollerDeps,
    connection: &Connection,
    reason: &str,
) -> ControlFlow<()> {
    let failures = deps
        .registry
        .lock()
        .map(|mut r| r.mark_failure(&connection.id, reason))
        .unwrap_or(0);
    tracing::warn!(
        connection_id = %connection.id,
        failures,
        threshold = deps.config.error_threshold,
        reason,
        "poll cycle failed"
    );

    if failures < deps.config.error_threshold {
        return ControlFlow::Continue(());
    }

    tracing::error!(
        connection_id = %connection.id,
        failures,
        "failure threshold reached, marking connection errored"
    );
    announce_error(deps, connection, reason).await;
    ControlFlow::Break(())
}

/// 오류 상태 전이와 상태/헬스 팬아웃. `last_error`는 호출자가 먼저
/// `mark_failure`로 기록해 둔 상태여야 합니다.
async fn announce_error(deps: &PollerDeps, connection: &Connection, reason: &str) {
    if let Ok(mut registry) = deps.registry.lock()
        && let Err(err) = registry.transition(&connection.id, ConnectionStatus::Error)
    {
        tracing::warn!(connection_id = %connection.id, error = %err, "error transition failed");
    }
    broadcast_status(deps, connection, ConnectionStatus::Error, reason).await;
    let event = HealthEvent::new(
        connection.id.clone(),
        connection.project_id.clone(),
        HealthReason::Errored {
            error: reason.to_string(),
        },
    );
    publish_health(deps, &event).await;
}

async fn broadcast_status(
    deps: &PollerDeps,
    connection: &Connection,
    status: ConnectionStatus,
    reason: &str,
) {
    if let Err(err) = deps
        .hub
        .publish_status(
            &connection.project_id,
            &connection.id,
            status,
            Some(reason.to_string()),
        )
        .await
    {
        tracing::warn!(connection_id = %connection.id, error = %err, "status fanout failed");
    }
}

async fn publish_health(deps: &PollerDeps, event: &HealthEvent) {
    for alert in deps.alert_engine.evaluate_health(event).await {
        if let Err(err) = deps.hub.publish_alert(&alert).await {
            tracing::warn!(error = %err, "health alert fanout failed");
        }
    }
}
