//! 스트림 매니저.
//!
//! 연결 등록/활성화/일시 중지/제거 연산을 제공하고, 활성 연결마다
//! 폴링 태스크를 하나씩 띄웁니다. 정지는 취소 토큰으로 요청한 뒤 유예
//! 기간만큼 기다리고, 그 안에 끝나지 않으면 태스크를 강제 중단합니다.
//! 주기적인 헬스 스윕이 오래 성공이 없는 활성 연결을 중단으로 판정해
//! 오류 상태로 전이시키고 헬스 이벤트를 발행합니다.

use crate::credentials::CredentialResolver;
use crate::poller::{PollerDeps, run_poller};
use crate::registry::{ConnectionRegistry, ConnectionSummary, SharedRegistry};
use logbridge_broadcast::HubHandle;
use logbridge_core::config::{ManagerConfig, ProcessorConfig};
use logbridge_core::error::{LogbridgeError, ManagerError, SourceError};
use logbridge_core::event::{HealthEvent, HealthReason};
use logbridge_core::metrics as metric_names;
use logbridge_core::pipeline::{HealthStatus, Pipeline};
use logbridge_core::storage::{CheckpointStore, LogStore};
use logbridge_core::types::{Connection, ConnectionStatus, ProviderKind};
use logbridge_pipeline::alert::AlertEngine;
use logbridge_pipeline::processor::StreamProcessor;
use logbridge_source::adapter::{SourceAdapter, adapter_for};
use logbridge_source::transport::HttpTransport;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// 공급자 종류 → 어댑터. 테스트는 모의 어댑터를 꽂습니다.
pub trait AdapterProvider: Send + Sync {
    fn adapter(&self, kind: ProviderKind) -> Arc<dyn SourceAdapter>;
}

/// 실제 HTTP 전송 계층을 쓰는 기본 제공자.
pub struct HttpAdapterProvider {
    transport: Arc<dyn HttpTransport>,
}

impl HttpAdapterProvider {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }
}

impl AdapterProvider for HttpAdapterProvider {
    fn adapter(&self, kind: ProviderKind) -> Arc<dyn SourceAdapter> {
        adapter_for(kind, self.transport.clone())
    }
}

/// 매니저가 쓰는 외부 의존성 묶음.
pub struct ManagerDeps {
    pub adapters: Arc<dyn AdapterProvider>,
    pub resolver: Arc<dyn CredentialResolver>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub log_store: Arc<dyn LogStore>,
    pub alert_engine: Arc<AlertEngine>,
    pub hub: HubHandle,
}

pub struct StreamManager {
    config: ManagerConfig,
    processor_config: ProcessorConfig,
    registry: SharedRegistry,
    deps: ManagerDeps,
    cancel: CancellationToken,
    sweep: Option<JoinHandle<()>>,
    started: bool,
}

impl StreamManager {
    pub fn new(config: ManagerConfig, processor_config: ProcessorConfig, deps: ManagerDeps) -> Self {
        let registry = ConnectionRegistry::shared(
            config.max_active_per_process,
            config.max_active_per_project,
        );
        Self {
            config,
            processor_config,
            registry,
            deps,
            cancel: CancellationToken::new(),
            sweep: None,
            started: false,
        }
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    /// 연결을 등록합니다. 폴링 주기는 최소값으로 올려 잡고, 0이면
    /// 기본값을 씁니다. 폴링은 [`StreamManager::activate`]가 시작합니다.
    pub fn register(&self, mut connection: Connection) -> Result<String, ManagerError> {
        if connection.poll_interval_secs == 0 {
            connection.poll_interval_secs = self.config.default_poll_interval_secs;
        }
        if connection.poll_interval_secs < self.config.poll_interval_floor_secs {
            tracing::debug!(
                connection_id = %connection.id,
                requested = connection.poll_interval_secs,
                floor = self.config.poll_interval_floor_secs,
                "poll interval clamped to floor"
            );
            connection.poll_interval_secs = self.config.poll_interval_floor_secs;
        }
        connection.status = ConnectionStatus::Pending;
        let id = connection.id.clone();

        let Ok(mut registry) = self.registry.lock() else {
            return Err(ManagerError::UnknownConnection { connection_id: id });
        };
        registry.insert(connection)?;
        tracing::info!(connection_id = %id, "connection registered");
        Ok(id)
    }

    /// 연결을 활성화하고 폴링 태스크를 띄웁니다.
    pub async fn activate(&self, connection_id: &str) -> Result<(), ManagerError> {
        let connection = {
            let Ok(mut registry) = self.registry.lock() else {
                return Err(ManagerError::UnknownConnection {
                    connection_id: connection_id.to_string(),
                });
            };
            registry.activate(connection_id)?
        };

        let cancel = self.cancel.child_token();
        let deps = PollerDeps {
            connection_id: connection.id.clone(),
            registry: self.registry.clone(),
            adapter: self.deps.adapters.adapter(connection.provider),
            resolver: self.deps.resolver.clone(),
            checkpoints: self.deps.checkpoints.clone(),
            alert_engine: self.deps.alert_engine.clone(),
            hub: self.deps.hub.clone(),
            config: self.config.clone(),
            processor: StreamProcessor::new(
                self.deps.log_store.clone(),
                self.processor_config.clone(),
            ),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(run_poller(deps));

        if let Ok(mut registry) = self.registry.lock() {
            registry.attach_task(connection_id, cancel, task);
            metrics::gauge!(metric_names::MANAGER_ACTIVE_CONNECTIONS)
                .set(registry.active_count() as f64);
        }
        let _ = self
            .deps
            .hub
            .publish_status(
                &connection.project_id,
                &connection.id,
                ConnectionStatus::Active,
                None,
            )
            .await;
        Ok(())
    }

    /// 연결을 일시 중지합니다. 커서는 보존되어 재개 시 이어서 읽습니다.
    pub async fn pause(&self, connection_id: &str) -> Result<(), ManagerError> {
        self.halt(connection_id, ConnectionStatus::Paused).await
    }

    /// 연결 폴링을 끝내고 등록 직후 상태로 되돌립니다.
    pub async fn stop_connection(&self, connection_id: &str) -> Result<(), ManagerError> {
        self.halt(connection_id, ConnectionStatus::Pending).await
    }

    /// 정지 공통 경로. 진행 중인 폴 사이클에는 유예 기간을 주고, 넘기면
    /// 태스크를 강제 중단한 뒤 연결을 오류 상태로 남깁니다.
    async fn halt(
        &self,
        connection_id: &str,
        target: ConnectionStatus,
    ) -> Result<(), ManagerError> {
        let snapshot = {
            let Ok(registry) = self.registry.lock() else {
                return Err(ManagerError::UnknownConnection {
                    connection_id: connection_id.to_string(),
                });
            };
            registry
                .snapshot(connection_id)
                .ok_or_else(|| ManagerError::UnknownConnection {
                    connection_id: connection_id.to_string(),
                })?
        };

        let graceful = self.stop_task(connection_id).await;
        let status = if graceful {
            target
        } else {
            ConnectionStatus::Error
        };

        {
            let Ok(mut registry) = self.registry.lock() else {
                return Err(ManagerError::UnknownConnection {
                    connection_id: connection_id.to_string(),
                });
            };
            if !graceful {
                registry.mark_failure(connection_id, "ungraceful stop");
            }
            registry.transition(connection_id, status)?;
            metrics::gauge!(metric_names::MANAGER_ACTIVE_CONNECTIONS)
                .set(registry.active_count() as f64);
        }
        let _ = self
            .deps
            .hub
            .publish_status(
                &snapshot.project_id,
                connection_id,
                status,
                (!graceful).then(|| "ungraceful stop".to_string()),
            )
            .await;

        if graceful {
            tracing::info!(connection_id, status = status.as_str(), "connection stopped");
            Ok(())
        } else {
            Err(ManagerError::UngracefulStop {
                connection_id: connection_id.to_string(),
            })
        }
    }

    /// 일시 중지된(또는 오류 상태의) 연결을 다시 활성화합니다.
    pub async fn resume(&self, connection_id: &str) -> Result<(), ManagerError> {
        self.activate(connection_id).await
    }

    /// 연결을 레지스트리에서 제거합니다. 실행 중이면 먼저 정지시킵니다.
    pub async fn remove(&self, connection_id: &str) -> Result<(), ManagerError> {
        self.stop_task(connection_id).await;
        let Ok(mut registry) = self.registry.lock() else {
            return Err(ManagerError::UnknownConnection {
                connection_id: connection_id.to_string(),
            });
        };
        registry
            .remove(connection_id)
            .ok_or_else(|| ManagerError::UnknownConnection {
                connection_id: connection_id.to_string(),
            })?;
        metrics::gauge!(metric_names::MANAGER_ACTIVE_CONNECTIONS)
            .set(registry.active_count() as f64);
        tracing::info!(connection_id, "connection removed");
        Ok(())
    }

    /// 연결 설정/자격 증명 검증. 멱등이며 커서를 움직이지 않습니다.
    pub async fn test_connection(&self, connection: &Connection) -> Result<(), SourceError> {
        let credentials = self.deps.resolver.resolve(connection).await?;
        let adapter = self.deps.adapters.adapter(connection.provider);
        tokio::time::timeout(self.config.call_timeout(), adapter.test(connection, &credentials))
            .await
            .map_err(|_| {
                SourceError::transient(format!(
                    "provider test timed out after {}s",
                    self.config.call_timeout_secs
                ))
            })?
    }

    pub fn list(&self) -> Vec<ConnectionSummary> {
        self.registry
            .lock()
            .map(|r| r.summaries())
            .unwrap_or_default()
    }

    /// 폴링 태스크를 취소하고 유예 기간만큼 기다립니다.
    /// 유예 안에 끝나면 true, 강제 중단했으면 false를 돌려줍니다.
    async fn stop_task(&self, connection_id: &str) -> bool {
        let taken = self
            .registry
            .lock()
            .ok()
            .and_then(|mut r| r.take_task(connection_id));
        let Some((cancel, mut task)) = taken else {
            return true;
        };
        cancel.cancel();
        match tokio::time::timeout(self.config.stop_grace(), &mut task).await {
            Ok(_) => true,
            Err(_) => {
                task.abort();
                metrics::counter!(metric_names::MANAGER_UNGRACEFUL_STOPS_TOTAL).increment(1);
                tracing::warn!(
                    connection_id,
                    grace_secs = self.config.stop_grace_secs,
                    "poller did not stop within grace period, aborting"
                );
                false
            }
        }
    }
}

impl Pipeline for StreamManager {
    fn name(&self) -> &str {
        "stream-manager"
    }

    async fn start(&mut self) -> Result<(), LogbridgeError> {
        if self.started {
            return Err(ManagerError::InvalidTransition {
                from: "started".to_string(),
                to: "started".to_string(),
            }
            .into());
        }
        self.started = true;
        tracing::info!("stream manager starting");

        let registry = self.registry.clone();
        let alert_engine = self.deps.alert_engine.clone();
        let hub = self.deps.hub.clone();
        let cancel = self.cancel.clone();
        let stall_factor = self.config.stall_factor;
        let floor = self.config.poll_interval_floor_secs;
        let period = Duration::from_secs(self.config.health_sweep_secs.max(1));
        let grace = self.config.stop_grace();

        self.sweep = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let stalled = registry
                            .lock()
                            .map(|r| r.stalled(stall_factor, floor))
                            .unwrap_or_default();
                        for (connection, idle_secs) in stalled {
                            metrics::counter!(metric_names::MANAGER_STALLS_TOTAL).increment(1);
                            tracing::warn!(
                                connection_id = %connection.id,
                                idle_secs,
                                "connection stalled, marking errored"
                            );
                            let reason =
                                format!("stalled: no successful poll for {idle_secs}s");

                            // 폴러가 공급자 호출에 묶여 있을 수 있으니
                            // 취소를 요청하고 유예를 넘기면 강제 중단한다
                            let taken = registry
                                .lock()
                                .ok()
                                .and_then(|mut r| r.take_task(&connection.id));
                            if let Some((task_cancel, mut task)) = taken {
                                task_cancel.cancel();
                                if tokio::time::timeout(grace, &mut task).await.is_err() {
                                    task.abort();
                                }
                            }
                            if let Ok(mut r) = registry.lock() {
                                r.mark_failure(&connection.id, &reason);
                                if let Err(err) =
                                    r.transition(&connection.id, ConnectionStatus::Error)
                                {
                                    tracing::warn!(
                                        connection_id = %connection.id,
                                        error = %err,
                                        "stall transition failed"
                                    );
                                }
                                metrics::gauge!(metric_names::MANAGER_ACTIVE_CONNECTIONS)
                                    .set(r.active_count() as f64);
                            }
                            let _ = hub
                                .publish_status(
                                    &connection.project_id,
                                    &connection.id,
                                    ConnectionStatus::Error,
                                    Some(reason),
                                )
                                .await;

                            let event = HealthEvent::new(
                                connection.id.clone(),
                                connection.project_id.clone(),
                                HealthReason::Stalled { idle_secs },
                            );
                            for alert in alert_engine.evaluate_health(&event).await {
                                if let Err(err) = hub.publish_alert(&alert).await {
                                    tracing::warn!(error = %err, "stall alert fanout failed");
                                }
                            }
                        }
                    }
                }
            }
        }));
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), LogbridgeError> {
        if !self.started {
            return Ok(());
        }
        tracing::info!("stream manager stopping");

        let ids: Vec<String> = self
            .registry
            .lock()
            .map(|r| r.summaries().into_iter().map(|s| s.id).collect())
            .unwrap_or_default();
        for id in ids {
            let graceful = self.stop_task(&id).await;
            if let Ok(mut registry) = self.registry.lock() {
                let target = if graceful {
                    ConnectionStatus::Pending
                } else {
                    ConnectionStatus::Error
                };
                if !graceful {
                    registry.mark_failure(&id, "ungraceful stop");
                }
                // 종료 중이므로 전이 실패(이미 Pending/Error 등)는 무시한다
                let _ = registry.transition(&id, target);
            }
        }

        self.cancel.cancel();
        if let Some(sweep) = self.sweep.take()
            && let Err(err) = sweep.await
        {
            tracing::warn!(error = %err, "health sweep join failed");
        }
        self.started = false;
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        if !self.started {
            return HealthStatus::Unhealthy("not started".to_string());
        }
        let (total, errored) = self
            .registry
            .lock()
            .map(|r| {
                let summaries = r.summaries();
                let errored = summaries
                    .iter()
                    .filter(|s| s.status == ConnectionStatus::Error)
                    .count();
                (summaries.len(), errored)
            })
            .unwrap_or((0, 0));
        if errored > 0 {
            HealthStatus::Degraded(format!("{errored}/{total} connections errored"))
        } else {
            HealthStatus::Healthy
        }
    }
}
