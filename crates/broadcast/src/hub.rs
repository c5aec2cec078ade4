//! 브로드캐스트 허브.
//!
//! 파이프라인이 만든 배치/알림/상태 이벤트를 프레임으로 바꿔 프로젝트
//! 구독자들에게 팬아웃하고, 동시에 프로세스 간 버스로 중계합니다.
//! 버스에서 돌아온 자기 발행 메시지는 인스턴스 ID로 걸러냅니다.
//!
//! 수명 주기(시작/정지)는 [`BroadcastHub`]가, 발행과 구독은 값싸게 복제되는
//! [`HubHandle`]이 맡습니다. 스트림 매니저와 서버 계층은 핸들만 들고 다니고
//! 허브 본체는 데몬 오케스트레이터가 소유합니다.

use crate::bus::{BusMessage, EventBus};
use crate::protocol::ServerFrame;
use crate::stats::StatsAggregator;
use crate::subscriber::SubscriberHandle;
use logbridge_core::config::BroadcastConfig;
use logbridge_core::error::{BroadcastError, LogbridgeError};
use logbridge_core::event::{AlertEvent, BatchEvent};
use logbridge_core::metrics as metric_names;
use logbridge_core::pipeline::{HealthStatus, Pipeline};
use logbridge_core::types::ConnectionStatus;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

type SubscriberMap = Arc<RwLock<HashMap<String, SubscriberHandle>>>;

/// 허브의 발행/구독 창구. 복제해서 어디로든 넘길 수 있습니다.
#[derive(Clone)]
pub struct HubHandle {
    config: BroadcastConfig,
    instance_id: String,
    bus: Arc<dyn EventBus>,
    subscribers: SubscriberMap,
    stats: Arc<StatsAggregator>,
}

impl HubHandle {
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn stats(&self) -> Arc<StatsAggregator> {
        self.stats.clone()
    }

    /// 새 구독자를 등록하고 구독 확인 프레임을 큐에 넣습니다.
    /// 토큰 검증은 서버 계층에서 이 호출 전에 끝나 있어야 합니다.
    pub fn subscribe(&self, project_id: impl Into<String>) -> SubscriberHandle {
        let project_id = project_id.into();
        let handle = SubscriberHandle::new(
            project_id.clone(),
            self.config.queue_capacity,
            self.config.drop_threshold,
            Duration::from_secs(self.config.gap_notice_secs),
        );
        handle.push(ServerFrame::Subscribed {
            subscriber_id: handle.id.clone(),
            project_id: project_id.clone(),
        });

        if let Ok(mut subscribers) = self.subscribers.write() {
            subscribers.insert(handle.id.clone(), handle.clone());
            metrics::gauge!(metric_names::BROADCAST_SUBSCRIBERS).set(subscribers.len() as f64);
        }
        self.refresh_subscriber_stats(&project_id);
        tracing::info!(subscriber_id = %handle.id, project_id = %project_id, "subscriber joined");
        handle
    }

    pub fn unsubscribe(&self, subscriber_id: &str) {
        let removed = self.subscribers.write().ok().and_then(|mut subscribers| {
            let removed = subscribers.remove(subscriber_id);
            metrics::gauge!(metric_names::BROADCAST_SUBSCRIBERS).set(subscribers.len() as f64);
            removed
        });
        if let Some(handle) = removed {
            self.refresh_subscriber_stats(&handle.project_id);
            tracing::info!(subscriber_id, project_id = %handle.project_id, "subscriber left");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().map(|s| s.len()).unwrap_or(0)
    }

    /// 처리된 배치를 구독자와 버스에 내보냅니다. 빈 배치는 무시합니다.
    pub async fn publish_batch(&self, batch: &BatchEvent) -> Result<(), BroadcastError> {
        if batch.entries.is_empty() {
            return Ok(());
        }
        self.stats
            .record_entries(&batch.project_id, batch.entries.len() as u64);
        let frame = ServerFrame::Logs {
            entries: batch.entries.clone(),
        };
        self.publish(&batch.project_id, frame).await
    }

    pub async fn publish_alert(&self, event: &AlertEvent) -> Result<(), BroadcastError> {
        self.stats.record_alert(&event.alert.project_id);
        let frame = ServerFrame::Alert {
            alert: event.alert.clone(),
        };
        self.publish(&event.alert.project_id, frame).await
    }

    pub async fn publish_status(
        &self,
        project_id: &str,
        connection_id: &str,
        status: ConnectionStatus,
        reason: Option<String>,
    ) -> Result<(), BroadcastError> {
        let frame = ServerFrame::ConnectionStatus {
            connection_id: connection_id.to_string(),
            status,
            reason,
        };
        self.publish(project_id, frame).await
    }

    /// 로컬 팬아웃 후 버스로 중계합니다.
    async fn publish(&self, project_id: &str, frame: ServerFrame) -> Result<(), BroadcastError> {
        fanout_local(&self.subscribers, project_id, &frame);
        self.bus
            .publish(BusMessage {
                origin: self.instance_id.clone(),
                project_id: project_id.to_string(),
                frame,
            })
            .await
    }

    fn refresh_subscriber_stats(&self, project_id: &str) {
        let count = self
            .subscribers
            .read()
            .map(|s| s.values().filter(|h| h.project_id == project_id).count() as u64)
            .unwrap_or(0);
        self.stats.set_subscribers(project_id, count);
    }
}

/// 프로젝트 구독자 전원의 큐에 프레임을 넣습니다.
fn fanout_local(subscribers: &SubscriberMap, project_id: &str, frame: &ServerFrame) {
    let Ok(map) = subscribers.read() else {
        return;
    };
    let mut sent = 0u64;
    let mut dropped = 0u64;
    for handle in map.values().filter(|h| h.project_id == project_id) {
        dropped += handle.push(frame.clone());
        sent += 1;
    }
    if sent > 0 {
        metrics::counter!(metric_names::BROADCAST_FRAMES_SENT_TOTAL).increment(sent);
    }
    if dropped > 0 {
        metrics::counter!(metric_names::BROADCAST_FRAMES_DROPPED_TOTAL).increment(dropped);
        tracing::debug!(project_id, dropped, "frames dropped for slow subscribers");
    }
}

/// 허브 본체. 버스 중계와 하트비트 태스크의 수명을 관리합니다.
pub struct BroadcastHub {
    handle: HubHandle,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    started: bool,
}

impl BroadcastHub {
    pub fn new(config: BroadcastConfig, bus: Arc<dyn EventBus>) -> Self {
        let handle = HubHandle {
            config,
            instance_id: Uuid::new_v4().to_string(),
            bus,
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(StatsAggregator::new()),
        };
        Self {
            handle,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
            started: false,
        }
    }

    pub fn handle(&self) -> HubHandle {
        self.handle.clone()
    }
}

impl Pipeline for BroadcastHub {
    fn name(&self) -> &str {
        "broadcast-hub"
    }

    async fn start(&mut self) -> Result<(), LogbridgeError> {
        if self.started {
            return Err(BroadcastError::Bus("hub already started".to_string()).into());
        }
        self.started = true;
        tracing::info!(instance_id = %self.handle.instance_id, "broadcast hub starting");

        // 버스 중계: 다른 인스턴스가 발행한 프레임을 로컬 구독자에게 전달
        {
            let mut receiver = self.handle.bus.subscribe();
            let subscribers = self.handle.subscribers.clone();
            let instance_id = self.handle.instance_id.clone();
            let cancel = self.cancel.clone();
            self.tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        received = receiver.recv() => match received {
                            Ok(message) => {
                                if message.origin == instance_id {
                                    continue;
                                }
                                fanout_local(&subscribers, &message.project_id, &message.frame);
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                                tracing::warn!(skipped, "bus relay lagged, messages skipped");
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                                tracing::warn!("event bus closed, relay stopping");
                                break;
                            }
                        },
                    }
                }
            }));
        }

        // 하트비트 + 프로젝트 통계
        {
            let subscribers = self.handle.subscribers.clone();
            let stats = self.handle.stats.clone();
            let cancel = self.cancel.clone();
            let period = Duration::from_secs(self.handle.config.heartbeat_secs.max(1));
            self.tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                ticker.tick().await; // 첫 틱은 즉시 발화하므로 버린다
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {
                            let Ok(map) = subscribers.read() else { continue };
                            for handle in map.values() {
                                handle.push(ServerFrame::heartbeat());
                                handle.push(ServerFrame::Stats {
                                    stats: stats.for_project(&handle.project_id),
                                });
                            }
                        }
                    }
                }
            }));
        }

        Ok(())
    }

    async fn stop(&mut self) -> Result<(), LogbridgeError> {
        if !self.started {
            return Ok(());
        }
        tracing::info!("broadcast hub stopping");
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            if let Err(err) = task.await {
                tracing::warn!(error = %err, "hub task join failed");
            }
        }
        self.started = false;
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        if !self.started {
            return HealthStatus::Unhealthy("not started".to_string());
        }
        // 드롭 수위선에 도달한 구독자가 있으면 성능 저하로 본다
        let pressured = self
            .handle
            .subscribers
            .read()
            .map(|map| {
                map.values()
                    .filter(|s| {
                        let watermark = ((s.capacity() as f64
                            * self.handle.config.drop_threshold)
                            .ceil() as usize)
                            .max(1);
                        s.queued() >= watermark
                    })
                    .count()
            })
            .unwrap_or(0);
        if pressured > 0 {
            HealthStatus::Degraded(format!("{pressured} subscribers under queue pressure"))
        } else {
            HealthStatus::Healthy
        }
    }
}
