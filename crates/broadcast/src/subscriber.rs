//! 구독자 핸들과 바운디드 송신 큐.
//!
//! 느린 소비자 하나가 전체 팬아웃을 막지 않도록 구독자마다 독립된
//! 큐를 둡니다. 큐 점유율이 임계 비율을 넘으면 가장 오래된 프레임부터
//! 버리고 버린 개수를 셉니다. 소비 측(WebSocket 세션 태스크)은 드레인
//! 시점에 유실 통지를 먼저 받습니다.

use crate::protocol::ServerFrame;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use uuid::Uuid;

struct QueueState {
    frames: VecDeque<ServerFrame>,
    dropped_since_notice: u64,
    last_gap_notice: Option<Instant>,
}

/// 프로젝트 스트림 구독자 하나.
///
/// 허브와 WebSocket 세션 태스크가 같은 핸들을 공유합니다. 허브는
/// [`SubscriberHandle::push`]로 프레임을 넣고, 세션 태스크는
/// [`SubscriberHandle::wait`] 후 [`SubscriberHandle::drain`]으로 비웁니다.
#[derive(Clone)]
pub struct SubscriberHandle {
    pub id: String,
    pub project_id: String,
    capacity: usize,
    drop_watermark: usize,
    gap_notice_interval: Duration,
    state: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
}

impl SubscriberHandle {
    pub fn new(
        project_id: impl Into<String>,
        capacity: usize,
        drop_threshold: f64,
        gap_notice_interval: Duration,
    ) -> Self {
        let capacity = capacity.max(1);
        // 임계 비율에 도달하면 버리기 시작한다 (최소 1)
        let drop_watermark = ((capacity as f64) * drop_threshold).ceil().max(1.0) as usize;
        Self {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.into(),
            capacity,
            drop_watermark,
            gap_notice_interval,
            state: Arc::new(Mutex::new(QueueState {
                frames: VecDeque::with_capacity(capacity),
                dropped_since_notice: 0,
                last_gap_notice: None,
            })),
            notify: Arc::new(Notify::new()),
        }
    }

    /// 프레임을 큐에 넣습니다. 워터마크를 넘으면 가장 오래된 프레임을
    /// 버리고 버린 개수를 돌려줍니다.
    pub fn push(&self, frame: ServerFrame) -> u64 {
        let mut dropped = 0u64;
        if let Ok(mut state) = self.state.lock() {
            while state.frames.len() >= self.drop_watermark {
                state.frames.pop_front();
                dropped += 1;
            }
            state.dropped_since_notice += dropped;
            state.frames.push_back(frame);
        }
        self.notify.notify_one();
        dropped
    }

    /// 쌓인 프레임을 모두 꺼냅니다. 직전 드레인 이후 유실이 있었고
    /// 통지 간격이 지났으면 유실 통지 프레임이 맨 앞에 붙습니다.
    pub fn drain(&self) -> Vec<ServerFrame> {
        self.drain_at(Instant::now())
    }

    pub fn drain_at(&self, now: Instant) -> Vec<ServerFrame> {
        let Ok(mut state) = self.state.lock() else {
            return Vec::new();
        };
        let mut frames: Vec<ServerFrame> = state.frames.drain(..).collect();
        if state.dropped_since_notice > 0 {
            let due = state
                .last_gap_notice
                .is_none_or(|last| now.duration_since(last) >= self.gap_notice_interval);
            if due {
                frames.insert(
                    0,
                    ServerFrame::Gap {
                        dropped: state.dropped_since_notice,
                    },
                );
                state.dropped_since_notice = 0;
                state.last_gap_notice = Some(now);
            }
        }
        frames
    }

    /// 새 프레임이 들어올 때까지 기다립니다.
    pub async fn wait(&self) {
        self.notify.notified().await;
    }

    pub fn queued(&self) -> usize {
        self.state.lock().map(|s| s.frames.len()).unwrap_or(0)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
