//! 프로젝트별 스트림 통계.
//!
//! 허브가 하트비트 주기에 맞춰 구독자에게 내려보내는 가벼운 카운터
//! 집계입니다. 정밀한 관측은 Prometheus 메트릭이 담당하고, 이 통계는
//! 대시보드 헤더에 띄울 정도의 요약만 제공합니다.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// 한 프로젝트의 누적 스트림 통계.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectStats {
    pub project_id: String,
    pub entries_total: u64,
    pub alerts_total: u64,
    pub subscribers: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_entry_at: Option<DateTime<Utc>>,
}

/// 스레드 안전 통계 집계기.
#[derive(Default)]
pub struct StatsAggregator {
    stats: Mutex<HashMap<String, ProjectStats>>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_entries(&self, project_id: &str, count: u64) {
        if count == 0 {
            return;
        }
        if let Ok(mut stats) = self.stats.lock() {
            let entry = stats.entry(project_id.to_string()).or_insert_with(|| {
                ProjectStats {
                    project_id: project_id.to_string(),
                    ..ProjectStats::default()
                }
            });
            entry.entries_total += count;
            entry.last_entry_at = Some(Utc::now());
        }
    }

    pub fn record_alert(&self, project_id: &str) {
        if let Ok(mut stats) = self.stats.lock() {
            let entry = stats.entry(project_id.to_string()).or_insert_with(|| {
                ProjectStats {
                    project_id: project_id.to_string(),
                    ..ProjectStats::default()
                }
            });
            entry.alerts_total += 1;
        }
    }

    pub fn set_subscribers(&self, project_id: &str, subscribers: u64) {
        if let Ok(mut stats) = self.stats.lock() {
            let entry = stats.entry(project_id.to_string()).or_insert_with(|| {
                ProjectStats {
                    project_id: project_id.to_string(),
                    ..ProjectStats::default()
                }
            });
            entry.subscribers = subscribers;
        }
    }

    pub fn for_project(&self, project_id: &str) -> ProjectStats {
        self.stats
            .lock()
            .ok()
            .and_then(|stats| stats.get(project_id).cloned())
            .unwrap_or_else(|| ProjectStats {
                project_id: project_id.to_string(),
                ..ProjectStats::default()
            })
    }
}
