//! 알림 규칙 평가 엔진.
//!
//! 영속화를 마친 배치를 프로젝트 규칙과 대조합니다. 규칙 하나의 오류
//! (잘못된 정규식, 저장소 조회 실패)는 그 규칙만 건너뛰고 나머지 규칙
//! 평가를 계속합니다. 발화는 [`CooldownTracker`]로 억제되고, 발생한
//! 알림은 저장소에 기록된 뒤 전달 채널로 넘어갑니다.

mod cooldown;

pub use cooldown::CooldownTracker;

use logbridge_core::config::AlertConfig;
use logbridge_core::event::{AlertEvent, BatchEvent, HealthEvent, HealthReason};
use logbridge_core::metrics as metric_names;
use logbridge_core::storage::{AlertStore, LogStore, NotificationDispatcher, RuleStore};
use logbridge_core::types::{
    Alert, AlertRule, DeliveryRequest, LogEntry, RuleKind, TriggerDetails,
};
use regex::{Regex, RegexBuilder};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub struct AlertEngine {
    rule_store: Arc<dyn RuleStore>,
    alert_store: Arc<dyn AlertStore>,
    log_store: Arc<dyn LogStore>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    config: AlertConfig,
    cooldowns: Mutex<CooldownTracker>,
    // 규칙 id → (패턴 원문, 컴파일 결과). 원문이 바뀌면 다시 컴파일한다.
    patterns: Mutex<HashMap<String, (String, Regex)>>,
}

impl AlertEngine {
    pub fn new(
        rule_store: Arc<dyn RuleStore>,
        alert_store: Arc<dyn AlertStore>,
        log_store: Arc<dyn LogStore>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        config: AlertConfig,
    ) -> Self {
        let cooldowns = CooldownTracker::new(Duration::from_secs(config.default_cooldown_secs));
        Self {
            rule_store,
            alert_store,
            log_store,
            dispatcher,
            config,
            cooldowns: Mutex::new(cooldowns),
            patterns: Mutex::new(HashMap::new()),
        }
    }

    /// 배치를 평가하고 발화한 알림 이벤트를 돌려줍니다.
    pub async fn evaluate_batch(&self, batch: &BatchEvent) -> Vec<AlertEvent> {
        self.evaluate_batch_at(batch, Instant::now()).await
    }

    /// 시각을 주입할 수 있는 평가 진입점. 쿨다운 검사가 `now`를 기준으로
    /// 이루어집니다.
    pub async fn evaluate_batch_at(&self, batch: &BatchEvent, now: Instant) -> Vec<AlertEvent> {
        if batch.entries.is_empty() {
            return Vec::new();
        }
        let rules = match self.rule_store.rules_for_project(&batch.project_id).await {
            Ok(rules) => rules,
            Err(err) => {
                tracing::warn!(
                    project_id = %batch.project_id,
                    error = %err,
                    "failed to load alert rules, skipping evaluation"
                );
                return Vec::new();
            }
        };

        let mut fired = Vec::new();
        for rule in rules {
            if !rule.enabled || rule.kind == RuleKind::ConnectionHealth {
                continue;
            }
            let outcome = match rule.kind {
                RuleKind::Threshold => self.evaluate_threshold(&rule, batch).await,
                RuleKind::Pattern => self.evaluate_pattern(&rule, batch),
                RuleKind::Level => self.evaluate_level(&rule, batch),
                RuleKind::ConnectionHealth => None,
            };
            let Some((message, trigger)) = outcome else {
                continue;
            };

            if !self.check_cooldown(&rule, now) {
                continue;
            }
            let alert =
                Alert::new(&rule, message, trigger).with_connection(batch.connection_id.clone());
            self.commit(&rule, alert.clone()).await;
            fired.push(AlertEvent::from_batch(batch, alert));
        }
        fired
    }

    /// 연결 헬스 이벤트를 `connection_health` 규칙과 대조합니다.
    pub async fn evaluate_health(&self, event: &HealthEvent) -> Vec<AlertEvent> {
        self.evaluate_health_at(event, Instant::now()).await
    }

    pub async fn evaluate_health_at(&self, event: &HealthEvent, now: Instant) -> Vec<AlertEvent> {
        let rules = match self.rule_store.rules_for_project(&event.project_id).await {
            Ok(rules) => rules,
            Err(err) => {
                tracing::warn!(
                    project_id = %event.project_id,
                    error = %err,
                    "failed to load alert rules for health event"
                );
                return Vec::new();
            }
        };

        let message = match &event.reason {
            HealthReason::Stalled { idle_secs } => format!(
                "connection {} stalled: no successful poll for {idle_secs}s",
                event.connection_id
            ),
            HealthReason::Errored { error } => {
                format!("connection {} errored: {error}", event.connection_id)
            }
            HealthReason::Recovered => {
                format!("connection {} recovered", event.connection_id)
            }
        };

        let mut fired = Vec::new();
        for rule in rules {
            if !rule.enabled || rule.kind != RuleKind::ConnectionHealth {
                continue;
            }
            if !self.check_cooldown(&rule, now) {
                continue;
            }
            let alert = Alert::new(
                &rule,
                message.clone(),
                TriggerDetails {
                    matched_count: 1,
                    window_count: None,
                    samples: Vec::new(),
                },
            )
            .with_connection(event.connection_id.clone());
            self.commit(&rule, alert.clone()).await;

            let mut alert_event = AlertEvent::new(alert);
            alert_event.metadata = event.metadata.propagate(logbridge_core::event::MODULE_PIPELINE);
            fired.push(alert_event);
        }
        fired
    }

    async fn evaluate_threshold(
        &self,
        rule: &AlertRule,
        batch: &BatchEvent,
    ) -> Option<(String, TriggerDetails)> {
        // validate를 통과한 규칙만 저장된다는 보장이 없으므로 방어적으로 확인
        let threshold = u64::from(rule.threshold?);
        let window_secs = rule.window_secs?;

        let matched: Vec<&LogEntry> = batch
            .entries
            .iter()
            .filter(|e| rule.matches_level(e.level))
            .collect();
        if matched.is_empty() {
            return None;
        }

        let since = chrono::Utc::now() - chrono::Duration::seconds(window_secs as i64);
        // 배치는 이미 영속화된 상태라 창 집계에 포함된다
        let window_count = match self
            .log_store
            .count_since(&rule.project_id, &rule.levels, since)
            .await
        {
            Ok(count) => count,
            Err(err) => {
                tracing::warn!(rule_id = %rule.id, error = %err, "window count query failed");
                return None;
            }
        };
        // 임계값을 초과해야 발화한다 (count > threshold)
        if window_count <= threshold {
            return None;
        }

        let message = format!(
            "{window_count} matching entries in the last {window_secs}s (threshold {threshold})"
        );
        Some((
            message,
            TriggerDetails {
                matched_count: matched.len() as u64,
                window_count: Some(window_count),
                samples: self.samples(&matched),
            },
        ))
    }

    fn evaluate_pattern(
        &self,
        rule: &AlertRule,
        batch: &BatchEvent,
    ) -> Option<(String, TriggerDetails)> {
        let regex = self.compiled_pattern(rule)?;
        let matched: Vec<&LogEntry> = batch
            .entries
            .iter()
            .filter(|e| regex.is_match(&e.message))
            .collect();
        if matched.is_empty() {
            return None;
        }

        let message = format!(
            "pattern '{}' matched {} entries",
            rule.pattern.as_deref().unwrap_or(""),
            matched.len()
        );
        Some((
            message,
            TriggerDetails {
                matched_count: matched.len() as u64,
                window_count: None,
                samples: self.samples(&matched),
            },
        ))
    }

    fn evaluate_level(
        &self,
        rule: &AlertRule,
        batch: &BatchEvent,
    ) -> Option<(String, TriggerDetails)> {
        let matched: Vec<&LogEntry> = batch
            .entries
            .iter()
            .filter(|e| rule.matches_level(e.level))
            .collect();
        if matched.is_empty() {
            return None;
        }

        let message = format!("{} entries at watched levels", matched.len());
        Some((
            message,
            TriggerDetails {
                matched_count: matched.len() as u64,
                window_count: None,
                samples: self.samples(&matched),
            },
        ))
    }

    /// 패턴을 캐시에서 찾거나 컴파일합니다. 잘못된 정규식은 규칙 격리
    /// 원칙에 따라 None을 돌려주고 경고만 남깁니다.
    fn compiled_pattern(&self, rule: &AlertRule) -> Option<Regex> {
        let pattern = rule.pattern.as_deref()?;
        if pattern.is_empty() {
            return None;
        }

        let mut cache = self.patterns.lock().ok()?;
        if let Some((cached_pattern, regex)) = cache.get(&rule.id)
            && cached_pattern == pattern
        {
            return Some(regex.clone());
        }

        match RegexBuilder::new(pattern)
            .case_insensitive(!rule.case_sensitive)
            .build()
        {
            Ok(regex) => {
                cache.insert(rule.id.clone(), (pattern.to_string(), regex.clone()));
                Some(regex)
            }
            Err(err) => {
                tracing::warn!(rule_id = %rule.id, pattern, error = %err, "invalid rule pattern");
                None
            }
        }
    }

    fn samples(&self, matched: &[&LogEntry]) -> Vec<String> {
        matched
            .iter()
            .take(self.config.sample_limit)
            .map(|e| e.message.clone())
            .collect()
    }

    /// 쿨다운 검사. 발화 허용이면 발화 시각까지 기록합니다.
    fn check_cooldown(&self, rule: &AlertRule, now: Instant) -> bool {
        let Ok(mut cooldowns) = self.cooldowns.lock() else {
            return false;
        };
        if !cooldowns.should_fire_at(rule, now) {
            metrics::counter!(metric_names::ALERTS_SUPPRESSED_TOTAL).increment(1);
            tracing::debug!(rule_id = %rule.id, "alert suppressed by cooldown");
            return false;
        }
        cooldowns.mark_fired_at(&rule.id, now);
        true
    }

    /// 알림을 기록하고 전달 요청을 넘깁니다. 어느 쪽의 실패도 발화 자체를
    /// 되돌리지 않습니다.
    async fn commit(&self, rule: &AlertRule, alert: Alert) {
        metrics::counter!(
            metric_names::ALERTS_FIRED_TOTAL,
            "kind" => rule.kind.as_str(),
            "severity" => rule.severity.as_str(),
        )
        .increment(1);
        tracing::info!(
            alert_id = %alert.id,
            rule_id = %rule.id,
            project_id = %rule.project_id,
            severity = %rule.severity,
            "alert fired"
        );

        if let Err(err) = self.alert_store.record(alert.clone()).await {
            tracing::warn!(alert_id = %alert.id, error = %err, "failed to record alert");
        }
        if !rule.channels.is_empty() {
            self.dispatcher
                .dispatch(DeliveryRequest {
                    alert,
                    channels: rule.channels.clone(),
                })
                .await;
        }
    }
}
