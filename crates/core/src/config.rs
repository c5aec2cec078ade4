//! 설정 로딩과 검증.
//!
//! TOML 파일을 읽은 뒤 `LOGBRIDGE_{섹션}_{필드}` 형식의 환경 변수로
//! 개별 값을 재정의합니다. 예: `LOGBRIDGE_MANAGER_MAX_ACTIVE_PER_PROCESS=32`.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 최상위 설정.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogbridgeConfig {
    pub general: GeneralConfig,
    pub manager: ManagerConfig,
    pub processor: ProcessorConfig,
    pub alert: AlertConfig,
    pub broadcast: BroadcastConfig,
    pub server: ServerConfig,
    pub metrics: MetricsConfig,
}

/// 데몬 공통 설정.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace | debug | info | warn | error).
    pub log_level: String,
    /// 로그 출력 형식 (pretty | json).
    pub log_format: String,
    pub pid_file: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            pid_file: "/var/run/logbridge.pid".to_string(),
        }
    }
}

/// 스트림 매니저 설정.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// 연결이 지정할 수 있는 최소 폴링 주기(초).
    pub poll_interval_floor_secs: u64,
    /// 연결이 주기를 지정하지 않았을 때의 기본값(초).
    pub default_poll_interval_secs: u64,
    /// 프로세스 전체 동시 활성 연결 한도.
    pub max_active_per_process: usize,
    /// 프로젝트당 동시 활성 연결 한도.
    pub max_active_per_project: usize,
    /// 공급자 호출 타임아웃(초).
    pub call_timeout_secs: u64,
    /// 일시적 오류 재시도 한도.
    pub retry_max: u32,
    /// 지수 백오프 기준(ms)과 상한(초).
    pub backoff_base_ms: u64,
    pub backoff_cap_secs: u64,
    /// 헬스 스윕 주기(초).
    pub health_sweep_secs: u64,
    /// 폴링 주기의 이 배수 동안 성공이 없으면 중단으로 판정.
    pub stall_factor: u32,
    /// 정지 시 폴링 태스크에 주는 유예 기간(초).
    pub stop_grace_secs: u64,
    /// 연속 실패가 이 횟수에 이르면 연결을 오류 상태로 전이.
    pub error_threshold: u32,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            poll_interval_floor_secs: 5,
            default_poll_interval_secs: 30,
            max_active_per_process: 64,
            max_active_per_project: 16,
            call_timeout_secs: 30,
            retry_max: 5,
            backoff_base_ms: 500,
            backoff_cap_secs: 60,
            health_sweep_secs: 60,
            stall_factor: 3,
            stop_grace_secs: 5,
            error_threshold: 3,
        }
    }
}

impl ManagerConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}

/// 스트림 프로세서 설정.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// 연결당 중복 제거 키 보관 개수.
    pub dedup_capacity: usize,
    /// 저장소 기록 재시도 한도.
    pub persist_retry_max: u32,
    /// 저장소 재시도 백오프 기준(ms).
    pub persist_backoff_ms: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            dedup_capacity: 4096,
            persist_retry_max: 3,
            persist_backoff_ms: 200,
        }
    }
}

/// 알림 엔진 설정.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// 규칙이 쿨다운을 지정하지 않았을 때의 기본값(초).
    pub default_cooldown_secs: u64,
    /// 알림에 담는 일치 메시지 표본 상한.
    pub sample_limit: usize,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            default_cooldown_secs: 300,
            sample_limit: 5,
        }
    }
}

/// 브로드캐스트 허브 설정.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// 구독자당 송신 큐 용량.
    pub queue_capacity: usize,
    /// 큐 점유율이 이 비율을 넘으면 가장 오래된 프레임부터 버림.
    pub drop_threshold: f64,
    /// 하트비트 주기(초).
    pub heartbeat_secs: u64,
    /// 유실 통지(gap notice) 최소 간격(초).
    pub gap_notice_secs: u64,
    /// 프로세스 간 버스 채널 용량.
    pub bus_capacity: usize,
    /// 구독 직후 백필로 보내는 최근 엔트리 수.
    pub backfill_limit: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
            drop_threshold: 0.8,
            heartbeat_secs: 60,
            gap_notice_secs: 30,
            bus_capacity: 1024,
            backfill_limit: 100,
        }
    }
}

/// HTTP/WebSocket 서버 설정.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// `프로젝트ID:토큰` 형식의 정적 구독 토큰 목록.
    /// 외부 인증 서비스가 없는 환경에서 사용합니다.
    pub static_tokens: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            static_tokens: Vec::new(),
        }
    }
}

/// 메트릭 노출 설정.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 9100,
        }
    }
}

impl LogbridgeConfig {
    /// 파일에서 설정을 읽고 환경 변수 재정의와 검증까지 수행합니다.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.display().to_string(),
        })?;
        let mut config: LogbridgeConfig =
            toml::from_str(&raw).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// 파일 없이 기본값 + 환경 변수만으로 설정을 만듭니다.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// `LOGBRIDGE_{섹션}_{필드}` 환경 변수를 설정에 반영합니다.
    pub fn apply_env_overrides(&mut self) {
        override_string("LOGBRIDGE_GENERAL_LOG_LEVEL", &mut self.general.log_level);
        override_string("LOGBRIDGE_GENERAL_LOG_FORMAT", &mut self.general.log_format);
        override_string("LOGBRIDGE_GENERAL_PID_FILE", &mut self.general.pid_file);

        override_u64(
            "LOGBRIDGE_MANAGER_POLL_INTERVAL_FLOOR_SECS",
            &mut self.manager.poll_interval_floor_secs,
        );
        override_u64(
            "LOGBRIDGE_MANAGER_DEFAULT_POLL_INTERVAL_SECS",
            &mut self.manager.default_poll_interval_secs,
        );
        override_usize(
            "LOGBRIDGE_MANAGER_MAX_ACTIVE_PER_PROCESS",
            &mut self.manager.max_active_per_process,
        );
        override_usize(
            "LOGBRIDGE_MANAGER_MAX_ACTIVE_PER_PROJECT",
            &mut self.manager.max_active_per_project,
        );
        override_u64(
            "LOGBRIDGE_MANAGER_CALL_TIMEOUT_SECS",
            &mut self.manager.call_timeout_secs,
        );
        override_u32("LOGBRIDGE_MANAGER_RETRY_MAX", &mut self.manager.retry_max);
        override_u64(
            "LOGBRIDGE_MANAGER_BACKOFF_BASE_MS",
            &mut self.manager.backoff_base_ms,
        );
        override_u64(
            "LOGBRIDGE_MANAGER_BACKOFF_CAP_SECS",
            &mut self.manager.backoff_cap_secs,
        );
        override_u64(
            "LOGBRIDGE_MANAGER_HEALTH_SWEEP_SECS",
            &mut self.manager.health_sweep_secs,
        );
        override_u32("LOGBRIDGE_MANAGER_STALL_FACTOR", &mut self.manager.stall_factor);
        override_u64(
            "LOGBRIDGE_MANAGER_STOP_GRACE_SECS",
            &mut self.manager.stop_grace_secs,
        );
        override_u32(
            "LOGBRIDGE_MANAGER_ERROR_THRESHOLD",
            &mut self.manager.error_threshold,
        );

        override_usize(
            "LOGBRIDGE_PROCESSOR_DEDUP_CAPACITY",
            &mut self.processor.dedup_capacity,
        );
        override_u32(
            "LOGBRIDGE_PROCESSOR_PERSIST_RETRY_MAX",
            &mut self.processor.persist_retry_max,
        );
        override_u64(
            "LOGBRIDGE_PROCESSOR_PERSIST_BACKOFF_MS",
            &mut self.processor.persist_backoff_ms,
        );

        override_u64(
            "LOGBRIDGE_ALERT_DEFAULT_COOLDOWN_SECS",
            &mut self.alert.default_cooldown_secs,
        );
        override_usize("LOGBRIDGE_ALERT_SAMPLE_LIMIT", &mut self.alert.sample_limit);

        override_usize(
            "LOGBRIDGE_BROADCAST_QUEUE_CAPACITY",
            &mut self.broadcast.queue_capacity,
        );
        override_f64(
            "LOGBRIDGE_BROADCAST_DROP_THRESHOLD",
            &mut self.broadcast.drop_threshold,
        );
        override_u64(
            "LOGBRIDGE_BROADCAST_HEARTBEAT_SECS",
            &mut self.broadcast.heartbeat_secs,
        );
        override_u64(
            "LOGBRIDGE_BROADCAST_GAP_NOTICE_SECS",
            &mut self.broadcast.gap_notice_secs,
        );
        override_usize(
            "LOGBRIDGE_BROADCAST_BUS_CAPACITY",
            &mut self.broadcast.bus_capacity,
        );
        override_usize(
            "LOGBRIDGE_BROADCAST_BACKFILL_LIMIT",
            &mut self.broadcast.backfill_limit,
        );

        override_string("LOGBRIDGE_SERVER_BIND_ADDR", &mut self.server.bind_addr);
        override_csv("LOGBRIDGE_SERVER_STATIC_TOKENS", &mut self.server.static_tokens);

        override_bool("LOGBRIDGE_METRICS_ENABLED", &mut self.metrics.enabled);
        override_u16("LOGBRIDGE_METRICS_PORT", &mut self.metrics.port);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
        if !LOG_LEVELS.contains(&self.general.log_level.as_str()) {
            return Err(ConfigError::invalid(
                "general.log_level",
                format!("must be one of {LOG_LEVELS:?}"),
            ));
        }
        if !["pretty", "json"].contains(&self.general.log_format.as_str()) {
            return Err(ConfigError::invalid(
                "general.log_format",
                "must be 'pretty' or 'json'",
            ));
        }

        if self.manager.poll_interval_floor_secs == 0 {
            return Err(ConfigError::invalid(
                "manager.poll_interval_floor_secs",
                "must be at least 1",
            ));
        }
        if self.manager.default_poll_interval_secs < self.manager.poll_interval_floor_secs {
            return Err(ConfigError::invalid(
                "manager.default_poll_interval_secs",
                "must not be below poll_interval_floor_secs",
            ));
        }
        if self.manager.max_active_per_process == 0 {
            return Err(ConfigError::invalid(
                "manager.max_active_per_process",
                "must be at least 1",
            ));
        }
        if self.manager.max_active_per_project > self.manager.max_active_per_process {
            return Err(ConfigError::invalid(
                "manager.max_active_per_project",
                "must not exceed max_active_per_process",
            ));
        }
        if self.manager.stall_factor == 0 {
            return Err(ConfigError::invalid("manager.stall_factor", "must be at least 1"));
        }
        if self.manager.error_threshold == 0 {
            return Err(ConfigError::invalid(
                "manager.error_threshold",
                "must be at least 1",
            ));
        }

        if self.processor.dedup_capacity == 0 {
            return Err(ConfigError::invalid(
                "processor.dedup_capacity",
                "must be at least 1",
            ));
        }

        if self.broadcast.queue_capacity == 0 {
            return Err(ConfigError::invalid(
                "broadcast.queue_capacity",
                "must be at least 1",
            ));
        }
        if !(self.broadcast.drop_threshold > 0.0 && self.broadcast.drop_threshold <= 1.0) {
            return Err(ConfigError::invalid(
                "broadcast.drop_threshold",
                "must be within (0.0, 1.0]",
            ));
        }

        for token in &self.server.static_tokens {
            if token.split_once(':').is_none() {
                return Err(ConfigError::invalid(
                    "server.static_tokens",
                    "entries must be 'project_id:token'",
                ));
            }
        }

        Ok(())
    }
}

fn override_string(key: &str, target: &mut String) {
    if let Ok(value) = std::env::var(key)
        && !value.is_empty()
    {
        *target = value;
    }
}

fn override_bool(key: &str, target: &mut bool) {
    if let Ok(value) = std::env::var(key)
        && let Ok(parsed) = value.parse::<bool>()
    {
        *target = parsed;
    }
}

fn override_u16(key: &str, target: &mut u16) {
    if let Ok(value) = std::env::var(key)
        && let Ok(parsed) = value.parse::<u16>()
    {
        *target = parsed;
    }
}

fn override_u32(key: &str, target: &mut u32) {
    if let Ok(value) = std::env::var(key)
        && let Ok(parsed) = value.parse::<u32>()
    {
        *target = parsed;
    }
}

fn override_u64(key: &str, target: &mut u64) {
    if let Ok(value) = std::env::var(key)
        && let Ok(parsed) = value.parse::<u64>()
    {
        *target = parsed;
    }
}

fn override_usize(key: &str, target: &mut usize) {
    if let Ok(value) = std::env::var(key)
        && let Ok(parsed) = value.parse::<usize>()
    {
        *target = parsed;
    }
}

fn override_f64(key: &str, target: &mut f64) {
    if let Ok(value) = std::env::var(key)
        && let Ok(parsed) = value.parse::<f64>()
    {
        *target = parsed;
    }
}

fn override_csv(key: &str, target: &mut Vec<String>) {
    if let Ok(value) = std::env::var(key)
        && !value.is_empty()
    {
        *target = value
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
}
