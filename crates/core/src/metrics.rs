//! 메트릭 이름 상수.
//!
//! 이름을 한곳에 모아 크레이트 사이의 오타 불일치를 막습니다.
//! 실제 기록은 `metrics` 퍼사드 매크로로 이루어집니다.

/// 폴링 횟수 (counter). 레이블: provider, outcome.
pub const SOURCE_POLLS_TOTAL: &str = "logbridge_source_polls_total";
/// 폴링으로 수집한 원시 레코드 수 (counter). 레이블: provider.
pub const SOURCE_RECORDS_TOTAL: &str = "logbridge_source_records_total";
/// 공급자 호출 소요 시간 (histogram). 레이블: provider.
pub const SOURCE_POLL_DURATION_SECONDS: &str = "logbridge_source_poll_duration_seconds";

/// 저장소에 기록된 엔트리 수 (counter).
pub const PIPELINE_ENTRIES_PERSISTED_TOTAL: &str = "logbridge_pipeline_entries_persisted_total";
/// 중복 제거로 건너뛴 엔트리 수 (counter).
pub const PIPELINE_ENTRIES_DEDUPED_TOTAL: &str = "logbridge_pipeline_entries_deduped_total";
/// 파싱 실패로 원문만 보존한 엔트리 수 (counter).
pub const PIPELINE_PARSE_FAILURES_TOTAL: &str = "logbridge_pipeline_parse_failures_total";
/// 발화한 알림 수 (counter). 레이블: kind, severity.
pub const ALERTS_FIRED_TOTAL: &str = "logbridge_alerts_fired_total";
/// 쿨다운으로 억제된 발화 수 (counter).
pub const ALERTS_SUPPRESSED_TOTAL: &str = "logbridge_alerts_suppressed_total";

/// 현재 구독자 수 (gauge).
pub const BROADCAST_SUBSCRIBERS: &str = "logbridge_broadcast_subscribers";
/// 구독자에게 전달된 프레임 수 (counter).
pub const BROADCAST_FRAMES_SENT_TOTAL: &str = "logbridge_broadcast_frames_sent_total";
/// 역압으로 버린 프레임 수 (counter).
pub const BROADCAST_FRAMES_DROPPED_TOTAL: &str = "logbridge_broadcast_frames_dropped_total";

/// 현재 활성 연결 수 (gauge).
pub const MANAGER_ACTIVE_CONNECTIONS: &str = "logbridge_manager_active_connections";
/// 중단 판정 횟수 (counter).
pub const MANAGER_STALLS_TOTAL: &str = "logbridge_manager_stalls_total";
/// 유예 시간 초과 강제 중단 횟수 (counter).
pub const MANAGER_UNGRACEFUL_STOPS_TOTAL: &str = "logbridge_manager_ungraceful_stops_total";

/// 데몬 가동 시간 (gauge).
pub const DAEMON_UPTIME_SECONDS: &str = "logbridge_daemon_uptime_seconds";

/// 모든 메트릭의 Prometheus 설명을 등록합니다. 레코더 설치 직후 한 번 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    describe_counter!(
        SOURCE_POLLS_TOTAL,
        "Total provider poll attempts by provider and outcome"
    );
    describe_counter!(
        SOURCE_RECORDS_TOTAL,
        "Total raw records fetched from providers"
    );
    describe_histogram!(
        SOURCE_POLL_DURATION_SECONDS,
        "Provider poll call latency in seconds"
    );

    describe_counter!(
        PIPELINE_ENTRIES_PERSISTED_TOTAL,
        "Total normalized log entries persisted to the log store"
    );
    describe_counter!(
        PIPELINE_ENTRIES_DEDUPED_TOTAL,
        "Total entries skipped as duplicates of already-seen records"
    );
    describe_counter!(
        PIPELINE_PARSE_FAILURES_TOTAL,
        "Total records preserved as parse-failed entries"
    );
    describe_counter!(
        ALERTS_FIRED_TOTAL,
        "Total alerts fired by rule kind and severity"
    );
    describe_counter!(
        ALERTS_SUPPRESSED_TOTAL,
        "Total alert firings suppressed by cooldown"
    );

    describe_gauge!(BROADCAST_SUBSCRIBERS, "Currently connected subscribers");
    describe_counter!(
        BROADCAST_FRAMES_SENT_TOTAL,
        "Total frames enqueued for subscribers"
    );
    describe_counter!(
        BROADCAST_FRAMES_DROPPED_TOTAL,
        "Total frames dropped for slow subscribers"
    );

    describe_gauge!(
        MANAGER_ACTIVE_CONNECTIONS,
        "Currently active polling connections"
    );
    describe_counter!(MANAGER_STALLS_TOTAL, "Total stalled connection detections");
    describe_counter!(
        MANAGER_UNGRACEFUL_STOPS_TOTAL,
        "Total pollers aborted after exceeding the stop grace period"
    );

    describe_gauge!(DAEMON_UPTIME_SECONDS, "Daemon uptime in seconds");
}
