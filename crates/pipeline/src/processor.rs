//! 스트림 프로세서.
//!
//! 한 연결의 원시 레코드 배치를 정규화 → 중복 제거 → 영속화 순서로
//! 처리합니다. 영속화는 제한 횟수까지 재시도하며, 끝내 실패하면 배치를
//! 버리지 않고 오류를 돌려줍니다. 호출자는 그 경우 커서를 전진시키지
//! 않으므로 다음 폴에서 같은 배치가 다시 들어오고 중복 제거가 이중
//! 기록을 막습니다.

use crate::dedup::DedupTracker;
use crate::normalize::normalize_record;
use logbridge_core::error::PipelineError;
use logbridge_core::event::BatchEvent;
use logbridge_core::metrics as metric_names;
use logbridge_core::storage::LogStore;
use logbridge_core::types::{Connection, RawRecord};
use logbridge_core::config::ProcessorConfig;
use std::sync::Arc;
use std::time::Duration;

/// 한 배치의 처리 결과.
#[derive(Debug)]
pub struct ProcessedBatch {
    /// 저장소에 기록되고 팬아웃 대상이 되는 신규 엔트리 배치.
    pub event: BatchEvent,
    /// 중복 제거로 건너뛴 엔트리 수.
    pub deduped: usize,
    /// 파싱 실패로 원문만 보존한 엔트리 수.
    pub parse_failures: usize,
}

/// 연결 하나의 처리 상태를 가진 프로세서. 폴링 태스크마다 하나씩 만듭니다.
pub struct StreamProcessor {
    log_store: Arc<dyn LogStore>,
    config: ProcessorConfig,
    dedup: DedupTracker,
}

impl StreamProcessor {
    pub fn new(log_store: Arc<dyn LogStore>, config: ProcessorConfig) -> Self {
        let dedup = DedupTracker::new(config.dedup_capacity);
        Self {
            log_store,
            config,
            dedup,
        }
    }

    /// 배치를 처리합니다. 신규 엔트리가 없어도 빈 배치 이벤트를 돌려줍니다.
    pub async fn process(
        &mut self,
        connection: &Connection,
        records: Vec<RawRecord>,
    ) -> Result<ProcessedBatch, PipelineError> {
        let total = records.len();
        let mut parse_failures = 0usize;
        let mut fresh = Vec::with_capacity(total);

        for record in records {
            let entry = normalize_record(connection, record);
            if entry.is_parse_failed() {
                parse_failures += 1;
            }
            if self.dedup.insert(&entry) {
                fresh.push(entry);
            }
        }
        let deduped = total - fresh.len();

        if !fresh.is_empty() {
            self.persist(&fresh).await?;
        }

        metrics::counter!(metric_names::PIPELINE_ENTRIES_PERSISTED_TOTAL)
            .increment(fresh.len() as u64);
        metrics::counter!(metric_names::PIPELINE_ENTRIES_DEDUPED_TOTAL).increment(deduped as u64);
        metrics::counter!(metric_names::PIPELINE_PARSE_FAILURES_TOTAL)
            .increment(parse_failures as u64);

        if deduped > 0 || parse_failures > 0 {
            tracing::debug!(
                connection_id = %connection.id,
                total,
                deduped,
                parse_failures,
                "batch processed with drops"
            );
        }

        Ok(ProcessedBatch {
            event: BatchEvent::new(connection.id.clone(), connection.project_id.clone(), fresh),
            deduped,
            parse_failures,
        })
    }

    /// 배치 단위 원자 기록. 재시도 가능한 저장소 오류만 다시 시도합니다.
    async fn persist(&self, entries: &[logbridge_core::types::LogEntry]) -> Result<(), PipelineError> {
        let max_attempts = self.config.persist_retry_max.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.log_store.append(entries.to_vec()).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay =
                        Duration::from_millis(self.config.persist_backoff_ms * u64::from(attempt));
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        error = %err,
                        "log store append failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    return Err(PipelineError::PersistenceFailure {
                        attempts: attempt,
                        reason: err.to_string(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logbridge_core::error::StorageError;
    use logbridge_core::pipeline::BoxFuture;
    use logbridge_core::storage::MemoryLogStore;
    use logbridge_core::types::{LogEntry, LogLevel, ProviderKind};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn connection() -> Connection {
        Connection::new("proj-1", ProviderKind::Aws, "blob", 30)
    }

    fn aws_record(native_id: &str, millis: i64, message: &str) -> RawRecord {
        RawRecord::new(json!({ "timestamp": millis, "message": message }))
            .with_native_id(native_id)
    }

    #[tokio::test]
    async fn fresh_batch_is_persisted_and_forwarded() {
        let store = Arc::new(MemoryLogStore::new());
        let mut processor = StreamProcessor::new(store.clone(), ProcessorConfig::default());

        let batch = processor
            .process(
                &connection(),
                vec![aws_record("e-1", 1000, "one"), aws_record("e-2", 2000, "two")],
            )
            .await
            .unwrap();

        assert_eq!(batch.event.entries.len(), 2);
        assert_eq!(batch.deduped, 0);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn replayed_records_are_not_persisted_twice() {
        let store = Arc::new(MemoryLogStore::new());
        let mut processor = StreamProcessor::new(store.clone(), ProcessorConfig::default());
        let conn = connection();

        processor
            .process(&conn, vec![aws_record("e-1", 1000, "one")])
            .await
            .unwrap();
        // 커서 전진 실패 후 재폴링 시나리오: 같은 레코드 + 새 레코드
        let second = processor
            .process(
                &conn,
                vec![aws_record("e-1", 1000, "one"), aws_record("e-2", 2000, "two")],
            )
            .await
            .unwrap();

        assert_eq!(second.deduped, 1);
        assert_eq!(second.event.entries.len(), 1);
        assert_eq!(second.event.entries[0].native_id(), Some("e-2"));
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn parse_failures_are_preserved_not_dropped() {
        let store = Arc::new(MemoryLogStore::new());
        let mut processor = StreamProcessor::new(store.clone(), ProcessorConfig::default());

        let batch = processor
            .process(
                &connection(),
                vec![RawRecord::new(json!({ "unexpected": "shape" }))],
            )
            .await
            .unwrap();

        assert_eq!(batch.parse_failures, 1);
        assert_eq!(batch.event.entries.len(), 1);
        assert!(batch.event.entries[0].is_parse_failed());
        assert_eq!(store.len(), 1);
    }

    /// 지정 횟수만큼 실패한 뒤 성공하는 저장소.
    struct FlakyStore {
        fail_times: AtomicU32,
        inner: MemoryLogStore,
    }

    impl FlakyStore {
        fn new(fail_times: u32) -> Self {
            Self {
                fail_times: AtomicU32::new(fail_times),
                inner: MemoryLogStore::new(),
            }
        }
    }

    impl LogStore for FlakyStore {
        fn append(&self, entries: Vec<LogEntry>) -> BoxFuture<'_, Result<(), StorageError>> {
            Box::pin(async move {
                if self.fail_times.load(Ordering::SeqCst) > 0 {
                    self.fail_times.fetch_sub(1, Ordering::SeqCst);
                    return Err(StorageError::Unavailable("flaky".to_string()));
                }
                self.inner.append(entries).await
            })
        }

        fn count_since<'a>(
            &'a self,
            project_id: &'a str,
            levels: &'a [LogLevel],
            since: chrono::DateTime<chrono::Utc>,
        ) -> BoxFuture<'a, Result<u64, StorageError>> {
            self.inner.count_since(project_id, levels, since)
        }

        fn recent<'a>(
            &'a self,
            project_id: &'a str,
            limit: usize,
        ) -> BoxFuture<'a, Result<Vec<LogEntry>, StorageError>> {
            self.inner.recent(project_id, limit)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn persist_retries_transient_store_failures() {
        let store = Arc::new(FlakyStore::new(2));
        let mut processor = StreamProcessor::new(store.clone(), ProcessorConfig::default());

        processor
            .process(&connection(), vec![aws_record("e-1", 1000, "one")])
            .await
            .unwrap();
        assert_eq!(store.inner.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn persist_gives_up_after_retry_limit() {
        let store = Arc::new(FlakyStore::new(10));
        let config = ProcessorConfig {
            persist_retry_max: 3,
            ..ProcessorConfig::default()
        };
        let mut processor = StreamProcessor::new(store.clone(), config);

        let err = processor
            .process(&connection(), vec![aws_record("e-1", 1000, "one")])
            .await
            .unwrap_err();
        match err {
            PipelineError::PersistenceFailure { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.inner.len(), 0);
    }

    /// 재폴링된 배치는 실패 후 다시 들어와도 이중 기록되지 않아야 한다.
    #[tokio::test(start_paused = true)]
    async fn failed_batch_replay_does_not_duplicate() {
        // 첫 배치는 성공, 이후 재폴링에서 같은 레코드가 다시 온다
        let store = Arc::new(MemoryLogStore::new());
        let mut processor = StreamProcessor::new(store.clone(), ProcessorConfig::default());
        let conn = connection();
        let records = vec![aws_record("e-1", 1000, "one"), aws_record("e-2", 2000, "two")];

        processor.process(&conn, records.clone()).await.unwrap();
        let replay = processor.process(&conn, records).await.unwrap();

        assert_eq!(replay.event.entries.len(), 0);
        assert_eq!(replay.deduped, 2);
        assert_eq!(store.len(), 2);
    }
}
