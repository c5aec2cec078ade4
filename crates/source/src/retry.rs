//! 일시적 오류 재시도용 지수 백오프.
//!
//! 폴링 태스크는 일시적 오류마다 이 지연만큼 기다린 뒤 재시도합니다.
//! 공급자가 Retry-After를 지정하면 그 값을 우선합니다.

use rand::Rng;
use std::time::Duration;

/// `attempt`번째 재시도의 대기 시간을 계산합니다 (attempt는 1부터).
///
/// `base * 2^(attempt-1)`에 ±25% 지터를 더하고 `cap`으로 자릅니다.
/// `retry_after`가 있으면 지터 없이 그 값을 그대로 씁니다 (cap 적용).
pub fn backoff_delay(
    attempt: u32,
    base: Duration,
    cap: Duration,
    retry_after: Option<Duration>,
) -> Duration {
    if let Some(after) = retry_after {
        return after.min(cap);
    }

    let exponent = attempt.saturating_sub(1).min(16);
    let raw_ms = base.as_millis() as u64;
    let scaled_ms = raw_ms.saturating_mul(1u64 << exponent);
    let capped_ms = scaled_ms.min(cap.as_millis() as u64);

    // ±25% 지터로 폴링 태스크들의 재시도 시점이 몰리지 않게 한다.
    let jitter_span = (capped_ms / 4).max(1);
    let jitter = rand::rng().random_range(0..=jitter_span * 2);
    let with_jitter = capped_ms.saturating_sub(jitter_span).saturating_add(jitter);

    Duration::from_millis(with_jitter.min(cap.as_millis() as u64))
}
