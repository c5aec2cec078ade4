//! 규칙별 쿨다운 추적.
//!
//! 규칙이 발화하면 쿨다운이 끝날 때까지 같은 규칙의 재발화를 억제합니다.
//! 억제된 일치는 쿨다운을 연장하지 않습니다. 연장한다면 꾸준히 일치가
//! 이어지는 규칙은 영원히 다시 발화하지 못하기 때문입니다.

use logbridge_core::types::AlertRule;
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub struct CooldownTracker {
    default_cooldown: Duration,
    last_fired: HashMap<String, Instant>,
}

impl CooldownTracker {
    pub fn new(default_cooldown: Duration) -> Self {
        Self {
            default_cooldown,
            last_fired: HashMap::new(),
        }
    }

    fn cooldown_for(&self, rule: &AlertRule) -> Duration {
        if rule.cooldown_secs == 0 {
            self.default_cooldown
        } else {
            Duration::from_secs(rule.cooldown_secs)
        }
    }

    /// 규칙이 지금 발화해도 되는지 판단합니다. 상태를 바꾸지 않습니다.
    pub fn should_fire_at(&self, rule: &AlertRule, now: Instant) -> bool {
        match self.last_fired.get(&rule.id) {
            Some(last) => now.duration_since(*last) >= self.cooldown_for(rule),
            None => true,
        }
    }

    /// 발화 시각을 기록합니다. 실제로 발화한 경우에만 호출해야 합니다.
    pub fn mark_fired_at(&mut self, rule_id: &str, now: Instant) {
        self.last_fired.insert(rule_id.to_string(), now);
    }

    /// 삭제된 규칙의 흔적 정리.
    pub fn forget(&mut self, rule_id: &str) {
        self.last_fired.remove(rule_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logbridge_core::types::RuleKind;

    fn rule(cooldown_secs: u64) -> AlertRule {
        AlertRule::new("proj-1", RuleKind::Pattern)
            .with_pattern("boom")
            .with_cooldown(cooldown_secs)
    }

    #[test]
    fn first_match_always_fires() {
        let tracker = CooldownTracker::new(Duration::from_secs(300));
        assert!(tracker.should_fire_at(&rule(60), Instant::now()));
    }

    #[test]
    fn suppressed_within_cooldown_then_fires_after() {
        let mut tracker = CooldownTracker::new(Duration::from_secs(300));
        let rule = rule(60);
        let t0 = Instant::now();

        assert!(tracker.should_fire_at(&rule, t0));
        tracker.mark_fired_at(&rule.id, t0);

        // 10초 뒤의 일치는 억제된다
        assert!(!tracker.should_fire_at(&rule, t0 + Duration::from_secs(10)));
        // 70초 뒤에는 쿨다운(60초)이 끝나 다시 발화한다
        assert!(tracker.should_fire_at(&rule, t0 + Duration::from_secs(70)));
    }

    #[test]
    fn suppression_does_not_extend_cooldown() {
        let mut tracker = CooldownTracker::new(Duration::from_secs(300));
        let rule = rule(60);
        let t0 = Instant::now();
        tracker.mark_fired_at(&rule.id, t0);

        // 억제된 일치(mark 없음)가 여러 번 있어도 만료 시점은 그대로
        assert!(!tracker.should_fire_at(&rule, t0 + Duration::from_secs(30)));
        assert!(!tracker.should_fire_at(&rule, t0 + Duration::from_secs(59)));
        assert!(tracker.should_fire_at(&rule, t0 + Duration::from_secs(60)));
    }

    #[test]
    fn zero_cooldown_uses_engine_default() {
        let mut tracker = CooldownTracker::new(Duration::from_secs(300));
        let rule = rule(0);
        let t0 = Instant::now();
        tracker.mark_fired_at(&rule.id, t0);

        assert!(!tracker.should_fire_at(&rule, t0 + Duration::from_secs(100)));
        assert!(tracker.should_fire_at(&rule, t0 + Duration::from_secs(300)));
    }

    #[test]
    fn rules_are_tracked_independently() {
        let mut tracker = CooldownTracker::new(Duration::from_secs(300));
        let first = rule(60);
        let second = rule(60);
        let t0 = Instant::now();
        tracker.mark_fired_at(&first.id, t0);

        assert!(!tracker.should_fire_at(&first, t0 + Duration::from_secs(1)));
        assert!(tracker.should_fire_at(&second, t0 + Duration::from_secs(1)));
    }

    #[test]
    fn forget_clears_rule_state() {
        let mut tracker = CooldownTracker::new(Duration::from_secs(300));
        let rule = rule(60);
        let t0 = Instant::now();
        tracker.mark_fired_at(&rule.id, t0);
        tracker.forget(&rule.id);
        assert!(tracker.should_fire_at(&rule, t0 + Duration::from_secs(1)));
    }
}
