//! 연결당 중복 제거.
//!
//! 최소 1회 전달(at-least-once) 폴링에서는 커서 전진 전에 실패하면 같은
//! 레코드가 다시 들어옵니다. 공급자 고유 ID가 있으면 그것을, 없으면
//! 타임스탬프+메시지의 64비트 해시를 키로 삼아 최근에 본 엔트리를
//! 걸러냅니다. 키 집합은 용량이 제한되며 가장 오래된 키부터 밀려납니다.

use logbridge_core::types::LogEntry;
use std::collections::{HashSet, VecDeque};

/// 바운디드 중복 제거 추적기. 연결마다 하나씩 둡니다.
pub struct DedupTracker {
    capacity: usize,
    seen: HashSet<String>,
    order: VecDeque<String>,
}

impl DedupTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            seen: HashSet::with_capacity(capacity.max(1)),
            order: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    /// 엔트리의 중복 제거 키.
    pub fn key_for(entry: &LogEntry) -> String {
        match entry.native_id() {
            Some(native_id) => format!("n:{native_id}"),
            None => format!(
                "h:{:016x}",
                content_hash(entry.timestamp.timestamp_millis(), &entry.message)
            ),
        }
    }

    /// 처음 보는 엔트리면 키를 등록하고 true를 돌려줍니다.
    pub fn insert(&mut self, entry: &LogEntry) -> bool {
        let key = Self::key_for(entry);
        if self.seen.contains(&key) {
            return false;
        }
        if self.order.len() == self.capacity
            && let Some(evicted) = self.order.pop_front()
        {
            self.seen.remove(&evicted);
        }
        self.seen.insert(key.clone());
        self.order.push_back(key);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// FNV-1a 64비트 해시. 안정적인 키가 목적이라 암호학적 강도는 필요 없습니다.
fn content_hash(timestamp_millis: i64, message: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = OFFSET;
    for byte in timestamp_millis
        .to_be_bytes()
        .iter()
        .chain(message.as_bytes())
    {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}
