#![doc = include_str!("../README.md")]
//!
//! ```text
//! logbridge-pipeline
//! ├── normalize  공급자별 RawRecord → LogEntry 변환
//! ├── dedup      연결당 바운디드 중복 제거
//! ├── processor  StreamProcessor (정규화 → 중복 제거 → 영속화)
//! └── alert      AlertEngine + CooldownTracker
//! ```

pub mod alert;
pub mod dedup;
pub mod normalize;
pub mod processor;

pub use alert::{AlertEngine, CooldownTracker};
pub use dedup::DedupTracker;
pub use normalize::normalize_record;
pub use processor::{ProcessedBatch, StreamProcessor};
