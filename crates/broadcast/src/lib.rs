#![doc = include_str!("../README.md")]
//!
//! ```text
//! logbridge-broadcast
//! ├── protocol    ServerFrame / ClientFrame
//! ├── subscriber  SubscriberHandle + 바운디드 송신 큐
//! ├── bus         EventBus 트레이트 + InMemoryBus
//! ├── hub         BroadcastHub (팬아웃, 하트비트, 버스 중계)
//! └── stats       프로젝트별 스트림 통계
//! ```

pub mod bus;
pub mod hub;
pub mod protocol;
pub mod stats;
pub mod subscriber;

pub use bus::{BusMessage, EventBus, InMemoryBus};
pub use hub::{BroadcastHub, HubHandle};
pub use protocol::{ClientFrame, ServerFrame};
pub use stats::{ProjectStats, StatsAggregator};
pub use subscriber::SubscriberHandle;
