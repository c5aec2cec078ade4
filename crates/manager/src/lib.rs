#![doc = include_str!("../README.md")]
//!
//! ```text
//! logbridge-manager
//! ├── registry     ConnectionRegistry (상태 전이, 한도, 태스크 보관)
//! ├── credentials  CredentialResolver + PlaintextResolver
//! ├── poller       연결당 폴링 루프
//! └── manager      StreamManager (공개 연산, 헬스 스윕, Pipeline)
//! ```

pub mod credentials;
pub mod manager;
pub mod poller;
pub mod registry;

pub use credentials::{CredentialResolver, PlaintextResolver};
pub use manager::{AdapterProvider, HttpAdapterProvider, ManagerDeps, StreamManager};
pub use registry::{ConnectionRegistry, ConnectionSummary, SharedRegistry};
