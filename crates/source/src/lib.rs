#![doc = include_str!("../README.md")]
//!
//! ```text
//! logbridge-source
//! ├── adapter    SourceAdapter 트레이트, PollBatch, 팩토리
//! ├── transport  HttpTransport 추상화 + reqwest 구현
//! ├── aws        CloudWatch Logs 계열 어댑터
//! ├── azure      Azure Monitor 계열 어댑터
//! ├── gcp        Cloud Logging 계열 어댑터
//! └── retry      지수 백오프 + 지터
//! ```

pub mod adapter;
pub mod aws;
pub mod azure;
pub mod gcp;
pub mod retry;
pub mod transport;

pub use adapter::{PollBatch, SourceAdapter, adapter_for};
pub use aws::AwsAdapter;
pub use azure::AzureAdapter;
pub use gcp::GcpAdapter;
pub use retry::backoff_delay;
pub use transport::{
    HttpMethod, HttpTransport, ReqwestTransport, TransportRequest, TransportResponse,
};
