//! 소스 어댑터 공통 트레이트.
//!
//! 공급자마다 API 형태가 달라도 스트림 매니저는 [`SourceAdapter`] 하나만
//! 상대합니다. 어댑터는 응답을 레코드 단위로 쪼개기만 하고 필드 해석은
//! 스트림 프로세서에 맡깁니다.

use crate::aws::AwsAdapter;
use crate::azure::AzureAdapter;
use crate::gcp::GcpAdapter;
use crate::transport::HttpTransport;
use logbridge_core::error::SourceError;
use logbridge_core::pipeline::BoxFuture;
use logbridge_core::types::{Connection, Credentials, Cursor, ProviderKind, RawRecord};
use std::sync::Arc;

/// 한 번의 폴링 결과.
#[derive(Debug, Clone, Default)]
pub struct PollBatch {
    pub records: Vec<RawRecord>,
    /// 다음 폴링에 쓸 공급자 토큰. 새 레코드가 없으면 이전 토큰이
    /// 그대로 돌아올 수 있습니다.
    pub next_token: Option<String>,
}

/// 클라우드 로그 공급자 어댑터.
///
/// 구현은 상태를 가지지 않으며 연결/자격 증명/커서를 호출마다 받습니다.
/// 덕분에 하나의 어댑터 인스턴스를 여러 연결이 공유합니다.
pub trait SourceAdapter: Send + Sync {
    fn provider(&self) -> ProviderKind;

    /// 커서 위치부터의 증분 폴링. 새 레코드와 다음 토큰을 돌려줍니다.
    fn poll<'a>(
        &'a self,
        connection: &'a Connection,
        credentials: &'a Credentials,
        cursor: &'a Cursor,
    ) -> BoxFuture<'a, Result<PollBatch, SourceError>>;

    /// 자격 증명과 필터가 유효한지 확인하는 가벼운 호출.
    /// 멱등이며 커서를 움직이지 않습니다.
    fn test<'a>(
        &'a self,
        connection: &'a Connection,
        credentials: &'a Credentials,
    ) -> BoxFuture<'a, Result<(), SourceError>>;
}

/// 공급자 종류에 맞는 어댑터를 만듭니다.
pub fn adapter_for(
    kind: ProviderKind,
    transport: Arc<dyn HttpTransport>,
) -> Arc<dyn SourceAdapter> {
    match kind {
        ProviderKind::Aws => Arc::new(AwsAdapter::new(transport)),
        ProviderKind::Azure => Arc::new(AzureAdapter::new(transport)),
        ProviderKind::Gcp => Arc::new(GcpAdapter::new(transport)),
    }
}
