//! 자격 증명 해석.
//!
//! 연결에 저장된 `credential_blob`은 암호화된 원문이고, 복호화는 외부
//! 비밀 관리 계층의 일입니다. 매니저는 [`CredentialResolver`]를 통해
//! 폴링 직전에만 평문 자격 증명을 받습니다. 해석 실패는 인증 오류로
//! 분류되어 연결을 오류 상태로 전이시킵니다.

use logbridge_core::error::SourceError;
use logbridge_core::pipeline::BoxFuture;
use logbridge_core::types::{Connection, Credentials};
use serde::Deserialize;

pub trait CredentialResolver: Send + Sync {
    fn resolve<'a>(
        &'a self,
        connection: &'a Connection,
    ) -> BoxFuture<'a, Result<Credentials, SourceError>>;
}

#[derive(Deserialize)]
struct BlobFields {
    token: String,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    endpoint: Option<String>,
}

/// blob을 평문으로 취급하는 해석기. 개발 환경과 테스트 전용입니다.
///
/// blob이 JSON 객체면 `token` / `region` / `endpoint` 필드를 읽고,
/// 아니면 전체를 토큰으로 씁니다.
#[derive(Default)]
pub struct PlaintextResolver;

impl CredentialResolver for PlaintextResolver {
    fn resolve<'a>(
        &'a self,
        connection: &'a Connection,
    ) -> BoxFuture<'a, Result<Credentials, SourceError>> {
        Box::pin(async move {
            let blob = connection.credential_blob.trim();
            if blob.is_empty() {
                return Err(SourceError::auth("empty credential blob"));
            }

            if blob.starts_with('{') {
                let fields: BlobFields = serde_json::from_str(blob)
                    .map_err(|e| SourceError::auth(format!("malformed credential blob: {e}")))?;
                let mut credentials = Credentials::new(fields.token);
                credentials.region = fields.region;
                credentials.endpoint = fields.endpoint;
                Ok(credentials)
            } else {
                Ok(Credentials::new(blob))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logbridge_core::types::ProviderKind;

    fn connection(blob: &str) -> Connection {
        Connection::new("proj-1", ProviderKind::Aws, blob, 30)
    }

    #[tokio::test]
    async fn bare_token_blob() {
        let credentials = PlaintextResolver
            .resolve(&connection("raw-token"))
            .await
            .unwrap();
        assert_eq!(credentials.token, "raw-token");
        assert!(credentials.region.is_none());
    }

    #[tokio::test]
    async fn json_blob_with_region() {
        let credentials = PlaintextResolver
            .resolve(&connection(
                r#"{"token":"t","region":"eu-west-1","endpoint":"http://localhost:9999"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(credentials.token, "t");
        assert_eq!(credentials.region.as_deref(), Some("eu-west-1"));
        assert_eq!(credentials.endpoint.as_deref(), Some("http://localhost:9999"));
    }

    #[tokio::test]
    async fn malformed_json_blob_is_auth_error() {
        let err = PlaintextResolver
            .resolve(&connection(r#"{"token": }"#))
            .await
            .unwrap_err();
        assert!(err.is_auth());
    }

    #[tokio::test]
    async fn empty_blob_is_auth_error() {
        let err = PlaintextResolver
            .resolve(&connection("  "))
            .await
            .unwrap_err();
        assert!(err.is_auth());
    }
}
