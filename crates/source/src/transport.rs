//! HTTP 전송 계층 추상화.
//!
//! 어댑터는 [`HttpTransport`]만 알고, 실제 네트워크는 [`ReqwestTransport`]가
//! 담당합니다. 테스트는 모의 전송 계층으로 어댑터를 네트워크 없이 검증합니다.
//! HTTP 상태를 오류 분류로 바꾸는 규칙도 이 모듈에 있습니다.

use logbridge_core::error::SourceError;
use logbridge_core::pipeline::BoxFuture;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// 전송 계층에 넘기는 요청.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl TransportRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: Vec::new(),
            body: Some(body),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn bearer(self, token: &str) -> Self {
        self.header("authorization", format!("Bearer {token}"))
    }
}

/// 전송 계층 응답. 상태 분류 전의 원시 형태입니다.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
    /// 429 응답의 Retry-After 헤더 값.
    pub retry_after: Option<Duration>,
}

impl TransportResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
            retry_after: None,
        }
    }

    /// 상태 코드를 분류하고 성공이면 본문을 JSON으로 해석합니다.
    ///
    /// - 2xx: 성공
    /// - 401/403: 인증 오류
    /// - 429, 5xx: 일시적 오류 (429는 Retry-After 반영)
    /// - 그 외 4xx: 영구적 오류
    pub fn into_json(self) -> Result<serde_json::Value, SourceError> {
        match self.status {
            200..=299 => serde_json::from_str(&self.body).map_err(|e| {
                SourceError::permanent(format!("malformed provider response: {e}"))
            }),
            401 | 403 => Err(SourceError::auth(format!(
                "provider rejected credentials (status {}): {}",
                self.status,
                truncate(&self.body)
            ))),
            429 => {
                let reason = format!("rate limited: {}", truncate(&self.body));
                match self.retry_after {
                    Some(after) => Err(SourceError::transient_after(reason, after)),
                    None => Err(SourceError::transient(reason)),
                }
            }
            500..=599 => Err(SourceError::transient(format!(
                "provider server error (status {}): {}",
                self.status,
                truncate(&self.body)
            ))),
            other => Err(SourceError::permanent(format!(
                "provider rejected request (status {other}): {}",
                truncate(&self.body)
            ))),
        }
    }
}

fn truncate(body: &str) -> &str {
    let end = body
        .char_indices()
        .nth(200)
        .map(|(i, _)| i)
        .unwrap_or(body.len());
    &body[..end]
}

/// HTTP 전송 트레이트. 네트워크 수준 실패만 오류로 돌려주고
/// 상태 코드 분류는 [`TransportResponse::into_json`]에 맡깁니다.
pub trait HttpTransport: Send + Sync {
    fn execute(
        &self,
        request: TransportRequest,
    ) -> BoxFuture<'_, Result<TransportResponse, SourceError>>;
}

/// reqwest 기반 프로덕션 전송 계층.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(call_timeout: Duration) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(call_timeout)
            .build()
            .map_err(|e| SourceError::permanent(format!("failed to build http client: {e}")))?;
        Ok(Self { client })
    }
}

impl HttpTransport for ReqwestTransport {
    fn execute(
        &self,
        request: TransportRequest,
    ) -> BoxFuture<'_, Result<TransportResponse, SourceError>> {
        Box::pin(async move {
            let mut builder = match request.method {
                HttpMethod::Get => self.client.get(&request.url),
                HttpMethod::Post => self.client.post(&request.url),
            };
            for (name, value) in &request.headers {
                builder = builder.header(name, value);
            }
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }

            let response = builder.send().await.map_err(|e| {
                if e.is_timeout() {
                    SourceError::transient(format!("provider call timed out: {e}"))
                } else if e.is_connect() {
                    SourceError::transient(format!("failed to reach provider: {e}"))
                } else {
                    SourceError::permanent(format!("http request failed: {e}"))
                }
            })?;

            let status = response.status().as_u16();
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = response.text().await.map_err(|e| {
                SourceError::transient(format!("failed to read provider response: {e}"))
            })?;

            Ok(TransportResponse {
                status,
                body,
                retry_after,
            })
        })
    }
}

#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// 요청을 기록하고 준비된 응답을 돌려주는 모의 전송 계층.
    pub struct RecordingTransport {
        responses: Mutex<VecDeque<Result<TransportResponse, SourceError>>>,
        fallback: Option<TransportResponse>,
        requests: Mutex<Vec<TransportRequest>>,
    }

    impl RecordingTransport {
        /// 모든 요청에 같은 응답을 돌려줍니다.
        pub fn replying(response: TransportResponse) -> Self {
            Self {
                responses: Mutex::new(VecDeque::new()),
                fallback: Some(response),
                requests: Mutex::new(Vec::new()),
            }
        }

        /// 준비된 응답을 순서대로 소진합니다.
        pub fn with_sequence(responses: Vec<Result<TransportResponse, SourceError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                fallback: None,
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn last_request(&self) -> Option<TransportRequest> {
            self.requests.lock().unwrap().last().cloned()
        }

        pub fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    impl HttpTransport for RecordingTransport {
        fn execute(
            &self,
            request: TransportRequest,
        ) -> BoxFuture<'_, Result<TransportResponse, SourceError>> {
            Box::pin(async move {
                self.requests.lock().unwrap().push(request);
                if let Some(next) = self.responses.lock().unwrap().pop_front() {
                    return next;
                }
                match &self.fallback {
                    Some(response) => Ok(response.clone()),
                    None => Err(SourceError::permanent("mock transport exhausted")),
                }
            })
        }
    }
}
