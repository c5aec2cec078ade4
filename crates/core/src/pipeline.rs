//! 구성 요소 수명 주기 트레이트.
//!
//! 스트림 매니저, 브로드캐스트 허브처럼 시작/정지/헬스 체크를 가지는
//! 장기 실행 구성 요소가 [`Pipeline`]을 구현합니다. 데몬 오케스트레이터는
//! dyn 호환 래퍼인 [`DynPipeline`]으로 이들을 일괄 관리합니다.

use crate::error::LogbridgeError;
use std::future::Future;
use std::pin::Pin;

/// dyn 트레이트 메서드가 돌려주는 박싱된 Future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// 구성 요소 헬스 상태.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    /// 동작은 하지만 주의가 필요한 상태 (예: 일부 연결 중단).
    Degraded(String),
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self, HealthStatus::Unhealthy(_))
    }
}

/// 장기 실행 구성 요소의 수명 주기.
pub trait Pipeline: Send + Sync {
    /// 구성 요소 이름. 로그와 헬스 응답에 사용됩니다.
    fn name(&self) -> &str;

    /// 백그라운드 태스크를 시작합니다. 멱등이지 않으며 두 번 호출은 오류입니다.
    fn start(&mut self) -> impl Future<Output = Result<(), LogbridgeError>> + Send;

    /// 실행 중인 태스크를 정리하고 종료합니다.
    fn stop(&mut self) -> impl Future<Output = Result<(), LogbridgeError>> + Send;

    fn health_check(&self) -> impl Future<Output = HealthStatus> + Send;
}

/// [`Pipeline`]의 dyn 호환 버전.
///
/// RPITIT 트레이트는 trait object가 될 수 없으므로, 오케스트레이터가
/// `Box<dyn DynPipeline>` 목록으로 다루도록 박싱된 시그니처를 둡니다.
pub trait DynPipeline: Send + Sync {
    fn name(&self) -> &str;
    fn start(&mut self) -> BoxFuture<'_, Result<(), LogbridgeError>>;
    fn stop(&mut self) -> BoxFuture<'_, Result<(), LogbridgeError>>;
    fn health_check(&self) -> BoxFuture<'_, HealthStatus>;
}

impl<T: Pipeline> DynPipeline for T {
    fn name(&self) -> &str {
        Pipeline::name(self)
    }

    fn start(&mut self) -> BoxFuture<'_, Result<(), LogbridgeError>> {
        Box::pin(Pipeline::start(self))
    }

    fn stop(&mut self) -> BoxFuture<'_, Result<(), LogbridgeError>> {
        Box::pin(Pipeline::stop(self))
    }

    fn health_check(&self) -> BoxFuture<'_, HealthStatus> {
        Box::pin(Pipeline::health_check(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fake {
        started: bool,
    }

    impl Pipeline for Fake {
        fn name(&self) -> &str {
            "fake"
        }

        async fn start(&mut self) -> Result<(), LogbridgeError> {
            self.started = true;
            Ok(())
        }

        async fn stop(&mut self) -> Result<(), LogbridgeError> {
            self.started = false;
            Ok(())
        }

        async fn health_check(&self) -> HealthStatus {
            if self.started {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unhealthy("not started".to_string())
            }
        }
    }

    #[tokio::test]
    async fn pipeline_usable_as_trait_object() {
        let mut boxed: Box<dyn DynPipeline> = Box::new(Fake { started: false });
        assert_eq!(boxed.name(), "fake");
        assert!(boxed.health_check().await.is_unhealthy());
        boxed.start().await.unwrap();
        assert!(boxed.health_check().await.is_healthy());
        boxed.stop().await.unwrap();
    }

    #[test]
    fn health_status_predicates() {
        assert!(HealthStatus::Healthy.is_healthy());
        assert!(!HealthStatus::Degraded("x".to_string()).is_healthy());
        assert!(HealthStatus::Unhealthy("x".to_string()).is_unhealthy());
    }
}
