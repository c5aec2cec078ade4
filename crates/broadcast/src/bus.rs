//! 프로세스 간 이벤트 버스.
//!
//! 여러 Logbridge 인스턴스가 같은 프로젝트의 구독자를 나눠 가질 수 있도록
//! 발행된 프레임을 버스로 중계합니다. 메시지는 발행 인스턴스 ID를 달고
//! 다니며, 수신 측은 자기 자신이 보낸 메시지를 건너뛰어 로컬 구독자에게
//! 이중 전달되는 일을 막습니다.
//!
//! 단일 프로세스 배포와 테스트에는 [`InMemoryBus`]를 쓰고, 실제 다중
//! 인스턴스 배포에서는 외부 메시지 브로커 구현이 [`EventBus`]를 채웁니다.

use crate::protocol::ServerFrame;
use logbridge_core::error::BroadcastError;
use logbridge_core::pipeline::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// 버스로 중계되는 메시지.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusMessage {
    /// 발행한 인스턴스 ID. 수신 측 자기 발행 건너뛰기에 사용됩니다.
    pub origin: String,
    pub project_id: String,
    pub frame: ServerFrame,
}

/// 이벤트 버스 추상화.
pub trait EventBus: Send + Sync {
    fn publish(&self, message: BusMessage) -> BoxFuture<'_, Result<(), BroadcastError>>;

    /// 새 수신 채널을 엽니다. 구독 이후 발행된 메시지만 받습니다.
    fn subscribe(&self) -> broadcast::Receiver<BusMessage>;
}

/// `tokio::sync::broadcast` 기반 단일 프로세스 버스.
pub struct InMemoryBus {
    sender: broadcast::Sender<BusMessage>,
}

impl InMemoryBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }
}

impl EventBus for InMemoryBus {
    fn publish(&self, message: BusMessage) -> BoxFuture<'_, Result<(), BroadcastError>> {
        Box::pin(async move {
            // 수신자가 없는 상태는 오류가 아니다
            let _ = self.sender.send(message);
            Ok(())
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(origin: &str) -> BusMessage {
        BusMessage {
            origin: origin.to_string(),
            project_id: "proj-1".to_string(),
            frame: ServerFrame::heartbeat(),
        }
    }

    #[tokio::test]
    async fn published_messages_reach_subscribers() {
        let bus = InMemoryBus::new(16);
        let mut receiver = bus.subscribe();

        bus.publish(message("instance-a")).await.unwrap();
        let received = receiver.recv().await.unwrap();
        assert_eq!(received.origin, "instance-a");
        assert_eq!(received.project_id, "proj-1");
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let bus = InMemoryBus::new(16);
        bus.publish(message("instance-a")).await.unwrap();
    }

    #[tokio::test]
    async fn each_subscriber_gets_every_message() {
        let bus = InMemoryBus::new(16);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.publish(message("a")).await.unwrap();
        bus.publish(message("b")).await.unwrap();

        assert_eq!(first.recv().await.unwrap().origin, "a");
        assert_eq!(first.recv().await.unwrap().origin, "b");
        assert_eq!(second.recv().await.unwrap().origin, "a");
        assert_eq!(second.recv().await.unwrap().origin, "b");
    }
}
