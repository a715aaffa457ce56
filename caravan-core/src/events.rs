use async_trait::async_trait;
use caravan_shared::DomainEvent;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Outbound sink for domain events (event bus, SSE fan-out, test recorder).
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        event: &DomainEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Publishes a batch after a transaction has committed. Delivery failures are logged and
/// swallowed: the state change they describe is already durable.
pub async fn publish_all(publisher: &dyn EventPublisher, events: Vec<DomainEvent>) {
    for event in events {
        if let Err(e) = publisher.publish(&event).await {
            warn!("Failed to publish {} event: {}", event.topic(), e);
        }
    }
}

/// Writes events to the log only. Used when no broker is configured.
#[derive(Debug, Default)]
pub struct LogPublisher;

#[async_trait]
impl EventPublisher for LogPublisher {
    async fn publish(
        &self,
        event: &DomainEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        debug!(topic = event.topic(), key = %event.key(), "domain event");
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<DomainEvent>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(
        &self,
        event: &DomainEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
        Ok(())
    }
}

/// Sends every event to each sink in order; the first failure is reported after all sinks ran.
pub struct FanoutPublisher {
    sinks: Vec<Arc<dyn EventPublisher>>,
}

impl FanoutPublisher {
    pub fn new(sinks: Vec<Arc<dyn EventPublisher>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl EventPublisher for FanoutPublisher {
    async fn publish(
        &self,
        event: &DomainEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.publish(event).await {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caravan_shared::models::events::MemberCancelledEvent;
    use uuid::Uuid;

    struct FailingPublisher;

    #[async_trait]
    impl EventPublisher for FailingPublisher {
        async fn publish(
            &self,
            _event: &DomainEvent,
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            Err("broker down".into())
        }
    }

    fn cancelled() -> DomainEvent {
        DomainEvent::MemberCancelled(MemberCancelledEvent {
            group_id: Uuid::new_v4(),
            member_id: Uuid::new_v4(),
            user_id: "user-1".to_string(),
            reason: "payment deadline passed".to_string(),
            occurred_at: 0,
        })
    }

    #[tokio::test]
    async fn test_fanout_reaches_every_sink_despite_failure() {
        let recorder = Arc::new(RecordingPublisher::new());
        let failing: Arc<dyn EventPublisher> = Arc::new(FailingPublisher);
        let fanout = FanoutPublisher::new(vec![failing, recorder.clone()]);

        assert!(fanout.publish(&cancelled()).await.is_err());
        assert_eq!(recorder.events().len(), 1);

        publish_all(&fanout, vec![cancelled(), cancelled()]).await;
        assert_eq!(recorder.events().len(), 3);
    }
}
