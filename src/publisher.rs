//! Dual-destination envelope publisher.
//!
//! Every envelope goes to two places: the named work queue (directly,
//! via the default exchange) and the fanout broadcast exchange. The two
//! publishes are separate broker-visible events; a failure after the
//! first succeeds means at-least-once delivery and possible partial
//! delivery, which consumers must tolerate.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{PublishAttemptError, PublishError};
use crate::policy::{PolicyConfig, PolicyEngine};
use crate::supervisor::{BrokerLink, ConnectionSupervisor};
use crate::topology::TopologySpec;
use crate::types::Envelope;

/// Publishes envelopes under a policy tuned for channel-loss failures.
///
/// The link is held behind a mutex so concurrent `publish` callers are
/// serialized onto the single channel. A closed channel is repaired by
/// re-acquiring a fresh link through the supervisor before the publish
/// is re-attempted; retrying against a dead channel is pointless.
pub struct Publisher {
    supervisor: Arc<ConnectionSupervisor>,
    topology: TopologySpec,
    policy: PolicyEngine,
    link: Mutex<BrokerLink>,
}

impl Publisher {
    pub fn new(
        supervisor: Arc<ConnectionSupervisor>,
        topology: TopologySpec,
        policy_config: PolicyConfig,
        link: BrokerLink,
    ) -> Self {
        Self {
            supervisor,
            topology,
            policy: PolicyEngine::new(policy_config, "publish"),
            link: Mutex::new(link),
        }
    }

    /// Serialize and publish one envelope to both destinations.
    ///
    /// Messages are marked persistent so they survive a broker restart
    /// while queued.
    pub async fn publish(&self, envelope: &Envelope) -> Result<(), PublishError> {
        let body = envelope.to_bytes()?;

        self.policy
            .execute(|| self.attempt(&body))
            .await
            .map_err(PublishError::Failed)?;

        debug!(
            message_type = %envelope.header.message_type,
            correlation_id = %envelope.header.correlation_id,
            "envelope published to work queue and broadcast exchange"
        );
        Ok(())
    }

    async fn attempt(&self, body: &[u8]) -> Result<(), PublishAttemptError> {
        let mut link = self.link.lock().await;

        if !link.channel.is_open() {
            warn!("channel closed, re-acquiring broker link before publish");
            *link = self
                .supervisor
                .acquire()
                .await
                .map_err(PublishAttemptError::Reconnect)?;
        }

        link.channel
            .publish("", &self.topology.work_queue, true, body)
            .await?;
        link.channel
            .publish(&self.topology.fanout_exchange, "", true, body)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryBroker;
    use serde_json::json;
    use std::time::Duration;

    async fn pipeline(broker: &MemoryBroker) -> Publisher {
        let supervisor = Arc::new(ConnectionSupervisor::new(
            Arc::new(broker.clone()),
            "memory://",
            PolicyConfig::default(),
        ));
        let link = supervisor.acquire().await.unwrap();
        let topology = TopologySpec {
            work_queue: "message_queue-3".to_string(),
            fanout_exchange: "message_queue".to_string(),
            broadcast_queues: vec![
                "message_received-1".to_string(),
                "message_received-2".to_string(),
            ],
        };
        topology.ensure(link.channel.as_ref()).await.unwrap();
        Publisher::new(
            supervisor,
            topology,
            PolicyConfig {
                breaker_open: Duration::from_secs(15),
                ..Default::default()
            },
            link,
        )
    }

    fn envelope() -> Envelope {
        Envelope::new("NewCustomer", "test", json!({"customerId": "C-1"}))
    }

    #[tokio::test(start_paused = true)]
    async fn test_dual_publish_reaches_work_queue_and_every_bound_queue() {
        let broker = MemoryBroker::new();
        let publisher = pipeline(&broker).await;

        publisher.publish(&envelope()).await.unwrap();

        assert_eq!(broker.queue_depth("message_queue-3"), 1);
        assert_eq!(broker.queue_depth("message_received-1"), 1);
        assert_eq!(broker.queue_depth("message_received-2"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_reconnects_after_channel_loss() {
        let broker = MemoryBroker::new();
        let publisher = pipeline(&broker).await;

        broker.close_all_channels();

        publisher.publish(&envelope()).await.unwrap();
        assert_eq!(broker.queue_depth("message_queue-3"), 1);
        assert_eq!(broker.queue_depth("message_received-1"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_fails_when_reconnect_keeps_failing() {
        let broker = MemoryBroker::new();
        let publisher = pipeline(&broker).await;

        broker.close_all_channels();
        broker.fail_connects(u32::MAX);

        let err = publisher.publish(&envelope()).await.unwrap_err();
        assert!(matches!(err, PublishError::Failed(_)));
        assert_eq!(broker.queue_depth("message_queue-3"), 0);
    }
}
