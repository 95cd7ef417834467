//! Idempotent declaration of the exchange/queue/binding graph.

use tracing::info;

use crate::error::TopologyError;
use crate::transport::Channel;
use crate::types::BrokerConfig;

/// The two shapes the pipeline publishes into: a point-to-point work
/// queue addressed by name, and a fanout exchange broadcasting to every
/// bound queue.
#[derive(Debug, Clone)]
pub struct TopologySpec {
    pub work_queue: String,
    pub fanout_exchange: String,
    pub broadcast_queues: Vec<String>,
}

impl TopologySpec {
    pub fn from_config(config: &BrokerConfig) -> Self {
        Self {
            work_queue: config.work_queue.clone(),
            fanout_exchange: config.fanout_exchange.clone(),
            broadcast_queues: config.broadcast_queues.clone(),
        }
    }

    /// Declare the full graph on the given channel.
    ///
    /// Safe to call repeatedly; AMQP declares with identical parameters
    /// are no-ops.
    pub async fn ensure(&self, channel: &dyn Channel) -> Result<(), TopologyError> {
        channel.declare_queue(&self.work_queue).await?;
        channel.declare_fanout_exchange(&self.fanout_exchange).await?;
        for queue in &self.broadcast_queues {
            channel.declare_queue(queue).await?;
            channel.bind_queue(queue, &self.fanout_exchange).await?;
        }
        info!(
            work_queue = %self.work_queue,
            exchange = %self.fanout_exchange,
            broadcast_queues = self.broadcast_queues.len(),
            "topology ensured"
        );
        Ok(())
    }
}
