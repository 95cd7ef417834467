//! mqpipeline
//!
//! A resilient message-broker client pair: a publisher that emits typed
//! business events and a consumer that receives and dispatches them,
//! with connection and publish operations guarded by a composable
//! retry/circuit-breaker policy.

pub mod consumer;
pub mod error;
pub mod handlers;
pub mod policy;
pub mod publisher;
pub mod supervisor;
pub mod topology;
pub mod transport;
pub mod types;

pub use consumer::{Consumer, EventHandler, HandlerTable};
pub use policy::{BreakerMode, PolicyConfig, PolicyEngine, PolicyEvent, PolicyObserver};
pub use publisher::Publisher;
pub use supervisor::{BrokerLink, ConnectionSupervisor};
pub use topology::TopologySpec;
pub use types::{BrokerConfig, Envelope, Event, Header};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::consumer::{Consumer, EventHandler, HandlerTable};
    pub use crate::policy::{PolicyConfig, PolicyEngine};
    pub use crate::publisher::Publisher;
    pub use crate::supervisor::ConnectionSupervisor;
    pub use crate::topology::TopologySpec;
    pub use crate::types::*;
}

/// Default point-to-point work queue name
pub const DEFAULT_WORK_QUEUE: &str = "message_queue-3";

/// Default fanout broadcast exchange name
pub const DEFAULT_FANOUT_EXCHANGE: &str = "message_queue";
