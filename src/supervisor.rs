//! Policy-guarded broker connection acquisition.

use std::sync::Arc;

use tracing::{error, info};

use crate::error::FatalConnectError;
use crate::policy::{PolicyConfig, PolicyEngine};
use crate::transport::{Channel, Connection, Transport};

/// An acquired connection with an open channel on top of it.
///
/// The connection must be kept alive for as long as the channel is in
/// use; dropping the link closes both.
pub struct BrokerLink {
    pub connection: Box<dyn Connection>,
    pub channel: Box<dyn Channel>,
}

impl std::fmt::Debug for BrokerLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerLink").finish_non_exhaustive()
    }
}

/// Acquires and repairs broker connections under a retry/breaker policy.
///
/// Channel creation on an established connection is cheap and is not
/// policy-guarded.
pub struct ConnectionSupervisor {
    transport: Arc<dyn Transport>,
    uri: String,
    policy: PolicyEngine,
}

impl ConnectionSupervisor {
    pub fn new(transport: Arc<dyn Transport>, uri: impl Into<String>, config: PolicyConfig) -> Self {
        Self {
            transport,
            uri: uri.into(),
            policy: PolicyEngine::new(config, "connect"),
        }
    }

    /// Connect under the policy and open a channel.
    ///
    /// Exhausted retries or an open breaker surface as
    /// [`FatalConnectError`]; at startup the caller must stop rather
    /// than continue without a connection.
    pub async fn acquire(&self) -> Result<BrokerLink, FatalConnectError> {
        let connection = self
            .policy
            .execute(|| self.transport.connect(&self.uri))
            .await
            .map_err(|e| {
                error!(error = %e, "broker connection could not be established");
                FatalConnectError::Exhausted(e)
            })?;

        let channel = connection
            .create_channel()
            .await
            .map_err(FatalConnectError::Channel)?;

        info!("broker link acquired");
        Ok(BrokerLink { connection, channel })
    }
}
