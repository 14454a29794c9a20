//! Connect/disconnect lifecycle.

use std::sync::Arc;

use tracing::{info, warn};

use super::{SessionId, SessionRegistry};
use crate::channel::{DrainPolicy, InteractiveChannel};
use crate::execution::{probe_prompt, PromptContext};
use crate::transport::{Connection, HostTarget, Transport};
use crate::Result;

/// Opens connections, bootstraps their shells and registers the result.
pub struct Connector {
    transport: Arc<dyn Transport>,
    registry: Arc<SessionRegistry>,
    policy: DrainPolicy,
}

impl Connector {
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: Arc<SessionRegistry>,
        policy: DrainPolicy,
    ) -> Self {
        Self {
            transport,
            registry,
            policy,
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Open a session and return its ID plus the initial prompt context.
    ///
    /// Any failure after the connection is established closes it again, so
    /// a failed connect never leaks a half-open session.
    pub async fn connect(&self, target: &HostTarget) -> Result<(SessionId, PromptContext)> {
        self.registry.ensure_capacity()?;

        let connection = self.transport.open(target).await?;
        let prepared = self.prepare(connection.as_ref()).await;

        let (channel, prompt) = match prepared {
            Ok(ready) => ready,
            Err(e) => {
                warn!(host = %target.host, error = %e, "shell setup failed");
                let _ = connection.close().await;
                return Err(e);
            }
        };

        match self
            .registry
            .create(&target.host, &target.username, Arc::clone(&connection), channel)
        {
            Ok(id) => {
                info!(session = %id, host = %target.host, user = %target.username, "connected");
                Ok((id, prompt))
            }
            Err(e) => {
                let _ = connection.close().await;
                Err(e)
            }
        }
    }

    async fn prepare(
        &self,
        connection: &dyn Connection,
    ) -> Result<(InteractiveChannel, PromptContext)> {
        let io = connection.open_shell().await?;
        let mut channel = InteractiveChannel::new(io, self.policy);
        channel.bootstrap().await?;
        let prompt = probe_prompt(&mut channel).await?;
        Ok((channel, prompt))
    }

    /// Close a session. Unknown IDs are ignored.
    pub async fn disconnect(&self, id: &SessionId) -> Result<bool> {
        let removed = self.registry.remove(id).await?;
        if removed {
            info!(session = %id, "disconnected");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeTransport;
    use crate::BridgeError;
    use std::collections::HashSet;

    fn connector(transport: FakeTransport, registry: Arc<SessionRegistry>) -> Connector {
        Connector::new(Arc::new(transport), registry, DrainPolicy::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_issues_unique_ids() {
        let registry = Arc::new(SessionRegistry::new());
        let connector = connector(FakeTransport::accepting("pi", "raspberry"), registry.clone());
        let target = HostTarget::new("10.0.0.2", 22, "pi", "raspberry");

        let mut seen = HashSet::new();
        for _ in 0..5 {
            let (id, prompt) = connector.connect(&target).await.unwrap();
            assert!(seen.insert(id));
            assert!(registry.get(&id).is_ok());
            assert_eq!(prompt.username, "pi");
        }
        assert_eq!(registry.count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_rejects_bad_password() {
        let registry = Arc::new(SessionRegistry::new());
        let connector = connector(FakeTransport::accepting("pi", "raspberry"), registry.clone());
        let target = HostTarget::new("10.0.0.2", 22, "pi", "wrong");

        let err = connector.connect(&target).await.unwrap_err();
        assert!(matches!(err, BridgeError::AuthenticationFailure { .. }));
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_fails_after_disconnect() {
        let registry = Arc::new(SessionRegistry::new());
        let transport = FakeTransport::accepting("pi", "raspberry");
        let connections = transport.connections();
        let connector = connector(transport, registry.clone());
        let target = HostTarget::new("10.0.0.2", 22, "pi", "raspberry");

        let (id, _) = connector.connect(&target).await.unwrap();
        assert!(connector.disconnect(&id).await.unwrap());
        assert!(matches!(
            registry.get(&id),
            Err(BridgeError::SessionNotFound(_))
        ));
        assert!(connections.lock().unwrap()[0].is_closed());

        // Second disconnect is a no-op.
        assert!(!connector.disconnect(&id).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_limit_checked_before_dialing() {
        let registry = Arc::new(SessionRegistry::with_limit(1));
        let transport = FakeTransport::accepting("pi", "raspberry");
        let connections = transport.connections();
        let connector = connector(transport, registry.clone());
        let target = HostTarget::new("10.0.0.2", 22, "pi", "raspberry");

        connector.connect(&target).await.unwrap();
        let err = connector.connect(&target).await.unwrap_err();
        assert!(matches!(err, BridgeError::SessionLimitReached(1)));
        assert_eq!(connections.lock().unwrap().len(), 1);
    }
}
