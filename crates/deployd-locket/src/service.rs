//! Lock service seam and its gRPC implementation.

use std::time::Duration;

use async_trait::async_trait;
use tonic::transport::Endpoint;
use tracing::info;

use crate::error::{LockError, LockResult};
use crate::proto::{LockRequest, LocketClient, ReleaseRequest};
use crate::tls::{LocketConfig, client_tls_config};

/// A distributed lock service.
///
/// `lock` both acquires and renews: repeating it before the TTL expires
/// keeps the caller the owner. It fails with [`LockError::AlreadyHeld`]
/// while someone else owns the resource.
#[async_trait]
pub trait LockService: Send + Sync {
    async fn lock(&self, request: LockRequest) -> LockResult<()>;

    async fn release(&self, request: ReleaseRequest) -> LockResult<()>;
}

/// [`LockService`] backed by a Locket server over mutual TLS.
#[derive(Debug, Clone)]
pub struct GrpcLockService {
    client: LocketClient,
}

impl GrpcLockService {
    /// Per-call deadline; renewals must finish well inside the lock TTL.
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

    /// Build a service whose channel connects on first use.
    ///
    /// An unreachable Locket is therefore not a startup error; each
    /// attempt just fails with [`LockError::Transport`] until it comes up.
    /// Must be called inside a tokio runtime.
    pub fn connect_lazy(config: &LocketConfig) -> LockResult<Self> {
        let tls = client_tls_config(config)?;
        let uri = config.endpoint_uri();
        let endpoint = Endpoint::from_shared(uri.clone())
            .map_err(|e| LockError::Config(format!("invalid endpoint {uri}: {e}")))?
            .tls_config(tls)
            .map_err(|e| LockError::Config(format!("tls for {uri}: {e}")))?
            .connect_timeout(Self::REQUEST_TIMEOUT)
            .timeout(Self::REQUEST_TIMEOUT);

        info!(%uri, "locket client configured");
        Ok(Self {
            client: LocketClient::new(endpoint.connect_lazy()),
        })
    }
}

#[async_trait]
impl LockService for GrpcLockService {
    async fn lock(&self, request: LockRequest) -> LockResult<()> {
        let mut client = self.client.clone();
        client.lock(request).await?;
        Ok(())
    }

    async fn release(&self, request: ReleaseRequest) -> LockResult<()> {
        let mut client = self.client.clone();
        client.release(request).await?;
        Ok(())
    }
}
