//! HTTP instance reporter.
//!
//! Queries the scheduler backend at
//! `GET {base}/v1/processes/{guid}/instances`, which answers with a JSON
//! object mapping instance index to `{state, uptime, since}`.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use tracing::debug;

use deployd_state::Process;

use crate::reporter::{InstanceMap, InstancesReporter, ReporterError, ReporterResult};

/// Reporter backed by a plain HTTP/1 endpoint.
#[derive(Debug, Clone)]
pub struct HttpInstancesReporter {
    /// `host:port` to connect to.
    address: String,
    /// Path prefix from the configured URL, without a trailing slash.
    base_path: String,
    timeout: Duration,
}

impl HttpInstancesReporter {
    /// Build a reporter for a base URL such as `http://10.0.0.5:8080`.
    pub fn new(url: &str, timeout: Duration) -> ReporterResult<Self> {
        let uri: http::Uri = url
            .parse()
            .map_err(|e| ReporterError::InvalidUrl(format!("{url}: {e}")))?;

        if uri.scheme_str() != Some("http") {
            return Err(ReporterError::InvalidUrl(format!(
                "unsupported scheme in {url}, expected http"
            )));
        }
        let authority = uri
            .authority()
            .ok_or_else(|| ReporterError::InvalidUrl(format!("missing host in {url}")))?;

        Ok(Self {
            address: format!("{}:{}", authority.host(), authority.port_u16().unwrap_or(80)),
            base_path: uri.path().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    /// The `host:port` this reporter connects to.
    pub fn address(&self) -> &str {
        &self.address
    }

    fn instances_path(&self, process_guid: &str) -> String {
        format!("{}/v1/processes/{process_guid}/instances", self.base_path)
    }

    async fn get(&self, path: &str) -> ReporterResult<Bytes> {
        let uri = format!("http://{}{path}", self.address);

        let result = tokio::time::timeout(self.timeout, async {
            let stream = tokio::net::TcpStream::connect(&self.address)
                .await
                .map_err(|e| ReporterError::Unavailable(format!("connect {}: {e}", self.address)))?;

            let io = hyper_util::rt::TokioIo::new(stream);
            let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
                .await
                .map_err(|e| ReporterError::Unavailable(format!("handshake: {e}")))?;

            // Drive the connection in the background.
            tokio::spawn(async move {
                let _ = conn.await;
            });

            let req = http::Request::builder()
                .method("GET")
                .uri(&uri)
                .header("host", &self.address)
                .header("accept", "application/json")
                .header("user-agent", "deployd/0.1")
                .body(Empty::<Bytes>::new())
                .map_err(|e| ReporterError::InvalidResponse(format!("build request: {e}")))?;

            let resp = sender
                .send_request(req)
                .await
                .map_err(|e| ReporterError::Unavailable(format!("request: {e}")))?;

            let status = resp.status();
            if !status.is_success() {
                return Err(ReporterError::Unavailable(format!("{uri} returned {status}")));
            }

            let body = resp
                .into_body()
                .collect()
                .await
                .map_err(|e| ReporterError::Unavailable(format!("read body: {e}")))?;
            Ok::<_, ReporterError>(body.to_bytes())
        })
        .await;

        match result {
            Ok(inner) => inner,
            Err(_) => {
                debug!(%uri, "instances request timed out");
                Err(ReporterError::Unavailable(format!(
                    "{uri} timed out after {:?}",
                    self.timeout
                )))
            }
        }
    }
}

#[async_trait]
impl InstancesReporter for HttpInstancesReporter {
    async fn all_instances_for_process(&self, process: &Process) -> ReporterResult<InstanceMap> {
        let path = self.instances_path(&process.guid);
        let body = self.get(&path).await?;
        let instances: InstanceMap = serde_json::from_slice(&body)
            .map_err(|e| ReporterError::InvalidResponse(e.to_string()))?;
        debug!(process = %process.guid, count = instances.len(), "instances reported");
        Ok(instances)
    }
}
