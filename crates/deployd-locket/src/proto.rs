//! Locket wire messages and gRPC client stub.
//!
//! Mirrors the `models` package of the Locket service:
//!
//! ```text
//! service Locket {
//!   rpc Lock(LockRequest) returns (LockResponse);
//!   rpc Release(ReleaseRequest) returns (ReleaseResponse);
//! }
//! ```
//!
//! Only the two RPCs the updater needs are exposed.

use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::Channel;

/// A lockable resource.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Resource {
    #[prost(string, tag = "1")]
    pub key: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub owner: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub value: ::prost::alloc::string::String,
    #[prost(enumeration = "TypeCode", tag = "5")]
    pub type_code: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum TypeCode {
    Unknown = 0,
    Lock = 1,
    Presence = 2,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LockRequest {
    #[prost(message, optional, tag = "1")]
    pub resource: ::core::option::Option<Resource>,
    #[prost(int64, tag = "2")]
    pub ttl_in_seconds: i64,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct LockResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReleaseRequest {
    #[prost(message, optional, tag = "1")]
    pub resource: ::core::option::Option<Resource>,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct ReleaseResponse {}

/// Unary client for the Locket service.
#[derive(Debug, Clone)]
pub struct LocketClient {
    inner: tonic::client::Grpc<Channel>,
}

impl LocketClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: tonic::client::Grpc::new(channel),
        }
    }

    /// Acquire or renew a lock.
    pub async fn lock(
        &mut self,
        request: LockRequest,
    ) -> Result<tonic::Response<LockResponse>, tonic::Status> {
        self.unary(request, "/models.Locket/Lock").await
    }

    /// Release a lock held by the request's owner.
    pub async fn release(
        &mut self,
        request: ReleaseRequest,
    ) -> Result<tonic::Response<ReleaseResponse>, tonic::Status> {
        self.unary(request, "/models.Locket/Release").await
    }

    async fn unary<Req, Resp>(
        &mut self,
        request: Req,
        path: &'static str,
    ) -> Result<tonic::Response<Resp>, tonic::Status>
    where
        Req: ::prost::Message + Send + Sync + 'static,
        Resp: ::prost::Message + Default + Send + Sync + 'static,
    {
        self.inner
            .ready()
            .await
            .map_err(|e| tonic::Status::unavailable(format!("service was not ready: {e}")))?;
        let codec = tonic::codec::ProstCodec::<Req, Resp>::default();
        self.inner
            .unary(
                tonic::Request::new(request),
                PathAndQuery::from_static(path),
                codec,
            )
            .await
    }
}
