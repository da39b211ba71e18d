//! Greeter gRPC service implementation
//!
//! Implements `helloworld.Greeter/SayHello`. Every request arrives over a
//! session whose client certificate already verified; the handler logs who
//! called and answers with a greeting.

use std::future::Future;

use greeter_common::{Listener, VerifiedPeerIdentity};
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{error, info, instrument};

use crate::generated::greeter_server::{Greeter, GreeterServer};
use crate::generated::{HelloReply, HelloRequest};

/// Greeting text for `name`.
pub fn greeting_for(name: &str) -> String {
    format!("Hello {name}")
}

/// Greeter gRPC service handler
///
/// Holds no state, so concurrent and repeated calls never affect each other.
#[derive(Debug, Clone, Copy, Default)]
pub struct GreeterGrpcService;

impl GreeterGrpcService {
    pub fn new() -> Self {
        Self
    }
}

#[tonic::async_trait]
impl Greeter for GreeterGrpcService {
    #[instrument(skip(self, request), fields(name = %request.get_ref().name))]
    async fn say_hello(
        &self,
        request: Request<HelloRequest>,
    ) -> Result<Response<HelloReply>, Status> {
        let peer = VerifiedPeerIdentity::from_request(&request).map_err(|e| {
            error!(error = %e, "SayHello reached without a verified client");
            Status::internal("peer identity unavailable")
        })?;

        info!(subject = %peer.leaf_subject, "Client Cert");
        info!(subject = %peer.issuer_subject, "Client CA Cert");

        let name = request.into_inner().name;
        info!(name = %name, "Received");

        Ok(Response::new(HelloReply {
            message: greeting_for(&name),
        }))
    }
}

/// Serve `service` over the verified sessions of `listener` until `shutdown` resolves.
pub async fn serve<S, F>(
    service: S,
    listener: Listener,
    shutdown: F,
) -> Result<(), tonic::transport::Error>
where
    S: Greeter,
    F: Future<Output = ()>,
{
    Server::builder()
        .add_service(GreeterServer::new(service))
        .serve_with_incoming_shutdown(listener, shutdown)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use greeter_common::security::{Role, VerifiedChain};
    use greeter_common::testing::Pki;
    use greeter_common::SessionInfo;

    #[test]
    fn test_greeting_for() {
        assert_eq!(greeting_for("world"), "Hello world");
        assert_eq!(greeting_for(""), "Hello ");
    }

    #[tokio::test]
    async fn test_say_hello_without_session_is_internal() {
        let service = GreeterGrpcService::new();
        let request = Request::new(HelloRequest {
            name: "world".to_string(),
        });

        let status = service.say_hello(request).await.unwrap_err();

        assert_eq!(status.code(), tonic::Code::Internal);
    }

    fn verified_request(name: &str) -> Request<HelloRequest> {
        let pki = Pki::generate();
        let chain = VerifiedChain::reconstruct(&[pki.client_der()], &pki.trust_root()).unwrap();
        let mut request = Request::new(HelloRequest {
            name: name.to_string(),
        });
        request.extensions_mut().insert(SessionInfo::new(
            "127.0.0.1:50051".parse().unwrap(),
            Role::Server,
            Some(chain),
        ));
        request
    }

    #[tokio::test]
    async fn test_say_hello_with_verified_session() {
        let service = GreeterGrpcService::new();
        let reply = service.say_hello(verified_request("world")).await.unwrap();
        assert_eq!(reply.into_inner().message, "Hello world");
    }

    #[tokio::test]
    async fn test_repeated_calls_leave_service_unchanged() {
        let service = GreeterGrpcService::new();

        let first = service.say_hello(verified_request("x")).await.unwrap();
        let second = service.say_hello(verified_request("x")).await.unwrap();

        assert_eq!(first.into_inner(), second.into_inner());
        // No fields, so nothing a call could have changed.
        assert_eq!(std::mem::size_of::<GreeterGrpcService>(), 0);
    }

    #[tokio::test]
    async fn test_say_hello_with_unverified_session_is_internal() {
        let service = GreeterGrpcService::new();
        let mut request = Request::new(HelloRequest {
            name: "world".to_string(),
        });
        request.extensions_mut().insert(SessionInfo::new(
            "127.0.0.1:50051".parse().unwrap(),
            Role::Server,
            None,
        ));

        let status = service.say_hello(request).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::Internal);
    }
}
