//! Generated protobuf types for the Greeter service
//!
//! These types are designed to match the `helloworld` proto definition:
//!
//! ```text
//! service Greeter {
//!   rpc SayHello (HelloRequest) returns (HelloReply) {}
//! }
//! ```

pub mod helloworld {
    use prost::Message;
    use serde::{Deserialize, Serialize};

    /// The request message containing the user's name
    #[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
    pub struct HelloRequest {
        #[prost(string, tag = "1")]
        pub name: String,
    }

    /// The response message containing the greeting
    #[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
    pub struct HelloReply {
        #[prost(string, tag = "1")]
        pub message: String,
    }

    /// Fully qualified service name.
    pub const SERVICE_NAME: &str = "helloworld.Greeter";

    /// Route of the `SayHello` method.
    pub const SAY_HELLO_PATH: &str = "/helloworld.Greeter/SayHello";

    /// Client for the Greeter service
    pub mod greeter_client {
        use tonic::codegen::http;
        use tonic::transport::Channel;

        /// Greeter client bound to a channel
        #[derive(Debug, Clone)]
        pub struct GreeterClient {
            inner: tonic::client::Grpc<Channel>,
        }

        impl GreeterClient {
            pub fn new(channel: Channel) -> Self {
                Self {
                    inner: tonic::client::Grpc::new(channel),
                }
            }

            /// Sends a greeting
            pub async fn say_hello(
                &mut self,
                request: impl tonic::IntoRequest<super::HelloRequest>,
            ) -> Result<tonic::Response<super::HelloReply>, tonic::Status> {
                self.inner.ready().await.map_err(|e| {
                    tonic::Status::unavailable(format!("Service was not ready: {e}"))
                })?;
                let codec = tonic::codec::ProstCodec::default();
                let path = http::uri::PathAndQuery::from_static(super::SAY_HELLO_PATH);
                self.inner.unary(request.into_request(), path, codec).await
            }
        }
    }

    /// Server side of the Greeter service
    pub mod greeter_server {
        use std::convert::Infallible;

        use tonic::codegen::{async_trait, http, Arc, Body, BoxFuture, Context, Poll, Service, StdError};

        /// Trait implemented by Greeter service handlers
        #[async_trait]
        pub trait Greeter: Send + Sync + 'static {
            /// Sends a greeting
            async fn say_hello(
                &self,
                request: tonic::Request<super::HelloRequest>,
            ) -> Result<tonic::Response<super::HelloReply>, tonic::Status>;
        }

        /// Routes HTTP/2 requests to a [`Greeter`] implementation
        #[derive(Debug)]
        pub struct GreeterServer<T: Greeter> {
            inner: Arc<T>,
        }

        impl<T: Greeter> GreeterServer<T> {
            pub fn new(inner: T) -> Self {
                Self::from_arc(Arc::new(inner))
            }

            pub fn from_arc(inner: Arc<T>) -> Self {
                Self { inner }
            }
        }

        impl<T: Greeter> Clone for GreeterServer<T> {
            fn clone(&self) -> Self {
                Self {
                    inner: Arc::clone(&self.inner),
                }
            }
        }

        impl<T: Greeter> tonic::server::NamedService for GreeterServer<T> {
            const NAME: &'static str = super::SERVICE_NAME;
        }

        impl<T, B> Service<http::Request<B>> for GreeterServer<T>
        where
            T: Greeter,
            B: Body + Send + 'static,
            B::Error: Into<StdError> + Send + 'static,
        {
            type Response = http::Response<tonic::body::BoxBody>;
            type Error = Infallible;
            type Future = BoxFuture<Self::Response, Self::Error>;

            fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
                Poll::Ready(Ok(()))
            }

            fn call(&mut self, req: http::Request<B>) -> Self::Future {
                match req.uri().path() {
                    super::SAY_HELLO_PATH => {
                        let method = SayHelloSvc(Arc::clone(&self.inner));
                        Box::pin(async move {
                            let codec = tonic::codec::ProstCodec::default();
                            let mut grpc = tonic::server::Grpc::new(codec);
                            Ok(grpc.unary(method, req).await)
                        })
                    }
                    path => {
                        let status = tonic::Status::unimplemented(format!("unknown method {path}"));
                        Box::pin(async move { Ok(status.to_http()) })
                    }
                }
            }
        }

        struct SayHelloSvc<T: Greeter>(Arc<T>);

        impl<T: Greeter> tonic::server::UnaryService<super::HelloRequest> for SayHelloSvc<T> {
            type Response = super::HelloReply;
            type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;

            fn call(&mut self, request: tonic::Request<super::HelloRequest>) -> Self::Future {
                let inner = Arc::clone(&self.0);
                Box::pin(async move { inner.say_hello(request).await })
            }
        }
    }
}

pub use helloworld::*;
