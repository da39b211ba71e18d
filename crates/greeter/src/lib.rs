//! # Greeter
//!
//! A `helloworld.Greeter` gRPC service and client where both ends authenticate
//! with X.509 certificates issued by a shared CA.
//!
//! ## Architecture
//!
//! ```text
//! greeter-client                                   greeter-server
//! ┌────────────────────┐                           ┌────────────────────┐
//! │ GreetingClient     │                           │ GreeterGrpcService │
//! │   say_hello()      │                           │   logs peer, greets│
//! └─────────┬──────────┘                           └─────────▲──────────┘
//!           │ GreeterChannel                                 │ SecuredSession
//! ┌─────────┴──────────┐      mutual TLS (h2)      ┌─────────┴──────────┐
//! │ MtlsConnector      │ ─────────────────────────►│ Listener           │
//! └────────────────────┘                           └────────────────────┘
//! ```

pub mod client;
pub mod config;
pub mod generated;
pub mod grpc;

pub use client::{say_hello, CallState, GreetingClient};
pub use config::GreeterConfig;
pub use grpc::{greeting_for, serve, GreeterGrpcService};

// Re-export generated proto types
pub use generated::{HelloReply, HelloRequest};

/// Greeter version
pub const GREETER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name greeted when the client is given none
pub const DEFAULT_NAME: &str = "world";

/// Default per-call timeout
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 1000;
