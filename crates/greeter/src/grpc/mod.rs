//! gRPC service layer for the greeter

mod service;

pub use service::{greeting_for, serve, GreeterGrpcService};
