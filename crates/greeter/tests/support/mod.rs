//! Shared fixtures for integration tests: a greeter server on a loopback port
//! whose handler reports every call it serves.

#![allow(dead_code)]

use std::time::Duration;

use greeter::generated::greeter_server::Greeter;
use greeter::{serve, GreeterGrpcService, HelloReply, HelloRequest};
use greeter_common::listen;
use greeter_common::testing::Pki;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tonic::{Request, Response, Status};

/// Delegates to [`GreeterGrpcService`] and reports each invocation's name.
struct ReportingGreeter {
    calls: mpsc::UnboundedSender<String>,
}

#[tonic::async_trait]
impl Greeter for ReportingGreeter {
    async fn say_hello(
        &self,
        request: Request<HelloRequest>,
    ) -> Result<Response<HelloReply>, Status> {
        let _ = self.calls.send(request.get_ref().name.clone());
        GreeterGrpcService::new().say_hello(request).await
    }
}

/// A greeter server running on a loopback port.
pub struct RunningServer {
    pub address: String,
    calls: mpsc::UnboundedReceiver<String>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl RunningServer {
    pub async fn start(pki: &Pki) -> Self {
        let listener = listen("127.0.0.1:0", &pki.identity("server"), &pki.trust_root())
            .await
            .unwrap();
        let address = listener.local_addr().to_string();
        let (calls_tx, calls) = mpsc::unbounded_channel();
        let (tx, rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let greeter = ReportingGreeter { calls: calls_tx };
            serve(greeter, listener, async {
                let _ = rx.await;
            })
            .await
            .unwrap();
        });

        Self {
            address,
            calls,
            shutdown: Some(tx),
            task,
        }
    }

    /// Names of the calls the handler has served so far.
    pub fn served(&mut self) -> Vec<String> {
        let mut names = Vec::new();
        while let Ok(name) = self.calls.try_recv() {
            names.push(name);
        }
        names
    }

    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = tokio::time::timeout(Duration::from_secs(2), &mut self.task).await;
    }
}
