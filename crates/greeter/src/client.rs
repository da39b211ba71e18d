//! Greeting client
//!
//! One call at a time over a [`GreeterChannel`], bounded by a timeout and
//! never retried.

use std::fmt;
use std::time::Duration;

use greeter_common::{CallError, GreeterChannel};
use tracing::{debug, warn};

use crate::generated::greeter_client::GreeterClient;
use crate::generated::HelloRequest;

/// Progress of the most recent call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    RequestSent,
    ReplyReceived,
    Failed,
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallState::Idle => "idle",
            CallState::RequestSent => "request-sent",
            CallState::ReplyReceived => "reply-received",
            CallState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Greeter client that tracks the state of its last call.
#[derive(Debug, Clone)]
pub struct GreetingClient {
    inner: GreeterClient,
    state: CallState,
}

impl GreetingClient {
    pub fn new(channel: &GreeterChannel) -> Self {
        Self {
            inner: GreeterClient::new(channel.rpc()),
            state: CallState::Idle,
        }
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    /// Issue one `SayHello` call, bounded by `timeout`.
    ///
    /// The timeout is also sent to the server as the call deadline. It only
    /// cancels this call; the channel stays usable.
    pub async fn say_hello(&mut self, name: &str, timeout: Duration) -> Result<String, CallError> {
        let mut request = tonic::Request::new(HelloRequest {
            name: name.to_string(),
        });
        request.set_timeout(timeout);

        self.state = CallState::RequestSent;
        debug!(name = %name, ?timeout, "Sending SayHello");

        let outcome = match tokio::time::timeout(timeout, self.inner.say_hello(request)).await {
            Ok(Ok(response)) => Ok(response.into_inner().message),
            Ok(Err(status)) => Err(CallError::from(status)),
            Err(_) => Err(CallError::Timeout { after: timeout }),
        };

        self.state = match &outcome {
            Ok(_) => CallState::ReplyReceived,
            Err(e) => {
                warn!(error = %e, "SayHello failed");
                CallState::Failed
            }
        };
        outcome
    }
}

/// Send one greeting request over `channel`.
pub async fn say_hello(
    channel: &GreeterChannel,
    name: &str,
    timeout: Duration,
) -> Result<String, CallError> {
    GreetingClient::new(channel).say_hello(name, timeout).await
}
