//! End-to-end tests: real server and client over loopback with generated certificates.

mod support;

use std::time::Duration;

use greeter::{say_hello, CallState, GreetingClient};
use greeter_common::testing::Pki;
use greeter_common::{connect, extract, GreeterError, HandshakeError};
use support::RunningServer;

const CALL_TIMEOUT: Duration = Duration::from_secs(1);

#[tokio::test]
async fn test_mutually_authenticated_greeting() {
    let pki = Pki::generate();
    let mut server = RunningServer::start(&pki).await;

    let channel = connect(
        &server.address,
        &pki.identity("client"),
        &pki.trust_root(),
        "localhost",
    )
    .await
    .unwrap();

    let server_identity = extract(channel.session()).unwrap();
    assert_eq!(server_identity.leaf_subject, "CN=greeter-server");
    assert_eq!(server_identity.issuer_subject, "CN=Greeter Test CA");

    let message = say_hello(&channel, "world", CALL_TIMEOUT).await.unwrap();
    assert_eq!(message, "Hello world");
    assert_eq!(server.served(), vec!["world".to_string()]);

    channel.close();
    server.stop().await;
}

#[tokio::test]
async fn test_repeated_calls_are_idempotent() {
    let pki = Pki::generate();
    let server = RunningServer::start(&pki).await;

    let channel = connect(
        &server.address,
        &pki.identity("client"),
        &pki.trust_root(),
        "localhost",
    )
    .await
    .unwrap();

    let mut client = GreetingClient::new(&channel);
    assert_eq!(client.state(), CallState::Idle);

    let first = client.say_hello("x", CALL_TIMEOUT).await.unwrap();
    let second = client.say_hello("x", CALL_TIMEOUT).await.unwrap();

    assert_eq!(first, "Hello x");
    assert_eq!(second, first);
    assert_eq!(client.state(), CallState::ReplyReceived);

    channel.close();
    server.stop().await;
}

#[tokio::test]
async fn test_call_after_close_fails() {
    let pki = Pki::generate();
    let mut server = RunningServer::start(&pki).await;

    let channel = connect(
        &server.address,
        &pki.identity("client"),
        &pki.trust_root(),
        "localhost",
    )
    .await
    .unwrap();
    let mut client = GreetingClient::new(&channel);
    assert_eq!(client.say_hello("before", CALL_TIMEOUT).await.unwrap(), "Hello before");

    channel.close();

    let result = client.say_hello("after-close", CALL_TIMEOUT).await;
    assert!(result.is_err(), "call succeeded on a closed channel: {result:?}");
    assert_eq!(client.state(), CallState::Failed);
    assert_eq!(server.served(), vec!["before".to_string()]);

    server.stop().await;
}

#[tokio::test]
async fn test_dropped_channel_ends_connection() {
    let pki = Pki::generate();
    let server = RunningServer::start(&pki).await;

    let mut client = {
        let channel = connect(
            &server.address,
            &pki.identity("client"),
            &pki.trust_root(),
            "localhost",
        )
        .await
        .unwrap();
        GreetingClient::new(&channel)
    };

    assert!(client.say_hello("orphan", CALL_TIMEOUT).await.is_err());

    server.stop().await;
}

#[tokio::test]
async fn test_self_signed_client_is_rejected_before_any_handler() {
    let pki = Pki::generate();
    let mut server = RunningServer::start(&pki).await;

    let err = connect(
        &server.address,
        &pki.identity("rogue"),
        &pki.trust_root(),
        "localhost",
    )
    .await
    .unwrap_err();

    assert!(
        matches!(err, GreeterError::Handshake(_) | GreeterError::Connection(_)),
        "unexpected error: {err}"
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(server.served().is_empty());

    server.stop().await;
}

#[tokio::test]
async fn test_client_refuses_untrusted_server() {
    let pki = Pki::generate();
    let mut server = RunningServer::start(&pki).await;

    // Trusting only an unrelated CA, the real server's chain cannot verify.
    let err = connect(
        &server.address,
        &pki.identity("client"),
        &pki.foreign_trust_root(),
        "localhost",
    )
    .await
    .unwrap_err();

    assert!(
        matches!(err, GreeterError::Handshake(HandshakeError::UntrustedChain { .. })),
        "unexpected error: {err}"
    );
    assert!(server.served().is_empty());

    server.stop().await;
}

#[tokio::test]
async fn test_server_survives_rejected_client() {
    let pki = Pki::generate();
    let server = RunningServer::start(&pki).await;

    let rogue = connect(
        &server.address,
        &pki.identity("rogue"),
        &pki.trust_root(),
        "localhost",
    )
    .await;
    assert!(rogue.is_err());

    let channel = connect(
        &server.address,
        &pki.identity("client"),
        &pki.trust_root(),
        "localhost",
    )
    .await
    .unwrap();
    let message = say_hello(&channel, "again", CALL_TIMEOUT).await.unwrap();
    assert_eq!(message, "Hello again");

    channel.close();
    server.stop().await;
}
