//! Integration tests for the local channel listener: the one-shot
//! connection protocol, lifecycle transitions, socket-file handling,
//! and backpressure.

use std::path::Path;
use std::time::Duration;

use interprocess::local_socket::tokio::prelude::*;
use interprocess::local_socket::{GenericFilePath, ToFsName};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use relaycast::net::channel::{ChannelOptions, LocalChannelListener, BUSY_RESPONSE};
use relaycast::net::LifecycleState;
use relaycast::AppError;

type Stream = interprocess::local_socket::tokio::Stream;

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

async fn connect(path: &Path) -> Stream {
    let name = path
        .to_fs_name::<GenericFilePath>()
        .expect("valid socket path");
    Stream::connect(name).await.expect("connect to listener")
}

// ── protocol ─────────────────────────────────────────────────

#[tokio::test]
async fn ping_pong_roundtrip() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("chan.sock");
    let listener = LocalChannelListener::new(ChannelOptions::at_path(&path)).expect("listener");
    listener.start().expect("start");
    let mut rx = listener.messages().expect("receiver");

    let mut stream = connect(&path).await;
    stream.write_all(b"PING").await.expect("write");

    let message = tokio::time::timeout(RECV_TIMEOUT, rx.recv())
        .await
        .expect("message arrives")
        .expect("queue open");
    assert_eq!(message.content, "PING");
    message.reply.reply("PONG");

    let mut response = String::new();
    stream
        .read_to_string(&mut response)
        .await
        .expect("read reply");
    assert_eq!(response, "PONG");

    listener.stop().await;
}

#[tokio::test]
async fn trims_surrounding_whitespace() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("trim.sock");
    let listener = LocalChannelListener::new(ChannelOptions::at_path(&path)).expect("listener");
    listener.start().expect("start");
    let mut rx = listener.messages().expect("receiver");

    let mut stream = connect(&path).await;
    stream.write_all(b"  hello world \n").await.expect("write");

    let message = tokio::time::timeout(RECV_TIMEOUT, rx.recv())
        .await
        .expect("message arrives")
        .expect("queue open");
    assert_eq!(message.content, "hello world");
    message.reply.reply("OK");

    let mut response = String::new();
    stream
        .read_to_string(&mut response)
        .await
        .expect("read reply");
    assert_eq!(response, "OK");

    listener.stop().await;
}

#[tokio::test]
async fn invalid_utf8_is_decoded_lossily() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("lossy.sock");
    let listener = LocalChannelListener::new(ChannelOptions::at_path(&path)).expect("listener");
    listener.start().expect("start");
    let mut rx = listener.messages().expect("receiver");

    let mut stream = connect(&path).await;
    stream
        .write_all(b"\xff\xfe bad utf8 \xf0\x28")
        .await
        .expect("write");

    let message = tokio::time::timeout(RECV_TIMEOUT, rx.recv())
        .await
        .expect("message arrives")
        .expect("queue open");
    assert_eq!(message.content, "\u{FFFD}\u{FFFD} bad utf8 \u{FFFD}(");
    message.reply.reply("OK");

    let mut response = String::new();
    stream
        .read_to_string(&mut response)
        .await
        .expect("read reply");
    assert_eq!(response, "OK");

    listener.stop().await;
}

#[tokio::test]
async fn dropped_reply_closes_without_response() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("silent.sock");
    let listener = LocalChannelListener::new(ChannelOptions::at_path(&path)).expect("listener");
    listener.start().expect("start");
    let mut rx = listener.messages().expect("receiver");

    let mut stream = connect(&path).await;
    stream.write_all(b"silent").await.expect("write");

    let message = tokio::time::timeout(RECV_TIMEOUT, rx.recv())
        .await
        .expect("message arrives")
        .expect("queue open");
    drop(message); // drops the reply slot unanswered

    let mut response = String::new();
    tokio::time::timeout(RECV_TIMEOUT, stream.read_to_string(&mut response))
        .await
        .expect("connection closes")
        .expect("read eof");
    assert!(response.is_empty(), "no bytes expected, got: {response:?}");

    listener.stop().await;
}

#[tokio::test]
async fn busy_reply_when_queue_full() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("busy.sock");
    let mut options = ChannelOptions::at_path(&path);
    options.queue_capacity = 1;
    let listener = LocalChannelListener::new(options).expect("listener");
    listener.start().expect("start");
    let _rx = listener.messages().expect("receiver"); // held, never consumed

    let mut first = connect(&path).await;
    first.write_all(b"occupies the queue").await.expect("write first");
    // Let the first message land in the queue before the second arrives.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut second = connect(&path).await;
    second.write_all(b"overflow").await.expect("write second");

    let mut response = String::new();
    tokio::time::timeout(RECV_TIMEOUT, second.read_to_string(&mut response))
        .await
        .expect("busy reply arrives")
        .expect("read busy reply");
    assert_eq!(response, BUSY_RESPONSE);

    drop(first);
    listener.stop().await;
}

#[tokio::test]
async fn in_flight_reply_survives_stop() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("inflight.sock");
    let listener = LocalChannelListener::new(ChannelOptions::at_path(&path)).expect("listener");
    listener.start().expect("start");
    let mut rx = listener.messages().expect("receiver");

    let mut stream = connect(&path).await;
    stream.write_all(b"hold on").await.expect("write");

    let message = tokio::time::timeout(RECV_TIMEOUT, rx.recv())
        .await
        .expect("message arrives")
        .expect("queue open");

    listener.stop().await;
    message.reply.reply("LATE");

    let mut response = String::new();
    tokio::time::timeout(RECV_TIMEOUT, stream.read_to_string(&mut response))
        .await
        .expect("late reply arrives")
        .expect("read late reply");
    assert_eq!(response, "LATE");
}

// ── lifecycle and socket file ────────────────────────────────

#[tokio::test]
async fn lifecycle_and_socket_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("lifecycle.sock");
    let listener = LocalChannelListener::new(ChannelOptions::at_path(&path)).expect("listener");
    assert_eq!(listener.state(), LifecycleState::Created);
    assert_eq!(listener.bind_path(), path.as_path());
    assert!(!path.exists());

    listener.start().expect("start");
    assert!(listener.is_running());
    assert!(path.exists(), "socket file present while running");

    listener.stop().await;
    assert_eq!(listener.state(), LifecycleState::Stopped);
    assert!(!path.exists(), "socket file removed after stop");
}

#[tokio::test]
async fn second_start_is_rejected() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("double.sock");
    let listener = LocalChannelListener::new(ChannelOptions::at_path(&path)).expect("listener");
    listener.start().expect("first start");

    match listener.start() {
        Err(AppError::AlreadyRunning(_)) => {}
        other => panic!("expected already-running error, got {other:?}"),
    }

    listener.stop().await;
}

#[tokio::test]
async fn restart_after_stop_is_rejected() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("restart.sock");
    let listener = LocalChannelListener::new(ChannelOptions::at_path(&path)).expect("listener");
    listener.start().expect("start");
    listener.stop().await;

    match listener.start() {
        Err(AppError::Stopped(_)) => {}
        other => panic!("expected stopped error, got {other:?}"),
    }
}

#[tokio::test]
async fn queue_closes_after_stop() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("closing.sock");
    let listener = LocalChannelListener::new(ChannelOptions::at_path(&path)).expect("listener");
    listener.start().expect("start");
    let mut rx = listener.messages().expect("receiver");
    listener.stop().await;

    let closed = tokio::time::timeout(RECV_TIMEOUT, rx.recv())
        .await
        .expect("queue close is observed");
    assert!(closed.is_none(), "queue must end after stop");
}

#[tokio::test]
async fn stale_socket_file_is_replaced() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("stale.sock");
    std::fs::write(&path, b"").expect("plant stale file");

    let listener = LocalChannelListener::new(ChannelOptions::at_path(&path)).expect("listener");
    listener.start().expect("start replaces the stale file");

    listener.stop().await;
}

#[tokio::test]
async fn failed_bind_leaves_state_created() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("missing").join("orphan.sock");
    let listener = LocalChannelListener::new(ChannelOptions::at_path(&path)).expect("listener");

    match listener.start() {
        Err(AppError::Channel(_)) => {}
        other => panic!("expected channel error, got {other:?}"),
    }
    assert_eq!(listener.state(), LifecycleState::Created);

    // Still startable: the retry hits the bind again, not a phantom run.
    match listener.start() {
        Err(AppError::Channel(_)) => {}
        other => panic!("expected channel error on retry, got {other:?}"),
    }
    assert_eq!(listener.state(), LifecycleState::Created);
    assert!(listener.messages().is_some(), "queue must survive failed starts");
}

#[tokio::test]
async fn connect_before_start_fails() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("absent.sock");

    let name = path
        .to_fs_name::<GenericFilePath>()
        .expect("valid socket path");
    let result = Stream::connect(name).await;
    assert!(result.is_err(), "no listener must mean no connection");
}
