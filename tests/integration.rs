//! Integration tests for serial-io.
//!
//! Two engines are wired back to back over in-memory transports; raw-link
//! tests feed hand-built byte streams straight into one engine's receive
//! side.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use serial_io::transport::{memory, Transport, TransportLink};
use serial_io::{Message, MessageType, SerialIo, SerialIoConfig, SerialIoError};

/// Two engines wired to each other.
fn memory_engines() -> (SerialIo, SerialIo) {
    let (a, b) = memory::pair();
    (
        SerialIo::with_transport(Box::new(a), SerialIoConfig::default()),
        SerialIo::with_transport(Box::new(b), SerialIoConfig::default()),
    )
}

/// One engine plus a raw link writing into its receive side.
fn engine_and_raw_link() -> (SerialIo, TransportLink) {
    let (a, mut b) = memory::pair();
    let engine = SerialIo::with_transport(Box::new(a), SerialIoConfig::default());
    let link = b.connect().expect("memory link");
    (engine, link)
}

/// Collect every request payload the engine's handler sees.
fn collecting_handler(engine: &SerialIo) -> Arc<Mutex<Vec<String>>> {
    let received = Arc::new(Mutex::new(Vec::new()));
    engine.on_message({
        let received = Arc::clone(&received);
        move |msg| {
            received.lock().unwrap().push(msg.payload_text());
            async move { Ok::<_, SerialIoError>(()) }
        }
    });
    received
}

/// Build a frame by hand, allowing arbitrary type bytes.
fn raw_frame(payload: &[u8], id: u16, type_byte: u8) -> Bytes {
    let mut frame = Vec::with_capacity(11 + payload.len());
    frame.extend_from_slice(&[0xF0, 0x00, 0x00, 0x0F]);
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&id.to_be_bytes());
    frame.push(type_byte);
    frame.extend_from_slice(payload);
    Bytes::from(frame)
}

#[tokio::test]
async fn open_and_close_fire_the_lifecycle_taps() {
    let (engine, _peer) = memory_engines();

    let opened = Arc::new(AtomicBool::new(false));
    let closed = Arc::new(Mutex::new(None::<bool>));

    engine.on_open({
        let opened = Arc::clone(&opened);
        move || opened.store(true, Ordering::SeqCst)
    });
    engine.on_close({
        let closed = Arc::clone(&closed);
        move |unexpected| *closed.lock().unwrap() = Some(unexpected)
    });

    engine.open().await.unwrap();
    assert!(engine.is_open());
    assert!(opened.load(Ordering::SeqCst));

    engine.close().await.unwrap();
    assert!(!engine.is_open());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(*closed.lock().unwrap(), Some(false));
}

#[tokio::test]
async fn request_reply_round_trip() {
    let (sender, replier) = memory_engines();

    replier.on_message(|msg| async move {
        assert_eq!(msg.payload(), b"this is a test message");
        Ok::<_, SerialIoError>("this is a test reply")
    });

    sender.open().await.unwrap();
    replier.open().await.unwrap();

    let reply = sender.send_request("this is a test message").await.unwrap();

    assert_eq!(reply.message_type(), Some(MessageType::Reply));
    assert_eq!(reply.payload(), b"this is a test reply");
}

#[tokio::test]
async fn reply_carries_the_request_id() {
    let (sender, replier) = memory_engines();
    replier.on_message(|msg| async move { Ok::<_, SerialIoError>(msg.payload_text()) });

    sender.open().await.unwrap();
    replier.open().await.unwrap();

    let request = Message::create(b"echo me", MessageType::Request, sender.next_id());
    let id = request.id();
    let reply = sender.send(request).await.unwrap();

    assert_eq!(reply.id(), id);
    assert_eq!(reply.payload(), b"echo me");
}

#[tokio::test]
async fn error_reply_carries_the_handler_error_text() {
    let (sender, replier) = memory_engines();

    replier.on_message(|_msg| async move {
        Err::<(), _>(SerialIoError::Remote("this is an error".into()))
    });

    sender.open().await.unwrap();
    replier.open().await.unwrap();

    let error = sender.send_request("anything").await.unwrap_err();

    assert!(matches!(error, SerialIoError::Remote(_)));
    assert_eq!(error.to_string(), "this is an error");
}

#[tokio::test]
async fn concurrent_requests_correlate_by_id() {
    let (sender, replier) = memory_engines();
    replier.on_message(|msg| async move { Ok::<_, SerialIoError>(msg.payload_text()) });

    sender.open().await.unwrap();
    replier.open().await.unwrap();

    let (one, two) = tokio::join!(sender.send_request("one"), sender.send_request("two"));

    assert_eq!(one.unwrap().payload(), b"one");
    assert_eq!(two.unwrap().payload(), b"two");
}

#[tokio::test]
async fn ping_resolves_with_an_empty_reply() {
    let (sender, replier) = memory_engines();

    sender.open().await.unwrap();
    replier.open().await.unwrap();

    let reply = sender.ping().await.unwrap();

    assert_eq!(reply.message_type(), Some(MessageType::Reply));
    assert_eq!(reply.payload_len(), 0);
}

#[tokio::test]
async fn request_without_a_reply_times_out() {
    let (a, b) = memory::pair();
    let config = SerialIoConfig {
        timeout: Duration::from_millis(100),
        ..SerialIoConfig::default()
    };
    let engine = SerialIo::with_transport(Box::new(a), config);
    // The peer exists but never answers.
    let _peer = b;

    engine.open().await.unwrap();
    let error = engine.send_request("anyone there?").await.unwrap_err();

    assert!(matches!(error, SerialIoError::Timeout));
    assert_eq!(error.to_string(), "timeout reached");
}

#[tokio::test]
async fn garbage_around_a_frame_is_ignored() {
    let (engine, link) = engine_and_raw_link();
    let received = collecting_handler(&engine);

    engine.open().await.unwrap();

    let frame = Message::create(b"this is not garbage", MessageType::Request, 1);
    link.writer
        .write(Bytes::from_static(&[0x00, 0xCC, 0x07, 0xC9]))
        .await
        .unwrap();
    link.writer.write(frame.frame_bytes()).await.unwrap();
    link.writer
        .write(Bytes::from_static(&[0x00, 0xCC, 0x07, 0xC9]))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(*received.lock().unwrap(), vec!["this is not garbage"]);
}

#[tokio::test]
async fn three_batched_frames_dispatch_in_order() {
    let (engine, link) = engine_and_raw_link();
    let received = collecting_handler(&engine);

    engine.open().await.unwrap();

    let mut batch = Vec::new();
    for (i, payload) in ["m1", "m2", "m3"].iter().enumerate() {
        batch.extend_from_slice(
            Message::create(payload.as_bytes(), MessageType::Request, i as u16).frame(),
        );
    }
    link.writer.write(Bytes::from(batch)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(*received.lock().unwrap(), vec!["m1", "m2", "m3"]);
}

#[tokio::test]
async fn frame_split_into_three_chunks_dispatches_once() {
    let (engine, link) = engine_and_raw_link();
    let received = collecting_handler(&engine);

    engine.open().await.unwrap();

    let frame = Message::create(b"this is the first message", MessageType::Request, 9)
        .frame()
        .to_vec();
    let mid = frame.len() / 2;

    for chunk in [&frame[..6], &frame[6..mid], &frame[mid..]] {
        link.writer
            .write(Bytes::copy_from_slice(chunk))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    assert_eq!(*received.lock().unwrap(), vec!["this is the first message"]);
}

#[tokio::test]
async fn aborted_partial_frame_is_dropped() {
    let (engine, link) = engine_and_raw_link();
    let received = collecting_handler(&engine);

    engine.open().await.unwrap();

    let first = Message::create(b"this is the first message", MessageType::Request, 1)
        .frame()
        .to_vec();
    let second = Message::create(b"this is the second message", MessageType::Request, 2);

    link.writer
        .write(Bytes::copy_from_slice(&first[..13]))
        .await
        .unwrap();
    link.writer.write(second.frame_bytes()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        *received.lock().unwrap(),
        vec!["this is the second message"]
    );
}

#[tokio::test]
async fn unknown_message_types_are_dropped_without_breaking_the_link() {
    let (engine, link) = engine_and_raw_link();
    let received = collecting_handler(&engine);

    engine.open().await.unwrap();

    link.writer
        .write(raw_frame(b"mystery", 5, 0x42))
        .await
        .unwrap();
    link.writer
        .write(raw_frame(b"still alive", 6, 0x00))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(*received.lock().unwrap(), vec!["still alive"]);
}

#[tokio::test]
async fn json_requests_serialize_to_text_payloads() {
    #[derive(serde::Serialize)]
    struct Command {
        op: &'static str,
        value: u32,
    }

    let (sender, replier) = memory_engines();
    replier.on_message(|msg| async move { Ok::<_, SerialIoError>(msg.payload_text()) });

    sender.open().await.unwrap();
    replier.open().await.unwrap();

    let reply = sender
        .send_request_json(&Command {
            op: "set",
            value: 7,
        })
        .await
        .unwrap();

    assert_eq!(reply.payload(), br#"{"op":"set","value":7}"#);
}

#[tokio::test]
async fn open_on_missing_port_rejects() {
    let engine = SerialIo::new("/dev/ttyMISSING");

    let error = engine.open().await.unwrap_err();

    assert!(matches!(error, SerialIoError::Port(_)));
    assert!(!engine.is_open());
}
