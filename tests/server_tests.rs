use socket_relay::config::ServerConfig;
use socket_relay::connection::ConnectionHandle;
use socket_relay::error::Error;
use socket_relay::server::WSServer;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Duration};

const HANDSHAKE: &[u8] = b"GET /chat HTTP/1.1\r\n\
    Host: x\r\n\
    Upgrade: websocket\r\n\
    Connection: Upgrade\r\n\
    Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
    Sec-WebSocket-Version: 13\r\n\r\n";

const MASK_KEY: [u8; 4] = [0x37, 0xFA, 0x21, 0x3D];

fn config(port: u16) -> ServerConfig {
    ServerConfig {
        port,
        ..ServerConfig::default()
    }
}

fn start_server(port: u16) {
    let server = WSServer::new(config(port));
    let _ = tokio::spawn(server.listen());
}

async fn connect(port: u16) -> TcpStream {
    for _ in 0..50 {
        if let Ok(stream) = TcpStream::connect(("127.0.0.1", port)).await {
            return stream;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("server never came up on port {}", port);
}

async fn read_http_response(stream: &mut TcpStream) -> String {
    let mut buffer = Vec::new();
    let mut byte = [0u8; 1];
    while !buffer.ends_with(b"\r\n\r\n") {
        let size = timeout(Duration::from_secs(5), stream.read(&mut byte))
            .await
            .expect("timed out reading handshake response")
            .expect("read failed");
        assert!(size > 0, "stream closed during handshake");
        buffer.extend_from_slice(&byte);
    }
    String::from_utf8(buffer).unwrap()
}

/// Connect and complete the opening handshake.
async fn open_client(port: u16) -> TcpStream {
    let mut stream = connect(port).await;
    stream.write_all(HANDSHAKE).await.unwrap();

    let response = read_http_response(&mut stream).await;
    assert!(response.contains("101 Switching Protocols"));
    assert!(response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
    stream
}

/// A masked client-to-server frame; `first_byte` carries FIN and opcode.
fn masked_frame(first_byte: u8, payload: &[u8]) -> Vec<u8> {
    assert!(payload.len() <= 125);

    let mut frame = vec![first_byte, 0x80 | payload.len() as u8];
    frame.extend_from_slice(&MASK_KEY);
    for (i, byte) in payload.iter().enumerate() {
        frame.push(byte ^ MASK_KEY[i % 4]);
    }
    frame
}

/// Read one small server frame: (first byte, payload).
async fn read_frame(stream: &mut TcpStream) -> (u8, Vec<u8>) {
    let mut header = [0u8; 2];
    timeout(Duration::from_secs(5), stream.read_exact(&mut header))
        .await
        .expect("timed out reading frame")
        .expect("read failed");

    assert_eq!(header[1] & 0x80, 0, "server frames must not be masked");
    let length = (header[1] & 0x7F) as usize;
    assert!(length <= 125, "tests only exchange small frames");

    let mut payload = vec![0u8; length];
    timeout(Duration::from_secs(5), stream.read_exact(&mut payload))
        .await
        .expect("timed out reading payload")
        .expect("read failed");
    (header[0], payload)
}

async fn read_eof(stream: &mut TcpStream) {
    let mut byte = [0u8; 1];
    let size = timeout(Duration::from_secs(5), stream.read(&mut byte))
        .await
        .expect("timed out waiting for close")
        .expect("read failed");
    assert_eq!(size, 0, "expected the server to close the stream");
}

#[tokio::test]
async fn handshake_is_accepted() {
    start_server(9301);
    let _client = open_client(9301).await;
}

#[tokio::test]
async fn handshake_with_bad_method_is_rejected_silently() {
    start_server(9302);
    let mut stream = connect(9302).await;

    let request = String::from_utf8(HANDSHAKE.to_vec())
        .unwrap()
        .replace("GET", "POST");
    stream.write_all(request.as_bytes()).await.unwrap();

    // no response bytes, just a closed stream
    read_eof(&mut stream).await;
}

#[tokio::test]
async fn text_message_is_broadcast_back() {
    start_server(9303);
    let mut client = open_client(9303).await;

    client
        .write_all(&masked_frame(0x81, b"Hello"))
        .await
        .unwrap();

    let (first_byte, payload) = read_frame(&mut client).await;
    assert_eq!(first_byte, 0x81);
    assert_eq!(payload, b"Hello");
}

#[tokio::test]
async fn ping_gets_exactly_one_pong() {
    start_server(9304);
    let mut client = open_client(9304).await;

    client.write_all(&masked_frame(0x89, b"")).await.unwrap();

    let (first_byte, payload) = read_frame(&mut client).await;
    assert_eq!(first_byte, 0x8A);
    assert!(payload.is_empty());
}

#[tokio::test]
async fn fragmented_message_is_reassembled_before_broadcast() {
    start_server(9305);
    let mut client = open_client(9305).await;

    // "Hello" as text + two continuations
    client
        .write_all(&masked_frame(0x01, b"He"))
        .await
        .unwrap();
    client
        .write_all(&masked_frame(0x00, b"ll"))
        .await
        .unwrap();
    client.write_all(&masked_frame(0x80, b"o")).await.unwrap();

    let (first_byte, payload) = read_frame(&mut client).await;
    assert_eq!(first_byte, 0x81);
    assert_eq!(payload, b"Hello");
}

#[tokio::test]
async fn broadcast_reaches_every_peer() {
    start_server(9306);
    let mut sender = open_client(9306).await;
    let mut receiver = open_client(9306).await;

    // give the dispatcher time to process both joins
    sleep(Duration::from_millis(150)).await;

    sender.write_all(&masked_frame(0x81, b"hi")).await.unwrap();

    let (_, payload) = read_frame(&mut receiver).await;
    assert_eq!(payload, b"hi");
    let (_, payload) = read_frame(&mut sender).await;
    assert_eq!(payload, b"hi");
}

#[tokio::test]
async fn close_frame_removes_peer_and_fires_on_close_once() {
    let closed = Arc::new(AtomicUsize::new(0));
    let closed_count = closed.clone();

    let mut server = WSServer::new(config(9307));
    server.on_close(move |_| {
        closed_count.fetch_add(1, Ordering::SeqCst);
    });
    let _ = tokio::spawn(server.listen());

    let mut client = open_client(9307).await;
    client.write_all(&masked_frame(0x88, b"")).await.unwrap();

    // the close is echoed, then the stream is released
    let (first_byte, payload) = read_frame(&mut client).await;
    assert_eq!(first_byte, 0x88);
    assert!(payload.is_empty());
    read_eof(&mut client).await;

    sleep(Duration::from_millis(200)).await;
    assert_eq!(closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn notify_and_notify_to_reach_the_peer() {
    let joined: Arc<Mutex<Option<ConnectionHandle>>> = Arc::new(Mutex::new(None));
    let joined_slot = joined.clone();

    let mut server = WSServer::new(config(9308));
    server.on_connect(move |conn| {
        *joined_slot.lock().unwrap() = Some(conn.clone());
    });
    let handle = server.handle();
    let _ = tokio::spawn(server.listen());

    let mut client = open_client(9308).await;

    let conn = loop {
        if let Some(conn) = joined.lock().unwrap().clone() {
            break conn;
        }
        sleep(Duration::from_millis(20)).await;
    };

    // server-wide broadcast, binary by default
    handle.notify(b"news".to_vec()).await.unwrap();
    let (first_byte, payload) = read_frame(&mut client).await;
    assert_eq!(first_byte, 0x82);
    assert_eq!(payload, b"news");

    // targeted send to the only peer
    handle.notify_to(b"direct".to_vec(), &conn).await.unwrap();
    let (first_byte, payload) = read_frame(&mut client).await;
    assert_eq!(first_byte, 0x82);
    assert_eq!(payload, b"direct");

    // after the peer leaves, the targeted send is refused
    client.write_all(&masked_frame(0x88, b"")).await.unwrap();
    let (first_byte, _) = read_frame(&mut client).await;
    assert_eq!(first_byte, 0x88);
    read_eof(&mut client).await;
    sleep(Duration::from_millis(200)).await;

    let result = handle.notify_to(b"late".to_vec(), &conn).await;
    assert!(matches!(result, Err(Error::NotConnected)));
}

#[tokio::test]
async fn shutdown_closes_live_connections() {
    let server = WSServer::new(config(9309));
    let handle = server.handle();
    let server_task = tokio::spawn(server.listen());

    let mut client = open_client(9309).await;
    sleep(Duration::from_millis(100)).await;

    handle.shutdown();

    // the server says goodbye with a close frame, then releases the stream
    let (first_byte, payload) = read_frame(&mut client).await;
    assert_eq!(first_byte, 0x88);
    assert!(payload.is_empty());
    read_eof(&mut client).await;

    let result = timeout(Duration::from_secs(5), server_task)
        .await
        .expect("server did not shut down")
        .expect("server task panicked");
    assert!(result.is_ok());
}
