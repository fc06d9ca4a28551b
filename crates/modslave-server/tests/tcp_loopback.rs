use modslave_server::{
    ConnState, ModbusTcpServer, RegisterBank, RegisterHandler, Serialized, ServerConfig,
};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

async fn start(bank: Arc<RegisterBank>, config: ServerConfig) -> (SocketAddr, JoinHandle<()>) {
    let server = ModbusTcpServer::bind("127.0.0.1:0", RegisterHandler::new(bank))
        .await
        .unwrap()
        .with_config(config);
    let addr = server.local_addr().unwrap();
    let task = tokio::spawn(async move {
        let _ = server.run().await;
    });
    (addr, task)
}

/// Sends one request and reads back a reply of MBAP-declared length.
async fn exchange(stream: &mut TcpStream, request: &[u8]) -> Vec<u8> {
    stream.write_all(request).await.unwrap();
    let mut header = [0u8; 6];
    stream.read_exact(&mut header).await.unwrap();
    let len = u16::from_be_bytes([header[4], header[5]]) as usize;
    let mut rest = vec![0u8; len];
    stream.read_exact(&mut rest).await.unwrap();
    let mut reply = header.to_vec();
    reply.extend(rest);
    reply
}

async fn assert_closed(stream: &mut TcpStream) {
    let mut rest = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut rest))
        .await
        .expect("server kept the connection open");
    // a reset is as good as a clean close here
    if read.is_ok() {
        assert!(rest.is_empty(), "unexpected reply bytes: {rest:02X?}");
    }
}

#[tokio::test]
async fn keep_alive_write_then_read_back() {
    let bank = Arc::new(RegisterBank::new(16, 0, 0, 16));
    let (addr, task) = start(Arc::clone(&bank), ServerConfig::default()).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let reply = exchange(
        &mut stream,
        &[0x00, 0x01, 0x00, 0x00, 0x00, 0x0B, 0x07, 0x10, 0x00, 0x02, 0x00, 0x02, 0x04, 0x12, 0x34, 0x56, 0x78],
    )
    .await;
    assert_eq!(
        reply,
        [0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x07, 0x10, 0x00, 0x02, 0x00, 0x02]
    );

    let reply = exchange(
        &mut stream,
        &[0x00, 0x02, 0x00, 0x00, 0x00, 0x06, 0x07, 0x03, 0x00, 0x02, 0x00, 0x02],
    )
    .await;
    assert_eq!(
        reply,
        [0x00, 0x02, 0x00, 0x00, 0x00, 0x07, 0x07, 0x03, 0x04, 0x12, 0x34, 0x56, 0x78]
    );

    let reply = exchange(
        &mut stream,
        &[0x00, 0x03, 0x00, 0x00, 0x00, 0x06, 0x07, 0x05, 0x00, 0x03, 0xFF, 0x00],
    )
    .await;
    assert_eq!(&reply[7..], &[0x05, 0x00, 0x03, 0xFF, 0x00]);
    assert_eq!(bank.coil(3), Some(true));
    assert_eq!(bank.holding_register(3), Some(0x5678));

    task.abort();
}

#[tokio::test]
async fn exception_keeps_connection_open() {
    let bank = Arc::new(RegisterBank::new(0, 0, 0, 4));
    let (addr, task) = start(bank, ServerConfig::default()).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let reply = exchange(
        &mut stream,
        &[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x04, 0x00, 0x01],
    )
    .await;
    assert_eq!(reply, [0x00, 0x01, 0x00, 0x00, 0x00, 0x03, 0x01, 0x83, 0x02]);

    let reply = exchange(
        &mut stream,
        &[0x00, 0x02, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x03, 0x00, 0x01],
    )
    .await;
    assert_eq!(reply, [0x00, 0x02, 0x00, 0x00, 0x00, 0x05, 0x01, 0x03, 0x02, 0x00, 0x00]);

    task.abort();
}

#[tokio::test]
async fn reply_uses_protocol_id_zero() {
    let bank = Arc::new(RegisterBank::new(0, 0, 1, 0));
    let (addr, task) = start(bank, ServerConfig::default()).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let reply = exchange(
        &mut stream,
        &[0xAB, 0xCD, 0x00, 0x05, 0x00, 0x06, 0x2A, 0x04, 0x00, 0x00, 0x00, 0x01],
    )
    .await;
    assert_eq!(&reply[..4], &[0xAB, 0xCD, 0x00, 0x00]);
    assert_eq!(reply[6], 0x2A);

    task.abort();
}

#[tokio::test]
async fn oversized_request_is_dropped_without_reply() {
    let bank = Arc::new(RegisterBank::new(0, 0, 0, 200));
    let config = ServerConfig::default().with_max_frame_len(64);
    let (addr, task) = start(bank, config).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    // 100 registers is a valid request but a 213-byte frame
    let mut request = vec![0x00, 0x01, 0x00, 0x00, 0x00, 0xCF, 0x01, 0x10, 0x00, 0x00, 0x00, 0x64, 0xC8];
    request.extend(std::iter::repeat(0u8).take(200));
    let _ = stream.write_all(&request).await;
    assert_closed(&mut stream).await;

    task.abort();
}

#[tokio::test]
async fn silent_client_times_out() {
    let bank = Arc::new(RegisterBank::new(0, 0, 0, 1));
    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&states);
    let config = ServerConfig::default()
        .with_read_timeout(Duration::from_millis(100))
        .with_conn_state(Arc::new(move |_, state| sink.lock().unwrap().push(state)));
    let (addr, task) = start(bank, config).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    assert_closed(&mut stream).await;
    // the hook runs on the connection task; give it a moment after the close
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(*states.lock().unwrap(), [ConnState::New, ConnState::Closed]);

    task.abort();
}

#[tokio::test]
async fn serialized_handler_serves_many_clients() {
    let bank = Arc::new(RegisterBank::new(0, 0, 0, 8));
    let server = ModbusTcpServer::bind(
        "127.0.0.1:0",
        Serialized::new(RegisterHandler::new(Arc::clone(&bank))),
    )
    .await
    .unwrap();
    let addr = server.local_addr().unwrap();
    let task = tokio::spawn(server.run());

    let clients: Vec<_> = (0u8..8)
        .map(|i| {
            tokio::spawn(async move {
                let mut stream = TcpStream::connect(addr).await.unwrap();
                let reply = exchange(
                    &mut stream,
                    &[0x00, i, 0x00, 0x00, 0x00, 0x06, 0x01, 0x06, 0x00, i, 0x00, i],
                )
                .await;
                assert_eq!(reply[1], i);
                assert_eq!(reply[7], 0x06);
            })
        })
        .collect();
    for client in clients {
        client.await.unwrap();
    }

    let expected: Vec<u16> = (0..8).collect();
    assert_eq!(bank.holding_registers.snapshot(), expected);
    task.abort();
}
