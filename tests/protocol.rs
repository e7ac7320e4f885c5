use std::path::Path;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tempfile::TempDir;
use tokio::net::UnixStream;
use tokio_util::codec::Framed;

use timing_ioc::core::{ServerConfig, SharedState};
use timing_ioc::network::ProtocolServer;
use timing_ioc::protocol::message::*;
use timing_ioc::protocol::{Frame, FrameCodec};

type Client = Framed<UnixStream, FrameCodec>;

async fn connect(path: &Path) -> Client {
    Framed::new(UnixStream::connect(path).await.unwrap(), FrameCodec::new())
}

async fn start(dir: &TempDir) -> (Arc<SharedState>, ServerConfig, tokio::task::JoinHandle<timing_ioc::Result<()>>) {
    let config = ServerConfig {
        socket_path: dir.path().join("ntp.socket"),
        ..ServerConfig::default()
    };
    let shared = Arc::new(SharedState::new());
    shared.registry.register(1, false).await.unwrap();
    shared.registry.register(4, true).await.unwrap();
    shared.registry.register(8, false).await.unwrap();
    shared.registry.seal().await;

    let server = ProtocolServer::bind(&config, shared.clone()).unwrap();
    let handle = tokio::spawn(server.serve());
    (shared, config, handle)
}

#[tokio::test]
async fn test_pipelined_frames_are_answered_in_order() {
    let dir = TempDir::new().unwrap();
    let (shared, config, handle) = start(&dir).await;
    let mut client = connect(&config.socket_path).await;

    let requests = vec![
        Frame::empty(CMD_QUERY_VERSION),
        Frame::new(CMD_READ_VARIABLE, vec![2]),
        Frame::empty(CMD_QUERY_VARIABLES),
        Frame::new(CMD_READ_VARIABLE, vec![40]),
        Frame::new(CMD_WRITE_VARIABLE, vec![1, 1, 2, 3, 4]),
        Frame::new(CMD_READ_VARIABLES, vec![1, 0]),
    ];
    for request in &requests {
        client.feed(request.clone()).await.unwrap();
    }
    client.flush().await.unwrap();

    let mut responses = Vec::new();
    for _ in 0..requests.len() {
        responses.push(client.next().await.unwrap().unwrap());
    }

    assert_eq!(
        responses,
        vec![
            Frame::new(CMD_VERSION, vec![2, 0, 0]),
            Frame::new(CMD_VARIABLE_VALUE, vec![0; 8]),
            Frame::new(CMD_VARIABLES, vec![0x01, 0x84, 0x08]),
            Frame::empty(ErrorCode::InvalidId.code()),
            Frame::empty(CMD_OK),
            Frame::new(CMD_VARIABLE_VALUES, vec![1, 2, 3, 4, 0]),
        ]
    );

    drop(client);
    shared.fault.raise("test done");
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_next_connection_sees_previous_writes() {
    let dir = TempDir::new().unwrap();
    let (shared, config, handle) = start(&dir).await;

    let mut first = connect(&config.socket_path).await;
    first
        .send(Frame::new(CMD_WRITE_VARIABLE, vec![1, 0xDE, 0xAD, 0xBE, 0xEF]))
        .await
        .unwrap();
    assert_eq!(first.next().await.unwrap().unwrap(), Frame::empty(CMD_OK));
    drop(first);

    // Sequential mode accepts the second client after the first hangs up
    let mut second = connect(&config.socket_path).await;
    second.send(Frame::new(CMD_READ_VARIABLE, vec![1])).await.unwrap();
    assert_eq!(
        second.next().await.unwrap().unwrap(),
        Frame::new(CMD_VARIABLE_VALUE, vec![0xDE, 0xAD, 0xBE, 0xEF])
    );
    assert_eq!(
        shared.registry.read(timing_ioc::registry::VarId::new(1)).await.unwrap(),
        vec![0xDE, 0xAD, 0xBE, 0xEF]
    );

    drop(second);
    shared.fault.raise("test done");
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_truncated_frame_raises_fault() {
    let dir = TempDir::new().unwrap();
    let (shared, config, handle) = start(&dir).await;

    // Header promises more payload than is ever sent
    let mut stream = UnixStream::connect(&config.socket_path).await.unwrap();
    tokio::io::AsyncWriteExt::write_all(&mut stream, &[CMD_WRITE_VARIABLE, 0x00, 0x05, 0x01])
        .await
        .unwrap();
    drop(stream);

    assert!(handle.await.unwrap().is_err());
    assert!(shared.fault.is_raised());
    assert!(shared.fault.reason().unwrap().starts_with("server:"));
}

#[tokio::test]
async fn test_client_hanging_up_mid_reply_keeps_server_running() {
    let dir = TempDir::new().unwrap();
    let (shared, config, handle) = start(&dir).await;

    // Pipeline many reads and hang up without reading any answer
    let mut stream = UnixStream::connect(&config.socket_path).await.unwrap();
    let burst: Vec<u8> = [CMD_READ_VARIABLE, 0x00, 0x01, 0x00].repeat(2000);
    tokio::io::AsyncWriteExt::write_all(&mut stream, &burst).await.unwrap();
    drop(stream);

    // Sequential mode only accepts this client once the previous one is gone
    let mut next = connect(&config.socket_path).await;
    next.send(Frame::empty(CMD_QUERY_VERSION)).await.unwrap();
    assert_eq!(
        next.next().await.unwrap().unwrap(),
        Frame::new(CMD_VERSION, vec![2, 0, 0])
    );
    assert!(!shared.fault.is_raised());

    drop(next);
    shared.fault.raise("test done");
    handle.await.unwrap().unwrap();
}
