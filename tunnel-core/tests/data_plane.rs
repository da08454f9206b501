//! Integration tests exercising the admission protocol and both pumps
//! end to end over real loopback sockets, covering the scenarios and
//! properties from spec §8 (S1-S6).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tonic::transport::Server;

use tunnel_core::proxy::ProxyEngine;
use tunnel_core::session::SessionRegistry;
use tunnel_core::stream::StreamRegistry;
use tunnel_core::ControlChannelService;
use tunnel_directory::InMemoryDirectory;
use tunnel_protocol::{
    client_data, register, server_to_client, ClientToServer, ServerToClient, TunnelControlClient,
    TunnelControlServer,
};

/// Short idle deadline so pump B's timeout fires quickly in tests instead
/// of the production default of 2 seconds.
const TEST_IDLE_TIMEOUT: Duration = Duration::from_millis(150);

struct Harness {
    sessions: SessionRegistry,
    directory: InMemoryDirectory,
    control_addr: SocketAddr,
    public_addr: SocketAddr,
}

async fn spawn_harness() -> Harness {
    let sessions = SessionRegistry::new();
    let streams = StreamRegistry::new();
    let directory = InMemoryDirectory::new();

    let control_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let control_addr = control_listener.local_addr().unwrap();
    let control_svc = ControlChannelService::new(sessions.clone(), streams.clone());
    tokio::spawn(async move {
        Server::builder()
            .add_service(TunnelControlServer::new(control_svc))
            .serve_with_incoming(TcpListenerStream::new(control_listener))
            .await
            .unwrap();
    });

    let public_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let public_addr = public_listener.local_addr().unwrap();
    let engine = ProxyEngine::new(
        sessions.clone(),
        streams.clone(),
        Arc::new(directory.clone()),
        TEST_IDLE_TIMEOUT,
    );
    tokio::spawn(engine.serve(public_listener));

    Harness {
        sessions,
        directory,
        control_addr,
        public_addr,
    }
}

/// Connects a fake agent that registers `tunnel_id` and, for every stream
/// it sees, answers with `response` once the initial request chunk
/// arrives — standing in for "agent dials a local target that returns a
/// canned response" without needing a real local TCP listener.
async fn spawn_echo_agent(control_addr: SocketAddr, tunnel_id: &str, response: Vec<u8>) {
    let tunnel_id = tunnel_id.to_string();
    let mut client = TunnelControlClient::connect(format!("http://{control_addr}"))
        .await
        .expect("agent connects to control channel");

    let (tx, rx) = mpsc::channel::<ClientToServer>(16);
    tx.send(register(tunnel_id)).await.unwrap();

    let mut inbound = client
        .establish_tunnel(ReceiverStream::new(rx))
        .await
        .expect("registration accepted")
        .into_inner();

    tokio::spawn(async move {
        while let Some(Ok(frame)) = inbound.next().await {
            if let Some(server_to_client::Message::Data(data)) = frame.message {
                let _ = tx.send(client_data(data.connection_id, response.clone())).await;
            }
        }
    });
}

/// Like [`spawn_echo_agent`] but tags every response with the
/// `connection_id` the server assigned, so concurrent-stream tests can
/// verify isolation without any other shared state.
async fn spawn_tagging_agent(control_addr: SocketAddr, tunnel_id: &str) {
    let tunnel_id = tunnel_id.to_string();
    let mut client = TunnelControlClient::connect(format!("http://{control_addr}"))
        .await
        .unwrap();

    let (tx, rx) = mpsc::channel::<ClientToServer>(16);
    tx.send(register(tunnel_id)).await.unwrap();

    let mut inbound = client
        .establish_tunnel(ReceiverStream::new(rx))
        .await
        .unwrap()
        .into_inner();

    tokio::spawn(async move {
        while let Some(Ok(frame)) = inbound.next().await {
            if let Some(server_to_client::Message::Data(data)) = frame.message {
                let body = format!("tagged:{}", data.connection_id);
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = tx
                    .send(client_data(data.connection_id, response.into_bytes()))
                    .await;
            }
        }
    });
}

/// Like [`spawn_echo_agent`], but follows the response with an empty
/// `Data` chunk — the agent's end-of-stream sentinel (§6.1) signaling that
/// the local service has closed its side, so the relay can close the
/// public socket promptly instead of waiting out the idle deadline.
async fn spawn_echo_agent_with_eof(control_addr: SocketAddr, tunnel_id: &str, response: Vec<u8>) {
    let tunnel_id = tunnel_id.to_string();
    let mut client = TunnelControlClient::connect(format!("http://{control_addr}"))
        .await
        .expect("agent connects to control channel");

    let (tx, rx) = mpsc::channel::<ClientToServer>(16);
    tx.send(register(tunnel_id)).await.unwrap();

    let mut inbound = client
        .establish_tunnel(ReceiverStream::new(rx))
        .await
        .expect("registration accepted")
        .into_inner();

    tokio::spawn(async move {
        while let Some(Ok(frame)) = inbound.next().await {
            if let Some(server_to_client::Message::Data(data)) = frame.message {
                let _ = tx
                    .send(client_data(data.connection_id.clone(), response.clone()))
                    .await;
                let _ = tx.send(client_data(data.connection_id, Vec::new())).await;
            }
        }
    });
}

async fn send_request(addr: SocketAddr, host: &str) -> Vec<u8> {
    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let request = format!("GET / HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    response
}

fn body_of(response: &[u8]) -> &[u8] {
    let marker = b"\r\n\r\n";
    let pos = response
        .windows(marker.len())
        .position(|w| w == marker)
        .expect("response has a header/body boundary");
    &response[pos + marker.len()..]
}

#[tokio::test]
async fn s1_happy_http_get_round_trips_bytes_unaltered() {
    let harness = spawn_harness().await;
    harness.directory.bind("alpha", "T1");
    spawn_echo_agent(
        harness.control_addr,
        "T1",
        b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi".to_vec(),
    )
    .await;

    let response = tokio::time::timeout(
        Duration::from_secs(5),
        send_request(harness.public_addr, "alpha.example"),
    )
    .await
    .expect("response arrives before the test timeout");

    assert_eq!(body_of(&response), b"hi");
}

#[tokio::test]
async fn s2_unknown_subdomain_closes_without_any_bytes() {
    let harness = spawn_harness().await;
    // no directory binding for "zeta"

    let response = send_request(harness.public_addr, "zeta.example").await;
    assert!(response.is_empty());
}

#[tokio::test]
async fn s3_agent_down_before_public_arrives_drops_silently() {
    let harness = spawn_harness().await;
    harness.directory.bind("alpha", "T1");
    // T1 resolves but no agent ever registered a session for it.

    let response = send_request(harness.public_addr, "alpha.example").await;
    assert!(response.is_empty());
    assert!(harness.sessions.get("T1").is_none());
}

#[tokio::test]
async fn s4_two_concurrent_requests_never_cross_talk() {
    let harness = spawn_harness().await;
    harness.directory.bind("alpha", "T1");
    spawn_tagging_agent(harness.control_addr, "T1").await;

    let (r1, r2) = tokio::join!(
        send_request(harness.public_addr, "alpha.example"),
        send_request(harness.public_addr, "alpha.example"),
    );

    let b1 = body_of(&r1);
    let b2 = body_of(&r2);

    assert!(b1.starts_with(b"tagged:"));
    assert!(b2.starts_with(b"tagged:"));
    assert_ne!(b1, b2, "each stream must get its own connection id");
}

#[tokio::test]
async fn s5_protocol_violation_is_rejected_with_invalid_argument() {
    let harness = spawn_harness().await;

    let mut client = TunnelControlClient::connect(format!("http://{}", harness.control_addr))
        .await
        .unwrap();
    let (tx, rx) = mpsc::channel::<ClientToServer>(4);
    // First frame is Data, not Register.
    tx.send(client_data("s1", b"oops".to_vec())).await.unwrap();

    let result = client.establish_tunnel(ReceiverStream::new(rx)).await;
    let status = result.expect_err("a Data-first channel must be rejected");
    assert_eq!(status.code(), tonic::Code::InvalidArgument);
    assert_eq!(harness.sessions.len(), 0);
}

#[tokio::test]
async fn s6_idle_public_reader_times_out_the_outbound_pump() {
    let harness = spawn_harness().await;
    harness.directory.bind("alpha", "T1");
    spawn_echo_agent(
        harness.control_addr,
        "T1",
        b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi".to_vec(),
    )
    .await;

    let mut stream = tokio::net::TcpStream::connect(harness.public_addr)
        .await
        .unwrap();
    let request = "GET / HTTP/1.1\r\nHost: alpha.example\r\n\r\n";
    stream.write_all(request.as_bytes()).await.unwrap();
    // Stall without closing the write side — the agent→public pump should
    // still deliver the in-flight response before the connection closes.

    let started = std::time::Instant::now();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(body_of(&response), b"hi");
    assert!(
        elapsed < Duration::from_secs(2),
        "idle deadline should close the connection well within the suite timeout"
    );
}

#[tokio::test]
async fn agent_eof_sentinel_closes_connection_well_before_idle_deadline() {
    let harness = spawn_harness().await;
    harness.directory.bind("alpha", "T1");
    spawn_echo_agent_with_eof(
        harness.control_addr,
        "T1",
        b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi".to_vec(),
    )
    .await;

    let mut stream = tokio::net::TcpStream::connect(harness.public_addr)
        .await
        .unwrap();
    let request = "GET / HTTP/1.1\r\nHost: alpha.example\r\n\r\n";
    stream.write_all(request.as_bytes()).await.unwrap();
    // Stall without closing the write side, same as S6 — only the agent's
    // sentinel (not the client) should end this connection.

    let started = std::time::Instant::now();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(body_of(&response), b"hi");
    assert!(
        elapsed < TEST_IDLE_TIMEOUT,
        "sentinel-driven close took {elapsed:?}, should beat the {TEST_IDLE_TIMEOUT:?} idle deadline"
    );
}

#[allow(unused)]
fn unused_import_guard(_r: &ServerToClient) {}
