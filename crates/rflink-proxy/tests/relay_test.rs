//! Relay tests against a fake gateway on a loopback socket.

use std::time::Duration;

use rflink_client::Endpoint;
use rflink_proxy::{ProxyConfig, ProxyHandle};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);

/// One end of a line-based TCP conversation.
struct Peer {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Peer {
    fn new(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Peer {
            reader: BufReader::new(reader),
            writer,
        }
    }

    async fn connect(addr: std::net::SocketAddr) -> Self {
        Peer::new(TcpStream::connect(addr).await.unwrap())
    }

    async fn send(&mut self, data: &str) {
        self.writer.write_all(data.as_bytes()).await.unwrap();
    }

    async fn recv_line(&mut self) -> String {
        let mut line = String::new();
        timeout(WAIT, self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for a line")
            .unwrap();
        line
    }

    async fn expect_silence(&mut self) {
        let mut line = String::new();
        let read = timeout(Duration::from_millis(100), self.reader.read_line(&mut line)).await;
        assert!(read.is_err(), "unexpected line: {:?}", line);
    }
}

fn relay_config(gateway_port: u16) -> ProxyConfig {
    let mut config = ProxyConfig::default()
        .with_endpoint(Endpoint::tcp("127.0.0.1", gateway_port))
        .with_listen_port(0)
        .with_reconnect_timing(Duration::from_millis(500), Duration::from_millis(50))
        .with_ack_timeout(Duration::from_millis(500));
    config.listen_host = "127.0.0.1".to_string();
    config
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached");
}

/// Start a fake gateway and a relay connected to it.
async fn start_relay(repeat: u32) -> (ProxyHandle, TcpListener, Peer) {
    let gateway = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = gateway.local_addr().unwrap().port();
    let relay = rflink_proxy::start(relay_config(port).with_repeat(repeat))
        .await
        .unwrap();

    let (stream, _) = timeout(WAIT, gateway.accept()).await.unwrap().unwrap();
    wait_for(|| relay.upstream_connected()).await;
    (relay, gateway, Peer::new(stream))
}

#[tokio::test]
async fn test_command_acknowledged_to_sender() {
    let (relay, _listener, mut gateway) = start_relay(1).await;
    let mut client = Peer::connect(relay.local_addr()).await;
    let mut other = Peer::connect(relay.local_addr()).await;
    wait_for(|| relay.client_count() == 2).await;

    // missing final delimiter is tolerated
    client.send("10;newkaku;000001;01;on\r\n").await;
    assert_eq!(gateway.recv_line().await, "10;newkaku;000001;01;on;\r\n");
    gateway.send("20;01;OK;\r\n").await;

    assert_eq!(client.recv_line().await, "20;00;OK;\r\n");
    other.expect_silence().await;

    relay.shutdown().await;
}

#[tokio::test]
async fn test_unmapped_protocol_forwarded_verbatim() {
    let (relay, _listener, mut gateway) = start_relay(1).await;
    let mut client = Peer::connect(relay.local_addr()).await;
    wait_for(|| relay.client_count() == 1).await;

    // no device id token exists for this protocol name
    client.send("10;Alecto V4;0001;01;ON;\r\n").await;
    assert_eq!(gateway.recv_line().await, "10;alecto v4;0001;01;ON;\r\n");
    gateway.send("20;02;OK;\r\n").await;
    assert_eq!(client.recv_line().await, "20;00;OK;\r\n");

    relay.shutdown().await;
}

#[tokio::test]
async fn test_rejected_command_not_acknowledged() {
    let (relay, _listener, mut gateway) = start_relay(1).await;
    let mut client = Peer::connect(relay.local_addr()).await;
    wait_for(|| relay.client_count() == 1).await;

    client.send("10;newkaku;000001;01;dim;\r\n").await;
    gateway.recv_line().await;
    gateway.send("20;01;CMD UNKNOWN;\r\n").await;
    client.expect_silence().await;

    relay.shutdown().await;
}

#[tokio::test]
async fn test_command_repeated() {
    let (relay, _listener, mut gateway) = start_relay(3).await;
    let mut client = Peer::connect(relay.local_addr()).await;
    wait_for(|| relay.client_count() == 1).await;

    client.send("10;kaku;000041;1;off;\r\n").await;
    for seq in 1..=3 {
        assert_eq!(gateway.recv_line().await, "10;kaku;000041;1;off;\r\n");
        gateway.send(&format!("20;0{};OK;\r\n", seq)).await;
    }

    assert_eq!(client.recv_line().await, "20;00;OK;\r\n");
    client.expect_silence().await;

    relay.shutdown().await;
}

#[tokio::test]
async fn test_reports_broadcast_to_all_clients() {
    let (relay, _listener, mut gateway) = start_relay(1).await;
    let mut first = Peer::connect(relay.local_addr()).await;
    let mut second = Peer::connect(relay.local_addr()).await;
    wait_for(|| relay.client_count() == 2).await;

    gateway.send("20;06;Kaku;ID=41;SWITCH=1;CMD=ON;\r\n").await;
    assert_eq!(first.recv_line().await, "20;06;Kaku;ID=41;SWITCH=1;CMD=ON;\r\n");
    assert_eq!(second.recv_line().await, "20;06;Kaku;ID=41;SWITCH=1;CMD=ON;\r\n");

    drop(second);
    wait_for(|| relay.client_count() == 1).await;
    gateway.send("20;07;Alecto V1;ID=0334;TEMP=800d;HUM=33;BAT=OK;\r\n").await;
    assert_eq!(
        first.recv_line().await,
        "20;07;Alecto V1;ID=0334;TEMP=800d;HUM=33;BAT=OK;\r\n"
    );

    relay.shutdown().await;
}

#[tokio::test]
async fn test_raw_lines_pass_through() {
    let (relay, _listener, mut gateway) = start_relay(1).await;
    let mut client = Peer::connect(relay.local_addr()).await;
    wait_for(|| relay.client_count() == 1).await;

    client.send("10;PING;\r\n").await;
    assert_eq!(gateway.recv_line().await, "10;PING;\r\n");
    gateway.send("20;99;PONG;\r\n").await;
    assert_eq!(client.recv_line().await, "20;99;PONG;\r\n");

    // invalid lines are dropped
    client.send("garbage\r\n").await;
    client.send("10;REBOOT;\r\n").await;
    assert_eq!(gateway.recv_line().await, "10;REBOOT;\r\n");

    relay.shutdown().await;
}

#[tokio::test]
async fn test_reconnects_after_gateway_hangup() {
    let (relay, listener, gateway) = start_relay(1).await;

    drop(gateway);
    let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    wait_for(|| relay.upstream_connected()).await;

    let mut gateway = Peer::new(stream);
    let mut client = Peer::connect(relay.local_addr()).await;
    wait_for(|| relay.client_count() == 1).await;
    gateway.send("20;08;PONG;\r\n").await;
    assert_eq!(client.recv_line().await, "20;08;PONG;\r\n");

    relay.shutdown().await;
}

#[tokio::test]
async fn test_retries_until_gateway_appears() {
    let vacant = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = vacant.local_addr().unwrap().port();
    drop(vacant);

    let relay = rflink_proxy::start(relay_config(port)).await.unwrap();
    wait_for(|| relay.last_error().is_some()).await;
    assert!(!relay.upstream_connected());

    // commands are dropped while the gateway is away
    let mut client = Peer::connect(relay.local_addr()).await;
    client.send("10;newkaku;000001;01;on;\r\n").await;
    client.expect_silence().await;

    let gateway = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    let (_stream, _) = timeout(WAIT, gateway.accept()).await.unwrap().unwrap();
    wait_for(|| relay.upstream_connected()).await;

    relay.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_clients_and_upstream() {
    let (relay, listener, mut gateway) = start_relay(1).await;
    let mut client = Peer::connect(relay.local_addr()).await;
    wait_for(|| relay.client_count() == 1).await;

    relay.shutdown().await;

    let mut line = String::new();
    let read = timeout(WAIT, client.reader.read_line(&mut line)).await.unwrap();
    assert_eq!(read.unwrap(), 0);
    let read = timeout(WAIT, gateway.reader.read_line(&mut line)).await.unwrap();
    assert_eq!(read.unwrap(), 0);

    // no reconnect after shutdown
    assert!(timeout(Duration::from_millis(200), listener.accept()).await.is_err());
}

#[tokio::test]
async fn test_shutdown_right_after_connect_closes_client() {
    let (relay, _listener, _gateway) = start_relay(1).await;
    let client = TcpStream::connect(relay.local_addr()).await.unwrap();
    let mut client = Peer::new(client);

    // the session may not have started yet
    relay.shutdown().await;

    let mut line = String::new();
    let read = timeout(WAIT, client.reader.read_line(&mut line))
        .await
        .expect("client left open after shutdown");
    assert!(matches!(read, Ok(0) | Err(_)));
}
