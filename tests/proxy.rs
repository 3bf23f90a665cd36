use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use redwire::client::{Client, Push, Subscriber};
use redwire::proxy::{self, Mode};
use redwire::server;
use redwire::{Command, Reply};

async fn start_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server::serve(listener, server::Config::default()));
    addr
}

async fn start_proxy(upstream: SocketAddr, mode: Mode) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = proxy::Config {
        upstream: upstream.to_string(),
        buffer_size: 64,
        mode,
        ..proxy::Config::default()
    };
    tokio::spawn(proxy::serve(listener, config));
    addr
}

async fn round_trip(mode: Mode) {
    let upstream = start_server().await;
    let addr = start_proxy(upstream, mode).await;
    let client = Client::connect(addr).await.unwrap();

    // Larger than the relay buffer, so it crosses several reads.
    let value = "v".repeat(1000);
    let replies = client
        .pipeline([
            Command::new("SET").arg("k").arg(value.as_str()),
            Command::new("GET").arg("k"),
            Command::new("ZADD").arg("z").arg(1).arg("a").arg(2).arg("b"),
            Command::new("ZRANGE").arg("z").arg(0).arg(-1).arg("WITHSCORES"),
            Command::new("NOSUCHCOMMAND"),
        ])
        .await
        .unwrap();

    assert_eq!(
        replies,
        vec![
            Reply::ok(),
            Reply::bulk(value),
            Reply::Integer(2),
            Reply::bulks(["a", "1", "b", "2"]),
            Reply::error("ERR unknown command 'nosuchcommand'"),
        ]
    );

    // Data written through the proxy is visible to direct clients.
    let direct = Client::connect(upstream).await.unwrap();
    let reply = direct.execute(Command::new("ZCARD").arg("z")).await.unwrap();
    assert_eq!(reply, Reply::Integer(2));
}

#[tokio::test]
async fn test_raw_relay() {
    round_trip(Mode::Raw).await;
}

#[tokio::test]
async fn test_framed_relay() {
    round_trip(Mode::Framed).await;
}

#[tokio::test]
async fn test_pubsub_through_proxy() {
    let upstream = start_server().await;
    let addr = start_proxy(upstream, Mode::Framed).await;

    let mut subscriber = Subscriber::connect(addr).await.unwrap();
    subscriber.subscribe(["relayed"]).await.unwrap();
    subscriber.next_push().await.unwrap();

    let publisher = Client::connect(upstream).await.unwrap();
    let reply = publisher
        .execute(Command::new("PUBLISH").arg("relayed").arg("hi"))
        .await
        .unwrap();
    assert_eq!(reply, Reply::Integer(1));

    assert_eq!(
        subscriber.next_push().await.unwrap(),
        Some(Push::Message {
            channel: "relayed".into(),
            payload: "hi".into(),
        })
    );
}

#[tokio::test]
async fn test_quit_closes_both_ends() {
    let upstream = start_server().await;
    let addr = start_proxy(upstream, Mode::Raw).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"*1\r\n$4\r\nQUIT\r\n").await.unwrap();

    let mut received = Vec::new();
    stream.read_to_end(&mut received).await.unwrap();
    assert_eq!(received, b"+OK\r\n".to_vec());
}

#[tokio::test]
async fn test_framed_relay_rejects_garbage() {
    let upstream = start_server().await;
    let addr = start_proxy(upstream, Mode::Framed).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"GARBAGE\r\n").await.unwrap();

    // The proxy drops the relay without forwarding or answering anything.
    let mut received = Vec::new();
    let _ = stream.read_to_end(&mut received).await;
    assert!(received.is_empty());
}

#[tokio::test]
async fn test_upstream_down_closes_client() {
    let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream = closed.local_addr().unwrap();
    drop(closed);

    let addr = start_proxy(upstream, Mode::Raw).await;
    let client = Client::connect(addr).await.unwrap();

    let reply = client.execute(Command::new("PING")).await;
    assert!(reply.is_err());
}
