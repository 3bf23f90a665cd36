use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration};
use tokio_util::codec::Framed;

use redwire::client::{Client, Push, Subscriber};
use redwire::codec::ClientCodec;
use redwire::server::{serve, Config};
use redwire::{Command, Reply};

async fn start_server(config: Config) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, config));
    addr
}

async fn next_push(subscriber: &mut Subscriber) -> Push {
    timeout(Duration::from_secs(5), subscriber.next_push())
        .await
        .expect("timed out waiting for a push")
        .unwrap()
        .expect("connection closed")
}

async fn publish(client: &Client, channel: &str, message: &str) -> Reply {
    client
        .execute(Command::new("PUBLISH").arg(channel).arg(message))
        .await
        .unwrap()
}

fn bytes(value: &str) -> Bytes {
    Bytes::copy_from_slice(value.as_bytes())
}

#[tokio::test]
async fn test_subscribe_and_receive() {
    let addr = start_server(Config::default()).await;
    let client = Client::connect(addr).await.unwrap();
    let mut subscriber = Subscriber::connect(addr).await.unwrap();

    subscriber.subscribe(["news", "sports"]).await.unwrap();
    assert_eq!(
        next_push(&mut subscriber).await,
        Push::Subscribe {
            channel: bytes("news"),
            count: 1
        }
    );
    assert_eq!(
        next_push(&mut subscriber).await,
        Push::Subscribe {
            channel: bytes("sports"),
            count: 2
        }
    );

    assert_eq!(publish(&client, "news", "hello").await, Reply::Integer(1));
    assert_eq!(publish(&client, "weather", "rain").await, Reply::Integer(0));

    assert_eq!(
        next_push(&mut subscriber).await,
        Push::Message {
            channel: bytes("news"),
            payload: bytes("hello"),
        }
    );
}

#[tokio::test]
async fn test_pattern_and_exact_subscriptions_both_deliver() {
    let addr = start_server(Config::default()).await;
    let client = Client::connect(addr).await.unwrap();

    let mut exact = Subscriber::connect(addr).await.unwrap();
    exact.subscribe(["news.tech"]).await.unwrap();
    next_push(&mut exact).await;

    let mut pattern = Subscriber::connect(addr).await.unwrap();
    pattern.psubscribe(["news.*", "*.tech"]).await.unwrap();
    next_push(&mut pattern).await;
    assert_eq!(
        next_push(&mut pattern).await,
        Push::Psubscribe {
            pattern: bytes("*.tech"),
            count: 2
        }
    );

    assert_eq!(
        publish(&client, "news.tech", "rust").await,
        Reply::Integer(3)
    );

    assert_eq!(
        next_push(&mut exact).await,
        Push::Message {
            channel: bytes("news.tech"),
            payload: bytes("rust"),
        }
    );

    let mut matched = vec![];
    for _ in 0..2 {
        match next_push(&mut pattern).await {
            Push::Pmessage {
                pattern,
                channel,
                payload,
            } => {
                assert_eq!(channel, bytes("news.tech"));
                assert_eq!(payload, bytes("rust"));
                matched.push(pattern);
            }
            push => panic!("unexpected push {:?}", push),
        }
    }
    matched.sort();
    assert_eq!(matched, vec![bytes("*.tech"), bytes("news.*")]);
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    let addr = start_server(Config::default()).await;
    let client = Client::connect(addr).await.unwrap();
    let mut subscriber = Subscriber::connect(addr).await.unwrap();

    subscriber.subscribe(["a", "b"]).await.unwrap();
    next_push(&mut subscriber).await;
    next_push(&mut subscriber).await;

    subscriber.unsubscribe(["a"]).await.unwrap();
    assert_eq!(
        next_push(&mut subscriber).await,
        Push::Unsubscribe {
            channel: Some(bytes("a")),
            count: 1
        }
    );

    assert_eq!(publish(&client, "a", "dropped").await, Reply::Integer(0));
    assert_eq!(publish(&client, "b", "kept").await, Reply::Integer(1));
    assert_eq!(
        next_push(&mut subscriber).await,
        Push::Message {
            channel: bytes("b"),
            payload: bytes("kept"),
        }
    );

    // Without arguments every channel goes; with nothing left the ack carries no channel.
    subscriber.unsubscribe(Vec::<&str>::new()).await.unwrap();
    assert_eq!(
        next_push(&mut subscriber).await,
        Push::Unsubscribe {
            channel: Some(bytes("b")),
            count: 0
        }
    );
    subscriber.unsubscribe(Vec::<&str>::new()).await.unwrap();
    assert_eq!(
        next_push(&mut subscriber).await,
        Push::Unsubscribe {
            channel: None,
            count: 0
        }
    );
}

#[tokio::test]
async fn test_subscribed_connection_rejects_other_commands() {
    let addr = start_server(Config::default()).await;
    let client = Client::connect(addr).await.unwrap();

    client
        .execute(Command::new("SUBSCRIBE").arg("news"))
        .await
        .unwrap();

    let reply = client.execute(Command::new("GET").arg("k")).await.unwrap();
    assert_eq!(
        reply,
        Reply::error(
            "ERR Can't execute 'get': only (P)SUBSCRIBE / (P)UNSUBSCRIBE / PING / QUIT are allowed in this context"
        )
    );

    let reply = client
        .execute(Command::new("PING").arg("still here"))
        .await
        .unwrap();
    assert_eq!(reply, Reply::bulks(["pong", "still here"]));

    // Back to normal once the last subscription goes.
    client
        .execute(Command::new("UNSUBSCRIBE"))
        .await
        .unwrap();
    let reply = client.execute(Command::new("GET").arg("k")).await.unwrap();
    assert_eq!(reply, Reply::nil());
}

#[tokio::test]
async fn test_subscriber_ping() {
    let addr = start_server(Config::default()).await;
    let mut subscriber = Subscriber::connect(addr).await.unwrap();

    subscriber.psubscribe(["*"]).await.unwrap();
    next_push(&mut subscriber).await;

    subscriber.ping("alive").await.unwrap();
    assert_eq!(next_push(&mut subscriber).await, Push::Pong(bytes("alive")));
}

#[tokio::test]
async fn test_disconnected_subscriber_is_released() {
    let addr = start_server(Config::default()).await;
    let client = Client::connect(addr).await.unwrap();

    let mut subscriber = Subscriber::connect(addr).await.unwrap();
    subscriber.subscribe(["gone"]).await.unwrap();
    next_push(&mut subscriber).await;
    drop(subscriber);

    let mut receivers = publish(&client, "gone", "hello").await;
    for _ in 0..50 {
        if receivers == Reply::Integer(0) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        receivers = publish(&client, "gone", "hello").await;
    }
    assert_eq!(receivers, Reply::Integer(0));
}

#[tokio::test]
async fn test_subscriptions_are_per_database() {
    let addr = start_server(Config::default()).await;
    let client = Client::connect(addr).await.unwrap();

    let mut subscriber = Subscriber::connect(addr).await.unwrap();
    subscriber.subscribe(["news"]).await.unwrap();
    next_push(&mut subscriber).await;

    client
        .execute(Command::new("SELECT").arg(1))
        .await
        .unwrap();
    assert_eq!(publish(&client, "news", "elsewhere").await, Reply::Integer(0));
}

#[tokio::test]
async fn test_monitor_echoes_commands() {
    let addr = start_server(Config::default()).await;
    let client = Client::connect(addr).await.unwrap();

    // Echoed lines arrive unsolicited, so the monitor is driven over a bare framed socket.
    let stream = TcpStream::connect(addr).await.unwrap();
    let mut monitor = Framed::new(stream, ClientCodec::new());

    monitor.send(Command::new("MONITOR")).await.unwrap();
    assert_eq!(monitor.next().await.unwrap().unwrap(), Reply::ok());

    client
        .execute(Command::new("SET").arg("watched").arg("1"))
        .await
        .unwrap();

    let line = timeout(Duration::from_secs(5), monitor.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match line {
        Reply::Status(line) => assert!(
            line.ends_with(r#""SET" "watched" "1""#),
            "unexpected monitor line {}",
            line
        ),
        reply => panic!("unexpected reply {:?}", reply),
    }

    // Anything but QUIT is swallowed while monitoring.
    monitor.send(Command::new("GET").arg("watched")).await.unwrap();
    monitor.send(Command::new("QUIT")).await.unwrap();
    assert_eq!(monitor.next().await.unwrap().unwrap(), Reply::ok());
    assert!(monitor.next().await.is_none());
}

#[tokio::test]
async fn test_monitor_skips_commands_rejected_while_subscribed() {
    let addr = start_server(Config::default()).await;
    let client = Client::connect(addr).await.unwrap();

    let subscribed = Client::connect(addr).await.unwrap();
    subscribed
        .execute(Command::new("SUBSCRIBE").arg("news"))
        .await
        .unwrap();

    let stream = TcpStream::connect(addr).await.unwrap();
    let mut monitor = Framed::new(stream, ClientCodec::new());
    monitor.send(Command::new("MONITOR")).await.unwrap();
    assert_eq!(monitor.next().await.unwrap().unwrap(), Reply::ok());

    let reply = subscribed
        .execute(Command::new("GET").arg("hidden"))
        .await
        .unwrap();
    assert!(reply.is_error());

    client
        .execute(Command::new("SET").arg("shown").arg("1"))
        .await
        .unwrap();

    let line = timeout(Duration::from_secs(5), monitor.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match line {
        Reply::Status(line) => assert!(
            line.ends_with(r#""SET" "shown" "1""#),
            "unexpected monitor line {}",
            line
        ),
        reply => panic!("unexpected reply {:?}", reply),
    }
}

#[tokio::test]
async fn test_slow_subscriber_is_disconnected() {
    let addr = start_server(Config {
        subscriber_queue: 4,
        ..Config::default()
    })
    .await;
    let client = Client::connect(addr).await.unwrap();

    // Never reads, so the socket buffers fill and then its push queue does.
    let mut subscriber = Subscriber::connect(addr).await.unwrap();
    subscriber.subscribe(["firehose"]).await.unwrap();

    let payload = "x".repeat(64 * 1024);
    let mut receivers = Reply::Integer(1);
    for _ in 0..2000 {
        receivers = publish(&client, "firehose", &payload).await;
        if receivers == Reply::Integer(0) {
            break;
        }
    }
    assert_eq!(receivers, Reply::Integer(0));
}
