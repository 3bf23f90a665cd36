use futures::future::join_all;
use std::net::SocketAddr;
use tokio::net::TcpListener;

use redwire::client::{blocking, Client};
use redwire::server::{serve, Config};
use redwire::{Command, Reply};

async fn start_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, Config::default()));
    addr
}

#[tokio::test]
async fn test_pipeline_replies_in_order() {
    let addr = start_server().await;
    let client = Client::connect(addr).await.unwrap();

    let replies = client
        .pipeline([
            Command::new("SET").arg("k").arg("v"),
            Command::new("GET").arg("k"),
            Command::new("INCR").arg("k"),
            Command::new("NOSUCHCOMMAND"),
            Command::new("EXISTS").arg("k"),
        ])
        .await
        .unwrap();

    assert_eq!(
        replies,
        vec![
            Reply::ok(),
            Reply::bulk("v"),
            Reply::error("ERR value is not an integer or out of range"),
            Reply::error("ERR unknown command 'nosuchcommand'"),
            Reply::Integer(1),
        ]
    );
}

#[tokio::test]
async fn test_concurrent_callers_share_one_connection() {
    let addr = start_server().await;
    let client = Client::connect(addr).await.unwrap();

    let callers = (0..16).map(|caller| {
        let client = client.clone();
        tokio::spawn(async move {
            for i in 0..50 {
                let message = format!("{}:{}", caller, i);
                let reply = client
                    .execute(Command::new("ECHO").arg(message.as_str()))
                    .await
                    .unwrap();
                assert_eq!(reply, Reply::bulk(message));
            }
        })
    });

    for caller in join_all(callers).await {
        caller.unwrap();
    }
}

#[tokio::test]
async fn test_submitted_handles_resolve_to_their_command() {
    let addr = start_server().await;
    let client = Client::new(
        tokio::net::TcpStream::connect(addr).await.unwrap(),
        8,
    );

    let mut handles = vec![];
    for i in 0..200 {
        handles.push(client.submit(Command::new("ECHO").arg(i)).await.unwrap());
    }

    let replies = join_all(handles).await;
    for (i, reply) in replies.into_iter().enumerate() {
        assert_eq!(reply.unwrap(), Reply::bulk(i.to_string()));
    }
}

#[tokio::test]
async fn test_counter_increments_are_atomic() {
    let addr = start_server().await;

    let workers = (0..8).map(|_| {
        tokio::spawn(async move {
            let client = Client::connect(addr).await.unwrap();
            let commands = (0..100).map(|_| Command::new("INCR").arg("counter"));
            client.pipeline(commands).await.unwrap();
        })
    });
    for worker in join_all(workers).await {
        worker.unwrap();
    }

    let client = Client::connect(addr).await.unwrap();
    let reply = client.execute(Command::new("GET").arg("counter")).await.unwrap();
    assert_eq!(reply, Reply::bulk("800"));
}

#[tokio::test]
async fn test_quit_fails_later_requests() {
    let addr = start_server().await;
    let client = Client::connect(addr).await.unwrap();

    let reply = client.execute(Command::new("QUIT")).await.unwrap();
    assert_eq!(reply, Reply::ok());

    // The server closes the connection right after replying.
    let reply = client.execute(Command::new("PING")).await;
    assert!(reply.is_err());
}

#[tokio::test]
async fn test_protocol_violation_closes_connection() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let addr = start_server().await;
    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();

    stream.write_all(b"*1\r\n:1\r\n").await.unwrap();

    let mut received = Vec::new();
    stream.read_to_end(&mut received).await.unwrap();

    let received = String::from_utf8(received).unwrap();
    assert!(received.starts_with("-ERR protocol error"), "{}", received);
}

#[tokio::test]
async fn test_inline_ping() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let addr = start_server().await;
    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();

    stream.write_all(b"PING\r\nping\r\n").await.unwrap();

    let mut received = [0u8; 14];
    stream.read_exact(&mut received).await.unwrap();
    assert_eq!(&received, b"+PONG\r\n+PONG\r\n");
}

#[tokio::test]
async fn test_unknown_verb_with_crlf_keeps_pipeline_in_sync() {
    let addr = start_server().await;
    let client = Client::connect(addr).await.unwrap();

    let replies = client
        .pipeline([Command::new("x\r\n+injected"), Command::new("PING")])
        .await
        .unwrap();

    assert_eq!(
        replies,
        vec![
            Reply::error("ERR unknown command 'x  +injected'"),
            Reply::status("PONG"),
        ]
    );
}

#[tokio::test]
async fn test_deeply_nested_command_is_rejected() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let addr = start_server().await;

    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"*1\r\n*1\r\n").await.unwrap();

    let mut received = Vec::new();
    stream.read_to_end(&mut received).await.unwrap();
    let received = String::from_utf8(received).unwrap();
    assert!(received.starts_with("-ERR protocol error"), "{}", received);

    // The server stops reading after the second header, so most of this write is refused
    // and the connection may be reset before the error reply is read.
    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let mut payload = b"*1\r\n".repeat(200_000);
    payload.extend_from_slice(b":1\r\n");
    let _ = stream.write_all(&payload).await;
    let _ = stream.read_to_end(&mut Vec::new()).await;

    // Only those connections went away.
    let client = Client::connect(addr).await.unwrap();
    let reply = client.execute(Command::new("PING")).await.unwrap();
    assert_eq!(reply, Reply::status("PONG"));
}

#[tokio::test]
async fn test_reply_is_flushed_while_next_command_is_partial() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::time::{timeout, Duration};

    let addr = start_server().await;
    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();

    stream
        .write_all(b"*1\r\n$4\r\nPING\r\n*2\r\n$4\r\nECHO\r\n$2\r\nh")
        .await
        .unwrap();

    let mut received = [0u8; 7];
    timeout(Duration::from_secs(5), stream.read_exact(&mut received))
        .await
        .expect("first reply held back")
        .unwrap();
    assert_eq!(&received, b"+PONG\r\n");

    stream.write_all(b"i\r\n").await.unwrap();

    let mut received = [0u8; 8];
    stream.read_exact(&mut received).await.unwrap();
    assert_eq!(&received, b"$2\r\nhi\r\n");
}

#[tokio::test]
async fn test_blocking_client() {
    let addr = start_server().await;

    let replies = tokio::task::spawn_blocking(move || {
        let mut client = blocking::Client::connect(addr).unwrap();

        let mut replies = vec![client
            .execute(&Command::new("RPUSH").arg("list").arg("a").arg("b"))
            .unwrap()];
        replies.extend(
            client
                .pipeline(&[
                    Command::new("LRANGE").arg("list").arg(0).arg(-1),
                    Command::new("LLEN").arg("list"),
                ])
                .unwrap(),
        );
        replies
    })
    .await
    .unwrap();

    assert_eq!(
        replies,
        vec![
            Reply::Integer(2),
            Reply::bulks(["a", "b"]),
            Reply::Integer(2),
        ]
    );
}
