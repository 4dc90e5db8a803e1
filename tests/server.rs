use std::net::SocketAddr;
use std::sync::Arc;

use rand::Rng;
use respd::{BulkValue, Connection, Error, Request, Server, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration};

async fn ping(conn: Arc<Connection>, request: Request) -> Result<(), Error> {
    match request.args.into_iter().next() {
        Some(payload) => conn.write_bulk(payload).await,
        None => conn.write_status("PONG").await,
    }
}

async fn echo_all(conn: Arc<Connection>, request: Request) -> Result<(), Error> {
    conn.write_array(request.args).await
}

/// Reads as many extra values as the first argument says, then replies with all of them.
async fn upload(conn: Arc<Connection>, request: Request) -> Result<(), Error> {
    let count = match request.args.first() {
        Some(Value::Integer(count)) => *count,
        _ => return conn.write_error("ERR expected a count").await,
    };

    let mut received = Vec::new();
    for _ in 0..count {
        match conn.read_value().await? {
            Some(value) => received.push(BulkValue::from(value)),
            None => return Ok(()),
        }
    }

    conn.write_status("OK").await?;
    conn.write_array(received).await
}

async fn explode(_conn: Arc<Connection>, _request: Request) -> Result<(), Error> {
    panic!("handler exploded")
}

async fn hang(_conn: Arc<Connection>, _request: Request) -> Result<(), Error> {
    futures::future::pending::<()>().await;
    Ok(())
}

async fn start(server: Server) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();

    tokio::spawn(Arc::new(server).serve(listener));

    address
}

async fn start_default() -> SocketAddr {
    let mut server = Server::default();
    server.add_handler("ping", ping).unwrap();
    server.add_handler("echo", echo_all).unwrap();
    server
        .add_handler("fail", |conn: Arc<Connection>, _request: Request| async move {
            conn.write_error("ERR something went wrong").await
        })
        .unwrap();
    server
        .add_handler("incr", |conn: Arc<Connection>, request: Request| async move {
            match request.args.first() {
                Some(Value::Integer(i)) => conn.write_integer(i + 1).await,
                _ => conn.write_error("ERR value is not an integer").await,
            }
        })
        .unwrap();

    start(server).await
}

async fn expect_reply(stream: &mut TcpStream, expected: &[u8]) {
    let mut actual = vec![0; expected.len()];
    timeout(Duration::from_secs(5), stream.read_exact(&mut actual))
        .await
        .expect("timed out waiting for reply")
        .unwrap();

    assert_eq!(
        String::from_utf8_lossy(&actual),
        String::from_utf8_lossy(expected)
    );
}

async fn expect_closed(stream: &mut TcpStream) {
    let mut rest = Vec::new();
    timeout(Duration::from_secs(5), stream.read_to_end(&mut rest))
        .await
        .expect("timed out waiting for close")
        .unwrap();

    assert!(rest.is_empty(), "unexpected bytes: {:?}", rest);
}

#[tokio::test]
async fn ping_pong() {
    let address = start_default().await;
    let mut stream = TcpStream::connect(address).await.unwrap();

    stream.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
    expect_reply(&mut stream, b"+PONG\r\n").await;

    stream
        .write_all(b"*2\r\n$4\r\nping\r\n$5\r\nhello\r\n")
        .await
        .unwrap();
    expect_reply(&mut stream, b"$5\r\nhello\r\n").await;
}

#[tokio::test]
async fn method_names_are_case_insensitive() {
    let address = start_default().await;
    let mut stream = TcpStream::connect(address).await.unwrap();

    stream.write_all(b"*1\r\n+PiNg\r\n").await.unwrap();

    expect_reply(&mut stream, b"+PONG\r\n").await;
}

#[tokio::test]
async fn requests_are_answered_in_order() {
    let address = start_default().await;
    let mut stream = TcpStream::connect(address).await.unwrap();

    stream
        .write_all(b"*1\r\n$4\r\nPING\r\n*2\r\n$4\r\nINCR\r\n:41\r\n*3\r\n$4\r\nECHO\r\n$1\r\na\r\n:7\r\n")
        .await
        .unwrap();

    expect_reply(&mut stream, b"+PONG\r\n:42\r\n*2\r\n$1\r\na\r\n$1\r\n7\r\n").await;
}

#[tokio::test]
async fn request_split_across_writes() {
    let address = start_default().await;
    let mut stream = TcpStream::connect(address).await.unwrap();

    for part in [&b"*2\r\n$4\r\nEC"[..], b"HO\r\n$5\r\nwor", b"ld\r\n"] {
        stream.write_all(part).await.unwrap();
        stream.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    expect_reply(&mut stream, b"*1\r\n$5\r\nworld\r\n").await;
}

#[tokio::test]
async fn binary_safe_payload() {
    let address = start_default().await;
    let mut stream = TcpStream::connect(address).await.unwrap();

    let mut payload = vec![0u8; 2048];
    rand::thread_rng().fill(&mut payload[..]);
    payload[10..12].copy_from_slice(b"\r\n");

    let mut request = format!("*2\r\n$4\r\nPING\r\n${}\r\n", payload.len()).into_bytes();
    request.extend_from_slice(&payload);
    request.extend_from_slice(b"\r\n");
    stream.write_all(&request).await.unwrap();

    let mut expected = format!("${}\r\n", payload.len()).into_bytes();
    expected.extend_from_slice(&payload);
    expected.extend_from_slice(b"\r\n");
    expect_reply(&mut stream, &expected).await;
}

#[tokio::test]
async fn unsupported_method_replies_once_and_closes() {
    let address = start_default().await;
    let mut stream = TcpStream::connect(address).await.unwrap();

    stream.write_all(b"*1\r\n$4\r\nNOPE\r\n").await.unwrap();

    expect_reply(&mut stream, b"-unsupported method:nope\r\n").await;
    expect_closed(&mut stream).await;
}

#[tokio::test]
async fn application_error_keeps_connection_open() {
    let address = start_default().await;
    let mut stream = TcpStream::connect(address).await.unwrap();

    stream.write_all(b"*1\r\n$4\r\nFAIL\r\n").await.unwrap();
    expect_reply(&mut stream, b"-ERR something went wrong\r\n").await;

    stream.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
    expect_reply(&mut stream, b"+PONG\r\n").await;
}

#[tokio::test]
async fn request_format_error_closes_without_reply() {
    let address = start_default().await;

    for request in [&b":1\r\n"[..], b"+PING\r\n", b"*0\r\n", b"*-1\r\n", b"*1\r\n:1\r\n"] {
        let mut stream = TcpStream::connect(address).await.unwrap();
        stream.write_all(request).await.unwrap();

        expect_closed(&mut stream).await;
    }
}

#[tokio::test]
async fn protocol_error_closes_without_reply() {
    let address = start_default().await;

    for request in [
        &b"?what\r\n"[..],
        b"*1\r\n$4\r\nPINGXX\r\n",
        b"*1\r\n$x\r\n",
        b"*1\r\n$-5\r\n",
    ] {
        let mut stream = TcpStream::connect(address).await.unwrap();
        stream.write_all(request).await.unwrap();

        expect_closed(&mut stream).await;
    }
}

#[tokio::test]
async fn overlong_line_closes_connection() {
    let mut server = Server::new(respd::config::ServerConfig {
        max_line_length: 16,
        ..Default::default()
    });
    server.add_handler("ping", ping).unwrap();
    let address = start(server).await;

    let mut stream = TcpStream::connect(address).await.unwrap();
    stream.write_all(b"*1\r\n+PING\r\n").await.unwrap();
    expect_reply(&mut stream, b"+PONG\r\n").await;

    stream.write_all(b"*1\r\n+PINGPINGPINGPINGPING\r\n").await.unwrap();
    expect_closed(&mut stream).await;
}

#[tokio::test]
async fn handler_can_read_further_values() {
    let mut server = Server::default();
    server.add_handler("upload", upload).unwrap();
    server.add_handler("ping", ping).unwrap();
    let address = start(server).await;

    let mut stream = TcpStream::connect(address).await.unwrap();
    stream
        .write_all(b"*2\r\n$6\r\nUPLOAD\r\n:2\r\n$3\r\none\r\n:2\r\n*1\r\n$4\r\nPING\r\n")
        .await
        .unwrap();

    expect_reply(
        &mut stream,
        b"+OK\r\n*2\r\n$3\r\none\r\n$1\r\n2\r\n+PONG\r\n",
    )
    .await;
}

#[tokio::test]
async fn failing_handler_only_closes_its_connection() {
    let mut server = Server::default();
    server.add_handler("ping", ping).unwrap();
    server
        .add_handler("boom", |_conn: Arc<Connection>, _request: Request| async move {
            Err::<(), Error>("handler gave up".into())
        })
        .unwrap();
    server.add_handler("panic", explode).unwrap();
    let address = start(server).await;

    let mut bystander = TcpStream::connect(address).await.unwrap();

    for method in ["BOOM", "PANIC"] {
        let mut stream = TcpStream::connect(address).await.unwrap();
        let request = format!("*1\r\n${}\r\n{}\r\n", method.len(), method);
        stream.write_all(request.as_bytes()).await.unwrap();

        expect_closed(&mut stream).await;
    }

    bystander.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
    expect_reply(&mut bystander, b"+PONG\r\n").await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn deeply_nested_request_only_closes_its_connection() {
    let address = start_default().await;

    let mut bystander = TcpStream::connect(address).await.unwrap();

    let (mut reader, mut writer) = TcpStream::connect(address).await.unwrap().into_split();
    tokio::spawn(async move {
        // The server hangs up part way through, so the write may fail.
        let _ = writer.write_all(&b"*1\r\n".repeat(200_000)).await;
    });

    // The connection is dropped with unread input, which may surface as a reset.
    let mut rest = Vec::new();
    let _ = timeout(Duration::from_secs(5), reader.read_to_end(&mut rest))
        .await
        .expect("timed out waiting for close");
    assert!(rest.is_empty(), "unexpected bytes: {:?}", rest);

    bystander.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
    expect_reply(&mut bystander, b"+PONG\r\n").await;

    let mut latecomer = TcpStream::connect(address).await.unwrap();
    latecomer.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
    expect_reply(&mut latecomer, b"+PONG\r\n").await;
}

#[tokio::test]
async fn nesting_limit_is_configurable() {
    let mut server = Server::new(respd::config::ServerConfig {
        max_depth: 2,
        ..Default::default()
    });
    server
        .add_handler("args", |conn: Arc<Connection>, request: Request| async move {
            conn.write_value(Value::Array(request.args)).await
        })
        .unwrap();
    let address = start(server).await;

    let mut stream = TcpStream::connect(address).await.unwrap();
    stream
        .write_all(b"*2\r\n$4\r\nARGS\r\n*1\r\n:1\r\n")
        .await
        .unwrap();
    expect_reply(&mut stream, b"*1\r\n*1\r\n:1\r\n").await;

    stream
        .write_all(b"*2\r\n$4\r\nARGS\r\n*1\r\n*1\r\n:1\r\n")
        .await
        .unwrap();
    expect_closed(&mut stream).await;
}

#[tokio::test]
async fn slow_handler_does_not_block_other_connections() {
    let mut server = Server::default();
    server.add_handler("ping", ping).unwrap();
    server.add_handler("hang", hang).unwrap();
    let address = start(server).await;

    let mut stuck = TcpStream::connect(address).await.unwrap();
    stuck.write_all(b"*1\r\n$4\r\nHANG\r\n").await.unwrap();

    let mut other = TcpStream::connect(address).await.unwrap();
    other.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();

    expect_reply(&mut other, b"+PONG\r\n").await;
}

#[tokio::test]
async fn peer_close_ends_connection_quietly() {
    let address = start_default().await;

    let mut stream = TcpStream::connect(address).await.unwrap();
    stream.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
    expect_reply(&mut stream, b"+PONG\r\n").await;
    stream.shutdown().await.unwrap();

    expect_closed(&mut stream).await;
}
