//! End-to-end round trips against SCGI servers on TCP and Unix sockets.

use std::collections::HashMap;

use http::StatusCode;
use http_body_util::BodyExt as _;
use scgi_transport::client::conn::DialTarget;
use scgi_transport::{Body, ScgiTransport};
use tokio::io::{
    AsyncBufReadExt as _, AsyncRead, AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _,
};
use tokio::net::TcpListener;
use tower::ServiceExt as _;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

const METHOD_CALL: &str = r#"<?xml version="1.0"?><methodCall><methodName>system.client_version</methodName></methodCall>"#;

#[derive(Debug, Clone, Copy)]
enum Reply {
    /// Echo the request body with a `Content-Length`.
    Echo,

    /// Echo the request body in two chunks, followed by a trailer.
    Chunked,

    /// Echo the request body and close the connection to end it.
    UntilClose,
}

/// Read one SCGI request: the netstring header block and the body it declares.
async fn read_request<R>(io: &mut R) -> Result<(HashMap<String, String>, Vec<u8>), BoxError>
where
    R: AsyncRead + Unpin,
{
    let mut reader = tokio::io::BufReader::new(io);
    let mut length = Vec::new();
    reader.read_until(b':', &mut length).await?;
    let length: usize = std::str::from_utf8(&length[..length.len() - 1])?.parse()?;

    let mut block = vec![0u8; length + 1];
    reader.read_exact(&mut block).await?;
    assert_eq!(block.pop(), Some(b','), "netstring must end with a comma");

    let mut fields = block.split(|&b| b == 0);
    let mut headers = HashMap::new();
    while let (Some(name), Some(value)) = (fields.next(), fields.next()) {
        if name.is_empty() {
            break;
        }
        headers.insert(
            String::from_utf8(name.to_vec())?,
            String::from_utf8(value.to_vec())?,
        );
    }

    let content_length: usize = headers["CONTENT_LENGTH"].parse()?;
    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).await?;
    Ok((headers, body))
}

async fn serve_one<IO>(mut io: IO, reply: Reply) -> Result<HashMap<String, String>, BoxError>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    let (headers, body) = read_request(&mut io).await?;

    match reply {
        Reply::Echo => {
            let head = format!(
                "Status: 200 OK\r\nContent-Type: text/xml\r\nContent-Length: {}\r\n\r\n",
                body.len()
            );
            io.write_all(head.as_bytes()).await?;
            io.write_all(&body).await?;
        }
        Reply::Chunked => {
            let head = "Status: 200 OK\r\nContent-Type: text/xml\r\nTransfer-Encoding: chunked\r\n\r\n";
            io.write_all(head.as_bytes()).await?;
            let (first, second) = body.split_at(body.len() / 2);
            for chunk in [first, second] {
                io.write_all(format!("{:x}\r\n", chunk.len()).as_bytes()).await?;
                io.write_all(chunk).await?;
                io.write_all(b"\r\n").await?;
            }
            io.write_all(b"0\r\nX-Served-By: scgi\r\n\r\n").await?;
        }
        Reply::UntilClose => {
            io.write_all(b"Status: 201 Created\r\nContent-Type: text/xml\r\n\r\n")
                .await?;
            io.write_all(&body).await?;
            io.shutdown().await?;
        }
    }

    // Hold the connection until the client releases it.
    let mut rest = Vec::new();
    io.read_to_end(&mut rest).await?;
    Ok(headers)
}

async fn tcp_server(
    reply: Reply,
) -> Result<(String, tokio::task::JoinHandle<Result<HashMap<String, String>, BoxError>>), BoxError>
{
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await?;
        serve_one(stream, reply).await
    });
    Ok((format!("scgi://{addr}/RPC2"), server))
}

#[tokio::test]
async fn tcp_round_trip() -> Result<(), BoxError> {
    let _ = tracing_subscriber::fmt::try_init();

    let (url, server) = tcp_server(Reply::Echo).await?;

    let request = http::Request::post(url).body(Body::from(METHOD_CALL))?;
    let response = ScgiTransport::new().oneshot(request).await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/xml");

    let body = response.into_body().collect().await?.to_bytes();
    assert_eq!(body, METHOD_CALL.as_bytes());

    let headers = server.await??;
    assert_eq!(headers["SCGI"], "1");
    assert_eq!(headers["CONTENT_LENGTH"], METHOD_CALL.len().to_string());

    Ok(())
}

#[tokio::test]
async fn chunked_response() -> Result<(), BoxError> {
    let _ = tracing_subscriber::fmt::try_init();

    let (url, server) = tcp_server(Reply::Chunked).await?;

    let request = http::Request::post(url).body(Body::from(METHOD_CALL))?;
    let response = ScgiTransport::new().oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::OK);

    let collected = response.into_body().collect().await?;
    assert_eq!(collected.trailers().unwrap()["x-served-by"], "scgi");
    assert_eq!(collected.to_bytes(), METHOD_CALL.as_bytes());

    server.await??;
    Ok(())
}

#[tokio::test]
async fn response_until_close() -> Result<(), BoxError> {
    let _ = tracing_subscriber::fmt::try_init();

    let (url, server) = tcp_server(Reply::UntilClose).await?;

    let request = http::Request::post(url).body(Body::from(METHOD_CALL))?;
    let response = ScgiTransport::new().oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = response.into_body().collect().await?.to_bytes();
    assert_eq!(body, METHOD_CALL.as_bytes());

    server.await??;
    Ok(())
}

#[tokio::test]
async fn close_before_reading() -> Result<(), BoxError> {
    let (url, server) = tcp_server(Reply::Echo).await?;

    let request = http::Request::post(url).body(Body::from(METHOD_CALL))?;
    let mut response = ScgiTransport::new().oneshot(request).await?;
    response.body_mut().close().await;
    response.body_mut().close().await;

    // The server finishes only once the connection has been released.
    server.await??;
    Ok(())
}

#[tokio::test]
async fn connection_refused() -> Result<(), BoxError> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);

    let request =
        http::Request::post(format!("scgi://{addr}/RPC2")).body(Body::from(METHOD_CALL))?;
    let err = ScgiTransport::new().oneshot(request).await.unwrap_err();
    assert!(matches!(err, scgi_transport::Error::Dial(_)));

    Ok(())
}

#[cfg(target_family = "unix")]
#[tokio::test]
async fn unix_round_trip() -> Result<(), BoxError> {
    let _ = tracing_subscriber::fmt::try_init();

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("rtorrent.sock");
    let listener = tokio::net::UnixListener::bind(&path)?;
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await?;
        serve_one(stream, Reply::Echo).await
    });

    let target: DialTarget = format!("scgi://{}", path.display()).parse()?;
    let request = http::Request::post("scgi://localhost/RPC2")
        .extension(target)
        .body(Body::from(METHOD_CALL))?;
    let response = ScgiTransport::new().oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await?.to_bytes();
    assert_eq!(body, METHOD_CALL.as_bytes());

    server.await??;
    Ok(())
}
