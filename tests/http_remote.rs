use std::time::Duration;

use relay::{Entry, FeedRemote, Fetched, HttpRemote, RelayError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Answers exactly one request with `status_line` and `body`, then returns
/// the raw request it received.
async fn respond_once(status_line: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/relay/feed", listener.local_addr().unwrap());

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let request = read_request(&mut stream).await;

        let response = format!(
            "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        stream.write_all(response.as_bytes()).await.unwrap();
        stream.shutdown().await.unwrap();
        request
    });

    (url, server)
}

async fn read_request(stream: &mut tokio::net::TcpStream) -> String {
    let mut raw = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let read = stream.read(&mut chunk).await.unwrap();
        if read == 0 {
            break;
        }
        raw.extend_from_slice(&chunk[..read]);

        let text = String::from_utf8_lossy(&raw);
        if let Some(header_end) = text.find("\r\n\r\n") {
            let body_len = text[..header_end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length").then(|| value.trim().parse::<usize>().ok())?
                })
                .unwrap_or(0);
            if raw.len() >= header_end + 4 + body_len {
                break;
            }
        }
    }

    String::from_utf8(raw).unwrap()
}

fn remote(url: &str) -> HttpRemote {
    HttpRemote::new(url, Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn fetch_parses_the_document() {
    let (url, server) = respond_once(
        "200 OK",
        r#"[{"id":"sys-1","sender":"SYSTEM_CORE","text":"up","timestamp":1700000000000},
            {"id":"a1","sender":"NODE_49X1","text":"hi","timestamp":1700000005000}]"#,
    )
    .await;

    let entries = match remote(&url).fetch().await.unwrap() {
        Fetched::Found(entries) => entries,
        other => panic!("expected a document, got {other:?}"),
    };
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].sender, "NODE_49X1");
    assert_eq!(entries[1].timestamp.timestamp_millis(), 1_700_000_005_000);

    let request = server.await.unwrap();
    assert!(request.starts_with("GET /relay/feed HTTP/1.1"));
}

#[tokio::test]
async fn missing_document_is_not_an_error() {
    let (url, server) = respond_once("404 Not Found", "").await;
    assert_eq!(remote(&url).fetch().await.unwrap(), Fetched::NotFound);
    server.await.unwrap();
}

#[tokio::test]
async fn null_document_counts_as_missing() {
    let (url, server) = respond_once("200 OK", "null").await;
    assert_eq!(remote(&url).fetch().await.unwrap(), Fetched::NotFound);
    server.await.unwrap();
}

#[tokio::test]
async fn server_errors_surface_their_status() {
    let (url, server) = respond_once("503 Service Unavailable", "{}").await;
    let err = remote(&url).fetch().await.unwrap_err();
    assert!(matches!(err, RelayError::Status(503)));
    assert!(err.is_transient());
    server.await.unwrap();
}

#[tokio::test]
async fn garbage_payload_is_a_decode_error() {
    let (url, server) = respond_once("200 OK", "<html>hello</html>").await;
    assert!(matches!(remote(&url).fetch().await, Err(RelayError::Decode(_))));
    server.await.unwrap();
}

#[tokio::test]
async fn upload_posts_the_whole_list() {
    let (url, server) = respond_once("200 OK", "{}").await;
    let entries = vec![Entry::new("NODE_A1B2", "first"), Entry::new("NODE_A1B2", "second")];

    remote(&url).upload(&entries).await.unwrap();

    let request = server.await.unwrap();
    assert!(request.starts_with("POST /relay/feed HTTP/1.1"));
    let body = &request[request.find("\r\n\r\n").unwrap() + 4..];
    let sent: Vec<Entry> = serde_json::from_str(body).unwrap();
    assert_eq!(sent, entries);
    assert!(body.contains(&format!("\"timestamp\":{}", entries[0].timestamp.timestamp_millis())));
}

#[tokio::test]
async fn rejected_upload_is_an_error() {
    let (url, server) = respond_once("413 Payload Too Large", "").await;
    let entries = vec![Entry::new("NODE_A1B2", "too much")];
    assert!(matches!(remote(&url).upload(&entries).await, Err(RelayError::Status(413))));
    server.await.unwrap();
}

#[tokio::test]
async fn unreachable_endpoint_is_a_network_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/feed", listener.local_addr().unwrap());
    drop(listener);

    let err = remote(&url).fetch().await.unwrap_err();
    assert!(matches!(err, RelayError::Network(_)));
}
