//! End-to-end retry-replay scenario driven against a real (if minimal) TCP
//! server: the first request gets HTTP 429, the second streams back a
//! completed SSE response. Exercises `RetryingTransport` and `OpenAiClient`
//! together rather than either in isolation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use codewright::config::{HttpConfig, TlsVersion};
use codewright::llm::{LlmClient, OpenAiClient};
use codewright::transport::{ConnectionPool, RetryingTransport};
use codewright::{CompletionRequest, Message};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const SSE_BODY: &str = concat!(
    "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"success after retry\"}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
    "data: [DONE]\n\n",
);

async fn handle_one(socket: &mut tokio::net::TcpStream, attempt: usize) {
    let mut buf = [0u8; 8192];
    let _ = socket.read(&mut buf).await.unwrap();

    let response = if attempt == 0 {
        "HTTP/1.1 429 Too Many Requests\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
    } else {
        format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\nContent-Length: {}\r\n\r\n{}",
            SSE_BODY.len(),
            SSE_BODY,
        )
    };
    socket.write_all(response.as_bytes()).await.unwrap();
    socket.shutdown().await.ok();
}

#[tokio::test]
async fn retries_once_after_429_then_streams_success() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let call_count = Arc::new(AtomicUsize::new(0));

    let server_calls = Arc::clone(&call_count);
    tokio::spawn(async move {
        for attempt in 0..2 {
            let (mut socket, _) = listener.accept().await.unwrap();
            server_calls.fetch_add(1, Ordering::SeqCst);
            handle_one(&mut socket, attempt).await;
        }
    });

    let http = HttpConfig {
        max_attempts: 5,
        base_backoff: Duration::from_millis(1),
        max_backoff_per_attempt: Duration::from_millis(10),
        max_total_wait: Duration::from_secs(5),
        request_timeout: Duration::from_secs(5),
        pool_max_idle_per_host: 4,
        global_max_idle: 16,
        pool_idle_timeout: Duration::from_secs(90),
        tls_handshake_timeout: Duration::from_secs(5),
        min_tls_version: TlsVersion::Tls12,
    };

    let pool = ConnectionPool::new(&http).unwrap();
    let transport = RetryingTransport::new(pool, http);
    let client = OpenAiClient::new(transport, format!("http://{addr}"), "test-key");

    let request = CompletionRequest {
        model: "gpt-test".to_string(),
        system_prompt: "sys".to_string(),
        messages: vec![Message::user("hi")],
        tools: vec![],
        temperature: 0.0,
        max_tokens: 100,
    };

    let response = client.generate_completion(&CancellationToken::new(), &request).await.unwrap();
    assert_eq!(response.content, "success after retry");
    assert_eq!(call_count.load(Ordering::SeqCst), 2);
}
