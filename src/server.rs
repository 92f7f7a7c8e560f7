//! HTTP transport: a small HTTP/1.1 server on plain tokio sockets.
//!
//! `GET /` answers a liveness check; `POST /ask` streams pipeline events as
//! `text/event-stream` frames and closes the connection after the last one.

use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::llm::TextGenerator;
use crate::pipeline::Pipeline;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

const READ_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_REQUEST_BYTES: usize = 1_000_000;

pub const LIVENESS_BODY: &str = r#"{"message":"E-commerce AI Agent is running."}"#;

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: String,
}

/// Bind the configured address and serve until the listener fails.
pub async fn serve(config: Arc<AgentConfig>, llm: Arc<dyn TextGenerator>) -> Result<()> {
    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %config.bind_addr, model = llm.model_name(), "server listening");
    serve_listener(listener, Pipeline::new(config, llm)).await
}

/// Accept loop over an already-bound listener. Each connection gets its own task.
pub async fn serve_listener(listener: TcpListener, pipeline: Pipeline) -> Result<()> {
    loop {
        let (stream, addr) = listener.accept().await?;
        debug!(%addr, "new connection");
        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, pipeline).await {
                warn!(%addr, "connection error: {}", e);
            }
        });
    }
}

async fn handle_connection(mut stream: TcpStream, pipeline: Pipeline) -> Result<()> {
    let raw = match timeout(READ_TIMEOUT, read_request(&mut stream)).await {
        Ok(Ok(raw)) => raw,
        Ok(Err(e)) => {
            let (status, status_text) = match e {
                AgentError::PayloadTooLarge(_) => (413, "Payload Too Large"),
                AgentError::BadRequest(_) => (400, "Bad Request"),
                _ => return Err(e),
            };
            warn!(status, "rejecting request: {}", e);
            stream
                .write_all(create_response(status, status_text, &error_body(&e)).as_bytes())
                .await?;
            stream.shutdown().await.ok();
            return Ok(());
        }
        Err(_) => {
            warn!("request read timeout");
            return Ok(());
        }
    };
    if raw.is_empty() {
        return Ok(());
    }

    let request = match parse_request(&raw) {
        Ok(request) => request,
        Err(e) => {
            stream
                .write_all(create_response(400, "Bad Request", &error_body(&e)).as_bytes())
                .await?;
            return Ok(());
        }
    };
    debug!(method = %request.method, path = %request.path, "request");

    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/") => {
            stream
                .write_all(create_response(200, "OK", LIVENESS_BODY).as_bytes())
                .await?;
        }
        ("OPTIONS", _) => {
            stream.write_all(create_response(204, "No Content", "").as_bytes()).await?;
        }
        ("POST", "/ask") => match parse_ask(&request.body) {
            Ok(ask) => {
                let (mut reader, mut writer) = stream.split();
                stream_answer(&mut reader, &mut writer, &pipeline, ask.question).await?
            }
            Err(e) => {
                stream
                    .write_all(create_response(422, "Unprocessable Entity", &error_body(&e)).as_bytes())
                    .await?;
            }
        },
        _ => {
            stream
                .write_all(create_response(404, "Not Found", r#"{"detail":"Not Found"}"#).as_bytes())
                .await?;
        }
    }
    stream.shutdown().await.ok();
    Ok(())
}

/// Write the stream head, then every event frame as it arrives.
///
/// The client is watched while the pipeline works: EOF or a read error on
/// `reader`, or a failed write, drops the receiver and the pipeline abandons
/// the request.
pub async fn stream_answer<R, W>(reader: &mut R, writer: &mut W, pipeline: &Pipeline, question: String) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    writer.write_all(stream_head().as_bytes()).await?;
    writer.flush().await?;

    let mut rx = pipeline.ask(question);
    let mut scratch = [0u8; 512];
    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                let frame = event.to_frame()?;
                if let Err(e) = write_frame(writer, &frame).await {
                    warn!("client went away mid-stream: {}", e);
                    return Ok(());
                }
                if event.is_terminal() {
                    break;
                }
            }
            read = reader.read(&mut scratch) => match read {
                Ok(0) => {
                    warn!("client closed the connection mid-stream");
                    return Ok(());
                }
                Err(e) => {
                    warn!("client went away mid-stream: {}", e);
                    return Ok(());
                }
                // Anything sent after the request body is ignored.
                Ok(_) => {}
            },
        }
    }
    Ok(())
}

async fn write_frame<W>(writer: &mut W, frame: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame.as_bytes()).await?;
    writer.flush().await
}

async fn read_request<R>(reader: &mut R) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = Vec::new();
    let mut temp_buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut temp_buf).await?;
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&temp_buf[..n]);
        let declared = expected_length(&buffer).unwrap_or(0);
        if declared > MAX_REQUEST_BYTES || buffer.len() > MAX_REQUEST_BYTES {
            return Err(AgentError::PayloadTooLarge(format!(
                "request exceeds {} bytes",
                MAX_REQUEST_BYTES
            )));
        }
        if request_complete(&buffer) {
            break;
        }
    }
    String::from_utf8(buffer).map_err(|e| AgentError::BadRequest(format!("Request is not UTF-8: {}", e)))
}

/// Total bytes the request will occupy, once its head has arrived.
fn expected_length(buffer: &[u8]) -> Option<usize> {
    let headers_end = find_subslice(buffer, b"\r\n\r\n")?;
    let head = String::from_utf8_lossy(&buffer[..headers_end]);
    let content_length = extract_content_length(&head).unwrap_or(0);
    Some(headers_end.saturating_add(4).saturating_add(content_length))
}

fn request_complete(buffer: &[u8]) -> bool {
    expected_length(buffer).is_some_and(|expected| buffer.len() >= expected)
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn extract_content_length(head: &str) -> Option<usize> {
    head.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        if key.trim().eq_ignore_ascii_case("content-length") {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}

/// Split a raw request into method, path (query string and trailing slash
/// removed), lowercased headers and body.
pub fn parse_request(raw: &str) -> Result<HttpRequest> {
    let (head, body) = raw.split_once("\r\n\r\n").unwrap_or((raw, ""));
    let mut lines = head.lines();
    let request_line = lines
        .next()
        .ok_or_else(|| AgentError::BadRequest("Empty request".to_string()))?;

    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 2 {
        return Err(AgentError::BadRequest(format!("Malformed request line: {}", request_line)));
    }

    let path = parts[1].split('?').next().unwrap_or("/");
    let mut path = path.trim_end_matches('/').to_string();
    if path.is_empty() {
        path = "/".to_string();
    }

    let mut headers = HashMap::new();
    for line in lines {
        if let Some((key, value)) = line.split_once(':') {
            headers.insert(key.trim().to_lowercase(), value.trim().to_string());
        }
    }

    Ok(HttpRequest {
        method: parts[0].to_uppercase(),
        path,
        headers,
        body: body.to_string(),
    })
}

pub fn parse_ask(body: &str) -> Result<AskRequest> {
    let ask: AskRequest = serde_json::from_str(body.trim())
        .map_err(|e| AgentError::BadRequest(format!("Invalid request body: {}", e)))?;
    Ok(ask)
}

fn error_body(e: &AgentError) -> String {
    serde_json::json!({ "detail": e.to_string() }).to_string()
}

fn stream_head() -> String {
    "HTTP/1.1 200 OK\r\n\
     Content-Type: text/event-stream\r\n\
     Cache-Control: no-cache\r\n\
     Connection: close\r\n\
     Access-Control-Allow-Origin: *\r\n\
     \r\n"
        .to_string()
}

fn create_response(status: u16, status_text: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: application/json\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n\
         Access-Control-Allow-Headers: Content-Type\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        status,
        status_text,
        body.len(),
        body
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct HangingLlm;

    #[async_trait]
    impl TextGenerator for HangingLlm {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("SELECT 1".to_string())
        }

        fn model_name(&self) -> &str {
            "hanging"
        }
    }

    #[test]
    fn test_parse_request_line_headers_body() {
        let raw = "POST /ask/?x=1 HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: 17\r\n\r\n{\"question\":\"q\"}";
        let req = parse_request(raw).unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.path, "/ask");
        assert_eq!(req.headers.get("content-type").map(String::as_str), Some("application/json"));
        assert_eq!(req.body, "{\"question\":\"q\"}");
    }

    #[test]
    fn test_parse_request_root_path() {
        let req = parse_request("GET / HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(req.path, "/");
        assert!(req.body.is_empty());
    }

    #[test]
    fn test_parse_request_rejects_garbage() {
        assert!(parse_request("").is_err());
        assert!(parse_request("HELLO\r\n\r\n").is_err());
    }

    #[test]
    fn test_parse_ask() {
        assert_eq!(parse_ask(r#"{"question": "Total sales?"}"#).unwrap().question, "Total sales?");
        assert!(parse_ask("{}").is_err());
        assert!(parse_ask(r#"{"question": 3}"#).is_err());
        assert!(parse_ask("").is_err());
    }

    #[test]
    fn test_request_complete_waits_for_body() {
        let head = b"POST /ask HTTP/1.1\r\nContent-Length: 5\r\n\r\n";
        let mut buf = head.to_vec();
        assert!(!request_complete(&buf));
        buf.extend_from_slice(b"ab");
        assert!(!request_complete(&buf));
        buf.extend_from_slice(b"cde");
        assert!(request_complete(&buf));
        assert!(request_complete(b"GET / HTTP/1.1\r\n\r\n"));
        assert!(!request_complete(b"GET / HTTP/1.1\r\n"));
    }

    #[test]
    fn test_huge_content_length_does_not_overflow() {
        let raw = format!("POST /ask HTTP/1.1\r\nContent-Length: {}\r\n\r\n", usize::MAX);
        assert_eq!(expected_length(raw.as_bytes()), Some(usize::MAX));
        assert!(!request_complete(raw.as_bytes()));
    }

    #[tokio::test]
    async fn test_read_request_rejects_oversized_declared_body() {
        let raw = format!(
            "POST /ask HTTP/1.1\r\nContent-Length: {}\r\n\r\n{{}}",
            MAX_REQUEST_BYTES + 1
        );
        let mut reader = raw.as_bytes();
        let err = read_request(&mut reader).await.unwrap_err();
        assert!(matches!(err, AgentError::PayloadTooLarge(_)));
    }

    #[tokio::test]
    async fn test_read_request_rejects_non_utf8() {
        let mut raw = b"POST /ask HTTP/1.1\r\nContent-Length: 2\r\n\r\n".to_vec();
        raw.extend_from_slice(&[0xff, 0xfe]);
        let mut reader = raw.as_slice();
        let err = read_request(&mut reader).await.unwrap_err();
        assert!(matches!(err, AgentError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_stream_answer_stops_on_client_eof() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = AgentConfig::new("test-key").with_db_path(dir.path().join("absent.db"));
        let pipeline = Pipeline::new(Arc::new(config), Arc::new(HangingLlm));

        // An empty reader is a client that has already hung up.
        let mut reader: &[u8] = &[];
        let mut writer = Vec::new();
        timeout(
            Duration::from_secs(5),
            stream_answer(&mut reader, &mut writer, &pipeline, "q".to_string()),
        )
        .await
        .expect("stream should end once the client is gone")
        .unwrap();

        let written = String::from_utf8(writer).unwrap();
        assert!(written.starts_with("HTTP/1.1 200 OK"));
        assert!(!written.contains("\"event\":\"sql\""));
    }

    #[test]
    fn test_create_response_content_length() {
        let response = create_response(200, "OK", LIVENESS_BODY);
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains(&format!("Content-Length: {}\r\n", LIVENESS_BODY.len())));
        assert!(response.ends_with(LIVENESS_BODY));
    }
}
