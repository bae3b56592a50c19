use kestrel_core::{Error, Result};
use serde::Deserialize;
use std::time::Duration;
use tokio::time::Instant;

/// Per-attempt clamp so an accepting-but-unresponsive port cannot consume
/// the whole budget.
const ATTEMPT_TIMEOUT: Duration = Duration::from_millis(1_500);
const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Deserialize)]
struct VersionPayload {
    #[serde(rename = "webSocketDebuggerUrl")]
    web_socket_debugger_url: String,
}

/// Poll `http://127.0.0.1:<port>/json/version` until it yields a connectable
/// debugger address.
///
/// Each attempt is bounded by a short sub-timeout while the overall deadline
/// governs total wait. HTTP error statuses mean "try again" - only the
/// deadline terminates the loop, with `E_CDP_TIMEOUT` carrying the last
/// observed error.
pub async fn discover_endpoint(port: u16, timeout: Duration) -> Result<String> {
    let url = format!("http://127.0.0.1:{}/json/version", port);
    let deadline = Instant::now() + timeout;

    let client = reqwest::Client::builder()
        .timeout(ATTEMPT_TIMEOUT)
        .build()
        .map_err(|e| Error::internal(format!("HTTP client: {}", e)))?;

    let mut last_error = String::from("no attempt completed");

    loop {
        if Instant::now() >= deadline {
            return Err(Error::CdpTimeout {
                port,
                timeout_ms: timeout.as_millis() as u64,
                last_error,
            });
        }

        match client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                match resp.json::<VersionPayload>().await {
                    Ok(payload) => {
                        tracing::debug!(port, url = %payload.web_socket_debugger_url, "debug endpoint up");
                        return Ok(payload.web_socket_debugger_url);
                    }
                    Err(e) => last_error = format!("bad version payload: {}", e),
                }
            }
            Ok(resp) => last_error = format!("HTTP {}", resp.status()),
            Err(e) => last_error = e.to_string(),
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        tokio::time::sleep(POLL_INTERVAL.min(remaining)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_port_times_out_with_code() {
        let start = std::time::Instant::now();
        // Nothing is listening on the allocated-then-released port.
        let port = crate::port::allocate_port(None).unwrap();

        let err = discover_endpoint(port, Duration::from_millis(200))
            .await
            .unwrap_err();

        assert_eq!(err.code(), "E_CDP_TIMEOUT");
        // Rejects near the requested budget, not some larger default.
        assert!(start.elapsed() < Duration::from_millis(1_500));
    }

    #[tokio::test]
    async fn test_http_error_status_is_retried_until_deadline() {
        // A listener that answers 404 to everything: the loop must keep
        // retrying and surface one terminal timeout.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    use tokio::io::{AsyncReadExt, AsyncWriteExt};
                    let mut buf = [0u8; 1024];
                    let _ = sock.read(&mut buf).await;
                    let _ = sock
                        .write_all(b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\n\r\n")
                        .await;
                });
            }
        });

        let err = discover_endpoint(port, Duration::from_millis(400))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "E_CDP_TIMEOUT");
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn test_valid_payload_resolves() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let ws = format!("ws://127.0.0.1:{}/devtools/browser/test", port);
        let body = format!("{{\"webSocketDebuggerUrl\":\"{}\"}}", ws);
        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = listener.accept().await else {
                    break;
                };
                let body = body.clone();
                tokio::spawn(async move {
                    use tokio::io::{AsyncReadExt, AsyncWriteExt};
                    let mut buf = [0u8; 1024];
                    let _ = sock.read(&mut buf).await;
                    let resp = format!(
                        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = sock.write_all(resp.as_bytes()).await;
                });
            }
        });

        let url = discover_endpoint(port, Duration::from_secs(5)).await.unwrap();
        assert_eq!(url, ws);
    }
}
