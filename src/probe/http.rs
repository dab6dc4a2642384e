//! HTTP probe implementation.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, DNT, UPGRADE_INSECURE_REQUESTS};
use reqwest::redirect::Policy;
use reqwest::StatusCode;
use std::error::Error as StdError;
use std::io;
use std::time::{Duration, Instant};

use super::{HealthProbe, ProbeFailure};
use crate::db::{CheckResult, CheckStatus};

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/124.0 Safari/537.36 sitewatch/0.1";

/// Probes sites with a single GET, without following redirects.
#[derive(Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new() -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
        headers.insert(DNT, HeaderValue::from_static("1"));
        headers.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .redirect(Policy::none())
            .no_proxy()
            // Each probe opens its own connection.
            .pool_max_idle_per_host(0)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self, url: &str, timeout_seconds: u64) -> CheckResult {
        let timeout_seconds = timeout_seconds.max(1);
        let start = Instant::now();

        let outcome = tokio::time::timeout(
            Duration::from_secs(timeout_seconds),
            self.client.get(url).send(),
        )
        .await;

        let elapsed = start.elapsed().as_millis() as i64;

        match outcome {
            Ok(Ok(response)) => classify_status(response.status(), elapsed),
            Ok(Err(e)) => {
                let failure = classify_error(&e);
                tracing::debug!("Probe of {} failed: {} ({})", url, failure, e);
                failed(elapsed, failure)
            }
            Err(_) => failed(elapsed, ProbeFailure::Timeout(timeout_seconds)),
        }
    }
}

/// Map a completed HTTP exchange to a check result.
pub fn classify_status(status: StatusCode, elapsed_ms: i64) -> CheckResult {
    let code = status.as_u16();
    if code < 400 {
        return CheckResult::up(elapsed_ms, code);
    }

    let message = match status.canonical_reason() {
        Some(reason) => format!("HTTP {} {}", code, reason),
        None => format!("HTTP {}", code),
    };
    CheckResult {
        status: CheckStatus::Down,
        response_time: Some(elapsed_ms),
        status_code: Some(code),
        error_message: Some(message),
    }
}

fn failed(elapsed_ms: i64, failure: ProbeFailure) -> CheckResult {
    let response_time = if elapsed_ms > 0 { Some(elapsed_ms) } else { None };
    CheckResult::down(response_time, None, failure.to_string())
}

/// Reduce a transport error to one of the canonical failure causes.
fn classify_error(err: &reqwest::Error) -> ProbeFailure {
    classify_chain(err, err.is_connect() && err.is_timeout())
}

fn classify_chain(err: &(dyn StdError + 'static), connect_timed_out: bool) -> ProbeFailure {
    let mut chain = Vec::new();
    let mut source = Some(err);

    while let Some(e) = source {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            match io_err.kind() {
                io::ErrorKind::ConnectionRefused => return ProbeFailure::ConnectionRefused,
                io::ErrorKind::ConnectionReset => return ProbeFailure::ConnectionReset,
                io::ErrorKind::TimedOut => return ProbeFailure::ConnectTimeout,
                _ => {}
            }
        }
        chain.push(e.to_string().to_lowercase());
        source = e.source();
    }

    let text = chain.join(": ");
    if text.contains("dns error")
        || text.contains("failed to lookup address")
        || text.contains("name or service not known")
    {
        ProbeFailure::Dns
    } else if text.contains("connection refused") {
        ProbeFailure::ConnectionRefused
    } else if text.contains("connection reset") {
        ProbeFailure::ConnectionReset
    } else if connect_timed_out {
        ProbeFailure::ConnectTimeout
    } else {
        let message = err.to_string();
        if message.is_empty() {
            ProbeFailure::Other("Unknown error".to_string())
        } else {
            ProbeFailure::Other(message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve a single canned response on a random local port.
    async fn serve_once(status_line: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 2048];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {}\r\nLocation: http://{}/elsewhere\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                    status_line, addr
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        format!("http://{}/", addr)
    }

    #[test]
    fn test_classify_status_codes() {
        for code in [200u16, 204, 301, 302, 304, 399] {
            let result = classify_status(StatusCode::from_u16(code).unwrap(), 12);
            assert_eq!(result.status, CheckStatus::Up, "code {}", code);
            assert_eq!(result.status_code, Some(code));
            assert!(result.error_message.is_none());
        }

        let result = classify_status(StatusCode::INTERNAL_SERVER_ERROR, 12);
        assert_eq!(result.status, CheckStatus::Down);
        assert_eq!(result.status_code, Some(500));
        assert_eq!(result.error_message.as_deref(), Some("HTTP 500 Internal Server Error"));

        let result = classify_status(StatusCode::from_u16(599).unwrap(), 12);
        assert_eq!(result.error_message.as_deref(), Some("HTTP 599"));
    }

    #[tokio::test]
    async fn test_probe_ok() {
        let url = serve_once("200 OK").await;
        let result = HttpProbe::new().unwrap().probe(&url, 5).await;
        assert_eq!(result.status, CheckStatus::Up);
        assert_eq!(result.status_code, Some(200));
        assert!(result.response_time.is_some());
    }

    #[tokio::test]
    async fn test_probe_does_not_follow_redirects() {
        let url = serve_once("301 Moved Permanently").await;
        let result = HttpProbe::new().unwrap().probe(&url, 5).await;
        assert_eq!(result.status, CheckStatus::Up);
        assert_eq!(result.status_code, Some(301));
    }

    #[tokio::test]
    async fn test_probe_server_error() {
        let url = serve_once("503 Service Unavailable").await;
        let result = HttpProbe::new().unwrap().probe(&url, 5).await;
        assert_eq!(result.status, CheckStatus::Down);
        assert_eq!(result.status_code, Some(503));
        assert_eq!(result.error_message.as_deref(), Some("HTTP 503 Service Unavailable"));
    }

    #[tokio::test]
    async fn test_probe_timeout_is_bounded() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // Accept and never answer.
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let start = Instant::now();
        let result = HttpProbe::new()
            .unwrap()
            .probe(&format!("http://{}/", addr), 1)
            .await;

        assert_eq!(result.status, CheckStatus::Down);
        assert_eq!(result.error_message.as_deref(), Some("Timeout after 1 seconds"));
        assert!(result.status_code.is_none());
        assert!(start.elapsed() < Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_probe_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = HttpProbe::new()
            .unwrap()
            .probe(&format!("http://{}/", addr), 2)
            .await;
        assert_eq!(result.status, CheckStatus::Down);
        assert_eq!(result.error_message.as_deref(), Some("Connection refused"));
        assert!(result.status_code.is_none());
    }

    #[tokio::test]
    async fn test_probe_unresolvable_host() {
        let result = HttpProbe::new()
            .unwrap()
            .probe("http://sitewatch-test.invalid/", 5)
            .await;
        assert_eq!(result.status, CheckStatus::Down);
        assert!(result.status_code.is_none());
        assert_eq!(result.error_message.as_deref(), Some("DNS resolution failed"));
    }

    #[tokio::test]
    async fn test_probe_connection_reset() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 2048];
                let _ = socket.read(&mut buf).await;
                // Zero linger turns the close into a RST.
                #[allow(deprecated)]
                let _ = socket.set_linger(Some(Duration::ZERO));
                drop(socket);
            }
        });

        let result = HttpProbe::new()
            .unwrap()
            .probe(&format!("http://{}/", addr), 2)
            .await;
        assert_eq!(result.status, CheckStatus::Down);
        assert!(result.status_code.is_none());
        assert_eq!(result.error_message.as_deref(), Some("Connection reset"));
    }

    #[derive(Debug)]
    struct Wrapped(io::Error);

    impl std::fmt::Display for Wrapped {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("error sending request")
        }
    }

    impl StdError for Wrapped {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            Some(&self.0)
        }
    }

    fn message_for(err: &(dyn StdError + 'static), connect_timed_out: bool) -> String {
        classify_chain(err, connect_timed_out).to_string()
    }

    #[test]
    fn test_classify_chain_messages() {
        let refused = Wrapped(io::Error::from(io::ErrorKind::ConnectionRefused));
        assert_eq!(message_for(&refused, false), "Connection refused");

        let reset = Wrapped(io::Error::from(io::ErrorKind::ConnectionReset));
        assert_eq!(message_for(&reset, false), "Connection reset");

        let timed_out = Wrapped(io::Error::from(io::ErrorKind::TimedOut));
        assert_eq!(message_for(&timed_out, false), "Connection timeout");

        let dns = Wrapped(io::Error::new(
            io::ErrorKind::Other,
            "dns error: failed to lookup address information",
        ));
        assert_eq!(message_for(&dns, false), "DNS resolution failed");

        let generic = io::Error::new(io::ErrorKind::Other, "invalid peer certificate");
        assert_eq!(message_for(&generic, true), "Connection timeout");
        assert_eq!(message_for(&generic, false), "invalid peer certificate");

        let blank = io::Error::new(io::ErrorKind::Other, "");
        assert_eq!(message_for(&blank, false), "Unknown error");
    }
}
