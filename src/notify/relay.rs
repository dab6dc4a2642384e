//! HTTP mail-relay transport.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use super::{EmailMessage, MailTransport};

#[derive(Serialize)]
struct RelayPayload<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html: &'a str,
    text: &'a str,
}

/// Delivers email by POSTing JSON to a mail relay endpoint.
pub struct RelayTransport {
    client: reqwest::Client,
    endpoint: String,
    from: String,
    token: Option<String>,
}

impl RelayTransport {
    pub fn new(endpoint: &str, from: &str, token: Option<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            from: from.to_string(),
            token,
        })
    }
}

#[async_trait]
impl MailTransport for RelayTransport {
    async fn send(&self, message: &EmailMessage) -> bool {
        let payload = RelayPayload {
            from: &self.from,
            to: &message.to,
            subject: &message.subject,
            html: &message.html,
            text: &message.text,
        };

        let mut request = self.client.post(&self.endpoint).json(&payload);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(resp) if resp.status().is_success() => {
                tracing::info!("Email sent to {}: {}", message.to, message.subject);
                true
            }
            Ok(resp) => {
                tracing::error!("Mail relay rejected message to {}: {}", message.to, resp.status());
                false
            }
            Err(e) => {
                tracing::error!("Email send to {} failed: {}", message.to, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn message() -> EmailMessage {
        EmailMessage {
            to: "ops@example.com".to_string(),
            subject: "🚨 Example is DOWN".to_string(),
            html: "<p>down</p>".to_string(),
            text: "down".to_string(),
        }
    }

    async fn relay_replying(status_line: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                // Drain the whole request so closing doesn't reset the connection.
                let mut buf = vec![0u8; 8192];
                while let Ok(Ok(n)) =
                    tokio::time::timeout(Duration::from_millis(200), socket.read(&mut buf)).await
                {
                    if n == 0 {
                        break;
                    }
                }
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                    status_line
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{}/send", addr)
    }

    #[tokio::test]
    async fn test_relay_accepts() {
        let endpoint = relay_replying("202 Accepted").await;
        let transport = RelayTransport::new(&endpoint, "sitewatch@localhost", None).unwrap();
        assert!(transport.send(&message()).await);
    }

    #[tokio::test]
    async fn test_relay_rejection_is_false() {
        let endpoint = relay_replying("500 Internal Server Error").await;
        let transport =
            RelayTransport::new(&endpoint, "sitewatch@localhost", Some("secret".to_string())).unwrap();
        assert!(!transport.send(&message()).await);
    }

    #[tokio::test]
    async fn test_unreachable_relay_is_false() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport =
            RelayTransport::new(&format!("http://{}/send", addr), "sitewatch@localhost", None).unwrap();
        assert!(!transport.send(&message()).await);
    }
}
