//! Telegram Bot API notifier

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use super::Notifier;
use crate::error::{Result, SyncError};
use crate::types::NotifyConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

/// Sends messages through `sendMessage` of one bot to one chat
pub struct TelegramNotifier {
    client: reqwest::Client,
    api_url: String,
    bot_token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(
        api_url: impl Into<String>,
        bot_token: impl Into<String>,
        chat_id: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
        })
    }

    /// Build from a notify section; bot token and chat id are required
    pub fn from_config(config: &NotifyConfig) -> Result<Self> {
        let (Some(bot_token), Some(chat_id)) = (&config.bot_token, &config.chat_id) else {
            return Err(SyncError::Config(
                "Telegram notifications need bot_token and chat_id".to_string(),
            ));
        };
        Self::new(&config.api_url, bot_token, chat_id)
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_url, self.bot_token)
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, message: &str) -> Result<()> {
        let response = self
            .client
            .post(self.endpoint())
            .json(&SendMessage {
                chat_id: &self.chat_id,
                text: message,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Notify(format!("Status {}: {}", status, body)));
        }

        tracing::debug!("Sent notification to chat {}", self.chat_id);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "telegram"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Accept one request, answer with `status`, and hand back the raw request
    async fn serve_once(status: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(split) = text.find("\r\n\r\n") {
                    let length = text[..split]
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if request.len() >= split + 4 + length {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Length: 2\r\nConnection: close\r\n\r\n{{}}",
                status
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });

        (format!("http://{}", addr), handle)
    }

    #[test]
    fn test_endpoint_url() {
        let notifier = TelegramNotifier::new("https://api.telegram.org/", "123:abc", "42").unwrap();
        assert_eq!(
            notifier.endpoint(),
            "https://api.telegram.org/bot123:abc/sendMessage"
        );
    }

    #[test]
    fn test_from_config_requires_credentials() {
        let config = NotifyConfig {
            bot_token: Some("123:abc".to_string()),
            ..NotifyConfig::default()
        };
        assert!(matches!(
            TelegramNotifier::from_config(&config),
            Err(SyncError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_send_posts_chat_and_text() {
        let (url, server) = serve_once("200 OK").await;
        let notifier = TelegramNotifier::new(url, "123:abc", "42").unwrap();

        notifier.send("Synchronization completed").await.unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /bot123:abc/sendMessage"));
        assert!(request.contains(r#""chat_id":"42""#));
        assert!(request.contains(r#""text":"Synchronization completed""#));
    }

    #[tokio::test]
    async fn test_non_success_status_is_error() {
        let (url, server) = serve_once("403 Forbidden").await;
        let notifier = TelegramNotifier::new(url, "123:abc", "42").unwrap();

        let err = notifier.send("hello").await.unwrap_err();
        assert!(matches!(err, SyncError::Notify(_)));
        server.await.unwrap();
    }
}
