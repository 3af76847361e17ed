// Notification delivery to group chats

use crate::errors::NotificationError;
use crate::models::PersonId;
use async_trait::async_trait;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, info, instrument};

/// Placeholder in the webhook URL replaced by the target group id
pub const TARGET_PLACEHOLDER: &str = "{group_id}";

/// Outbound channel for reminder messages.
///
/// Fire-and-forget from the engine's perspective: only success or failure is
/// consumed. Implementations must not impose their own timeout.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(
        &self,
        target: &str,
        title: &str,
        body: &str,
        mentions: &[PersonId],
    ) -> Result<(), NotificationError>;
}

#[derive(Debug, Serialize)]
struct MarkdownMessage<'a> {
    msgtype: &'static str,
    markdown: MarkdownContent<'a>,
    at: AtTargets<'a>,
}

#[derive(Debug, Serialize)]
struct MarkdownContent<'a> {
    title: &'a str,
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AtTargets<'a> {
    at_user_ids: &'a [PersonId],
    is_at_all: bool,
}

#[derive(Debug, Deserialize)]
struct RobotResponse {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

/// Group-robot webhook sink posting markdown messages with @-mentions.
///
/// When a secret is configured every request URL carries a `timestamp` and an
/// HMAC-SHA256 `sign` parameter.
pub struct WebhookNotificationSink {
    client: reqwest::Client,
    webhook_url: String,
    secret: Option<String>,
}

impl WebhookNotificationSink {
    pub fn new(webhook_url: String, secret: Option<String>) -> Result<Self, NotificationError> {
        Url::parse(&webhook_url.replace(TARGET_PLACEHOLDER, "group"))
            .map_err(|e| NotificationError::InvalidConfiguration(e.to_string()))?;

        let client = reqwest::Client::builder().build()?;

        Ok(Self {
            client,
            webhook_url,
            secret,
        })
    }

    fn url_for(&self, target: &str) -> Result<Url, NotificationError> {
        // Group ids may carry `+`, `/` or `=`, which a query string would mangle
        let raw = self
            .webhook_url
            .replace(TARGET_PLACEHOLDER, &urlencoding::encode(target));
        let url =
            Url::parse(&raw).map_err(|e| NotificationError::InvalidConfiguration(e.to_string()))?;

        match &self.secret {
            Some(secret) => sign_url(url, secret, chrono::Utc::now().timestamp_millis()),
            None => Ok(url),
        }
    }
}

/// Append `timestamp` and `sign = base64(HMAC-SHA256(secret, "{timestamp}\n{secret}"))`
pub fn sign_url(mut url: Url, secret: &str, timestamp_ms: i64) -> Result<Url, NotificationError> {
    type HmacSha256 = Hmac<Sha256>;

    let string_to_sign = format!("{}\n{}", timestamp_ms, secret);
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| NotificationError::SigningFailed(e.to_string()))?;
    mac.update(string_to_sign.as_bytes());
    let sign = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());

    url.query_pairs_mut()
        .append_pair("timestamp", &timestamp_ms.to_string())
        .append_pair("sign", &sign);
    Ok(url)
}

/// Markdown body with the mention line the chat client needs to highlight users
fn render_text(body: &str, mentions: &[PersonId]) -> String {
    if mentions.is_empty() {
        return body.to_string();
    }
    let line = mentions
        .iter()
        .map(|id| format!("@{}", id))
        .collect::<Vec<_>>()
        .join(" ");
    format!("{}\n\n{}", body, line)
}

#[async_trait]
impl NotificationSink for WebhookNotificationSink {
    #[instrument(skip_all, fields(group_id = target, mention_count = mentions.len()))]
    async fn send(
        &self,
        target: &str,
        title: &str,
        body: &str,
        mentions: &[PersonId],
    ) -> Result<(), NotificationError> {
        let url = self.url_for(target)?;
        let payload = MarkdownMessage {
            msgtype: "markdown",
            markdown: MarkdownContent {
                title,
                text: render_text(body, mentions),
            },
            at: AtTargets {
                at_user_ids: mentions,
                is_at_all: false,
            },
        };

        let response = self.client.post(url).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotificationError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let reply: RobotResponse = response.json().await?;
        if reply.errcode != 0 {
            return Err(NotificationError::Rejected {
                status: status.as_u16(),
                body: format!("errcode {}: {}", reply.errcode, reply.errmsg),
            });
        }

        debug!(title, "Notification delivered");
        Ok(())
    }
}

/// Sink that only logs; used when no webhook is configured
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    #[instrument(skip_all, fields(group_id = target))]
    async fn send(
        &self,
        target: &str,
        title: &str,
        body: &str,
        mentions: &[PersonId],
    ) -> Result<(), NotificationError> {
        info!(
            group_id = target,
            title,
            mentions = ?mentions,
            body,
            "Reminder notification (log sink)"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_sign_url_appends_timestamp_and_signature() {
        let url = Url::parse("https://robot.example.com/send?access_token=abc").unwrap();
        let signed = sign_url(url, "SECdeadbeef", 1_700_000_000_000).unwrap();

        let pairs: Vec<(String, String)> = signed.query_pairs().into_owned().collect();
        assert_eq!(pairs[0], ("access_token".to_string(), "abc".to_string()));
        assert_eq!(
            pairs[1],
            ("timestamp".to_string(), "1700000000000".to_string())
        );
        assert_eq!(pairs[2].0, "sign");
        let raw = base64::engine::general_purpose::STANDARD
            .decode(&pairs[2].1)
            .unwrap();
        assert_eq!(raw.len(), 32);
    }

    #[test]
    fn test_sign_url_is_deterministic() {
        let url = Url::parse("https://robot.example.com/send").unwrap();
        let a = sign_url(url.clone(), "s3cret", 42).unwrap();
        let b = sign_url(url, "s3cret", 42).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_render_text_appends_mentions() {
        let text = render_text("body", &["u1".to_string(), "u2".to_string()]);
        assert_eq!(text, "body\n\n@u1 @u2");
        assert_eq!(render_text("body", &[]), "body");
    }

    #[test]
    fn test_new_rejects_invalid_url() {
        let result = WebhookNotificationSink::new("not a url".to_string(), None);
        assert!(matches!(
            result,
            Err(NotificationError::InvalidConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn test_webhook_posts_markdown_with_mentions() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/robot/send"))
            .and(body_partial_json(serde_json::json!({
                "msgtype": "markdown",
                "markdown": { "title": "Daily report" },
                "at": { "atUserIds": ["alice"], "isAtAll": false }
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"errcode": 0, "errmsg": "ok"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let sink =
            WebhookNotificationSink::new(format!("{}/robot/send", server.uri()), None).unwrap();
        sink.send("cid-1", "Daily report", "Please submit", &["alice".to_string()])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_webhook_substitutes_target_placeholder() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/groups/cid-9/send"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"errcode": 0, "errmsg": "ok"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let sink = WebhookNotificationSink::new(
            format!("{}/groups/{}/send", server.uri(), TARGET_PLACEHOLDER),
            None,
        )
        .unwrap();
        sink.send("cid-9", "t", "b", &[]).await.unwrap();
    }

    #[test]
    fn test_url_for_escapes_group_id() {
        let sink = WebhookNotificationSink::new(
            format!("https://robot.example.com/send?chat={}", TARGET_PLACEHOLDER),
            Some("s3cret".to_string()),
        )
        .unwrap();

        let url = sink.url_for("cid+ab/c==").unwrap();

        assert!(url.as_str().contains("chat=cid%2Bab%2Fc%3D%3D"));
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs[0], ("chat".to_string(), "cid+ab/c==".to_string()));
        assert_eq!(pairs[1].0, "timestamp");
        assert_eq!(pairs[2].0, "sign");
    }

    #[tokio::test]
    async fn test_webhook_delivers_group_id_with_reserved_characters() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/send"))
            .and(query_param("chat", "cid+ab/c=="))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"errcode": 0, "errmsg": "ok"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let sink = WebhookNotificationSink::new(
            format!("{}/send?chat={}", server.uri(), TARGET_PLACEHOLDER),
            None,
        )
        .unwrap();
        sink.send("cid+ab/c==", "t", "b", &[]).await.unwrap();
    }

    #[tokio::test]
    async fn test_webhook_error_code_is_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"errcode": 310000, "errmsg": "sign not match"})),
            )
            .mount(&server)
            .await;

        let sink = WebhookNotificationSink::new(
            format!("{}/robot/send", server.uri()),
            Some("SECbad".to_string()),
        )
        .unwrap();
        let err = sink.send("cid-1", "t", "b", &[]).await.unwrap_err();
        assert!(err.to_string().contains("sign not match"));
    }

    #[tokio::test]
    async fn test_webhook_http_failure_is_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&server)
            .await;

        let sink =
            WebhookNotificationSink::new(format!("{}/robot/send", server.uri()), None).unwrap();
        let err = sink.send("cid-1", "t", "b", &[]).await.unwrap_err();
        assert!(matches!(err, NotificationError::Rejected { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_log_sink_always_succeeds() {
        let sink = LogNotificationSink;
        assert!(sink.send("cid-1", "t", "b", &[]).await.is_ok());
    }
}
