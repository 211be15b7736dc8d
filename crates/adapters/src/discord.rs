//! Discord webhook adapter for publishing notices

use async_trait::async_trait;
use dropwatch_domain::{Notice, PublishError, Publisher};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::time::Duration;

const EMBED_COLOR: u32 = 0x00_E7_01;
const MAX_FIELD_VALUE: usize = 1024;

/// Publishes notices as embeds through a webhook URL
pub struct DiscordWebhookPublisher {
    client: Client,
    webhook_url: SecretString,
    username: Option<String>,
    enabled: bool,
}

impl DiscordWebhookPublisher {
    pub fn new(webhook_url: SecretString, username: Option<String>) -> Result<Self, PublishError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PublishError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            webhook_url,
            username,
            enabled: true,
        })
    }

    /// Publisher that refuses every notice (dry runs without a webhook)
    pub fn disabled() -> Self {
        Self {
            client: Client::new(),
            webhook_url: SecretString::from(String::new()),
            username: None,
            enabled: false,
        }
    }

    fn payload<'a>(&'a self, notice: &'a Notice) -> WebhookPayload<'a> {
        let mut fields: Vec<EmbedField> = notice
            .fields
            .iter()
            .map(|c| EmbedField {
                name: c.label.clone(),
                value: truncate(&c.value),
                inline: true,
            })
            .collect();
        fields.push(EmbedField {
            name: "Code".to_string(),
            value: format!("`{}`", notice.code),
            inline: false,
        });

        let (content, roles) = match &notice.ping_role_id {
            Some(role) => (Some(format!("<@&{}>", role)), vec![role.as_str()]),
            None => (None, Vec::new()),
        };

        WebhookPayload {
            content,
            username: self.username.as_deref(),
            embeds: vec![Embed {
                title: &notice.title,
                description: &notice.description,
                url: &notice.url,
                color: EMBED_COLOR,
                fields,
            }],
            allowed_mentions: AllowedMentions {
                parse: Vec::new(),
                roles,
            },
        }
    }
}

fn truncate(value: &str) -> String {
    if value.chars().count() <= MAX_FIELD_VALUE {
        value.to_string()
    } else {
        value.chars().take(MAX_FIELD_VALUE).collect()
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<&'a str>,
    embeds: Vec<Embed<'a>>,
    allowed_mentions: AllowedMentions<'a>,
}

#[derive(Serialize)]
struct Embed<'a> {
    title: &'a str,
    description: &'a str,
    url: &'a str,
    color: u32,
    fields: Vec<EmbedField>,
}

#[derive(Serialize)]
struct EmbedField {
    name: String,
    value: String,
    inline: bool,
}

#[derive(Serialize)]
struct AllowedMentions<'a> {
    parse: Vec<&'a str>,
    roles: Vec<&'a str>,
}

#[async_trait]
impl Publisher for DiscordWebhookPublisher {
    async fn publish(&self, notice: &Notice) -> Result<(), PublishError> {
        if !self.enabled {
            return Err(PublishError::Api("Publisher is disabled".to_string()));
        }

        let response = self
            .client
            .post(self.webhook_url.expose_secret())
            .query(&[("wait", "true")])
            .json(&self.payload(notice))
            .send()
            .await
            .map_err(|e| PublishError::Network(e.without_url().to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(PublishError::Auth(format!(
                "Webhook rejected with status {}",
                status
            )));
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(PublishError::RateLimited);
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PublishError::Api(format!(
                "Webhook returned {}: {}",
                status, body
            )));
        }

        Ok(())
    }

    fn platform(&self) -> &'static str {
        "discord"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dropwatch_domain::Condition;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_notice(ping: Option<&str>) -> Notice {
        Notice {
            title: "NOUVEAU DROP BONUS".to_string(),
            description: "Rang minimum : Bronze".to_string(),
            url: "https://stake.com/settings/offers?code=DROPCODE2026".to_string(),
            code: "DROPCODE2026".to_string(),
            fields: vec![Condition::new("Value", "$5")],
            ping_role_id: ping.map(str::to_string),
            source_key: "tg:1234:7".to_string(),
        }
    }

    fn publisher(server: &MockServer) -> DiscordWebhookPublisher {
        let url = format!("{}/api/webhooks/1/token", server.uri());
        DiscordWebhookPublisher::new(SecretString::new(url.into()), Some("dropwatch".to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_publish_sends_embed_with_role_ping() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/webhooks/1/token"))
            .and(query_param("wait", "true"))
            .and(body_partial_json(serde_json::json!({
                "content": "<@&42>",
                "username": "dropwatch",
                "embeds": [{
                    "title": "NOUVEAU DROP BONUS",
                    "url": "https://stake.com/settings/offers?code=DROPCODE2026",
                    "fields": [
                        { "name": "Value", "value": "$5", "inline": true },
                        { "name": "Code", "value": "`DROPCODE2026`", "inline": false }
                    ]
                }],
                "allowed_mentions": { "parse": [], "roles": ["42"] }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "1"})))
            .expect(1)
            .mount(&mock_server)
            .await;

        publisher(&mock_server)
            .publish(&sample_notice(Some("42")))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_publish_without_ping_omits_content() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({
                "allowed_mentions": { "parse": [], "roles": [] }
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&mock_server)
            .await;

        publisher(&mock_server)
            .publish(&sample_notice(None))
            .await
            .unwrap();

        let requests = mock_server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert!(body.get("content").is_none());
    }

    #[tokio::test]
    async fn test_publish_rate_limited() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&mock_server)
            .await;

        let result = publisher(&mock_server).publish(&sample_notice(None)).await;

        assert!(matches!(result, Err(PublishError::RateLimited)));
    }

    #[tokio::test]
    async fn test_publish_forbidden_is_auth_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&mock_server)
            .await;

        let result = publisher(&mock_server).publish(&sample_notice(None)).await;

        assert!(matches!(result, Err(PublishError::Auth(_))));
    }

    #[tokio::test]
    async fn test_publish_server_error_is_api_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&mock_server)
            .await;

        let result = publisher(&mock_server).publish(&sample_notice(None)).await;

        match result {
            Err(PublishError::Api(message)) => assert!(message.contains("boom")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_disabled_publisher_refuses() {
        let result = DiscordWebhookPublisher::disabled()
            .publish(&sample_notice(None))
            .await;

        assert!(matches!(result, Err(PublishError::Api(_))));
    }

    #[test]
    fn test_long_field_values_are_truncated() {
        let long = "x".repeat(2000);
        assert_eq!(truncate(&long).len(), MAX_FIELD_VALUE);
        assert_eq!(truncate("$5"), "$5");
    }
}
