use crate::domain::{JobKey, SubscriberEmail};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One fully rendered message ready for the transport.
#[derive(Clone, Debug)]
pub struct OutgoingEmail {
    pub to: SubscriberEmail,
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
    /// Advertised through the `List-Unsubscribe` headers.
    pub unsubscribe_url: Option<String>,
    /// Echoed back by delivery webhooks.
    pub job: Option<JobKey>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendReceipt {
    pub message_id: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("The mail transport rejected the recipient: {0}")]
    Rejected(String),
    #[error("The mail transport is unavailable")]
    Outage(#[source] anyhow::Error),
    #[error("The mail transport failed temporarily")]
    Transient(#[source] anyhow::Error),
}

impl SendError {
    pub fn is_outage(&self) -> bool {
        matches!(self, Self::Outage(_))
    }
}

impl From<reqwest::Error> for SendError {
    fn from(e: reqwest::Error) -> Self {
        let outage = e.is_connect()
            || matches!(
                e.status(),
                Some(StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
            );

        if outage {
            Self::Outage(e.into())
        } else {
            Self::Transient(e.into())
        }
    }
}

/// Outbound mail. Implementations make a single attempt; retries belong to
/// the dispatcher.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<SendReceipt, SendError>;
}

/// Postmark-compatible HTTP client.
#[derive(Clone)]
pub struct EmailClient {
    http_client: Client,
    base_url: String,
    sender: SubscriberEmail,
    authorization_token: Secret<String>,
}

impl EmailClient {
    pub fn new(
        base_url: String,
        sender: SubscriberEmail,
        authorization_token: Secret<String>,
        timeout: Duration,
    ) -> Result<Self, anyhow::Error> {
        let http_client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http_client,
            base_url,
            sender,
            authorization_token,
        })
    }
}

#[async_trait]
impl MailTransport for EmailClient {
    #[tracing::instrument(name = "Sending email", skip_all, fields(recipient = %email.to))]
    async fn send(&self, email: &OutgoingEmail) -> Result<SendReceipt, SendError> {
        let url = format!("{}/email", &self.base_url);

        let unsubscribe_link = email.unsubscribe_url.as_ref().map(|url| format!("<{url}>"));
        let headers = match &unsubscribe_link {
            Some(link) => vec![
                MessageHeader {
                    name: "List-Unsubscribe",
                    value: link,
                },
                MessageHeader {
                    name: "List-Unsubscribe-Post",
                    value: "List-Unsubscribe=One-Click",
                },
            ],
            None => Vec::new(),
        };

        let request_body = SendEmailRequest {
            from: self.sender.as_ref(),
            to: email.to.as_ref(),
            subject: &email.subject,
            html_body: &email.html_body,
            text_body: &email.text_body,
            headers,
            metadata: email.job.map(|key| Metadata {
                campaign_id: key.campaign_id.to_string(),
                subscriber_id: key.subscriber_id.to_string(),
            }),
        };

        let response = self
            .http_client
            .post(&url)
            .header(
                "X-Postmark-Server-Token",
                self.authorization_token.expose_secret(),
            )
            .json(&request_body)
            .send()
            .await?;

        if response.status() == StatusCode::UNPROCESSABLE_ENTITY {
            let reason = response
                .json::<SendEmailResponse>()
                .await
                .ok()
                .and_then(|body| body.message)
                .unwrap_or_else(|| "Unprocessable recipient".into());
            return Err(SendError::Rejected(reason));
        }

        let response = response.error_for_status()?;

        // The message was accepted at this point; an unreadable body only
        // costs us the message id.
        let message_id = response
            .json::<SendEmailResponse>()
            .await
            .ok()
            .and_then(|body| body.message_id);

        Ok(SendReceipt { message_id })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html_body: &'a str,
    text_body: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    headers: Vec<MessageHeader<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<Metadata>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct MessageHeader<'a> {
    name: &'a str,
    value: &'a str,
}

#[derive(Serialize)]
struct Metadata {
    campaign_id: String,
    subscriber_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SendEmailResponse {
    #[serde(rename = "MessageID")]
    message_id: Option<String>,
    message: Option<String>,
}
