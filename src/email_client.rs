use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde_json::Value;
use std::collections::HashMap;
use std::time;

use crate::domain::inbound_message::Attachment;
use crate::domain::recipient_email::RecipientEmail;

const REQUEST_TIMEOUT: time::Duration = time::Duration::from_secs(10);
// Sendgrid rejects requests with more personalizations than this
pub const MAX_PERSONALIZATIONS: usize = 1000;

pub struct EmailClient {
    http_client: Client,
    base_url: String,
    sender: RecipientEmail,
    api_key: Secret<String>,
    max_batch_size: usize,
}

/// A received message rewritten for relaying: sent from the account address, replies go to the
/// original sender and `headers` point back at the stored original.
#[derive(Debug, Clone)]
pub struct RelayedMessage {
    pub from: String,
    pub reply_to: Option<String>,
    pub subject: String,
    pub text_body: Option<String>,
    pub html_body: Option<String>,
    pub headers: HashMap<String, String>,
    pub attachments: Vec<Attachment>,
}

#[derive(thiserror::Error, Debug)]
pub enum EmailClientError {
    #[error("The provider did not accept {} of {attempted} destinations.", failed.len())]
    PartialFailure {
        failed: Vec<RecipientEmail>,
        attempted: usize,
    },
}

#[derive(serde::Serialize)]
struct TemplatedEmailBody<'a> {
    personalizations: Vec<TemplatedPersonalization>,
    from: SendgridEmail,
    template_id: &'a str,
}

#[derive(serde::Serialize)]
struct TemplatedPersonalization {
    to: Vec<SendgridEmail>,
    dynamic_template_data: Value,
}

#[derive(serde::Serialize)]
struct RelayEmailBody<'a> {
    personalizations: Vec<SendgridPersonalization>,
    from: SendgridEmail,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<SendgridEmail>,
    subject: &'a str,
    content: Vec<SendgridContent>,
    headers: &'a HashMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<SendgridAttachment<'a>>,
}

#[derive(serde::Serialize)]
struct SendgridEmail {
    email: String,
}

#[derive(serde::Serialize)]
struct SendgridAttachment<'a> {
    content: String,
    filename: &'a str,
    #[serde(rename = "type")]
    content_type: &'a str,
    disposition: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_id: Option<&'a str>,
}

#[derive(serde::Serialize)]
struct SendgridPersonalization {
    to: Vec<SendgridEmail>,
}

#[derive(serde::Serialize, Clone)]
struct SendgridContent {
    #[serde(rename = "type")]
    content_type: String,
    value: String,
}

impl EmailClient {
    pub fn new(
        base_url: String,
        sender: RecipientEmail,
        api_key: Secret<String>,
        timeout: Option<time::Duration>,
        max_batch_size: usize,
    ) -> EmailClient {
        let http_client = Client::builder()
            .timeout(timeout.unwrap_or(REQUEST_TIMEOUT))
            .build()
            .expect("Failed to build the HTTP client.");

        EmailClient {
            http_client,
            base_url,
            sender,
            api_key,
            max_batch_size: max_batch_size.clamp(1, MAX_PERSONALIZATIONS),
        }
    }

    /// Sends `template_id` to every destination, one personalization each. A destination's
    /// payload is layered over `default_payload`. Destinations are split into provider-sized
    /// batches; batches the provider rejects are reported back as a partial failure.
    #[tracing::instrument(
        name = "Send a templated batch",
        skip(self, default_payload, destinations),
        fields(destinations = destinations.len())
    )]
    pub async fn send_batch(
        &self,
        template_id: &str,
        default_payload: &Value,
        destinations: &[(RecipientEmail, Value)],
    ) -> Result<(), EmailClientError> {
        let mut failed = Vec::new();

        for batch in destinations.chunks(self.max_batch_size) {
            let body = TemplatedEmailBody {
                personalizations: batch
                    .iter()
                    .map(|(address, payload)| TemplatedPersonalization {
                        to: vec![SendgridEmail {
                            email: String::from(address.as_ref()),
                        }],
                        dynamic_template_data: merge_payloads(default_payload, payload),
                    })
                    .collect(),
                from: SendgridEmail {
                    email: String::from(self.sender.as_ref()),
                },
                template_id,
            };

            if let Err(err) = self.post(&body).await {
                tracing::error!("Provider rejected a batch of {}: {:?}", batch.len(), err);
                failed.extend(batch.iter().map(|(address, _)| address.clone()));
            }
        }

        into_outcome(failed, destinations.len())
    }

    /// Relays one message to every recipient. Each recipient gets its own personalization so
    /// recipients do not see each other.
    #[tracing::instrument(
        name = "Relay a message",
        skip(self, message, recipients),
        fields(from = %message.from, recipients = recipients.len())
    )]
    pub async fn relay(
        &self,
        message: &RelayedMessage,
        recipients: &[RecipientEmail],
    ) -> Result<(), EmailClientError> {
        let mut failed = Vec::new();
        let content = relay_content(message);

        for batch in recipients.chunks(self.max_batch_size) {
            let body = RelayEmailBody {
                personalizations: batch
                    .iter()
                    .map(|recipient| SendgridPersonalization {
                        to: vec![SendgridEmail {
                            email: String::from(recipient.as_ref()),
                        }],
                    })
                    .collect(),
                from: SendgridEmail {
                    email: message.from.clone(),
                },
                reply_to: message
                    .reply_to
                    .as_ref()
                    .map(|email| SendgridEmail {
                        email: email.clone(),
                    }),
                subject: &message.subject,
                content: content.clone(),
                headers: &message.headers,
                attachments: relay_attachments(message),
            };

            if let Err(err) = self.post(&body).await {
                tracing::error!("Provider rejected a relay batch of {}: {:?}", batch.len(), err);
                failed.extend(batch.iter().cloned());
            }
        }

        into_outcome(failed, recipients.len())
    }

    async fn post<Body: serde::Serialize>(&self, body: &Body) -> Result<(), reqwest::Error> {
        let url = format!("{}/mail/send", self.base_url);

        self.http_client
            .post(&url)
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .json(body)
            .send()
            .await?
            .error_for_status()?; // return an error when server response status code is 4xx or 5xx

        Ok(())
    }
}

fn into_outcome(failed: Vec<RecipientEmail>, attempted: usize) -> Result<(), EmailClientError> {
    if failed.is_empty() {
        Ok(())
    } else {
        Err(EmailClientError::PartialFailure { failed, attempted })
    }
}

fn merge_payloads(default_payload: &Value, payload: &Value) -> Value {
    match (default_payload, payload) {
        (Value::Object(defaults), Value::Object(values)) => {
            let mut merged = defaults.clone();
            merged.extend(values.clone());
            Value::Object(merged)
        }
        (_, Value::Null) => default_payload.clone(),
        _ => payload.clone(),
    }
}

// Sendgrid wants text/plain before text/html and at least one of them
fn relay_content(message: &RelayedMessage) -> Vec<SendgridContent> {
    let mut content = Vec::new();

    if let Some(text) = &message.text_body {
        content.push(SendgridContent {
            content_type: String::from("text/plain"),
            value: text.clone(),
        });
    }
    if let Some(html) = &message.html_body {
        content.push(SendgridContent {
            content_type: String::from("text/html"),
            value: html.clone(),
        });
    }
    if content.is_empty() {
        content.push(SendgridContent {
            content_type: String::from("text/plain"),
            value: String::from(" "),
        });
    }

    content
}

// Sendgrid only accepts base64 content and needs a file name on every attachment
fn relay_attachments(message: &RelayedMessage) -> Vec<SendgridAttachment<'_>> {
    message
        .attachments
        .iter()
        .map(|attachment| SendgridAttachment {
            content: STANDARD.encode(&attachment.content),
            filename: &attachment.filename,
            content_type: &attachment.content_type,
            disposition: if attachment.inline { "inline" } else { "attachment" },
            content_id: attachment.content_id.as_deref(),
        })
        .collect()
}
