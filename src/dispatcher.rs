use std::collections::HashMap;
use std::sync::Arc;

use crate::config::ServiceConfig;
use crate::domain::inbound_message::InboundMessage;
use crate::domain::recipient_email::RecipientEmail;
use crate::email_client::{EmailClient, EmailClientError, RelayedMessage};
use crate::message_store::{MessageLocation, MessageStore, MessageStoreError};
use crate::store::{AccountStore, StoreError};

pub const SOURCE_HEADER: &str = "X-Imux-Source";
pub const ORIGINAL_MESSAGE_ID_HEADER: &str = "X-Original-Message-ID";

#[derive(thiserror::Error, Debug)]
pub enum DispatchError {
    #[error("No live account matches the message destination.")]
    AccountNotFound,
    #[error("Failed to fetch the received message.")]
    Fetch(#[from] MessageStoreError),
    #[error("Received message is malformed: {0}")]
    Malformed(String),
    #[error("Failed to load the account.")]
    Persistence(#[source] StoreError),
    #[error("Failed to relay the message.")]
    Relay(#[source] EmailClientError),
}

/// Relays received messages to the current recipients of the account they were sent to.
pub struct ForwardingDispatcher {
    accounts: Arc<dyn AccountStore>,
    messages: Arc<dyn MessageStore>,
    email_client: Arc<EmailClient>,
    config: ServiceConfig,
}

impl ForwardingDispatcher {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        messages: Arc<dyn MessageStore>,
        email_client: Arc<EmailClient>,
        config: ServiceConfig,
    ) -> ForwardingDispatcher {
        ForwardingDispatcher {
            accounts,
            messages,
            email_client,
            config,
        }
    }

    /// Fetches the stored message and fans it out. Returns how many recipients it was sent to.
    #[tracing::instrument(name = "Dispatch a received message", skip(self), fields(location = %location))]
    pub async fn dispatch(&self, location: &MessageLocation) -> Result<usize, DispatchError> {
        let raw = self.messages.fetch(location).await?;
        let message = InboundMessage::parse(&raw).map_err(DispatchError::Malformed)?;

        let recipients = self.resolve_recipients(&message).await?;
        self.forward(&message, location, &recipients).await?;

        Ok(recipients.len())
    }

    /// Recipients of the destination account as they are right now. Someone leaving right after
    /// this read still gets this message.
    #[tracing::instrument(name = "Resolve message recipients", skip(self, message))]
    pub async fn resolve_recipients(
        &self,
        message: &InboundMessage,
    ) -> Result<Vec<RecipientEmail>, DispatchError> {
        let account_id = message
            .account_id(&self.config.domain)
            .ok_or(DispatchError::AccountNotFound)?;

        let account = match self.accounts.get(account_id).await {
            Ok(account) => account,
            Err(StoreError::NotFound(_)) => return Err(DispatchError::AccountNotFound),
            Err(err) => return Err(DispatchError::Persistence(err)),
        };

        // Retired but not yet swept
        if account.is_retired() {
            return Err(DispatchError::AccountNotFound);
        }

        Ok(account.recipient_addresses())
    }

    /// Relays the message from the account address. Replies go to the original sender and the
    /// headers name the stored original.
    #[tracing::instrument(name = "Forward a message", skip(self, message, recipients), fields(location = %location))]
    pub async fn forward(
        &self,
        message: &InboundMessage,
        location: &MessageLocation,
        recipients: &[RecipientEmail],
    ) -> Result<(), DispatchError> {
        let account_id = message
            .account_id(&self.config.domain)
            .ok_or(DispatchError::AccountNotFound)?;

        let mut headers = HashMap::from([(SOURCE_HEADER.to_string(), location.to_string())]);
        if let Some(message_id) = &message.message_id {
            headers.insert(ORIGINAL_MESSAGE_ID_HEADER.to_string(), message_id.clone());
        }

        let relayed = RelayedMessage {
            from: self.config.address_of(&account_id),
            reply_to: message.from.clone(),
            subject: message.subject.clone(),
            text_body: message.text_body.clone(),
            html_body: message.html_body.clone(),
            headers,
            attachments: message.attachments.clone(),
        };

        self.email_client
            .relay(&relayed, recipients)
            .await
            .map_err(DispatchError::Relay)
    }
}
