//! Account lifecycle: `Created` (stored) → `Active` (address in the mail acceptance rule) →
//! `Retired` (removed from the store and the rule). There are no back transitions.
//!
//! Transitions are driven by the account change feed: an insert activates the account and then
//! introduces it to its recipients, a removal deactivates it.

use chrono::Duration;
use serde_json::json;
use std::sync::Arc;

use crate::change_feed::{AccountChange, ChangeStream};
use crate::config::ServiceConfig;
use crate::domain::account::Account;
use crate::domain::recipient::Recipients;
use crate::domain::recipient_email::RecipientEmail;
use crate::email_client::{EmailClient, EmailClientError};
use crate::mail_rule::{RuleError, RuleStore};
use crate::store::{AccountStore, StoreError};

/// Rule writes retried on a version conflict before giving up.
pub const MAX_RULE_ATTEMPTS: usize = 5;

#[derive(thiserror::Error, Debug)]
pub enum LifecycleError {
    #[error("An account needs at least one recipient.")]
    NoRecipients,
    #[error("An account must last a positive duration.")]
    InvalidDuration,
    #[error("Failed to persist the account.")]
    Persistence(#[source] StoreError),
    #[error("Failed to read the mail acceptance rule.")]
    RuleRead(#[source] RuleError),
    #[error("Failed to write the mail acceptance rule.")]
    RuleWrite(#[source] RuleError),
    #[error("Failed to introduce the account to its recipients.")]
    Notify(#[source] EmailClientError),
}

impl LifecycleError {
    /// The rule no longer mirrors the live accounts: mail bounces for a paid account or is still
    /// accepted for a retired one.
    pub fn is_rule_sync(&self) -> bool {
        matches!(self, LifecycleError::RuleRead(_) | LifecycleError::RuleWrite(_))
    }
}

pub struct AccountLifecycle {
    accounts: Arc<dyn AccountStore>,
    rules: Arc<dyn RuleStore>,
    email_client: Arc<EmailClient>,
    config: ServiceConfig,
}

impl AccountLifecycle {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        rules: Arc<dyn RuleStore>,
        email_client: Arc<EmailClient>,
        config: ServiceConfig,
    ) -> AccountLifecycle {
        AccountLifecycle {
            accounts,
            rules,
            email_client,
            config,
        }
    }

    /// Stores a new account with one fresh unsubscribe token per recipient, expiring after
    /// `duration`. Nothing references the id before the insert succeeds, so a failed insert
    /// leaves nothing behind.
    #[tracing::instrument(
        name = "Create a new account",
        skip(self, recipients),
        fields(recipients = recipients.len(), duration = %duration)
    )]
    pub async fn create(
        &self,
        recipients: Vec<RecipientEmail>,
        duration: Duration,
    ) -> Result<Account, LifecycleError> {
        let account = Self::draft(recipients, duration)?;
        self.insert(&account).await?;

        Ok(account)
    }

    /// Builds an account without storing it, so its id can be handed out before anything
    /// observes the account.
    pub fn draft(recipients: Vec<RecipientEmail>, duration: Duration) -> Result<Account, LifecycleError> {
        if duration <= Duration::zero() {
            return Err(LifecycleError::InvalidDuration);
        }

        let recipients = Recipients::issue(recipients);
        if recipients.is_empty() {
            return Err(LifecycleError::NoRecipients);
        }

        Ok(Account::expiring_after(recipients, duration))
    }

    /// Stores a drafted account. The insert is what starts activation.
    #[tracing::instrument(name = "Store a new account", skip(self, account), fields(account_id = %account.id))]
    pub async fn insert(&self, account: &Account) -> Result<(), LifecycleError> {
        self.accounts
            .insert(account)
            .await
            .map_err(LifecycleError::Persistence)?;

        tracing::info!(account_id = %account.id, "Account created");

        Ok(())
    }

    /// Adds the account address to the mail acceptance rule. Already present is a no-op.
    #[tracing::instrument(name = "Activate an account", skip(self, account), fields(account_id = %account.id))]
    pub async fn activate(&self, account: &Account) -> Result<(), LifecycleError> {
        let address = self.config.address_of(&account.id);

        self.edit_rule(|addresses| {
            if addresses.contains(&address) {
                return None;
            }
            let mut addresses = addresses.to_vec();
            addresses.push(address.clone());
            Some(addresses)
        })
        .await
    }

    /// Removes every occurrence of the account address from the mail acceptance rule. An
    /// address that is not there is a no-op.
    #[tracing::instrument(name = "Deactivate an account", skip(self, account), fields(account_id = %account.id))]
    pub async fn deactivate(&self, account: &Account) -> Result<(), LifecycleError> {
        let address = self.config.address_of(&account.id);

        self.edit_rule(|addresses| {
            if !addresses.contains(&address) {
                return None;
            }
            Some(
                addresses
                    .iter()
                    .filter(|entry| **entry != address)
                    .cloned()
                    .collect(),
            )
        })
        .await
    }

    /// Sends the introduction template to every recipient, each with its own unsubscribe token.
    /// Recipients the provider rejected are logged one by one.
    #[tracing::instrument(name = "Introduce an account to its recipients", skip(self, account), fields(account_id = %account.id))]
    pub async fn notify(&self, account: &Account) -> Result<(), LifecycleError> {
        let default_payload = json!({
            "id": account.id,
            "address": self.config.address_of(&account.id),
        });
        let destinations: Vec<_> = account
            .recipients
            .iter()
            .map(|recipient| {
                let unsubscribe_url = format!(
                    "{}/unsubscribe?id={}&token={}",
                    self.config.base_url,
                    account.id,
                    recipient.token.as_ref()
                );
                (
                    recipient.address.clone(),
                    json!({ "token": recipient.token.as_ref(), "unsubscribe_url": unsubscribe_url }),
                )
            })
            .collect();

        self.email_client
            .send_batch(&self.config.intro_template, &default_payload, &destinations)
            .await
            .map_err(|err| {
                let EmailClientError::PartialFailure { failed, .. } = &err;
                for address in failed {
                    tracing::error!(recipient = %address, "Introduction email was not delivered");
                }
                LifecycleError::Notify(err)
            })
    }

    /// Applies one change from the account feed. Activation completes before the introduction
    /// is sent; a lost introduction does not undo the activation.
    pub async fn handle_change(&self, change: AccountChange) -> Result<(), LifecycleError> {
        match change {
            AccountChange::Inserted(account) => {
                // A removal published ahead of this insert already ran its deactivation
                match self.accounts.get(account.id).await {
                    Ok(_) => {}
                    Err(StoreError::NotFound(_)) => {
                        tracing::info!(account_id = %account.id, "Account already removed, not activating");
                        return Ok(());
                    }
                    Err(err) => return Err(LifecycleError::Persistence(err)),
                }

                self.activate(&account).await?;

                if let Err(err) = self.notify(&account).await {
                    tracing::error!(account_id = %account.id, "Failed to notify recipients: {:?}", err);
                }

                Ok(())
            }
            AccountChange::Removed(account) => self.deactivate(&account).await,
        }
    }

    /// Read-modify-write of the rule, conditioned on the version that was read. `edit` returns
    /// `None` when the rule already has the wanted shape.
    async fn edit_rule<F>(&self, edit: F) -> Result<(), LifecycleError>
    where
        F: Fn(&[String]) -> Option<Vec<String>>,
    {
        let rule = &self.config.rule;

        for attempt in 1..=MAX_RULE_ATTEMPTS {
            let snapshot = self
                .rules
                .describe(rule)
                .await
                .map_err(LifecycleError::RuleRead)?;

            let addresses = match edit(&snapshot.addresses) {
                Some(addresses) => addresses,
                None => return Ok(()),
            };

            match self.rules.replace(rule, &addresses, snapshot.version).await {
                Ok(_) => return Ok(()),
                Err(RuleError::Conflict) => {
                    tracing::warn!(attempt, "Mail acceptance rule changed underneath, retrying");
                }
                Err(err) => return Err(LifecycleError::RuleWrite(err)),
            }
        }

        Err(LifecycleError::RuleWrite(RuleError::Conflict))
    }
}

/// Consumes the account change feed until every publisher is gone.
pub async fn run_lifecycle_worker(mut changes: ChangeStream, lifecycle: Arc<AccountLifecycle>) {
    while let Some(change) = changes.next().await {
        let account_id = change.account().id;

        if let Err(err) = lifecycle.handle_change(change).await {
            if err.is_rule_sync() {
                tracing::error!(%account_id, alert = true, "Mail acceptance rule is out of sync: {:?}", err);
            } else {
                tracing::error!(%account_id, "Failed to handle account change: {:?}", err);
            }
        }
    }

    tracing::info!("Account change feed closed, lifecycle worker stopping");
}
