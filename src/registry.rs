use std::sync::Arc;
use uuid::Uuid;

use crate::domain::recipient::Recipients;
use crate::domain::recipient_email::RecipientEmail;
use crate::domain::unsubscribe_token::UnsubscribeToken;
use crate::store::{AccountStore, StoreError};

/// Recipient writes retried on a version conflict before giving up.
pub const MAX_WRITE_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unsubscribed {
    /// The recipient was removed. With no one `remaining` the account was retired as well.
    Removed {
        address: RecipientEmail,
        remaining: usize,
    },
    /// Unknown account, unknown token or a recipient that already left.
    NotFound,
}

#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    #[error("Failed to persist the recipient list.")]
    Persistence(#[source] StoreError),
    #[error("Recipient list kept changing, gave up after {0} attempts.")]
    Contended(usize),
}

/// Recipient sets of stored accounts.
///
/// Every removal re-reads the account, removes the recipient from that copy and writes the whole
/// list back conditioned on the version it read. A concurrent writer makes the write fail and the
/// removal is recomputed, so no removal is lost.
pub struct RecipientRegistry {
    accounts: Arc<dyn AccountStore>,
}

impl RecipientRegistry {
    pub fn new(accounts: Arc<dyn AccountStore>) -> RecipientRegistry {
        RecipientRegistry { accounts }
    }

    #[tracing::instrument(name = "Look up a recipient by token", skip(self, token))]
    pub async fn lookup_by_token(
        &self,
        account_id: Uuid,
        token: &UnsubscribeToken,
    ) -> Result<Option<RecipientEmail>, RegistryError> {
        match self.accounts.get(account_id).await {
            Ok(account) => Ok(account.recipients.lookup_by_token(token).cloned()),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(err) => Err(RegistryError::Persistence(err)),
        }
    }

    /// Removes `address` from the account. Returns `false` when there was nothing to remove.
    #[tracing::instrument(name = "Remove a recipient", skip(self, address))]
    pub async fn remove(
        &self,
        account_id: Uuid,
        address: &RecipientEmail,
    ) -> Result<bool, RegistryError> {
        let outcome = self
            .remove_where(account_id, |recipients| {
                recipients
                    .addresses()
                    .into_iter()
                    .find(|candidate| candidate == address)
            })
            .await?;

        Ok(matches!(outcome, Unsubscribed::Removed { .. }))
    }

    /// Removes the recipient holding `token`. Repeating it is answered with `NotFound`.
    #[tracing::instrument(name = "Unsubscribe a recipient", skip(self, token))]
    pub async fn unsubscribe(
        &self,
        account_id: Uuid,
        token: &UnsubscribeToken,
    ) -> Result<Unsubscribed, RegistryError> {
        self.remove_where(account_id, |recipients| {
            recipients.lookup_by_token(token).cloned()
        })
        .await
    }

    async fn remove_where<F>(&self, account_id: Uuid, pick: F) -> Result<Unsubscribed, RegistryError>
    where
        F: Fn(&Recipients) -> Option<RecipientEmail>,
    {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let account = match self.accounts.get(account_id).await {
                Ok(account) => account,
                Err(StoreError::NotFound(_)) => return Ok(Unsubscribed::NotFound),
                Err(err) => return Err(RegistryError::Persistence(err)),
            };

            let address = match pick(&account.recipients) {
                Some(address) => address,
                None => return Ok(Unsubscribed::NotFound),
            };

            let mut recipients = account.recipients.clone();
            recipients.remove(&address);

            if recipients.is_empty() {
                // The list only shrinks, so whatever changed since the read it is empty now too
                self.retire(account_id).await?;
                return Ok(Unsubscribed::Removed {
                    address,
                    remaining: 0,
                });
            }

            match self
                .accounts
                .update_recipients(account_id, &recipients, account.version)
                .await
            {
                Ok(_) => {
                    return Ok(Unsubscribed::Removed {
                        address,
                        remaining: recipients.len(),
                    })
                }
                Err(StoreError::VersionConflict { .. }) => {
                    tracing::warn!(attempt, "Recipient list changed underneath, retrying");
                }
                Err(StoreError::NotFound(_)) => return Ok(Unsubscribed::NotFound),
                Err(err) => return Err(RegistryError::Persistence(err)),
            }
        }

        Err(RegistryError::Contended(MAX_WRITE_ATTEMPTS))
    }

    /// Deleting the record is what deactivates the account, through the change feed.
    async fn retire(&self, account_id: Uuid) -> Result<(), RegistryError> {
        self.accounts
            .remove(account_id)
            .await
            .map_err(RegistryError::Persistence)?;

        tracing::info!(%account_id, "Last recipient left, account retired");

        Ok(())
    }
}
