use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time;

use crate::store::{AccountStore, StoreError};

/// Periodically removes expired accounts, and accounts whose last recipient left but whose
/// removal did not go through. Each removal goes out on the change feed and deactivates the
/// account.
pub struct ExpirySweeper {
    accounts: Arc<dyn AccountStore>,
    interval: time::Duration,
}

impl ExpirySweeper {
    pub fn new(accounts: Arc<dyn AccountStore>, interval: time::Duration) -> ExpirySweeper {
        ExpirySweeper { accounts, interval }
    }

    /// Returns how many accounts were removed.
    #[tracing::instrument(name = "Sweep retirable accounts", skip(self))]
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut removed = 0;

        for account in self.accounts.retirable(now).await? {
            if self.accounts.remove(account.id).await?.is_some() {
                tracing::info!(account_id = %account.id, expires = %account.expires, "Account retired");
                removed += 1;
            }
        }

        Ok(removed)
    }

    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);

        loop {
            ticker.tick().await;

            if let Err(err) = self.sweep_once(Utc::now()).await {
                tracing::error!("Failed to sweep expired accounts: {:?}", err);
            }
        }
    }
}
