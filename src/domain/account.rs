use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::domain::recipient::Recipients;
use crate::domain::recipient_email::RecipientEmail;

/// A forwarding alias `<id>@<domain>` with an expiry and a shrinking set of recipients.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub expires: DateTime<Utc>,
    pub recipients: Recipients,
    /// Bumped by the store on every recipient write, used for conditional updates.
    pub version: i64,
}

impl Account {
    pub fn new(recipients: Recipients, expires: DateTime<Utc>) -> Account {
        Account {
            id: Uuid::new_v4(),
            expires,
            recipients,
            version: 0,
        }
    }

    pub fn expiring_after(recipients: Recipients, duration: Duration) -> Account {
        Self::new(recipients, Utc::now() + duration)
    }

    pub fn recipient_addresses(&self) -> Vec<RecipientEmail> {
        self.recipients.addresses()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires <= now
    }

    /// An account without recipients no longer forwards anything.
    pub fn is_retired(&self) -> bool {
        self.recipients.is_empty()
    }
}
