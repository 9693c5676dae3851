use tokio::sync::mpsc;

use crate::domain::account::Account;

/// A committed change on the account store, carrying the account as it was written or removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountChange {
    Inserted(Account),
    Removed(Account),
}

impl AccountChange {
    pub fn account(&self) -> &Account {
        match self {
            AccountChange::Inserted(account) | AccountChange::Removed(account) => account,
        }
    }
}

/// Publishing half of the account change feed, owned by the account stores.
#[derive(Clone)]
pub struct ChangeFeed {
    sender: mpsc::UnboundedSender<AccountChange>,
}

/// Consuming half of the account change feed. Changes arrive in publish order. The in-memory
/// store publishes under its write lock, so that is its write order. The Postgres store publishes
/// after commit, so two writers on different tasks may publish in either order.
pub struct ChangeStream {
    receiver: mpsc::UnboundedReceiver<AccountChange>,
}

pub fn change_feed() -> (ChangeFeed, ChangeStream) {
    let (sender, receiver) = mpsc::unbounded_channel();

    (ChangeFeed { sender }, ChangeStream { receiver })
}

impl ChangeFeed {
    pub fn publish(&self, change: AccountChange) {
        let account_id = change.account().id;

        if self.sender.send(change).is_err() {
            tracing::error!(%account_id, "Change feed is closed, account change was dropped");
        }
    }
}

impl ChangeStream {
    pub async fn next(&mut self) -> Option<AccountChange> {
        self.receiver.recv().await
    }
}
