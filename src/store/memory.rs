use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::change_feed::{AccountChange, ChangeFeed};
use crate::domain::account::Account;
use crate::domain::order::Order;
use crate::domain::order_state::OrderState;
use crate::domain::recipient::Recipients;
use crate::store::{AccountStore, OrderStore, StoreError};

pub struct InMemoryAccountStore {
    accounts: RwLock<HashMap<Uuid, Account>>,
    feed: ChangeFeed,
}

#[derive(Default)]
pub struct InMemoryOrderStore {
    orders: RwLock<HashMap<Uuid, Order>>,
}

impl InMemoryAccountStore {
    pub fn new(feed: ChangeFeed) -> InMemoryAccountStore {
        InMemoryAccountStore {
            accounts: RwLock::new(HashMap::new()),
            feed,
        }
    }

    pub async fn len(&self) -> usize {
        self.accounts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.accounts.read().await.is_empty()
    }
}

impl InMemoryOrderStore {
    pub fn new() -> InMemoryOrderStore {
        InMemoryOrderStore::default()
    }

    async fn transition(&self, id: Uuid, update: impl FnOnce(&mut Order)) -> Result<(), StoreError> {
        let mut orders = self.orders.write().await;
        let order = orders.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        if !order.state.is_pending() {
            return Err(StoreError::NotPending(id));
        }
        update(order);

        Ok(())
    }
}

#[async_trait::async_trait]
impl AccountStore for InMemoryAccountStore {
    // Publishing under the write lock keeps the feed in the order the writes happened
    async fn insert(&self, account: &Account) -> Result<(), StoreError> {
        let mut accounts = self.accounts.write().await;
        if accounts.contains_key(&account.id) {
            return Err(StoreError::VersionConflict {
                id: account.id,
                expected: account.version,
            });
        }
        accounts.insert(account.id, account.clone());
        self.feed.publish(AccountChange::Inserted(account.clone()));

        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Account, StoreError> {
        self.accounts
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn update_recipients(
        &self,
        id: Uuid,
        recipients: &Recipients,
        expected_version: i64,
    ) -> Result<i64, StoreError> {
        let mut accounts = self.accounts.write().await;
        let account = accounts.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        if account.version != expected_version {
            return Err(StoreError::VersionConflict {
                id,
                expected: expected_version,
            });
        }
        account.recipients = recipients.clone();
        account.version += 1;

        Ok(account.version)
    }

    async fn remove(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
        let mut accounts = self.accounts.write().await;
        let account = accounts.remove(&id);

        if let Some(account) = &account {
            self.feed.publish(AccountChange::Removed(account.clone()));
        }

        Ok(account)
    }

    async fn retirable(&self, now: DateTime<Utc>) -> Result<Vec<Account>, StoreError> {
        Ok(self
            .accounts
            .read()
            .await
            .values()
            .filter(|account| account.is_expired(now) || account.is_retired())
            .cloned()
            .collect())
    }
}

#[async_trait::async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, order: &Order) -> Result<(), StoreError> {
        self.orders.write().await.insert(order.id, order.clone());

        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Order, StoreError> {
        self.orders
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn cancel(&self, id: Uuid) -> Result<(), StoreError> {
        self.transition(id, |order| order.state = OrderState::Cancelled)
            .await
    }

    async fn complete(&self, id: Uuid, account_id: Uuid) -> Result<(), StoreError> {
        self.transition(id, |order| {
            order.state = OrderState::Success;
            order.account = Some(account_id);
        })
        .await
    }

    async fn reopen(&self, id: Uuid, account_id: Uuid) -> Result<(), StoreError> {
        let mut orders = self.orders.write().await;
        let order = orders.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        if !order.state.is_success() || order.account != Some(account_id) {
            return Err(StoreError::NotPending(id));
        }
        order.state = OrderState::Pending;
        order.account = None;

        Ok(())
    }
}
