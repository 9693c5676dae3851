//! Durable records: accounts (with their change feed) and orders.
//!
//! Both stores come in two flavours, Postgres for deployments and in-memory for tests and
//! local runs. Account stores publish every committed insert and removal on the
//! [`ChangeFeed`](crate::change_feed::ChangeFeed) they were built with.

mod memory;
mod postgres;

pub use memory::{InMemoryAccountStore, InMemoryOrderStore};
pub use postgres::{PgAccountStore, PgOrderStore};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::account::Account;
use crate::domain::order::Order;
use crate::domain::recipient::Recipients;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("Record {0} was not found.")]
    NotFound(Uuid),
    #[error("Record {id} was modified concurrently, expected version {expected}.")]
    VersionConflict { id: Uuid, expected: i64 },
    #[error("Order {0} is no longer pending.")]
    NotPending(Uuid),
    #[error("Record {id} could not be decoded: {reason}")]
    Corrupted { id: Uuid, reason: String },
    #[error("Failed to access the database.")]
    Database(#[from] sqlx::Error),
}

#[async_trait::async_trait]
pub trait AccountStore: Send + Sync {
    /// Persists a new account with its full recipient set and publishes `Inserted`.
    async fn insert(&self, account: &Account) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Account, StoreError>;

    /// Replaces the whole recipient list if the stored version still equals `expected_version`.
    /// Returns the new version.
    async fn update_recipients(
        &self,
        id: Uuid,
        recipients: &Recipients,
        expected_version: i64,
    ) -> Result<i64, StoreError>;

    /// Deletes the account and publishes `Removed`. Removing a missing account returns `None`.
    async fn remove(&self, id: Uuid) -> Result<Option<Account>, StoreError>;

    /// Accounts due for retirement: expired at `now`, or left without recipients.
    async fn retirable(&self, now: DateTime<Utc>) -> Result<Vec<Account>, StoreError>;
}

#[async_trait::async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert(&self, order: &Order) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Order, StoreError>;

    /// Moves a pending order to cancelled.
    async fn cancel(&self, id: Uuid) -> Result<(), StoreError>;

    /// Moves a pending order to success and links the account created for it.
    async fn complete(&self, id: Uuid, account_id: Uuid) -> Result<(), StoreError>;

    /// Undoes `complete` for an order still linked to `account_id`, back to pending with no
    /// account. Fails with `NotPending` when the order is in any other state.
    async fn reopen(&self, id: Uuid, account_id: Uuid) -> Result<(), StoreError>;
}
