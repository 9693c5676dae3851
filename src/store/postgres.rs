use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, types::Json, PgPool, Row};
use uuid::Uuid;

use crate::change_feed::{AccountChange, ChangeFeed};
use crate::domain::account::Account;
use crate::domain::order::Order;
use crate::domain::order_state::OrderState;
use crate::domain::recipient::Recipients;
use crate::domain::recipient_email::RecipientEmail;
use crate::store::{AccountStore, OrderStore, StoreError};

pub struct PgAccountStore {
    db_pool: PgPool,
    feed: ChangeFeed,
}

pub struct PgOrderStore {
    db_pool: PgPool,
}

impl PgAccountStore {
    pub fn new(db_pool: PgPool, feed: ChangeFeed) -> PgAccountStore {
        PgAccountStore { db_pool, feed }
    }
}

impl PgOrderStore {
    pub fn new(db_pool: PgPool) -> PgOrderStore {
        PgOrderStore { db_pool }
    }
}

fn account_from_row(row: PgRow) -> Result<Account, sqlx::Error> {
    let recipients: Json<Recipients> = row.try_get("recipients")?;

    Ok(Account {
        id: row.try_get("id")?,
        expires: row.try_get("expires")?,
        recipients: recipients.0,
        version: row.try_get("version")?,
    })
}

fn order_from_row(row: PgRow) -> Result<Order, StoreError> {
    let id: Uuid = row.try_get("id")?;
    let recipients: Json<Vec<RecipientEmail>> = row.try_get("recipients")?;
    let weeks: i32 = row.try_get("weeks")?;
    let state = OrderState::parse(row.try_get("state")?)
        .map_err(|reason| StoreError::Corrupted { id, reason })?;
    let weeks = u32::try_from(weeks).map_err(|_| StoreError::Corrupted {
        id,
        reason: format!("{} is not a valid number of weeks", weeks),
    })?;

    Ok(Order {
        id,
        recipients: recipients.0,
        weeks,
        price: row.try_get("price")?,
        state,
        account: row.try_get("account_id")?,
    })
}

#[async_trait::async_trait]
impl AccountStore for PgAccountStore {
    #[tracing::instrument(name = "Insert a new account into the database", skip(self, account), fields(account_id = %account.id))]
    async fn insert(&self, account: &Account) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO accounts (id, expires, recipients, version)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(account.id)
        .bind(account.expires)
        .bind(Json(&account.recipients))
        .bind(account.version)
        .execute(&self.db_pool)
        .await
        .map_err(|err| {
            tracing::error!("Failed to execute query: {:?}", err);
            err
        })?;

        self.feed.publish(AccountChange::Inserted(account.clone()));

        Ok(())
    }

    #[tracing::instrument(name = "Fetch an account from the database", skip(self))]
    async fn get(&self, id: Uuid) -> Result<Account, StoreError> {
        let account = sqlx::query(
            r#"
            SELECT id, expires, recipients, version
            FROM accounts
            WHERE id = $1
            "#,
        )
        .bind(id)
        .try_map(account_from_row)
        .fetch_optional(&self.db_pool)
        .await?;

        account.ok_or(StoreError::NotFound(id))
    }

    #[tracing::instrument(
        name = "Replace the recipients of an account",
        skip(self, recipients),
        fields(remaining = recipients.len())
    )]
    async fn update_recipients(
        &self,
        id: Uuid,
        recipients: &Recipients,
        expected_version: i64,
    ) -> Result<i64, StoreError> {
        let new_version: Option<i64> = sqlx::query(
            r#"
            UPDATE accounts
            SET recipients = $2, version = version + 1
            WHERE id = $1 AND version = $3
            RETURNING version
            "#,
        )
        .bind(id)
        .bind(Json(recipients))
        .bind(expected_version)
        .map(|row: PgRow| row.get("version"))
        .fetch_optional(&self.db_pool)
        .await?;

        if let Some(version) = new_version {
            return Ok(version);
        }

        // Nothing matched: either the account is gone or somebody else wrote first
        let exists = sqlx::query("SELECT 1 FROM accounts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await?
            .is_some();

        if exists {
            Err(StoreError::VersionConflict {
                id,
                expected: expected_version,
            })
        } else {
            Err(StoreError::NotFound(id))
        }
    }

    #[tracing::instrument(name = "Delete an account from the database", skip(self))]
    async fn remove(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
        let account = sqlx::query(
            r#"
            DELETE FROM accounts
            WHERE id = $1
            RETURNING id, expires, recipients, version
            "#,
        )
        .bind(id)
        .try_map(account_from_row)
        .fetch_optional(&self.db_pool)
        .await?;

        if let Some(account) = &account {
            self.feed.publish(AccountChange::Removed(account.clone()));
        }

        Ok(account)
    }

    #[tracing::instrument(name = "Fetch retirable accounts from the database", skip(self))]
    async fn retirable(&self, now: DateTime<Utc>) -> Result<Vec<Account>, StoreError> {
        let accounts = sqlx::query(
            r#"
            SELECT id, expires, recipients, version
            FROM accounts
            WHERE expires <= $1 OR jsonb_array_length(recipients) = 0
            "#,
        )
        .bind(now)
        .try_map(account_from_row)
        .fetch_all(&self.db_pool)
        .await?;

        Ok(accounts)
    }
}

#[async_trait::async_trait]
impl OrderStore for PgOrderStore {
    #[tracing::instrument(name = "Insert a new order into the database", skip(self, order), fields(order_id = %order.id))]
    async fn insert(&self, order: &Order) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, recipients, weeks, price, state, account_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(order.id)
        .bind(Json(&order.recipients))
        .bind(order.weeks as i32)
        .bind(order.price)
        .bind(order.state.as_ref())
        .bind(order.account)
        .execute(&self.db_pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(name = "Fetch an order from the database", skip(self))]
    async fn get(&self, id: Uuid) -> Result<Order, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, recipients, weeks, price, state, account_id
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db_pool)
        .await?;

        match row {
            Some(row) => order_from_row(row),
            None => Err(StoreError::NotFound(id)),
        }
    }

    #[tracing::instrument(name = "Cancel a pending order", skip(self))]
    async fn cancel(&self, id: Uuid) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE orders
            SET state = 'cancelled'
            WHERE id = $1 AND state = 'pending'
            "#,
        )
        .bind(id)
        .execute(&self.db_pool)
        .await?
        .rows_affected();

        if updated == 0 {
            // Distinguish a missing order from one that already moved on
            self.get(id).await?;
            return Err(StoreError::NotPending(id));
        }

        Ok(())
    }

    #[tracing::instrument(name = "Complete a pending order", skip(self))]
    async fn complete(&self, id: Uuid, account_id: Uuid) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE orders
            SET state = 'success', account_id = $2
            WHERE id = $1 AND state = 'pending'
            "#,
        )
        .bind(id)
        .bind(account_id)
        .execute(&self.db_pool)
        .await?
        .rows_affected();

        if updated == 0 {
            self.get(id).await?;
            return Err(StoreError::NotPending(id));
        }

        Ok(())
    }

    #[tracing::instrument(name = "Reopen a completed order", skip(self))]
    async fn reopen(&self, id: Uuid, account_id: Uuid) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE orders
            SET state = 'pending', account_id = NULL
            WHERE id = $1 AND state = 'success' AND account_id = $2
            "#,
        )
        .bind(id)
        .bind(account_id)
        .execute(&self.db_pool)
        .await?
        .rows_affected();

        if updated == 0 {
            self.get(id).await?;
            return Err(StoreError::NotPending(id));
        }

        Ok(())
    }
}
