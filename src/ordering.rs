use chrono::Duration;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::new_order::NewOrder;
use crate::domain::order::Order;
use crate::domain::order_state::OrderState;
use crate::lifecycle::{AccountLifecycle, LifecycleError};
use crate::store::{OrderStore, StoreError};

/// Payment events delivered by the checkout provider once their signature has been verified.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentEvent {
    CheckoutCompleted { order_id: Uuid },
    CheckoutCancelled { order_id: Uuid },
}

#[derive(thiserror::Error)]
pub enum OrderingError {
    #[error("Order {0} was not found.")]
    NotFound(Uuid),
    #[error("Order {0} was cancelled.")]
    Cancelled(Uuid),
    #[error("Order {0} was already fulfilled.")]
    AlreadyFulfilled(Uuid),
    #[error("Failed to persist the order.")]
    Persistence(#[source] StoreError),
    #[error("Failed to create the account of the order.")]
    Lifecycle(#[from] LifecycleError),
}

impl std::fmt::Debug for OrderingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)?;
        if let Some(cause) = std::error::Error::source(self) {
            write!(f, "\nCaused by:\n\t{}", cause)?;
        }
        Ok(())
    }
}

impl From<StoreError> for OrderingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => OrderingError::NotFound(id),
            err => OrderingError::Persistence(err),
        }
    }
}

pub struct OrderService {
    orders: Arc<dyn OrderStore>,
    lifecycle: Arc<AccountLifecycle>,
    price: i64,
}

impl OrderService {
    pub fn new(orders: Arc<dyn OrderStore>, lifecycle: Arc<AccountLifecycle>, price: i64) -> OrderService {
        OrderService {
            orders,
            lifecycle,
            price,
        }
    }

    /// Records a pending order at checkout start.
    #[tracing::instrument(name = "Place an order", skip(self, new_order), fields(weeks = new_order.weeks))]
    pub async fn place(&self, new_order: NewOrder) -> Result<Order, OrderingError> {
        let order = Order {
            id: Uuid::new_v4(),
            recipients: new_order.recipients,
            weeks: new_order.weeks,
            price: self.price,
            state: OrderState::Pending,
            account: None,
        };
        self.orders.insert(&order).await?;

        Ok(order)
    }

    #[tracing::instrument(name = "Handle a payment event", skip(self))]
    pub async fn handle_event(&self, event: PaymentEvent) -> Result<(), OrderingError> {
        match event {
            PaymentEvent::CheckoutCompleted { order_id } => self.fulfil(order_id).await.map(|_| ()),
            PaymentEvent::CheckoutCancelled { order_id } => self.cancel(order_id).await,
        }
    }

    /// Creates the account of a paid order and links it. A repeated completion returns the
    /// account linked the first time instead of creating another one.
    ///
    /// The order is linked to the drafted account before the account is stored. Storing it is
    /// what activates and announces it, so an account only goes live once it owns its order.
    #[tracing::instrument(name = "Fulfil an order", skip(self))]
    pub async fn fulfil(&self, order_id: Uuid) -> Result<Uuid, OrderingError> {
        let order = self.orders.get(order_id).await?;

        match (order.state, order.account) {
            (OrderState::Success, Some(account_id)) => {
                tracing::info!(%account_id, "Order already fulfilled");
                return Ok(account_id);
            }
            (OrderState::Success, None) => return Err(OrderingError::AlreadyFulfilled(order_id)),
            (OrderState::Cancelled, _) => return Err(OrderingError::Cancelled(order_id)),
            (OrderState::Pending, _) => {}
        }

        let account =
            AccountLifecycle::draft(order.recipients, Duration::weeks(i64::from(order.weeks)))?;

        match self.orders.complete(order_id, account.id).await {
            Ok(()) => {}
            // Another completion won, its account is the order's account
            Err(StoreError::NotPending(_)) => return self.linked_account(order_id).await,
            Err(err) => return Err(err.into()),
        }

        if let Err(err) = self.lifecycle.insert(&account).await {
            // Back to pending so a redelivered event fulfils the order again
            if let Err(reopen_err) = self.orders.reopen(order_id, account.id).await {
                tracing::error!(
                    account_id = %account.id,
                    alert = true,
                    "Order is linked to an account that was never stored: {:?}",
                    reopen_err
                );
            }
            return Err(err.into());
        }

        Ok(account.id)
    }

    async fn linked_account(&self, order_id: Uuid) -> Result<Uuid, OrderingError> {
        let order = self.orders.get(order_id).await?;

        match (order.state, order.account) {
            (OrderState::Success, Some(account_id)) => Ok(account_id),
            (OrderState::Cancelled, _) => Err(OrderingError::Cancelled(order_id)),
            _ => Err(OrderingError::AlreadyFulfilled(order_id)),
        }
    }

    #[tracing::instrument(name = "Cancel an order", skip(self))]
    pub async fn cancel(&self, order_id: Uuid) -> Result<(), OrderingError> {
        match self.orders.cancel(order_id).await {
            Ok(()) => Ok(()),
            Err(StoreError::NotPending(_)) => {
                let order = self.orders.get(order_id).await?;
                if order.state.is_cancelled() {
                    Ok(())
                } else {
                    Err(OrderingError::AlreadyFulfilled(order_id))
                }
            }
            Err(err) => Err(err.into()),
        }
    }
}
