use uuid::Uuid;

use crate::domain::order_state::OrderState;
use crate::domain::recipient_email::RecipientEmail;

/// A purchase of one shared address. Fulfilled at most once, linking the created account.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Order {
    pub id: Uuid,
    pub recipients: Vec<RecipientEmail>,
    pub weeks: u32,
    pub price: i64,
    pub state: OrderState,
    pub account: Option<Uuid>,
}
