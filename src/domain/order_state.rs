#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum OrderState {
    Pending,
    Cancelled,
    Success,
}

impl OrderState {
    pub fn is_pending(&self) -> bool {
        matches!(self, OrderState::Pending)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, OrderState::Cancelled)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, OrderState::Success)
    }

    pub fn parse(state: String) -> Result<OrderState, String> {
        match state.as_str() {
            "pending" => Ok(OrderState::Pending),
            "cancelled" => Ok(OrderState::Cancelled),
            "success" => Ok(OrderState::Success),
            _ => Err(format!("{} is not a valid order state", state)),
        }
    }
}

impl AsRef<str> for OrderState {
    fn as_ref(&self) -> &str {
        match self {
            OrderState::Pending => "pending",
            OrderState::Cancelled => "cancelled",
            OrderState::Success => "success",
        }
    }
}
