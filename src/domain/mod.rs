pub mod account;
pub mod inbound_message;
pub mod new_order;
pub mod order;
pub mod order_state;
pub mod recipient;
pub mod recipient_email;
pub mod unsubscribe_token;
