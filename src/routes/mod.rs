mod health_check;
mod inbound;
mod orders;
mod unsubscribe;

pub use health_check::*;
pub use inbound::*;
pub use orders::*;
pub use unsubscribe::*;
