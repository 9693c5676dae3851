mod health_check;
mod helpers;
mod inbound;
mod lifecycle;
mod orders;
mod unsubscribe;
