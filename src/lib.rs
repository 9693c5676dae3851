pub mod change_feed;
pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod email_client;
pub mod lifecycle;
pub mod mail_rule;
pub mod message_store;
pub mod ordering;
pub mod registry;
pub mod routes;
pub mod startup;
pub mod store;
pub mod sweeper;
pub mod telemetry;
