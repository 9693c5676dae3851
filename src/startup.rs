use actix_web::dev::Server;
use actix_web::{web, App, HttpServer};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::net::TcpListener;
use std::sync::Arc;
use tracing_actix_web::TracingLogger;

use crate::change_feed::{change_feed, ChangeStream};
use crate::config::{DatabaseSettings, Settings};
use crate::dispatcher::ForwardingDispatcher;
use crate::email_client::EmailClient;
use crate::lifecycle::{run_lifecycle_worker, AccountLifecycle};
use crate::mail_rule::{HttpRuleStore, RuleStore};
use crate::message_store::{HttpMessageStore, MessageStore};
use crate::ordering::OrderService;
use crate::registry::RecipientRegistry;
use crate::routes::{
    handle_inbound_message, handle_payment_event, handle_place_order, handle_unsubscribe,
    health_check,
};
use crate::store::{AccountStore, OrderStore, PgAccountStore, PgOrderStore};
use crate::sweeper::ExpirySweeper;

/// Collaborators the application runs against. `changes` must be the stream fed by `accounts`.
pub struct Backends {
    pub accounts: Arc<dyn AccountStore>,
    pub orders: Arc<dyn OrderStore>,
    pub rules: Arc<dyn RuleStore>,
    pub messages: Arc<dyn MessageStore>,
    pub changes: ChangeStream,
}

pub struct Application {
    pub port: u16,
    pub server: Server,
}

impl Application {
    pub async fn build(config: Settings) -> Result<Self, std::io::Error> {
        let db_pool = get_connection_db_pool(&config.database);
        let (feed, changes) = change_feed();
        let timeout = Some(config.get_email_client_timeout());

        let backends = Backends {
            accounts: Arc::new(PgAccountStore::new(db_pool.clone(), feed)),
            orders: Arc::new(PgOrderStore::new(db_pool)),
            rules: Arc::new(HttpRuleStore::new(
                config.mail_rule.base_url.clone(),
                config.mail_rule.api_key.clone(),
                timeout,
            )),
            messages: Arc::new(HttpMessageStore::new(
                config.message_store.base_url.clone(),
                timeout,
            )),
            changes,
        };

        Self::build_with_backends(config, backends).await
    }

    /// Wires the services over `backends`, spawns the lifecycle worker and the expiry sweeper,
    /// then binds the listener.
    pub async fn build_with_backends(
        config: Settings,
        backends: Backends,
    ) -> Result<Self, std::io::Error> {
        let sender_email = config
            .get_email_client_sender()
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err))?;
        let email_client = Arc::new(EmailClient::new(
            config.get_email_client_base_url(),
            sender_email,
            config.get_email_client_api(),
            Some(config.get_email_client_timeout()),
            config.email_client.max_batch_size,
        ));
        let service_config = config.get_service_config();

        let lifecycle = Arc::new(AccountLifecycle::new(
            backends.accounts.clone(),
            backends.rules,
            email_client.clone(),
            service_config.clone(),
        ));
        tokio::spawn(run_lifecycle_worker(backends.changes, lifecycle.clone()));

        let sweeper = ExpirySweeper::new(backends.accounts.clone(), config.get_sweeper_interval());
        tokio::spawn(sweeper.run());

        let order_service = OrderService::new(backends.orders, lifecycle, config.orders.price);
        let registry = RecipientRegistry::new(backends.accounts.clone());
        let dispatcher = ForwardingDispatcher::new(
            backends.accounts,
            backends.messages,
            email_client,
            service_config,
        );

        let listener = TcpListener::bind(config.get_address())?;
        let port = listener.local_addr()?.port();
        tracing::info!("Server listening on {}:{}", config.application.get_host(), port);

        let server = run(listener, order_service, registry, dispatcher)?;

        Ok(Self { port, server })
    }

    pub fn get_port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stop(self) -> Result<(), std::io::Error> {
        self.server.await
    }
}

pub fn run(
    listener: TcpListener,
    order_service: OrderService,
    registry: RecipientRegistry,
    dispatcher: ForwardingDispatcher,
) -> Result<Server, std::io::Error> {
    let order_service = web::Data::new(order_service);
    let registry = web::Data::new(registry);
    let dispatcher = web::Data::new(dispatcher);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .route("/health_check", web::get().to(health_check))
            .route("/orders", web::post().to(handle_place_order))
            .route("/orders/webhook", web::post().to(handle_payment_event))
            .route("/unsubscribe", web::get().to(handle_unsubscribe))
            .route("/inbound", web::post().to(handle_inbound_message))
            .app_data(order_service.clone())
            .app_data(registry.clone())
            .app_data(dispatcher.clone())
    })
    .listen(listener)?
    .run();

    Ok(server)
}

pub fn get_connection_db_pool(config: &DatabaseSettings) -> Pool<Postgres> {
    PgPoolOptions::new()
        .acquire_timeout(std::time::Duration::from_secs(2))
        .connect_lazy_with(config.get_db_options())
}
