use reqwest::Response;
use serde_json::{json, Value};
use std::sync::{Arc, Once};
use std::time::Duration;
use uuid::Uuid;
use wiremock::MockServer;

use imux::{
    change_feed::change_feed,
    config::{get_configuration, Settings},
    domain::{account::Account, unsubscribe_token::UnsubscribeToken},
    mail_rule::{InMemoryRuleStore, RuleStore},
    message_store::{InMemoryMessageStore, MessageLocation},
    startup::{Application, Backends},
    store::{AccountStore, InMemoryAccountStore, InMemoryOrderStore, OrderStore},
    telemetry::{get_subscriber, init_subscriber},
};

static TRACING: Once = Once::new();

pub const INBOUND_BUCKET: &str = "inbound";

pub struct TestApp {
    pub config: Settings,
    pub address: String,
    pub email_server: MockServer,
    pub accounts: Arc<InMemoryAccountStore>,
    pub orders: Arc<InMemoryOrderStore>,
    pub rules: Arc<InMemoryRuleStore>,
    pub messages: Arc<InMemoryMessageStore>,
}

impl TestApp {
    pub async fn spawn_app() -> TestApp {
        // Logs are only printed when TEST_LOG is set, otherwise they are discarded
        TRACING.call_once(|| {
            if std::env::var("TEST_LOG").is_ok() {
                init_subscriber(get_subscriber(
                    String::from("test"),
                    String::from("debug"),
                    std::io::stdout,
                ));
            } else {
                init_subscriber(get_subscriber(
                    String::from("test"),
                    String::from("debug"),
                    std::io::sink,
                ));
            }
        });

        let mut config = get_configuration().expect("Missing configuration file.");
        let email_server = MockServer::start().await;

        // Port 0 lets the OS pick a free port for every test
        config.set_app_port(0);
        config.set_email_client_base_url(email_server.uri());

        let (feed, changes) = change_feed();
        let accounts = Arc::new(InMemoryAccountStore::new(feed));
        let orders = Arc::new(InMemoryOrderStore::new());
        let rules = Arc::new(InMemoryRuleStore::new());
        let messages = Arc::new(InMemoryMessageStore::new());
        rules
            .create_rule(&config.mail_rule.get_rule_id(), Vec::new())
            .await;

        let backends = Backends {
            accounts: accounts.clone(),
            orders: orders.clone(),
            rules: rules.clone(),
            messages: messages.clone(),
            changes,
        };
        let application = Application::build_with_backends(config.clone(), backends)
            .await
            .expect("Failed to build application.");

        let address = format!("http://127.0.0.1:{}", application.get_port());

        tokio::spawn(application.run_until_stop());

        TestApp {
            config,
            address,
            email_server,
            accounts,
            orders,
            rules,
            messages,
        }
    }

    pub async fn post_order(&self, body: &Value) -> Response {
        reqwest::Client::new()
            .post(format!("{}/orders", self.address))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn post_payment_event(&self, body: &Value) -> Response {
        reqwest::Client::new()
            .post(format!("{}/orders/webhook", self.address))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn get_unsubscribe(&self, query: &str) -> Response {
        reqwest::Client::new()
            .get(format!("{}/unsubscribe?{}", self.address, query))
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn unsubscribe(&self, account_id: Uuid, token: &UnsubscribeToken) -> Response {
        self.get_unsubscribe(&format!("id={}&token={}", account_id, token.as_ref()))
            .await
    }

    pub async fn post_inbound(&self, key: &str) -> Response {
        reqwest::Client::new()
            .post(format!("{}/inbound", self.address))
            .json(&json!({ "bucket": INBOUND_BUCKET, "key": key }))
            .send()
            .await
            .expect("Failed to execute request.")
    }

    /// Places an order for `recipients` and completes its checkout. Returns the new account.
    pub async fn purchase(&self, recipients: &[&str], weeks: i64) -> Account {
        let response = self
            .post_order(&json!({ "recipients": recipients, "weeks": weeks }))
            .await;
        assert_eq!(201, response.status().as_u16());
        let order_id = response.json::<Value>().await.unwrap()["id"]
            .as_str()
            .unwrap()
            .to_string();

        let response = self
            .post_payment_event(&json!({ "type": "checkout_completed", "order_id": order_id }))
            .await;
        assert_eq!(200, response.status().as_u16());

        let order = self
            .orders
            .get(Uuid::parse_str(&order_id).unwrap())
            .await
            .unwrap();
        self.accounts.get(order.account.unwrap()).await.unwrap()
    }

    /// Stores a raw message addressed to `to` under `key`, as the mail receiver would.
    pub async fn receive_message(&self, key: &str, to: &str) {
        let raw = format!(
            "From: Sender <sender@example.com>\r\n\
             To: {}\r\n\
             Subject: Dinner on Friday\r\n\
             Message-ID: <{}@example.com>\r\n\
             Content-Type: text/plain; charset=utf-8\r\n\
             \r\n\
             Who is in?\r\n",
            to, key
        );
        let location = MessageLocation {
            bucket: String::from(INBOUND_BUCKET),
            key: key.to_string(),
        };

        self.messages.put(location, raw.into_bytes()).await;
    }

    pub fn account_address(&self, account_id: Uuid) -> String {
        self.config.get_service_config().address_of(&account_id)
    }

    pub async fn rule_addresses(&self) -> Vec<String> {
        self.rules
            .describe(&self.config.mail_rule.get_rule_id())
            .await
            .expect("Mail acceptance rule is missing.")
            .addresses
    }

    /// The rule is updated by a background worker, so this polls until `condition` holds.
    pub async fn wait_for_rule<F>(&self, condition: F)
    where
        F: Fn(&[String]) -> bool,
    {
        for _ in 0..100 {
            if condition(&self.rule_addresses().await) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        panic!(
            "Mail acceptance rule never reached the expected state: {:?}",
            self.rule_addresses().await
        );
    }

    /// Waits until the mail server received `count` requests and returns their JSON bodies.
    pub async fn wait_for_emails(&self, count: usize) -> Vec<Value> {
        for _ in 0..100 {
            let requests = self.email_server.received_requests().await.unwrap();
            if requests.len() >= count {
                return requests
                    .iter()
                    .map(|request| serde_json::from_slice(&request.body).unwrap())
                    .collect();
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        panic!("Mail server never received {} requests", count);
    }
}

/// Addresses a mail/send request was sent to, one per personalization.
pub fn personalized_addresses(body: &Value) -> Vec<String> {
    body["personalizations"]
        .as_array()
        .unwrap()
        .iter()
        .map(|personalization| {
            personalization["to"][0]["email"]
                .as_str()
                .unwrap()
                .to_string()
        })
        .collect()
}
