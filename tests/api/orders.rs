use fake::faker::internet::en::SafeEmail;
use fake::Fake;
use imux::domain::order_state::OrderState;
use imux::store::{AccountStore, OrderStore};
use serde_json::{json, Value};
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::helpers::TestApp;

async fn mount_mail_server(test_app: &TestApp) {
    Mock::given(path("/mail/send"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(202))
        .mount(&test_app.email_server)
        .await;
}

async fn place_order(test_app: &TestApp, body: Value) -> Uuid {
    let response = test_app.post_order(&body).await;
    assert_eq!(201, response.status().as_u16());

    let id = response.json::<Value>().await.unwrap()["id"]
        .as_str()
        .unwrap()
        .to_string();
    Uuid::parse_str(&id).unwrap()
}

#[tokio::test]
async fn place_order_persists_a_pending_order() {
    let test_app = TestApp::spawn_app().await;
    let recipients: Vec<String> = (0..3).map(|_| SafeEmail().fake()).collect();

    let order_id = place_order(&test_app, json!({ "recipients": recipients, "weeks": 4 })).await;

    let order = test_app.orders.get(order_id).await.unwrap();
    assert_eq!(order.state, OrderState::Pending);
    assert_eq!(order.weeks, 4);
    assert_eq!(order.price, test_app.config.orders.price);
    assert_eq!(order.account, None);
    let stored: Vec<String> = order
        .recipients
        .iter()
        .map(|r| r.as_ref().to_string())
        .collect();
    assert_eq!(stored, recipients);
}

#[tokio::test]
async fn place_order_drops_blank_recipients() {
    let test_app = TestApp::spawn_app().await;

    let order_id = place_order(
        &test_app,
        json!({ "recipients": ["  a@x.com ", "", "   "], "weeks": 1 }),
    )
    .await;

    let order = test_app.orders.get(order_id).await.unwrap();
    assert_eq!(order.recipients.len(), 1);
    assert_eq!(order.recipients[0].as_ref(), "a@x.com");
}

#[tokio::test]
async fn place_order_returns_400_when_body_is_invalid() {
    let test_app = TestApp::spawn_app().await;
    let test_cases = vec![
        (json!({ "recipients": ["a@x.com", "not-an-email"], "weeks": 1 }), "invalid address"),
        (json!({ "recipients": [], "weeks": 1 }), "no recipients"),
        (json!({ "recipients": ["", " "], "weeks": 1 }), "only blank recipients"),
        (json!({ "recipients": ["a@x.com"], "weeks": 0 }), "zero weeks"),
        (json!({ "recipients": ["a@x.com"], "weeks": -2 }), "negative weeks"),
        (json!({ "weeks": 1 }), "missing recipients"),
    ];

    for (body, description) in test_cases {
        let response = test_app.post_order(&body).await;

        assert_eq!(
            400,
            response.status().as_u16(),
            "The API did not fail with 400 when the payload had {}.",
            description
        );
    }
}

#[tokio::test]
async fn completed_checkout_creates_and_links_the_account() {
    let test_app = TestApp::spawn_app().await;
    mount_mail_server(&test_app).await;

    let account = test_app.purchase(&["a@x.com", "b@x.com"], 2).await;

    assert_eq!(account.recipients.len(), 2);
    let weeks_left = account.expires - chrono::Utc::now();
    assert!(weeks_left > chrono::Duration::days(13) && weeks_left <= chrono::Duration::weeks(2));
}

#[tokio::test]
async fn repeated_completion_does_not_create_a_second_account() {
    let test_app = TestApp::spawn_app().await;
    mount_mail_server(&test_app).await;
    let order_id = place_order(&test_app, json!({ "recipients": ["a@x.com"], "weeks": 1 })).await;
    let event = json!({ "type": "checkout_completed", "order_id": order_id });

    assert_eq!(200, test_app.post_payment_event(&event).await.status().as_u16());
    assert_eq!(200, test_app.post_payment_event(&event).await.status().as_u16());

    assert_eq!(test_app.accounts.len().await, 1);
    let order = test_app.orders.get(order_id).await.unwrap();
    assert_eq!(order.state, OrderState::Success);
    assert!(test_app.accounts.get(order.account.unwrap()).await.is_ok());
}

#[tokio::test]
async fn cancelled_checkout_is_never_fulfilled() {
    let test_app = TestApp::spawn_app().await;
    let order_id = place_order(&test_app, json!({ "recipients": ["a@x.com"], "weeks": 1 })).await;

    let response = test_app
        .post_payment_event(&json!({ "type": "checkout_cancelled", "order_id": order_id }))
        .await;
    assert_eq!(200, response.status().as_u16());

    let response = test_app
        .post_payment_event(&json!({ "type": "checkout_completed", "order_id": order_id }))
        .await;
    assert_eq!(409, response.status().as_u16());

    assert_eq!(
        test_app.orders.get(order_id).await.unwrap().state,
        OrderState::Cancelled
    );
    assert!(test_app.accounts.is_empty().await);
}

#[tokio::test]
async fn payment_event_for_an_unknown_order_returns_404() {
    let test_app = TestApp::spawn_app().await;

    let response = test_app
        .post_payment_event(&json!({ "type": "checkout_completed", "order_id": Uuid::new_v4() }))
        .await;

    assert_eq!(404, response.status().as_u16());
}

#[tokio::test]
async fn payment_event_of_an_unknown_type_returns_400() {
    let test_app = TestApp::spawn_app().await;

    let response = test_app
        .post_payment_event(&json!({ "type": "refund_issued", "order_id": Uuid::new_v4() }))
        .await;

    assert_eq!(400, response.status().as_u16());
}
