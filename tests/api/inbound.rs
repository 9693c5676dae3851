use wiremock::matchers::{any, method, path};
use wiremock::{Mock, ResponseTemplate};

use imux::message_store::MessageLocation;
use uuid::Uuid;

use crate::helpers::{personalized_addresses, TestApp, INBOUND_BUCKET};

#[tokio::test]
async fn message_to_an_account_is_forwarded_to_its_recipients() {
    let test_app = TestApp::spawn_app().await;
    Mock::given(path("/mail/send"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(202))
        .mount(&test_app.email_server)
        .await;
    let account = test_app.purchase(&["a@x.com", "b@x.com"], 1).await;
    // Introduction
    test_app.wait_for_emails(1).await;
    test_app
        .receive_message("first", &test_app.account_address(account.id))
        .await;

    let response = test_app.post_inbound("first").await;

    assert_eq!(200, response.status().as_u16());
    let emails = test_app.wait_for_emails(2).await;
    let relayed = &emails[1];
    assert_eq!(personalized_addresses(relayed), vec!["a@x.com", "b@x.com"]);
    assert_eq!(relayed["subject"], "Dinner on Friday");
    assert_eq!(relayed["reply_to"]["email"], "sender@example.com");
    assert_eq!(relayed["from"]["email"], test_app.account_address(account.id));
    assert_eq!(relayed["headers"]["X-Imux-Source"], "inbound/first");
}

#[tokio::test]
async fn message_to_an_unknown_account_is_dropped() {
    let test_app = TestApp::spawn_app().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(202))
        .expect(0)
        .mount(&test_app.email_server)
        .await;
    test_app
        .receive_message("stray", &test_app.account_address(Uuid::new_v4()))
        .await;

    let response = test_app.post_inbound("stray").await;

    assert_eq!(200, response.status().as_u16());
}

#[tokio::test]
async fn unparsable_message_is_dropped() {
    let test_app = TestApp::spawn_app().await;
    let location = MessageLocation {
        bucket: String::from(INBOUND_BUCKET),
        key: String::from("blank"),
    };
    test_app.messages.put(location, b"   \r\n".to_vec()).await;

    let response = test_app.post_inbound("blank").await;

    assert_eq!(200, response.status().as_u16());
}

#[tokio::test]
async fn missing_stored_message_returns_500() {
    let test_app = TestApp::spawn_app().await;

    let response = test_app.post_inbound("never-stored").await;

    assert_eq!(500, response.status().as_u16());
}

#[tokio::test]
async fn provider_failure_returns_500() {
    let test_app = TestApp::spawn_app().await;
    Mock::given(path("/mail/send"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(202))
        .mount(&test_app.email_server)
        .await;
    let account = test_app.purchase(&["a@x.com"], 1).await;
    test_app.wait_for_emails(1).await;

    test_app.email_server.reset().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(500))
        .mount(&test_app.email_server)
        .await;
    test_app
        .receive_message("doomed", &test_app.account_address(account.id))
        .await;

    let response = test_app.post_inbound("doomed").await;

    assert_eq!(500, response.status().as_u16());
}
