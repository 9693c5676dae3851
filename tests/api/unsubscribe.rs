use imux::domain::unsubscribe_token::UnsubscribeToken;
use imux::routes::UNSUBSCRIBED_MESSAGE;
use imux::store::AccountStore;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::helpers::TestApp;

async fn spawn_with_mail_server() -> TestApp {
    let test_app = TestApp::spawn_app().await;
    Mock::given(path("/mail/send"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(202))
        .mount(&test_app.email_server)
        .await;
    test_app
}

#[tokio::test]
async fn unsubscribe_without_parameters_returns_400() {
    let test_app = TestApp::spawn_app().await;
    let only_id = format!("id={}", Uuid::new_v4());
    let test_cases = vec![
        ("", "no parameters"),
        ("token=abc", "no account id"),
        (only_id.as_str(), "no token"),
    ];

    for (query, description) in test_cases {
        let response = test_app.get_unsubscribe(query).await;

        assert_eq!(
            400,
            response.status().as_u16(),
            "The API did not fail with 400 when the request had {}.",
            description
        );
    }
}

#[tokio::test]
async fn unsubscribe_from_an_unknown_account_answers_the_generic_message() {
    let test_app = TestApp::spawn_app().await;

    let response = test_app
        .unsubscribe(Uuid::new_v4(), &UnsubscribeToken::generate())
        .await;

    assert_eq!(200, response.status().as_u16());
    assert_eq!(response.text().await.unwrap(), UNSUBSCRIBED_MESSAGE);
}

#[tokio::test]
async fn unsubscribe_removes_only_the_token_holder() {
    let test_app = spawn_with_mail_server().await;
    let account = test_app.purchase(&["a@x.com", "b@x.com"], 1).await;
    let token = account.recipients.iter().nth(1).unwrap().token.clone();

    let response = test_app.unsubscribe(account.id, &token).await;

    assert_eq!(200, response.status().as_u16());
    assert_eq!(response.text().await.unwrap(), UNSUBSCRIBED_MESSAGE);
    let stored = test_app.accounts.get(account.id).await.unwrap();
    let remaining: Vec<String> = stored
        .recipient_addresses()
        .iter()
        .map(|address| address.as_ref().to_string())
        .collect();
    assert_eq!(remaining, vec!["a@x.com"]);
}

#[tokio::test]
async fn repeated_unsubscribe_is_idempotent() {
    let test_app = spawn_with_mail_server().await;
    let account = test_app.purchase(&["a@x.com", "b@x.com"], 1).await;
    let token = account.recipients.iter().next().unwrap().token.clone();

    let first = test_app.unsubscribe(account.id, &token).await;
    let version = test_app.accounts.get(account.id).await.unwrap().version;
    let second = test_app.unsubscribe(account.id, &token).await;

    assert_eq!(200, first.status().as_u16());
    assert_eq!(200, second.status().as_u16());
    assert_eq!(second.text().await.unwrap(), UNSUBSCRIBED_MESSAGE);
    let stored = test_app.accounts.get(account.id).await.unwrap();
    assert_eq!(stored.version, version);
    assert_eq!(stored.recipients.len(), 1);
}

#[tokio::test]
async fn malformed_token_answers_the_generic_message() {
    let test_app = spawn_with_mail_server().await;
    let account = test_app.purchase(&["a@x.com"], 1).await;

    let response = test_app
        .get_unsubscribe(&format!("id={}&token=not%20a%20token", account.id))
        .await;

    assert_eq!(200, response.status().as_u16());
    assert_eq!(
        test_app.accounts.get(account.id).await.unwrap().recipients.len(),
        1
    );
}
