use imux::store::{AccountStore, StoreError};
use std::collections::HashSet;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::helpers::{personalized_addresses, TestApp};

#[tokio::test]
async fn purchase_activates_the_address_and_introduces_every_recipient() {
    let test_app = TestApp::spawn_app().await;
    Mock::given(path("/mail/send"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(202))
        .mount(&test_app.email_server)
        .await;

    let account = test_app.purchase(&["a@x.com", "b@x.com"], 1).await;

    let address = test_app.account_address(account.id);
    test_app
        .wait_for_rule(|addresses| addresses.contains(&address))
        .await;

    let introduction = &test_app.wait_for_emails(1).await[0];
    assert_eq!(introduction["template_id"], test_app.config.email_client.intro_template);
    assert_eq!(personalized_addresses(introduction), vec!["a@x.com", "b@x.com"]);
    let tokens: HashSet<String> = introduction["personalizations"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| {
            assert_eq!(p["dynamic_template_data"]["id"], account.id.to_string());
            p["dynamic_template_data"]["token"].as_str().unwrap().to_string()
        })
        .collect();
    let issued: HashSet<String> = account
        .recipients
        .iter()
        .map(|r| r.token.as_ref().to_string())
        .collect();
    assert_eq!(tokens, issued);
    assert_eq!(tokens.len(), 2);
}

#[tokio::test]
async fn recipients_leave_one_by_one_until_the_account_is_retired() {
    let test_app = TestApp::spawn_app().await;
    Mock::given(path("/mail/send"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(202))
        .mount(&test_app.email_server)
        .await;
    let account = test_app.purchase(&["a@x.com", "b@x.com"], 1).await;
    let address = test_app.account_address(account.id);
    test_app
        .wait_for_rule(|addresses| addresses.contains(&address))
        .await;
    test_app.wait_for_emails(1).await;
    let token_of = |wanted: &str| {
        account
            .recipients
            .iter()
            .find(|r| r.address.as_ref() == wanted)
            .map(|r| r.token.clone())
            .unwrap()
    };

    // Both recipients get the first message
    test_app.receive_message("m1", &address).await;
    assert_eq!(200, test_app.post_inbound("m1").await.status().as_u16());
    let emails = test_app.wait_for_emails(2).await;
    assert_eq!(personalized_addresses(&emails[1]), vec!["a@x.com", "b@x.com"]);

    // b leaves, only a gets the next one
    assert_eq!(
        200,
        test_app
            .unsubscribe(account.id, &token_of("b@x.com"))
            .await
            .status()
            .as_u16()
    );
    test_app.receive_message("m2", &address).await;
    assert_eq!(200, test_app.post_inbound("m2").await.status().as_u16());
    let emails = test_app.wait_for_emails(3).await;
    assert_eq!(personalized_addresses(&emails[2]), vec!["a@x.com"]);

    // a leaves, the account is gone and its address is no longer accepted
    assert_eq!(
        200,
        test_app
            .unsubscribe(account.id, &token_of("a@x.com"))
            .await
            .status()
            .as_u16()
    );
    assert!(matches!(
        test_app.accounts.get(account.id).await,
        Err(StoreError::NotFound(_))
    ));
    test_app
        .wait_for_rule(|addresses| !addresses.contains(&address))
        .await;

    test_app.receive_message("m3", &address).await;
    assert_eq!(200, test_app.post_inbound("m3").await.status().as_u16());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(test_app.email_server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn activation_keeps_the_other_addresses_of_the_rule() {
    let test_app = TestApp::spawn_app().await;
    Mock::given(path("/mail/send"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(202))
        .mount(&test_app.email_server)
        .await;

    let first = test_app.purchase(&["a@x.com"], 1).await;
    let second = test_app.purchase(&["b@x.com"], 1).await;

    let expected = vec![
        test_app.account_address(first.id),
        test_app.account_address(second.id),
    ];
    test_app
        .wait_for_rule(|addresses| expected.iter().all(|a| addresses.contains(a)))
        .await;
    assert_eq!(test_app.rule_addresses().await.len(), 2);
}
