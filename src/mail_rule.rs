//! The inbound mail-acceptance rule: one ordered list of addresses the mail edge accepts.
//!
//! The rule is a versioned resource. Writers describe it, compute the new list and replace it
//! conditionally on the version they read; a concurrent writer turns the replace into
//! [`RuleError::Conflict`] instead of silently losing an update.

use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, Secret};
use std::collections::HashMap;
use std::time;
use tokio::sync::Mutex;

const REQUEST_TIMEOUT: time::Duration = time::Duration::from_secs(10);

/// Name of a rule within a named rule set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RuleId {
    pub rule_name: String,
    pub rule_set_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RuleSnapshot {
    pub addresses: Vec<String>,
    pub version: i64,
}

#[derive(thiserror::Error, Debug)]
pub enum RuleError {
    #[error("Rule was replaced concurrently.")]
    Conflict,
    #[error("Rule {} of rule set {} was not found.", .0.rule_name, .0.rule_set_name)]
    NotFound(RuleId),
    #[error("Failed to reach the mail rule service.")]
    Request(#[from] reqwest::Error),
}

#[async_trait::async_trait]
pub trait RuleStore: Send + Sync {
    async fn describe(&self, rule: &RuleId) -> Result<RuleSnapshot, RuleError>;

    /// Replaces the whole address list when the rule is still at `expected_version`.
    /// Returns the new version.
    async fn replace(
        &self,
        rule: &RuleId,
        addresses: &[String],
        expected_version: i64,
    ) -> Result<i64, RuleError>;
}

/// Client for the rule service: `GET` and `PUT` on `/rule-sets/{set}/rules/{rule}`.
pub struct HttpRuleStore {
    http_client: Client,
    base_url: String,
    api_key: Secret<String>,
}

#[derive(serde::Serialize)]
struct ReplaceRuleBody<'a> {
    addresses: &'a [String],
    expected_version: i64,
}

#[derive(serde::Deserialize)]
struct ReplaceRuleResponse {
    version: i64,
}

impl HttpRuleStore {
    pub fn new(
        base_url: String,
        api_key: Secret<String>,
        timeout: Option<time::Duration>,
    ) -> HttpRuleStore {
        let http_client = Client::builder()
            .timeout(timeout.unwrap_or(REQUEST_TIMEOUT))
            .build()
            .expect("Failed to build the HTTP client.");

        HttpRuleStore {
            http_client,
            base_url,
            api_key,
        }
    }

    fn rule_url(&self, rule: &RuleId) -> String {
        format!(
            "{}/rule-sets/{}/rules/{}",
            self.base_url, rule.rule_set_name, rule.rule_name
        )
    }
}

#[async_trait::async_trait]
impl RuleStore for HttpRuleStore {
    #[tracing::instrument(name = "Describe the mail acceptance rule", skip(self))]
    async fn describe(&self, rule: &RuleId) -> Result<RuleSnapshot, RuleError> {
        let response = self
            .http_client
            .get(self.rule_url(rule))
            .bearer_auth(self.api_key.expose_secret())
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(RuleError::NotFound(rule.clone()));
        }

        Ok(response.error_for_status()?.json().await?)
    }

    #[tracing::instrument(
        name = "Replace the mail acceptance rule",
        skip(self, addresses),
        fields(addresses = addresses.len())
    )]
    async fn replace(
        &self,
        rule: &RuleId,
        addresses: &[String],
        expected_version: i64,
    ) -> Result<i64, RuleError> {
        let response = self
            .http_client
            .put(self.rule_url(rule))
            .bearer_auth(self.api_key.expose_secret())
            .json(&ReplaceRuleBody {
                addresses,
                expected_version,
            })
            .send()
            .await?;

        match response.status() {
            StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => Err(RuleError::Conflict),
            StatusCode::NOT_FOUND => Err(RuleError::NotFound(rule.clone())),
            _ => {
                let body: ReplaceRuleResponse = response.error_for_status()?.json().await?;
                Ok(body.version)
            }
        }
    }
}

/// Rule store kept in process memory. Rules must be created with [`InMemoryRuleStore::create_rule`].
#[derive(Default)]
pub struct InMemoryRuleStore {
    rules: Mutex<HashMap<RuleId, RuleSnapshot>>,
}

impl InMemoryRuleStore {
    pub fn new() -> InMemoryRuleStore {
        InMemoryRuleStore::default()
    }

    pub async fn create_rule(&self, rule: &RuleId, addresses: Vec<String>) {
        self.rules.lock().await.insert(
            rule.clone(),
            RuleSnapshot {
                addresses,
                version: 0,
            },
        );
    }
}

#[async_trait::async_trait]
impl RuleStore for InMemoryRuleStore {
    async fn describe(&self, rule: &RuleId) -> Result<RuleSnapshot, RuleError> {
        self.rules
            .lock()
            .await
            .get(rule)
            .cloned()
            .ok_or_else(|| RuleError::NotFound(rule.clone()))
    }

    async fn replace(
        &self,
        rule: &RuleId,
        addresses: &[String],
        expected_version: i64,
    ) -> Result<i64, RuleError> {
        let mut rules = self.rules.lock().await;
        let snapshot = rules
            .get_mut(rule)
            .ok_or_else(|| RuleError::NotFound(rule.clone()))?;

        if snapshot.version != expected_version {
            return Err(RuleError::Conflict);
        }
        snapshot.addresses = addresses.to_vec();
        snapshot.version += 1;

        Ok(snapshot.version)
    }
}
