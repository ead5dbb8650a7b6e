//! HubSpot CRM progress store
//!
//! Learner progress lives in the `hhl_progress_state` contact property as a
//! JSON string. Contacts are paged with the CRM v3 objects API.

use super::{encode_progress, LearnerPage, ProgressStore, StoreError};
use async_trait::async_trait;
use hhl_common::progress::ProgressState;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;

/// Contact property holding the progress document
pub const PROGRESS_PROPERTY: &str = "hhl_progress_state";

const USER_AGENT: &str = concat!("hhl-backfill/", env!("CARGO_PKG_VERSION"));
const CONTACTS_PATH: &str = "/crm/v3/objects/contacts";

#[derive(Debug, Deserialize)]
struct ContactsPage {
    #[serde(default)]
    results: Vec<Contact>,
    paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
struct Paging {
    next: Option<NextPage>,
}

#[derive(Debug, Deserialize)]
struct NextPage {
    after: String,
}

#[derive(Debug, Deserialize)]
struct Contact {
    id: String,
    #[serde(default)]
    properties: BTreeMap<String, Option<String>>,
}

/// Progress store backed by HubSpot contacts
pub struct HubSpotProgressStore {
    http_client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HubSpotProgressStore {
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self, StoreError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| StoreError::Permanent(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn contacts_url(&self) -> String {
        format!("{}{}", self.base_url, CONTACTS_PATH)
    }

    fn contact_url(&self, contact_id: &str) -> String {
        format!("{}{}/{}", self.base_url, CONTACTS_PATH, contact_id)
    }

    async fn check(response: reqwest::Response, context: &str) -> Result<reqwest::Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, context, &body))
    }
}

/// Map a non-success HTTP status onto the store error taxonomy
pub(crate) fn status_error(status: StatusCode, context: &str, body: &str) -> StoreError {
    match status.as_u16() {
        404 => StoreError::NotFound(context.to_string()),
        429 => StoreError::Transient(format!("{}: rate limited (HTTP 429)", context)),
        code if code >= 500 => {
            StoreError::Transient(format!("{}: HTTP {} {}", context, code, body.trim()))
        }
        code => StoreError::Permanent(format!("{}: HTTP {} {}", context, code, body.trim())),
    }
}

fn request_error(e: reqwest::Error, context: &str) -> StoreError {
    if e.is_decode() || e.is_builder() {
        StoreError::Permanent(format!("{}: {}", context, e))
    } else {
        StoreError::Transient(format!("{}: {}", context, e))
    }
}

#[async_trait]
impl ProgressStore for HubSpotProgressStore {
    fn describe(&self) -> String {
        format!("hubspot ({})", self.base_url)
    }

    async fn list_learners(
        &self,
        limit: usize,
        after: Option<&str>,
    ) -> Result<LearnerPage, StoreError> {
        let mut query: Vec<(&str, String)> = vec![
            ("limit", limit.to_string()),
            ("properties", PROGRESS_PROPERTY.to_string()),
            ("archived", "false".to_string()),
        ];
        if let Some(after) = after {
            query.push(("after", after.to_string()));
        }

        tracing::debug!(limit, after = ?after, "Fetching contact page");

        let response = self
            .http_client
            .get(self.contacts_url())
            .bearer_auth(&self.token)
            .query(&query)
            .send()
            .await
            .map_err(|e| request_error(e, "list contacts"))?;
        let response = Self::check(response, "list contacts").await?;

        let page: ContactsPage = response
            .json()
            .await
            .map_err(|e| StoreError::Permanent(format!("list contacts: {}", e)))?;

        Ok(LearnerPage {
            ids: page.results.into_iter().map(|c| c.id).collect(),
            next_after: page.paging.and_then(|p| p.next).map(|n| n.after),
        })
    }

    async fn read_progress(&self, learner_id: &str) -> Result<Option<String>, StoreError> {
        let context = format!("contact {}", learner_id);
        let response = self
            .http_client
            .get(self.contact_url(learner_id))
            .bearer_auth(&self.token)
            .query(&[("properties", PROGRESS_PROPERTY)])
            .send()
            .await
            .map_err(|e| request_error(e, &context))?;
        let response = Self::check(response, &context).await?;

        let contact: Contact = response
            .json()
            .await
            .map_err(|e| StoreError::Permanent(format!("{}: {}", context, e)))?;

        Ok(contact
            .properties
            .get(PROGRESS_PROPERTY)
            .cloned()
            .flatten()
            .filter(|raw| !raw.trim().is_empty()))
    }

    async fn write_progress(
        &self,
        learner_id: &str,
        state: &ProgressState,
    ) -> Result<(), StoreError> {
        let context = format!("contact {}", learner_id);
        let body = json!({ "properties": { PROGRESS_PROPERTY: encode_progress(state)? } });

        let response = self
            .http_client
            .patch(self.contact_url(learner_id))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| request_error(e, &context))?;
        Self::check(response, &context).await?;

        tracing::debug!(contact_id = %learner_id, "Contact progress updated");
        Ok(())
    }
}
