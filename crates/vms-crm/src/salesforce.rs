//! Salesforce REST client.
//!
//! Authenticates with the OAuth2 username-password flow and pages through
//! SOQL results via `nextRecordsUrl`. A session rejected mid-run is renewed
//! once before the failure surfaces as [`CrmError::Authentication`].

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use vms_config::CrmConfig;
use vms_core::enums::RecordKind;

use crate::http::check_response;
use crate::soql;
use crate::{CrmClient, CrmError, Page, PageCursor};

#[derive(Debug, Clone, Deserialize)]
struct TokenResponse {
    access_token: String,
    instance_url: String,
}

#[derive(Debug, Deserialize)]
struct TokenError {
    error: String,
    #[serde(default)]
    error_description: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    total_size: usize,
    records: Vec<Map<String, Value>>,
    next_records_url: Option<String>,
}

#[derive(Debug, Clone)]
struct Session {
    access_token: String,
    instance_url: String,
}

pub struct SalesforceClient {
    http: reqwest::Client,
    config: CrmConfig,
    session: RwLock<Option<Session>>,
}

impl SalesforceClient {
    /// Build a client. No network traffic happens until the first fetch.
    ///
    /// # Errors
    ///
    /// Returns [`CrmError::Authentication`] when credentials are missing and
    /// [`CrmError::Http`] if the HTTP client cannot be built.
    pub fn new(config: &CrmConfig) -> Result<Self, CrmError> {
        if !config.is_configured() {
            return Err(CrmError::Authentication(
                "crm.username, crm.password and crm.client_id are required".into(),
            ));
        }
        let http = reqwest::Client::builder()
            .user_agent(concat!("vms-sync/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            config: config.clone(),
            session: RwLock::new(None),
        })
    }

    async fn authenticate(&self) -> Result<Session, CrmError> {
        let password = format!("{}{}", self.config.password, self.config.security_token);
        let form = [
            ("grant_type", "password"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("username", self.config.username.as_str()),
            ("password", password.as_str()),
        ];
        let resp = self
            .http
            .post(self.config.token_url())
            .form(&form)
            .send()
            .await?;

        let status = resp.status();
        if status == 400 || status == 401 {
            let body = resp.text().await.unwrap_or_default();
            return Err(CrmError::Authentication(describe_token_error(&body)));
        }
        let resp = check_response(resp).await?;
        let token: TokenResponse = resp.json().await?;
        tracing::info!(instance = %token.instance_url, "authenticated with Salesforce");
        Ok(Session {
            access_token: token.access_token,
            instance_url: token.instance_url.trim_end_matches('/').to_string(),
        })
    }

    async fn session(&self) -> Result<Session, CrmError> {
        if let Some(session) = self.session.read().await.as_ref() {
            return Ok(session.clone());
        }
        let mut slot = self.session.write().await;
        if let Some(session) = slot.as_ref() {
            return Ok(session.clone());
        }
        let session = self.authenticate().await?;
        *slot = Some(session.clone());
        Ok(session)
    }

    fn page_url(&self, session: &Session, kind: RecordKind, cursor: Option<&PageCursor>) -> Result<String, CrmError> {
        match cursor {
            None => Ok(format!(
                "{}/services/data/{}/query?q={}",
                session.instance_url,
                self.config.api_version,
                urlencoding::encode(&soql::query_for(kind))
            )),
            Some(PageCursor::Locator(path)) if path.starts_with("/services/data/") => {
                Ok(format!("{}{path}", session.instance_url))
            }
            Some(other) => Err(CrmError::InvalidCursor(format!("{other:?}"))),
        }
    }

    async fn query(&self, session: &Session, url: &str) -> Result<QueryResponse, CrmError> {
        let resp = self
            .http
            .get(url)
            .bearer_auth(&session.access_token)
            .header("Sforce-Query-Options", format!("batchSize={}", self.config.page_size))
            .send()
            .await?;
        let resp = check_response(resp).await?;
        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|e| CrmError::Parse(format!("query response: {e}")))
    }
}

#[async_trait]
impl CrmClient for SalesforceClient {
    async fn fetch_page(
        &self,
        kind: RecordKind,
        cursor: Option<&PageCursor>,
    ) -> Result<Page, CrmError> {
        let session = self.session().await?;
        let url = self.page_url(&session, kind, cursor)?;

        let response = match self.query(&session, &url).await {
            Err(CrmError::Authentication(reason)) => {
                tracing::warn!(%kind, %reason, "session rejected, re-authenticating");
                *self.session.write().await = None;
                let renewed = self.session().await?;
                let url = self.page_url(&renewed, kind, cursor)?;
                self.query(&renewed, &url).await?
            }
            other => other?,
        };

        tracing::debug!(
            %kind,
            batch = response.records.len(),
            total = response.total_size,
            "fetched Salesforce page"
        );
        Ok(to_page(kind, response))
    }
}

fn to_page(kind: RecordKind, response: QueryResponse) -> Page {
    Page {
        records: response
            .records
            .iter()
            .map(|raw| soql::to_record(kind, raw))
            .collect(),
        next_cursor: response.next_records_url.map(PageCursor::Locator),
        total_size: Some(response.total_size),
    }
}

fn describe_token_error(body: &str) -> String {
    match serde_json::from_str::<TokenError>(body) {
        Ok(err) if err.error_description.is_empty() => err.error,
        Ok(err) => format!("{}: {}", err.error, err.error_description),
        Err(_) => body.to_string(),
    }
}
