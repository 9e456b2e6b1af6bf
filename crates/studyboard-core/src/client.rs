//! Backend client: the store's only path to the remote study service.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::config::StoreConfig;
use crate::error::{Result, StudyboardError};
use crate::models::{NewStudy, StudyDetail, StudyId, StudySummary};

/// Longest server message kept in a status error.
const MAX_MESSAGE_LEN: usize = 512;

/// Read and write access to the study service.
///
/// Methods return boxed futures so the store can hold any implementation
/// behind `Arc<dyn BackendClient>`.
pub trait BackendClient: Send + Sync {
    /// `GET /studies`
    fn list_studies(&self) -> BoxFuture<'_, Result<Vec<StudySummary>>>;

    /// `GET /studies/{id}`
    fn get_study(&self, study_id: StudyId) -> BoxFuture<'_, Result<StudyDetail>>;

    /// `POST /studies`
    fn create_study(&self, request: NewStudy) -> BoxFuture<'_, Result<StudySummary>>;
}

/// JSON-over-HTTP implementation backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpBackendClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

impl HttpBackendClient {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(StudyboardError::Status {
                status: status.as_u16(),
                message: server_message(&text, status),
            });
        }
        serde_json::from_str(&text).map_err(|e| StudyboardError::Malformed(e.to_string()))
    }

    async fn fetch_studies(&self) -> Result<Vec<StudySummary>> {
        let url = self.url("/studies");
        debug!(%url, "GET study list");
        let resp = self.http.get(&url).send().await?;
        Self::decode(resp).await
    }

    async fn fetch_study(&self, study_id: StudyId) -> Result<StudyDetail> {
        let url = self.url(&format!("/studies/{study_id}"));
        debug!(%url, "GET study detail");
        let resp = self.http.get(&url).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(StudyboardError::StudyNotFound(study_id));
        }
        Self::decode(resp).await
    }

    async fn post_study(&self, request: NewStudy) -> Result<StudySummary> {
        let url = self.url("/studies");
        debug!(%url, name = %request.name, direction = %request.direction, "POST study");
        let resp = self.http.post(&url).json(&request).send().await?;
        Self::decode(resp).await
    }
}

impl BackendClient for HttpBackendClient {
    fn list_studies(&self) -> BoxFuture<'_, Result<Vec<StudySummary>>> {
        self.fetch_studies().boxed()
    }

    fn get_study(&self, study_id: StudyId) -> BoxFuture<'_, Result<StudyDetail>> {
        self.fetch_study(study_id).boxed()
    }

    fn create_study(&self, request: NewStudy) -> BoxFuture<'_, Result<StudySummary>> {
        self.post_study(request).boxed()
    }
}

/// Extracts `{"message": ...}` from an error body, falling back to the raw text.
fn server_message(body: &str, status: StatusCode) -> String {
    if let Ok(err) = serde_json::from_str::<ErrorBody>(body) {
        return err.message;
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string();
    }
    let mut message: String = trimmed.chars().take(MAX_MESSAGE_LEN).collect();
    if trimmed.chars().count() > MAX_MESSAGE_LEN {
        message.push('…');
    }
    message
}
