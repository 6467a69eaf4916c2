use std::time::Duration;

use async_trait::async_trait;
use chunkrelay_core::RunId;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::{AccessToken, PipelineError, PipelineResult};

/// Status of one workflow run.
///
/// Engines add states over time, so anything unrecognised is kept verbatim
/// in [`RunStatus::Other`] and serialized back unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Queued,
    InProgress,
    Succeeded,
    Failed,
    Canceling,
    Cancelled,
    Other(String),
}

impl RunStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "Queued" => Self::Queued,
            "InProgress" => Self::InProgress,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            "Canceling" => Self::Canceling,
            "Cancelled" => Self::Cancelled,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Queued => "Queued",
            Self::InProgress => "InProgress",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Canceling => "Canceling",
            Self::Cancelled => "Cancelled",
            Self::Other(raw) => raw,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for RunStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RunStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

/// Starts workflow runs and reports their status
#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    /// Start `pipeline` with `parameters`; returns the engine's run id.
    async fn start_run(
        &self,
        token: &AccessToken,
        pipeline: &str,
        parameters: &Value,
    ) -> PipelineResult<RunId>;

    async fn run_status(&self, token: &AccessToken, run_id: &RunId) -> PipelineResult<RunStatus>;
}

/// Settings for [`HttpWorkflowEngine`]
#[derive(Debug, Clone)]
pub struct HttpEngineConfig {
    /// Factory base url, e.g. `https://management.azure.com/subscriptions/../factories/<name>`
    pub base_url: String,
    pub api_version: String,
    pub timeout: Duration,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRunResponse {
    run_id: String,
}

#[derive(Deserialize)]
struct RunResponse {
    status: RunStatus,
}

/// Workflow engine speaking the Data Factory REST shape:
/// `POST {base}/pipelines/{name}/createRun` and `GET {base}/pipelineruns/{runId}`.
pub struct HttpWorkflowEngine {
    client: Client,
    base: Url,
    api_version: String,
}

/// Parse a configured base url that path segments get appended to.
pub(crate) fn base_url(raw: &str) -> PipelineResult<Url> {
    let url = Url::parse(raw)
        .map_err(|e| PipelineError::invalid(format!("invalid base url {raw}: {e}")))?;
    if url.cannot_be_a_base() {
        return Err(PipelineError::invalid(format!("{raw} cannot be a base url")));
    }
    Ok(url)
}

/// Append `segments` to `base`, each percent-encoded as exactly one segment.
pub(crate) fn join_segments(base: &Url, segments: &[&str]) -> PipelineResult<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| PipelineError::invalid(format!("{base} cannot be a base url")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

impl HttpWorkflowEngine {
    pub fn new(config: HttpEngineConfig) -> PipelineResult<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            base: base_url(&config.base_url)?,
            api_version: config.api_version,
        })
    }

    fn url(&self, segments: &[&str]) -> PipelineResult<Url> {
        let mut url = join_segments(&self.base, segments)?;
        url.query_pairs_mut().append_pair("api-version", &self.api_version);
        Ok(url)
    }
}

fn is_auth_failure(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
}

#[async_trait]
impl WorkflowEngine for HttpWorkflowEngine {
    async fn start_run(
        &self,
        token: &AccessToken,
        pipeline: &str,
        parameters: &Value,
    ) -> PipelineResult<RunId> {
        let response = self
            .client
            .post(self.url(&["pipelines", pipeline, "createRun"])?)
            .bearer_auth(token.secret())
            .json(parameters)
            .send()
            .await
            .map_err(|e| PipelineError::start(format!("createRun request failed: {e}")))?;

        let status = response.status();
        if is_auth_failure(status) {
            return Err(PipelineError::credential(format!(
                "workflow engine refused the service credential ({status})"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::start(format!(
                "createRun for {pipeline} returned {status}: {body}"
            )));
        }

        let created: CreateRunResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::decode(format!("createRun response: {e}")))?;
        if created.run_id.is_empty() {
            return Err(PipelineError::decode("createRun returned an empty runId"));
        }
        Ok(RunId::from_string(created.run_id))
    }

    async fn run_status(&self, token: &AccessToken, run_id: &RunId) -> PipelineResult<RunStatus> {
        let response = self
            .client
            .get(self.url(&["pipelineruns", run_id.as_str()])?)
            .bearer_auth(token.secret())
            .send()
            .await
            .map_err(|e| PipelineError::unavailable(format!("run status request failed: {e}")))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(PipelineError::run_not_found(run_id.as_str()));
        }
        if is_auth_failure(status) {
            return Err(PipelineError::credential(format!(
                "workflow engine refused the service credential ({status})"
            )));
        }
        if !status.is_success() {
            return Err(PipelineError::unavailable(format!(
                "run status for {run_id} returned {status}"
            )));
        }

        let run: RunResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::decode(format!("run status response: {e}")))?;
        Ok(run.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_statuses_survive_a_round_trip() {
        let status: RunStatus = serde_json::from_str("\"Queued\"").unwrap();
        assert_eq!(status, RunStatus::Queued);

        let status: RunStatus = serde_json::from_str("\"Paused\"").unwrap();
        assert_eq!(status, RunStatus::Other("Paused".into()));
        assert_eq!(serde_json::to_string(&status).unwrap(), "\"Paused\"");
        assert!(!status.is_terminal());
    }

    #[test]
    fn run_ids_cannot_escape_their_path_segment() {
        let engine = HttpWorkflowEngine::new(HttpEngineConfig {
            base_url: "https://engine.test/subscriptions/s/factories/f/".into(),
            api_version: "2018-06-01".into(),
            timeout: Duration::from_secs(5),
        })
        .unwrap();

        let url = engine
            .url(&["pipelineruns", "../pipelines/other/createRun?x="])
            .unwrap();

        assert_eq!(
            url.path(),
            "/subscriptions/s/factories/f/pipelineruns/..%2Fpipelines%2Fother%2FcreateRun%3Fx="
        );
        assert_eq!(url.query(), Some("api-version=2018-06-01"));
    }

    #[test]
    fn rejects_unusable_base_urls() {
        for raw in ["not a url", "mailto:ops@example.com"] {
            let err = HttpWorkflowEngine::new(HttpEngineConfig {
                base_url: raw.into(),
                api_version: "2018-06-01".into(),
                timeout: Duration::from_secs(5),
            })
            .err()
            .unwrap();
            assert!(matches!(err, PipelineError::Invalid { .. }));
        }
    }
}
