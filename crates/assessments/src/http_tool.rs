//! HTTP client for external assessment tools

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;

use crate::error::{AssessmentError, AssessmentResult};
use crate::model::{Assessment, AssessmentSummary, ToolConfig};
use crate::service::AssessmentTool;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Talks to tools exposing `GET /assessments` and `GET /assessments/{id}`
#[derive(Clone)]
pub struct HttpAssessmentTool {
    client: Client,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<AssessmentSummary>,
}

impl HttpAssessmentTool {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default HTTP client");
                Client::new()
            });
        Self::with_client(client)
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn get(&self, tool: &ToolConfig, path: &str) -> RequestBuilder {
        let request = self.client.get(endpoint(&tool.base_url, path));
        match &tool.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

impl Default for HttpAssessmentTool {
    fn default() -> Self {
        Self::new()
    }
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Path for one assessment. Ids are opaque to us but must stay a single
/// path segment, so anything outside the URL-unreserved set is refused.
fn assessment_path(assessment_id: &str) -> AssessmentResult<String> {
    let is_segment = !assessment_id.is_empty()
        && assessment_id != "."
        && assessment_id != ".."
        && assessment_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~' | ':'));

    if !is_segment {
        return Err(AssessmentError::InvalidInput(format!(
            "assessment id {:?} is not a single path segment",
            assessment_id
        )));
    }

    Ok(format!("assessments/{}", assessment_id))
}

fn tool_failed(tool: &ToolConfig, message: String) -> AssessmentError {
    AssessmentError::ToolFailed {
        tool_id: tool.id,
        message,
    }
}

#[async_trait]
impl AssessmentTool for HttpAssessmentTool {
    async fn search(
        &self,
        tool: &ToolConfig,
        query: &str,
        limit: usize,
    ) -> AssessmentResult<Vec<AssessmentSummary>> {
        let response = self
            .get(tool, "assessments")
            .query(&[("q", query.to_string()), ("limit", limit.to_string())])
            .send()
            .await
            .map_err(|e| tool_failed(tool, format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(tool_failed(
                tool,
                format!("search returned status {}", response.status()),
            ));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| tool_failed(tool, format!("invalid search response: {}", e)))?;

        Ok(body.items)
    }

    async fn fetch(&self, tool: &ToolConfig, assessment_id: &str) -> AssessmentResult<Assessment> {
        let path = assessment_path(assessment_id)?;
        let response = self
            .get(tool, &path)
            .send()
            .await
            .map_err(|e| tool_failed(tool, format!("request failed: {}", e)))?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                return Err(AssessmentError::AssessmentNotFound(
                    assessment_id.to_string(),
                ))
            }
            status if !status.is_success() => {
                return Err(tool_failed(tool, format!("fetch returned status {}", status)));
            }
            _ => {}
        }

        response
            .json()
            .await
            .map_err(|e| tool_failed(tool, format!("invalid assessment: {}", e)))
    }
}
