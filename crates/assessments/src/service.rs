//! Assessment tool fan-out
//!
//! Search queries every enabled tool for the tenant concurrently and pages
//! over the combined results. A failing tool drops out of the page and is
//! reported in `failed_tools`; it never fails the whole search.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use uuid::Uuid;

use crate::error::{AssessmentError, AssessmentResult};
use crate::grading;
use crate::model::{
    Assessment, AssessmentSummary, AttemptResult, QuestionResponse, SearchHit, SearchRequest,
    SearchResults, ToolConfig, MAX_HITS_PER_TOOL,
};

/// Where tenants' tool registrations live
#[async_trait]
pub trait ToolConfigSource: Send + Sync {
    /// Enabled tools for a tenant, in registration order
    async fn enabled_tools(&self, tenant_id: Uuid) -> AssessmentResult<Vec<ToolConfig>>;

    async fn get_tool(&self, tenant_id: Uuid, tool_id: Uuid)
        -> AssessmentResult<Option<ToolConfig>>;
}

/// Client for a tool's assessment catalogue
#[async_trait]
pub trait AssessmentTool: Send + Sync {
    async fn search(
        &self,
        tool: &ToolConfig,
        query: &str,
        limit: usize,
    ) -> AssessmentResult<Vec<AssessmentSummary>>;

    async fn fetch(&self, tool: &ToolConfig, assessment_id: &str) -> AssessmentResult<Assessment>;
}

#[derive(Clone)]
pub struct AssessmentToolService {
    configs: Arc<dyn ToolConfigSource>,
    tool: Arc<dyn AssessmentTool>,
}

impl AssessmentToolService {
    pub fn new(configs: Arc<dyn ToolConfigSource>, tool: Arc<dyn AssessmentTool>) -> Self {
        Self { configs, tool }
    }

    pub async fn search(
        &self,
        tenant_id: Uuid,
        request: SearchRequest,
    ) -> AssessmentResult<SearchResults> {
        let limit = request.effective_limit();
        let offset = request.effective_offset();
        let query = request.query.as_str();
        let tools = self.configs.enabled_tools(tenant_id).await?;

        // Each tool is asked for its full window; paging happens on the aggregate
        let calls = tools.iter().map(|tool| async move {
            let result = self.tool.search(tool, query, MAX_HITS_PER_TOOL).await;
            (tool, result)
        });

        let mut hits = Vec::new();
        let mut failed_tools = Vec::new();
        let mut truncated_tools = Vec::new();

        for (tool, result) in join_all(calls).await {
            match result {
                Ok(summaries) => {
                    if summaries.len() >= MAX_HITS_PER_TOOL {
                        truncated_tools.push(tool.id);
                    }
                    let kept = summaries.into_iter().take(MAX_HITS_PER_TOOL);
                    hits.extend(kept.map(|assessment| SearchHit {
                        tool_id: tool.id,
                        tool_name: tool.name.clone(),
                        assessment,
                    }));
                }
                Err(e) => {
                    tracing::warn!(
                        tenant_id = %tenant_id,
                        tool_id = %tool.id,
                        tool_name = %tool.name,
                        error = %e,
                        "Assessment tool search failed"
                    );
                    failed_tools.push(tool.id);
                }
            }
        }

        let total = hits.len();
        let items = hits.into_iter().skip(offset).take(limit).collect();

        tracing::debug!(
            tenant_id = %tenant_id,
            tools = tools.len(),
            failed = failed_tools.len(),
            truncated = truncated_tools.len(),
            total = total,
            "Assessment search complete"
        );

        Ok(SearchResults {
            items,
            total,
            failed_tools,
            truncated_tools,
        })
    }

    /// Load one assessment with its answer keys
    pub async fn fetch_assessment(
        &self,
        tenant_id: Uuid,
        tool_id: Uuid,
        assessment_id: &str,
    ) -> AssessmentResult<Assessment> {
        let tool = self
            .configs
            .get_tool(tenant_id, tool_id)
            .await?
            .filter(|tool| tool.enabled)
            .ok_or(AssessmentError::ToolNotFound(tool_id))?;

        self.tool.fetch(&tool, assessment_id).await
    }

    pub fn score_attempt(
        &self,
        assessment: &Assessment,
        responses: &[QuestionResponse],
    ) -> AttemptResult {
        grading::score_attempt(assessment, responses)
    }

    /// Fetch an assessment and grade the responses against it
    pub async fn grade_attempt(
        &self,
        tenant_id: Uuid,
        tool_id: Uuid,
        assessment_id: &str,
        responses: &[QuestionResponse],
    ) -> AssessmentResult<AttemptResult> {
        let assessment = self
            .fetch_assessment(tenant_id, tool_id, assessment_id)
            .await?;
        let result = self.score_attempt(&assessment, responses);

        tracing::info!(
            tenant_id = %tenant_id,
            tool_id = %tool_id,
            assessment_id = %assessment_id,
            correct = result.correct,
            total = result.total,
            "Graded assessment attempt"
        );

        Ok(result)
    }
}
