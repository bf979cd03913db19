//! Assessment catalogue and attempt types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default page size for catalogue search
pub const DEFAULT_SEARCH_LIMIT: usize = 20;
/// Largest page a caller may request
pub const MAX_SEARCH_LIMIT: usize = 100;
/// Hits kept from any single tool per search; paging never reaches past this
pub const MAX_HITS_PER_TOOL: usize = MAX_SEARCH_LIMIT;

/// A tenant's registered external assessment tool
#[derive(Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub base_url: String,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

// Keep the api key out of logs
impl std::fmt::Debug for ToolConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolConfig")
            .field("id", &self.id)
            .field("tenant_id", &self.tenant_id)
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

/// Catalogue entry as reported by a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentSummary {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub grade_level: Option<String>,
    #[serde(default)]
    pub question_count: usize,
}

/// A catalogue entry tagged with the tool it came from
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub tool_id: Uuid,
    pub tool_name: String,
    #[serde(flatten)]
    pub assessment: AssessmentSummary,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            limit: None,
            offset: None,
        }
    }

    /// Requested page size, defaulted and clamped to `1..=MAX_SEARCH_LIMIT`
    pub fn effective_limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_SEARCH_LIMIT)
            .clamp(1, MAX_SEARCH_LIMIT)
    }

    /// Offset into the aggregate, which holds at most [`MAX_HITS_PER_TOOL`]
    /// hits from each tool. Offsets past the aggregate yield an empty page.
    pub fn effective_offset(&self) -> usize {
        self.offset.unwrap_or(0)
    }
}

/// One page of aggregated search results
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResults {
    pub items: Vec<SearchHit>,
    /// Hits collected across all tools that answered, before paging.
    /// A lower bound whenever `truncated_tools` is non-empty.
    pub total: usize,
    /// Tools whose search call failed; their hits are missing from `items`
    pub failed_tools: Vec<Uuid>,
    /// Tools that filled their [`MAX_HITS_PER_TOOL`] window and may hold more matches
    pub truncated_tools: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub id: String,
    pub text: String,
}

/// The correct answer for a question, by question type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnswerKey {
    MultipleChoice { correct_option_id: String },
    TrueFalse { correct: bool },
    MultipleAnswer { correct_option_ids: Vec<String> },
    ShortAnswer { accepted_answers: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub prompt: String,
    #[serde(default)]
    pub options: Vec<QuestionOption>,
    pub answer_key: AnswerKey,
}

/// A full assessment including answer keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assessment {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub questions: Vec<Question>,
}

/// A learner's answer to one question
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "answer", rename_all = "snake_case")]
pub enum Response {
    MultipleChoice(String),
    TrueFalse(bool),
    MultipleAnswer(Vec<String>),
    ShortAnswer(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionResponse {
    pub question_id: String,
    pub response: Response,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestionResult {
    pub question_id: String,
    pub correct: bool,
}

/// Graded attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptResult {
    pub assessment_id: String,
    pub correct: usize,
    pub total: usize,
    /// Percentage correct, rounded to two decimals
    pub score: f64,
    pub results: Vec<QuestionResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_defaults_and_clamps() {
        let mut request = SearchRequest::new("fractions");
        assert_eq!(request.effective_limit(), DEFAULT_SEARCH_LIMIT);

        request.limit = Some(500);
        assert_eq!(request.effective_limit(), MAX_SEARCH_LIMIT);

        request.limit = Some(0);
        assert_eq!(request.effective_limit(), 1);
    }

    #[test]
    fn test_response_wire_format() {
        let response: Response =
            serde_json::from_str(r#"{"type":"multiple_answer","answer":["a","c"]}"#).unwrap();
        assert_eq!(
            response,
            Response::MultipleAnswer(vec!["a".to_string(), "c".to_string()])
        );
    }

    #[test]
    fn test_tool_config_debug_hides_key() {
        let config = ToolConfig {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            name: "Quizzer".to_string(),
            base_url: "https://quiz.example.com".to_string(),
            api_key: Some("secret-key".to_string()),
            enabled: true,
        };
        assert!(!format!("{:?}", config).contains("secret-key"));
    }
}
