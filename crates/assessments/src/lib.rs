#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Learnwell Assessments
//!
//! Search and grading across a tenant's external assessment tools.

pub mod error;
pub mod grading;
pub mod http_tool;
pub mod model;
pub mod pg_source;
pub mod service;

pub use error::{AssessmentError, AssessmentResult};
pub use grading::{check_answer, score_attempt};
pub use http_tool::HttpAssessmentTool;
pub use model::{
    AnswerKey, Assessment, AssessmentSummary, AttemptResult, Question, QuestionOption,
    QuestionResponse, QuestionResult, Response, SearchHit, SearchRequest, SearchResults,
    ToolConfig, DEFAULT_SEARCH_LIMIT, MAX_HITS_PER_TOOL, MAX_SEARCH_LIMIT,
};
pub use pg_source::PgToolConfigSource;
pub use service::{AssessmentTool, AssessmentToolService, ToolConfigSource};
