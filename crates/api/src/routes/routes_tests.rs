//! Router tests
//!
//! Drive the full axum router with in-memory billing and canned assessment
//! tools. No database or network is touched.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use learnwell_assessments::{
    AnswerKey, Assessment, AssessmentError, AssessmentResult, AssessmentSummary, AssessmentTool,
    AssessmentToolService, Question, ToolConfig, ToolConfigSource,
};
use learnwell_billing::testing::{active_subscription, signature_header, MockPaymentProvider};
use learnwell_billing::{BillingService, BillingUser, InMemoryBillingStore, PriceIds};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use super::create_router;
use crate::state::AppState;

const SECRET: &str = "whsec_api_test_secret";
const CUSTOMER: &str = "cus_api";

struct SingleTool {
    tool: ToolConfig,
}

#[async_trait]
impl ToolConfigSource for SingleTool {
    async fn enabled_tools(&self, tenant_id: Uuid) -> AssessmentResult<Vec<ToolConfig>> {
        Ok(if tenant_id == self.tool.tenant_id {
            vec![self.tool.clone()]
        } else {
            Vec::new()
        })
    }

    async fn get_tool(
        &self,
        tenant_id: Uuid,
        tool_id: Uuid,
    ) -> AssessmentResult<Option<ToolConfig>> {
        Ok((tenant_id == self.tool.tenant_id && tool_id == self.tool.id)
            .then(|| self.tool.clone()))
    }
}

struct OneQuiz;

#[async_trait]
impl AssessmentTool for OneQuiz {
    async fn search(
        &self,
        _tool: &ToolConfig,
        _query: &str,
        _limit: usize,
    ) -> AssessmentResult<Vec<AssessmentSummary>> {
        Ok(vec![AssessmentSummary {
            id: "quiz-1".to_string(),
            title: "Photosynthesis".to_string(),
            subject: Some("Biology".to_string()),
            grade_level: None,
            question_count: 1,
        }])
    }

    async fn fetch(&self, _tool: &ToolConfig, assessment_id: &str) -> AssessmentResult<Assessment> {
        if assessment_id != "quiz-1" {
            return Err(AssessmentError::AssessmentNotFound(assessment_id.to_string()));
        }
        Ok(Assessment {
            id: "quiz-1".to_string(),
            title: "Photosynthesis".to_string(),
            questions: vec![Question {
                id: "q1".to_string(),
                prompt: "Plants need light".to_string(),
                options: Vec::new(),
                answer_key: AnswerKey::TrueFalse { correct: true },
            }],
        })
    }
}

struct TestApp {
    router: Router,
    store: InMemoryBillingStore,
    provider: MockPaymentProvider,
    user_id: Uuid,
    tool: ToolConfig,
}

impl TestApp {
    async fn new(billing_enabled: bool) -> Self {
        let store = InMemoryBillingStore::new();
        let user = BillingUser::new("learner@example.com", CUSTOMER);
        let user_id = user.id;
        store.insert_user(user).await;

        let provider = MockPaymentProvider::new();
        let billing = billing_enabled.then(|| {
            Arc::new(BillingService::new(
                Arc::new(store.clone()),
                Arc::new(provider.clone()),
                SECRET,
                PriceIds::default(),
                true,
            ))
        });

        let tool = ToolConfig {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            name: "Science Quizzes".to_string(),
            base_url: "https://quizzes.example.com".to_string(),
            api_key: None,
            enabled: true,
        };
        let assessments = AssessmentToolService::new(
            Arc::new(SingleTool { tool: tool.clone() }),
            Arc::new(OneQuiz),
        );

        Self {
            router: create_router(AppState::from_parts(billing, Arc::new(assessments))),
            store,
            provider,
            user_id,
            tool,
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    async fn post_json(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    async fn webhook(&self, payload: &str, signature: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/v1/billing/webhook");
        if let Some(signature) = signature {
            builder = builder.header("stripe-signature", signature);
        }
        self.send(builder.body(Body::from(payload.to_string())).unwrap())
            .await
    }

    async fn credits(&self) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .uri(format!("/api/v1/billing/users/{}/credits", self.user_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }
}

fn credit_purchase_event(event_id: &str, amount: &str) -> String {
    json!({
        "id": event_id,
        "type": "checkout.session.completed",
        "created": 1_700_000_000,
        "data": {"object": {
            "id": "cs_api",
            "mode": "payment",
            "customer": CUSTOMER,
            "metadata": {"creditAmount": amount}
        }}
    })
    .to_string()
}

#[tokio::test]
async fn test_health() {
    let app = TestApp::new(true).await;
    let (status, body) = app
        .send(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok"}));
}

#[tokio::test]
async fn test_webhook_grants_purchased_credits() {
    let app = TestApp::new(true).await;
    let payload = credit_purchase_event("evt_api_1", "25");
    let signature = signature_header(SECRET, &payload).unwrap();

    let (status, body) = app.webhook(&payload, Some(&signature)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"received": true, "event": "checkout.session.completed"})
    );

    let (status, ledger) = app.credits().await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ledger["remaining_credits"], 25);
}

#[tokio::test]
async fn test_webhook_redelivery_grants_once() {
    let app = TestApp::new(true).await;
    let payload = credit_purchase_event("evt_api_dup", "10");
    let signature = signature_header(SECRET, &payload).unwrap();

    for _ in 0..2 {
        let (status, _) = app.webhook(&payload, Some(&signature)).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (_, ledger) = app.credits().await;
    assert_eq!(ledger["remaining_credits"], 10);
}

#[tokio::test]
async fn test_webhook_without_signature_is_rejected() {
    let app = TestApp::new(true).await;
    let (status, body) = app
        .webhook(&credit_purchase_event("evt_api_2", "5"), None)
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"received": false}));
}

#[tokio::test]
async fn test_webhook_with_wrong_secret_is_rejected() {
    let app = TestApp::new(true).await;
    let payload = credit_purchase_event("evt_api_3", "5");
    let signature = signature_header("whsec_someone_else", &payload).unwrap();

    let (status, body) = app.webhook(&payload, Some(&signature)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"received": false}));

    let (_, ledger) = app.credits().await;
    assert_eq!(ledger["remaining_credits"], 0);
}

#[tokio::test]
async fn test_webhook_handler_failure_returns_500() {
    let app = TestApp::new(true).await;
    // Verified, but the session object is the wrong shape
    let payload = json!({
        "id": "evt_api_bad",
        "type": "checkout.session.completed",
        "data": {"object": {"id": 42}}
    })
    .to_string();
    let signature = signature_header(SECRET, &payload).unwrap();

    let (status, body) = app.webhook(&payload, Some(&signature)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({"received": false}));
    assert!(app.store.webhook_error("evt_api_bad").await.is_some());
}

#[tokio::test]
async fn test_subscription_events_list_audit_log() {
    let app = TestApp::new(true).await;
    app.provider
        .insert_subscription(active_subscription(
            "sub_api_1",
            CUSTOMER,
            "price_standard_monthly",
            1_767_225_600,
        ))
        .await;
    let payload = json!({
        "id": "evt_api_sub",
        "type": "checkout.session.completed",
        "data": {"object": {
            "id": "cs_api_sub",
            "mode": "subscription",
            "customer": CUSTOMER,
            "subscription": "sub_api_1"
        }}
    })
    .to_string();
    let signature = signature_header(SECRET, &payload).unwrap();

    let (status, _) = app.webhook(&payload, Some(&signature)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, events) = app
        .send(
            Request::builder()
                .uri(format!(
                    "/api/v1/billing/users/{}/subscription-events",
                    app.user_id
                ))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(events.as_array().unwrap().len(), 1);
    assert_eq!(events[0]["event_type"], "subscription_created");
    assert_eq!(events[0]["tier"], "standard");
    assert_eq!(events[0]["stripe_subscription_id"], "sub_api_1");
}

#[tokio::test]
async fn test_billing_routes_unavailable_when_disabled() {
    let app = TestApp::new(false).await;

    let (status, _) = app
        .webhook(&credit_purchase_event("evt_api_4", "5"), Some("t=1,v1=00"))
        .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let (status, body) = app.credits().await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "Billing is not available");
}

#[tokio::test]
async fn test_credit_checkout_returns_url() {
    let app = TestApp::new(true).await;
    let (status, body) = app
        .post_json(
            "/api/v1/billing/checkout/credits",
            json!({
                "customer_id": CUSTOMER,
                "price_id": "price_credits_50",
                "quantity": 2,
                "success_url": "https://app.learnwell.io/credits/success",
                "cancel_url": "https://app.learnwell.io/credits"
            }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["url"]
        .as_str()
        .unwrap()
        .starts_with("https://checkout.stripe.test/"));
}

#[tokio::test]
async fn test_credit_checkout_unknown_package_is_bad_request() {
    let app = TestApp::new(true).await;
    let (status, body) = app
        .post_json(
            "/api/v1/billing/checkout/credits",
            json!({
                "customer_id": CUSTOMER,
                "price_id": "price_not_for_sale",
                "success_url": "https://app.learnwell.io/ok",
                "cancel_url": "https://app.learnwell.io/cancel"
            }),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Validation error");
}

#[tokio::test]
async fn test_assessment_search() {
    let app = TestApp::new(false).await;
    let (status, body) = app
        .post_json(
            &format!("/api/v1/tenants/{}/assessments/search", app.tool.tenant_id),
            json!({"query": "plants"}),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["items"][0]["id"], "quiz-1");
    assert_eq!(body["items"][0]["tool_name"], "Science Quizzes");
    assert_eq!(body["failed_tools"], json!([]));
    assert_eq!(body["truncated_tools"], json!([]));
}

#[tokio::test]
async fn test_submit_attempt() {
    let app = TestApp::new(false).await;
    let uri = format!(
        "/api/v1/tenants/{}/tools/{}/assessments/quiz-1/attempts",
        app.tool.tenant_id, app.tool.id
    );
    let (status, body) = app
        .post_json(
            &uri,
            json!({"responses": [
                {"question_id": "q1", "response": {"type": "true_false", "answer": true}}
            ]}),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["correct"], 1);
    assert_eq!(body["score"], 100.0);
}

#[tokio::test]
async fn test_attempt_on_unknown_tool_is_not_found() {
    let app = TestApp::new(false).await;
    let uri = format!(
        "/api/v1/tenants/{}/tools/{}/assessments/quiz-1/attempts",
        app.tool.tenant_id,
        Uuid::new_v4()
    );
    let (status, _) = app.post_json(&uri, json!({"responses": []})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
