//! Application state

use std::sync::Arc;

use learnwell_assessments::{AssessmentToolService, HttpAssessmentTool, PgToolConfigSource};
use learnwell_billing::BillingService;
use sqlx::PgPool;

use crate::config::Config;
use crate::error::{ApiError, ApiResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// None when billing is disabled or Stripe is not configured
    pub billing: Option<Arc<BillingService>>,
    pub assessments: Arc<AssessmentToolService>,
}

impl AppState {
    pub fn new(pool: PgPool, config: &Config) -> Self {
        let billing = if config.enable_billing {
            match BillingService::from_env(pool.clone()) {
                Ok(svc) => {
                    tracing::info!("Stripe billing service initialized");
                    Some(Arc::new(svc))
                }
                Err(e) => {
                    tracing::warn!("Stripe billing not configured: {}", e);
                    None
                }
            }
        } else {
            tracing::info!("Billing disabled via config (ENABLE_BILLING=false)");
            None
        };

        let assessments = AssessmentToolService::new(
            Arc::new(PgToolConfigSource::new(pool)),
            Arc::new(HttpAssessmentTool::new()),
        );

        Self::from_parts(billing, Arc::new(assessments))
    }

    pub fn from_parts(
        billing: Option<Arc<BillingService>>,
        assessments: Arc<AssessmentToolService>,
    ) -> Self {
        Self {
            billing,
            assessments,
        }
    }

    /// Billing service, or 503 when billing is off
    pub fn billing_service(&self) -> ApiResult<&BillingService> {
        self.billing.as_deref().ok_or(ApiError::BillingUnavailable)
    }
}
