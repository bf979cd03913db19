//! Tool registrations stored in Postgres

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AssessmentResult;
use crate::model::ToolConfig;
use crate::service::ToolConfigSource;

#[derive(Debug, sqlx::FromRow)]
struct ToolRow {
    id: Uuid,
    tenant_id: Uuid,
    name: String,
    base_url: String,
    api_key: Option<String>,
    enabled: bool,
}

impl From<ToolRow> for ToolConfig {
    fn from(row: ToolRow) -> Self {
        Self {
            id: row.id,
            tenant_id: row.tenant_id,
            name: row.name,
            base_url: row.base_url,
            api_key: row.api_key,
            enabled: row.enabled,
        }
    }
}

#[derive(Clone)]
pub struct PgToolConfigSource {
    pool: PgPool,
}

impl PgToolConfigSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ToolConfigSource for PgToolConfigSource {
    async fn enabled_tools(&self, tenant_id: Uuid) -> AssessmentResult<Vec<ToolConfig>> {
        let rows: Vec<ToolRow> = sqlx::query_as(
            r#"
            SELECT id, tenant_id, name, base_url, api_key, enabled
            FROM assessment_tools
            WHERE tenant_id = $1 AND enabled = TRUE
            ORDER BY created_at, id
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ToolConfig::from).collect())
    }

    async fn get_tool(
        &self,
        tenant_id: Uuid,
        tool_id: Uuid,
    ) -> AssessmentResult<Option<ToolConfig>> {
        let row: Option<ToolRow> = sqlx::query_as(
            r#"
            SELECT id, tenant_id, name, base_url, api_key, enabled
            FROM assessment_tools
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(tool_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ToolConfig::from))
    }
}
