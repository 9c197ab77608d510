//! Audit log model (append-only)

use serde::Serialize;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AuditLog {
    pub id: i64,
    pub account_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub action: String,
    pub entity_type: Option<String>,
    pub entity_id: Option<Uuid>,
    pub details: Option<serde_json::Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One privileged mutation to record.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub account_id: Uuid,
    pub user_id: Option<Uuid>,
    pub action: &'static str,
    pub entity_type: &'static str,
    pub entity_id: Option<Uuid>,
    pub details: serde_json::Value,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl AuditEntry {
    pub fn new(account_id: Uuid, action: &'static str, entity_type: &'static str) -> Self {
        Self {
            account_id,
            user_id: None,
            action,
            entity_type,
            entity_id: None,
            details: serde_json::Value::Null,
            ip_address: None,
            user_agent: None,
        }
    }

    pub fn user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn entity(mut self, entity_id: Uuid) -> Self {
        self.entity_id = Some(entity_id);
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    pub fn request_meta(mut self, ip_address: Option<String>, user_agent: Option<String>) -> Self {
        self.ip_address = ip_address;
        self.user_agent = user_agent;
        self
    }

    /// Append inside an open transaction, committing atomically with the
    /// primary write.
    pub async fn record(self, conn: &mut PgConnection) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (account_id, user_id, action, entity_type, entity_id, details, ip_address, user_agent)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#
        )
        .bind(self.account_id)
        .bind(self.user_id)
        .bind(self.action)
        .bind(self.entity_type)
        .bind(self.entity_id)
        .bind(&self.details)
        .bind(&self.ip_address)
        .bind(&self.user_agent)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Append outside any transaction. Failure is logged, never propagated:
    /// an audit miss must not fail the request that already committed.
    pub async fn record_best_effort(self, pool: &PgPool) {
        let action = self.action;
        let mut conn = match pool.acquire().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!("Audit log append skipped ({}): {}", action, e);
                return;
            }
        };

        if let Err(e) = self.record(&mut *conn).await {
            tracing::warn!("Audit log append failed ({}): {}", action, e);
        }
    }
}

impl AuditLog {
    pub async fn list_by_account(
        pool: &PgPool,
        account_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, AuditLog>(
            r#"
            SELECT * FROM audit_logs
            WHERE account_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#
        )
        .bind(account_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
    }
}
