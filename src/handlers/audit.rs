//! Audit log handlers

use axum::{extract::{State, Query}, Json};
use serde::Deserialize;

use crate::{AppState, AppResult};
use crate::models::AuditLog;
use crate::middleware::auth::UserContext;

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Paged audit trail for the caller's account
pub async fn list(
    State(state): State<AppState>,
    user: UserContext,
    Query(query): Query<AuditQuery>,
) -> AppResult<Json<Vec<AuditLog>>> {
    let logs = AuditLog::list_by_account(
        &state.pool,
        user.account_id,
        query.limit.unwrap_or(50).min(500),
        query.offset.unwrap_or(0),
    )
    .await?;

    Ok(Json(logs))
}
