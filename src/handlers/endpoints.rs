//! Endpoints handlers

use axum::{extract::{State, Path, Query}, http::HeaderMap, Json};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::{AppState, AppResult, AppError};
use crate::models::{Account, AuditEntry, Endpoint};
use crate::middleware::auth::{require_admin, UserContext};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
}

/// List endpoints in the caller's account
pub async fn list(
    State(state): State<AppState>,
    user: UserContext,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<Endpoint>>> {
    let limit = query.limit.unwrap_or(50);
    let endpoints = Endpoint::list_by_account(&state.pool, user.account_id, limit).await?;
    Ok(Json(endpoints))
}

/// Get single endpoint
pub async fn get(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Endpoint>> {
    let endpoint = Endpoint::find_by_id(&state.pool, id)
        .await?
        .ok_or(AppError::EndpointNotFound)?;

    // Verify account ownership
    if endpoint.account_id != user.account_id {
        return Err(AppError::Forbidden);
    }

    Ok(Json(endpoint))
}

/// Delete an endpoint from the console. Shares the deregistration semantics of
/// the uninstall flow: the row goes away and its license is released, in one
/// transaction against the locked account.
pub async fn delete(
    State(state): State<AppState>,
    user: UserContext,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    require_admin(&user)?;

    let mut tx = state.pool.begin().await?;

    Account::lock_by_id(&mut *tx, user.account_id)
        .await?
        .ok_or(AppError::AccountNotFound)?;

    let endpoint = Endpoint::find_for_uninstall(&mut *tx, user.account_id, Some(id), None)
        .await?
        .ok_or(AppError::EndpointNotFound)?;

    Endpoint::delete(&mut *tx, endpoint.id).await?;
    Account::release_license(&mut *tx, user.account_id).await?;

    let user_agent = headers.get("user-agent").and_then(|v| v.to_str().ok()).map(String::from);
    AuditEntry::new(endpoint.account_id, "delete", "endpoint")
        .user(user.user_id)
        .entity(endpoint.id)
        .details(json!({
            "hostname": &endpoint.hostname,
            "agent_id": &endpoint.agent_id,
            "mac_address": &endpoint.mac_address,
        }))
        .request_meta(None, user_agent)
        .record(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!("Endpoint deleted from console: {} ({})", endpoint.hostname, endpoint.id);

    Ok(Json(json!({ "deleted": true })))
}
