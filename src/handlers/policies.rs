//! Policies handlers

use axum::{extract::{State, Path}, Json};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::{AppState, AppResult, AppError};
use crate::models::{
    AuditEntry, CreatePolicy, Endpoint, Policy, PolicyType, UpdatePolicy, validate_config,
};
use crate::middleware::auth::{require_admin, UserContext};

/// List policies for the caller's account
pub async fn list(
    State(state): State<AppState>,
    user: UserContext,
) -> AppResult<Json<Vec<Policy>>> {
    let policies = Policy::list_by_account(&state.pool, user.account_id).await?;
    Ok(Json(policies))
}

/// Get single policy
pub async fn get(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Policy>> {
    let policy = fetch_owned(&state, &user, id).await?;
    Ok(Json(policy))
}

/// Create new policy
pub async fn create(
    State(state): State<AppState>,
    user: UserContext,
    Json(req): Json<CreatePolicy>,
) -> AppResult<Json<Policy>> {
    require_admin(&user)?;

    if req.name.trim().is_empty() {
        return Err(AppError::ValidationError("name is required".to_string()));
    }

    let policy_type = PolicyType::parse(&req.policy_type)
        .ok_or_else(|| AppError::ValidationError("unknown policy type".to_string()))?;
    validate_config(policy_type, &req.config).map_err(AppError::ValidationError)?;

    let policy = Policy::create(&state.pool, user.account_id, Some(user.user_id), &req).await?;

    AuditEntry::new(user.account_id, "policy_change", "policy")
        .user(user.user_id)
        .entity(policy.id)
        .details(json!({ "name": &policy.name, "type": &policy.policy_type, "created": true }))
        .record_best_effort(&state.pool)
        .await;

    Ok(Json(policy))
}

/// Update policy. Edits mutate in place; agents pick the change up on their
/// next heartbeat.
pub async fn update(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdatePolicy>,
) -> AppResult<Json<Policy>> {
    require_admin(&user)?;

    let existing = fetch_owned(&state, &user, id).await?;

    if let Some(config) = &req.config {
        // The type is immutable, so validate the new config against it.
        let policy_type = PolicyType::parse(&existing.policy_type)
            .ok_or_else(|| AppError::InternalError("stored policy has unknown type".to_string()))?;
        validate_config(policy_type, config).map_err(AppError::ValidationError)?;
    }

    let policy = Policy::update(&state.pool, id, &req)
        .await?
        .ok_or_else(|| AppError::NotFound("Policy not found".to_string()))?;

    AuditEntry::new(user.account_id, "policy_change", "policy")
        .user(user.user_id)
        .entity(policy.id)
        .details(json!({ "name": &policy.name }))
        .record_best_effort(&state.pool)
        .await;

    Ok(Json(policy))
}

/// Delete policy. Assignments cascade away; endpoints simply stop receiving it.
pub async fn delete(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    require_admin(&user)?;

    let policy = fetch_owned(&state, &user, id).await?;
    Policy::delete(&state.pool, policy.id, user.account_id).await?;

    AuditEntry::new(user.account_id, "policy_change", "policy")
        .user(user.user_id)
        .entity(policy.id)
        .details(json!({ "name": &policy.name, "deleted": true }))
        .record_best_effort(&state.pool)
        .await;

    Ok(Json(json!({ "deleted": true })))
}

#[derive(Debug, Deserialize)]
pub struct AssignmentRequest {
    pub endpoint_id: Uuid,
}

/// Assign a policy to an endpoint
pub async fn assign(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
    Json(req): Json<AssignmentRequest>,
) -> AppResult<Json<serde_json::Value>> {
    require_admin(&user)?;

    let policy = fetch_owned(&state, &user, id).await?;
    let endpoint = owned_endpoint(&state, &user, req.endpoint_id).await?;

    Policy::assign_to_endpoint(&state.pool, policy.id, endpoint.id).await?;

    AuditEntry::new(user.account_id, "policy_assign", "policy")
        .user(user.user_id)
        .entity(policy.id)
        .details(json!({ "endpoint_id": endpoint.id }))
        .record_best_effort(&state.pool)
        .await;

    Ok(Json(json!({ "assigned": true })))
}

/// Remove a policy assignment from an endpoint
pub async fn unassign(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
    Json(req): Json<AssignmentRequest>,
) -> AppResult<Json<serde_json::Value>> {
    require_admin(&user)?;

    let policy = fetch_owned(&state, &user, id).await?;
    let endpoint = owned_endpoint(&state, &user, req.endpoint_id).await?;

    let removed = Policy::unassign_from_endpoint(&state.pool, policy.id, endpoint.id).await?;
    if !removed {
        return Err(AppError::NotFound("Policy is not assigned to this endpoint".to_string()));
    }

    AuditEntry::new(user.account_id, "policy_unassign", "policy")
        .user(user.user_id)
        .entity(policy.id)
        .details(json!({ "endpoint_id": endpoint.id }))
        .record_best_effort(&state.pool)
        .await;

    Ok(Json(json!({ "unassigned": true })))
}

async fn fetch_owned(state: &AppState, user: &UserContext, id: Uuid) -> AppResult<Policy> {
    let policy = Policy::find_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Policy not found".to_string()))?;

    if policy.account_id != user.account_id {
        return Err(AppError::Forbidden);
    }

    Ok(policy)
}

async fn owned_endpoint(state: &AppState, user: &UserContext, id: Uuid) -> AppResult<Endpoint> {
    let endpoint = Endpoint::find_by_id(&state.pool, id)
        .await?
        .ok_or(AppError::EndpointNotFound)?;

    if endpoint.account_id != user.account_id {
        return Err(AppError::Forbidden);
    }

    Ok(endpoint)
}
