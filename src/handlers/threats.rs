//! Threats handlers (console side)

use axum::{extract::{State, Path, Query}, Json};
use serde_json::json;
use uuid::Uuid;

use crate::{AppState, AppResult, AppError};
use crate::models::{
    ApplyThreatAction, AuditEntry, Threat, ThreatAction, ThreatActionType, ThreatFilter,
};
use crate::middleware::auth::UserContext;

/// List threats for the caller's account
pub async fn list(
    State(state): State<AppState>,
    user: UserContext,
    Query(filter): Query<ThreatFilter>,
) -> AppResult<Json<Vec<Threat>>> {
    let threats = Threat::list_by_account(&state.pool, user.account_id, &filter).await?;
    Ok(Json(threats))
}

/// Get single threat
pub async fn get(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Threat>> {
    let threat = fetch_owned(&state, &user, id).await?;
    Ok(Json(threat))
}

/// History of actions applied to a threat
pub async fn actions(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<ThreatAction>>> {
    let threat = fetch_owned(&state, &user, id).await?;
    let actions = Threat::actions(&state.pool, threat.id).await?;
    Ok(Json(actions))
}

/// Apply an operator action: transitions the threat status and appends to the
/// append-only action trail.
pub async fn apply_action(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
    Json(req): Json<ApplyThreatAction>,
) -> AppResult<Json<Threat>> {
    let action = ThreatActionType::parse(&req.action).ok_or_else(|| {
        AppError::ValidationError("action must be one of quarantine, kill, allow, restore, delete".to_string())
    })?;

    let threat = fetch_owned(&state, &user, id).await?;

    let updated = Threat::apply_action(&state.pool, threat.id, action, user.user_id, req.notes.as_deref()).await?;

    AuditEntry::new(user.account_id, "threat_action", "threat")
        .user(user.user_id)
        .entity(threat.id)
        .details(json!({ "action": action.as_str(), "status": &updated.status }))
        .record_best_effort(&state.pool)
        .await;

    Ok(Json(updated))
}

async fn fetch_owned(state: &AppState, user: &UserContext, id: Uuid) -> AppResult<Threat> {
    let threat = Threat::find_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Threat not found".to_string()))?;

    if threat.account_id != user.account_id {
        return Err(AppError::Forbidden);
    }

    Ok(threat)
}
