//! Account handlers: tenant details, sub-accounts, license allocation

use axum::{extract::{State, Path}, Json};
use serde_json::json;
use uuid::Uuid;

use crate::{AppState, AppResult, AppError};
use crate::models::{
    Account, AllocateLicensesRequest, AuditEntry, CreateSubAccount, LicenseAllocation,
    MAX_ACCOUNT_LEVEL,
};
use crate::middleware::auth::{require_admin, UserContext};

/// Get the caller's account, including license counters
pub async fn get(
    State(state): State<AppState>,
    user: UserContext,
) -> AppResult<Json<Account>> {
    let account = Account::find_by_id(&state.pool, user.account_id)
        .await?
        .ok_or(AppError::AccountNotFound)?;

    Ok(Json(account))
}

/// Create a sub-account one level below the caller's
pub async fn create_sub_account(
    State(state): State<AppState>,
    user: UserContext,
    Json(req): Json<CreateSubAccount>,
) -> AppResult<Json<Account>> {
    require_admin(&user)?;

    if req.name.trim().is_empty() {
        return Err(AppError::ValidationError("name is required".to_string()));
    }

    let mut tx = state.pool.begin().await?;

    let parent = Account::lock_by_id(&mut *tx, user.account_id)
        .await?
        .ok_or(AppError::AccountNotFound)?;

    if parent.level >= MAX_ACCOUNT_LEVEL {
        return Err(AppError::ValidationError("maximum account nesting depth reached".to_string()));
    }

    let child = Account::create_sub_account(&mut *tx, &parent, &req).await?;

    AuditEntry::new(parent.id, "account_create", "account")
        .user(user.user_id)
        .entity(child.id)
        .details(json!({ "name": &child.name, "level": child.level }))
        .record(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!("Sub-account created: {} ({}) under {}", child.name, child.id, parent.id);
    Ok(Json(child))
}

/// Transfer license capacity to a direct child account.
///
/// Parent `allocated_licenses` and child `total_licenses` move together in one
/// transaction, with the parent row locked, so the `used + allocated <= total`
/// invariant holds under concurrent registrations.
pub async fn allocate_licenses(
    State(state): State<AppState>,
    user: UserContext,
    Json(req): Json<AllocateLicensesRequest>,
) -> AppResult<Json<LicenseAllocation>> {
    require_admin(&user)?;

    if req.quantity <= 0 {
        return Err(AppError::ValidationError("quantity must be positive".to_string()));
    }

    let mut tx = state.pool.begin().await?;

    // Lock order is parent then child, everywhere, to avoid deadlocks.
    let parent = Account::lock_by_id(&mut *tx, user.account_id)
        .await?
        .ok_or(AppError::AccountNotFound)?;

    let child = Account::lock_by_id(&mut *tx, req.to_account_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Target account not found".to_string()))?;

    if child.parent_account_id != Some(parent.id) {
        return Err(AppError::Forbidden);
    }

    if parent.available_licenses() < req.quantity {
        return Err(AppError::LicenseExhausted);
    }

    Account::grant_allocation(&mut *tx, parent.id, req.quantity).await?;
    Account::adjust_total(&mut *tx, child.id, req.quantity).await?;

    let allocation =
        LicenseAllocation::create(&mut *tx, parent.id, child.id, req.quantity, user.user_id).await?;

    AuditEntry::new(parent.id, "license_allocate", "license_allocation")
        .user(user.user_id)
        .entity(allocation.id)
        .details(json!({ "to_account_id": child.id, "quantity": req.quantity }))
        .record(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!("Allocated {} licenses from {} to {}", req.quantity, parent.id, child.id);
    Ok(Json(allocation))
}

/// Revoke an allocation, returning the capacity to the parent. Refused while
/// the child's remaining capacity is too committed to give the licenses back.
pub async fn revoke_allocation(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<LicenseAllocation>> {
    require_admin(&user)?;

    let allocation = LicenseAllocation::find_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Allocation not found".to_string()))?;

    if allocation.from_account_id != user.account_id {
        return Err(AppError::Forbidden);
    }
    if allocation.revoked_at.is_some() {
        return Err(AppError::ValidationError("allocation already revoked".to_string()));
    }

    let mut tx = state.pool.begin().await?;

    let parent = Account::lock_by_id(&mut *tx, allocation.from_account_id)
        .await?
        .ok_or(AppError::AccountNotFound)?;

    let child = Account::lock_by_id(&mut *tx, allocation.to_account_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Target account not found".to_string()))?;

    if child.available_licenses() < allocation.quantity {
        return Err(AppError::ValidationError(
            "child account licenses are in use; free them before revoking".to_string(),
        ));
    }

    Account::adjust_total(&mut *tx, child.id, -allocation.quantity).await?;
    Account::return_allocation(&mut *tx, parent.id, allocation.quantity).await?;
    LicenseAllocation::mark_revoked(&mut *tx, allocation.id, user.user_id).await?;

    AuditEntry::new(parent.id, "license_revoke", "license_allocation")
        .user(user.user_id)
        .entity(allocation.id)
        .details(json!({ "to_account_id": child.id, "quantity": allocation.quantity }))
        .record(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!("Revoked allocation {} ({} licenses)", allocation.id, allocation.quantity);

    let updated = LicenseAllocation::find_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Allocation not found".to_string()))?;
    Ok(Json(updated))
}

/// Allocation history granted by the caller's account
pub async fn list_allocations(
    State(state): State<AppState>,
    user: UserContext,
) -> AppResult<Json<Vec<LicenseAllocation>>> {
    let allocations = LicenseAllocation::list_by_account(&state.pool, user.account_id).await?;
    Ok(Json(allocations))
}
