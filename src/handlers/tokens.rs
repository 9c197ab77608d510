//! Registration token handlers

use axum::{extract::State, Json};
use serde::Serialize;
use serde_json::json;

use crate::{AppState, AppResult, AppError};
use crate::middleware::auth::{require_admin, UserContext};
use crate::models::{Account, AuditEntry};
use crate::token::RegistrationToken;

#[derive(Debug, Serialize)]
pub struct IssueTokenResponse {
    pub token: String,
    pub account_id: uuid::Uuid,
    pub account_name: String,
}

/// Issue a registration token for the caller's account.
///
/// The token is stateless; nothing is stored. Whoever holds it can register
/// endpoints against the account until its licenses run out, so treat it like
/// a credential.
pub async fn issue(
    State(state): State<AppState>,
    user: UserContext,
) -> AppResult<Json<IssueTokenResponse>> {
    require_admin(&user)?;

    let account = Account::find_by_id(&state.pool, user.account_id)
        .await?
        .ok_or(AppError::AccountNotFound)?;

    if !account.is_active {
        return Err(AppError::AccountInactive);
    }

    let token = RegistrationToken::issue(account.id, &account.name);

    AuditEntry::new(account.id, "create", "registration_token")
        .user(user.user_id)
        .details(json!({ "account_name": &account.name }))
        .record_best_effort(&state.pool)
        .await;

    tracing::info!("Registration token issued for account {}", account.id);

    Ok(Json(IssueTokenResponse {
        token: token.encode(),
        account_id: account.id,
        account_name: account.name,
    }))
}
