//! Reports handlers

use axum::{extract::State, Json};
use serde::Serialize;
use sqlx::Row;

use crate::{AppState, AppResult};
use crate::middleware::auth::UserContext;

#[derive(Debug, Serialize)]
pub struct SummaryReport {
    pub total_endpoints: i64,
    pub online_endpoints: i64,
    pub offline_endpoints: i64,
    pub disconnected_endpoints: i64,
    pub total_threats: i64,
    pub critical_threats: i64,
    pub high_threats: i64,
    pub medium_threats: i64,
    pub low_threats: i64,
    pub total_licenses: i32,
    pub used_licenses: i32,
    pub available_licenses: i32,
}

/// Dashboard summary: endpoint fleet, open threats, license usage
pub async fn summary(
    State(state): State<AppState>,
    user: UserContext,
) -> AppResult<Json<SummaryReport>> {
    let endpoints = sqlx::query(
        r#"
        SELECT
            COUNT(*) as total,
            COUNT(*) FILTER (WHERE status = 'online') as online,
            COUNT(*) FILTER (WHERE status = 'offline') as offline,
            COUNT(*) FILTER (WHERE status = 'disconnected') as disconnected
        FROM endpoints WHERE account_id = $1
        "#
    )
    .bind(user.account_id)
    .fetch_one(&state.pool)
    .await?;

    let threats = sqlx::query(
        r#"
        SELECT
            COUNT(*) as total,
            COUNT(*) FILTER (WHERE severity = 'critical') as critical,
            COUNT(*) FILTER (WHERE severity = 'high') as high,
            COUNT(*) FILTER (WHERE severity = 'medium') as medium,
            COUNT(*) FILTER (WHERE severity = 'low') as low
        FROM threats WHERE account_id = $1 AND status = 'detected'
        "#
    )
    .bind(user.account_id)
    .fetch_one(&state.pool)
    .await?;

    let licenses = sqlx::query(
        "SELECT total_licenses, used_licenses, allocated_licenses FROM accounts WHERE id = $1"
    )
    .bind(user.account_id)
    .fetch_one(&state.pool)
    .await?;

    let total_licenses: i32 = licenses.get("total_licenses");
    let used_licenses: i32 = licenses.get("used_licenses");
    let allocated_licenses: i32 = licenses.get("allocated_licenses");

    Ok(Json(SummaryReport {
        total_endpoints: endpoints.get("total"),
        online_endpoints: endpoints.get("online"),
        offline_endpoints: endpoints.get("offline"),
        disconnected_endpoints: endpoints.get("disconnected"),
        total_threats: threats.get("total"),
        critical_threats: threats.get("critical"),
        high_threats: threats.get("high"),
        medium_threats: threats.get("medium"),
        low_threats: threats.get("low"),
        total_licenses,
        used_licenses,
        available_licenses: total_licenses - used_licenses - allocated_licenses,
    }))
}
