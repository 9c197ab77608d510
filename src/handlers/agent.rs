//! Agent protocol handlers
//!
//! Everything the reporting agent speaks to: registration, heartbeat + policy
//! pull, threat reporting, and operator-driven uninstall. The server never
//! calls out to an agent; every exchange here is agent -> server.

use axum::{extract::State, http::HeaderMap, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::{AppState, AppError, AppResult};
use crate::admission::{self, AdmissionDecision};
use crate::models::{
    Account, AuditEntry, Endpoint, EndpointOs, EndpointStatus,
    HeartbeatRequest, Policy, RegisterRequest, RegisterResponse,
    ReportThreatRequest, ReportThreatResponse, ThreatSeverity, Threat,
    merge_effective, resolve_recommended_action,
};
use crate::error::is_unique_violation;
use crate::middleware::auth::{require_admin, UserContext};
use crate::token::RegistrationToken;

/// Register or re-register an endpoint
pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut req): Json<RegisterRequest>,
) -> AppResult<Json<RegisterResponse>> {
    if req.token.trim().is_empty() {
        return Err(AppError::ValidationError("Registration token is required".to_string()));
    }

    let token = RegistrationToken::decode(&req.token)
        .map_err(|_| AppError::InvalidToken("Invalid registration token".to_string()))?;

    // Fail fast before touching the store
    req.validate()?;
    let os = EndpointOs::parse(&req.os).ok_or_else(|| {
        AppError::ValidationError("os must be one of windows, macos, linux".to_string())
    })?;
    req.os = os.as_str().to_string();

    let meta = request_meta(&headers);

    // A concurrent registration for the same identity can slip between our
    // lookup and insert; the unique indexes turn that into a conflict, which
    // we retry once as an update of the now-existing row.
    match register_once(&state, token.account_id, &req, &meta).await {
        Err(AppError::StoreConflict(_)) => register_once(&state, token.account_id, &req, &meta).await,
        other => other,
    }
    .map(Json)
}

async fn register_once(
    state: &AppState,
    account_id: Uuid,
    req: &RegisterRequest,
    meta: &RequestMeta,
) -> AppResult<RegisterResponse> {
    let mut tx = state.pool.begin().await?;

    // Row lock serializes the capacity check with the counter increment;
    // two concurrent registrations cannot both see the last free license.
    let account = Account::lock_by_id(&mut *tx, account_id)
        .await?
        .ok_or(AppError::AccountNotFound)?;

    match admission::evaluate(&account) {
        AdmissionDecision::AccountInactive => return Err(AppError::AccountInactive),
        // Capacity only matters for a brand-new endpoint; checked below after
        // identity resolution so a re-registration never gets turned away.
        AdmissionDecision::LicenseExhausted | AdmissionDecision::Admit => {}
    }

    let existing = Endpoint::find_by_identity(
        &mut *tx,
        account.id,
        req.agent_id,
        &req.hostname,
        req.mac_address.as_deref(),
    )
    .await?;

    if let Some(existing) = existing {
        let endpoint = Endpoint::reregister(&mut *tx, existing.id, req).await?;
        tx.commit().await?;

        tracing::info!("Endpoint re-registered: {} ({})", endpoint.hostname, endpoint.id);
        return Ok(RegisterResponse {
            success: true,
            endpoint_id: endpoint.id,
            message: "Endpoint re-registered successfully",
        });
    }

    if admission::evaluate(&account) == AdmissionDecision::LicenseExhausted {
        return Err(AppError::LicenseExhausted);
    }

    let endpoint = match Endpoint::insert(&mut *tx, account.id, req).await {
        Ok(endpoint) => endpoint,
        Err(e) if is_unique_violation(&e) => {
            return Err(AppError::StoreConflict("endpoint identity already exists".to_string()));
        }
        Err(e) => return Err(e.into()),
    };

    Account::consume_license(&mut *tx, account.id).await?;

    AuditEntry::new(account.id, "create", "endpoint")
        .entity(endpoint.id)
        .details(json!({
            "hostname": &req.hostname,
            "os": &req.os,
            "agent_version": &req.agent_version,
            "ip_address": &req.ip_address,
        }))
        .request_meta(meta.ip_address.clone(), meta.user_agent.clone())
        .record(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!("Endpoint registered: {} ({})", endpoint.hostname, endpoint.id);
    Ok(RegisterResponse {
        success: true,
        endpoint_id: endpoint.id,
        message: "Endpoint registered successfully",
    })
}

#[derive(Debug, Serialize)]
pub struct HeartbeatResponse {
    pub success: bool,
    pub policies: Vec<Policy>,
    pub server_time: String,
}

/// Heartbeat: liveness + telemetry in, effective policy set out
pub async fn heartbeat(
    State(state): State<AppState>,
    Json(req): Json<HeartbeatRequest>,
) -> AppResult<Json<HeartbeatResponse>> {
    if req.endpoint_id.is_none() && req.agent_id.is_none() {
        return Err(AppError::ValidationError("endpoint_id or agent_id is required".to_string()));
    }

    let status = match &req.status {
        Some(s) => EndpointStatus::parse(s)
            .ok_or_else(|| AppError::ValidationError("invalid status".to_string()))?,
        None => EndpointStatus::Online,
    };

    let endpoint = Endpoint::find_for_agent(&state.pool, req.endpoint_id, req.agent_id, req.account_id)
        .await?
        .ok_or(AppError::EndpointNotFound)?;

    Endpoint::record_heartbeat(
        &state.pool,
        endpoint.id,
        status,
        req.agent_version.as_deref(),
        req.ip_address.as_deref(),
    )
    .await?;

    if let Some(system_info) = &req.system_info {
        Endpoint::record_telemetry(&state.pool, endpoint.id, req.agent_version.as_deref(), system_info)
            .await?;
    }

    // Pull-based policy delivery: the heartbeat interval bounds how stale an
    // agent's policy set can get.
    let assigned = Policy::assigned_to_endpoint(&state.pool, endpoint.id).await?;
    let defaults = Policy::account_defaults(&state.pool, endpoint.account_id).await?;
    let policies = merge_effective(assigned, defaults);

    Ok(Json(HeartbeatResponse {
        success: true,
        policies,
        server_time: Utc::now().to_rfc3339(),
    }))
}

/// Record a detection event reported by an agent
pub async fn report_threat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ReportThreatRequest>,
) -> AppResult<Json<ReportThreatResponse>> {
    if req.endpoint_id.is_none() && req.agent_id.is_none() {
        return Err(AppError::ValidationError("endpoint_id or agent_id is required".to_string()));
    }
    if req.name.trim().is_empty() {
        return Err(AppError::ValidationError("name is required".to_string()));
    }
    let severity = ThreatSeverity::parse(&req.severity).ok_or_else(|| {
        AppError::ValidationError("severity must be one of critical, high, medium, low, info".to_string())
    })?;

    let endpoint = Endpoint::find_for_agent(&state.pool, req.endpoint_id, req.agent_id, None)
        .await?
        .ok_or(AppError::EndpointNotFound)?;

    let threat = Threat::create(&state.pool, endpoint.account_id, endpoint.id, &req).await?;

    let meta = request_meta(&headers);
    AuditEntry::new(endpoint.account_id, "create", "threat")
        .entity(threat.id)
        .details(json!({
            "name": &req.name,
            "severity": &req.severity,
            "endpoint_id": endpoint.id,
            "detection_engine": &req.detection_engine,
        }))
        .request_meta(meta.ip_address, meta.user_agent)
        .record_best_effort(&state.pool)
        .await;

    // The server only recommends; containment is executed endpoint-side.
    let action_policies = Policy::active_threat_actions(&state.pool, endpoint.account_id).await?;
    let recommended_action = resolve_recommended_action(&action_policies, severity);

    tracing::info!(
        "Threat reported: {} ({}) on endpoint {} -> {}",
        threat.name, threat.severity, endpoint.id, recommended_action
    );

    Ok(Json(ReportThreatResponse {
        success: true,
        threat_id: threat.id,
        recommended_action,
    }))
}

#[derive(Debug, Deserialize)]
pub struct UninstallRequest {
    pub endpoint_id: Option<Uuid>,
    pub agent_id: Option<Uuid>,
    pub os: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UninstallCommands {
    pub os: String,
    pub commands: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct UninstallResponse {
    pub success: bool,
    pub endpoint_id: Uuid,
    pub account_id: Uuid,
    pub uninstall: UninstallCommands,
}

/// Deregister an endpoint and hand back the local cleanup commands.
/// Operator-only: there is no self-service uninstall from the agent side.
pub async fn uninstall(
    State(state): State<AppState>,
    user: UserContext,
    headers: HeaderMap,
    Json(req): Json<UninstallRequest>,
) -> AppResult<Json<UninstallResponse>> {
    require_admin(&user)?;

    if req.endpoint_id.is_none() && req.agent_id.is_none() {
        return Err(AppError::ValidationError("endpoint_id or agent_id is required".to_string()));
    }

    let mut tx = state.pool.begin().await?;

    // Same lock order as registration (account first), so license counters
    // stay consistent under concurrent register/uninstall.
    Account::lock_by_id(&mut *tx, user.account_id)
        .await?
        .ok_or(AppError::AccountNotFound)?;

    let endpoint = Endpoint::find_for_uninstall(&mut *tx, user.account_id, req.endpoint_id, req.agent_id)
        .await?
        .ok_or(AppError::EndpointNotFound)?;

    Endpoint::delete(&mut *tx, endpoint.id).await?;
    Account::release_license(&mut *tx, user.account_id).await?;

    let meta = request_meta(&headers);
    AuditEntry::new(endpoint.account_id, "delete", "endpoint")
        .user(user.user_id)
        .entity(endpoint.id)
        .details(json!({
            "hostname": &endpoint.hostname,
            "agent_id": &endpoint.agent_id,
            "mac_address": &endpoint.mac_address,
            "ip_address": &endpoint.ip_address,
        }))
        .request_meta(meta.ip_address, meta.user_agent)
        .record(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!("Endpoint uninstalled: {} ({})", endpoint.hostname, endpoint.id);

    let os = req.os.as_deref().unwrap_or(&endpoint.os);
    Ok(Json(UninstallResponse {
        success: true,
        endpoint_id: endpoint.id,
        account_id: endpoint.account_id,
        uninstall: uninstall_commands(os),
    }))
}

/// Cleanup the operator must run on the machine itself; the server has no
/// channel to execute anything remotely.
pub fn uninstall_commands(os: &str) -> UninstallCommands {
    match os.to_ascii_lowercase().as_str() {
        "macos" => UninstallCommands {
            os: "macos".to_string(),
            commands: vec![
                "sudo launchctl unload /Library/LaunchDaemons/com.kuamini.agent.plist || true".to_string(),
                "sudo rm -rf /usr/local/kuamini /etc/kuamini /var/log/kuamini /Library/LaunchDaemons/com.kuamini.agent.plist".to_string(),
            ],
        },
        "linux" => UninstallCommands {
            os: "linux".to_string(),
            commands: vec![
                "sudo systemctl stop kuamini-agent || true".to_string(),
                "sudo systemctl disable kuamini-agent || true".to_string(),
                "sudo rm -rf /opt/kuamini /etc/kuamini /var/log/kuamini /etc/systemd/system/kuamini-agent.service".to_string(),
                "sudo systemctl daemon-reload".to_string(),
            ],
        },
        "windows" => UninstallCommands {
            os: "windows".to_string(),
            commands: vec![
                "powershell -Command \"Unregister-ScheduledTask -TaskName 'KuaminiThreatProtectAgent' -Confirm:$false -ErrorAction SilentlyContinue; Remove-Item -Recurse -Force 'C:\\Program Files\\Kuamini','C:\\ProgramData\\Kuamini' -ErrorAction SilentlyContinue\"".to_string(),
            ],
        },
        other => UninstallCommands {
            os: other.to_string(),
            commands: vec![],
        },
    }
}

struct RequestMeta {
    ip_address: Option<String>,
    user_agent: Option<String>,
}

fn request_meta(headers: &HeaderMap) -> RequestMeta {
    let ip_address = headers
        .get("x-forwarded-for")
        .or_else(|| headers.get("x-real-ip"))
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split(',').next().unwrap_or(s).trim().to_string());

    let user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    RequestMeta { ip_address, user_agent }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uninstall_commands_per_os() {
        let macos = uninstall_commands("macos");
        assert_eq!(macos.os, "macos");
        assert!(macos.commands.iter().any(|c| c.contains("launchctl unload")));

        let linux = uninstall_commands("Linux");
        assert_eq!(linux.os, "linux");
        assert!(linux.commands.iter().any(|c| c.contains("systemctl stop kuamini-agent")));
        assert!(linux.commands.last().unwrap().contains("daemon-reload"));

        let windows = uninstall_commands("windows");
        assert_eq!(windows.os, "windows");
        assert_eq!(windows.commands.len(), 1);
        assert!(windows.commands[0].contains("Unregister-ScheduledTask"));
    }

    #[test]
    fn unknown_os_gets_no_commands() {
        let other = uninstall_commands("freebsd");
        assert_eq!(other.os, "freebsd");
        assert!(other.commands.is_empty());
    }
}
