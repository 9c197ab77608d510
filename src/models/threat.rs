//! Threat model
//!
//! A threat row is an immutable detection event; its `status` field tracks the
//! current disposition, and every transition is recorded as a `ThreatAction`
//! row so the trail survives later edits.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;
use chrono::{DateTime, Utc};

use super::policy::{Policy, SeverityActions, ThreatActionsSettings};

/// Recommended action when no threat_actions policy matches the severity.
pub const DEFAULT_RECOMMENDED_ACTION: &str = "alert";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreatSeverity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl ThreatSeverity {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "critical" => Some(Self::Critical),
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            "info" => Some(Self::Info),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Info => "info",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreatStatus {
    Detected,
    Quarantined,
    Killed,
    Allowed,
    Resolved,
}

impl ThreatStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detected => "detected",
            Self::Quarantined => "quarantined",
            Self::Killed => "killed",
            Self::Allowed => "allowed",
            Self::Resolved => "resolved",
        }
    }
}

/// Operator action applied to a threat from the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreatActionType {
    Quarantine,
    Kill,
    Allow,
    Restore,
    Delete,
}

impl ThreatActionType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "quarantine" => Some(Self::Quarantine),
            "kill" => Some(Self::Kill),
            "allow" => Some(Self::Allow),
            "restore" => Some(Self::Restore),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quarantine => "quarantine",
            Self::Kill => "kill",
            Self::Allow => "allow",
            Self::Restore => "restore",
            Self::Delete => "delete",
        }
    }

    /// Status the threat transitions to when this action is applied.
    /// `restore` puts a quarantined file back, so the threat is detected again;
    /// `delete` removes the artifact and closes the threat out.
    pub fn resulting_status(&self) -> ThreatStatus {
        match self {
            Self::Quarantine => ThreatStatus::Quarantined,
            Self::Kill => ThreatStatus::Killed,
            Self::Allow => ThreatStatus::Allowed,
            Self::Restore => ThreatStatus::Detected,
            Self::Delete => ThreatStatus::Resolved,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Threat {
    pub id: Uuid,
    pub account_id: Uuid,
    pub endpoint_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub severity: String,
    pub status: String,
    pub file_path: Option<String>,
    pub file_hash: Option<String>,
    pub process_name: Option<String>,
    pub detection_engine: Option<String>,
    pub detected_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ThreatAction {
    pub id: Uuid,
    pub threat_id: Uuid,
    pub action: String,
    pub performed_by: Option<Uuid>,
    pub notes: Option<String>,
    pub performed_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ReportThreatRequest {
    pub endpoint_id: Option<Uuid>,
    pub agent_id: Option<Uuid>,
    #[serde(default)]
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub severity: String,
    pub file_path: Option<String>,
    pub file_hash: Option<String>,
    pub process_name: Option<String>,
    pub detection_engine: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ReportThreatResponse {
    pub success: bool,
    pub threat_id: Uuid,
    pub recommended_action: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct ThreatFilter {
    pub status: Option<String>,
    pub severity: Option<String>,
    pub endpoint_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ApplyThreatAction {
    #[serde(default)]
    pub action: String,
    pub notes: Option<String>,
}

impl Threat {
    pub async fn create(
        pool: &PgPool,
        account_id: Uuid,
        endpoint_id: Uuid,
        req: &ReportThreatRequest,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Threat>(
            r#"
            INSERT INTO threats
                (account_id, endpoint_id, name, description, severity, status, file_path, file_hash, process_name, detection_engine)
            VALUES ($1, $2, $3, $4, $5, 'detected', $6, $7, $8, $9)
            RETURNING *
            "#
        )
        .bind(account_id)
        .bind(endpoint_id)
        .bind(&req.name)
        .bind(&req.description)
        .bind(&req.severity)
        .bind(&req.file_path)
        .bind(&req.file_hash)
        .bind(&req.process_name)
        .bind(&req.detection_engine)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Threat>("SELECT * FROM threats WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list_by_account(
        pool: &PgPool,
        account_id: Uuid,
        filter: &ThreatFilter,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Threat>(
            r#"
            SELECT * FROM threats
            WHERE account_id = $1
              AND ($2::text IS NULL OR status = $2)
              AND ($3::text IS NULL OR severity = $3)
              AND ($4::uuid IS NULL OR endpoint_id = $4)
            ORDER BY detected_at DESC
            LIMIT $5 OFFSET $6
            "#
        )
        .bind(account_id)
        .bind(&filter.status)
        .bind(&filter.severity)
        .bind(filter.endpoint_id)
        .bind(filter.limit.unwrap_or(50))
        .bind(filter.offset.unwrap_or(0))
        .fetch_all(pool)
        .await
    }

    /// Apply an operator action: transition the status and append the
    /// audit-trail row in one transaction.
    pub async fn apply_action(
        pool: &PgPool,
        id: Uuid,
        action: ThreatActionType,
        performed_by: Uuid,
        notes: Option<&str>,
    ) -> Result<Self, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let status = action.resulting_status();
        let resolved = status == ThreatStatus::Resolved;

        let threat = sqlx::query_as::<_, Threat>(
            r#"
            UPDATE threats
            SET status = $2,
                resolved_at = CASE WHEN $3 THEN NOW() ELSE resolved_at END,
                resolved_by = CASE WHEN $3 THEN $4 ELSE resolved_by END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#
        )
        .bind(id)
        .bind(status.as_str())
        .bind(resolved)
        .bind(performed_by)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO threat_actions (threat_id, action, performed_by, notes) VALUES ($1, $2, $3, $4)"
        )
        .bind(id)
        .bind(action.as_str())
        .bind(performed_by)
        .bind(notes)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(threat)
    }

    pub async fn actions(pool: &PgPool, threat_id: Uuid) -> Result<Vec<ThreatAction>, sqlx::Error> {
        sqlx::query_as::<_, ThreatAction>(
            "SELECT * FROM threat_actions WHERE threat_id = $1 ORDER BY performed_at ASC"
        )
        .bind(threat_id)
        .fetch_all(pool)
        .await
    }
}

/// Resolve what the agent should do about a threat of the given severity.
///
/// Walks the account's active `threat_actions` policies in order; the first
/// policy whose config has an entry for the severity wins. An entry's `action`
/// takes precedence over its `auto_action`. No match falls back to `alert`.
pub fn resolve_recommended_action(policies: &[Policy], severity: ThreatSeverity) -> String {
    for policy in policies {
        let Ok(settings) = serde_json::from_value::<ThreatActionsSettings>(policy.config.clone()) else {
            // A malformed config should have been caught at the store boundary;
            // skip it rather than fail the whole report.
            continue;
        };

        if let Some(entry) = settings.get(severity.as_str()) {
            if let Some(action) = pick_action(entry) {
                return action;
            }
        }
    }

    DEFAULT_RECOMMENDED_ACTION.to_string()
}

fn pick_action(entry: &SeverityActions) -> Option<String> {
    entry.action.clone().or_else(|| entry.auto_action.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn threat_actions_policy(config: serde_json::Value) -> Policy {
        Policy {
            id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            name: "threat actions".to_string(),
            description: None,
            policy_type: "threat_actions".to_string(),
            config,
            is_default: false,
            is_active: true,
            created_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn resolves_action_for_matching_severity() {
        let policies = vec![threat_actions_policy(json!({
            "critical": {"action": "quarantine"},
            "high": {"auto_action": "kill"}
        }))];

        assert_eq!(resolve_recommended_action(&policies, ThreatSeverity::Critical), "quarantine");
        assert_eq!(resolve_recommended_action(&policies, ThreatSeverity::High), "kill");
    }

    #[test]
    fn unmatched_severity_falls_back_to_alert() {
        let policies = vec![threat_actions_policy(json!({
            "critical": {"action": "quarantine"}
        }))];

        assert_eq!(resolve_recommended_action(&policies, ThreatSeverity::Info), "alert");
        assert_eq!(resolve_recommended_action(&[], ThreatSeverity::Critical), "alert");
    }

    #[test]
    fn first_matching_policy_wins() {
        let policies = vec![
            threat_actions_policy(json!({"critical": {"action": "kill"}})),
            threat_actions_policy(json!({"critical": {"action": "quarantine"}})),
        ];

        assert_eq!(resolve_recommended_action(&policies, ThreatSeverity::Critical), "kill");
    }

    #[test]
    fn action_beats_auto_action_within_an_entry() {
        let policies = vec![threat_actions_policy(json!({
            "critical": {"action": "quarantine", "auto_action": "kill"}
        }))];

        assert_eq!(resolve_recommended_action(&policies, ThreatSeverity::Critical), "quarantine");
    }

    #[test]
    fn empty_entry_does_not_match() {
        // A severity key with neither action field falls through to later
        // policies, then to the default.
        let policies = vec![
            threat_actions_policy(json!({"critical": {}})),
            threat_actions_policy(json!({"critical": {"action": "quarantine"}})),
        ];

        assert_eq!(resolve_recommended_action(&policies, ThreatSeverity::Critical), "quarantine");
    }

    #[test]
    fn malformed_config_is_skipped() {
        let policies = vec![
            threat_actions_policy(json!("not an object")),
            threat_actions_policy(json!({"critical": {"action": "quarantine"}})),
        ];

        assert_eq!(resolve_recommended_action(&policies, ThreatSeverity::Critical), "quarantine");
    }

    #[test]
    fn severity_and_action_round_trip() {
        for s in [
            ThreatSeverity::Critical,
            ThreatSeverity::High,
            ThreatSeverity::Medium,
            ThreatSeverity::Low,
            ThreatSeverity::Info,
        ] {
            assert_eq!(ThreatSeverity::parse(s.as_str()), Some(s));
        }
        assert_eq!(ThreatSeverity::parse("catastrophic"), None);

        for a in [
            ThreatActionType::Quarantine,
            ThreatActionType::Kill,
            ThreatActionType::Allow,
            ThreatActionType::Restore,
            ThreatActionType::Delete,
        ] {
            assert_eq!(ThreatActionType::parse(a.as_str()), Some(a));
        }
    }

    #[test]
    fn action_status_transitions() {
        assert_eq!(ThreatActionType::Quarantine.resulting_status(), ThreatStatus::Quarantined);
        assert_eq!(ThreatActionType::Kill.resulting_status(), ThreatStatus::Killed);
        assert_eq!(ThreatActionType::Allow.resulting_status(), ThreatStatus::Allowed);
        assert_eq!(ThreatActionType::Restore.resulting_status(), ThreatStatus::Detected);
        assert_eq!(ThreatActionType::Delete.resulting_status(), ThreatStatus::Resolved);
    }
}
