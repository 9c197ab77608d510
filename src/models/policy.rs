//! Policy model
//!
//! A policy is a named, typed configuration bundle scoped to an account. The
//! `config` column is JSONB whose shape depends on the policy type; the typed
//! settings structs below are the single place that shape is enforced, at the
//! store boundary (create/update).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyType {
    RealTimeProtection,
    ScheduledScan,
    Exclusions,
    ThreatActions,
    NetworkProtection,
    DeviceControl,
}

impl PolicyType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "real_time_protection" => Some(Self::RealTimeProtection),
            "scheduled_scan" => Some(Self::ScheduledScan),
            "exclusions" => Some(Self::Exclusions),
            "threat_actions" => Some(Self::ThreatActions),
            "network_protection" => Some(Self::NetworkProtection),
            "device_control" => Some(Self::DeviceControl),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RealTimeProtection => "real_time_protection",
            Self::ScheduledScan => "scheduled_scan",
            Self::Exclusions => "exclusions",
            Self::ThreatActions => "threat_actions",
            Self::NetworkProtection => "network_protection",
            Self::DeviceControl => "device_control",
        }
    }
}

// Per-type settings payloads. Unknown keys are rejected so a typo in a config
// blob surfaces at policy creation instead of silently doing nothing on agents.

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RealTimeProtectionSettings {
    pub enabled: bool,
    #[serde(default)]
    pub scan_on_write: bool,
    #[serde(default)]
    pub scan_archives: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduledScanSettings {
    pub schedule: String,
    #[serde(default)]
    pub scan_type: Option<String>,
    #[serde(default)]
    pub max_duration_minutes: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ExclusionsSettings {
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub processes: Vec<String>,
    #[serde(default)]
    pub hashes: Vec<String>,
}

/// What to do per severity. Either field may be present; `action` is the
/// operator recommendation, `auto_action` the containment the agent applies
/// on its own.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SeverityActions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_action: Option<String>,
}

/// Severity name -> actions map, e.g. `{"critical": {"action": "quarantine"}}`.
pub type ThreatActionsSettings = HashMap<String, SeverityActions>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkProtectionSettings {
    pub enabled: bool,
    #[serde(default)]
    pub blocked_domains: Vec<String>,
    #[serde(default)]
    pub blocked_ips: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceControlSettings {
    pub usb_storage: String,
    #[serde(default)]
    pub allowed_device_ids: Vec<String>,
}

/// Validate a config blob against its declared policy type.
pub fn validate_config(policy_type: PolicyType, config: &serde_json::Value) -> Result<(), String> {
    let result = match policy_type {
        PolicyType::RealTimeProtection => {
            serde_json::from_value::<RealTimeProtectionSettings>(config.clone()).map(|_| ())
        }
        PolicyType::ScheduledScan => {
            serde_json::from_value::<ScheduledScanSettings>(config.clone()).map(|_| ())
        }
        PolicyType::Exclusions => {
            serde_json::from_value::<ExclusionsSettings>(config.clone()).map(|_| ())
        }
        PolicyType::ThreatActions => {
            serde_json::from_value::<ThreatActionsSettings>(config.clone()).map(|_| ())
        }
        PolicyType::NetworkProtection => {
            serde_json::from_value::<NetworkProtectionSettings>(config.clone()).map(|_| ())
        }
        PolicyType::DeviceControl => {
            serde_json::from_value::<DeviceControlSettings>(config.clone()).map(|_| ())
        }
    };

    result.map_err(|e| format!("invalid {} config: {}", policy_type.as_str(), e))
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Policy {
    pub id: Uuid,
    pub account_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub policy_type: String,
    pub config: serde_json::Value,
    pub is_default: bool,
    pub is_active: bool,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePolicy {
    #[serde(default)]
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "type", default)]
    pub policy_type: String,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePolicy {
    pub name: Option<String>,
    pub description: Option<String>,
    pub config: Option<serde_json::Value>,
    pub is_default: Option<bool>,
    pub is_active: Option<bool>,
}

impl Policy {
    pub async fn create(
        pool: &PgPool,
        account_id: Uuid,
        created_by: Option<Uuid>,
        data: &CreatePolicy,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Policy>(
            r#"
            INSERT INTO policies (account_id, name, description, type, config, is_default, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#
        )
        .bind(account_id)
        .bind(&data.name)
        .bind(&data.description)
        .bind(&data.policy_type)
        .bind(&data.config)
        .bind(data.is_default)
        .bind(created_by)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Policy>("SELECT * FROM policies WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list_by_account(pool: &PgPool, account_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Policy>(
            "SELECT * FROM policies WHERE account_id = $1 ORDER BY created_at DESC"
        )
        .bind(account_id)
        .fetch_all(pool)
        .await
    }

    /// Edits mutate in place; policies are not versioned.
    pub async fn update(pool: &PgPool, id: Uuid, data: &UpdatePolicy) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Policy>(
            r#"
            UPDATE policies
            SET name = COALESCE($2, name),
                description = COALESCE($3, description),
                config = COALESCE($4, config),
                is_default = COALESCE($5, is_default),
                is_active = COALESCE($6, is_active),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#
        )
        .bind(id)
        .bind(&data.name)
        .bind(&data.description)
        .bind(&data.config)
        .bind(data.is_default)
        .bind(data.is_active)
        .fetch_optional(pool)
        .await
    }

    pub async fn delete(pool: &PgPool, id: Uuid, account_id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM policies WHERE id = $1 AND account_id = $2")
            .bind(id)
            .bind(account_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Policies explicitly assigned to an endpoint, oldest assignment first.
    pub async fn assigned_to_endpoint(pool: &PgPool, endpoint_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Policy>(
            r#"
            SELECT p.* FROM policies p
            JOIN endpoint_policies ep ON ep.policy_id = p.id
            WHERE ep.endpoint_id = $1
            ORDER BY ep.assigned_at ASC
            "#
        )
        .bind(endpoint_id)
        .fetch_all(pool)
        .await
    }

    /// Account-wide defaults every endpoint receives.
    pub async fn account_defaults(pool: &PgPool, account_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Policy>(
            r#"
            SELECT * FROM policies
            WHERE account_id = $1 AND is_default = true AND is_active = true
            ORDER BY created_at ASC
            "#
        )
        .bind(account_id)
        .fetch_all(pool)
        .await
    }

    /// Active threat_actions policies, in creation order (first match wins
    /// during severity resolution).
    pub async fn active_threat_actions(pool: &PgPool, account_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Policy>(
            r#"
            SELECT * FROM policies
            WHERE account_id = $1 AND type = 'threat_actions' AND is_active = true
            ORDER BY created_at ASC
            "#
        )
        .bind(account_id)
        .fetch_all(pool)
        .await
    }

    pub async fn assign_to_endpoint(pool: &PgPool, policy_id: Uuid, endpoint_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO endpoint_policies (endpoint_id, policy_id)
            VALUES ($1, $2)
            ON CONFLICT (endpoint_id, policy_id) DO NOTHING
            "#
        )
        .bind(endpoint_id)
        .bind(policy_id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn unassign_from_endpoint(pool: &PgPool, policy_id: Uuid, endpoint_id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM endpoint_policies WHERE endpoint_id = $1 AND policy_id = $2"
        )
        .bind(endpoint_id)
        .bind(policy_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Merge explicitly assigned policies with account defaults, de-duplicated by
/// policy id. Whole policy objects are returned; assigned ones come first and
/// win the de-duplication.
pub fn merge_effective(assigned: Vec<Policy>, defaults: Vec<Policy>) -> Vec<Policy> {
    let mut merged: Vec<Policy> = Vec::with_capacity(assigned.len() + defaults.len());

    for policy in assigned.into_iter().chain(defaults) {
        if !merged.iter().any(|p| p.id == policy.id) {
            merged.push(policy);
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn policy(id: Uuid, name: &str) -> Policy {
        Policy {
            id,
            account_id: Uuid::new_v4(),
            name: name.to_string(),
            description: None,
            policy_type: "real_time_protection".to_string(),
            config: json!({"enabled": true}),
            is_default: false,
            is_active: true,
            created_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn merge_keeps_assigned_and_defaults() {
        let p1 = policy(Uuid::new_v4(), "default");
        let p2 = policy(Uuid::new_v4(), "assigned");

        let merged = merge_effective(vec![p2.clone()], vec![p1.clone()]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].id, p2.id);
        assert_eq!(merged[1].id, p1.id);
    }

    #[test]
    fn merge_drops_duplicate_ids() {
        let id = Uuid::new_v4();
        let assigned = policy(id, "shared");
        let default = policy(id, "shared");

        let merged = merge_effective(vec![assigned], vec![default]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id, id);
    }

    #[test]
    fn merge_of_empty_sets_is_empty() {
        assert!(merge_effective(vec![], vec![]).is_empty());
    }

    #[test]
    fn policy_type_round_trips() {
        for t in [
            PolicyType::RealTimeProtection,
            PolicyType::ScheduledScan,
            PolicyType::Exclusions,
            PolicyType::ThreatActions,
            PolicyType::NetworkProtection,
            PolicyType::DeviceControl,
        ] {
            assert_eq!(PolicyType::parse(t.as_str()), Some(t));
        }
        assert_eq!(PolicyType::parse("firewall"), None);
    }

    #[test]
    fn config_validation_per_type() {
        assert!(validate_config(
            PolicyType::RealTimeProtection,
            &json!({"enabled": true, "scan_on_write": true})
        )
        .is_ok());

        // Missing required field
        assert!(validate_config(PolicyType::RealTimeProtection, &json!({"scan_on_write": true})).is_err());

        // Unknown key is a typo, not a silently ignored setting
        assert!(validate_config(PolicyType::RealTimeProtection, &json!({"enabled": true, "enbaled": false})).is_err());

        assert!(validate_config(
            PolicyType::ThreatActions,
            &json!({"critical": {"action": "quarantine"}, "high": {"auto_action": "kill"}})
        )
        .is_ok());

        assert!(validate_config(PolicyType::Exclusions, &json!({"paths": ["/tmp"]})).is_ok());
        assert!(validate_config(PolicyType::Exclusions, &json!({"paths": "not-a-list"})).is_err());
    }
}
