//! Endpoint (managed machine) model

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use validator::Validate;

/// Operating system family running the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointOs {
    Windows,
    Macos,
    Linux,
}

impl EndpointOs {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "windows" => Some(Self::Windows),
            "macos" => Some(Self::Macos),
            "linux" => Some(Self::Linux),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Windows => "windows",
            Self::Macos => "macos",
            Self::Linux => "linux",
        }
    }
}

/// Liveness state, driven by heartbeats and the background sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointStatus {
    Online,
    Offline,
    Disconnected,
}

impl EndpointStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "online" => Some(Self::Online),
            "offline" => Some(Self::Offline),
            "disconnected" => Some(Self::Disconnected),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Disconnected => "disconnected",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Endpoint {
    pub id: Uuid,
    pub account_id: Uuid,
    pub agent_id: Option<Uuid>,
    pub hostname: String,
    pub mac_address: Option<String>,
    pub ip_address: Option<String>,
    pub os: String,
    pub os_version: Option<String>,
    pub agent_version: Option<String>,
    pub status: String,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub registered_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The required fields default to empty and are checked by the handler, so a
/// missing field reports the same 400 as an empty one.
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    #[validate(length(min = 1, message = "hostname is required"))]
    pub hostname: String,
    #[serde(default)]
    pub os: String,
    pub os_version: Option<String>,
    pub agent_version: Option<String>,
    pub ip_address: Option<String>,
    pub mac_address: Option<String>,
    pub agent_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub success: bool,
    pub endpoint_id: Uuid,
    pub message: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub endpoint_id: Option<Uuid>,
    pub agent_id: Option<Uuid>,
    pub account_id: Option<Uuid>,
    pub status: Option<String>,
    pub agent_version: Option<String>,
    pub ip_address: Option<String>,
    pub system_info: Option<serde_json::Value>,
}

impl Endpoint {
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Endpoint>("SELECT * FROM endpoints WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Resolve the endpoint identity a registration refers to.
    ///
    /// The stable `agent_id` wins when the client sent one; older agents fall
    /// back to the (hostname, mac_address) pair scoped to the account. Both
    /// keys are backed by unique indexes, so at most one row can match.
    pub async fn find_by_identity(
        conn: &mut PgConnection,
        account_id: Uuid,
        agent_id: Option<Uuid>,
        hostname: &str,
        mac_address: Option<&str>,
    ) -> Result<Option<Self>, sqlx::Error> {
        if let Some(agent_id) = agent_id {
            // Scoped to the token's account: a token for tenant A must never
            // resolve (and then overwrite) tenant B's endpoint.
            return sqlx::query_as::<_, Endpoint>(
                "SELECT * FROM endpoints WHERE agent_id = $1 AND account_id = $2"
            )
            .bind(agent_id)
            .bind(account_id)
            .fetch_optional(conn)
            .await;
        }

        sqlx::query_as::<_, Endpoint>(
            r#"
            SELECT * FROM endpoints
            WHERE account_id = $1 AND hostname = $2 AND mac_address IS NOT DISTINCT FROM $3
            "#
        )
        .bind(account_id)
        .bind(hostname)
        .bind(mac_address)
        .fetch_optional(conn)
        .await
    }

    /// Resolve the endpoint a heartbeat or threat report refers to.
    pub async fn find_for_agent(
        pool: &PgPool,
        endpoint_id: Option<Uuid>,
        agent_id: Option<Uuid>,
        account_id: Option<Uuid>,
    ) -> Result<Option<Self>, sqlx::Error> {
        if let Some(id) = endpoint_id {
            return Self::find_by_id(pool, id).await;
        }

        let Some(agent_id) = agent_id else {
            return Ok(None);
        };

        match account_id {
            Some(account_id) => {
                sqlx::query_as::<_, Endpoint>(
                    "SELECT * FROM endpoints WHERE agent_id = $1 AND account_id = $2"
                )
                .bind(agent_id)
                .bind(account_id)
                .fetch_optional(pool)
                .await
            }
            None => {
                sqlx::query_as::<_, Endpoint>("SELECT * FROM endpoints WHERE agent_id = $1")
                    .bind(agent_id)
                    .fetch_optional(pool)
                    .await
            }
        }
    }

    pub async fn insert(
        conn: &mut PgConnection,
        account_id: Uuid,
        req: &RegisterRequest,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Endpoint>(
            r#"
            INSERT INTO endpoints
                (account_id, agent_id, hostname, mac_address, ip_address, os, os_version, agent_version, status, last_seen_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'online', NOW())
            RETURNING *
            "#
        )
        .bind(account_id)
        .bind(req.agent_id)
        .bind(&req.hostname)
        .bind(&req.mac_address)
        .bind(&req.ip_address)
        .bind(&req.os)
        .bind(&req.os_version)
        .bind(&req.agent_version)
        .fetch_one(conn)
        .await
    }

    /// Re-registration: refresh every mutable field in place. The row keeps its
    /// id and its license; only the reported attributes change.
    pub async fn reregister(
        conn: &mut PgConnection,
        id: Uuid,
        req: &RegisterRequest,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Endpoint>(
            r#"
            UPDATE endpoints
            SET hostname = $2,
                mac_address = COALESCE($3, mac_address),
                ip_address = COALESCE($4, ip_address),
                os = $5,
                os_version = COALESCE($6, os_version),
                agent_version = COALESCE($7, agent_version),
                agent_id = COALESCE($8, agent_id),
                status = 'online',
                last_seen_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#
        )
        .bind(id)
        .bind(&req.hostname)
        .bind(&req.mac_address)
        .bind(&req.ip_address)
        .bind(&req.os)
        .bind(&req.os_version)
        .bind(&req.agent_version)
        .bind(req.agent_id)
        .fetch_one(conn)
        .await
    }

    pub async fn record_heartbeat(
        pool: &PgPool,
        id: Uuid,
        status: EndpointStatus,
        agent_version: Option<&str>,
        ip_address: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE endpoints
            SET status = $2,
                last_seen_at = NOW(),
                agent_version = COALESCE($3, agent_version),
                ip_address = COALESCE($4, ip_address),
                updated_at = NOW()
            WHERE id = $1
            "#
        )
        .bind(id)
        .bind(status.as_str())
        .bind(agent_version)
        .bind(ip_address)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn list_by_account(pool: &PgPool, account_id: Uuid, limit: i64) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Endpoint>(
            r#"
            SELECT * FROM endpoints
            WHERE account_id = $1
            ORDER BY last_seen_at DESC NULLS LAST
            LIMIT $2
            "#
        )
        .bind(account_id)
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    /// Locate an endpoint inside the caller's account for deregistration.
    /// Always scoped by account so one tenant can never touch another's machines.
    pub async fn find_for_uninstall(
        conn: &mut PgConnection,
        account_id: Uuid,
        endpoint_id: Option<Uuid>,
        agent_id: Option<Uuid>,
    ) -> Result<Option<Self>, sqlx::Error> {
        if let Some(id) = endpoint_id {
            return sqlx::query_as::<_, Endpoint>(
                "SELECT * FROM endpoints WHERE id = $1 AND account_id = $2"
            )
            .bind(id)
            .bind(account_id)
            .fetch_optional(conn)
            .await;
        }

        let Some(agent_id) = agent_id else {
            return Ok(None);
        };

        sqlx::query_as::<_, Endpoint>(
            "SELECT * FROM endpoints WHERE agent_id = $1 AND account_id = $2"
        )
        .bind(agent_id)
        .bind(account_id)
        .fetch_optional(conn)
        .await
    }

    pub async fn delete(conn: &mut PgConnection, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM endpoints WHERE id = $1")
            .bind(id)
            .execute(conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn record_telemetry(
        pool: &PgPool,
        id: Uuid,
        agent_version: Option<&str>,
        system_info: &serde_json::Value,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO heartbeat_history (endpoint_id, agent_version, system_info) VALUES ($1, $2, $3)"
        )
        .bind(id)
        .bind(agent_version)
        .bind(system_info)
        .execute(pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn os_parse_is_case_insensitive() {
        assert_eq!(EndpointOs::parse("Windows"), Some(EndpointOs::Windows));
        assert_eq!(EndpointOs::parse("macos"), Some(EndpointOs::Macos));
        assert_eq!(EndpointOs::parse("LINUX"), Some(EndpointOs::Linux));
        assert_eq!(EndpointOs::parse("solaris"), None);
    }

    #[test]
    fn status_round_trips() {
        for status in [EndpointStatus::Online, EndpointStatus::Offline, EndpointStatus::Disconnected] {
            assert_eq!(EndpointStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(EndpointStatus::parse("sleeping"), None);
    }
}
