//! License allocation model (parent -> child capacity transfers)

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LicenseAllocation {
    pub id: Uuid,
    pub from_account_id: Uuid,
    pub to_account_id: Uuid,
    pub quantity: i32,
    pub allocated_by: Option<Uuid>,
    pub allocated_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_by: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct AllocateLicensesRequest {
    pub to_account_id: Uuid,
    pub quantity: i32,
}

impl LicenseAllocation {
    pub async fn create(
        conn: &mut PgConnection,
        from_account_id: Uuid,
        to_account_id: Uuid,
        quantity: i32,
        allocated_by: Uuid,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, LicenseAllocation>(
            r#"
            INSERT INTO license_allocations (from_account_id, to_account_id, quantity, allocated_by)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#
        )
        .bind(from_account_id)
        .bind(to_account_id)
        .bind(quantity)
        .bind(allocated_by)
        .fetch_one(conn)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, LicenseAllocation>("SELECT * FROM license_allocations WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Allocations granted by this account, newest first.
    pub async fn list_by_account(pool: &PgPool, account_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, LicenseAllocation>(
            r#"
            SELECT * FROM license_allocations
            WHERE from_account_id = $1
            ORDER BY allocated_at DESC
            "#
        )
        .bind(account_id)
        .fetch_all(pool)
        .await
    }

    pub async fn mark_revoked(
        conn: &mut PgConnection,
        id: Uuid,
        revoked_by: Uuid,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE license_allocations SET revoked_at = NOW(), revoked_by = $2 WHERE id = $1"
        )
        .bind(id)
        .bind(revoked_by)
        .execute(conn)
        .await?;
        Ok(())
    }
}
