//! Account (tenant) model

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;
use chrono::{DateTime, Utc};

/// Accounts nest through `parent_account_id`; this is the deepest level allowed.
pub const MAX_ACCOUNT_LEVEL: i32 = 5;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub id: Uuid,
    pub name: String,
    pub parent_account_id: Option<Uuid>,
    pub level: i32,
    pub license_tier_id: Option<Uuid>,
    pub total_licenses: i32,
    pub used_licenses: i32,
    pub allocated_licenses: i32,
    pub license_expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Sub-accounts start with zero licenses; capacity arrives only through an
/// explicit allocation from the parent.
#[derive(Debug, Deserialize)]
pub struct CreateSubAccount {
    #[serde(default)]
    pub name: String,
}

impl Account {
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Load and row-lock the account for the duration of the transaction.
    ///
    /// Registration, uninstall and allocation all mutate license counters; the
    /// lock serializes those mutations per account so two concurrent requests
    /// cannot both observe the same free license.
    pub async fn lock_by_id(conn: &mut PgConnection, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(conn)
            .await
    }

    /// Consume one license. Caller holds the row lock and has already run admission.
    pub async fn consume_license(conn: &mut PgConnection, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE accounts SET used_licenses = used_licenses + 1, updated_at = NOW() WHERE id = $1"
        )
        .bind(id)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Release one license, flooring at zero.
    pub async fn release_license(conn: &mut PgConnection, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE accounts SET used_licenses = GREATEST(used_licenses - 1, 0), updated_at = NOW() WHERE id = $1"
        )
        .bind(id)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Move `quantity` licenses from the parent's free pool into its
    /// allocated pool. Caller holds both row locks and has checked capacity.
    pub async fn grant_allocation(conn: &mut PgConnection, id: Uuid, quantity: i32) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE accounts SET allocated_licenses = allocated_licenses + $2, updated_at = NOW() WHERE id = $1"
        )
        .bind(id)
        .bind(quantity)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Credit `quantity` licenses to a child's total. Negative quantity
    /// reverses a revoked allocation.
    pub async fn adjust_total(conn: &mut PgConnection, id: Uuid, quantity: i32) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE accounts SET total_licenses = total_licenses + $2, updated_at = NOW() WHERE id = $1"
        )
        .bind(id)
        .bind(quantity)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Return `quantity` licenses from the parent's allocated pool to its free pool.
    pub async fn return_allocation(conn: &mut PgConnection, id: Uuid, quantity: i32) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE accounts SET allocated_licenses = GREATEST(allocated_licenses - $2, 0), updated_at = NOW() WHERE id = $1"
        )
        .bind(id)
        .bind(quantity)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn create_sub_account(
        conn: &mut PgConnection,
        parent: &Account,
        data: &CreateSubAccount,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Account>(
            r#"
            INSERT INTO accounts (name, parent_account_id, level, license_tier_id)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#
        )
        .bind(&data.name)
        .bind(parent.id)
        .bind(parent.level + 1)
        .bind(parent.license_tier_id)
        .fetch_one(conn)
        .await
    }

    /// Licenses still free for endpoint admission or sub-account allocation.
    pub fn available_licenses(&self) -> i32 {
        self.total_licenses - self.used_licenses - self.allocated_licenses
    }
}
