//! License admission control
//!
//! Decides whether an account may register one more endpoint. Pure logic over
//! an already-loaded account row; the caller is responsible for evaluating it
//! while holding the account row lock, so the decision and the counter
//! increment commit as one unit.

use crate::models::Account;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    Admit,
    /// Account exists but has been deactivated.
    AccountInactive,
    /// Every license is either consumed by an endpoint or handed to a sub-account.
    LicenseExhausted,
}

/// Evaluate whether `account` can take on a new endpoint.
///
/// Capacity counts licenses allocated to sub-accounts as spent: a parent that
/// handed out its last license cannot also register an endpoint against it,
/// otherwise `used + allocated` would exceed `total`.
pub fn evaluate(account: &Account) -> AdmissionDecision {
    if !account.is_active {
        return AdmissionDecision::AccountInactive;
    }

    if account.available_licenses() <= 0 {
        return AdmissionDecision::LicenseExhausted;
    }

    AdmissionDecision::Admit
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn account(total: i32, used: i32, allocated: i32, active: bool) -> Account {
        Account {
            id: Uuid::new_v4(),
            name: "Acme".to_string(),
            parent_account_id: None,
            level: 1,
            license_tier_id: None,
            total_licenses: total,
            used_licenses: used,
            allocated_licenses: allocated,
            license_expires_at: None,
            is_active: active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn admits_when_capacity_remains() {
        assert_eq!(evaluate(&account(10, 3, 2, true)), AdmissionDecision::Admit);
        assert_eq!(evaluate(&account(1, 0, 0, true)), AdmissionDecision::Admit);
    }

    #[test]
    fn rejects_exhausted_account() {
        assert_eq!(evaluate(&account(1, 1, 0, true)), AdmissionDecision::LicenseExhausted);
        assert_eq!(evaluate(&account(0, 0, 0, true)), AdmissionDecision::LicenseExhausted);
    }

    #[test]
    fn allocation_counts_against_capacity() {
        // All remaining capacity was handed to sub-accounts.
        assert_eq!(evaluate(&account(10, 4, 6, true)), AdmissionDecision::LicenseExhausted);
        assert_eq!(evaluate(&account(10, 4, 5, true)), AdmissionDecision::Admit);
    }

    #[test]
    fn rejects_inactive_account() {
        // Inactive wins over capacity: the account is off regardless of licenses.
        assert_eq!(evaluate(&account(10, 0, 0, false)), AdmissionDecision::AccountInactive);
    }
}
