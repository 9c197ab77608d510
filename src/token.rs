//! Registration token codec
//!
//! The installer hands the agent an opaque credential identifying the account
//! it belongs to. The credential is base64 over a small JSON payload:
//!
//! ```text
//! {"accountId": "<uuid>", "accountName": "Acme", "timestamp": <epoch-ms>}
//! ```
//!
//! The token is a bearer credential, not a signed one; possession of it is
//! what authorizes registration against the account.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq)]
pub enum TokenError {
    #[error("invalid registration token")]
    InvalidToken,
}

/// Decoded registration token payload.
///
/// Field names inside the encoded JSON are camelCase; that is the wire format
/// the installers emit and cannot change without breaking deployed agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationToken {
    #[serde(rename = "accountId")]
    pub account_id: Uuid,
    #[serde(rename = "accountName", default)]
    pub account_name: String,
    #[serde(rename = "timestamp")]
    pub issued_at: i64,
}

impl RegistrationToken {
    /// Build a fresh token for an account, stamped with the current time.
    pub fn issue(account_id: Uuid, account_name: &str) -> Self {
        Self {
            account_id,
            account_name: account_name.to_string(),
            issued_at: Utc::now().timestamp_millis(),
        }
    }

    /// Encode into the opaque bearer string handed to installers.
    pub fn encode(&self) -> String {
        // Serialization of this struct cannot fail: all fields are plain data.
        let json = serde_json::to_vec(self).expect("token payload serializes");
        BASE64.encode(json)
    }

    /// Decode a token pasted by an operator.
    ///
    /// Tokens travel through emails and terminal copy-paste, which injects
    /// newlines and spaces into the base64 body; strip all whitespace before
    /// decoding. Anything else malformed is rejected outright.
    pub fn decode(raw: &str) -> Result<Self, TokenError> {
        let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
        if compact.is_empty() {
            return Err(TokenError::InvalidToken);
        }

        let bytes = BASE64.decode(compact.as_bytes()).map_err(|_| TokenError::InvalidToken)?;
        serde_json::from_slice(&bytes).map_err(|_| TokenError::InvalidToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let account_id = Uuid::new_v4();
        let token = RegistrationToken::issue(account_id, "Acme").encode();

        let decoded = RegistrationToken::decode(&token).unwrap();
        assert_eq!(decoded.account_id, account_id);
        assert_eq!(decoded.account_name, "Acme");
        assert!(decoded.issued_at > 0);
    }

    #[test]
    fn tolerates_copy_paste_whitespace() {
        let account_id = Uuid::new_v4();
        let token = RegistrationToken::issue(account_id, "Acme").encode();

        // Inject a newline and spaces mid-token, as a wrapped email would.
        let mid = token.len() / 2;
        let mangled = format!("  {}\n {}\t", &token[..mid], &token[mid..]);

        let decoded = RegistrationToken::decode(&mangled).unwrap();
        assert_eq!(decoded.account_id, account_id);
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(RegistrationToken::decode("not-base64!!!"), Err(TokenError::InvalidToken));
        assert_eq!(RegistrationToken::decode(""), Err(TokenError::InvalidToken));
        assert_eq!(RegistrationToken::decode("   \n\t  "), Err(TokenError::InvalidToken));
    }

    #[test]
    fn rejects_valid_base64_with_bad_payload() {
        // Valid base64, but the JSON inside has no accountId.
        let no_account = BASE64.encode(br#"{"accountName":"Acme","timestamp":1}"#);
        assert_eq!(RegistrationToken::decode(&no_account), Err(TokenError::InvalidToken));

        // Valid base64, not JSON at all.
        let not_json = BASE64.encode(b"hello world");
        assert_eq!(RegistrationToken::decode(&not_json), Err(TokenError::InvalidToken));

        // accountId present but not a UUID.
        let bad_uuid = BASE64.encode(br#"{"accountId":"nope","accountName":"Acme","timestamp":1}"#);
        assert_eq!(RegistrationToken::decode(&bad_uuid), Err(TokenError::InvalidToken));
    }
}
