#![forbid(unsafe_code)]

use std::fmt;

use crate::common::{validate_id, validate_text};
use crate::{ContractViolation, Validate};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
pub struct PrincipalId(String);

impl PrincipalId {
    pub fn new(id: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self(id.into());
        v.validate()?;
        Ok(v)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for PrincipalId {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_id("principal_id", &self.0, 128)
    }
}

/// The identity provider's view of a signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize)]
pub struct Principal {
    pub principal_id: PrincipalId,
    pub email: String,
}

impl Principal {
    pub fn v1(
        principal_id: impl Into<String>,
        email: impl Into<String>,
    ) -> Result<Self, ContractViolation> {
        let p = Self {
            principal_id: PrincipalId::new(principal_id)?,
            email: email.into().trim().to_ascii_lowercase(),
        };
        p.validate()?;
        Ok(p)
    }
}

impl Validate for Principal {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.principal_id.validate()?;
        validate_email("principal.email", &self.email)
    }
}

pub fn validate_email(field: &'static str, email: &str) -> Result<(), ContractViolation> {
    validate_text(field, email, 254)?;
    let Some((local, domain)) = email.split_once('@') else {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must contain '@'",
        });
    };
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must be local@domain",
        });
    }
    if email.chars().any(char::is_whitespace) {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must not contain whitespace",
        });
    }
    Ok(())
}

/// Opaque, time-limited credential presented on authenticated backend calls.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken {
    value: String,
    expires_at_unix_ms: u64,
}

impl BearerToken {
    pub fn new(value: impl Into<String>, expires_at_unix_ms: u64) -> Result<Self, ContractViolation> {
        let t = Self {
            value: value.into(),
            expires_at_unix_ms,
        };
        t.validate()?;
        Ok(t)
    }

    pub fn expose_secret(&self) -> &str {
        &self.value
    }

    pub fn expires_at_unix_ms(&self) -> u64 {
        self.expires_at_unix_ms
    }

    pub fn is_expired_at(&self, now_unix_ms: u64) -> bool {
        now_unix_ms >= self.expires_at_unix_ms
    }
}

impl Validate for BearerToken {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_text("bearer_token.value", &self.value, 8192)?;
        if self.value.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(ContractViolation::InvalidValue {
                field: "bearer_token.value",
                reason: "must be a single header-safe token",
            });
        }
        if self.expires_at_unix_ms == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "bearer_token.expires_at_unix_ms",
                reason: "must be > 0",
            });
        }
        Ok(())
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerToken")
            .field("value", &"<redacted>")
            .field("expires_at_unix_ms", &self.expires_at_unix_ms)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Operator,
}

impl Role {
    pub fn least_privileged() -> Self {
        Role::Operator
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Operator => "operator",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// No identity notice has been observed yet; nothing is rendered.
    Loading,
    Authenticated,
    Unauthenticated,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_identity_01_principal_email_is_normalized_and_checked() {
        let p = Principal::v1("uid-1", "  Admin@Co.com ").unwrap();
        assert_eq!(p.email, "admin@co.com");
        assert!(Principal::v1("uid-1", "no-at-sign").is_err());
        assert!(Principal::v1("uid-1", "a@b@c").is_err());
        assert!(Principal::v1("", "op@co.com").is_err());
    }

    #[test]
    fn at_identity_02_token_debug_never_contains_secret() {
        let sentinel = "DO_NOT_LEAK_SENTINEL";
        let token = BearerToken::new(sentinel, 10).unwrap();
        let rendered = format!("{token:?}");
        assert!(!rendered.contains(sentinel));
        assert!(rendered.contains("redacted"));
    }

    #[test]
    fn at_identity_03_token_expiry_boundary() {
        let token = BearerToken::new("abc", 1_000).unwrap();
        assert!(!token.is_expired_at(999));
        assert!(token.is_expired_at(1_000));
        assert!(BearerToken::new("has space", 1_000).is_err());
        assert!(BearerToken::new("abc", 0).is_err());
    }
}
