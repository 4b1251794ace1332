#![forbid(unsafe_code)]

use roadwatch_contracts::identity::{BearerToken, Principal, Role, SessionPhase};
use roadwatch_contracts::ReasonCodeId;
use tracing::{info, warn};

pub mod reason_codes {
    use roadwatch_contracts::ReasonCodeId;

    pub const SESSION_ESTABLISHED: ReasonCodeId = ReasonCodeId(0x5E55_0001);
    pub const SESSION_SIGNED_OUT: ReasonCodeId = ReasonCodeId(0x5E55_0002);
    pub const SESSION_EXCHANGE_FAILED: ReasonCodeId = ReasonCodeId(0x5E55_0003);
    pub const SESSION_REFRESH_FAILED: ReasonCodeId = ReasonCodeId(0x5E55_0004);
    pub const SESSION_NOTICE_SUPERSEDED: ReasonCodeId = ReasonCodeId(0x5E55_0005);
    pub const SESSION_CREDENTIAL_REFRESHED: ReasonCodeId = ReasonCodeId(0x5E55_0006);
}

/// Derives the authorization role from a principal.
///
/// This is a placeholder rule (substring match on the email). A production deployment needs
/// an entitlement lookup against verified token claims instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolePolicy {
    admin_marker: String,
}

impl RolePolicy {
    pub fn new(admin_marker: impl Into<String>) -> Self {
        Self {
            admin_marker: admin_marker.into().trim().to_ascii_lowercase(),
        }
    }

    pub fn derive_role(&self, principal: &Principal) -> Role {
        if !self.admin_marker.is_empty() && principal.email.contains(&self.admin_marker) {
            Role::Admin
        } else {
            Role::least_privileged()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedIdentity {
    pub principal: Principal,
    credential: BearerToken,
}

impl AuthenticatedIdentity {
    pub fn credential(&self) -> &BearerToken {
        &self.credential
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTransition {
    Established {
        role: Role,
        role_changed: bool,
        /// Same principal as the session being replaced, e.g. a repeated notice.
        same_principal: bool,
    },
    Cleared { was_authenticated: bool },
    CredentialRefreshed,
    /// A newer identity notice arrived while this one was being resolved.
    Superseded,
}

/// What to do about a credential the backend answered `401` for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialRejection {
    /// Re-exchange once for the current principal.
    Refresh { generation: u64, principal: Principal },
    /// The re-issued credential was rejected as well; the session must be cleared.
    Exhausted { generation: u64 },
    /// A refresh is already running.
    InFlight,
    /// The rejected credential has already been replaced.
    Stale,
    NoSession,
}

/// Owns the authenticated identity and its credential. Nothing else writes either.
#[derive(Debug, Clone)]
pub struct SessionRuntime {
    phase: SessionPhase,
    identity: Option<AuthenticatedIdentity>,
    role: Role,
    generation: u64,
    refresh_in_flight: bool,
    /// The current credential came from a re-exchange after a rejection and the backend has
    /// not accepted it yet.
    reissued_after_rejection: bool,
    exchange_failures: u64,
}

impl Default for SessionRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRuntime {
    pub fn new() -> Self {
        Self {
            phase: SessionPhase::Loading,
            identity: None,
            role: Role::least_privileged(),
            generation: 0,
            refresh_in_flight: false,
            reissued_after_rejection: false,
            exchange_failures: 0,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn identity(&self) -> Option<&AuthenticatedIdentity> {
        self.identity.as_ref()
    }

    pub fn credential(&self) -> Option<&BearerToken> {
        self.identity.as_ref().map(AuthenticatedIdentity::credential)
    }

    pub fn is_authenticated(&self) -> bool {
        self.phase == SessionPhase::Authenticated && self.identity.is_some()
    }

    pub fn exchange_failures(&self) -> u64 {
        self.exchange_failures
    }

    /// Starts resolving a new identity notice; results tagged with an older generation are
    /// ignored.
    pub fn begin_notice(&mut self) -> u64 {
        self.generation = self.generation.wrapping_add(1);
        self.refresh_in_flight = false;
        self.reissued_after_rejection = false;
        self.generation
    }

    pub fn establish(
        &mut self,
        generation: u64,
        principal: Principal,
        credential: BearerToken,
        policy: &RolePolicy,
    ) -> SessionTransition {
        if generation != self.generation {
            return SessionTransition::Superseded;
        }
        let role = policy.derive_role(&principal);
        let role_changed = role != self.role;
        let same_principal = self
            .identity
            .as_ref()
            .is_some_and(|current| current.principal == principal);
        info!(
            principal_id = %principal.principal_id.as_str(),
            role = role.as_str(),
            reason_code = %reason_codes::SESSION_ESTABLISHED,
            "session established"
        );
        self.identity = Some(AuthenticatedIdentity {
            principal,
            credential,
        });
        self.role = role;
        self.phase = SessionPhase::Authenticated;
        self.reissued_after_rejection = false;
        SessionTransition::Established {
            role,
            role_changed,
            same_principal,
        }
    }

    pub fn clear(&mut self, generation: u64, reason: ReasonCodeId) -> SessionTransition {
        if generation != self.generation {
            return SessionTransition::Superseded;
        }
        if reason == reason_codes::SESSION_EXCHANGE_FAILED
            || reason == reason_codes::SESSION_REFRESH_FAILED
        {
            self.exchange_failures = self.exchange_failures.saturating_add(1);
        }
        let was_authenticated = self.identity.take().is_some();
        if was_authenticated {
            info!(reason_code = %reason, "session cleared");
        }
        self.role = Role::least_privileged();
        self.phase = SessionPhase::Unauthenticated;
        self.refresh_in_flight = false;
        self.reissued_after_rejection = false;
        SessionTransition::Cleared { was_authenticated }
    }

    /// Claims the single credential refresh slot for the current principal.
    pub fn begin_refresh(&mut self) -> Option<(u64, Principal)> {
        if self.refresh_in_flight {
            return None;
        }
        let principal = self.identity.as_ref()?.principal.clone();
        self.refresh_in_flight = true;
        Some((self.generation, principal))
    }

    /// Decides how to react to a `401` answered for `rejected`. Only one re-exchange is
    /// attempted per rejection chain; a re-issued credential that is rejected before the
    /// backend ever accepted it exhausts the session.
    pub fn credential_rejected(&mut self, rejected: &BearerToken) -> CredentialRejection {
        let Some(identity) = self.identity.as_ref() else {
            return CredentialRejection::NoSession;
        };
        if identity.credential != *rejected {
            return CredentialRejection::Stale;
        }
        if self.refresh_in_flight {
            return CredentialRejection::InFlight;
        }
        if self.reissued_after_rejection {
            return CredentialRejection::Exhausted {
                generation: self.generation,
            };
        }
        let principal = identity.principal.clone();
        self.refresh_in_flight = true;
        self.reissued_after_rejection = true;
        CredentialRejection::Refresh {
            generation: self.generation,
            principal,
        }
    }

    /// The backend answered a call made with `accepted`.
    pub fn credential_accepted(&mut self, accepted: &BearerToken) {
        if self.credential() == Some(accepted) {
            self.reissued_after_rejection = false;
        }
    }

    pub fn complete_refresh(&mut self, generation: u64, credential: BearerToken) -> SessionTransition {
        if generation != self.generation {
            return SessionTransition::Superseded;
        }
        self.refresh_in_flight = false;
        match self.identity.as_mut() {
            Some(identity) => {
                identity.credential = credential;
                info!(
                    reason_code = %reason_codes::SESSION_CREDENTIAL_REFRESHED,
                    "session credential refreshed"
                );
                SessionTransition::CredentialRefreshed
            }
            None => {
                warn!("credential refresh completed without an identity");
                SessionTransition::Superseded
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(email: &str) -> Principal {
        Principal::v1(format!("uid-{}", email.len()), email).unwrap()
    }

    fn token(v: &str) -> BearerToken {
        BearerToken::new(v, u64::MAX).unwrap()
    }

    #[test]
    fn at_session_01_loading_until_first_notice() {
        let s = SessionRuntime::new();
        assert_eq!(s.phase(), SessionPhase::Loading);
        assert_eq!(s.role(), Role::Operator);
        assert!(s.credential().is_none());
    }

    #[test]
    fn at_session_02_admin_marker_derives_admin_role() {
        let policy = RolePolicy::new("admin");
        assert_eq!(policy.derive_role(&principal("admin@co.com")), Role::Admin);
        assert_eq!(policy.derive_role(&principal("op@co.com")), Role::Operator);
        assert_eq!(
            RolePolicy::new("").derive_role(&principal("admin@co.com")),
            Role::Operator
        );
    }

    #[test]
    fn at_session_03_sign_out_resets_to_least_privileged() {
        let policy = RolePolicy::new("admin");
        let mut s = SessionRuntime::new();
        let g = s.begin_notice();
        assert_eq!(
            s.establish(g, principal("admin@co.com"), token("t1"), &policy),
            SessionTransition::Established {
                role: Role::Admin,
                role_changed: true,
                same_principal: false
            }
        );
        assert_eq!(s.credential().map(BearerToken::expose_secret), Some("t1"));
        let g = s.begin_notice();
        assert_eq!(
            s.clear(g, reason_codes::SESSION_SIGNED_OUT),
            SessionTransition::Cleared {
                was_authenticated: true
            }
        );
        assert_eq!(s.phase(), SessionPhase::Unauthenticated);
        assert_eq!(s.role(), Role::Operator);
        assert!(s.credential().is_none());
    }

    #[test]
    fn at_session_04_late_exchange_for_older_notice_is_discarded() {
        let policy = RolePolicy::new("admin");
        let mut s = SessionRuntime::new();
        let first = s.begin_notice();
        let second = s.begin_notice();
        assert_eq!(
            s.clear(second, reason_codes::SESSION_SIGNED_OUT),
            SessionTransition::Cleared {
                was_authenticated: false
            }
        );
        assert_eq!(
            s.establish(first, principal("admin@co.com"), token("late"), &policy),
            SessionTransition::Superseded
        );
        assert!(!s.is_authenticated());
    }

    #[test]
    fn at_session_05_exchange_failure_is_counted() {
        let mut s = SessionRuntime::new();
        let g = s.begin_notice();
        s.clear(g, reason_codes::SESSION_EXCHANGE_FAILED);
        assert_eq!(s.exchange_failures(), 1);
        assert_eq!(s.phase(), SessionPhase::Unauthenticated);
    }

    #[test]
    fn at_session_06_single_refresh_slot_and_replacement() {
        let policy = RolePolicy::new("admin");
        let mut s = SessionRuntime::new();
        let g = s.begin_notice();
        s.establish(g, principal("op@co.com"), token("old"), &policy);
        let (rg, p) = s.begin_refresh().unwrap();
        assert_eq!(p.email, "op@co.com");
        assert!(s.begin_refresh().is_none());
        assert_eq!(
            s.complete_refresh(rg, token("new")),
            SessionTransition::CredentialRefreshed
        );
        assert_eq!(s.credential().map(BearerToken::expose_secret), Some("new"));
        assert!(s.begin_refresh().is_some());
    }

    #[test]
    fn at_session_07_second_rejection_of_reissued_credential_exhausts() {
        let policy = RolePolicy::new("admin");
        let mut s = SessionRuntime::new();
        let g = s.begin_notice();
        s.establish(g, principal("op@co.com"), token("t1"), &policy);

        let CredentialRejection::Refresh { generation, .. } = s.credential_rejected(&token("t1"))
        else {
            panic!("first rejection should refresh");
        };
        assert_eq!(s.credential_rejected(&token("t1")), CredentialRejection::InFlight);
        s.complete_refresh(generation, token("t2"));
        assert_eq!(s.credential_rejected(&token("t1")), CredentialRejection::Stale);
        assert_eq!(
            s.credential_rejected(&token("t2")),
            CredentialRejection::Exhausted { generation: g }
        );
    }

    #[test]
    fn at_session_08_accepted_reissue_allows_a_later_refresh() {
        let policy = RolePolicy::new("admin");
        let mut s = SessionRuntime::new();
        let g = s.begin_notice();
        s.establish(g, principal("op@co.com"), token("t1"), &policy);
        let CredentialRejection::Refresh { generation, .. } = s.credential_rejected(&token("t1"))
        else {
            panic!("first rejection should refresh");
        };
        s.complete_refresh(generation, token("t2"));
        s.credential_accepted(&token("t2"));
        assert!(matches!(
            s.credential_rejected(&token("t2")),
            CredentialRejection::Refresh { .. }
        ));
        assert_eq!(
            SessionRuntime::new().credential_rejected(&token("t1")),
            CredentialRejection::NoSession
        );
    }
}
