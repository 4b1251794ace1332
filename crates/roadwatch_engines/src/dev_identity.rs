#![forbid(unsafe_code)]

//! Local stand-in for the hosted identity provider, used when the console runs against a
//! backend with token verification disabled.

use std::env;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as BASE64_URL;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use roadwatch_contracts::identity::{validate_email, BearerToken, Principal};
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::identity::{AuthError, IdentityProvider, PopupProviderConfig, PrincipalNotice};

const TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticUser {
    pub email: String,
    pub password_sha256_hex: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticIdentityConfig {
    pub users: Vec<StaticUser>,
    pub token_ttl_ms: u64,
}

impl StaticIdentityConfig {
    pub fn mvp_v1() -> Self {
        Self {
            users: Vec::new(),
            token_ttl_ms: 3_600_000,
        }
    }

    /// Reads `ROADWATCH_DEV_USERS` (`email:sha256hex;...`) and `ROADWATCH_DEV_TOKEN_TTL_MS`.
    /// Malformed entries are skipped with a warning.
    pub fn from_env() -> Self {
        let mut cfg = Self::mvp_v1();
        if let Ok(raw) = env::var("ROADWATCH_DEV_USERS") {
            cfg.users = parse_user_directory(&raw);
        }
        if let Some(v) = env::var("ROADWATCH_DEV_TOKEN_TTL_MS")
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|v| (1_000..=86_400_000).contains(v))
        {
            cfg.token_ttl_ms = v;
        }
        cfg
    }

    pub fn with_user(mut self, email: &str, password: &str) -> Self {
        self.users.push(StaticUser {
            email: email.trim().to_ascii_lowercase(),
            password_sha256_hex: sha256_hex(password.as_bytes()),
        });
        self
    }
}

pub fn parse_user_directory(raw: &str) -> Vec<StaticUser> {
    let mut users = Vec::new();
    for entry in raw.split(';').map(str::trim).filter(|e| !e.is_empty()) {
        let Some((email, digest)) = entry.rsplit_once(':') else {
            warn!(entry_len = entry.len(), "skipping dev user entry without ':'");
            continue;
        };
        let email = email.trim().to_ascii_lowercase();
        let digest = digest.trim().to_ascii_lowercase();
        if validate_email("dev_user.email", &email).is_err()
            || digest.len() != 64
            || !digest.chars().all(|c| c.is_ascii_hexdigit())
        {
            warn!("skipping malformed dev user entry");
            continue;
        }
        users.push(StaticUser {
            email,
            password_sha256_hex: digest,
        });
    }
    users
}

pub struct StaticIdentityProvider {
    config: StaticIdentityConfig,
    notices: watch::Sender<PrincipalNotice>,
}

impl StaticIdentityProvider {
    /// The provider has no persisted session to restore, so it reports signed-out immediately.
    pub fn new(config: StaticIdentityConfig) -> Self {
        let (notices, _) = watch::channel(PrincipalNotice::SignedOut);
        Self { config, notices }
    }

    fn current_principal(&self) -> Option<Principal> {
        match &*self.notices.borrow() {
            PrincipalNotice::SignedIn(p) => Some(p.clone()),
            _ => None,
        }
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    fn subscribe(&self) -> watch::Receiver<PrincipalNotice> {
        self.notices.subscribe()
    }

    async fn exchange_for_token(&self, principal: &Principal) -> Result<BearerToken, AuthError> {
        if self.current_principal().as_ref() != Some(principal) {
            return Err(AuthError::NotSignedIn);
        }
        let mut raw = [0_u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut raw);
        let expires_at = now_unix_ms().saturating_add(self.config.token_ttl_ms);
        BearerToken::new(BASE64_URL.encode(raw), expires_at)
            .map_err(|e| AuthError::TokenExchange(e.to_string()))
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Principal, AuthError> {
        let email = email.trim().to_ascii_lowercase();
        let digest = sha256_hex(password.as_bytes());
        let Some(user) = self.config.users.iter().find(|u| u.email == email) else {
            return Err(AuthError::InvalidCredentials);
        };
        if !constant_time_eq(user.password_sha256_hex.as_bytes(), digest.as_bytes()) {
            return Err(AuthError::InvalidCredentials);
        }
        let principal_id = format!("dev-{}", &sha256_hex(email.as_bytes())[..16]);
        let principal =
            Principal::v1(principal_id, email).map_err(|_| AuthError::InvalidCredentials)?;
        info!(principal_id = %principal.principal_id.as_str(), "dev identity signed in");
        self.notices
            .send_replace(PrincipalNotice::SignedIn(principal.clone()));
        Ok(principal)
    }

    async fn sign_in_with_popup(
        &self,
        provider: &PopupProviderConfig,
    ) -> Result<Principal, AuthError> {
        warn!(provider_id = %provider.provider_id, "interactive sign-in is unavailable locally");
        Err(AuthError::PopupBlocked)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.notices.send_replace(PrincipalNotice::SignedOut);
        Ok(())
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0_u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> StaticIdentityProvider {
        StaticIdentityProvider::new(
            StaticIdentityConfig::mvp_v1()
                .with_user("admin@co.com", "pw-admin")
                .with_user("op@co.com", "pw-op"),
        )
    }

    #[tokio::test]
    async fn at_dev_identity_01_password_sign_in_publishes_notice() {
        let p = provider();
        let mut rx = p.subscribe();
        assert_eq!(*rx.borrow_and_update(), PrincipalNotice::SignedOut);
        let principal = p.sign_in_with_password("Admin@Co.com", "pw-admin").await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(
            *rx.borrow_and_update(),
            PrincipalNotice::SignedIn(principal.clone())
        );
        let token = p.exchange_for_token(&principal).await.unwrap();
        assert!(token.expose_secret().len() >= 40);
    }

    #[tokio::test]
    async fn at_dev_identity_02_wrong_password_is_rejected_without_notice() {
        let p = provider();
        let mut rx = p.subscribe();
        rx.borrow_and_update();
        assert_eq!(
            p.sign_in_with_password("op@co.com", "nope").await.unwrap_err(),
            AuthError::InvalidCredentials
        );
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn at_dev_identity_03_exchange_requires_current_principal() {
        let p = provider();
        let principal = p.sign_in_with_password("op@co.com", "pw-op").await.unwrap();
        p.sign_out().await.unwrap();
        assert_eq!(
            p.exchange_for_token(&principal).await.unwrap_err(),
            AuthError::NotSignedIn
        );
    }

    #[tokio::test]
    async fn at_dev_identity_04_popup_is_blocked_locally() {
        let p = provider();
        let cfg = PopupProviderConfig {
            provider_id: "google.com".to_string(),
            scopes: Vec::new(),
        };
        assert_eq!(
            p.sign_in_with_popup(&cfg).await.unwrap_err(),
            AuthError::PopupBlocked
        );
    }

    #[test]
    fn at_dev_identity_05_directory_parsing_skips_bad_entries() {
        let good = sha256_hex(b"secret");
        let raw = format!("admin@co.com:{good}; broken ; x@y.z:nothex ;OP@CO.COM:{good}");
        let users = parse_user_directory(&raw);
        assert_eq!(users.len(), 2);
        assert_eq!(users[1].email, "op@co.com");
    }
}
