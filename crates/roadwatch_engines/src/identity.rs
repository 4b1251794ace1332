#![forbid(unsafe_code)]

use async_trait::async_trait;
use roadwatch_contracts::identity::{BearerToken, Principal};
use tokio::sync::watch;

/// Session-change notification published by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrincipalNotice {
    /// The provider has not reported its session state yet.
    Pending,
    SignedIn(Principal),
    SignedOut,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PopupProviderConfig {
    pub provider_id: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("interactive sign-in popup was blocked or dismissed")]
    PopupBlocked,
    #[error("identity provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("credential exchange failed: {0}")]
    TokenExchange(String),
    #[error("no principal is signed in")]
    NotSignedIn,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Receiver of session-change notices. The current value is the latest notice.
    fn subscribe(&self) -> watch::Receiver<PrincipalNotice>;

    async fn exchange_for_token(&self, principal: &Principal) -> Result<BearerToken, AuthError>;

    async fn sign_in_with_password(&self, email: &str, password: &str)
        -> Result<Principal, AuthError>;

    async fn sign_in_with_popup(&self, provider: &PopupProviderConfig)
        -> Result<Principal, AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;
}
