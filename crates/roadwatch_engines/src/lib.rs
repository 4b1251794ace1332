#![forbid(unsafe_code)]

pub mod backend;
pub mod dev_identity;
pub mod http_backend;
pub mod identity;

pub use backend::{ConsoleBackend, FetchError};
pub use identity::{AuthError, IdentityProvider, PopupProviderConfig, PrincipalNotice};
