#![forbid(unsafe_code)]

use async_trait::async_trait;
use roadwatch_contracts::identity::BearerToken;
use roadwatch_contracts::media::{CameraSourceId, CameraSwitchAck, UploadAck, UploadSource};
use roadwatch_contracts::violation::{EvidenceRef, StatsSnapshot, Violation};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("transport failure ({kind}): {detail}")]
    Transport { kind: &'static str, detail: String },
    #[error("backend rejected the credential")]
    Unauthorized,
    #[error("backend answered HTTP {status}")]
    Status { status: u16 },
    #[error("malformed backend payload: {0}")]
    Decode(String),
    #[error("backend reported failure: {0}")]
    Server(String),
    #[error("local file error: {0}")]
    Io(String),
}

impl FetchError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, FetchError::Unauthorized)
    }
}

/// Backend operations the console consumes. Every authenticated call takes the credential
/// explicitly; implementations never hold one of their own.
#[async_trait]
pub trait ConsoleBackend: Send + Sync {
    async fn fetch_stats(&self, credential: &BearerToken) -> Result<StatsSnapshot, FetchError>;

    /// Archive listing in backend order (newest first).
    async fn fetch_violations(&self, credential: &BearerToken) -> Result<Vec<Violation>, FetchError>;

    async fn switch_camera(
        &self,
        credential: &BearerToken,
        source: &CameraSourceId,
    ) -> Result<CameraSwitchAck, FetchError>;

    async fn upload(
        &self,
        credential: &BearerToken,
        source: &UploadSource,
    ) -> Result<UploadAck, FetchError>;

    /// Unauthenticated multipart JPEG stream of the annotated live feed.
    fn live_feed_url(&self) -> String;

    fn evidence_url(&self, evidence: &EvidenceRef) -> String;
}
