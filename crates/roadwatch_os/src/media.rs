#![forbid(unsafe_code)]

use roadwatch_contracts::media::{CameraSourceId, UploadSource, UploadStatus};
use tracing::{debug, info, warn};

pub mod reason_codes {
    use roadwatch_contracts::ReasonCodeId;

    pub const MEDIA_UPLOAD_BUSY: ReasonCodeId = ReasonCodeId(0x4D45_0001);
    pub const MEDIA_UPLOAD_FAILED: ReasonCodeId = ReasonCodeId(0x4D45_0002);
    pub const MEDIA_CAMERA_SWITCH_PENDING: ReasonCodeId = ReasonCodeId(0x4D45_0003);
    pub const MEDIA_CAMERA_SWITCH_FAILED: ReasonCodeId = ReasonCodeId(0x4D45_0004);
    pub const MEDIA_UNKNOWN_CAMERA_SOURCE: ReasonCodeId = ReasonCodeId(0x4D45_0005);
}

/// Single upload slot for the session.
///
/// `idle -> uploading -> finalizing -> idle`, or `uploading -> error -> idle`. Every
/// transition names the attempt it belongs to; a transition for an abandoned attempt is
/// ignored.
#[derive(Debug, Clone)]
pub struct UploadTask {
    status: UploadStatus,
    source: Option<UploadSource>,
    last_error: Option<String>,
    attempt: u64,
}

impl Default for UploadTask {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadTask {
    pub fn new() -> Self {
        Self {
            status: UploadStatus::Idle,
            source: None,
            last_error: None,
            attempt: 0,
        }
    }

    pub fn status(&self) -> UploadStatus {
        self.status
    }

    pub fn source(&self) -> Option<&UploadSource> {
        self.source.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    /// Claims the slot. Returns `None` while another upload is not yet idle.
    pub fn begin(&mut self, source: UploadSource) -> Option<u64> {
        if self.status != UploadStatus::Idle {
            debug!(
                status = self.status.as_str(),
                reason_code = %reason_codes::MEDIA_UPLOAD_BUSY,
                "upload rejected while another is active"
            );
            return None;
        }
        self.attempt = self.attempt.wrapping_add(1);
        info!(file = %source.file_name, attempt = self.attempt, "upload started");
        self.status = UploadStatus::Uploading;
        self.source = Some(source);
        self.last_error = None;
        Some(self.attempt)
    }

    pub fn acknowledge(&mut self, attempt: u64) -> bool {
        if !self.is_current(attempt, UploadStatus::Uploading) {
            return false;
        }
        info!(attempt, "upload acknowledged; finalizing");
        self.status = UploadStatus::Finalizing;
        true
    }

    pub fn settle(&mut self, attempt: u64) -> bool {
        if !self.is_current(attempt, UploadStatus::Finalizing) {
            return false;
        }
        info!(attempt, "upload settled");
        self.status = UploadStatus::Idle;
        self.source = None;
        true
    }

    pub fn fail(&mut self, attempt: u64, error: impl Into<String>) -> bool {
        if !self.is_current(attempt, UploadStatus::Uploading) {
            return false;
        }
        let error = error.into();
        warn!(
            attempt,
            error = %error,
            reason_code = %reason_codes::MEDIA_UPLOAD_FAILED,
            "upload failed"
        );
        self.status = UploadStatus::Error;
        self.last_error = Some(error);
        true
    }

    /// Returns a failed attempt to idle. `last_error` stays for display.
    pub fn recover(&mut self, attempt: u64) -> bool {
        if !self.is_current(attempt, UploadStatus::Error) {
            return false;
        }
        self.status = UploadStatus::Idle;
        self.source = None;
        true
    }

    /// Drops whatever attempt is active, e.g. when the session ends.
    pub fn abandon(&mut self) {
        if self.status != UploadStatus::Idle {
            debug!(attempt = self.attempt, "upload abandoned");
        }
        self.attempt = self.attempt.wrapping_add(1);
        self.status = UploadStatus::Idle;
        self.source = None;
        self.last_error = None;
    }

    fn is_current(&self, attempt: u64, expected: UploadStatus) -> bool {
        attempt == self.attempt && self.status == expected
    }
}

/// Camera source switching. A second switch is refused while one is pending.
#[derive(Debug, Clone, Default)]
pub struct CameraControl {
    pending: Option<(u64, CameraSourceId)>,
    active: Option<CameraSourceId>,
    last_error: Option<String>,
    next_request: u64,
}

impl CameraControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> Option<&CameraSourceId> {
        self.pending.as_ref().map(|(_, source)| source)
    }

    pub fn active(&self) -> Option<&CameraSourceId> {
        self.active.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn begin(&mut self, source: CameraSourceId) -> Option<u64> {
        if self.pending.is_some() {
            return None;
        }
        self.next_request = self.next_request.wrapping_add(1);
        info!(source = %source.as_str(), request = self.next_request, "camera switch requested");
        self.pending = Some((self.next_request, source));
        self.last_error = None;
        Some(self.next_request)
    }

    pub fn complete(&mut self, request: u64) -> bool {
        match self.pending.take() {
            Some((id, source)) if id == request => {
                info!(source = %source.as_str(), "camera switched");
                self.active = Some(source);
                true
            }
            other => {
                self.pending = other;
                false
            }
        }
    }

    pub fn fail(&mut self, request: u64, error: impl Into<String>) -> bool {
        match self.pending.take() {
            Some((id, source)) if id == request => {
                let error = error.into();
                warn!(
                    source = %source.as_str(),
                    error = %error,
                    reason_code = %reason_codes::MEDIA_CAMERA_SWITCH_FAILED,
                    "camera switch failed"
                );
                self.last_error = Some(error);
                true
            }
            other => {
                self.pending = other;
                false
            }
        }
    }

    pub fn abandon(&mut self) {
        self.pending = None;
        self.last_error = None;
    }
}

/// Subscription to the annotated live feed. Bumping the generation tells the presentation
/// to reconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveStream {
    url: String,
    generation: u64,
}

impl LiveStream {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            generation: 1,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn reconnect(&mut self) -> u64 {
        self.generation = self.generation.wrapping_add(1);
        debug!(generation = self.generation, "live stream reconnect requested");
        self.generation
    }
}
