#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use crate::common::{validate_id, validate_text};
use crate::{ContractViolation, Validate};

/// Capture source understood by the backend: a device index ("0"), a file path, or a stream URL.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
pub struct CameraSourceId(String);

impl CameraSourceId {
    pub fn new(source: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self(source.into().trim().to_string());
        v.validate()?;
        Ok(v)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for CameraSourceId {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_text("camera_source_id", &self.0, 1024)?;
        if self.0.chars().any(|c| c.is_control()) {
            return Err(ContractViolation::InvalidValue {
                field: "camera_source_id",
                reason: "must not contain control characters",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CameraPreset {
    pub label: String,
    pub source: CameraSourceId,
}

impl CameraPreset {
    pub fn v1(label: impl Into<String>, source: impl Into<String>) -> Result<Self, ContractViolation> {
        let p = Self {
            label: label.into().trim().to_string(),
            source: CameraSourceId::new(source)?,
        };
        p.validate()?;
        Ok(p)
    }
}

impl Validate for CameraPreset {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_id("camera_preset.label", &self.label, 64)?;
        self.source.validate()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Idle,
    Uploading,
    Finalizing,
    Error,
}

impl UploadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            UploadStatus::Idle => "idle",
            UploadStatus::Uploading => "uploading",
            UploadStatus::Finalizing => "finalizing",
            UploadStatus::Error => "error",
        }
    }
}

/// Local media file selected for offline analysis.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct UploadSource {
    pub file_name: String,
    pub path: PathBuf,
}

impl UploadSource {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ContractViolation> {
        let path = path.as_ref().to_path_buf();
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or(ContractViolation::InvalidValue {
                field: "upload_source.path",
                reason: "must name a UTF-8 file",
            })?
            .to_string();
        let s = Self { file_name, path };
        s.validate()?;
        Ok(s)
    }
}

impl Validate for UploadSource {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_text("upload_source.file_name", &self.file_name, 255)?;
        if self.file_name.chars().any(char::is_control) {
            return Err(ContractViolation::InvalidValue {
                field: "upload_source.file_name",
                reason: "must not contain control characters",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CameraSwitchAck {
    pub new_source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct UploadAck {
    pub file_name: String,
    pub stored_path: Option<String>,
}

/// Acknowledgement body shared by `/switch_camera` and `/upload`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct AckPayload {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub new_source: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

impl AckPayload {
    fn ensure_success(&self) -> Result<(), String> {
        if self.status.eq_ignore_ascii_case("success") {
            Ok(())
        } else {
            Err(self
                .message
                .clone()
                .unwrap_or_else(|| format!("backend answered status={}", self.status)))
        }
    }

    pub fn into_camera_ack(self, requested: &CameraSourceId) -> Result<CameraSwitchAck, String> {
        self.ensure_success()?;
        Ok(CameraSwitchAck {
            new_source: self
                .new_source
                .unwrap_or_else(|| requested.as_str().to_string()),
        })
    }

    pub fn into_upload_ack(self, source: &UploadSource) -> Result<UploadAck, String> {
        self.ensure_success()?;
        Ok(UploadAck {
            file_name: self.filename.unwrap_or_else(|| source.file_name.clone()),
            stored_path: self.path,
        })
    }
}
