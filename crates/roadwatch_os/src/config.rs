#![forbid(unsafe_code)]

use std::env;
use std::time::Duration;

use roadwatch_contracts::media::CameraPreset;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleConfig {
    pub stats_cadence_ms: u32,
    /// Wait after an upload is acknowledged before the new source is treated as live.
    pub upload_settle_ms: u32,
    /// Substring of the principal's email that grants the admin role.
    pub admin_marker: String,
    pub camera_presets: Vec<CameraPreset>,
}

impl ConsoleConfig {
    pub fn mvp_v1() -> Self {
        Self {
            stats_cadence_ms: 1_000,
            upload_settle_ms: 3_000,
            admin_marker: "admin".to_string(),
            camera_presets: default_camera_presets(),
        }
    }

    pub fn from_env() -> Self {
        let mut cfg = Self::mvp_v1();
        if let Some(v) = parse_ranged_env("ROADWATCH_STATS_CADENCE_MS", 100, 60_000) {
            cfg.stats_cadence_ms = v;
        }
        if let Some(v) = parse_ranged_env("ROADWATCH_UPLOAD_SETTLE_MS", 0, 120_000) {
            cfg.upload_settle_ms = v;
        }
        if let Ok(v) = env::var("ROADWATCH_ADMIN_MARKER") {
            let v = v.trim().to_ascii_lowercase();
            if !v.is_empty() {
                cfg.admin_marker = v;
            }
        }
        if let Ok(raw) = env::var("ROADWATCH_CAMERA_PRESETS") {
            let presets = parse_camera_presets(&raw);
            if presets.is_empty() {
                warn!("ROADWATCH_CAMERA_PRESETS has no valid entries; keeping defaults");
            } else {
                cfg.camera_presets = presets;
            }
        }
        cfg
    }

    pub fn stats_cadence(&self) -> Duration {
        Duration::from_millis(u64::from(self.stats_cadence_ms.max(1)))
    }

    pub fn upload_settle(&self) -> Duration {
        Duration::from_millis(u64::from(self.upload_settle_ms))
    }
}

fn parse_ranged_env(key: &str, min: u32, max: u32) -> Option<u32> {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u32>().ok())
        .filter(|v| (min..=max).contains(v))
}

fn default_camera_presets() -> Vec<CameraPreset> {
    [
        ("webcam", "0"),
        ("sample", "2103099-uhd_3840_2160_30fps.mp4"),
    ]
    .into_iter()
    .filter_map(|(label, source)| CameraPreset::v1(label, source).ok())
    .collect()
}

/// Parses `label=source,label=source`. Invalid or duplicate labels are dropped.
pub fn parse_camera_presets(raw: &str) -> Vec<CameraPreset> {
    let mut presets: Vec<CameraPreset> = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let Some((label, source)) = entry.split_once('=') else {
            warn!(entry, "skipping camera preset without '='");
            continue;
        };
        match CameraPreset::v1(label, source) {
            Ok(p) if presets.iter().all(|e| e.label != p.label) => presets.push(p),
            Ok(_) => warn!(label, "skipping duplicate camera preset"),
            Err(err) => warn!(entry, %err, "skipping invalid camera preset"),
        }
    }
    presets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_config_01_defaults_match_reference_cadence() {
        let cfg = ConsoleConfig::mvp_v1();
        assert_eq!(cfg.stats_cadence(), Duration::from_secs(1));
        assert_eq!(cfg.camera_presets.len(), 2);
        assert_eq!(cfg.camera_presets[0].source.as_str(), "0");
    }

    #[test]
    fn at_config_02_preset_parsing_keeps_order_and_drops_bad_entries() {
        let presets =
            parse_camera_presets("gate=rtsp://10.0.0.9/stream, junk ,gate=dup, lot = lot.mp4,=x");
        let labels: Vec<&str> = presets.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, vec!["gate", "lot"]);
        assert_eq!(presets[1].source.as_str(), "lot.mp4");
    }
}
