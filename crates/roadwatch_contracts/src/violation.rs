#![forbid(unsafe_code)]

use std::fmt;
use std::hash::{Hash, Hasher};

use crate::common::{validate_id, validate_text};
use crate::{ContractViolation, Validate};

/// Extension of recorded evidence clips.
pub const EVIDENCE_EXTENSION: &str = ".mp4";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
pub struct TrackerId(pub i64);

impl TrackerId {
    /// Violations raised directly by the detection model are not bound to a tracked object.
    pub const UNASSIGNED: TrackerId = TrackerId(-1);

    pub fn is_assigned(self) -> bool {
        self.0 >= 0
    }
}

impl fmt::Display for TrackerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_assigned() {
            write!(f, "{}", self.0)
        } else {
            f.write_str("unassigned")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
pub struct ViolationId(String);

impl ViolationId {
    pub fn new(id: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self(id.into());
        v.validate()?;
        Ok(v)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for ViolationId {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_id("violation_id", &self.0, 256)
    }
}

/// Filename handle of a recorded clip, served by `/video/violation/{filename}`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
pub struct EvidenceRef(String);

impl EvidenceRef {
    pub fn new(filename: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self(filename.into());
        v.validate()?;
        Ok(v)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for EvidenceRef {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_id("evidence_ref", &self.0, 255)?;
        if self.0 == "." || self.0 == ".." {
            return Err(ContractViolation::InvalidValue {
                field: "evidence_ref",
                reason: "must name a file",
            });
        }
        Ok(())
    }
}

/// A detected violation. Immutable once received; two records are the same violation when
/// their identifiers match.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Violation {
    pub violation_id: ViolationId,
    pub category: String,
    pub timestamp: String,
    pub tracker_id: TrackerId,
    pub evidence: EvidenceRef,
}

impl Violation {
    pub fn v1(
        violation_id: impl Into<String>,
        category: &str,
        timestamp: impl Into<String>,
        tracker_id: TrackerId,
        evidence: impl Into<String>,
    ) -> Result<Self, ContractViolation> {
        let v = Self {
            violation_id: ViolationId::new(violation_id)?,
            category: normalize_category(category),
            timestamp: timestamp.into().trim().to_string(),
            tracker_id,
            evidence: EvidenceRef::new(evidence)?,
        };
        v.validate()?;
        Ok(v)
    }

    /// Builds a live-feed record, which carries no filename, using the recorder's clip naming.
    pub fn from_detection(
        category: &str,
        tracker_id: TrackerId,
        timestamp: &str,
    ) -> Result<Self, ContractViolation> {
        let stem = evidence_stem(category, tracker_id, timestamp);
        let filename = format!("{stem}{EVIDENCE_EXTENSION}");
        Self::v1(stem, category, timestamp, tracker_id, filename)
    }
}

impl PartialEq for Violation {
    fn eq(&self, other: &Self) -> bool {
        self.violation_id == other.violation_id
    }
}

impl Eq for Violation {}

impl Hash for Violation {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.violation_id.hash(state);
    }
}

impl Validate for Violation {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.violation_id.validate()?;
        validate_id("violation.category", &self.category, 64)?;
        validate_text("violation.timestamp", &self.timestamp, 64)?;
        if self.tracker_id.0 < TrackerId::UNASSIGNED.0 {
            return Err(ContractViolation::InvalidValue {
                field: "violation.tracker_id",
                reason: "must be >= -1",
            });
        }
        self.evidence.validate()
    }
}

fn normalize_category(raw: &str) -> String {
    raw.trim().to_ascii_uppercase().replace([' ', '-'], "_")
}

/// `{CATEGORY}_ID{tracker}_{timestamp}`, the name the recorder gives a clip.
pub fn evidence_stem(category: &str, tracker_id: TrackerId, timestamp: &str) -> String {
    format!(
        "{}_ID{}_{}",
        normalize_category(category),
        tracker_id.0,
        timestamp.trim()
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidenceName {
    pub category: String,
    pub tracker_id: TrackerId,
    pub timestamp: String,
}

/// Parses a clip filename back into its parts. Categories may themselves contain underscores
/// (`ILLEGAL_PARKING_ID5_20240101_120000.mp4`), so the tracker segment is located rather than
/// counted.
pub fn parse_evidence_filename(filename: &str) -> Option<EvidenceName> {
    let stem = filename.strip_suffix(EVIDENCE_EXTENSION).unwrap_or(filename);
    for (idx, _) in stem.match_indices("_ID") {
        let rest = &stem[idx + 3..];
        let Some((tracker_raw, timestamp)) = rest.split_once('_') else {
            continue;
        };
        let Ok(tracker) = tracker_raw.parse::<i64>() else {
            continue;
        };
        let category = &stem[..idx];
        if category.is_empty() || timestamp.is_empty() {
            return None;
        }
        return Some(EvidenceName {
            category: category.to_string(),
            tracker_id: TrackerId(tracker),
            timestamp: timestamp.to_string(),
        });
    }
    None
}

/// Aggregate counters plus the rolling violation feed, most recent last. Always replaced
/// wholesale.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct StatsSnapshot {
    pub inbound_count: u64,
    pub outbound_count: u64,
    pub total_violation_count: u64,
    pub recent_violations: Vec<Violation>,
    pub scene_label: Option<String>,
}

impl Validate for StatsSnapshot {
    fn validate(&self) -> Result<(), ContractViolation> {
        for v in &self.recent_violations {
            v.validate()?;
        }
        if let Some(label) = &self.scene_label {
            validate_id("stats_snapshot.scene_label", label, 32)?;
        }
        Ok(())
    }
}

/// Violation record as served by `/stats` (live feed) and `/violations` (database documents or
/// recorded-file descriptors).
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize)]
pub struct ViolationPayload {
    #[serde(rename = "_id", default)]
    pub record_id: Option<String>,
    #[serde(rename = "type", default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tracker_id: Option<i64>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub frame_index: Option<u64>,
    #[serde(default)]
    pub v_time: Option<f64>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
}

impl ViolationPayload {
    pub fn into_violation(self) -> Result<Violation, ContractViolation> {
        match self.filename.as_deref() {
            Some(filename) => self.recorded_file_violation(filename),
            None => self.detection_violation(),
        }
    }

    fn detection_violation(&self) -> Result<Violation, ContractViolation> {
        let category = self.category.as_deref().ok_or(ContractViolation::InvalidValue {
            field: "violation_payload.type",
            reason: "must be present",
        })?;
        let timestamp = self
            .timestamp
            .as_deref()
            .ok_or(ContractViolation::InvalidValue {
                field: "violation_payload.timestamp",
                reason: "must be present",
            })?;
        let tracker_id = self.tracker_id.map(TrackerId).unwrap_or(TrackerId::UNASSIGNED);
        let stem = evidence_stem(category, tracker_id, timestamp);
        let evidence = format!("{stem}{EVIDENCE_EXTENSION}");
        let id = self.record_id.clone().unwrap_or(stem);
        Violation::v1(id, category, timestamp, tracker_id, evidence)
    }

    fn recorded_file_violation(&self, filename: &str) -> Result<Violation, ContractViolation> {
        let parsed = parse_evidence_filename(filename);
        let category = parsed
            .as_ref()
            .map(|p| p.category.clone())
            .or_else(|| self.category.clone())
            .ok_or(ContractViolation::InvalidValue {
                field: "violation_payload.type",
                reason: "must be present or derivable from filename",
            })?;
        let tracker_id = self
            .tracker_id
            .map(TrackerId)
            .or_else(|| parsed.as_ref().map(|p| p.tracker_id))
            .or_else(|| {
                self.id
                    .as_deref()
                    .and_then(|raw| raw.trim_start_matches("ID").parse::<i64>().ok())
                    .map(TrackerId)
            })
            .unwrap_or(TrackerId::UNASSIGNED);
        let timestamp = self
            .timestamp
            .clone()
            .or_else(|| parsed.as_ref().map(|p| p.timestamp.clone()))
            .or_else(|| self.time.as_deref().map(|t| t.trim().replace(' ', "_")))
            .ok_or(ContractViolation::InvalidValue {
                field: "violation_payload.timestamp",
                reason: "must be present or derivable from filename",
            })?;
        let id = self.record_id.clone().unwrap_or_else(|| {
            filename
                .strip_suffix(EVIDENCE_EXTENSION)
                .unwrap_or(filename)
                .to_string()
        });
        Violation::v1(id, &category, timestamp, tracker_id, filename)
    }
}

/// Body of `GET /stats`. The backend reports internal failures as `{"error": "..."}` with a
/// success status, so both shapes decode.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(untagged)]
pub enum StatsPayload {
    Failure { error: String },
    Counters(StatsCountersPayload),
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct StatsCountersPayload {
    pub in_count: u64,
    pub out_count: u64,
    pub total_violations: u64,
    #[serde(default)]
    pub recent_violations: Vec<ViolationPayload>,
    #[serde(default)]
    pub scene: Option<String>,
}

impl StatsCountersPayload {
    /// Converts the payload, keeping at most `recent_cap` of the newest feed entries.
    pub fn into_snapshot(self, recent_cap: usize) -> Result<StatsSnapshot, ContractViolation> {
        let mut recent_violations = self
            .recent_violations
            .into_iter()
            .map(ViolationPayload::into_violation)
            .collect::<Result<Vec<_>, _>>()?;
        if recent_violations.len() > recent_cap {
            let excess = recent_violations.len() - recent_cap;
            recent_violations.drain(..excess);
        }
        let snapshot = StatsSnapshot {
            inbound_count: self.in_count,
            outbound_count: self.out_count,
            total_violation_count: self.total_violations,
            recent_violations,
            scene_label: self
                .scene
                .map(|s| s.trim().to_ascii_uppercase())
                .filter(|s| !s.is_empty()),
        };
        snapshot.validate()?;
        Ok(snapshot)
    }
}

/// Decodes a `/violations` listing, keeping the backend's order.
pub fn decode_archive(payloads: Vec<ViolationPayload>) -> Result<Vec<Violation>, ContractViolation> {
    payloads
        .into_iter()
        .map(ViolationPayload::into_violation)
        .collect()
}
