#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use roadwatch_contracts::violation::Violation;

/// Counts open media streams. A lease is released when it is dropped.
#[derive(Debug, Clone, Default)]
pub struct MediaLeases {
    outstanding: Arc<AtomicUsize>,
}

impl MediaLeases {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self) -> MediaLease {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        MediaLease {
            outstanding: self.outstanding.clone(),
        }
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct MediaLease {
    outstanding: Arc<AtomicUsize>,
}

impl Drop for MediaLease {
    fn drop(&mut self) {
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Playback handle for one evidence clip.
#[derive(Debug)]
pub struct EvidenceStream {
    pub url: String,
    _lease: MediaLease,
}

impl EvidenceStream {
    pub fn new(url: impl Into<String>, lease: MediaLease) -> Self {
        Self {
            url: url.into(),
            _lease: lease,
        }
    }
}

#[derive(Debug)]
pub struct OpenEvidence {
    pub violation: Violation,
    pub stream: EvidenceStream,
}

/// `closed -> open(violation) -> closed`. At most one item is open.
#[derive(Debug, Default)]
pub struct EvidenceReview {
    current: Option<OpenEvidence>,
}

impl EvidenceReview {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&OpenEvidence> {
        self.current.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }

    /// Opens `violation`, handing back whatever was open before so the caller can release it.
    pub fn open(&mut self, violation: Violation, stream: EvidenceStream) -> Option<OpenEvidence> {
        self.current.replace(OpenEvidence { violation, stream })
    }

    pub fn close(&mut self) -> Option<OpenEvidence> {
        self.current.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roadwatch_contracts::violation::TrackerId;

    fn violation(tracker: i64) -> Violation {
        Violation::from_detection("speeding", TrackerId(tracker), "2024-01-01_12:00:00").unwrap()
    }

    #[test]
    fn at_evidence_01_open_replaces_and_releases_previous_stream() {
        let leases = MediaLeases::new();
        let mut review = EvidenceReview::new();
        assert!(review
            .open(violation(1), EvidenceStream::new("a", leases.acquire()))
            .is_none());
        let replaced = review.open(violation(2), EvidenceStream::new("b", leases.acquire()));
        assert_eq!(replaced.as_ref().map(|e| e.violation.tracker_id), Some(TrackerId(1)));
        drop(replaced);
        assert_eq!(leases.outstanding(), 1);
        assert_eq!(review.current().map(|e| e.stream.url.as_str()), Some("b"));
    }

    #[test]
    fn at_evidence_02_close_releases_lease() {
        let leases = MediaLeases::new();
        let mut review = EvidenceReview::new();
        review.open(violation(7), EvidenceStream::new("a", leases.acquire()));
        assert!(review.close().is_some());
        assert!(review.close().is_none());
        assert_eq!(leases.outstanding(), 0);
        assert!(!review.is_open());
    }
}
