#![forbid(unsafe_code)]

use roadwatch_contracts::violation::Violation;
use tracing::debug;

/// Point-in-time archive listing, fetched on mount and on explicit refresh.
///
/// Only the most recently issued request may land; unmounting invalidates every request.
#[derive(Debug, Clone, Default)]
pub struct ArchiveState {
    entries: Vec<Violation>,
    loaded: bool,
    in_flight: Option<u64>,
    next_request: u64,
    last_error: Option<String>,
}

impl ArchiveState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[Violation] {
        &self.entries
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn begin_fetch(&mut self) -> u64 {
        self.next_request = self.next_request.wrapping_add(1);
        self.in_flight = Some(self.next_request);
        self.next_request
    }

    pub fn complete(&mut self, request: u64, result: Result<Vec<Violation>, String>) -> bool {
        if self.in_flight != Some(request) {
            debug!(request, "discarding superseded archive response");
            return false;
        }
        self.in_flight = None;
        match result {
            Ok(entries) => {
                self.entries = entries;
                self.loaded = true;
                self.last_error = None;
            }
            Err(error) => self.last_error = Some(error),
        }
        true
    }

    pub fn unmount(&mut self) {
        self.in_flight = None;
        self.entries.clear();
        self.loaded = false;
        self.last_error = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roadwatch_contracts::violation::TrackerId;

    fn listing(n: i64) -> Vec<Violation> {
        (0..n)
            .map(|t| Violation::from_detection("red light", TrackerId(t), "2024-01-01_12:00:00").unwrap())
            .collect()
    }

    #[test]
    fn at_archive_01_latest_request_wins() {
        let mut archive = ArchiveState::new();
        let first = archive.begin_fetch();
        let second = archive.begin_fetch();
        assert!(archive.complete(second, Ok(listing(2))));
        assert!(!archive.complete(first, Ok(listing(5))));
        assert_eq!(archive.entries().len(), 2);
        assert!(archive.is_loaded());
        assert!(!archive.is_loading());
    }

    #[test]
    fn at_archive_02_failure_keeps_previous_listing() {
        let mut archive = ArchiveState::new();
        let r = archive.begin_fetch();
        archive.complete(r, Ok(listing(3)));
        let r = archive.begin_fetch();
        assert!(archive.complete(r, Err("HTTP 502".to_string())));
        assert_eq!(archive.entries().len(), 3);
        assert_eq!(archive.last_error(), Some("HTTP 502"));
    }

    #[test]
    fn at_archive_03_unmount_invalidates_in_flight() {
        let mut archive = ArchiveState::new();
        let r = archive.begin_fetch();
        archive.unmount();
        assert!(!archive.complete(r, Ok(listing(1))));
        assert!(!archive.is_loaded());
    }
}
