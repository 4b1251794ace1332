#![forbid(unsafe_code)]

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewId {
    Live,
    Archive,
    Settings,
}

impl ViewId {
    pub const ALL: [ViewId; 3] = [ViewId::Live, ViewId::Archive, ViewId::Settings];

    pub fn as_str(self) -> &'static str {
        match self {
            ViewId::Live => "live",
            ViewId::Archive => "archive",
            ViewId::Settings => "settings",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "live" => Some(ViewId::Live),
            "archive" => Some(ViewId::Archive),
            "settings" => Some(ViewId::Settings),
            _ => None,
        }
    }

    /// Views that keep the live counters polled while mounted.
    pub fn consumes_stats(self) -> bool {
        matches!(self, ViewId::Live | ViewId::Archive)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsoleAction {
    ReviewEvidence,
    RefreshArchive,
    SwitchSource,
    UploadMedia,
}

impl ConsoleAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ConsoleAction::ReviewEvidence => "review_evidence",
            ConsoleAction::RefreshArchive => "refresh_archive",
            ConsoleAction::SwitchSource => "switch_source",
            ConsoleAction::UploadMedia => "upload_media",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_view_01_parse_round_trips_names() {
        for v in ViewId::ALL {
            assert_eq!(ViewId::parse(v.as_str()), Some(v));
        }
        assert_eq!(ViewId::parse(" Settings "), Some(ViewId::Settings));
        assert_eq!(ViewId::parse("reports"), None);
    }

    #[test]
    fn at_view_02_only_live_and_archive_consume_stats() {
        assert!(ViewId::Live.consumes_stats());
        assert!(ViewId::Archive.consumes_stats());
        assert!(!ViewId::Settings.consumes_stats());
    }
}
