#![forbid(unsafe_code)]

use roadwatch_contracts::media::CameraPreset;
use roadwatch_contracts::violation::{StatsSnapshot, Violation};

pub const USAGE: &str =
    "usage: roadwatch <watch [ticks]|archive|presets|evidence-url <filename>> [--email <email>]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    /// Print the live counters on every stats update; `ticks` bounds the number of updates.
    Watch { ticks: Option<u32> },
    Archive,
    Presets,
    EvidenceUrl { filename: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliInvocation {
    pub command: CliCommand,
    pub email: Option<String>,
}

impl CliCommand {
    pub fn needs_session(&self) -> bool {
        matches!(self, CliCommand::Watch { .. } | CliCommand::Archive)
    }
}

pub fn parse_invocation(args: &[String]) -> Result<CliInvocation, String> {
    let mut positional: Vec<&str> = Vec::new();
    let mut email = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--email" {
            let value = iter
                .next()
                .ok_or_else(|| "--email requires a value".to_string())?;
            email = Some(value.trim().to_string());
        } else {
            positional.push(arg.as_str());
        }
    }

    let command = match positional.as_slice() {
        ["watch"] => CliCommand::Watch { ticks: None },
        ["watch", n] => {
            let ticks = n
                .parse::<u32>()
                .ok()
                .filter(|v| *v > 0)
                .ok_or_else(|| format!("invalid tick count '{n}'"))?;
            CliCommand::Watch { ticks: Some(ticks) }
        }
        ["archive"] => CliCommand::Archive,
        ["presets"] => CliCommand::Presets,
        ["evidence-url", filename] => CliCommand::EvidenceUrl {
            filename: filename.to_string(),
        },
        _ => return Err(USAGE.to_string()),
    };
    Ok(CliInvocation { command, email })
}

pub fn format_stats(stats: &StatsSnapshot) -> String {
    let mut out = format!(
        "in={} out={} violations={}",
        stats.inbound_count, stats.outbound_count, stats.total_violation_count
    );
    if let Some(scene) = &stats.scene_label {
        out.push_str(&format!(" scene={scene}"));
    }
    for v in &stats.recent_violations {
        out.push_str(&format!("\n  {}", format_violation(v)));
    }
    out
}

pub fn format_violation(v: &Violation) -> String {
    format!(
        "{} {} tracker={} evidence={}",
        v.timestamp,
        v.category,
        v.tracker_id,
        v.evidence.as_str()
    )
}

pub fn format_archive(entries: &[Violation]) -> String {
    if entries.is_empty() {
        return "no recorded violations".to_string();
    }
    entries
        .iter()
        .map(format_violation)
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_presets(presets: &[CameraPreset]) -> String {
    presets
        .iter()
        .map(|p| format!("{}={}", p.label, p.source.as_str()))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use roadwatch_contracts::violation::TrackerId;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn at_console_cli_01_parses_commands_and_email() {
        let inv = parse_invocation(&args(&["watch", "3", "--email", "op@co.com"])).unwrap();
        assert_eq!(inv.command, CliCommand::Watch { ticks: Some(3) });
        assert_eq!(inv.email.as_deref(), Some("op@co.com"));
        assert!(inv.command.needs_session());

        let inv = parse_invocation(&args(&["evidence-url", "A_ID1_t.mp4"])).unwrap();
        assert!(!inv.command.needs_session());
        assert!(parse_invocation(&args(&["watch", "0"])).is_err());
        assert!(parse_invocation(&args(&["archive", "--email"])).is_err());
        assert_eq!(parse_invocation(&args(&[])).unwrap_err(), USAGE);
    }

    #[test]
    fn at_console_cli_02_formats_counters_and_feed() {
        let stats = StatsSnapshot {
            inbound_count: 5,
            outbound_count: 3,
            total_violation_count: 1,
            recent_violations: vec![Violation::from_detection(
                "speeding",
                TrackerId(42),
                "2024-01-01_12:00:00",
            )
            .unwrap()],
            scene_label: None,
        };
        assert_eq!(
            format_stats(&stats),
            "in=5 out=3 violations=1\n  2024-01-01_12:00:00 SPEEDING tracker=42 evidence=SPEEDING_ID42_2024-01-01_12:00:00.mp4"
        );
    }

    #[test]
    fn at_console_cli_03_formats_archive_and_presets() {
        assert_eq!(format_archive(&[]), "no recorded violations");
        let presets = vec![CameraPreset::v1("webcam", "0").unwrap()];
        assert_eq!(format_presets(&presets), "webcam=0");
    }
}
