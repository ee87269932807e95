//! Sync-branch name formatting and parsing.
//!
//! This is the single source of truth for the bit-exact branch-name format
//! (`design notes` calls out ad-hoc string handling as a re-architecture
//! risk worth centralizing). Every other module goes through `format` and
//! `parse` rather than building or splitting the string itself.

use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;
use std::sync::OnceLock;

static BRANCH_RE_CELL: OnceLock<Regex> = OnceLock::new();

fn branch_re() -> &'static Regex {
    BRANCH_RE_CELL.get_or_init(|| {
        Regex::new(r"^(?P<prefix>.+)-(?P<date>\d{8})-(?P<time>\d{6})-(?P<sha>[0-9a-f]{12})$")
            .expect("static regex is valid")
    })
}

/// The parsed components of a sync-branch name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncBranch {
    pub prefix: String,
    pub timestamp: DateTime<Utc>,
    /// First 12 hex characters of the source commit SHA.
    pub sha_prefix: String,
}

/// Builds a sync-branch name: `<prefix>-YYYYMMDD-HHMMSS-<first-12-of-sha>`.
///
/// `sha` may be the full commit SHA; only the first 12 characters are used.
/// Panics only if `sha` is shorter than 12 characters, which would indicate
/// a caller bug (a valid git SHA is at least 7, but this engine always works
/// with full 40-character SHAs from the host API).
pub fn format(prefix: &str, ts: DateTime<Utc>, sha: &str) -> String {
    let sha_prefix = &sha[..sha.len().min(12)];
    format!(
        "{prefix}-{}-{}",
        ts.format("%Y%m%d-%H%M%S"),
        sha_prefix
    )
}

/// Parses a branch name previously produced by [`format`]. Returns `None`
/// for anything that doesn't match the exact shape, including names with an
/// embedded SHA prefix shorter than 12 hex characters.
pub fn parse(name: &str) -> Option<SyncBranch> {
    let caps = branch_re().captures(name)?;
    let date = &caps["date"];
    let time = &caps["time"];
    let naive = chrono::NaiveDateTime::parse_from_str(
        &format!("{date}{time}"),
        "%Y%m%d%H%M%S",
    )
    .ok()?;
    let timestamp = Utc.from_utc_datetime(&naive);
    Some(SyncBranch {
        prefix: caps["prefix"].to_string(),
        timestamp,
        sha_prefix: caps["sha"].to_string(),
    })
}

/// Whether `name` looks like a sync branch for the given `prefix` at all,
/// without requiring the full parse — used when listing remote branches to
/// decide which ones are candidates before parsing each one.
pub fn has_prefix(name: &str, prefix: &str) -> bool {
    name.starts_with(&format!("{prefix}-"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn round_trip() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 15, 12, 5, 30).unwrap();
        let name = format("chore/sync-files", ts, "abc123def4567890");
        assert_eq!(name, "chore/sync-files-20240115-120530-abc123def456");

        let parsed = parse(&name).expect("parses");
        assert_eq!(parsed.prefix, "chore/sync-files");
        assert_eq!(parsed.timestamp, ts);
        assert_eq!(parsed.sha_prefix, "abc123def456");
    }

    #[test]
    fn rejects_malformed_names() {
        assert!(parse("chore/sync-files-2024-01-15-abc").is_none());
        assert!(parse("not-a-sync-branch").is_none());
        assert!(parse("prefix-20240115-120530-ZZZ").is_none());
        assert!(parse("prefix-20240115-120530-abc123def4").is_none());
    }

    #[test]
    fn has_prefix_is_cheap_prefilter() {
        assert!(has_prefix("chore/sync-20240115-120530-abc123def456", "chore/sync"));
        assert!(!has_prefix("feature/other-branch", "chore/sync"));
    }

    #[test]
    fn truncates_longer_shas() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let full_sha = "0123456789abcdef0123456789abcdef01234567";
        let name = format("p", ts, full_sha);
        assert!(name.ends_with("0123456789ab"));
    }

    /// `parse(format(prefix, ts, sha))` recovers `(prefix, ts, sha[..12])`
    /// for any letters-only prefix, timestamp, and 12-hex-digit sha — the
    /// universal round-trip invariant this module exists to guarantee.
    #[test]
    fn round_trip_holds_for_generated_inputs() {
        use quickcheck::{quickcheck, TestResult};

        fn prop(prefix_seed: u8, sha_seed: u64, epoch_days: u16) -> TestResult {
            let letters = b"abcdefghijklmnopqrstuvwxyz";
            let prefix_len = (prefix_seed % 8) as usize + 1;
            let prefix: String = (0..prefix_len)
                .map(|i| letters[(prefix_seed as usize + i) % letters.len()] as char)
                .collect();
            let sha = std::format!("{:012x}", sha_seed % 0x1000_0000_0000);
            let ts = match Utc.timestamp_opt(946_684_800 + epoch_days as i64 * 86_400, 0).single() {
                Some(ts) => ts,
                None => return TestResult::discard(),
            };

            let name = format(&prefix, ts, &sha);
            let parsed = match parse(&name) {
                Some(p) => p,
                None => return TestResult::failed(),
            };
            TestResult::from_bool(parsed.prefix == prefix && parsed.timestamp == ts && parsed.sha_prefix == sha)
        }

        quickcheck(prop as fn(u8, u64, u16) -> TestResult);
    }
}
