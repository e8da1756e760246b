//! The on-disk trail layout.
//!
//! CloudTrail delivers into a fixed key structure, and a local copy mirrors
//! it verbatim under a root directory:
//!
//! ```text
//! <root>/AWSLogs/<account>/CloudTrail/<region>/<yyyy>/<mm>/<dd>/*.json.gz
//! <root>/AWSLogs/<account>/CloudTrail-Digest/<region>/<yyyy>/<mm>/<dd>/*.json.gz
//! ```

use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use walkdir::WalkDir;

use trailwatch_contracts::error::{TrailwatchError, TrailwatchResult};

pub const LOGS_ROOT: &str = "AWSLogs";
const LOG_DIR: &str = "CloudTrail";
const DIGEST_DIR: &str = "CloudTrail-Digest";

/// Which half of the trail a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrailKind {
    Log,
    Digest,
}

impl TrailKind {
    fn dir(self) -> &'static str {
        match self {
            Self::Log => LOG_DIR,
            Self::Digest => DIGEST_DIR,
        }
    }

    /// Classify an object key.
    pub fn of_key(key: &str) -> Option<Self> {
        if key.contains(&format!("/{DIGEST_DIR}/")) {
            Some(Self::Digest)
        } else if key.contains(&format!("/{LOG_DIR}/")) {
            Some(Self::Log)
        } else {
            None
        }
    }
}

/// `AWSLogs/<account>/<kind>/<region>/`
pub fn region_prefix(account: &str, kind: TrailKind, region: &str) -> String {
    format!("{LOGS_ROOT}/{account}/{}/{region}/", kind.dir())
}

/// `AWSLogs/<account>/<kind>/<region>/<yyyy>/<mm>/<dd>/`
pub fn day_prefix(account: &str, kind: TrailKind, region: &str, day: NaiveDate) -> String {
    format!(
        "{}{:04}/{:02}/{:02}/",
        region_prefix(account, kind, region),
        day.year(),
        day.month(),
        day.day()
    )
}

/// Local path of an object key under `root`.
///
/// Keys are read from digests and listings, so they are untrusted. `None`
/// for any key that is empty, absolute, or steps outside `root`.
pub fn local_path(root: &Path, key: &str) -> Option<PathBuf> {
    let relative = Path::new(key);
    let confined = !key.is_empty()
        && relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    confined.then(|| root.join(relative))
}

/// Calendar days to mirror for an audit window.
///
/// Runs from the start date through the day after the end date, which
/// covers deliveries stamped in the next UTC day.
pub fn download_days(start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<NaiveDate> {
    let last = (end + Duration::days(1)).date_naive();
    let mut day = start.date_naive();
    let mut days = Vec::new();
    while day <= last {
        days.push(day);
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }
    days
}

/// The account whose trail lives under `root`.
///
/// Picks the lexicographically greatest directory under `AWSLogs/`.
pub fn infer_account(root: &Path) -> TrailwatchResult<String> {
    let logs = root.join(LOGS_ROOT);
    let entries = std::fs::read_dir(&logs).map_err(|e| TrailwatchError::io(&logs, e))?;

    entries
        .filter_map(Result::ok)
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter_map(|e| e.file_name().into_string().ok())
        .max()
        .ok_or_else(|| TrailwatchError::AuditFailed {
            reason: "no account directories".to_string(),
        })
}

/// Every trail file below `dir`, sorted by path. `None` if `dir` is absent.
pub fn trail_files(dir: &Path) -> Option<Vec<PathBuf>> {
    if !dir.is_dir() {
        return None;
    }
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| is_trail_file(p))
        .collect();
    files.sort();
    Some(files)
}

fn is_trail_file(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    (name.ends_with(".json.gz") || name.ends_with(".json")) && !name.ends_with(".metadata.json")
}

/// Convert a local path under `root` back to its object key.
pub fn key_for_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<&str> = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<_>>()?;
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_day_prefix_shape() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        assert_eq!(
            day_prefix("111122223333", TrailKind::Digest, "us-east-1", day),
            "AWSLogs/111122223333/CloudTrail-Digest/us-east-1/2024/03/05/"
        );
        assert_eq!(
            TrailKind::of_key("AWSLogs/1/CloudTrail/us-east-1/2024/03/05/x.json.gz"),
            Some(TrailKind::Log)
        );
        assert_eq!(
            TrailKind::of_key("AWSLogs/1/CloudTrail-Digest/us-east-1/2024/03/05/x.json.gz"),
            Some(TrailKind::Digest)
        );
        assert_eq!(TrailKind::of_key("other/x"), None);
    }

    /// The window reaches one day past the end date.
    #[test]
    fn test_download_days() {
        let start = Utc.with_ymd_and_hms(2024, 2, 28, 23, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 3, 1, 1, 0, 0).unwrap();
        let days: Vec<String> = download_days(start, end)
            .iter()
            .map(|d| d.to_string())
            .collect();
        assert_eq!(days, vec!["2024-02-28", "2024-02-29", "2024-03-01", "2024-03-02"]);
    }

    /// Keys that would resolve outside the root have no local path.
    #[test]
    fn test_local_path_confined_to_root() {
        let root = Path::new("/srv/trail");
        assert_eq!(
            local_path(root, "AWSLogs/1/CloudTrail/x.json.gz"),
            Some(root.join("AWSLogs/1/CloudTrail/x.json.gz"))
        );
        for key in ["", "../x.json.gz", "AWSLogs/../../x", "/etc/passwd", "./x", "a//b/../c"] {
            assert_eq!(local_path(root, key), None, "accepted {key:?}");
        }
    }

    #[test]
    fn test_infer_account_picks_greatest() {
        let dir = tempfile::tempdir().unwrap();
        for account in ["111111111111", "999999999999", "555555555555"] {
            std::fs::create_dir_all(dir.path().join(LOGS_ROOT).join(account)).unwrap();
        }
        std::fs::write(dir.path().join(LOGS_ROOT).join("zzz-not-a-dir"), b"").unwrap();

        assert_eq!(infer_account(dir.path()).unwrap(), "999999999999");
    }

    #[test]
    fn test_infer_account_without_logs_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(infer_account(dir.path()).is_err());
    }

    #[test]
    fn test_trail_files_skip_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        let day = dir.path().join("2024/03/05");
        std::fs::create_dir_all(&day).unwrap();
        std::fs::write(day.join("b.json.gz"), b"").unwrap();
        std::fs::write(day.join("a.json.gz"), b"").unwrap();
        std::fs::write(day.join("a.json.gz.metadata.json"), b"{}").unwrap();
        std::fs::write(day.join("notes.txt"), b"").unwrap();

        let files = trail_files(dir.path()).unwrap();
        let keys: Vec<String> = files
            .iter()
            .filter_map(|p| key_for_path(dir.path(), p))
            .collect();
        assert_eq!(keys, vec!["2024/03/05/a.json.gz", "2024/03/05/b.json.gz"]);
        assert!(trail_files(&dir.path().join("absent")).is_none());
    }
}
