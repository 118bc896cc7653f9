/// Wall-clock cadence and data-readiness flags

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::core::{FLAG_CRASH_SUSPECT_MINUTES, FLAG_GIVE_UP_MINUTES, FLAG_POLL_SECS};

const FLAG_FORMAT: &str = "%Y-%m-%d_%H_%M";

/// Signal/kline cadence such as `5m` or `1h`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KlineInterval {
    minutes: u32,
}

impl KlineInterval {
    pub fn from_minutes(minutes: u32) -> Result<Self> {
        if minutes == 0 {
            bail!("interval must be at least one minute");
        }
        Ok(Self { minutes })
    }

    pub fn minutes(&self) -> u32 {
        self.minutes
    }

    pub fn duration(&self) -> ChronoDuration {
        ChronoDuration::minutes(self.minutes as i64)
    }
}

impl Default for KlineInterval {
    fn default() -> Self {
        Self { minutes: 5 }
    }
}

impl FromStr for KlineInterval {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let Some((unit_at, _)) = raw.char_indices().last() else {
            bail!("interval must not be empty");
        };
        let (count, unit) = raw.split_at(unit_at);
        let count: u32 = count
            .parse()
            .with_context(|| format!("interval {:?} must look like 5m or 1h", raw))?;
        match unit {
            "m" | "T" => Self::from_minutes(count),
            "h" | "H" => match count.checked_mul(60) {
                Some(minutes) => Self::from_minutes(minutes),
                None => bail!("interval {:?} is too long", raw),
            },
            _ => bail!("interval {:?} must end in m or h", raw),
        }
    }
}

impl TryFrom<String> for KlineInterval {
    type Error = anyhow::Error;

    fn try_from(raw: String) -> Result<Self> {
        raw.parse()
    }
}

impl From<KlineInterval> for String {
    fn from(interval: KlineInterval) -> Self {
        interval.to_string()
    }
}

impl fmt::Display for KlineInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.minutes % 60 == 0 {
            write!(f, "{}h", self.minutes / 60)
        } else {
            write!(f, "{}m", self.minutes)
        }
    }
}

/// Next instant after `now` aligned to the interval since midnight UTC,
/// leaving at least `ahead_seconds` of headroom.
///
/// 5m at 12:33:51 gives 12:35:00; 1h at 14:37:51 gives 15:00:00.
pub fn next_run_time(interval: KlineInterval, now: DateTime<Utc>, ahead_seconds: i64) -> DateTime<Utc> {
    let midnight = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
        .unwrap_or(now);
    let step = interval.minutes as i64 * 60;
    let elapsed = (now - midnight).num_seconds();

    let mut candidate = midnight + ChronoDuration::seconds((elapsed / step + 1) * step);
    while (candidate - now).num_seconds() < ahead_seconds {
        candidate += ChronoDuration::seconds(step);
    }
    candidate
}

/// Sleep until the next run time and return it. Debug runs return immediately.
pub async fn sleep_until_run_time(interval: KlineInterval, debug_mode: bool) -> DateTime<Utc> {
    let now = Utc::now();
    let run_time = next_run_time(interval, now, 1);
    info!(%run_time, "⏰ Waiting for next run time");

    if !debug_mode {
        if let Ok(wait) = (run_time - now).to_std() {
            tokio::time::sleep(wait).await;
        }
    }
    run_time
}

/// Sleep for `duration` unless shutdown arrives first. Returns `true` on shutdown.
pub async fn idle_or_shutdown(duration: Duration, shutdown: &mut broadcast::Receiver<()>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = shutdown.recv() => true,
    }
}

pub fn flag_file_name(run_time: DateTime<Utc>) -> String {
    format!("{}.flag", run_time.format(FLAG_FORMAT))
}

/// Newest flag in `flag_dir`, by the time encoded in its name
pub fn latest_flag_time(flag_dir: &Path) -> Option<DateTime<Utc>> {
    let entries = std::fs::read_dir(flag_dir).ok()?;
    entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name();
            let stem = name.to_str()?.strip_suffix(".flag")?.to_string();
            NaiveDateTime::parse_from_str(&stem, FLAG_FORMAT).ok()
        })
        .max()
        .map(|naive| naive.and_utc())
}

/// Publish the flag for `run_time` and keep only the newest `retention` flags.
/// Returns how many old flags were removed.
pub fn write_data_flag(flag_dir: &Path, run_time: DateTime<Utc>, retention: usize) -> std::io::Result<usize> {
    std::fs::create_dir_all(flag_dir)?;
    std::fs::write(flag_dir.join(flag_file_name(run_time)), "done")?;

    let mut flags: Vec<(NaiveDateTime, std::path::PathBuf)> = std::fs::read_dir(flag_dir)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let path = entry.path();
            let stem = path.file_name()?.to_str()?.strip_suffix(".flag")?.to_string();
            let time = NaiveDateTime::parse_from_str(&stem, FLAG_FORMAT).ok()?;
            Some((time, path))
        })
        .collect();
    flags.sort_by(|a, b| b.0.cmp(&a.0));

    let mut removed = 0;
    for (_, path) in flags.iter().skip(retention) {
        std::fs::remove_file(path)?;
        removed += 1;
    }
    if removed > 0 {
        info!(removed, dir = %flag_dir.display(), "🧹 Pruned old data flags");
    }
    Ok(removed)
}

/// Bounds for the data-flag wait
#[derive(Debug, Clone, Copy)]
pub struct FlagWait {
    pub poll: Duration,
    pub give_up_after: ChronoDuration,
    pub crash_suspect_after: ChronoDuration,
}

impl Default for FlagWait {
    fn default() -> Self {
        Self {
            poll: Duration::from_secs(FLAG_POLL_SECS),
            give_up_after: ChronoDuration::minutes(FLAG_GIVE_UP_MINUTES),
            crash_suspect_after: ChronoDuration::minutes(FLAG_CRASH_SUSPECT_MINUTES),
        }
    }
}

/// Wait for the refresh subsystem to publish the flag for `run_time`.
///
/// Returns `true` when the flag appeared and `false` when the wait gave up;
/// the caller proceeds either way.
pub async fn wait_for_data_flag(flag_dir: &Path, run_time: DateTime<Utc>, wait: FlagWait) -> bool {
    let flag_path = flag_dir.join(flag_file_name(run_time));
    let newest = latest_flag_time(flag_dir);
    let mut crash_reported = false;

    loop {
        tokio::time::sleep(wait.poll).await;

        if flag_path.exists() {
            debug!(flag = %flag_path.display(), "Data flag ready");
            return true;
        }

        let newest_is_old = newest.map_or(true, |t| t < run_time - wait.crash_suspect_after);
        if newest_is_old && !crash_reported {
            error!(
                newest_flag = ?newest,
                %run_time,
                "💀 Data refresh process may have crashed: no recent flags"
            );
            crash_reported = true;
        }

        if Utc::now() > run_time + wait.give_up_after {
            warn!(
                newest_flag = ?newest,
                %run_time,
                now = %Utc::now(),
                "⚠️ Data flag never appeared, proceeding with possibly stale klines"
            );
            return false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 21, h, m, s).unwrap()
    }

    #[test]
    fn parses_interval_labels() {
        assert_eq!("5m".parse::<KlineInterval>().unwrap().minutes(), 5);
        assert_eq!("15T".parse::<KlineInterval>().unwrap().minutes(), 15);
        assert_eq!("1h".parse::<KlineInterval>().unwrap().minutes(), 60);
        assert_eq!("2H".parse::<KlineInterval>().unwrap().to_string(), "2h");
        assert!("0m".parse::<KlineInterval>().is_err());
        assert!("5d".parse::<KlineInterval>().is_err());
        assert!("m".parse::<KlineInterval>().is_err());
    }

    #[test]
    fn oversized_interval_is_rejected() {
        assert!("71582789h".parse::<KlineInterval>().is_err());
        assert!("999999999999999999h".parse::<KlineInterval>().is_err());
        assert_eq!("71582788h".parse::<KlineInterval>().unwrap().minutes(), 71_582_788 * 60);
    }

    #[test]
    fn aligns_to_next_boundary() {
        let five: KlineInterval = "5m".parse().unwrap();
        assert_eq!(next_run_time(five, at(12, 33, 51), 0), at(12, 35, 0));
        assert_eq!(next_run_time(five, at(12, 34, 51), 0), at(12, 35, 0));
        assert_eq!(next_run_time(five, at(12, 35, 0), 0), at(12, 40, 0));

        let hour: KlineInterval = "1h".parse().unwrap();
        assert_eq!(next_run_time(hour, at(14, 37, 51), 0), at(15, 0, 0));
    }

    #[test]
    fn rolls_over_midnight() {
        let thirty: KlineInterval = "30m".parse().unwrap();
        let expected = Utc.with_ymd_and_hms(2025, 4, 22, 0, 0, 0).unwrap();
        assert_eq!(next_run_time(thirty, at(23, 33, 51), 0), expected);
    }

    #[test]
    fn honours_headroom() {
        let five: KlineInterval = "5m".parse().unwrap();
        assert_eq!(next_run_time(five, at(12, 34, 59), 5), at(12, 40, 0));
    }

    #[test]
    fn finds_newest_flag() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(flag_file_name(at(12, 30, 0))), "done").unwrap();
        std::fs::write(dir.path().join(flag_file_name(at(12, 35, 0))), "done").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        assert_eq!(latest_flag_time(dir.path()), Some(at(12, 35, 0)));
        assert_eq!(flag_file_name(at(12, 35, 0)), "2025-04-21_12_35.flag");
    }

    #[test]
    fn flag_retention_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        for minute in [0, 5, 10, 15] {
            write_data_flag(dir.path(), at(12, minute, 0), 10).unwrap();
        }
        let removed = write_data_flag(dir.path(), at(12, 20, 0), 2).unwrap();
        assert_eq!(removed, 3);
        assert!(dir.path().join(flag_file_name(at(12, 20, 0))).exists());
        assert!(dir.path().join(flag_file_name(at(12, 15, 0))).exists());
        assert!(!dir.path().join(flag_file_name(at(12, 10, 0))).exists());
    }

    #[tokio::test]
    async fn idle_stops_on_shutdown() {
        let (tx, mut rx) = broadcast::channel(1);
        tx.send(()).unwrap();
        assert!(idle_or_shutdown(Duration::from_secs(30), &mut rx).await);

        let (_tx, mut rx) = broadcast::channel::<()>(1);
        assert!(!idle_or_shutdown(Duration::from_millis(1), &mut rx).await);
    }

    #[tokio::test]
    async fn returns_once_flag_exists() {
        let dir = tempfile::tempdir().unwrap();
        let run_time = Utc::now();
        std::fs::write(dir.path().join(flag_file_name(run_time)), "done").unwrap();

        let wait = FlagWait {
            poll: Duration::from_millis(1),
            ..FlagWait::default()
        };
        assert!(wait_for_data_flag(dir.path(), run_time, wait).await);
    }

    #[tokio::test]
    async fn gives_up_after_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let run_time = Utc::now() - ChronoDuration::minutes(10);

        let wait = FlagWait {
            poll: Duration::from_millis(1),
            ..FlagWait::default()
        };
        assert!(!wait_for_data_flag(dir.path(), run_time, wait).await);
    }
}
