//! On-disk per-node scheduling checkpoint (`TimerCheckPoint.txt`, §6, §8 property 6): a
//! single-line file summarizing reschedule progress across process restarts and reboots.

use crate::agent::atomic_file;
use crate::error::Result;
use crate::types::CheckpointFileData;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::path::Path;
use std::time::SystemTime;

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

pub(crate) fn format_timestamp(time: SystemTime) -> String {
    let dt: DateTime<Utc> = time.into();
    dt.format(TIMESTAMP_FORMAT).to_string()
}

pub(crate) fn parse_timestamp(text: &str) -> Option<SystemTime> {
    let naive = NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT).ok()?;
    Some(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc).into())
}

/// Render a checkpoint as the single-line on-disk format:
/// `<schedulingDateTime> <rescheduleCount> <rescheduleNeeded> [<lastAttemptedUpdateTime>]`.
pub fn serialize(data: &CheckpointFileData) -> String {
    let mut line = format!(
        "{} {} {}",
        format_timestamp(data.scheduling_date_time),
        data.reschedule_count,
        data.reschedule_needed
    );
    if let Some(last) = data.last_attempted_update_time {
        line.push(' ');
        line.push_str(&format_timestamp(last));
    }
    line
}

/// Parse the single-line on-disk format. Returns `None` on any malformed input so the
/// caller can silently replace it with a fresh checkpoint (§8 property 6).
pub fn parse(text: &str) -> Option<CheckpointFileData> {
    let mut fields = text.trim().split_whitespace();
    let scheduling_date_time = parse_timestamp(fields.next()?)?;
    let reschedule_count: u32 = fields.next()?.parse().ok()?;
    let reschedule_needed: bool = fields.next()?.parse().ok()?;
    let last_attempted_update_time = match fields.next() {
        Some(text) => Some(parse_timestamp(text)?),
        None => None,
    };
    if fields.next().is_some() {
        return None;
    }
    Some(CheckpointFileData {
        scheduling_date_time,
        reschedule_count,
        reschedule_needed,
        last_attempted_update_time,
    })
}

/// Read the checkpoint at `path`. A missing file reads as `None`; a file that fails to
/// parse is deleted and also reads as `None`, so the caller starts from a fresh checkpoint
/// rather than propagate a corrupt one (§8 property 6).
pub async fn read(path: &Path) -> Result<Option<CheckpointFileData>> {
    let Some(contents) = atomic_file::read_if_exists(path).await? else {
        return Ok(None);
    };
    match parse(&contents) {
        Some(data) => Ok(Some(data)),
        None => {
            tracing::warn!(path = %path.display(), "corrupt checkpoint file; discarding");
            let _ = tokio::fs::remove_file(path).await;
            Ok(None)
        }
    }
}

/// Write `data` to `path` atomically (temp file + rename).
pub async fn write(path: &Path, data: &CheckpointFileData) -> Result<()> {
    atomic_file::write_atomic(path, &serialize(data)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sample() -> CheckpointFileData {
        CheckpointFileData {
            scheduling_date_time: SystemTime::UNIX_EPOCH + Duration::from_secs(1_750_000_000),
            reschedule_count: 2,
            reschedule_needed: true,
            last_attempted_update_time: Some(SystemTime::UNIX_EPOCH + Duration::from_secs(1_749_000_000)),
        }
    }

    #[test]
    fn round_trips_through_text() {
        let data = sample();
        let text = serialize(&data);
        assert_eq!(parse(&text), Some(data));
    }

    #[test]
    fn round_trips_without_last_attempted() {
        let mut data = sample();
        data.last_attempted_update_time = None;
        let text = serialize(&data);
        assert_eq!(parse(&text), Some(data));
    }

    #[test]
    fn garbage_fails_to_parse() {
        assert_eq!(parse("not a checkpoint"), None);
        assert_eq!(parse(""), None);
        assert_eq!(parse("20260101000000 2 true trailing garbage field"), None);
    }

    #[tokio::test]
    async fn write_then_read_round_trips_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("TimerCheckPoint.txt");
        let data = sample();
        write(&path, &data).await.unwrap();
        let read_back = read(&path).await.unwrap();
        assert_eq!(read_back, Some(data));
    }

    #[tokio::test]
    async fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.txt");
        assert_eq!(read(&path).await.unwrap(), None);
    }

    #[tokio::test]
    async fn corrupt_file_is_deleted_and_treated_as_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("TimerCheckPoint.txt");
        tokio::fs::write(&path, "garbage").await.unwrap();
        assert_eq!(read(&path).await.unwrap(), None);
        assert!(!path.exists());
    }
}
