//! Partition directory naming and time bounds.
//!
//! Directory names are the partition's start date at its granularity
//! (`YYYY-MM-DD`, `YYYY-MM`, `YYYY`) or `default` for an unpartitioned
//! journal, optionally followed by `~N` when a directory of the same name
//! had to be recreated.

use chrono::{DateTime, Datelike, NaiveDate, Utc};

use super::PartitionError;
use crate::schema::PartitionBy;

/// Directory name of the single partition of an unpartitioned journal.
pub const DEFAULT_PARTITION: &str = "default";

const VERSION_SEPARATOR: char = '~';

/// Half-open time range `[start, end)` covered by a partition, epoch ms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionBounds {
    /// Inclusive lower bound; `i64::MIN` when unbounded.
    pub start: i64,
    /// `None` when the partition is unbounded.
    pub end: Option<i64>,
}

impl PartitionBounds {
    /// True when `start <= timestamp < end`.
    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && self.end.is_none_or(|end| timestamp < end)
    }
}

/// Bounds of the partition that holds `timestamp`.
pub fn bounds_for(timestamp: i64, by: PartitionBy) -> Result<PartitionBounds, PartitionError> {
    let (first, next) = match by {
        PartitionBy::None => {
            return Ok(PartitionBounds {
                start: i64::MIN,
                end: None,
            });
        }
        PartitionBy::Day => {
            let date = utc_date(timestamp)?;
            (Some(date), date.succ_opt())
        }
        PartitionBy::Month => {
            let date = utc_date(timestamp)?;
            let first = NaiveDate::from_ymd_opt(date.year(), date.month(), 1);
            let next = if date.month() == 12 {
                NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)
            } else {
                NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1)
            };
            (first, next)
        }
        PartitionBy::Year => {
            let date = utc_date(timestamp)?;
            (
                NaiveDate::from_ymd_opt(date.year(), 1, 1),
                NaiveDate::from_ymd_opt(date.year() + 1, 1, 1),
            )
        }
    };

    let first = first.ok_or(PartitionError::InvalidTimestamp(timestamp))?;
    Ok(PartitionBounds {
        start: midnight_ms(first),
        end: next.map(midnight_ms),
    })
}

/// Base directory name (no version) of the partition starting at `start`.
pub fn partition_name(start: i64, by: PartitionBy) -> Result<String, PartitionError> {
    let pattern = match by {
        PartitionBy::None => return Ok(DEFAULT_PARTITION.to_string()),
        PartitionBy::Day => "%Y-%m-%d",
        PartitionBy::Month => "%Y-%m",
        PartitionBy::Year => "%Y",
    };
    Ok(utc_date(start)?.format(pattern).to_string())
}

fn utc_date(timestamp: i64) -> Result<NaiveDate, PartitionError> {
    DateTime::<Utc>::from_timestamp_millis(timestamp)
        .map(|t| t.date_naive())
        .ok_or(PartitionError::InvalidTimestamp(timestamp))
}

/// Appends the `~N` suffix for versions above zero.
pub fn versioned_name(base: &str, version: u32) -> String {
    if version == 0 {
        base.to_string()
    } else {
        format!("{base}{VERSION_SEPARATOR}{version}")
    }
}

/// A directory name recognised as a partition of this journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    pub bounds: PartitionBounds,
    /// `~N` suffix of a re-created partition; `0` when absent.
    pub version: u32,
}

/// Parses a directory name, rejecting anything that does not round-trip
/// through [`partition_name`].
pub fn parse_partition_name(name: &str, by: PartitionBy) -> Option<ParsedName> {
    let (base, version) = match name.split_once(VERSION_SEPARATOR) {
        Some((base, v)) => (base, v.parse::<u32>().ok().filter(|v| *v > 0)?),
        None => (name, 0),
    };

    let bounds = if by == PartitionBy::None {
        if base != DEFAULT_PARTITION {
            return None;
        }
        bounds_for(0, by).ok()?
    } else {
        let padded = match by {
            PartitionBy::Day => base.to_string(),
            PartitionBy::Month => format!("{base}-01"),
            PartitionBy::Year => format!("{base}-01-01"),
            PartitionBy::None => return None,
        };
        let date = NaiveDate::parse_from_str(&padded, "%Y-%m-%d").ok()?;
        let bounds = bounds_for(midnight_ms(date), by).ok()?;
        if partition_name(bounds.start, by).ok()? != base {
            return None;
        }
        bounds
    };

    Some(ParsedName { bounds, version })
}

fn midnight_ms(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp_millis())
        .unwrap_or(i64::MIN)
}
