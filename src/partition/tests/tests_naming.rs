use super::helpers::DAY_MS;
use crate::partition::naming::{DEFAULT_PARTITION, ParsedName};
use crate::partition::{PartitionBounds, PartitionError, bounds_for, parse_partition_name, partition_name, versioned_name};
use crate::schema::PartitionBy;

// 2024-01-15T00:00:00Z
const JAN_15: i64 = 19_737 * DAY_MS;

#[test]
fn day_partition_covers_one_utc_day() {
    let bounds = bounds_for(JAN_15 + 5 * 3_600_000, PartitionBy::Day).unwrap();
    assert_eq!(
        bounds,
        PartitionBounds {
            start: JAN_15,
            end: Some(JAN_15 + DAY_MS)
        }
    );
    assert!(bounds.contains(JAN_15));
    assert!(bounds.contains(JAN_15 + DAY_MS - 1));
    assert!(!bounds.contains(JAN_15 + DAY_MS));
    assert_eq!(partition_name(bounds.start, PartitionBy::Day).unwrap(), "2024-01-15");
}

#[test]
fn month_and_year_bounds() {
    // 2024-02-10, leap February.
    let feb = bounds_for(JAN_15 + 26 * DAY_MS, PartitionBy::Month).unwrap();
    assert_eq!(feb.start, 19_754 * DAY_MS);
    assert_eq!(feb.end, Some(19_783 * DAY_MS));
    assert_eq!(partition_name(feb.start, PartitionBy::Month).unwrap(), "2024-02");

    let year = bounds_for(JAN_15, PartitionBy::Year).unwrap();
    assert_eq!(year.start, 19_723 * DAY_MS);
    assert_eq!(year.end, Some(20_089 * DAY_MS));
    assert_eq!(partition_name(year.start, PartitionBy::Year).unwrap(), "2024");
}

#[test]
fn december_rolls_into_next_year() {
    let dec = bounds_for(19_722 * DAY_MS, PartitionBy::Month).unwrap();
    assert_eq!(partition_name(dec.start, PartitionBy::Month).unwrap(), "2023-12");
    assert_eq!(dec.end, Some(19_723 * DAY_MS));
}

#[test]
fn timestamps_before_epoch() {
    let bounds = bounds_for(-1, PartitionBy::Day).unwrap();
    assert_eq!(bounds.start, -DAY_MS);
    assert_eq!(partition_name(bounds.start, PartitionBy::Day).unwrap(), "1969-12-31");
}

#[test]
fn unpartitioned_journal_has_one_unbounded_partition() {
    let bounds = bounds_for(JAN_15, PartitionBy::None).unwrap();
    assert!(bounds.contains(i64::MIN));
    assert!(bounds.contains(i64::MAX));
    assert_eq!(partition_name(bounds.start, PartitionBy::None).unwrap(), DEFAULT_PARTITION);
}

#[test]
fn unpartitioned_journal_accepts_any_timestamp() {
    for ts in [i64::MIN, i64::MAX] {
        let bounds = bounds_for(ts, PartitionBy::None).unwrap();
        assert_eq!(bounds.end, None);
        assert_eq!(partition_name(ts, PartitionBy::None).unwrap(), DEFAULT_PARTITION);
    }
    assert!(matches!(
        partition_name(i64::MAX, PartitionBy::Year),
        Err(PartitionError::InvalidTimestamp(i64::MAX))
    ));
}

#[test]
fn out_of_range_timestamp_is_rejected() {
    assert!(matches!(
        bounds_for(i64::MAX, PartitionBy::Day),
        Err(PartitionError::InvalidTimestamp(i64::MAX))
    ));
}

#[test]
fn versioned_names_parse_back() {
    assert_eq!(versioned_name("2024-01-15", 0), "2024-01-15");
    assert_eq!(versioned_name("2024-01-15", 2), "2024-01-15~2");

    let parsed = parse_partition_name("2024-01-15~2", PartitionBy::Day).unwrap();
    assert_eq!(
        parsed,
        ParsedName {
            bounds: bounds_for(JAN_15, PartitionBy::Day).unwrap(),
            version: 2,
        }
    );
    assert_eq!(parse_partition_name("2024-01", PartitionBy::Month).unwrap().version, 0);
    assert!(parse_partition_name(DEFAULT_PARTITION, PartitionBy::None).is_some());
}

#[test]
fn foreign_directory_names_are_ignored() {
    for name in [
        "_tx.log",
        "2024-1-15",
        "2024-01-15~0",
        "2024-01-15~x",
        "2024-02-30",
        "2024-01",
        DEFAULT_PARTITION,
    ] {
        assert!(parse_partition_name(name, PartitionBy::Day).is_none(), "{name}");
    }
    assert!(parse_partition_name("2024-01-15", PartitionBy::Month).is_none());
    assert!(parse_partition_name("2024-01-15", PartitionBy::None).is_none());
}
