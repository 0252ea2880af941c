//! The offset-specification language.
//!
//! An offset specification is a comma-separated list of partition intervals:
//!
//! ```text
//! spec              := [ partitionInterval { "," partitionInterval } ]
//! partitionInterval := partition "=" interval | partition | interval
//! partition         := "all" | number
//! interval          := [ position ] [ ":" [ position ] ]
//! position          := relativePosition | anchorPosition [ relativePosition ]
//! anchorPosition    := number | "newest" | "oldest" | "resume" | "[" timestamp "]"
//! relativePosition  := ( "+" | "-" ) ( number | duration )
//! ```
//!
//! So `3=100:300,5=43:67` consumes offsets 100 to 300 inclusive of partition
//! 3 and 43 to 67 of partition 5, `newest-10:` consumes the last ten messages
//! of every partition, and `[2019-08-31]` everything stamped on that day.
//!
//! There is a grammatical ambiguity between a partition number and an
//! interval, because both admit a single decimal number. A bare number is
//! taken as a partition, so `10` is partition 10 in full while `10:20` is the
//! offset range 10 to 20 across all partitions.

use crate::{
    error::ParseError,
    timestamp::{parse_time, TimeRange},
};
use nom::{
    bytes::complete::take_until,
    character::complete::char,
    sequence::delimited,
    IResult,
};
use std::{collections::BTreeMap, num::IntErrorKind};
use time::{Duration, OffsetDateTime};

/// Entry key meaning "every partition of the topic".
pub const ALL_PARTITIONS: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// The base of a position, before any displacement is applied.
pub enum Anchor {
    /// The oldest offset still retained for the partition.
    Oldest,
    /// The last offset that exists in the partition.
    Newest,
    /// The offset the active consumer group stopped at.
    Resume,
    /// Unbounded; only meaningful as an interval end.
    Max,
    /// A concrete absolute offset.
    At(i64),
    /// All offsets whose timestamps fall in the range.
    Time(TimeRange),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// A signed displacement from an anchor.
pub enum Delta {
    Offsets(i64),
    Time(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// An instant in the log: an anchor plus a signed displacement.
pub struct Position {
    pub anchor: Anchor,
    pub delta: Delta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Inclusive range of positions within one partition.
pub struct Interval {
    pub start: Position,
    pub end: Position,
}

/// Parsed offset specification: one interval per partition, with
/// [`ALL_PARTITIONS`] acting as the default for unlisted partitions.
pub type OffsetSpec = BTreeMap<i32, Interval>;

impl Position {
    pub const fn oldest() -> Self {
        Self {
            anchor: Anchor::Oldest,
            delta: Delta::Offsets(0),
        }
    }

    pub const fn newest() -> Self {
        Self {
            anchor: Anchor::Newest,
            delta: Delta::Offsets(0),
        }
    }

    pub const fn max() -> Self {
        Self {
            anchor: Anchor::Max,
            delta: Delta::Offsets(0),
        }
    }

    pub const fn at(offset: i64) -> Self {
        Self {
            anchor: Anchor::At(offset),
            delta: Delta::Offsets(0),
        }
    }

    pub const fn at_time(range: TimeRange) -> Self {
        Self {
            anchor: Anchor::Time(range),
            delta: Delta::Offsets(0),
        }
    }

    /// Collapse anchor and displacement into the anchor when they are of the
    /// same kind. Symbolic anchors stay symbolic: `oldest+10` must be applied
    /// to live broker state, whereas `1000+3` is just `1003`.
    fn fuse(&mut self) {
        match (self.anchor, self.delta) {
            (Anchor::At(base), Delta::Offsets(diff)) => {
                self.anchor = Anchor::At(base.saturating_add(diff));
                self.delta = Delta::Offsets(0);
            }
            (Anchor::Time(range), Delta::Time(diff)) => {
                self.anchor = Anchor::Time(range.shift(diff));
                self.delta = Delta::Offsets(0);
            }
            _ => {}
        }
    }
}

impl Interval {
    /// The whole partition, oldest to unbounded.
    pub const fn full() -> Self {
        Self {
            start: Position::oldest(),
            end: Position::max(),
        }
    }
}

/// Parses a set of partition-offset specifiers. Timestamps relative to the
/// current day are resolved against `now`.
pub fn parse_offsets(input: &str, now: OffsetDateTime) -> Result<OffsetSpec, ParseError> {
    let mut spec = OffsetSpec::new();
    for chunk in input.split(',') {
        let chunk = chunk.trim();
        // A bare number is a partition, not an interval; try that reading
        // first to settle the grammar's ambiguity.
        if let Ok(partition) = parse_partition(chunk) {
            spec.insert(partition, Interval::full());
            continue;
        }
        let (partition, interval) = match chunk.split_once('=') {
            Some((partition, interval)) => (parse_partition(partition)?, interval),
            None => (ALL_PARTITIONS, chunk),
        };
        spec.insert(partition, parse_interval(interval, now)?);
    }
    Ok(spec)
}

/// Parses a partition number, or the special word "all".
fn parse_partition(s: &str) -> Result<i32, ParseError> {
    if s == "all" {
        return Ok(ALL_PARTITIONS);
    }
    // i32/u32 FromStr would admit a leading sign, which the grammar does not.
    if !s.as_bytes().first().is_some_and(|b| b.is_ascii_digit()) {
        return Err(ParseError::InvalidPartition(s.to_owned()));
    }
    match s.parse::<u32>() {
        Ok(partition) if partition <= i32::MAX as u32 => Ok(partition as i32),
        Ok(_) => Err(ParseError::PartitionTooLarge(s.to_owned())),
        Err(err) if *err.kind() == IntErrorKind::PosOverflow => {
            Err(ParseError::PartitionTooLarge(s.to_owned()))
        }
        Err(_) => Err(ParseError::InvalidPartition(s.to_owned())),
    }
}

fn parse_interval(s: &str, now: OffsetDateTime) -> Result<Interval, ParseError> {
    if s.is_empty() {
        // An empty string implies all messages.
        return Ok(Interval::full());
    }
    let (start, rest) = parse_position(s, Position::oldest(), now)?;
    if rest.is_empty() {
        // A single position reads from there until the end.
        return Ok(Interval {
            start,
            end: Position::max(),
        });
    }
    let Some(rest) = rest.strip_prefix(':') else {
        return Err(ParseError::InvalidInterval(s.to_owned()));
    };
    let (end, rest) = parse_position(rest, Position::max(), now)?;
    if !rest.is_empty() {
        return Err(ParseError::InvalidInterval(s.to_owned()));
    }
    Ok(Interval { start, end })
}

/// Parses one half of an interval pair, returning the position and whatever
/// remains of `s`. A position is always terminated by a colon (the interval
/// divider) or the end of the string; an empty position yields `default`.
fn parse_position<'a>(
    s: &'a str,
    default: Position,
    now: OffsetDateTime,
) -> Result<(Position, &'a str), ParseError> {
    let (mut position, rest) = match s.as_bytes().first() {
        None => (default, ""),
        Some(b'[') => {
            let (rest, body) = timestamp_body(s)
                .map_err(|_| ParseError::UnterminatedTimestamp(s.to_owned()))?;
            (Position::at_time(parse_time(body, false, now)?), rest)
        }
        Some(b) if b.is_ascii_digit() => {
            let (anchor, rest) = split_while(s, |c| c.is_ascii_digit());
            (parse_offset_anchor(anchor)?, rest)
        }
        Some(b) if b.is_ascii_lowercase() => {
            let (anchor, rest) = split_while(s, |c| c.is_ascii_lowercase());
            (parse_named_anchor(anchor)?, rest)
        }
        // No anchor and a positive displacement: anchored at the start.
        Some(b'+') => (Position::oldest(), s),
        // No anchor and a negative displacement: anchored at the end.
        Some(b'-') => (Position::newest(), s),
        // Empty position; the colon belongs to the interval.
        Some(b':') => (default, s),
        Some(_) => return Err(ParseError::InvalidPosition(s.to_owned())),
    };
    let (relative, remainder) = match rest.find(':') {
        Some(i) => rest.split_at(i),
        None => (rest, ""),
    };
    parse_relative(relative, &mut position)?;
    position.fuse();
    Ok((position, remainder))
}

/// An explicit numeric anchor; the caller has ensured `s` starts with a digit.
fn parse_offset_anchor(s: &str) -> Result<Position, ParseError> {
    match s.parse::<u64>() {
        Ok(offset) if offset <= i64::MAX as u64 => Ok(Position::at(offset as i64)),
        _ => Err(ParseError::AnchorTooLarge(s.to_owned())),
    }
}

fn parse_named_anchor(s: &str) -> Result<Position, ParseError> {
    match s {
        "newest" => Ok(Position::newest()),
        "oldest" => Ok(Position::oldest()),
        "resume" => Ok(Position {
            anchor: Anchor::Resume,
            delta: Delta::Offsets(0),
        }),
        _ => Err(ParseError::InvalidAnchor(s.to_owned())),
    }
}

/// Parses a relative position such as `-10`, `+3`, `+1h` or `-3m3s` into the
/// displacement of `position`.
fn parse_relative(s: &str, position: &mut Position) -> Result<(), ParseError> {
    if s.is_empty() {
        return Ok(());
    }
    match s.parse::<i64>() {
        Ok(diff) => {
            position.delta = Delta::Offsets(diff);
            return Ok(());
        }
        Err(err)
            if matches!(
                err.kind(),
                IntErrorKind::PosOverflow | IntErrorKind::NegOverflow
            ) =>
        {
            return Err(ParseError::DeltaTooLarge(s.to_owned()));
        }
        Err(_) => {}
    }
    // Not a plain offset; it should be a signed duration.
    let (negative, body) = match s.as_bytes().first() {
        Some(b'+') => (false, &s[1..]),
        Some(b'-') => (true, &s[1..]),
        _ => return Err(ParseError::InvalidRelativePosition(s.to_owned())),
    };
    let diff = humantime::parse_duration(body)
        .ok()
        .and_then(|d| Duration::try_from(d).ok())
        .ok_or_else(|| ParseError::InvalidRelativePosition(s.to_owned()))?;
    position.delta = Delta::Time(if negative { -diff } else { diff });
    Ok(())
}

fn split_while(s: &str, pred: impl Fn(char) -> bool) -> (&str, &str) {
    match s.find(|c| !pred(c)) {
        Some(i) => s.split_at(i),
        None => (s, ""),
    }
}

fn timestamp_body(input: &str) -> IResult<&str, &str> {
    delimited(char('['), take_until("]"), char(']'))(input)
}

#[cfg(test)]
mod test {
    use super::*;
    use time::macros::datetime;

    fn now() -> OffsetDateTime {
        datetime!(2011-02-03 16:05:06.5 UTC)
    }

    fn parse(input: &str) -> Result<OffsetSpec, ParseError> {
        parse_offsets(input, now())
    }

    fn rel(anchor: Anchor, diff: i64) -> Position {
        Position {
            anchor,
            delta: Delta::Offsets(diff),
        }
    }

    fn spec(entries: &[(i32, Interval)]) -> OffsetSpec {
        entries.iter().copied().collect()
    }

    fn interval(start: Position, end: Position) -> Interval {
        Interval { start, end }
    }

    fn time_anchor(t0: OffsetDateTime, t1: OffsetDateTime) -> Position {
        Position::at_time(TimeRange { t0, t1 })
    }

    #[test]
    fn test_shorthands_mean_everything() {
        let everything = spec(&[(ALL_PARTITIONS, Interval::full())]);
        for input in ["", ",", ":", "all", "all=", "all=:", "oldest", "oldest:", "\tall ", "all=+0:"] {
            assert_eq!(parse(input).unwrap(), everything, "input: {input:?}");
        }
    }

    #[test]
    fn test_resume() {
        assert_eq!(
            parse("resume").unwrap(),
            spec(&[(
                ALL_PARTITIONS,
                interval(rel(Anchor::Resume, 0), Position::max())
            )]),
        );
        assert_eq!(
            parse("0=resume-10").unwrap(),
            spec(&[(0, interval(rel(Anchor::Resume, -10), Position::max()))]),
        );
    }

    #[test]
    fn test_bare_numbers_are_partitions() {
        assert_eq!(
            parse("1,2,4").unwrap(),
            spec(&[
                (1, Interval::full()),
                (2, Interval::full()),
                (4, Interval::full()),
            ]),
        );
        assert_eq!(parse("10").unwrap(), spec(&[(10, Interval::full())]));
        // ... but a number in interval position applies to all partitions.
        assert_eq!(
            parse("10:20").unwrap(),
            spec(&[(
                ALL_PARTITIONS,
                interval(Position::at(10), Position::at(20))
            )]),
        );
        assert_eq!(
            parse("10:").unwrap(),
            spec(&[(ALL_PARTITIONS, interval(Position::at(10), Position::max()))]),
        );
        // Ends default to unbounded, starts to oldest.
        assert_eq!(
            parse(":10").unwrap(),
            spec(&[(
                ALL_PARTITIONS,
                interval(Position::oldest(), Position::at(10))
            )]),
        );
    }

    #[test]
    fn test_explicit_partitions() {
        assert_eq!(parse("0=").unwrap(), spec(&[(0, Interval::full())]));
        assert_eq!(
            parse("0=1").unwrap(),
            spec(&[(0, interval(Position::at(1), Position::max()))]),
        );
        assert_eq!(
            parse("0=1:").unwrap(),
            spec(&[(0, interval(Position::at(1), Position::max()))]),
        );
        assert_eq!(
            parse("0=4:,2=1:10,6").unwrap(),
            spec(&[
                (0, interval(Position::at(4), Position::max())),
                (2, interval(Position::at(1), Position::at(10))),
                (6, Interval::full()),
            ]),
        );
    }

    #[test]
    fn test_relative_positions() {
        assert_eq!(
            parse("0=-1").unwrap(),
            spec(&[(0, interval(rel(Anchor::Newest, -1), Position::max()))]),
        );
        assert_eq!(
            parse("0=+1").unwrap(),
            spec(&[(0, interval(rel(Anchor::Oldest, 1), Position::max()))]),
        );
        assert_eq!(
            parse("0=+1:-1").unwrap(),
            spec(&[(0, interval(rel(Anchor::Oldest, 1), rel(Anchor::Newest, -1)))]),
        );
        assert_eq!(
            parse("0=oldest+10:newest-10").unwrap(),
            spec(&[(
                0,
                interval(rel(Anchor::Oldest, 10), rel(Anchor::Newest, -10))
            )]),
        );
        assert_eq!(
            parse("newest-10:").unwrap(),
            spec(&[(
                ALL_PARTITIONS,
                interval(rel(Anchor::Newest, -10), Position::max())
            )]),
        );
        assert_eq!(
            parse("oldest+10:").unwrap(),
            spec(&[(
                ALL_PARTITIONS,
                interval(rel(Anchor::Oldest, 10), Position::max())
            )]),
        );
        // The anchors can be omitted.
        assert_eq!(parse("-10:").unwrap(), parse("newest-10:").unwrap());
        assert_eq!(parse("+10:").unwrap(), parse("oldest+10:").unwrap());
    }

    #[test]
    fn test_all_with_override() {
        assert_eq!(
            parse("0=+1:-1,all=1:10").unwrap(),
            spec(&[
                (0, interval(rel(Anchor::Oldest, 1), rel(Anchor::Newest, -1))),
                (
                    ALL_PARTITIONS,
                    interval(Position::at(1), Position::at(10))
                ),
            ]),
        );
    }

    #[test]
    fn test_newest_start() {
        assert_eq!(
            parse("newest").unwrap(),
            spec(&[(
                ALL_PARTITIONS,
                interval(Position::newest(), Position::max())
            )]),
        );
        assert_eq!(parse("all=newest:").unwrap(), parse("newest:").unwrap());
    }

    #[test]
    fn test_fusion() {
        // Absolute anchors fuse with offset displacements...
        assert_eq!(parse("1000+3").unwrap(), parse("1003").unwrap());
        assert_eq!(
            parse("1000+3").unwrap(),
            spec(&[(
                ALL_PARTITIONS,
                interval(Position::at(1003), Position::max())
            )]),
        );
        // ...but symbolic anchors stay symbolic.
        assert_eq!(parse("oldest+10").unwrap(), parse("+10").unwrap());
        assert_eq!(parse("newest-10").unwrap(), parse("-10").unwrap());
        assert_ne!(parse("10:").unwrap(), parse(":10").unwrap());
    }

    #[test]
    fn test_time_anchors() {
        assert_eq!(
            parse("[2019-08-31T13:06:08.234Z]").unwrap(),
            spec(&[(
                ALL_PARTITIONS,
                interval(
                    time_anchor(
                        datetime!(2019-08-31 13:06:08.234 UTC),
                        datetime!(2019-08-31 13:06:08.234 UTC),
                    ),
                    Position::max(),
                )
            )]),
        );
        assert_eq!(
            parse("[2019-08-31]").unwrap(),
            spec(&[(
                ALL_PARTITIONS,
                interval(
                    time_anchor(
                        datetime!(2019-08-31 00:00 UTC),
                        datetime!(2019-09-01 00:00 UTC)
                    ),
                    Position::max(),
                )
            )]),
        );
        assert_eq!(
            parse("[2019-08]").unwrap(),
            spec(&[(
                ALL_PARTITIONS,
                interval(
                    time_anchor(
                        datetime!(2019-08-01 00:00 UTC),
                        datetime!(2019-09-01 00:00 UTC)
                    ),
                    Position::max(),
                )
            )]),
        );
        assert_eq!(
            parse("[2019]").unwrap(),
            spec(&[(
                ALL_PARTITIONS,
                interval(
                    time_anchor(
                        datetime!(2019-01-01 00:00 UTC),
                        datetime!(2020-01-01 00:00 UTC)
                    ),
                    Position::max(),
                )
            )]),
        );
        assert_eq!(
            parse("[13:45]").unwrap(),
            spec(&[(
                ALL_PARTITIONS,
                interval(
                    time_anchor(
                        datetime!(2011-02-03 13:45 UTC),
                        datetime!(2011-02-03 13:46 UTC)
                    ),
                    Position::max(),
                )
            )]),
        );
        assert_eq!(
            parse("[4pm]").unwrap(),
            spec(&[(
                ALL_PARTITIONS,
                interval(
                    time_anchor(
                        datetime!(2011-02-03 16:00 UTC),
                        datetime!(2011-02-03 17:00 UTC)
                    ),
                    Position::max(),
                )
            )]),
        );
        assert_eq!(
            parse("[2019-08-31T13:06:08.234Z]:[2023-02-05T12:01:02.6789Z]").unwrap(),
            spec(&[(
                ALL_PARTITIONS,
                interval(
                    time_anchor(
                        datetime!(2019-08-31 13:06:08.234 UTC),
                        datetime!(2019-08-31 13:06:08.234 UTC),
                    ),
                    time_anchor(
                        datetime!(2023-02-05 12:01:02.6789 UTC),
                        datetime!(2023-02-05 12:01:02.6789 UTC),
                    ),
                )
            )]),
        );
    }

    #[test]
    fn test_time_anchor_with_offset_displacement() {
        assert_eq!(
            parse("[4pm]-123").unwrap(),
            spec(&[(
                ALL_PARTITIONS,
                interval(
                    Position {
                        anchor: Anchor::Time(TimeRange {
                            t0: datetime!(2011-02-03 16:00 UTC),
                            t1: datetime!(2011-02-03 17:00 UTC),
                        }),
                        delta: Delta::Offsets(-123),
                    },
                    Position::max(),
                )
            )]),
        );
    }

    #[test]
    fn test_offset_anchor_with_time_displacement() {
        assert_eq!(
            parse("1234-1h3s").unwrap(),
            spec(&[(
                ALL_PARTITIONS,
                interval(
                    Position {
                        anchor: Anchor::At(1234),
                        delta: Delta::Time(-(Duration::HOUR + Duration::seconds(3))),
                    },
                    Position::max(),
                )
            )]),
        );
        assert_eq!(
            parse("1234+555ms").unwrap(),
            spec(&[(
                ALL_PARTITIONS,
                interval(
                    Position {
                        anchor: Anchor::At(1234),
                        delta: Delta::Time(Duration::milliseconds(555)),
                    },
                    Position::max(),
                )
            )]),
        );
    }

    #[test]
    fn test_time_anchor_fuses_with_time_displacement() {
        assert_eq!(
            parse("[3pm]+5s").unwrap(),
            spec(&[(
                ALL_PARTITIONS,
                interval(
                    time_anchor(
                        datetime!(2011-02-03 15:00:05 UTC),
                        datetime!(2011-02-03 16:00:05 UTC)
                    ),
                    Position::max(),
                )
            )]),
        );
    }

    #[test]
    fn test_errors() {
        use ParseError::*;
        let cases: &[(&str, ParseError)] = &[
            ("bogus", InvalidAnchor("bogus".into())),
            ("*", InvalidPosition("*".into())),
            (":::", InvalidInterval(":::".into())),
            ("foo+20", InvalidAnchor("foo".into())),
            ("oldest+bad", InvalidRelativePosition("+bad".into())),
            ("+bad", InvalidRelativePosition("+bad".into())),
            ("[3pm]foo", InvalidRelativePosition("foo".into())),
            ("[3pmm]", InvalidTimestamp("3pmm".into())),
            ("[3pm", UnterminatedTimestamp("[3pm".into())),
            ("0:1:2", InvalidInterval("0:1:2".into())),
            ("bogus=1", InvalidPartition("bogus".into())),
            (
                "+9223372036854775808",
                DeltaTooLarge("+9223372036854775808".into()),
            ),
            (
                "9223372036854775808:newest",
                AnchorTooLarge("9223372036854775808".into()),
            ),
            (
                "oldest:9223372036854775808",
                AnchorTooLarge("9223372036854775808".into()),
            ),
            (
                "2147483648=oldest",
                PartitionTooLarge("2147483648".into()),
            ),
        ];
        for (input, expected) in cases {
            assert_eq!(parse(input).unwrap_err(), *expected, "input: {input:?}");
        }
    }

    #[test]
    fn test_parser_never_returns_an_empty_spec() {
        for input in ["", ",", " , ", "1", "all=:"] {
            assert!(!parse(input).unwrap().is_empty(), "input: {input:?}");
        }
    }
}
