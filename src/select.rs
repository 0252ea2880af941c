//! Deciding which partitions to consume.

use crate::offsets::{OffsetSpec, ALL_PARTITIONS};

/// Intersect the spec with the partitions the broker actually has. An `all`
/// entry selects every partition; otherwise only the explicitly named ones
/// that exist are consumed.
pub fn select_partitions(spec: &OffsetSpec, available: &[i32]) -> Vec<i32> {
    if spec.contains_key(&ALL_PARTITIONS) {
        return available.to_vec();
    }
    available
        .iter()
        .copied()
        .filter(|partition| spec.contains_key(partition))
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::offsets::{parse_offsets, Anchor, Delta, Interval, Position};
    use time::OffsetDateTime;

    fn parse(input: &str) -> OffsetSpec {
        parse_offsets(input, OffsetDateTime::UNIX_EPOCH).unwrap()
    }

    #[test]
    fn test_explicit_partitions_are_intersected() {
        let spec = parse("10=2:4");
        assert_eq!(select_partitions(&spec, &[0, 10]), vec![10]);
        assert_eq!(select_partitions(&spec, &[0, 1]), Vec::<i32>::new());
    }

    #[test]
    fn test_all_selects_everything() {
        let spec = parse("3:41");
        assert_eq!(select_partitions(&spec, &[0, 10]), vec![0, 10]);
    }

    #[test]
    fn test_override_keeps_all_partitions_selected() {
        let spec = parse("0=+1:-1,all=1:10");
        assert_eq!(select_partitions(&spec, &[0, 1, 2]), vec![0, 1, 2]);
        // The explicit entry wins for its partition, `all` for the rest.
        assert_ne!(spec.get(&0), spec.get(&ALL_PARTITIONS));
        assert_eq!(
            spec.get(&0),
            Some(&Interval {
                start: Position {
                    anchor: Anchor::Oldest,
                    delta: Delta::Offsets(1),
                },
                end: Position {
                    anchor: Anchor::Newest,
                    delta: Delta::Offsets(-1),
                },
            })
        );
    }
}
