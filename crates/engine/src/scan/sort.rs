use crate::candidate::ImportCandidate;
use apkport_config::SortOrder;
use std::cmp::Ordering;

/// Sort `candidates` in place. The sort is stable, so ties keep scan order.
pub fn sort_candidates(candidates: &mut [ImportCandidate], order: SortOrder) {
    let compare: fn(&ImportCandidate, &ImportCandidate) -> Ordering = match order {
        SortOrder::ScanOrder => return,
        SortOrder::NameAscending => |a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()),
        SortOrder::NameDescending => |a, b| b.name.to_lowercase().cmp(&a.name.to_lowercase()),
        SortOrder::SizeAscending => |a, b| a.size.cmp(&b.size),
        SortOrder::SizeDescending => |a, b| b.size.cmp(&a.size),
        SortOrder::ModifiedAscending => |a, b| a.modified.cmp(&b.modified),
        SortOrder::ModifiedDescending => |a, b| b.modified.cmp(&a.modified),
    };
    candidates.sort_by(compare);
}

#[cfg(test)]
mod tests {
    use super::*;
    use apkport_storage::{Stat, StorageLocation};
    use rstest::rstest;
    use time::Duration;
    use time::macros::datetime;

    fn candidates() -> Vec<ImportCandidate> {
        let base = datetime!(2024-01-01 00:00:00 UTC);
        [("b.zip", 30, 2), ("A.apk", 10, 3), ("c.xapk", 30, 1), ("a2.zip", 20, 2)]
            .into_iter()
            .map(|(name, size, hours)| {
                let stat = Stat::file(name, size, base + Duration::hours(hours));
                ImportCandidate::new(StorageLocation::direct(format!("/s/{name}")), stat)
            })
            .collect()
    }

    #[rstest]
    #[case(SortOrder::ScanOrder, ["b.zip", "A.apk", "c.xapk", "a2.zip"])]
    #[case(SortOrder::NameAscending, ["A.apk", "a2.zip", "b.zip", "c.xapk"])]
    #[case(SortOrder::NameDescending, ["c.xapk", "b.zip", "a2.zip", "A.apk"])]
    #[case(SortOrder::SizeAscending, ["A.apk", "a2.zip", "b.zip", "c.xapk"])]
    #[case(SortOrder::SizeDescending, ["b.zip", "c.xapk", "a2.zip", "A.apk"])]
    #[case(SortOrder::ModifiedAscending, ["c.xapk", "b.zip", "a2.zip", "A.apk"])]
    #[case(SortOrder::ModifiedDescending, ["A.apk", "b.zip", "a2.zip", "c.xapk"])]
    fn test_sort(#[case] order: SortOrder, #[case] expected: [&str; 4]) {
        let mut list = candidates();
        sort_candidates(&mut list, order);
        let names: Vec<_> = list.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, expected);
    }
}
