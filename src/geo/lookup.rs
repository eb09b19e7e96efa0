//! Range containment lookup
//!
//! An in-memory copy of the ip_range table, sorted by lower bound, for the
//! batch relocation pass after a GeoIP refresh. The table can hold
//! hundreds of thousands of ranges, so containment is a binary search
//! rather than a scan.

use crate::geo::UNKNOWN_ID;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeEntry {
    pub range_id: i64,
    pub low: u32,
    pub high: u32,
}

#[derive(Debug, Clone, Default)]
pub struct RangeTable {
    /// Sorted by `low`; ranges are non-overlapping by construction.
    ranges: Vec<RangeEntry>,
}

impl RangeTable {
    pub fn new(mut ranges: Vec<RangeEntry>) -> Self {
        ranges.sort_by_key(|r| r.low);
        Self { ranges }
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Id of the range containing `ip`, or [`UNKNOWN_ID`].
    ///
    /// A miss should not happen on a compacted table (it is gap-free), but
    /// the sentinel keeps a stale or partial table from failing lookups.
    pub fn lookup(&self, ip: u32) -> i64 {
        let idx = self.ranges.partition_point(|r| r.low <= ip);
        if idx == 0 {
            return UNKNOWN_ID;
        }
        let candidate = &self.ranges[idx - 1];
        if ip <= candidate.high {
            candidate.range_id
        } else {
            UNKNOWN_ID
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RangeTable {
        RangeTable::new(vec![
            RangeEntry { range_id: 3, low: 200, high: 299 },
            RangeEntry { range_id: 1, low: 0, high: 99 },
            RangeEntry { range_id: 2, low: 100, high: 199 },
        ])
    }

    #[test]
    fn finds_the_containing_range() {
        let table = table();
        assert_eq!(table.lookup(0), 1);
        assert_eq!(table.lookup(99), 1);
        assert_eq!(table.lookup(100), 2);
        assert_eq!(table.lookup(250), 3);
    }

    #[test]
    fn miss_returns_the_unknown_sentinel() {
        let table = table();
        assert_eq!(table.lookup(300), UNKNOWN_ID);
        assert_eq!(RangeTable::default().lookup(42), UNKNOWN_ID);
    }

    #[test]
    fn gap_between_ranges_returns_unknown() {
        let table = RangeTable::new(vec![
            RangeEntry { range_id: 1, low: 0, high: 9 },
            RangeEntry { range_id: 2, low: 20, high: 29 },
        ]);
        assert_eq!(table.lookup(15), UNKNOWN_ID);
    }
}
