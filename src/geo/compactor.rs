//! Range compaction
//!
//! Consumes the raw GeoIP city CSV rows (pre-sorted, non-overlapping,
//! covering all of IPv4 space contiguously) and produces a smaller range
//! set: rows for countries of interest pass through at city granularity,
//! consecutive rows for any other country collapse into one synthetic
//! "City in ⟨country⟩" range. Merging contiguous same-country intervals
//! preserves the gap-free, non-overlapping property of the input.

use std::collections::HashSet;

use serde::Deserialize;

/// One raw CSV row: `low,high,country_code,country_name,region,city`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GeoRow {
    pub low: u32,
    pub high: u32,
    pub country_code: String,
    pub country_name: String,
    pub region: String,
    pub city: String,
}

/// A compacted range. `city` is `None` for merged ranges; the synthetic
/// names are derived from the country on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactedRange {
    pub low: u32,
    pub high: u32,
    pub city: Option<CityName>,
    pub country_code: String,
    pub country_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CityName {
    pub name: String,
    pub region: String,
}

impl CompactedRange {
    pub fn city_name(&self) -> String {
        match &self.city {
            Some(city) => city.name.clone(),
            None => format!("City in {}", self.country_name),
        }
    }

    pub fn region_name(&self) -> String {
        match &self.city {
            Some(city) => city.region.clone(),
            None => format!("Region in {}", self.country_name),
        }
    }
}

/// Open merge buffer for a run of same-country rows.
struct Combine {
    low: u32,
    high: u32,
    country_code: String,
    country_name: String,
}

impl Combine {
    fn flush(self) -> CompactedRange {
        CompactedRange {
            low: self.low,
            high: self.high,
            city: None,
            country_code: self.country_code,
            country_name: self.country_name,
        }
    }
}

/// Compact a sorted, contiguous row stream.
///
/// `cities_of_interest` holds the country codes resolved at city
/// granularity. An open merge buffer is flushed whenever the country
/// changes, and before any city-granular row is emitted; skipping that
/// second flush would let the buffer swallow the interval around the
/// emitted row and break the non-overlap invariant.
pub fn compact<I>(rows: I, cities_of_interest: &HashSet<String>) -> Vec<CompactedRange>
where
    I: IntoIterator<Item = GeoRow>,
{
    let mut out = Vec::new();
    let mut buffer: Option<Combine> = None;

    for row in rows {
        if cities_of_interest.contains(&row.country_code) {
            if let Some(open) = buffer.take() {
                out.push(open.flush());
            }
            out.push(CompactedRange {
                low: row.low,
                high: row.high,
                city: Some(CityName {
                    name: row.city,
                    region: row.region,
                }),
                country_code: row.country_code,
                country_name: row.country_name,
            });
            continue;
        }

        match &mut buffer {
            Some(open) if open.country_code == row.country_code => {
                // Contiguous same-country run: extend the upper bound.
                open.high = row.high;
            }
            _ => {
                if let Some(open) = buffer.take() {
                    out.push(open.flush());
                }
                buffer = Some(Combine {
                    low: row.low,
                    high: row.high,
                    country_code: row.country_code,
                    country_name: row.country_name,
                });
            }
        }
    }

    if let Some(open) = buffer {
        out.push(open.flush());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(low: u32, high: u32, code: &str, city: &str) -> GeoRow {
        GeoRow {
            low,
            high,
            country_code: code.to_string(),
            country_name: format!("{code}land"),
            region: format!("{city} region"),
            city: city.to_string(),
        }
    }

    fn interest(codes: &[&str]) -> HashSet<String> {
        codes.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn merges_consecutive_rows_of_an_uninteresting_country() {
        let rows = vec![row(0, 99, "XX", "Alpha"), row(100, 199, "XX", "Beta")];
        let ranges = compact(rows, &interest(&[]));
        assert_eq!(ranges.len(), 1);
        assert_eq!((ranges[0].low, ranges[0].high), (0, 199));
        assert_eq!(ranges[0].city, None);
        assert_eq!(ranges[0].city_name(), "City in XXland");
        assert_eq!(ranges[0].region_name(), "Region in XXland");
    }

    #[test]
    fn interesting_country_rows_pass_through_unchanged() {
        let rows = vec![row(0, 99, "DE", "Berlin"), row(100, 199, "DE", "Hamburg")];
        let ranges = compact(rows, &interest(&["DE"]));
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].city_name(), "Berlin");
        assert_eq!(ranges[1].city_name(), "Hamburg");
    }

    #[test]
    fn country_change_flushes_the_buffer() {
        let rows = vec![
            row(0, 99, "XX", "Alpha"),
            row(100, 199, "YY", "Gamma"),
            row(200, 299, "YY", "Delta"),
        ];
        let ranges = compact(rows, &interest(&[]));
        assert_eq!(ranges.len(), 2);
        assert_eq!((ranges[0].low, ranges[0].high), (0, 99));
        assert_eq!((ranges[1].low, ranges[1].high), (100, 299));
    }

    #[test]
    fn interesting_row_flushes_an_open_buffer() {
        // Without the flush, XX would merge across the DE row and overlap it.
        let rows = vec![
            row(0, 99, "XX", "Alpha"),
            row(100, 199, "DE", "Berlin"),
            row(200, 299, "XX", "Beta"),
        ];
        let ranges = compact(rows, &interest(&["DE"]));
        assert_eq!(ranges.len(), 3);
        assert_eq!((ranges[0].low, ranges[0].high), (0, 99));
        assert_eq!((ranges[1].low, ranges[1].high), (100, 199));
        assert_eq!((ranges[2].low, ranges[2].high), (200, 299));
    }

    #[test]
    fn output_is_disjoint_and_covers_the_input_space() {
        let rows = vec![
            row(0, 10, "XX", "A"),
            row(11, 20, "XX", "B"),
            row(21, 30, "DE", "Berlin"),
            row(31, 40, "YY", "C"),
            row(41, 50, "YY", "D"),
            row(51, 60, "XX", "E"),
        ];
        let ranges = compact(rows, &interest(&["DE"]));

        for pair in ranges.windows(2) {
            assert!(pair[0].high < pair[1].low, "ranges must stay disjoint");
            assert_eq!(pair[0].high + 1, pair[1].low, "ranges must stay gap-free");
        }
        assert_eq!(ranges.first().unwrap().low, 0);
        assert_eq!(ranges.last().unwrap().high, 60);
    }

    #[test]
    fn country_is_preserved_for_every_source_address() {
        let rows = vec![
            row(0, 10, "XX", "A"),
            row(11, 20, "XX", "B"),
            row(21, 30, "YY", "C"),
        ];
        let ranges = compact(rows.clone(), &interest(&[]));
        for source in &rows {
            for ip in [source.low, source.high] {
                let owner = ranges
                    .iter()
                    .find(|r| r.low <= ip && ip <= r.high)
                    .expect("every input address stays covered");
                assert_eq!(owner.country_code, source.country_code);
            }
        }
    }
}
