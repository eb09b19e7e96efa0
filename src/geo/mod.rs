//! GeoIP range handling
//!
//! The range table is built from a raw GeoIP city CSV feed: the compactor
//! merges rows for countries not tracked at city granularity, the import
//! rebuilds the store tables destructively, and the lookup answers
//! integer-IP containment queries.

pub mod compactor;
pub mod import;
pub mod lookup;

pub use compactor::{compact, CompactedRange, GeoRow};
pub use import::{import_csv, import_rows, relocate_visitors, ImportSummary, RelocateSummary};
pub use lookup::RangeTable;

/// Sentinel id shared by the Unknown country, Unknown city and "no range"
/// visitor state. Present before any compaction runs so lookups can always
/// degrade to it instead of failing.
pub const UNKNOWN_ID: i64 = 0;
