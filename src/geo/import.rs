//! GeoIP table rebuild
//!
//! Re-running an import is destructive: the previous ip_range/city/country
//! rows are dropped and rebuilt from the CSV feed, so range identifiers
//! are not stable across imports and every visitor's ip_range_id must be
//! recomputed afterward via [`relocate_visitors`].

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use sqlx::SqliteConnection;
use tracing::{info, warn};

use crate::config::GeoPolicy;
use crate::geo::compactor::{compact, GeoRow};
use crate::geo::lookup::{RangeEntry, RangeTable};
use crate::geo::UNKNOWN_ID;
use crate::storage::SqliteStore;

#[derive(Debug, Clone, Copy)]
pub struct ImportSummary {
    pub source_rows: usize,
    pub ranges: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct RelocateSummary {
    pub visitors: u64,
    /// Visitors that ended up in a real (non-Unknown) range.
    pub located: u64,
    /// Visitors whose stored key is not a raw address (hashed identity
    /// policy); their range is reset to Unknown.
    pub unresolved: u64,
}

/// Rebuild the range tables from a GeoIP city CSV file.
pub async fn import_csv(
    store: &SqliteStore,
    csv_path: &Path,
    policy: &GeoPolicy,
) -> Result<ImportSummary> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_path(csv_path)
        .with_context(|| format!("failed to open GeoIP CSV at {}", csv_path.display()))?;

    let mut rows = Vec::new();
    for record in reader.deserialize::<GeoRow>() {
        rows.push(record.context("malformed GeoIP CSV row")?);
    }
    import_rows(store, rows, policy).await
}

/// Rebuild the range tables from already-parsed rows.
///
/// Delete, sentinels and reinsert all happen in one transaction, so an
/// aborted import rolls back to the previous complete range set; VACUUM
/// runs after the commit.
pub async fn import_rows(
    store: &SqliteStore,
    rows: Vec<GeoRow>,
    policy: &GeoPolicy,
) -> Result<ImportSummary> {
    let interest: HashSet<String> = policy.cities_for_countries.iter().cloned().collect();
    let source_rows = rows.len();
    let ranges = compact(rows, &interest);

    let mut tx = store.pool().begin().await?;

    for table in ["ip_range", "city", "country"] {
        sqlx::query(&format!("DELETE FROM {table}"))
            .execute(&mut *tx)
            .await?;
    }

    // Sentinels first: any lookup miss degrades to id 0 instead of failing.
    sqlx::query("INSERT INTO country (country_id, name, code) VALUES (?, 'Unknown', 'XX')")
        .bind(UNKNOWN_ID)
        .execute(&mut *tx)
        .await?;
    sqlx::query("INSERT INTO city (city_id, name, region, country_id) VALUES (?, 'Unknown', 'Unknown', ?)")
        .bind(UNKNOWN_ID)
        .bind(UNKNOWN_ID)
        .execute(&mut *tx)
        .await?;

    for range in &ranges {
        let country_id =
            get_or_insert_country(&mut tx, &range.country_name, &range.country_code).await?;
        let city_id = get_or_insert_city(
            &mut tx,
            &range.city_name(),
            &range.region_name(),
            country_id,
        )
        .await?;
        sqlx::query("INSERT INTO ip_range (low, high, city_id) VALUES (?, ?, ?)")
            .bind(i64::from(range.low))
            .bind(i64::from(range.high))
            .bind(city_id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    store.vacuum().await?;

    info!(source_rows, ranges = ranges.len(), "rebuilt GeoIP range tables");
    Ok(ImportSummary {
        source_rows,
        ranges: ranges.len(),
    })
}

async fn get_or_insert_country(
    conn: &mut SqliteConnection,
    name: &str,
    code: &str,
) -> Result<i64> {
    sqlx::query("INSERT INTO country (name, code) VALUES (?, ?) ON CONFLICT(name) DO NOTHING")
        .bind(name)
        .bind(code)
        .execute(&mut *conn)
        .await?;
    let id = sqlx::query_scalar::<_, i64>("SELECT country_id FROM country WHERE name = ?")
        .bind(name)
        .fetch_one(conn)
        .await?;
    Ok(id)
}

async fn get_or_insert_city(
    conn: &mut SqliteConnection,
    name: &str,
    region: &str,
    country_id: i64,
) -> Result<i64> {
    sqlx::query(
        r#"
        INSERT INTO city (name, region, country_id) VALUES (?, ?, ?)
        ON CONFLICT(name, region, country_id) DO NOTHING
        "#,
    )
    .bind(name)
    .bind(region)
    .bind(country_id)
    .execute(&mut *conn)
    .await?;
    let id = sqlx::query_scalar::<_, i64>(
        "SELECT city_id FROM city WHERE name = ? AND region = ? AND country_id = ?",
    )
    .bind(name)
    .bind(region)
    .bind(country_id)
    .fetch_one(conn)
    .await?;
    Ok(id)
}

/// Load the full range table for batch lookups.
pub async fn load_range_table(store: &SqliteStore) -> Result<RangeTable> {
    let rows = sqlx::query_as::<_, (i64, i64, i64)>("SELECT ip_range_id, low, high FROM ip_range")
        .fetch_all(store.pool())
        .await?;
    let entries = rows
        .into_iter()
        .map(|(range_id, low, high)| RangeEntry {
            range_id,
            low: low as u32,
            high: high as u32,
        })
        .collect();
    Ok(RangeTable::new(entries))
}

/// Single containment query against the store, for visitor creation time.
///
/// Uses the index on `low` instead of a full BETWEEN scan; the candidate
/// with the greatest lower bound at or below `ip` is the only range that
/// can contain it, since ranges never overlap.
pub async fn find_range_id(conn: &mut SqliteConnection, ip: u32) -> Result<i64> {
    let candidate = sqlx::query_as::<_, (i64, i64)>(
        "SELECT ip_range_id, high FROM ip_range WHERE low <= ? ORDER BY low DESC LIMIT 1",
    )
    .bind(i64::from(ip))
    .fetch_optional(conn)
    .await?;
    Ok(match candidate {
        Some((range_id, high)) if i64::from(ip) <= high => range_id,
        _ => UNKNOWN_ID,
    })
}

/// Recompute every visitor's ip_range_id against the current range table.
///
/// Keys stored under the hashed identity policy cannot be mapped back to
/// an address; those visitors fall back to Unknown.
pub async fn relocate_visitors(store: &SqliteStore) -> Result<RelocateSummary> {
    let table = load_range_table(store).await?;
    let visitors = sqlx::query_as::<_, (i64, String)>("SELECT visitor_id, ip_key FROM visitor")
        .fetch_all(store.pool())
        .await?;

    let mut summary = RelocateSummary {
        visitors: visitors.len() as u64,
        located: 0,
        unresolved: 0,
    };

    let mut tx = store.pool().begin().await?;
    for (visitor_id, ip_key) in &visitors {
        let range_id = match ip_key.parse::<u32>() {
            Ok(ip) => table.lookup(ip),
            Err(_) => {
                summary.unresolved += 1;
                UNKNOWN_ID
            }
        };
        if range_id != UNKNOWN_ID {
            summary.located += 1;
        }
        sqlx::query("UPDATE visitor SET ip_range_id = ? WHERE visitor_id = ?")
            .bind(range_id)
            .bind(visitor_id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    if summary.unresolved > 0 {
        warn!(
            unresolved = summary.unresolved,
            "hashed visitor keys cannot be relocated; reset to Unknown"
        );
    }
    info!(
        visitors = summary.visitors,
        located = summary.located,
        "relocated visitors after GeoIP refresh"
    );
    Ok(summary)
}
