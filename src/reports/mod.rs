//! Collaborator-facing aggregation queries
//!
//! Ranked `(label, count)` lists and per-day/per-month counts, produced by
//! plain aggregation over the store. Rendering (charts, templates) is out
//! of scope; callers consume the tuples.

use anyhow::Result;
use serde::Serialize;
use sqlx::SqlitePool;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct RankedEntry {
    pub label: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PeriodCounts {
    /// `YYYY-MM-DD` for daily, `YYYY-MM` for monthly.
    pub period: String,
    pub visitors: i64,
    pub requests: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ranking {
    /// Route groups, by request count.
    Routes,
    /// Referers, by request count.
    Referers,
    /// Platforms, by visitor count.
    Platforms,
    /// Browsers, by visitor count.
    Browsers,
    /// Cities, by visitor count (via the visitor's IP range).
    Cities,
    /// Countries, by visitor count.
    Countries,
}

impl Ranking {
    pub fn label(self) -> &'static str {
        match self {
            Ranking::Routes => "routes",
            Ranking::Referers => "referers",
            Ranking::Platforms => "platforms",
            Ranking::Browsers => "browsers",
            Ranking::Cities => "cities",
            Ranking::Countries => "countries",
        }
    }

    /// The SELECT for this ranking. `human_only` narrows every variant to
    /// visitors already classified human, which is how bot noise stays out
    /// of the published rankings.
    fn query(self, human_only: bool) -> String {
        let human_filter = if human_only { "WHERE v.is_human = 1" } else { "" };
        match self {
            Ranking::Routes => format!(
                r#"
                SELECT rg.name AS label, COUNT(*) AS count
                FROM request r
                JOIN route_group rg ON rg.group_id = r.group_id
                JOIN visitor v ON v.visitor_id = r.visitor_id
                {human_filter}
                GROUP BY rg.name
                ORDER BY count DESC, label
                LIMIT ?
                "#
            ),
            Ranking::Referers => format!(
                r#"
                SELECT rf.name AS label, COUNT(*) AS count
                FROM request r
                JOIN referer rf ON rf.referer_id = r.referer_id
                JOIN visitor v ON v.visitor_id = r.visitor_id
                {human_filter}
                GROUP BY rf.name
                ORDER BY count DESC, label
                LIMIT ?
                "#
            ),
            Ranking::Platforms => format!(
                r#"
                SELECT p.name AS label, COUNT(*) AS count
                FROM visitor v
                JOIN platform p ON p.platform_id = v.platform_id
                {human_filter}
                GROUP BY p.name
                ORDER BY count DESC, label
                LIMIT ?
                "#
            ),
            Ranking::Browsers => format!(
                r#"
                SELECT b.name AS label, COUNT(*) AS count
                FROM visitor v
                JOIN browser b ON b.browser_id = v.browser_id
                {human_filter}
                GROUP BY b.name
                ORDER BY count DESC, label
                LIMIT ?
                "#
            ),
            Ranking::Cities => format!(
                r#"
                SELECT COALESCE(c.name, 'Unknown') AS label, COUNT(*) AS count
                FROM visitor v
                LEFT JOIN ip_range ir ON ir.ip_range_id = v.ip_range_id
                LEFT JOIN city c ON c.city_id = ir.city_id
                {human_filter}
                GROUP BY label
                ORDER BY count DESC, label
                LIMIT ?
                "#
            ),
            Ranking::Countries => format!(
                r#"
                SELECT COALESCE(co.name, 'Unknown') AS label, COUNT(*) AS count
                FROM visitor v
                LEFT JOIN ip_range ir ON ir.ip_range_id = v.ip_range_id
                LEFT JOIN city c ON c.city_id = ir.city_id
                LEFT JOIN country co ON co.country_id = c.country_id
                {human_filter}
                GROUP BY label
                ORDER BY count DESC, label
                LIMIT ?
                "#
            ),
        }
    }
}

pub async fn ranking(
    pool: &SqlitePool,
    which: Ranking,
    human_only: bool,
    limit: i64,
) -> Result<Vec<RankedEntry>> {
    let entries = sqlx::query_as::<_, RankedEntry>(&which.query(human_only))
        .bind(limit)
        .fetch_all(pool)
        .await?;
    Ok(entries)
}

pub async fn daily_counts(pool: &SqlitePool) -> Result<Vec<PeriodCounts>> {
    let rows = sqlx::query_as::<_, PeriodCounts>(
        r#"
        SELECT DATE(time, 'unixepoch') AS period,
               COUNT(DISTINCT visitor_id) AS visitors,
               COUNT(*) AS requests
        FROM request
        GROUP BY period
        ORDER BY period
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn monthly_counts(pool: &SqlitePool) -> Result<Vec<PeriodCounts>> {
    let rows = sqlx::query_as::<_, PeriodCounts>(
        r#"
        SELECT STRFTIME('%Y-%m', time, 'unixepoch') AS period,
               COUNT(DISTINCT visitor_id) AS visitors,
               COUNT(*) AS requests
        FROM request
        GROUP BY period
        ORDER BY period
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
