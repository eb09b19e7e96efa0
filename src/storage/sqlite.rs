use anyhow::{Context, Result};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{SqliteConnection, SqlitePool};

use crate::config::RouteGroupConfig;

/// The embedded relational store.
///
/// Pool-level operations (schema init, vacuum) live on the struct; the
/// per-row helpers below take a `&mut SqliteConnection` so a whole ingest
/// batch composes into one transaction.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .with_context(|| format!("failed to open store at {database_url}"))?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS visitor (
                visitor_id INTEGER PRIMARY KEY AUTOINCREMENT,
                ip_key TEXT NOT NULL,
                platform_id INTEGER NOT NULL,
                browser_id INTEGER NOT NULL,
                is_mobile INTEGER NOT NULL DEFAULT 0,
                is_human INTEGER NOT NULL DEFAULT 0,
                ip_range_id INTEGER NOT NULL DEFAULT 0,
                UNIQUE(ip_key, browser_id, platform_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_visitor_ip_key ON visitor(ip_key)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS request (
                request_id INTEGER PRIMARY KEY AUTOINCREMENT,
                visitor_id INTEGER NOT NULL,
                route_id INTEGER NOT NULL,
                group_id INTEGER NOT NULL,
                time INTEGER NOT NULL,
                referer_id INTEGER NOT NULL,
                status INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_request_dedup ON request(visitor_id, group_id, time)",
        )
        .execute(&self.pool)
        .await?;

        for table in ["platform", "browser", "referer"] {
            sqlx::query(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    {table}_id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL UNIQUE
                )
                "#
            ))
            .execute(&self.pool)
            .await?;
        }

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS route_group (
                group_id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS route (
                route_id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                group_id INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS country (
                country_id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                code TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS city (
                city_id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                region TEXT NOT NULL,
                country_id INTEGER NOT NULL,
                UNIQUE(name, region, country_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ip_range (
                ip_range_id INTEGER PRIMARY KEY AUTOINCREMENT,
                low INTEGER NOT NULL,
                high INTEGER NOT NULL,
                city_id INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_ip_range_low ON ip_range(low)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Reclaim space after a destructive rebuild. SQLite refuses VACUUM
    /// inside a transaction, so this runs on its own after the commit.
    pub async fn vacuum(&self) -> Result<()> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }
}

/// Identity-key fields a visitor lookup matches on. The browser/platform
/// parts are only present under the composite identity policy.
#[derive(Debug, Clone)]
pub struct VisitorKey {
    pub ip_key: String,
    pub browser_id: Option<i64>,
    pub platform_id: Option<i64>,
}

pub async fn find_visitor(conn: &mut SqliteConnection, key: &VisitorKey) -> Result<Option<i64>> {
    let id = match (key.browser_id, key.platform_id) {
        (Some(browser_id), Some(platform_id)) => {
            sqlx::query_scalar::<_, i64>(
                r#"
                SELECT visitor_id FROM visitor
                WHERE ip_key = ? AND browser_id = ? AND platform_id = ?
                "#,
            )
            .bind(&key.ip_key)
            .bind(browser_id)
            .bind(platform_id)
            .fetch_optional(conn)
            .await?
        }
        _ => {
            sqlx::query_scalar::<_, i64>("SELECT visitor_id FROM visitor WHERE ip_key = ?")
                .bind(&key.ip_key)
                .fetch_optional(conn)
                .await?
        }
    };
    Ok(id)
}

#[derive(Debug, Clone)]
pub struct NewVisitor {
    pub ip_key: String,
    pub platform_id: i64,
    pub browser_id: i64,
    pub is_mobile: bool,
    pub ip_range_id: i64,
}

pub async fn insert_visitor(conn: &mut SqliteConnection, visitor: &NewVisitor) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO visitor (ip_key, platform_id, browser_id, is_mobile, is_human, ip_range_id)
        VALUES (?, ?, ?, ?, 0, ?)
        "#,
    )
    .bind(&visitor.ip_key)
    .bind(visitor.platform_id)
    .bind(visitor.browser_id)
    .bind(visitor.is_mobile)
    .bind(visitor.ip_range_id)
    .execute(conn)
    .await?;
    Ok(result.last_insert_rowid())
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct VisitorProfile {
    pub platform: String,
    pub browser: String,
    pub is_human: bool,
}

pub async fn visitor_profile(
    conn: &mut SqliteConnection,
    visitor_id: i64,
) -> Result<Option<VisitorProfile>> {
    let profile = sqlx::query_as::<_, VisitorProfile>(
        r#"
        SELECT p.name AS platform, b.name AS browser, v.is_human
        FROM visitor v
        JOIN platform p ON p.platform_id = v.platform_id
        JOIN browser b ON b.browser_id = v.browser_id
        WHERE v.visitor_id = ?
        "#,
    )
    .bind(visitor_id)
    .fetch_optional(conn)
    .await?;
    Ok(profile)
}

/// Set is_human. Monotonic: there is deliberately no way to clear it.
pub async fn set_human(conn: &mut SqliteConnection, visitor_id: i64) -> Result<()> {
    sqlx::query("UPDATE visitor SET is_human = 1 WHERE visitor_id = ?")
        .bind(visitor_id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn has_successful_request(
    conn: &mut SqliteConnection,
    visitor_id: i64,
    success_threshold: u16,
) -> Result<bool> {
    let exists = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM request WHERE visitor_id = ? AND status < ?)",
    )
    .bind(visitor_id)
    .bind(i64::from(success_threshold))
    .fetch_one(conn)
    .await?;
    Ok(exists)
}

/// Whether a persisted request from `visitor_id` to `group_id` exists with
/// a timestamp in the inclusive `[low, high]` window.
pub async fn request_in_window(
    conn: &mut SqliteConnection,
    visitor_id: i64,
    group_id: i64,
    low: i64,
    high: i64,
) -> Result<bool> {
    let exists = sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM request
            WHERE visitor_id = ? AND group_id = ? AND time BETWEEN ? AND ?
        )
        "#,
    )
    .bind(visitor_id)
    .bind(group_id)
    .bind(low)
    .bind(high)
    .fetch_one(conn)
    .await?;
    Ok(exists)
}

#[derive(Debug, Clone)]
pub struct NewRequest {
    pub visitor_id: i64,
    pub route_id: i64,
    pub group_id: i64,
    pub time: i64,
    pub referer_id: i64,
    pub status: u16,
}

pub async fn insert_request(conn: &mut SqliteConnection, request: &NewRequest) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO request (visitor_id, route_id, group_id, time, referer_id, status)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(request.visitor_id)
    .bind(request.route_id)
    .bind(request.group_id)
    .bind(request.time)
    .bind(request.referer_id)
    .bind(i64::from(request.status))
    .execute(conn)
    .await?;
    Ok(())
}

/// Seed the configured route groups and pin their member routes, so that
/// later auto-resolution finds them. Safe to re-run; membership updates in
/// place.
pub async fn apply_route_groups(
    conn: &mut SqliteConnection,
    config: &RouteGroupConfig,
) -> Result<()> {
    for (group_name, members) in &config.groups {
        let group_id = get_or_insert_group(conn, group_name).await?;
        for route in members {
            sqlx::query(
                r#"
                INSERT INTO route (name, group_id) VALUES (?, ?)
                ON CONFLICT(name) DO UPDATE SET group_id = excluded.group_id
                "#,
            )
            .bind(route)
            .bind(group_id)
            .execute(&mut *conn)
            .await?;
        }
    }
    Ok(())
}

/// Resolve a route to its (route_id, group_id), creating rows as needed.
///
/// Resolution order: an existing route keeps its group; otherwise the
/// route's file extension names the group when it is one of the configured
/// auto-group extensions; otherwise the route gets a group of its own,
/// named after itself.
pub async fn resolve_route_group(
    conn: &mut SqliteConnection,
    route: &str,
    config: &RouteGroupConfig,
) -> Result<(i64, i64)> {
    let existing = sqlx::query_as::<_, (i64, i64)>(
        "SELECT route_id, group_id FROM route WHERE name = ?",
    )
    .bind(route)
    .fetch_optional(&mut *conn)
    .await?;
    if let Some(found) = existing {
        return Ok(found);
    }

    let group_name = match route.rsplit_once('.') {
        Some((_, ext)) if config.auto_group_extensions.iter().any(|e| e == ext) => ext,
        _ => route,
    };
    let group_id = get_or_insert_group(conn, group_name).await?;

    let result = sqlx::query("INSERT INTO route (name, group_id) VALUES (?, ?)")
        .bind(route)
        .bind(group_id)
        .execute(conn)
        .await?;
    Ok((result.last_insert_rowid(), group_id))
}

async fn get_or_insert_group(conn: &mut SqliteConnection, name: &str) -> Result<i64> {
    sqlx::query("INSERT INTO route_group (name) VALUES (?) ON CONFLICT(name) DO NOTHING")
        .bind(name)
        .execute(&mut *conn)
        .await?;
    let id = sqlx::query_scalar::<_, i64>("SELECT group_id FROM route_group WHERE name = ?")
        .bind(name)
        .fetch_one(conn)
        .await?;
    Ok(id)
}
