//! Integration tests for the GeoIP range rebuild, containment lookups and
//! the post-refresh visitor relocation pass.

use weblytics::config::{
    Config, DedupPolicy, GeoPolicy, IdentityPolicy, RouteFilter, RouteGroupConfig, SuccessPolicy,
};
use weblytics::geo::{self, GeoRow};
use weblytics::ingest;
use weblytics::storage::SqliteStore;

const LINE: &str = "203.0.113.5 - - [10/Mar/2024:08:00:00 +0000] \
    \"GET /index.html HTTP/1.1\" 200 512 \"-\" \"Mozilla/5.0 (Linux; Android 10) Chrome/90.0\"";

/// 203.0.113.5 as an integer.
const TEST_IP: u32 = 3_405_803_781;

async fn store() -> SqliteStore {
    let store = SqliteStore::connect("sqlite::memory:", 1).await.unwrap();
    store.init().await.unwrap();
    store
}

fn config(geo: GeoPolicy) -> Config {
    Config {
        database_url: String::new(),
        identity: IdentityPolicy::default(),
        dedup: DedupPolicy::default(),
        success: SuccessPolicy::default(),
        geo,
        route_groups: RouteGroupConfig::default(),
        route_filter: RouteFilter::default(),
    }
}

fn row(low: u32, high: u32, code: &str, name: &str, region: &str, city: &str) -> GeoRow {
    GeoRow {
        low,
        high,
        country_code: code.to_string(),
        country_name: name.to_string(),
        region: region.to_string(),
        city: city.to_string(),
    }
}

/// Three-country feed: XX merges, DE stays at city granularity and covers
/// the test address, YY merges.
fn feed() -> Vec<GeoRow> {
    vec![
        row(0, 99, "XX", "Xanadu", "North", "Alpha"),
        row(100, 199, "XX", "Xanadu", "South", "Beta"),
        row(200, TEST_IP - 1, "YY", "Ypsilon", "East", "Gamma"),
        row(TEST_IP, TEST_IP + 250, "DE", "Germany", "Berlin", "Berlin"),
        row(TEST_IP + 251, u32::MAX, "YY", "Ypsilon", "West", "Delta"),
    ]
}

fn de_policy() -> GeoPolicy {
    GeoPolicy {
        track_location: true,
        cities_for_countries: vec!["DE".to_string()],
    }
}

#[tokio::test]
async fn import_merges_uninteresting_countries() {
    let store = store().await;
    let summary = geo::import_rows(&store, feed(), &de_policy()).await.unwrap();
    assert_eq!(summary.source_rows, 5);
    // XX merged, YY split by the DE row in between, DE kept.
    assert_eq!(summary.ranges, 4);

    let merged: (i64, i64, String) = sqlx::query_as(
        r#"
        SELECT ir.low, ir.high, c.name
        FROM ip_range ir JOIN city c ON c.city_id = ir.city_id
        ORDER BY ir.low LIMIT 1
        "#,
    )
    .fetch_one(store.pool())
    .await
    .unwrap();
    assert_eq!(merged, (0, 199, "City in Xanadu".to_string()));
}

#[tokio::test]
async fn import_creates_the_unknown_sentinels() {
    let store = store().await;
    geo::import_rows(&store, feed(), &de_policy()).await.unwrap();

    let country: (String, String) =
        sqlx::query_as("SELECT name, code FROM country WHERE country_id = 0")
            .fetch_one(store.pool())
            .await
            .unwrap();
    assert_eq!(country, ("Unknown".to_string(), "XX".to_string()));

    let city: String = sqlx::query_scalar("SELECT name FROM city WHERE city_id = 0")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(city, "Unknown");
}

#[tokio::test]
async fn reimport_rebuilds_instead_of_accumulating() {
    let store = store().await;
    geo::import_rows(&store, feed(), &de_policy()).await.unwrap();
    geo::import_rows(&store, feed(), &de_policy()).await.unwrap();

    let ranges: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ip_range")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(ranges, 4);
    // The sentinel, Berlin, and one synthetic city per merged country.
    let cities: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM city")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(cities, 4);
}

#[tokio::test]
async fn visitor_creation_resolves_its_range() {
    let store = store().await;
    geo::import_rows(&store, feed(), &de_policy()).await.unwrap();

    let config = config(de_policy());
    ingest::ingest_lines(&store, &config, [LINE]).await.unwrap();

    let city: String = sqlx::query_scalar(
        r#"
        SELECT c.name FROM visitor v
        JOIN ip_range ir ON ir.ip_range_id = v.ip_range_id
        JOIN city c ON c.city_id = ir.city_id
        "#,
    )
    .fetch_one(store.pool())
    .await
    .unwrap();
    assert_eq!(city, "Berlin");
}

#[tokio::test]
async fn location_tracking_disabled_leaves_the_unknown_range() {
    let store = store().await;
    geo::import_rows(&store, feed(), &de_policy()).await.unwrap();

    let config = config(GeoPolicy::default());
    ingest::ingest_lines(&store, &config, [LINE]).await.unwrap();

    let range_id: i64 = sqlx::query_scalar("SELECT ip_range_id FROM visitor")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(range_id, 0);
}

#[tokio::test]
async fn refresh_relocates_existing_visitors() {
    let store = store().await;

    // Visitor created before any GeoIP data exists.
    let config = config(de_policy());
    ingest::ingest_lines(&store, &config, [LINE]).await.unwrap();
    let before: i64 = sqlx::query_scalar("SELECT ip_range_id FROM visitor")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(before, 0, "no ranges yet, visitor starts Unknown");

    geo::import_rows(&store, feed(), &de_policy()).await.unwrap();
    let summary = geo::relocate_visitors(&store).await.unwrap();
    assert_eq!(summary.visitors, 1);
    assert_eq!(summary.located, 1);
    assert_eq!(summary.unresolved, 0);

    let city: String = sqlx::query_scalar(
        r#"
        SELECT c.name FROM visitor v
        JOIN ip_range ir ON ir.ip_range_id = v.ip_range_id
        JOIN city c ON c.city_id = ir.city_id
        "#,
    )
    .fetch_one(store.pool())
    .await
    .unwrap();
    assert_eq!(city, "Berlin");
}

#[tokio::test]
async fn hashed_visitors_fall_back_to_unknown_on_relocation() {
    let store = store().await;

    let mut config = config(GeoPolicy::default());
    config.identity.hash_ip = true;
    ingest::ingest_lines(&store, &config, [LINE]).await.unwrap();

    geo::import_rows(&store, feed(), &de_policy()).await.unwrap();
    let summary = geo::relocate_visitors(&store).await.unwrap();
    assert_eq!(summary.unresolved, 1);
    assert_eq!(summary.located, 0);

    let range_id: i64 = sqlx::query_scalar("SELECT ip_range_id FROM visitor")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(range_id, 0);
}

#[tokio::test]
async fn emitted_ranges_stay_disjoint_and_cover_the_feed() {
    let store = store().await;
    geo::import_rows(&store, feed(), &de_policy()).await.unwrap();

    let ranges: Vec<(i64, i64)> = sqlx::query_as("SELECT low, high FROM ip_range ORDER BY low")
        .fetch_all(store.pool())
        .await
        .unwrap();

    assert_eq!(ranges.first().unwrap().0, 0);
    assert_eq!(ranges.last().unwrap().1, i64::from(u32::MAX));
    for pair in ranges.windows(2) {
        assert_eq!(pair[0].1 + 1, pair[1].0, "no gaps, no overlap");
    }
}
