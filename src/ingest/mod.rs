//! Batch ingestion
//!
//! One log file is one unit of work: lines are parsed up front, then every
//! persistence step for the batch runs inside a single transaction so the
//! reported counters always match the stored rows.

pub mod dedup;
pub mod human;
pub mod resolver;

pub use dedup::RequestDeduplicator;
pub use human::HumanClassifier;
pub use resolver::VisitorResolver;

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::classifier;
use crate::config::Config;
use crate::parser;
use crate::storage::dict::{self, Dict};
use crate::storage::sqlite::{self, NewRequest};
use crate::storage::SqliteStore;

#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct IngestSummary {
    /// Lines that parsed into requests.
    pub parsed_lines: usize,
    /// Lines skipped as unparseable.
    pub skipped_lines: usize,
    /// Requests dropped by the route blacklist/whitelist.
    pub filtered_requests: usize,
    pub requests_added: u64,
    pub duplicate_requests: u64,
    /// Distinct visitors that appeared in the batch, new or returning.
    pub visitors_seen: usize,
    pub visitors_created: usize,
}

pub async fn ingest_file(
    store: &SqliteStore,
    config: &Config,
    log_path: &Path,
) -> Result<IngestSummary> {
    let text = tokio::fs::read_to_string(log_path)
        .await
        .with_context(|| format!("failed to read access log at {}", log_path.display()))?;
    ingest_lines(store, config, text.lines()).await
}

pub async fn ingest_lines<'a, I>(
    store: &SqliteStore,
    config: &Config,
    lines: I,
) -> Result<IngestSummary>
where
    I: IntoIterator<Item = &'a str>,
{
    let (requests, skipped_lines) = parser::parse_lines(lines);

    let resolver = VisitorResolver::new(&config.identity, &config.geo);
    let deduplicator = RequestDeduplicator::new(&config.dedup);
    let human = HumanClassifier::new(&config.success);

    let mut summary = IngestSummary {
        parsed_lines: requests.len(),
        skipped_lines,
        ..IngestSummary::default()
    };
    let mut seen: HashSet<i64> = HashSet::new();
    let mut first_seen: Vec<i64> = Vec::new();

    let mut tx = store.pool().begin().await?;

    for request in &requests {
        if !config.route_filter.allows(&request.route) {
            summary.filtered_requests += 1;
            continue;
        }

        let client = classifier::classify(&request.user_agent);
        let Some((visitor_id, is_new)) = resolver
            .resolve(&mut tx, request, &client, true)
            .await?
        else {
            // Unreachable with allow_create = true; kept for the contract.
            continue;
        };
        seen.insert(visitor_id);
        if is_new {
            first_seen.push(visitor_id);
        }

        let referer_id = dict::get_or_insert(&mut tx, Dict::Referer, &request.referer).await?;
        let (route_id, group_id) =
            sqlite::resolve_route_group(&mut tx, &request.route, &config.route_groups).await?;

        if deduplicator
            .is_duplicate(&mut tx, request, visitor_id, group_id)
            .await?
        {
            summary.duplicate_requests += 1;
            continue;
        }

        sqlite::insert_request(
            &mut tx,
            &NewRequest {
                visitor_id,
                route_id,
                group_id,
                time: request.timestamp,
                referer_id,
                status: request.http_status,
            },
        )
        .await?;
        summary.requests_added += 1;
    }

    // Human classification runs after the batch's requests are persisted:
    // the criterion may need a successful request that only just arrived.
    for visitor_id in &first_seen {
        human.classify_and_persist(&mut tx, *visitor_id).await?;
    }

    tx.commit().await?;

    summary.visitors_seen = seen.len();
    summary.visitors_created = first_seen.len();
    info!(
        requests_added = summary.requests_added,
        visitors_seen = summary.visitors_seen,
        visitors_created = summary.visitors_created,
        duplicates = summary.duplicate_requests,
        skipped_lines = summary.skipped_lines,
        "collection finished"
    );
    Ok(summary)
}
