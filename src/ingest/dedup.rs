//! Duplicate-request suppression

use anyhow::Result;
use sqlx::SqliteConnection;

use crate::config::DedupPolicy;
use crate::parser::Request;
use crate::storage::sqlite::request_in_window;

/// Suppresses a request when an equivalent one from the same visitor to
/// the same route group already sits inside the configured window.
pub struct RequestDeduplicator<'a> {
    policy: &'a DedupPolicy,
}

impl<'a> RequestDeduplicator<'a> {
    pub fn new(policy: &'a DedupPolicy) -> Self {
        Self { policy }
    }

    pub async fn is_duplicate(
        &self,
        conn: &mut SqliteConnection,
        request: &Request,
        visitor_id: i64,
        group_id: i64,
    ) -> Result<bool> {
        if !self.policy.enabled {
            return Ok(false);
        }
        let (low, high) = self.policy.bounds(request.timestamp);
        request_in_window(conn, visitor_id, group_id, low, high).await
    }
}
