//! Human/bot classification

use anyhow::Result;
use sqlx::SqliteConnection;
use tracing::warn;

use crate::classifier::{is_known_browser, is_known_platform};
use crate::config::SuccessPolicy;
use crate::storage::sqlite::{has_successful_request, set_human, visitor_profile};

/// Decides and persists whether a visitor is human.
///
/// A visitor is human iff both platform and browser were detected (drawn
/// from the supported lists) and, under `require_success`, at least one of
/// its persisted requests succeeded. The flag is monotonic: once set it is
/// never cleared, and re-running the classifier on a human visitor is a
/// no-op.
pub struct HumanClassifier<'a> {
    policy: &'a SuccessPolicy,
}

impl<'a> HumanClassifier<'a> {
    pub fn new(policy: &'a SuccessPolicy) -> Self {
        Self { policy }
    }

    pub async fn classify_and_persist(
        &self,
        conn: &mut SqliteConnection,
        visitor_id: i64,
    ) -> Result<bool> {
        let Some(profile) = visitor_profile(conn, visitor_id).await? else {
            warn!(visitor_id, "cannot classify missing visitor");
            return Ok(false);
        };
        if profile.is_human {
            return Ok(true);
        }
        if !is_known_platform(&profile.platform) || !is_known_browser(&profile.browser) {
            return Ok(false);
        }
        if self.policy.require_success {
            let threshold = self.policy.success_threshold();
            if !has_successful_request(conn, visitor_id, threshold).await? {
                return Ok(false);
            }
        }
        set_human(conn, visitor_id).await?;
        Ok(true)
    }
}
