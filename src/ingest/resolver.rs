//! Visitor identity resolution

use anyhow::Result;
use sha2::{Digest, Sha256};
use sqlx::SqliteConnection;

use crate::classifier::ClientInfo;
use crate::config::{GeoPolicy, IdentityKey, IdentityPolicy};
use crate::geo::import::find_range_id;
use crate::geo::UNKNOWN_ID;
use crate::parser::Request;
use crate::storage::dict::{self, Dict};
use crate::storage::sqlite::{find_visitor, insert_visitor, NewVisitor, VisitorKey};

/// Maps requests to durable visitor identities under a configured key.
pub struct VisitorResolver<'a> {
    identity: &'a IdentityPolicy,
    geo: &'a GeoPolicy,
}

impl<'a> VisitorResolver<'a> {
    pub fn new(identity: &'a IdentityPolicy, geo: &'a GeoPolicy) -> Self {
        Self { identity, geo }
    }

    /// Resolve `request` to `(visitor_id, is_new)`.
    ///
    /// Returns `None` when no visitor matches and creation is disallowed.
    /// `is_new` is true only for a genuinely first-seen visitor, so
    /// downstream human classification runs once per identity, not once
    /// per request.
    pub async fn resolve(
        &self,
        conn: &mut SqliteConnection,
        request: &Request,
        client: &ClientInfo,
        allow_create: bool,
    ) -> Result<Option<(i64, bool)>> {
        let ip_key = self.ip_key(request.source_ip);

        // Browser/platform ids participate in the key only under the
        // composite policy. Without create rights, a missing dictionary
        // entry already means no visitor can match.
        let (key_browser, key_platform) = match self.identity.key {
            IdentityKey::IpOnly => (None, None),
            IdentityKey::IpBrowserPlatform if allow_create => (
                Some(dict::get_or_insert(conn, Dict::Browser, &client.browser).await?),
                Some(dict::get_or_insert(conn, Dict::Platform, &client.platform).await?),
            ),
            IdentityKey::IpBrowserPlatform => {
                let browser = dict::lookup_id(conn, Dict::Browser, &client.browser).await?;
                let platform = dict::lookup_id(conn, Dict::Platform, &client.platform).await?;
                match (browser, platform) {
                    (Some(b), Some(p)) => (Some(b), Some(p)),
                    _ => return Ok(None),
                }
            }
        };

        let key = VisitorKey {
            ip_key: ip_key.clone(),
            browser_id: key_browser,
            platform_id: key_platform,
        };
        if let Some(visitor_id) = find_visitor(conn, &key).await? {
            return Ok(Some((visitor_id, false)));
        }
        if !allow_create {
            return Ok(None);
        }

        // The row always stores the detected client, whatever the key policy.
        let browser_id = match key_browser {
            Some(id) => id,
            None => dict::get_or_insert(conn, Dict::Browser, &client.browser).await?,
        };
        let platform_id = match key_platform {
            Some(id) => id,
            None => dict::get_or_insert(conn, Dict::Platform, &client.platform).await?,
        };
        let ip_range_id = if self.geo.track_location {
            find_range_id(conn, request.source_ip).await?
        } else {
            UNKNOWN_ID
        };

        let visitor_id = insert_visitor(
            conn,
            &NewVisitor {
                ip_key,
                platform_id,
                browser_id,
                is_mobile: client.is_mobile,
                ip_range_id,
            },
        )
        .await?;
        Ok(Some((visitor_id, true)))
    }

    /// The stored comparison key for an address: its decimal form, or the
    /// sha256 digest of that form under the hashing policy.
    fn ip_key(&self, ip: u32) -> String {
        let decimal = ip.to_string();
        if self.identity.hash_ip {
            hex::encode(Sha256::digest(decimal.as_bytes()))
        } else {
            decimal
        }
    }
}
