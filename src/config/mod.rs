use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Runtime configuration, assembled from environment variables.
///
/// Each pipeline component receives only the policy struct it needs;
/// there is no process-wide mutable settings object.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub identity: IdentityPolicy,
    pub dedup: DedupPolicy,
    pub success: SuccessPolicy,
    pub geo: GeoPolicy,
    pub route_groups: RouteGroupConfig,
    pub route_filter: RouteFilter,
}

/// How a request maps to a visitor identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityPolicy {
    pub key: IdentityKey,
    /// Store sha256(ip) instead of the raw address. A privacy knob, not a
    /// security boundary: the comparison key simply becomes the digest.
    pub hash_ip: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKey {
    /// One visitor per source IP.
    IpOnly,
    /// Distinguishes clients behind a shared IP/NAT by browser and platform.
    IpBrowserPlatform,
}

impl Default for IdentityPolicy {
    fn default() -> Self {
        Self {
            key: IdentityKey::IpOnly,
            hash_ip: false,
        }
    }
}

/// Duplicate-request suppression window.
///
/// A request is a duplicate iff the policy is enabled and a persisted
/// request from the same visitor to the same route group has a timestamp
/// within `[t - window_secs, t + window_secs]`. With `window_secs = 0` the
/// window degenerates to exact-timestamp matching; "no dedup at all" is
/// expressed by `enabled = false`, never by the window size.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DedupPolicy {
    pub enabled: bool,
    pub window_secs: u32,
}

impl DedupPolicy {
    /// Inclusive timestamp bounds of the window around `timestamp`.
    pub fn bounds(&self, timestamp: i64) -> (i64, i64) {
        let w = i64::from(self.window_secs);
        (timestamp.saturating_sub(w), timestamp.saturating_add(w))
    }
}

/// What counts as a successful request for human classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessPolicy {
    /// Require at least one successful request before a visitor can be
    /// classified human.
    pub require_success: bool,
    /// Success is `status < 400` when true (redirects count), `status < 300`
    /// when false.
    pub redirects_are_success: bool,
}

impl SuccessPolicy {
    pub fn success_threshold(&self) -> u16 {
        if self.redirects_are_success {
            400
        } else {
            300
        }
    }
}

impl Default for SuccessPolicy {
    fn default() -> Self {
        Self {
            require_success: true,
            redirects_are_success: true,
        }
    }
}

/// Geolocation behavior.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeoPolicy {
    /// Resolve an IP range for each visitor at creation time.
    pub track_location: bool,
    /// Country codes kept at city granularity on GeoIP import; ranges for
    /// all other countries are merged into one synthetic range per country.
    pub cities_for_countries: Vec<String>,
}

impl GeoPolicy {
    pub fn wants_city_granularity(&self, country_code: &str) -> bool {
        self.cities_for_countries.iter().any(|c| c == country_code)
    }
}

/// Static route-to-group assignments plus automatic grouping by extension.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteGroupConfig {
    /// Named groups and their member routes.
    pub groups: Vec<(String, Vec<String>)>,
    /// File extensions that become their own group ("css", "png", ...).
    pub auto_group_extensions: Vec<String>,
}

impl RouteGroupConfig {
    /// Parse the compact `"name1: r1, r2; name2: r3"` form.
    pub fn parse_groups(raw: &str) -> Result<Vec<(String, Vec<String>)>> {
        let mut groups = Vec::new();
        for part in raw.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let Some((name, members)) = part.split_once(':') else {
                bail!("route group {part:?} is missing ': members'");
            };
            let name = name.trim();
            if name.is_empty() {
                bail!("route group {part:?} has an empty name");
            }
            let members: Vec<String> = members
                .split(',')
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .collect();
            groups.push((name.to_string(), members));
        }
        Ok(groups)
    }
}

/// Optional allow/deny patterns applied to the route before ingestion.
#[derive(Debug, Clone, Default)]
pub struct RouteFilter {
    pub blacklist: Option<Regex>,
    pub whitelist: Option<Regex>,
}

impl RouteFilter {
    /// A route passes when it matches no blacklist pattern and, if a
    /// whitelist is set, matches it.
    pub fn allows(&self, route: &str) -> bool {
        if let Some(black) = &self.blacklist {
            if black.is_match(route) {
                return false;
            }
        }
        if let Some(white) = &self.whitelist {
            return white.is_match(route);
        }
        true
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("WEBLYTICS_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./weblytics.db".to_string());

        let key = if env_bool("WEBLYTICS_UNIQUE_VISITOR_IS_IP", true) {
            IdentityKey::IpOnly
        } else {
            IdentityKey::IpBrowserPlatform
        };
        let identity = IdentityPolicy {
            key,
            hash_ip: env_bool("WEBLYTICS_HASH_IP", false),
        };

        let dedup = DedupPolicy {
            enabled: env_bool("WEBLYTICS_DEDUP_ENABLED", false),
            window_secs: env_parse("WEBLYTICS_DEDUP_WINDOW_SECS", 0u32)?,
        };

        let success = SuccessPolicy {
            require_success: env_bool("WEBLYTICS_HUMAN_NEEDS_SUCCESS", true),
            redirects_are_success: env_bool("WEBLYTICS_REDIRECTS_ARE_SUCCESS", true),
        };

        let geo = GeoPolicy {
            track_location: env_bool("WEBLYTICS_TRACK_LOCATION", false),
            cities_for_countries: env_list("WEBLYTICS_CITIES_FOR_COUNTRIES"),
        };

        let route_groups = RouteGroupConfig {
            groups: match std::env::var("WEBLYTICS_ROUTE_GROUPS") {
                Ok(raw) => RouteGroupConfig::parse_groups(&raw)
                    .context("WEBLYTICS_ROUTE_GROUPS is malformed")?,
                Err(_) => Vec::new(),
            },
            auto_group_extensions: env_list("WEBLYTICS_AUTO_GROUP_EXTENSIONS"),
        };

        let route_filter = RouteFilter {
            blacklist: env_regex("WEBLYTICS_ROUTE_BLACKLIST")?,
            whitelist: env_regex("WEBLYTICS_ROUTE_WHITELIST")?,
        };

        Ok(Config {
            database_url,
            identity,
            dedup,
            success,
            geo,
            route_groups,
            route_filter,
        })
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(v) => v.parse().with_context(|| format!("invalid {name}: {v:?}")),
        Err(_) => Ok(default),
    }
}

fn env_list(name: &str) -> Vec<String> {
    std::env::var(name)
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn env_regex(name: &str) -> Result<Option<Regex>> {
    match std::env::var(name) {
        Ok(v) if !v.is_empty() => {
            let re = Regex::new(&v).with_context(|| format!("invalid pattern in {name}"))?;
            Ok(Some(re))
        }
        _ => Ok(None),
    }
}
