//! User-agent classification
//!
//! Maps a raw user-agent string to a detected platform, browser and mobile
//! flag using ordered substring precedence lists. Pure functions, no I/O.

/// Detectable platforms, most specific first.
///
/// Order matters: Android user agents also contain "Linux", so "Android"
/// must be checked before "Linux".
pub const PLATFORMS: [&str; 11] = [
    "Windows",
    "Android",
    "Linux",
    "iPhone",
    "iPad",
    "Mac",
    "BSD",
    "CrOS",
    "PlayStation",
    "Xbox",
    "Nintendo Switch",
];

/// Detectable browsers, specific vendors first.
///
/// Several user agents advertise multiple engines (Edge contains "Chrome"
/// and "Safari", Chrome contains "Safari", SeaMonkey and Waterfox contain
/// "Firefox"), so the generic entries must stay at the end of the list.
pub const BROWSERS: [&str; 15] = [
    "DuckDuckGo",
    "SeaMonkey",
    "Waterfox",
    "Vivaldi",
    "Yandex",
    "Brave",
    "SamsungBrowser",
    "Lynx",
    "Epiphany",
    "Firefox",
    "Opera",
    "Edg",
    "Chromium",
    "Chrome",
    "Safari",
];

/// What the classifier could read out of a user-agent string.
///
/// `platform` and `browser` are empty strings when nothing matched; that is
/// a valid outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub platform: String,
    pub browser: String,
    pub is_mobile: bool,
}

/// Classify a user-agent string.
///
/// `is_mobile` is true iff the substring "Mobi" occurs anywhere in the
/// user agent. This is a deliberately crude heuristic kept for parity with
/// what desktop browsers actually send; do not refine it per-vendor.
pub fn classify(user_agent: &str) -> ClientInfo {
    ClientInfo {
        platform: first_match(user_agent, &PLATFORMS),
        browser: first_match(user_agent, &BROWSERS),
        is_mobile: user_agent.contains("Mobi"),
    }
}

fn first_match(user_agent: &str, candidates: &[&str]) -> String {
    candidates
        .iter()
        .find(|c| user_agent.contains(*c))
        .map(|c| c.to_string())
        .unwrap_or_default()
}

/// Whether `name` is one of the platforms the classifier can emit.
pub fn is_known_platform(name: &str) -> bool {
    PLATFORMS.contains(&name)
}

/// Whether `name` is one of the browsers the classifier can emit.
pub fn is_known_browser(name: &str) -> bool {
    BROWSERS.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn android_takes_precedence_over_linux() {
        let info = classify("Mozilla/5.0 (Linux; Android 10; Pixel 3)");
        assert_eq!(info.platform, "Android");
    }

    #[test]
    fn chrome_takes_precedence_over_safari() {
        let info = classify("Mozilla/5.0 AppleWebKit/537.36 Chrome/90.0 Safari/537.36");
        assert_eq!(info.browser, "Chrome");
    }

    #[test]
    fn edge_takes_precedence_over_chrome_and_safari() {
        let info = classify("Mozilla/5.0 AppleWebKit/537.36 Chrome/90.0 Safari/537.36 Edg/90.0");
        assert_eq!(info.browser, "Edg");
    }

    #[test]
    fn mobile_flag_requires_mobi_substring() {
        assert!(classify("Mozilla/5.0 (Android 10) Mobile Safari").is_mobile);
        assert!(!classify("Mozilla/5.0 (Linux; Android 10) Chrome/90.0").is_mobile);
    }

    #[test]
    fn unknown_agent_yields_empty_strings() {
        let info = classify("curl/8.0.1");
        assert_eq!(info.platform, "");
        assert_eq!(info.browser, "");
        assert!(!info.is_mobile);
    }

    #[test]
    fn known_lists_reject_empty_and_unknown_names() {
        assert!(is_known_platform("Android"));
        assert!(!is_known_platform(""));
        assert!(!is_known_platform("None"));
        assert!(is_known_browser("Safari"));
        assert!(!is_known_browser("curl"));
    }
}
