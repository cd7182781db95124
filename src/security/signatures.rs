//! Fixed token lists used by feature extraction.
//!
//! All matching is plain case-insensitive substring search over text that the
//! caller has already lowercased. No regex, no scoring.

/// User-agent fragments of scanners and automated clients.
pub const SUSPICIOUS_AGENTS: &[&str] = &["bot", "crawler", "scanner", "sqlmap", "nikto"];

/// User-agent fragments announcing an unauthenticated client.
pub const GUEST_AGENTS: &[&str] = &["guest", "anonymous", "public"];

pub const SQL_INJECTION: &[&str] = &[
    "union select",
    "drop table",
    "insert into",
    "delete from",
    "exec(",
    "' or '",
    "' or 1=1",
    " or 1=1",
    "'='",
    "'; --",
    "sleep(",
];

pub const SCRIPT_INJECTION: &[&str] = &[
    "<script",
    "javascript:",
    "onerror=",
    "onload=",
    "<iframe",
];

pub const PATH_TRAVERSAL: &[&str] = &[
    "../",
    "..\\",
    "%2e%2e%2f",
    "%2e%2e\\",
    "%2e%2e/",
    "..%2f",
    "%2e%2e%5c",
];

pub const COMMAND_INJECTION: &[&str] = &[
    "; cat",
    "; ls",
    "; rm ",
    "| whoami",
    "| nc ",
    "`id`",
    "$(",
    "&& cat",
];

/// The four attack pattern families counted by the `hot` feature.
pub const HOT_FAMILIES: [&[&str]; 4] = [
    SQL_INJECTION,
    SCRIPT_INJECTION,
    PATH_TRAVERSAL,
    COMMAND_INJECTION,
];

pub const FILE_CREATE_KEYWORDS: &[&str] = &["upload", "create", "write", "save"];
pub const FILE_ACCESS_KEYWORDS: &[&str] = &["download", "read", "open", "view"];

/// Path fragment marking a login endpoint.
pub const LOGIN_MARKER: &str = "login";

/// Cookie fragments marking an established session.
pub const SESSION_MARKERS: &[&str] = &["session", "token"];

/// True when any token occurs in `haystack`.
pub fn contains_any(haystack: &str, tokens: &[&str]) -> bool {
    tokens.iter().any(|t| haystack.contains(t))
}

/// Number of pattern families with at least one hit (0..=4).
pub fn hot_families(haystack: &str) -> u8 {
    HOT_FAMILIES
        .iter()
        .filter(|family| contains_any(haystack, family))
        .count() as u8
}

/// Total occurrences of all tokens, capped at `cap`.
pub fn count_occurrences(haystack: &str, tokens: &[&str], cap: usize) -> usize {
    tokens
        .iter()
        .map(|t| haystack.matches(t).count())
        .sum::<usize>()
        .min(cap)
}
