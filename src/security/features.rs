//! Feature extraction for traffic classification.
//!
//! Maps one HTTP request onto the 41-field connection-record schema the
//! classifier was trained on. Many fields describe TCP-level behaviour that a
//! proxy never sees; those keep their defaults. The rest are derived by fixed
//! rules: token matching on path, query and body, header checks, and a coarse
//! per-IP tally (see [`IpWindow`]).

use std::borrow::Cow;
use std::net::IpAddr;
use std::time::Duration;

use axum::http::{header, HeaderMap, Method};
use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::security::signatures::{self, contains_any, count_occurrences};
use crate::security::window::{IpWindow, WindowSnapshot};

/// Cap applied to the file-operation counters.
const FILE_OP_CAP: usize = 5;

/// Kind of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Numeric,
    /// Allowed categories; the first is the fallback for unknown values.
    Categorical(&'static [&'static str]),
}

/// One named slot of the feature schema.
#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
}

const fn num(name: &'static str) -> Field {
    Field {
        name,
        kind: FieldKind::Numeric,
    }
}

const fn cat(name: &'static str, categories: &'static [&'static str]) -> Field {
    Field {
        name,
        kind: FieldKind::Categorical(categories),
    }
}

pub const PROTOCOLS: &[&str] = &["tcp", "udp", "icmp"];
pub const SERVICES: &[&str] = &["http", "http_443", "private", "other"];
pub const FLAGS: &[&str] = &[
    "SF", "S0", "REJ", "RSTR", "RSTO", "SH", "S1", "S2", "S3", "OTH", "RSTOS0",
];

pub const FLAG_NORMAL: &str = "SF";
pub const FLAG_REJECTED: &str = "REJ";
pub const FLAG_RESET: &str = "RSTR";

/// Field order expected by the classifier.
pub static SCHEMA: [Field; 41] = [
    num("duration"),
    cat("protocol_type", PROTOCOLS),
    cat("service", SERVICES),
    cat("flag", FLAGS),
    num("src_bytes"),
    num("dst_bytes"),
    num("land"),
    num("wrong_fragment"),
    num("urgent"),
    num("hot"),
    num("num_failed_logins"),
    num("logged_in"),
    num("num_compromised"),
    num("root_shell"),
    num("su_attempted"),
    num("num_root"),
    num("num_file_creations"),
    num("num_shells"),
    num("num_access_files"),
    num("num_outbound_cmds"),
    num("is_host_login"),
    num("is_guest_login"),
    num("count"),
    num("srv_count"),
    num("serror_rate"),
    num("srv_serror_rate"),
    num("rerror_rate"),
    num("srv_rerror_rate"),
    num("same_srv_rate"),
    num("diff_srv_rate"),
    num("srv_diff_host_rate"),
    num("dst_host_count"),
    num("dst_host_srv_count"),
    num("dst_host_same_srv_rate"),
    num("dst_host_diff_srv_rate"),
    num("dst_host_same_src_port_rate"),
    num("dst_host_srv_diff_host_rate"),
    num("dst_host_serror_rate"),
    num("dst_host_srv_serror_rate"),
    num("dst_host_rerror_rate"),
    num("dst_host_srv_rerror_rate"),
];

fn position(name: &str) -> Option<usize> {
    SCHEMA.iter().position(|f| f.name == name)
}

/// A single feature value.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureValue {
    Number(f64),
    Category(Cow<'static, str>),
}

impl From<f64> for FeatureValue {
    fn from(v: f64) -> Self {
        FeatureValue::Number(v)
    }
}

impl From<u64> for FeatureValue {
    fn from(v: u64) -> Self {
        FeatureValue::Number(v as f64)
    }
}

impl From<&'static str> for FeatureValue {
    fn from(v: &'static str) -> Self {
        FeatureValue::Category(Cow::Borrowed(v))
    }
}

impl From<String> for FeatureValue {
    fn from(v: String) -> Self {
        FeatureValue::Category(Cow::Owned(v))
    }
}

/// Coerce `value` into what `field` accepts, falling back to the default.
fn conform(field: &Field, value: FeatureValue) -> FeatureValue {
    match (field.kind, value) {
        (FieldKind::Numeric, FeatureValue::Number(n)) if n.is_finite() => FeatureValue::Number(n),
        (FieldKind::Categorical(allowed), FeatureValue::Category(c)) => {
            match allowed.iter().find(|a| **a == c) {
                Some(known) => FeatureValue::Category(Cow::Borrowed(*known)),
                None => default_for(field),
            }
        }
        _ => default_for(field),
    }
}

fn default_for(field: &Field) -> FeatureValue {
    match field.kind {
        FieldKind::Numeric => FeatureValue::Number(0.0),
        FieldKind::Categorical(allowed) => FeatureValue::Category(Cow::Borrowed(allowed[0])),
    }
}

/// Complete, ordered feature vector. Every schema field is always present.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    values: Vec<FeatureValue>,
}

impl Default for FeatureVector {
    fn default() -> Self {
        Self {
            values: SCHEMA.iter().map(default_for).collect(),
        }
    }
}

impl FeatureVector {
    /// Build a vector from named values; absent fields take their defaults.
    ///
    /// Unknown names are dropped. Values of the wrong kind, non-finite
    /// numbers and unknown categories are replaced by the field default.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, FeatureValue)>,
        S: AsRef<str>,
    {
        let mut vector = Self::default();
        for (name, value) in pairs {
            if !vector.set(name.as_ref(), value) {
                tracing::trace!(feature = name.as_ref(), "Dropping unknown feature");
            }
        }
        vector
    }

    /// Set one field. Returns false if the schema has no such field.
    pub fn set(&mut self, name: &str, value: impl Into<FeatureValue>) -> bool {
        match position(name) {
            Some(i) => {
                self.values[i] = conform(&SCHEMA[i], value.into());
                true
            }
            None => false,
        }
    }

    pub fn get(&self, name: &str) -> Option<&FeatureValue> {
        position(name).map(|i| &self.values[i])
    }

    /// Numeric value of a field; zero for categorical or unknown fields.
    pub fn number(&self, name: &str) -> f64 {
        match self.get(name) {
            Some(FeatureValue::Number(n)) => *n,
            _ => 0.0,
        }
    }

    /// Category of a field; empty for numeric or unknown fields.
    pub fn category(&self, name: &str) -> &str {
        match self.get(name) {
            Some(FeatureValue::Category(c)) => &**c,
            _ => "",
        }
    }

    /// Fields in schema order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &FeatureValue)> {
        SCHEMA.iter().map(|f| f.name).zip(self.values.iter())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Serialize for FeatureVector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in self.iter() {
            match value {
                FeatureValue::Number(n) => map.serialize_entry(name, n)?,
                FeatureValue::Category(c) => map.serialize_entry(name, &**c)?,
            }
        }
        map.end()
    }
}

/// Borrowed view of the request parts feature extraction reads.
#[derive(Debug, Clone, Copy)]
pub struct RequestView<'a> {
    pub method: &'a Method,
    pub path: &'a str,
    pub query: Option<&'a str>,
    pub headers: &'a HeaderMap,
    pub body: &'a [u8],
    pub client_ip: IpAddr,
}

impl<'a> RequestView<'a> {
    fn header_lower(&self, name: header::HeaderName) -> String {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase()
    }

    /// Lowercased path, query and body as one searchable text.
    ///
    /// The query appears both raw and form-decoded, since clients encode
    /// markup and quotes there.
    fn searchable(&self) -> String {
        let body = String::from_utf8_lossy(self.body);
        let mut text = String::with_capacity(self.path.len() + body.len() + 2);
        text.push_str(self.path);
        if let Some(q) = self.query {
            text.push('?');
            text.push_str(q);
            for (key, value) in url::form_urlencoded::parse(q.as_bytes()) {
                text.push('\n');
                text.push_str(&key);
                text.push('=');
                text.push_str(&value);
            }
        }
        text.push('\n');
        text.push_str(&body);
        text.to_lowercase()
    }
}

/// Derives feature vectors from requests.
#[derive(Debug)]
pub struct FeatureExtractor {
    window: IpWindow,
}

impl FeatureExtractor {
    pub fn new(window: Duration) -> Self {
        Self {
            window: IpWindow::new(window),
        }
    }

    pub fn window(&self) -> &IpWindow {
        &self.window
    }

    /// Extract features before the request is forwarded.
    ///
    /// Counts the request in the per-IP tally. Never fails: anything missing
    /// from the request yields the field default.
    pub fn extract(&self, req: &RequestView<'_>) -> FeatureVector {
        let snapshot = self.window.observe(req.client_ip);
        self.extract_with(req, snapshot)
    }

    /// Extract features against an explicit tally snapshot.
    pub fn extract_with(&self, req: &RequestView<'_>, snapshot: WindowSnapshot) -> FeatureVector {
        let user_agent = req.header_lower(header::USER_AGENT);
        let text = req.searchable();

        let mut pairs: Vec<(&'static str, FeatureValue)> = vec![
            ("duration", 0.0.into()),
            ("protocol_type", "tcp".into()),
            ("service", "http".into()),
            ("flag", flag(&user_agent, None).into()),
            ("src_bytes", (req.body.len() as u64).into()),
            ("dst_bytes", 0.0.into()),
            ("hot", u64::from(signatures::hot_families(&text)).into()),
            ("num_failed_logins", failed_logins(req.path, None).into()),
            ("logged_in", logged_in(req).into()),
            (
                "num_file_creations",
                (count_occurrences(&text, signatures::FILE_CREATE_KEYWORDS, FILE_OP_CAP) as u64)
                    .into(),
            ),
            (
                "num_access_files",
                (count_occurrences(&text, signatures::FILE_ACCESS_KEYWORDS, FILE_OP_CAP) as u64)
                    .into(),
            ),
            (
                "is_guest_login",
                bool_feature(contains_any(&user_agent, signatures::GUEST_AGENTS)),
            ),
        ];
        pairs.extend(rate_features(snapshot));

        FeatureVector::from_pairs(pairs)
    }

    /// Fold the response into features extracted earlier.
    ///
    /// Only status and size dependent fields change; the tally is untouched.
    pub fn annotate_response(
        &self,
        features: &mut FeatureVector,
        req: &RequestView<'_>,
        status: u16,
        response_bytes: u64,
    ) {
        let user_agent = req.header_lower(header::USER_AGENT);
        features.set("flag", flag(&user_agent, Some(status)));
        features.set("num_failed_logins", failed_logins(req.path, Some(status)));
        features.set("dst_bytes", response_bytes);
    }
}

fn bool_feature(b: bool) -> FeatureValue {
    FeatureValue::Number(if b { 1.0 } else { 0.0 })
}

/// Connection-outcome flag: scanner agents first, then status, then normal.
fn flag(user_agent: &str, status: Option<u16>) -> &'static str {
    if contains_any(user_agent, signatures::SUSPICIOUS_AGENTS) {
        FLAG_REJECTED
    } else if status.is_some_and(|s| s >= 400) {
        FLAG_RESET
    } else {
        FLAG_NORMAL
    }
}

fn failed_logins(path: &str, status: Option<u16>) -> u64 {
    let login = path.to_ascii_lowercase().contains(signatures::LOGIN_MARKER);
    u64::from(login && status == Some(401))
}

fn logged_in(req: &RequestView<'_>) -> FeatureValue {
    let authorized = req.headers.contains_key(header::AUTHORIZATION);
    let cookie = req.header_lower(header::COOKIE);
    bool_feature(authorized || contains_any(&cookie, signatures::SESSION_MARKERS))
}

/// Connection and host statistics approximated from the per-IP tally.
fn rate_features(snapshot: WindowSnapshot) -> Vec<(&'static str, FeatureValue)> {
    let n = snapshot.ip_requests;
    let k = snapshot.distinct_ips as u64;

    let serror = if n > 20 { 0.1 } else { 0.05 };
    let rerror = if n > 30 { 0.05 } else { 0.02 };
    let same_srv = if n < 10 { 0.8 } else { 0.6 };
    let host_same_srv = if n < 15 { 0.7 } else { 0.5 };
    let host_serror = if n > 25 { 0.08 } else { 0.04 };
    let host_rerror = if n > 35 { 0.06 } else { 0.03 };

    vec![
        ("count", n.min(100).into()),
        ("srv_count", (n / 2).min(50).into()),
        ("serror_rate", serror.into()),
        ("srv_serror_rate", serror.into()),
        ("rerror_rate", rerror.into()),
        ("srv_rerror_rate", rerror.into()),
        ("same_srv_rate", same_srv.into()),
        ("diff_srv_rate", (1.0 - same_srv).into()),
        ("srv_diff_host_rate", (if k > 5 { 0.1 } else { 0.05 }).into()),
        ("dst_host_count", (k * 2).min(200).into()),
        ("dst_host_srv_count", n.min(100).into()),
        ("dst_host_same_srv_rate", host_same_srv.into()),
        ("dst_host_diff_srv_rate", (1.0 - host_same_srv).into()),
        ("dst_host_same_src_port_rate", 0.9.into()),
        ("dst_host_srv_diff_host_rate", (if k > 3 { 0.2 } else { 0.1 }).into()),
        ("dst_host_serror_rate", host_serror.into()),
        ("dst_host_srv_serror_rate", host_serror.into()),
        ("dst_host_rerror_rate", host_rerror.into()),
        ("dst_host_srv_rerror_rate", host_rerror.into()),
    ]
}
