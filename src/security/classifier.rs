//! Traffic classification and the screening boundary.
//!
//! # Responsibilities
//! - Define the [`Classifier`] seam the proxy calls per request
//! - Provide [`RuleClassifier`], a small built-in scorer over the feature vector
//! - Run the classifier off the async workers under a deadline ([`Screener`])
//!
//! # Design Decisions
//! - Classifiers are synchronous; the screener moves them onto the blocking pool
//! - Fail open: any classifier problem yields [`Verdict::fail_open`], and that
//!   substitution happens only in [`Screener::screen`]

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time;

use crate::observability::metrics;
use crate::security::features::{FeatureVector, FLAG_REJECTED};

pub const LABEL_NORMAL: &str = "normal";
pub const CLASSES: [&str; 5] = [LABEL_NORMAL, "dos", "probe", "r2l", "u2r"];

/// Outcome of classifying one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    pub is_malicious: bool,
    pub predicted_label: String,
    pub confidence: f64,
    /// One `(class, probability)` pair per known class, in class order.
    pub category_probabilities: Vec<(String, f64)>,
}

impl Verdict {
    /// Verdict used whenever no trustworthy classification is available.
    pub fn fail_open() -> Self {
        Self {
            is_malicious: false,
            predicted_label: LABEL_NORMAL.to_string(),
            confidence: 0.5,
            category_probabilities: Vec::new(),
        }
    }

    fn check(&self) -> Result<(), ClassifierError> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(ClassifierError::InvalidOutput(format!(
                "confidence {} outside [0, 1]",
                self.confidence
            )));
        }
        if self.predicted_label.is_empty() {
            return Err(ClassifierError::InvalidOutput("empty label".into()));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("classifier unavailable: {0}")]
    Unavailable(String),

    #[error("classifier returned invalid output: {0}")]
    InvalidOutput(String),
}

/// A request classifier. Implementations may be slow or fail.
pub trait Classifier: Send + Sync {
    fn classify(&self, features: &FeatureVector) -> Result<Verdict, ClassifierError>;

    fn name(&self) -> &str;
}

/// Weighted-evidence scorer over the derived features.
///
/// Each class gets a non-negative weight, `normal` starting at 1.0. Weights
/// are normalised into probabilities and the argmax wins.
#[derive(Debug, Clone)]
pub struct RuleClassifier {
    threshold: f64,
}

impl RuleClassifier {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    fn weights(features: &FeatureVector) -> [f64; 5] {
        let count = features.number("count");
        let hot = features.number("hot");
        let failed = features.number("num_failed_logins");

        let dos = if count >= 50.0 { count / 50.0 } else { 0.0 };
        let probe = if features.category("flag") == FLAG_REJECTED {
            2.0
        } else {
            0.0
        };
        let r2l = 4.0 * hot + 2.0 * failed;
        let u2r = if hot >= 2.0 { hot } else { 0.0 };

        [1.0, dos, probe, r2l, u2r]
    }
}

impl Classifier for RuleClassifier {
    fn classify(&self, features: &FeatureVector) -> Result<Verdict, ClassifierError> {
        let weights = Self::weights(features);
        let total: f64 = weights.iter().sum();

        let mut best = 0;
        for (i, w) in weights.iter().enumerate() {
            if *w > weights[best] {
                best = i;
            }
        }

        let confidence = weights[best] / total;
        let label = CLASSES[best];

        Ok(Verdict {
            is_malicious: label != LABEL_NORMAL && confidence >= self.threshold,
            predicted_label: label.to_string(),
            confidence,
            category_probabilities: CLASSES
                .iter()
                .zip(weights)
                .map(|(c, w)| (c.to_string(), w / total))
                .collect(),
        })
    }

    fn name(&self) -> &str {
        "rules"
    }
}

/// Runs a classifier under a deadline and applies the fail-open policy.
#[derive(Clone)]
pub struct Screener {
    classifier: Arc<dyn Classifier>,
    enabled: bool,
    timeout: Duration,
}

impl Screener {
    pub fn new(classifier: Arc<dyn Classifier>, enabled: bool, timeout: Duration) -> Self {
        Self {
            classifier,
            enabled,
            timeout,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Classify `features`, never failing.
    pub async fn screen(&self, features: &FeatureVector) -> Verdict {
        if !self.enabled {
            return Verdict::fail_open();
        }

        let classifier = self.classifier.clone();
        let features = features.clone();
        let call = tokio::task::spawn_blocking(move || classifier.classify(&features));

        let (reason, detail) = match time::timeout(self.timeout, call).await {
            Ok(Ok(Ok(verdict))) => match verdict.check() {
                Ok(()) => return verdict,
                Err(e) => ("invalid_output", e.to_string()),
            },
            Ok(Ok(Err(e))) => ("error", e.to_string()),
            Ok(Err(join)) => ("panic", join.to_string()),
            Err(_) => ("timeout", format!("no verdict within {:?}", self.timeout)),
        };

        tracing::warn!(
            classifier = self.classifier.name(),
            reason,
            detail = %detail,
            "Classifier failed, allowing request"
        );
        metrics::record_classifier_fallback(reason);
        Verdict::fail_open()
    }
}

impl std::fmt::Debug for Screener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Screener")
            .field("classifier", &self.classifier.name())
            .field("enabled", &self.enabled)
            .field("timeout", &self.timeout)
            .finish()
    }
}
