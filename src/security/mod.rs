//! Security subsystem: request screening.
//!
//! # Data Flow
//! ```text
//! Incoming request (buffered):
//!     → window.rs (count it in the per-IP tally)
//!     → features.rs (derive the 41-field feature vector)
//!     → classifier.rs (screen under a deadline, fail open)
//!     → Verdict back to the engine: block or dispatch
//!
//! After the backend answers:
//!     → features.rs (annotate flag, failed logins, response size)
//! ```
//!
//! # Design Decisions
//! - Extraction is pure rule matching over fixed token lists (signatures.rs)
//! - Extraction never fails; missing inputs produce field defaults
//! - Availability over protection: a broken classifier lets traffic through

pub mod classifier;
pub mod features;
pub mod signatures;
pub mod window;

pub use classifier::{Classifier, ClassifierError, RuleClassifier, Screener, Verdict};
pub use features::{FeatureExtractor, FeatureValue, FeatureVector, RequestView};
pub use window::{IpWindow, WindowSnapshot};
