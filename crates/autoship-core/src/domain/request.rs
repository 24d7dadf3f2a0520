//! Change requests and deterministic feature-key derivation.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Priority hint attached to a change request.
///
/// Carried through to the change proposal for human readers; does not
/// affect stage sequencing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Normal => write!(f, "normal"),
            Priority::High => write!(f, "high"),
        }
    }
}

/// Deterministic identifier for a logical feature.
///
/// Derived from the normalized request text, so two submissions of the
/// same request map to the same key. Used by the run registry for
/// single-flight locking and as the branch-name suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeatureKey(String);

impl FeatureKey {
    /// Derive the key from request title and description.
    ///
    /// Normalization lowercases and collapses whitespace before hashing,
    /// so cosmetic differences ("Add  chart" vs "add chart ") still
    /// collide onto one key.
    pub fn derive(title: &str, description: &str) -> Self {
        let normalized = format!("{}\n{}", normalize(title), normalize(description));
        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        let digest = hex::encode(hasher.finalize());
        FeatureKey(digest[..16].to_string())
    }

    /// Return the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Branch name owned by a run for this feature.
    pub fn branch_name(&self) -> String {
        format!("autoship/{}", self.0)
    }
}

impl std::fmt::Display for FeatureKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// A natural-language change request accepted into the pipeline.
///
/// Immutable once accepted; the pipeline only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRequest {
    /// Short title of the requested change.
    pub title: String,

    /// Raw request text.
    pub description: String,

    /// Priority hint from the requester.
    pub priority: Priority,
}

impl ChangeRequest {
    /// Create a request with default (normal) priority.
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            priority: Priority::default(),
        }
    }

    /// Set the priority hint.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Derive the feature key for this request.
    pub fn feature_key(&self) -> FeatureKey {
        FeatureKey::derive(&self.title, &self.description)
    }
}
