use kube::Error as KubeError;
use thiserror::Error;

/// Annotation recording the controller version that rendered a fragment
pub const GENERATED_BY_VERSION_ANNOTATION: &str =
    "render.fragments.dev/generated-by-controller-version";

/// Prefix for every rendered fragment name
pub const RENDERED_PREFIX: &str = "rendered";

/// Version stamped into rendered fragments
pub const CONTROLLER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid label selector: {0}")]
    InvalidSelector(String),

    #[error("no Fragments found matching selector of FragmentGroup {group}")]
    NoMatchingFragments { group: String },

    #[error("could not find any FragmentGroup for Fragment {fragment}")]
    NoMatchingGroup { fragment: String },

    #[error("no FragmentGroup found for Fragment {fragment} because it has no labels")]
    NoLabels { fragment: String },

    #[error("failed to compute rendered name for FragmentGroup {group}: {reason}")]
    NamingFailed { group: String, reason: String },

    #[error("failed to merge fragments for FragmentGroup {group}: {reason}")]
    MergeFailed { group: String, reason: String },

    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("conflict updating {kind} {name}: {message}")]
    Conflict {
        kind: &'static str,
        name: String,
        message: String,
    },

    #[error("invalid request for {kind} {name}: {message}")]
    Invalid {
        kind: &'static str,
        name: String,
        message: String,
    },

    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] KubeError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl Error {
    /// Outcomes the cleanup pass treats as "reference already gone".
    #[must_use]
    pub fn is_stale_reference(&self) -> bool {
        matches!(self, Error::NotFound { .. } | Error::Invalid { .. })
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
