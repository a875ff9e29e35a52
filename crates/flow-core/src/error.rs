use crate::dispatch::DispatchError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("unknown path token: {0}")]
    UnknownToken(String),

    #[error("path token '{0}' refers to itself through its expansion")]
    TokenCycle(String),

    #[error("path token '{token}' resolves outside the project: {}", path.display())]
    PathEscapesRoot { token: String, path: PathBuf },

    #[error("invalid feature id '{0}': expected F###-Name (e.g. F010-Login)")]
    InvalidFeatureId(String),

    #[error("feature not found: {0} (run /add-feature to create it)")]
    FeatureNotFound(String),

    #[error("feature id '{prefix}' is ambiguous: matches {matches}")]
    AmbiguousFeature { prefix: String, matches: String },

    #[error("feature already exists: {0}")]
    FeatureExists(String),

    #[error("{kind} template not found: {name}")]
    TemplateNotFound { kind: String, name: String },

    #[error("malformed template {}: {reason}", path.display())]
    MalformedTemplate { path: PathBuf, reason: String },

    #[error("unresolved template tokens: {}", .0.join(", "))]
    UnresolvedTokens(Vec<String>),

    #[error("unknown workflow step: {0}")]
    UnknownStep(String),

    #[error("unknown phase: {0}")]
    UnknownPhase(String),

    #[error(
        "cannot run {step} for {feature}: {reason} ({}); run `{remedy}` first",
        missing.display()
    )]
    PhaseGuardViolation {
        feature: String,
        step: String,
        missing: PathBuf,
        reason: String,
        remedy: String,
    },

    #[error("invalid transition: {step} from phase {from}: {reason}")]
    InvalidTransition {
        step: String,
        from: String,
        reason: String,
    },

    #[error("artifact already exists: {}", .0.display())]
    ArtifactExists(PathBuf),

    #[error("write conflict on {}: file changed while merging", .0.display())]
    WriteConflict(PathBuf),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, FlowError>;
