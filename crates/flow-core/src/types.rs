use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// Lifecycle stage of a feature. Always computed from artifacts on disk,
/// never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    NotStarted,
    ProductDefined,
    FeaturesDefined,
    Planned,
    Implemented,
    Reviewed,
}

impl Phase {
    pub fn all() -> &'static [Phase] {
        &[
            Phase::NotStarted,
            Phase::ProductDefined,
            Phase::FeaturesDefined,
            Phase::Planned,
            Phase::Implemented,
            Phase::Reviewed,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::NotStarted => "not_started",
            Phase::ProductDefined => "product_defined",
            Phase::FeaturesDefined => "features_defined",
            Phase::Planned => "planned",
            Phase::Implemented => "implemented",
            Phase::Reviewed => "reviewed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = crate::error::FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::all()
            .iter()
            .copied()
            .find(|p| p.as_str() == s.replace('-', "_"))
            .ok_or_else(|| crate::error::FlowError::UnknownPhase(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// A workflow step, named after the slash command that performs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Step {
    DefineProduct,
    DefineArchitecture,
    AddFeature,
    PlanFeature,
    ImplementFeature,
    ReviewFeature,
    UpdateFeature,
    MockupProduct,
    RecordDecision,
}

impl Step {
    pub fn all() -> &'static [Step] {
        &[
            Step::DefineProduct,
            Step::DefineArchitecture,
            Step::AddFeature,
            Step::PlanFeature,
            Step::ImplementFeature,
            Step::ReviewFeature,
            Step::UpdateFeature,
            Step::MockupProduct,
            Step::RecordDecision,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Step::DefineProduct => "define-product",
            Step::DefineArchitecture => "define-architecture",
            Step::AddFeature => "add-feature",
            Step::PlanFeature => "plan-feature",
            Step::ImplementFeature => "implement-feature",
            Step::ReviewFeature => "review-feature",
            Step::UpdateFeature => "update-feature",
            Step::MockupProduct => "mockup-product",
            Step::RecordDecision => "record-decision",
        }
    }

    /// Steps that operate on a single feature and take its id as `$1`.
    pub fn is_feature_scoped(self) -> bool {
        matches!(
            self,
            Step::PlanFeature
                | Step::ImplementFeature
                | Step::ReviewFeature
                | Step::UpdateFeature
        )
    }

    /// Slash-command form, e.g. `/plan-feature F010-Login`.
    pub fn command_line(self, feature: Option<&str>) -> String {
        match feature {
            Some(id) => format!("/{} {id}", self.as_str()),
            None => format!("/{}", self.as_str()),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Step {
    type Err = crate::error::FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().trim_start_matches('/').replace('_', "-");
        Step::all()
            .iter()
            .copied()
            .find(|step| step.as_str() == normalized)
            .ok_or_else(|| crate::error::FlowError::UnknownStep(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// ArtifactKind
// ---------------------------------------------------------------------------

/// Files that live in a feature directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Feature,
    Plan,
    Review,
}

impl ArtifactKind {
    pub fn filename(self) -> &'static str {
        match self {
            ArtifactKind::Feature => "feature.md",
            ArtifactKind::Plan => "plan.md",
            ArtifactKind::Review => "review.md",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.filename())
    }
}

// ---------------------------------------------------------------------------
// TemplateKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    Command,
    Agent,
    Skill,
}

impl TemplateKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TemplateKind::Command => "command",
            TemplateKind::Agent => "agent",
            TemplateKind::Skill => "skill",
        }
    }

    /// Directory under a plugin root holding templates of this kind.
    pub fn dir_name(self) -> &'static str {
        match self {
            TemplateKind::Command => "commands",
            TemplateKind::Agent => "agents",
            TemplateKind::Skill => "skills",
        }
    }
}

impl fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TemplateKind {
    type Err = crate::error::FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_end_matches('s') {
            "command" => Ok(TemplateKind::Command),
            "agent" => Ok(TemplateKind::Agent),
            "skill" => Ok(TemplateKind::Skill),
            _ => Err(crate::error::FlowError::InvalidConfig(format!(
                "unknown template kind '{s}' (expected command, agent or skill)"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
