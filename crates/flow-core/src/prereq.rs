//! Prerequisite checks for workflow steps.
//!
//! Each step declares an ordered list of requirements. Evaluation walks the
//! list, collects soft failures as warnings and stops at the first hard
//! failure.

use crate::error::{FlowError, Result};
use crate::feature::{self, ACCEPTANCE_CRITERIA};
use crate::markdown;
use crate::paths::{display_relative, PathResolver};
use crate::types::{ArtifactKind, Step};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Hard,
    Soft,
}

/// A document a requirement looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactRef {
    ProductDoc,
    Architecture,
    Feature(ArtifactKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predicate {
    FileExists(ArtifactRef),
    SectionPresent(ArtifactRef, &'static str),
    /// plan.md records finished implementation work.
    Implemented,
}

#[derive(Debug, Clone, Copy)]
pub struct Requirement {
    pub predicate: Predicate,
    pub severity: Severity,
    /// Step that creates what this requirement looks for.
    pub produced_by: Step,
}

const fn hard(predicate: Predicate, produced_by: Step) -> Requirement {
    Requirement {
        predicate,
        severity: Severity::Hard,
        produced_by,
    }
}

const fn soft(predicate: Predicate, produced_by: Step) -> Requirement {
    Requirement {
        predicate,
        severity: Severity::Soft,
        produced_by,
    }
}

use self::ArtifactRef::{Architecture, Feature, ProductDoc};
use self::Predicate::{FileExists, Implemented, SectionPresent};

/// Requirements for `step`, in evaluation order.
pub fn requirements(step: Step) -> &'static [Requirement] {
    const PRODUCT: Requirement = hard(FileExists(ProductDoc), Step::DefineProduct);
    const ARCH_SOFT: Requirement = soft(FileExists(Architecture), Step::DefineArchitecture);
    const FEATURE_MD: Requirement =
        hard(FileExists(Feature(ArtifactKind::Feature)), Step::AddFeature);
    const PLAN_MD: Requirement = hard(FileExists(Feature(ArtifactKind::Plan)), Step::PlanFeature);
    const ACCEPTANCE: Requirement = hard(
        SectionPresent(Feature(ArtifactKind::Feature), ACCEPTANCE_CRITERIA),
        Step::UpdateFeature,
    );
    const IMPLEMENTED: Requirement = hard(Implemented, Step::ImplementFeature);
    const PRODUCT_SOFT: Requirement = soft(FileExists(ProductDoc), Step::DefineProduct);

    match step {
        Step::DefineProduct => &[],
        Step::DefineArchitecture => &[PRODUCT],
        Step::AddFeature => &[PRODUCT, ARCH_SOFT],
        Step::PlanFeature => &[PRODUCT, FEATURE_MD, ACCEPTANCE, ARCH_SOFT],
        Step::ImplementFeature => &[FEATURE_MD, PLAN_MD],
        Step::ReviewFeature => &[FEATURE_MD, PLAN_MD, IMPLEMENTED],
        Step::UpdateFeature => &[FEATURE_MD, PRODUCT_SOFT],
        Step::MockupProduct => &[PRODUCT],
        Step::RecordDecision => &[PRODUCT_SOFT, ARCH_SOFT],
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// One failed requirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub severity: Severity,
    /// Project-relative path of the artifact that was checked.
    pub artifact: String,
    #[serde(skip)]
    pub path: PathBuf,
    pub reason: String,
    /// Command that fixes it, e.g. `/update-feature F010-Login`.
    pub remedy: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub step: Step,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature: Option<String>,
    pub ok: bool,
    pub missing_artifacts: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub warnings: Vec<Finding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<Finding>,
}

impl ValidationResult {
    /// Turn a hard failure into `PhaseGuardViolation`.
    pub fn into_result(self) -> Result<Self> {
        match self.failure {
            Some(f) => Err(FlowError::PhaseGuardViolation {
                feature: self.feature.unwrap_or_else(|| "the product".to_string()),
                step: self.step.to_string(),
                missing: PathBuf::from(f.artifact),
                reason: f.reason,
                remedy: f.remedy,
            }),
            None => Ok(self),
        }
    }
}

// ---------------------------------------------------------------------------
// Validator
// ---------------------------------------------------------------------------

pub struct PrerequisiteValidator<'a> {
    resolver: &'a PathResolver,
}

impl<'a> PrerequisiteValidator<'a> {
    pub fn new(resolver: &'a PathResolver) -> Self {
        Self { resolver }
    }

    /// Check `step` for `feature`. Feature-scoped steps need a feature id;
    /// other steps ignore it.
    pub fn check(&self, step: Step, feature: Option<&str>) -> Result<ValidationResult> {
        let feature = match (step.is_feature_scoped(), feature) {
            (true, None) => {
                return Err(FlowError::InvalidFeatureId(format!(
                    "(none given; {} needs a feature id)",
                    step.command_line(None)
                )))
            }
            (true, Some(id)) => Some(id),
            (false, _) => None,
        };

        let mut result = ValidationResult {
            step,
            feature: feature.map(str::to_string),
            ok: true,
            missing_artifacts: Vec::new(),
            reason: None,
            warnings: Vec::new(),
            failure: None,
        };

        for req in requirements(step) {
            let Some(finding) = self.evaluate(req, feature)? else {
                continue;
            };
            match req.severity {
                Severity::Soft => {
                    tracing::warn!(step = %step, artifact = %finding.artifact, reason = %finding.reason, "soft prerequisite missing");
                    result.warnings.push(finding);
                }
                Severity::Hard => {
                    result.ok = false;
                    result.missing_artifacts.push(finding.artifact.clone());
                    result.reason = Some(finding.reason.clone());
                    result.failure = Some(finding);
                    break;
                }
            }
        }
        Ok(result)
    }

    fn path_of(&self, artifact: ArtifactRef, feature: Option<&str>) -> Result<PathBuf> {
        match (artifact, feature) {
            (ProductDoc, _) => self.resolver.product_doc(),
            (Architecture, _) => self.resolver.architecture_doc(),
            (Feature(kind), Some(id)) => self.resolver.feature_artifact(id, kind),
            (Feature(_), None) => Err(FlowError::InvalidFeatureId(String::new())),
        }
    }

    /// `Some(finding)` if the requirement is not met.
    fn evaluate(&self, req: &Requirement, feature: Option<&str>) -> Result<Option<Finding>> {
        let (path, reason) = match req.predicate {
            FileExists(artifact) => {
                let path = self.path_of(artifact, feature)?;
                if path.is_file() {
                    return Ok(None);
                }
                let reason = format!("{} does not exist", self.rel(&path));
                (path, reason)
            }
            SectionPresent(artifact, heading) => {
                let path = self.path_of(artifact, feature)?;
                let content = crate::io::read_optional(&path)?.unwrap_or_default();
                if markdown::has_section(&content, heading) {
                    return Ok(None);
                }
                let reason = format!("{} has no '{heading}' section", self.rel(&path));
                (path, reason)
            }
            Implemented => {
                let path = self.path_of(Feature(ArtifactKind::Plan), feature)?;
                let content = crate::io::read_optional(&path)?.unwrap_or_default();
                if feature::plan_is_implemented(&content) {
                    return Ok(None);
                }
                let reason = format!(
                    "{} records no implementation (no '{}' section and open task checkboxes)",
                    self.rel(&path),
                    feature::IMPLEMENTATION_NOTES
                );
                (path, reason)
            }
        };

        let remedy_target = if req.produced_by.is_feature_scoped() {
            feature
        } else {
            None
        };
        Ok(Some(Finding {
            severity: req.severity,
            artifact: self.rel(&path),
            path,
            reason,
            remedy: req.produced_by.command_line(remedy_target),
        }))
    }

    fn rel(&self, path: &std::path::Path) -> String {
        display_relative(self.resolver.root(), path)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
