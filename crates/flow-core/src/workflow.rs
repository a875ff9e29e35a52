//! The feature lifecycle as an explicit state machine.
//!
//! Phases are never stored. [`project_phase`] computes a feature's phase from
//! its artifacts every time it is asked, so editing or deleting a file on
//! disk is always reflected in the next query.

use crate::error::{FlowError, Result};
use crate::feature::{self, Feature};
use crate::paths::PathResolver;
use crate::prereq::{PrerequisiteValidator, ValidationResult};
use crate::rules::{self, FeatureContext, ProjectContext};
use crate::types::{Phase, Step};
use serde::Serialize;

// ---------------------------------------------------------------------------
// Phase projection
// ---------------------------------------------------------------------------

type PhaseRule = (fn(&Feature) -> bool, Phase);

/// First match wins. Features without any of these fall back to the
/// product-level phase.
const PHASE_RULES: &[PhaseRule] = &[
    (
        |f: &Feature| f.has_review && f.implemented && f.plan_fresh,
        Phase::Reviewed,
    ),
    (|f: &Feature| f.implemented && f.plan_fresh, Phase::Implemented),
    (
        |f: &Feature| f.has_plan && f.has_acceptance_criteria && f.plan_fresh,
        Phase::Planned,
    ),
    (|f: &Feature| f.has_feature, Phase::FeaturesDefined),
];

pub fn project_phase(feature: &Feature, product_defined: bool) -> Phase {
    PHASE_RULES
        .iter()
        .find(|(cond, _)| cond(feature))
        .map(|(_, phase)| *phase)
        .unwrap_or(if product_defined {
            Phase::ProductDefined
        } else {
            Phase::NotStarted
        })
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub step: Step,
    pub from: &'static [Phase],
    pub to: Phase,
}

/// Every lifecycle edge. Re-running a step at its own target phase is also
/// allowed (re-plan, re-review). Steps with no edge here
/// (`define-architecture`, `mockup-product`, `record-decision`) are side
/// steps: only their prerequisites gate them.
pub const TRANSITIONS: &[Transition] = &[
    Transition {
        step: Step::DefineProduct,
        from: &[Phase::NotStarted],
        to: Phase::ProductDefined,
    },
    Transition {
        step: Step::AddFeature,
        from: &[Phase::ProductDefined],
        to: Phase::FeaturesDefined,
    },
    Transition {
        step: Step::PlanFeature,
        from: &[Phase::FeaturesDefined],
        to: Phase::Planned,
    },
    Transition {
        step: Step::ImplementFeature,
        from: &[Phase::Planned],
        to: Phase::Implemented,
    },
    Transition {
        step: Step::ReviewFeature,
        from: &[Phase::Implemented],
        to: Phase::Reviewed,
    },
    Transition {
        step: Step::UpdateFeature,
        from: &[Phase::Planned, Phase::Implemented, Phase::Reviewed],
        to: Phase::FeaturesDefined,
    },
];

pub fn transition(step: Step) -> Option<&'static Transition> {
    TRANSITIONS.iter().find(|t| t.step == step)
}

impl Transition {
    pub fn allows(&self, phase: Phase) -> bool {
        self.from.contains(&phase) || phase == self.to
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Suggestion {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature: Option<String>,
    pub phase: Phase,
    /// Slash command to run next; `None` when there is nothing left to do.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    pub reason: String,
    pub rule: &'static str,
}

impl Suggestion {
    pub fn is_done(&self) -> bool {
        self.command.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FeatureStatus {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epic: Option<String>,
    pub phase: Phase,
    pub superseded: bool,
    pub next: Suggestion,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub product_defined: bool,
    pub architecture_defined: bool,
    pub features: Vec<FeatureStatus>,
    pub next: Suggestion,
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

pub struct WorkflowEngine<'a> {
    resolver: &'a PathResolver,
}

impl<'a> WorkflowEngine<'a> {
    pub fn new(resolver: &'a PathResolver) -> Self {
        Self { resolver }
    }

    pub fn product_defined(&self) -> Result<bool> {
        Ok(self.resolver.product_doc()?.is_file())
    }

    fn architecture_defined(&self) -> Result<bool> {
        Ok(self.resolver.architecture_doc()?.is_file())
    }

    /// Current phase of a feature, or of the product when `feature` is `None`.
    pub fn phase(&self, feature: Option<&str>) -> Result<Phase> {
        let product = self.product_defined()?;
        match feature {
            Some(id) => {
                let f = Feature::load(self.resolver, id)?;
                Ok(project_phase(&f, product))
            }
            None if product => Ok(Phase::ProductDefined),
            None => Ok(Phase::NotStarted),
        }
    }

    /// Check that `step` may run now. Prerequisites are checked first, so a
    /// missing artifact is reported as `PhaseGuardViolation` with its remedy;
    /// a phase outside the step's edge is an `InvalidTransition`.
    pub fn guard(&self, step: Step, feature: Option<&str>) -> Result<ValidationResult> {
        let validation = PrerequisiteValidator::new(self.resolver)
            .check(step, feature)?
            .into_result()?;

        let Some(edge) = transition(step) else {
            return Ok(validation);
        };
        // add-feature creates a new feature, so it is judged at product level.
        let scoped = if step.is_feature_scoped() { feature } else { None };
        let phase = self.phase(scoped)?;
        if edge.allows(phase) {
            return Ok(validation);
        }

        let next = self.next(scoped)?;
        let hint = match &next.command {
            Some(cmd) => format!("{}; run `{cmd}` instead", next.reason),
            None => next.reason.clone(),
        };
        Err(FlowError::InvalidTransition {
            step: step.to_string(),
            from: phase.to_string(),
            reason: hint,
        })
    }

    /// Recommend the next command for one feature, or for the project.
    pub fn next(&self, feature: Option<&str>) -> Result<Suggestion> {
        let product = self.product_defined()?;
        match feature {
            Some(id) => {
                let f = feature::find(self.resolver, id)?;
                Ok(suggest_for_feature(f, product))
            }
            None => self.next_for_project(product),
        }
    }

    fn next_for_project(&self, product: bool) -> Result<Suggestion> {
        let features = feature::list(self.resolver)?;
        let suggestions: Vec<Suggestion> = features
            .into_iter()
            .map(|f| suggest_for_feature(f, product))
            .collect();
        let ctx = ProjectContext {
            product_defined: product,
            architecture_defined: self.architecture_defined()?,
            open_features: suggestions.iter().filter(|s| !s.is_done()).count(),
            total_features: suggestions.len(),
        };
        Ok(project_suggestion(&ctx, suggestions))
    }

    /// Phase and next step for every feature, plus the project-level
    /// recommendation.
    pub fn status(&self) -> Result<StatusReport> {
        let product = self.product_defined()?;
        let architecture = self.architecture_defined()?;
        let mut features = Vec::new();
        let mut suggestions = Vec::new();
        for f in feature::list(self.resolver)? {
            let id = f.id.clone();
            let epic = f.epic.clone();
            let superseded = f.superseded;
            let next = suggest_for_feature(f, product);
            suggestions.push(next.clone());
            features.push(FeatureStatus {
                id,
                epic,
                phase: next.phase,
                superseded,
                next,
            });
        }
        let ctx = ProjectContext {
            product_defined: product,
            architecture_defined: architecture,
            open_features: suggestions.iter().filter(|s| !s.is_done()).count(),
            total_features: suggestions.len(),
        };
        Ok(StatusReport {
            product_defined: product,
            architecture_defined: architecture,
            features,
            next: project_suggestion(&ctx, suggestions),
        })
    }
}

fn suggest_for_feature(feature: Feature, product: bool) -> Suggestion {
    let phase = project_phase(&feature, product);
    let ctx = FeatureContext { feature, phase };
    let rules = rules::default_feature_rules();
    match rules::first_match(&rules, &ctx) {
        Some(rule) => Suggestion {
            feature: Some(ctx.feature.id.clone()),
            phase,
            command: rule.step.map(|s| command_for(s, &ctx.feature)),
            reason: (rule.message)(&ctx),
            rule: rule.id,
        },
        None => Suggestion {
            feature: Some(ctx.feature.id.clone()),
            phase,
            command: None,
            reason: format!("{} is reviewed; nothing left to do", ctx.feature.id),
            rule: "done",
        },
    }
}

fn command_for(step: Step, feature: &Feature) -> String {
    if step.is_feature_scoped() {
        step.command_line(Some(&feature.id))
    } else if step == Step::AddFeature {
        step.command_line(Some(&feature.name))
    } else {
        step.command_line(None)
    }
}

/// Project rules first; otherwise the first feature with work left.
fn project_suggestion(ctx: &ProjectContext, features: Vec<Suggestion>) -> Suggestion {
    let phase = if ctx.product_defined {
        Phase::ProductDefined
    } else {
        Phase::NotStarted
    };
    let rules = rules::default_project_rules();
    if let Some(rule) = rules::first_match(&rules, ctx) {
        return Suggestion {
            feature: None,
            phase,
            command: rule.step.map(|s| s.command_line(None)),
            reason: (rule.message)(ctx),
            rule: rule.id,
        };
    }
    features
        .into_iter()
        .find(|s| !s.is_done())
        .unwrap_or(Suggestion {
            feature: None,
            phase,
            command: None,
            reason: "all features are reviewed".to_string(),
            rule: "done",
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::PathConfig;
    use crate::types::ArtifactKind;
    use std::path::Path;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    const FEATURE_MD: &str = "# Login\n\n## Acceptance Criteria\n- [ ] user can sign in\n";
    const PLAN_MD: &str = "# Plan\n\n## Tasks\n- [ ] form\n- [ ] session\n";
    const DONE_PLAN_MD: &str = "# Plan\n\n## Tasks\n- [x] form\n- [x] session\n";

    struct Project {
        _dir: TempDir,
        resolver: PathResolver,
    }

    impl Project {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let resolver = PathResolver::new(dir.path(), PathConfig::default());
            Self {
                _dir: dir,
                resolver,
            }
        }

        fn engine(&self) -> WorkflowEngine<'_> {
            WorkflowEngine::new(&self.resolver)
        }

        fn write(&self, path: &Path, content: &str) {
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }

        fn product(&self) {
            self.write(&self.resolver.product_doc().unwrap(), "# Shop\n");
        }

        fn artifact(&self, id: &str, kind: ArtifactKind, content: &str) {
            self.write(&self.resolver.feature_artifact(id, kind).unwrap(), content);
        }

        fn age(&self, id: &str, kind: ArtifactKind, secs: u64) {
            let path = self.resolver.feature_artifact(id, kind).unwrap();
            let file = std::fs::File::options().write(true).open(path).unwrap();
            file.set_modified(SystemTime::now() - Duration::from_secs(secs))
                .unwrap();
        }
    }

    const ID: &str = "F010-Login";

    #[test]
    fn every_edge_is_declared_once() {
        for t in TRANSITIONS {
            assert_eq!(TRANSITIONS.iter().filter(|o| o.step == t.step).count(), 1);
            assert!(!t.from.contains(&t.to), "{} loops onto itself", t.step);
        }
        assert!(transition(Step::UpdateFeature)
            .unwrap()
            .allows(Phase::Reviewed));
        assert!(!transition(Step::ImplementFeature)
            .unwrap()
            .allows(Phase::FeaturesDefined));
        assert!(transition(Step::PlanFeature).unwrap().allows(Phase::Planned));
        assert!(transition(Step::RecordDecision).is_none());
    }

    #[test]
    fn projection_walks_the_lifecycle() {
        let p = Project::new();
        let e = p.engine();
        assert_eq!(e.phase(None).unwrap(), Phase::NotStarted);

        p.product();
        assert_eq!(e.phase(None).unwrap(), Phase::ProductDefined);

        p.artifact(ID, ArtifactKind::Feature, FEATURE_MD);
        p.age(ID, ArtifactKind::Feature, 60);
        assert_eq!(e.phase(Some(ID)).unwrap(), Phase::FeaturesDefined);

        p.artifact(ID, ArtifactKind::Plan, PLAN_MD);
        assert_eq!(e.phase(Some(ID)).unwrap(), Phase::Planned);

        p.artifact(ID, ArtifactKind::Plan, DONE_PLAN_MD);
        assert_eq!(e.phase(Some(ID)).unwrap(), Phase::Implemented);

        p.artifact(ID, ArtifactKind::Review, "# Review\nLGTM\n");
        assert_eq!(e.phase(Some(ID)).unwrap(), Phase::Reviewed);
    }

    #[test]
    fn plan_without_acceptance_criteria_stays_features_defined() {
        let p = Project::new();
        p.product();
        p.artifact(ID, ArtifactKind::Feature, "# Login\n\n## Summary\n");
        p.age(ID, ArtifactKind::Feature, 60);
        p.artifact(ID, ArtifactKind::Plan, PLAN_MD);
        assert_eq!(p.engine().phase(Some(ID)).unwrap(), Phase::FeaturesDefined);
    }

    #[test]
    fn editing_feature_after_review_re_enters_features_defined() {
        let p = Project::new();
        p.product();
        p.artifact(ID, ArtifactKind::Feature, FEATURE_MD);
        p.artifact(ID, ArtifactKind::Plan, DONE_PLAN_MD);
        p.artifact(ID, ArtifactKind::Review, "ok\n");
        p.age(ID, ArtifactKind::Feature, 120);
        p.age(ID, ArtifactKind::Plan, 60);
        assert_eq!(p.engine().phase(Some(ID)).unwrap(), Phase::Reviewed);

        // update-feature rewrites feature.md
        p.artifact(ID, ArtifactKind::Feature, FEATURE_MD);
        let e = p.engine();
        assert_eq!(e.phase(Some(ID)).unwrap(), Phase::FeaturesDefined);
        let next = e.next(Some(ID)).unwrap();
        assert_eq!(next.command.as_deref(), Some("/plan-feature F010-Login"));
        assert_eq!(next.rule, "stale-plan");
    }

    #[test]
    fn guard_reports_missing_acceptance_criteria() {
        let p = Project::new();
        p.product();
        p.artifact(ID, ArtifactKind::Feature, "# Login\n");
        let err = p.engine().guard(Step::PlanFeature, Some(ID)).unwrap_err();
        match err {
            FlowError::PhaseGuardViolation {
                feature,
                missing,
                remedy,
                ..
            } => {
                assert_eq!(feature, ID);
                assert!(missing.ends_with("feature.md"));
                assert_eq!(remedy, "/update-feature F010-Login");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn guard_rejects_out_of_order_step() {
        let p = Project::new();
        p.product();
        p.artifact(ID, ArtifactKind::Feature, FEATURE_MD);
        p.artifact(ID, ArtifactKind::Plan, PLAN_MD);
        p.age(ID, ArtifactKind::Plan, 60);
        // plan.md exists (prerequisites pass) but is older than feature.md
        let err = p
            .engine()
            .guard(Step::ImplementFeature, Some(ID))
            .unwrap_err();
        match err {
            FlowError::InvalidTransition { from, reason, .. } => {
                assert_eq!(from, "features_defined");
                assert!(reason.contains("/plan-feature F010-Login"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn guard_allows_rerun_at_target() {
        let p = Project::new();
        p.product();
        p.artifact(ID, ArtifactKind::Feature, FEATURE_MD);
        p.age(ID, ArtifactKind::Feature, 60);
        p.artifact(ID, ArtifactKind::Plan, PLAN_MD);
        assert!(p.engine().guard(Step::PlanFeature, Some(ID)).is_ok());
        assert!(p.engine().guard(Step::DefineProduct, None).is_ok());
        assert!(p.engine().guard(Step::AddFeature, None).is_ok());
    }

    #[test]
    fn next_for_project_follows_rules() {
        let p = Project::new();
        let e = p.engine();
        assert_eq!(e.next(None).unwrap().command.as_deref(), Some("/define-product"));

        p.product();
        assert_eq!(
            e.next(None).unwrap().command.as_deref(),
            Some("/define-architecture")
        );

        p.artifact(ID, ArtifactKind::Feature, "# Login\n");
        let next = e.next(None).unwrap();
        assert_eq!(next.command.as_deref(), Some("/update-feature F010-Login"));
        assert_eq!(next.feature.as_deref(), Some(ID));
    }

    #[test]
    fn status_lists_every_feature() {
        let p = Project::new();
        p.product();
        p.artifact("F001-Signup", ArtifactKind::Feature, FEATURE_MD);
        p.artifact(ID, ArtifactKind::Feature, FEATURE_MD);
        p.age(ID, ArtifactKind::Feature, 60);
        p.artifact(ID, ArtifactKind::Plan, PLAN_MD);

        let report = p.engine().status().unwrap();
        assert!(report.product_defined);
        assert_eq!(report.features.len(), 2);
        assert_eq!(report.features[0].id, "F001-Signup");
        assert_eq!(report.features[0].phase, Phase::FeaturesDefined);
        assert_eq!(report.features[1].phase, Phase::Planned);
        assert_eq!(
            report.next.command.as_deref(),
            Some("/plan-feature F001-Signup")
        );
    }
}
