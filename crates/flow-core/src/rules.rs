use crate::feature::Feature;
use crate::types::{Phase, Step};

// ---------------------------------------------------------------------------
// Rule
// ---------------------------------------------------------------------------

/// A fn-pointer rule. The first rule whose condition holds decides the
/// suggestion; `step: None` means nothing is left to do.
pub struct Rule<C> {
    pub id: &'static str,
    pub condition: fn(&C) -> bool,
    pub step: Option<Step>,
    pub message: fn(&C) -> String,
}

macro_rules! rule {
    ($ctx:ty { id: $id:expr, condition: $cond:expr, step: $step:expr, message: $msg:expr $(,)? }) => {
        Rule::<$ctx> {
            id: $id,
            condition: $cond,
            step: $step,
            message: $msg,
        }
    };
}

/// Return the first matching rule.
pub fn first_match<'r, C>(rules: &'r [Rule<C>], ctx: &C) -> Option<&'r Rule<C>> {
    rules.iter().find(|r| (r.condition)(ctx))
}

// ---------------------------------------------------------------------------
// Feature rules
// ---------------------------------------------------------------------------

pub struct FeatureContext {
    pub feature: Feature,
    pub phase: Phase,
}

/// Rules for one feature, evaluated top to bottom.
pub fn default_feature_rules() -> Vec<Rule<FeatureContext>> {
    vec![
        rule!(FeatureContext {
            id: "superseded",
            condition: |c| c.feature.superseded,
            step: None,
            message: |c| match &c.feature.superseded_by {
                Some(by) => format!("{} is superseded by {by}", c.feature.id),
                None => format!("{} is superseded", c.feature.id),
            },
        }),
        rule!(FeatureContext {
            id: "missing-feature-doc",
            condition: |c| !c.feature.has_feature,
            step: Some(Step::AddFeature),
            message: |c| format!("{} has no feature.md", c.feature.id),
        }),
        rule!(FeatureContext {
            id: "needs-acceptance-criteria",
            condition: |c| c.phase == Phase::FeaturesDefined && !c.feature.has_acceptance_criteria,
            step: Some(Step::UpdateFeature),
            message: |c| format!(
                "{} has no Acceptance Criteria section; planning needs one",
                c.feature.id
            ),
        }),
        rule!(FeatureContext {
            id: "stale-plan",
            condition: |c| c.phase == Phase::FeaturesDefined && c.feature.has_plan && !c.feature.plan_fresh,
            step: Some(Step::PlanFeature),
            message: |c| format!("feature.md of {} changed after plan.md was written", c.feature.id),
        }),
        rule!(FeatureContext {
            id: "needs-plan",
            condition: |c| c.phase == Phase::FeaturesDefined,
            step: Some(Step::PlanFeature),
            message: |c| format!("{} is defined but not planned", c.feature.id),
        }),
        rule!(FeatureContext {
            id: "needs-implementation",
            condition: |c| c.phase == Phase::Planned,
            step: Some(Step::ImplementFeature),
            message: |c| format!("{} is planned; implement the tasks in plan.md", c.feature.id),
        }),
        rule!(FeatureContext {
            id: "needs-review",
            condition: |c| c.phase == Phase::Implemented,
            step: Some(Step::ReviewFeature),
            message: |c| format!("{} is implemented but not reviewed", c.feature.id),
        }),
    ]
}

// ---------------------------------------------------------------------------
// Project rules
// ---------------------------------------------------------------------------

pub struct ProjectContext {
    pub product_defined: bool,
    pub architecture_defined: bool,
    /// Features that are neither reviewed nor superseded.
    pub open_features: usize,
    pub total_features: usize,
}

pub fn default_project_rules() -> Vec<Rule<ProjectContext>> {
    vec![
        rule!(ProjectContext {
            id: "needs-product",
            condition: |c| !c.product_defined,
            step: Some(Step::DefineProduct),
            message: |_| "no product.md yet; start by defining the product".to_string(),
        }),
        rule!(ProjectContext {
            id: "needs-architecture",
            condition: |c| !c.architecture_defined && c.total_features == 0,
            step: Some(Step::DefineArchitecture),
            message: |_| "product is defined; architecture.md is recommended before adding features"
                .to_string(),
        }),
        rule!(ProjectContext {
            id: "needs-features",
            condition: |c| c.open_features == 0,
            step: Some(Step::AddFeature),
            message: |c| {
                if c.total_features == 0 {
                    "no features yet".to_string()
                } else {
                    "every feature is reviewed or superseded; add the next one".to_string()
                }
            },
        }),
    ]
}
