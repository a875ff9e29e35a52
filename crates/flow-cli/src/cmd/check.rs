use crate::cmd::open_workspace;
use crate::output::print_json;
use anyhow::Context;
use flow_core::feature;
use flow_core::prereq::PrerequisiteValidator;
use flow_core::types::Step;
use std::path::{Path, PathBuf};

pub fn run(
    root: &Path,
    plugins: Vec<PathBuf>,
    step: &str,
    feature_query: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let ws = open_workspace(root, plugins)?;
    let step: Step = step.parse()?;

    // Accept a unique prefix for existing features.
    let feature_id = match feature_query {
        Some(q) if step.is_feature_scoped() => Some(
            feature::find(&ws.resolver, q)
                .with_context(|| format!("cannot check {step}"))?
                .id,
        ),
        Some(q) => Some(q.to_string()),
        None => None,
    };

    let result = PrerequisiteValidator::new(&ws.resolver).check(step, feature_id.as_deref())?;

    if json {
        print_json(&result)?;
    } else {
        let subject = feature_id.as_deref().unwrap_or("project");
        if result.ok {
            println!("ok: {step} can run for {subject}");
        } else {
            println!("blocked: {step} cannot run for {subject}");
        }
        if let Some(f) = &result.failure {
            println!("  missing  {}: {}", f.artifact, f.reason);
            println!("  run      {}", f.remedy);
        }
        for w in &result.warnings {
            println!("  warning  {}: {} (run {})", w.artifact, w.reason, w.remedy);
        }
    }

    if !result.ok {
        let reason = result.reason.unwrap_or_else(|| "prerequisites not met".into());
        anyhow::bail!("{reason}");
    }
    Ok(())
}
