use crate::cmd::open_workspace;
use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use flow_core::artifact::ArtifactWriter;
use flow_core::feature;
use flow_core::paths::display_relative;
use flow_core::pipeline::Workspace;
use flow_core::workflow::project_phase;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum FeatureSubcommand {
    /// List features in number order
    List,

    /// Show one feature's artifacts and phase
    Show {
        /// Feature id or unique prefix, e.g. F010 or F010-Login
        id: String,
    },

    /// Mark a feature superseded (features are never deleted)
    Supersede {
        id: String,
        /// Feature that replaces it
        #[arg(long)]
        by: Option<String>,
        /// Free-form note recorded in the Superseded section
        #[arg(long)]
        note: Option<String>,
    },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(
    root: &Path,
    plugins: Vec<PathBuf>,
    subcmd: FeatureSubcommand,
    json: bool,
) -> anyhow::Result<()> {
    let ws = open_workspace(root, plugins)?;
    match subcmd {
        FeatureSubcommand::List => list(&ws, json),
        FeatureSubcommand::Show { id } => show(&ws, &id, json),
        FeatureSubcommand::Supersede { id, by, note } => {
            supersede(&ws, &id, by.as_deref(), note.as_deref(), json)
        }
    }
}

fn list(ws: &Workspace, json: bool) -> anyhow::Result<()> {
    let features = feature::list(&ws.resolver).context("failed to list features")?;
    let product = ws.workflow().product_defined()?;

    if json {
        let items: Vec<_> = features
            .iter()
            .map(|f| {
                serde_json::json!({
                    "id": f.id,
                    "epic": f.epic,
                    "phase": project_phase(f, product),
                    "superseded": f.superseded,
                })
            })
            .collect();
        return print_json(&items);
    }

    if features.is_empty() {
        println!("No features. Run: flow run add-feature <Name>");
        return Ok(());
    }
    let rows: Vec<Vec<String>> = features
        .iter()
        .map(|f| {
            vec![
                f.id.clone(),
                project_phase(f, product).to_string(),
                f.epic.clone().unwrap_or_else(|| "-".into()),
                if f.superseded { "yes".into() } else { "".into() },
            ]
        })
        .collect();
    print_table(&["ID", "PHASE", "EPIC", "SUPERSEDED"], &rows);
    Ok(())
}

fn show(ws: &Workspace, query: &str, json: bool) -> anyhow::Result<()> {
    let f = feature::find(&ws.resolver, query)?;
    let product = ws.workflow().product_defined()?;
    let phase = project_phase(&f, product);
    let next = ws.workflow().next(Some(&f.id))?;

    if json {
        return print_json(&serde_json::json!({
            "feature": f,
            "phase": phase,
            "next": next,
        }));
    }

    let yes = |b: bool| if b { "yes" } else { "no" };
    println!("Feature:      {}", f.id);
    if let Some(epic) = &f.epic {
        println!("Epic:         {epic}");
    }
    println!("Directory:    {}", display_relative(&ws.root, &f.dir));
    println!("Phase:        {phase}");
    println!("feature.md:   {}", yes(f.has_feature));
    println!("  criteria:   {}", yes(f.has_acceptance_criteria));
    println!(
        "plan.md:      {}{}",
        yes(f.has_plan),
        if f.has_plan && !f.plan_fresh { " (stale)" } else { "" }
    );
    println!("  done:       {}", yes(f.implemented));
    println!("review.md:    {}", yes(f.has_review));
    println!("Mockups:      {}", f.mockups);
    if f.superseded {
        match &f.superseded_by {
            Some(by) => println!("Superseded:   by {by}"),
            None => println!("Superseded:   yes"),
        }
    }
    if let Some(cmd) = &next.command {
        println!("Next:         {cmd}");
    }
    Ok(())
}

fn supersede(
    ws: &Workspace,
    id: &str,
    by: Option<&str>,
    note: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let writer = ArtifactWriter::new();
    let outcome = feature::supersede(&ws.resolver, &writer, id, by, note)
        .with_context(|| format!("failed to supersede {id}"))?;
    let f = feature::find(&ws.resolver, id)?;

    if json {
        return print_json(&serde_json::json!({
            "id": f.id,
            "superseded_by": f.superseded_by,
            "write": outcome,
        }));
    }
    match &f.superseded_by {
        Some(by) => println!("{} superseded by {by} ({})", f.id, outcome.label()),
        None => println!("{} superseded ({})", f.id, outcome.label()),
    }
    Ok(())
}
