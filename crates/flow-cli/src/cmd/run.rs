use crate::cmd::{block_on, dispatcher, open_workspace, AgentArgs};
use crate::output::{print_json, print_warnings};
use flow_core::pipeline::{Pipeline, RunReport, RunRequest, RunStatus};
use flow_core::substitute::Arguments;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[allow(clippy::too_many_arguments)]
pub fn run(
    root: &Path,
    plugins: Vec<PathBuf>,
    command: &str,
    args: &[String],
    model: Option<String>,
    strict: bool,
    agent: &AgentArgs,
    json: bool,
) -> anyhow::Result<()> {
    let ws = open_workspace(root, plugins)?;
    let dispatcher = Arc::new(dispatcher(&ws, agent)?);
    let pipeline = Pipeline::new(ws, dispatcher);

    let request = RunRequest {
        command: command.to_string(),
        arguments: Arguments::from_vec(args),
        model,
        strict,
    };
    let report = block_on(pipeline.run(request))??;
    finish(&report, json)
}

/// Print a report and fail when every mockup variant failed.
pub(crate) fn finish(report: &RunReport, json: bool) -> anyhow::Result<()> {
    if json {
        print_json(report)?;
    } else {
        print_report(report);
    }
    if let Some(m) = &report.mockups {
        if m.all_failed() {
            anyhow::bail!("all {} mockup variants failed", m.failed.len());
        }
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    print_warnings(&report.warnings);

    let subject = match &report.feature {
        Some(id) => format!("/{} {id}", report.command),
        None => format!("/{}", report.command),
    };
    match report.status {
        RunStatus::NothingToSync => {
            println!("{subject}: nothing to sync; feature.md is up to date");
        }
        RunStatus::Completed => println!("{subject}: done"),
    }

    for w in &report.written {
        println!("  {:<11} {}", w.outcome.label(), w.path);
    }
    for path in &report.agent_files {
        println!("  {:<11} {path}", "agent");
    }
    if let Some(m) = &report.mockups {
        for f in &m.failed {
            println!("  {:<11} variant {}: {}", "failed", f.variant, f.error);
        }
    }
    if let Some(next) = &report.next {
        match &next.command {
            Some(cmd) => println!("\nNext: {cmd}"),
            None => println!("\n{}", next.reason),
        }
    }
}
