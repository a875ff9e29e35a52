use crate::cmd::{open_workspace, ModeArg};
use crate::output::print_json;
use anyhow::Context;
use flow_core::artifact::{ArtifactWriter, WriteMode};
use flow_core::paths::{self, display_relative};
use flow_core::pipeline::Workspace;
use std::io::Read;
use std::path::{Path, PathBuf};

pub fn run(
    root: &Path,
    plugins: Vec<PathBuf>,
    path: &str,
    mode: ModeArg,
    json: bool,
) -> anyhow::Result<()> {
    let ws = open_workspace(root, plugins)?;
    let target = target_path(&ws, path)?;

    let mut content = String::new();
    std::io::stdin()
        .read_to_string(&mut content)
        .context("failed to read stdin")?;

    let mode = WriteMode::from(mode);
    let outcome = ArtifactWriter::new()
        .write(&target, &content, mode)
        .with_context(|| format!("failed to write {path}"))?;
    let relative = display_relative(&ws.root, &target);

    if json {
        return print_json(&serde_json::json!({
            "path": relative,
            "mode": mode.as_str(),
            "write": outcome,
        }));
    }
    println!("{} {relative}", outcome.label());
    Ok(())
}

/// `{{TOKEN}}/rest` resolves through the path tokens; anything else is
/// taken relative to the project root. The result must stay inside it.
fn target_path(ws: &Workspace, arg: &str) -> anyhow::Result<PathBuf> {
    let joined = match arg.strip_prefix("{{").and_then(|s| s.split_once("}}")) {
        Some((token, rest)) => ws
            .resolver
            .resolve(token)?
            .join(rest.trim_start_matches('/')),
        None => ws.root.join(arg),
    };
    let path = paths::normalize(&joined);
    if !path.starts_with(paths::normalize(&ws.root)) {
        anyhow::bail!("{arg} resolves outside the project root");
    }
    Ok(path)
}
