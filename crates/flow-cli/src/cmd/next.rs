use crate::cmd::open_workspace;
use crate::output::print_json;
use std::path::{Path, PathBuf};

pub fn run(
    root: &Path,
    plugins: Vec<PathBuf>,
    feature: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let ws = open_workspace(root, plugins)?;
    let suggestion = ws.workflow().next(feature)?;

    if json {
        return print_json(&suggestion);
    }

    if let Some(id) = &suggestion.feature {
        println!("Feature:  {id}");
    }
    println!("Phase:    {}", suggestion.phase);
    println!("Reason:   {}", suggestion.reason);
    match &suggestion.command {
        Some(cmd) => println!("Command:  {cmd}"),
        None => println!("Command:  (none)"),
    }
    Ok(())
}
