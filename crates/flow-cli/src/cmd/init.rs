use crate::cmd::open_workspace;
use crate::output::print_json;
use std::path::{Path, PathBuf};

pub fn run(root: &Path, plugins: Vec<PathBuf>, json: bool) -> anyhow::Result<()> {
    let ws = open_workspace(root, plugins)?;
    let created = ws.init()?;

    if json {
        return print_json(&serde_json::json!({ "created": created }));
    }
    if created.is_empty() {
        println!("Already initialized: {}", root.display());
    } else {
        for path in &created {
            println!("created {path}");
        }
    }
    let next = ws.workflow().next(None)?;
    if let Some(cmd) = &next.command {
        println!("\nNext: {cmd}");
    }
    Ok(())
}
