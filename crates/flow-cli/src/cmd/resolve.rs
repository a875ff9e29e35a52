use crate::cmd::open_workspace;
use crate::output::print_json;
use flow_core::paths::display_relative;
use std::path::{Path, PathBuf};

pub fn run(root: &Path, plugins: Vec<PathBuf>, token: &str, json: bool) -> anyhow::Result<()> {
    let ws = open_workspace(root, plugins)?;
    let path = ws.resolver.resolve(token)?;
    let relative = display_relative(&ws.root, &path);

    if json {
        print_json(&serde_json::json!({
            "token": token,
            "path": path,
            "relative": relative,
        }))
    } else {
        println!("{relative}");
        Ok(())
    }
}
