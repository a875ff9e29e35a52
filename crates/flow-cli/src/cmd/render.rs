use crate::cmd::{open_workspace, KindArg};
use crate::output::{print_json, print_warnings};
use flow_core::substitute::Arguments;
use std::path::{Path, PathBuf};

pub fn run(
    root: &Path,
    plugins: Vec<PathBuf>,
    name: &str,
    args: &[String],
    kind: KindArg,
    strict: bool,
    json: bool,
) -> anyhow::Result<()> {
    let ws = open_workspace(root, plugins)?;
    let (template, rendered) = ws.render(kind.into(), name, Arguments::from_vec(args), strict)?;

    if json {
        return print_json(&serde_json::json!({
            "name": template.name,
            "kind": template.kind,
            "path": template.path,
            "description": template.frontmatter.description,
            "allowed_tools": template.frontmatter.allowed_tools,
            "model": template.frontmatter.model,
            "text": rendered.text,
            "warnings": rendered.warnings,
        }));
    }

    print!("{}", rendered.text);
    if !rendered.text.ends_with('\n') {
        println!();
    }
    let warnings: Vec<String> = rendered
        .warnings
        .iter()
        .map(|w| format!("unresolved placeholder {} on line {}", w.token, w.line))
        .collect();
    print_warnings(&warnings);
    Ok(())
}
