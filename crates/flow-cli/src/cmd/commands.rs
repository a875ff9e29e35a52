use crate::cmd::{open_workspace, KindArg};
use crate::output::{print_json, print_table};
use flow_core::template::Template;
use flow_core::types::TemplateKind;
use std::path::{Path, PathBuf};

pub fn run(root: &Path, plugins: Vec<PathBuf>, kind: KindArg, json: bool) -> anyhow::Result<()> {
    let ws = open_workspace(root, plugins)?;
    let kind = TemplateKind::from(kind);

    if kind == TemplateKind::Command {
        let commands = ws.templates.list_commands()?;
        if json {
            return print_json(&commands);
        }
        if commands.is_empty() {
            println!("No commands found in {}", search_path(ws.templates.roots()));
            return Ok(());
        }
        let rows: Vec<Vec<String>> = commands
            .into_iter()
            .map(|c| {
                vec![
                    format!("/{}", c.name),
                    c.arg_hint.unwrap_or_default(),
                    c.description,
                ]
            })
            .collect();
        print_table(&["COMMAND", "ARGS", "DESCRIPTION"], &rows);
        return Ok(());
    }

    let templates = ws.templates.list(kind)?;
    if json {
        let items: Vec<&Template> = templates.iter().map(|t| &**t).collect();
        return print_json(&items);
    }
    if templates.is_empty() {
        println!("No {kind} templates found in {}", search_path(ws.templates.roots()));
        return Ok(());
    }
    let rows: Vec<Vec<String>> = templates
        .iter()
        .map(|t| {
            vec![
                t.name.clone(),
                t.frontmatter.model.clone().unwrap_or_else(|| "-".into()),
                t.frontmatter.description.clone(),
            ]
        })
        .collect();
    print_table(&["NAME", "MODEL", "DESCRIPTION"], &rows);
    Ok(())
}

fn search_path(roots: &[PathBuf]) -> String {
    roots
        .iter()
        .map(|r| r.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
