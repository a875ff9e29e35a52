use crate::cmd::open_workspace;
use crate::output::{print_json, print_table};
use std::path::{Path, PathBuf};

pub fn run(root: &Path, plugins: Vec<PathBuf>, json: bool) -> anyhow::Result<()> {
    let ws = open_workspace(root, plugins)?;
    let report = ws.workflow().status()?;

    if json {
        return print_json(&report);
    }

    let mark = |b: bool| if b { "yes" } else { "no" };
    println!("Product:      {}", mark(report.product_defined));
    println!("Architecture: {}", mark(report.architecture_defined));

    if report.features.is_empty() {
        println!("\nNo features yet.");
    } else {
        println!();
        let rows: Vec<Vec<String>> = report
            .features
            .iter()
            .map(|f| {
                let phase = if f.superseded {
                    format!("{} (superseded)", f.phase)
                } else {
                    f.phase.to_string()
                };
                vec![
                    f.id.clone(),
                    f.epic.clone().unwrap_or_else(|| "-".into()),
                    phase,
                    f.next.command.clone().unwrap_or_else(|| "-".into()),
                ]
            })
            .collect();
        print_table(&["FEATURE", "EPIC", "PHASE", "NEXT"], &rows);
    }

    println!();
    match &report.next.command {
        Some(cmd) => println!("Next: {cmd}  ({})", report.next.reason),
        None => println!("Done: {}", report.next.reason),
    }
    Ok(())
}
