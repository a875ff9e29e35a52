use crate::cmd::open_workspace;
use crate::output::{print_json, print_table};
use clap::Subcommand;
use flow_core::config::WarnLevel;
use flow_core::paths::display_relative;
use std::path::{Path, PathBuf};

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show the effective config and resolved path tokens
    Show,

    /// Validate the config for common mistakes
    Validate,
}

pub fn run(
    root: &Path,
    plugins: Vec<PathBuf>,
    subcmd: ConfigSubcommand,
    json: bool,
) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Show => show(root, plugins, json),
        ConfigSubcommand::Validate => validate(root, plugins, json),
    }
}

// ---------------------------------------------------------------------------
// show
// ---------------------------------------------------------------------------

fn show(root: &Path, plugins: Vec<PathBuf>, json: bool) -> anyhow::Result<()> {
    let ws = open_workspace(root, plugins)?;
    let tokens = ws.resolver.tokens();

    let mut resolved = Vec::with_capacity(tokens.len());
    for token in &tokens {
        let shown = match ws.resolver.resolve(token) {
            Ok(path) => display_relative(&ws.root, &path),
            Err(e) => format!("<{e}>"),
        };
        resolved.push((token.clone(), shown));
    }

    if json {
        let paths: serde_json::Map<String, serde_json::Value> = resolved
            .into_iter()
            .map(|(t, p)| (t, serde_json::Value::String(p)))
            .collect();
        return print_json(&serde_json::json!({
            "root": ws.root,
            "plugins": ws.templates.roots(),
            "sources": ws.config.sources,
            "engine": ws.config.engine,
            "paths": paths,
        }));
    }

    println!("Root:    {}", ws.root.display());
    for p in ws.templates.roots() {
        println!("Plugin:  {}", p.display());
    }
    if ws.config.sources.is_empty() {
        println!("Config:  (defaults)");
    }
    for s in &ws.config.sources {
        println!("Config:  {}", s.display());
    }

    let e = &ws.config.engine;
    println!();
    println!("strict_substitution:   {}", e.strict_substitution);
    println!("max_parallel_agents:   {}", e.max_parallel_agents);
    match e.dispatch_timeout_secs {
        Some(secs) => println!("dispatch_timeout_secs: {secs}"),
        None => println!("dispatch_timeout_secs: none"),
    }
    println!("default_model:         {}", e.default_model);
    println!("mockup_variants:       {}", e.mockup_variants);

    println!();
    let rows: Vec<Vec<String>> = resolved
        .into_iter()
        .map(|(t, p)| vec![format!("{{{{{t}}}}}"), p])
        .collect();
    print_table(&["TOKEN", "PATH"], &rows);
    Ok(())
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

fn validate(root: &Path, plugins: Vec<PathBuf>, json: bool) -> anyhow::Result<()> {
    let ws = open_workspace(root, plugins)?;
    let mut warnings = ws.config.validate();

    // Overrides can be individually valid yet still escape the root once
    // expanded.
    for token in ws.resolver.tokens() {
        if let Err(e) = ws.resolver.resolve(&token) {
            warnings.push(flow_core::config::ConfigWarning {
                level: WarnLevel::Error,
                message: e.to_string(),
            });
        }
    }

    if json {
        print_json(&serde_json::json!({ "warnings": warnings }))?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("config validation found errors");
    }
    Ok(())
}
