pub mod check;
pub mod commands;
pub mod config;
pub mod feature;
pub mod init;
pub mod mockup;
pub mod next;
pub mod render;
pub mod resolve;
pub mod run;
pub mod status;
pub mod write;

use anyhow::Context;
use clap::{Args, ValueEnum};
use flow_agent::{ClaudeCliDispatcher, DispatcherOptions};
use flow_core::artifact::WriteMode;
use flow_core::paths;
use flow_core::pipeline::Workspace;
use flow_core::types::TemplateKind;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Shared arguments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum KindArg {
    Command,
    Agent,
    Skill,
}

impl From<KindArg> for TemplateKind {
    fn from(k: KindArg) -> Self {
        match k {
            KindArg::Command => TemplateKind::Command,
            KindArg::Agent => TemplateKind::Agent,
            KindArg::Skill => TemplateKind::Skill,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ModeArg {
    /// Refuse to touch an existing file
    Create,
    /// Replace the whole file
    Overwrite,
    /// Replace matching `## ` sections, append new ones
    Merge,
}

impl From<ModeArg> for WriteMode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::Create => WriteMode::CreateOnly,
            ModeArg::Overwrite => WriteMode::OverwriteWhole,
            ModeArg::Merge => WriteMode::MergeSections,
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct AgentArgs {
    /// Agent executable (default: `claude` on PATH)
    #[arg(long, env = "FLOW_AGENT_BIN")]
    pub agent_bin: Option<PathBuf>,

    /// Argument placed before the generated flags when --agent-bin is set (repeatable)
    #[arg(long = "agent-arg", allow_hyphen_values = true)]
    pub agent_args: Vec<String>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub fn open_workspace(root: &Path, plugins: Vec<PathBuf>) -> anyhow::Result<Workspace> {
    Workspace::open(root, plugins)
        .with_context(|| format!("failed to load config for {}", root.display()))
}

/// Build the claude CLI dispatcher for `ws`, watching the product and
/// outputs trees for files the agent writes itself.
pub fn dispatcher(ws: &Workspace, agent: &AgentArgs) -> anyhow::Result<ClaudeCliDispatcher> {
    let watch = vec![
        ws.resolver.product_root()?,
        ws.resolver.resolve(paths::OUTPUTS)?,
    ];
    let dispatcher = match &agent.agent_bin {
        Some(bin) => ClaudeCliDispatcher::new(
            DispatcherOptions::new(bin, &ws.root)
                .leading_args(agent.agent_args.clone())
                .watch(watch),
        ),
        None => ClaudeCliDispatcher::locate(&ws.root, watch)?,
    };
    tracing::debug!(program = %dispatcher.program().display(), "agent executable");
    Ok(dispatcher)
}

/// Run an async pipeline call on a fresh runtime.
pub fn block_on<F: std::future::Future>(fut: F) -> anyhow::Result<F::Output> {
    let rt = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    Ok(rt.block_on(fut))
}
