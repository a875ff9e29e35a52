mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{
    config::ConfigSubcommand, feature::FeatureSubcommand, AgentArgs, KindArg, ModeArg,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "flow",
    about = "Template and workflow engine for Product Flow plugins: resolve paths, render commands, guard phases, write artifacts",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .claude/ or .git/)
    #[arg(long, global = true, env = "FLOW_ROOT")]
    root: Option<PathBuf>,

    /// Plugin directory holding commands/, agents/ and skills/ (repeatable; first wins)
    #[arg(
        long = "plugin",
        global = true,
        env = "FLOW_PLUGIN_DIRS",
        value_delimiter = if cfg!(windows) { ';' } else { ':' }
    )]
    plugins: Vec<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the product layout and a starter config
    Init,

    /// List available templates
    Commands {
        /// Template kind to list
        #[arg(long, value_enum, default_value_t = KindArg::Command)]
        kind: KindArg,
    },

    /// Resolve a path token such as FEATURES or {{MOCKUPS}}
    Resolve {
        token: String,
    },

    /// Render a template without running it
    Render {
        /// Template name, e.g. plan-feature
        name: String,
        /// Arguments bound to $ARGUMENTS and $1..$n
        args: Vec<String>,
        #[arg(long, value_enum, default_value_t = KindArg::Command)]
        kind: KindArg,
        /// Fail on unresolved placeholders
        #[arg(long)]
        strict: bool,
    },

    /// Check the prerequisites of a workflow step
    Check {
        /// Step name, e.g. plan-feature
        step: String,
        /// Feature id or unique prefix (feature-scoped steps)
        feature: Option<String>,
    },

    /// Show the phase of every feature
    Status,

    /// Suggest the next command
    Next {
        /// Feature id or unique prefix (omit for the whole project)
        #[arg(long = "for")]
        feature: Option<String>,
    },

    /// Inspect and supersede features
    Feature {
        #[command(subcommand)]
        subcommand: FeatureSubcommand,
    },

    /// Write stdin to an artifact
    Write {
        /// Project-relative path; may start with a token, e.g. {{FEATURES}}/F001-Login/plan.md
        path: String,
        #[arg(long, value_enum, default_value_t = ModeArg::Create)]
        mode: ModeArg,
    },

    /// Run a slash command end to end through the agent
    Run {
        /// Command name, e.g. plan-feature or /plan-feature
        command: String,
        /// Command arguments
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
        /// Model override
        #[arg(long)]
        model: Option<String>,
        /// Fail on unresolved placeholders
        #[arg(long)]
        strict: bool,
        #[command(flatten)]
        agent: AgentArgs,
    },

    /// Generate mockup variants in parallel
    Mockup {
        /// Arguments bound to $ARGUMENTS and $1..$n in every variant
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
        /// Number of variants (default: engine.mockup_variants)
        #[arg(long)]
        variants: Option<usize>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        strict: bool,
        #[command(flatten)]
        agent: AgentArgs,
    },

    /// Show or validate the effective config
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Run { .. } | Commands::Mockup { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());
    let plugins = root::plugin_roots(&root, &cli.plugins);
    let json = cli.json;

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root, plugins, json),
        Commands::Commands { kind } => cmd::commands::run(&root, plugins, kind, json),
        Commands::Resolve { token } => cmd::resolve::run(&root, plugins, &token, json),
        Commands::Render {
            name,
            args,
            kind,
            strict,
        } => cmd::render::run(&root, plugins, &name, &args, kind, strict, json),
        Commands::Check { step, feature } => {
            cmd::check::run(&root, plugins, &step, feature.as_deref(), json)
        }
        Commands::Status => cmd::status::run(&root, plugins, json),
        Commands::Next { feature } => cmd::next::run(&root, plugins, feature.as_deref(), json),
        Commands::Feature { subcommand } => cmd::feature::run(&root, plugins, subcommand, json),
        Commands::Write { path, mode } => cmd::write::run(&root, plugins, &path, mode, json),
        Commands::Run {
            command,
            args,
            model,
            strict,
            agent,
        } => cmd::run::run(&root, plugins, &command, &args, model, strict, &agent, json),
        Commands::Mockup {
            args,
            variants,
            model,
            strict,
            agent,
        } => cmd::mockup::run(&root, plugins, &args, variants, model, strict, &agent, json),
        Commands::Config { subcommand } => cmd::config::run(&root, plugins, subcommand, json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
