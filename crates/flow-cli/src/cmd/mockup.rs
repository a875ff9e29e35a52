use crate::cmd::run::finish;
use crate::cmd::{block_on, dispatcher, open_workspace, AgentArgs};
use flow_core::pipeline::{MockupRequest, Pipeline};
use flow_core::substitute::Arguments;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[allow(clippy::too_many_arguments)]
pub fn run(
    root: &Path,
    plugins: Vec<PathBuf>,
    args: &[String],
    variants: Option<usize>,
    model: Option<String>,
    strict: bool,
    agent: &AgentArgs,
    json: bool,
) -> anyhow::Result<()> {
    let ws = open_workspace(root, plugins)?;
    let dispatcher = Arc::new(dispatcher(&ws, agent)?);
    let pipeline = Pipeline::new(ws, dispatcher);

    let request = MockupRequest {
        arguments: Arguments::from_vec(args),
        variants,
        model,
        strict,
    };
    let report = block_on(pipeline.mockup(request))??;
    finish(&report, json)
}
