use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use flow_core::dispatch::{AgentDispatcher, DispatchError, DispatchRequest, DispatchResult};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use crate::snapshot::Snapshot;
use crate::types::CliResult;
use crate::{AgentError, Result};

pub const DEFAULT_PROGRAM: &str = "claude";

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DispatcherOptions {
    pub program: PathBuf,
    /// Placed before the generated flags, e.g. the script a wrapper runs.
    pub leading_args: Vec<String>,
    /// Working directory of the child; the project root.
    pub cwd: PathBuf,
    /// Directories whose files are diffed to report `files_written`.
    pub watch: Vec<PathBuf>,
    /// Appended after the generated flags.
    pub extra_args: Vec<String>,
}

impl DispatcherOptions {
    pub fn new(program: impl Into<PathBuf>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
            cwd: cwd.into(),
            watch: Vec::new(),
            extra_args: Vec::new(),
        }
    }

    pub fn leading_args(mut self, args: Vec<String>) -> Self {
        self.leading_args = args;
        self
    }

    pub fn watch(mut self, dirs: Vec<PathBuf>) -> Self {
        self.watch = dirs;
        self
    }
}

// ---------------------------------------------------------------------------
// ClaudeCliDispatcher
// ---------------------------------------------------------------------------

/// Runs one `claude --print --output-format json` process per request.
///
/// The prompt goes in on stdin and the single JSON result comes back on
/// stdout. Stderr is drained in the background and attached to the error
/// when the process exits non-zero.
#[derive(Debug, Clone)]
pub struct ClaudeCliDispatcher {
    options: DispatcherOptions,
}

impl ClaudeCliDispatcher {
    pub fn new(options: DispatcherOptions) -> Self {
        Self { options }
    }

    /// Find `claude` on PATH.
    pub fn locate(cwd: &Path, watch: Vec<PathBuf>) -> Result<Self> {
        let program = which::which(DEFAULT_PROGRAM)
            .map_err(|_| AgentError::NotFound(DEFAULT_PROGRAM.to_string()))?;
        Ok(Self::new(DispatcherOptions::new(program, cwd).watch(watch)))
    }

    pub fn program(&self) -> &Path {
        &self.options.program
    }

    fn build_command(&self, request: &DispatchRequest) -> Command {
        let mut cmd = Command::new(&self.options.program);
        cmd.args(&self.options.leading_args);
        cmd.arg("--print").arg("--output-format").arg("json");

        if let Some(model) = &request.model {
            cmd.arg("--model").arg(model);
        }

        if !request.allowed_tools.is_empty() {
            cmd.arg("--allowedTools").args(&request.allowed_tools);
        }

        cmd.args(&self.options.extra_args);
        cmd.current_dir(&self.options.cwd);

        // Nested sessions refuse to start while this is set.
        cmd.env_remove("CLAUDECODE");
        cmd.kill_on_drop(true);
        cmd
    }

    /// Run the CLI once and return its parsed result plus every file under
    /// the watched directories that changed during the run.
    pub async fn run(&self, request: &DispatchRequest) -> Result<(CliResult, Vec<PathBuf>)> {
        let before = Snapshot::take(&self.options.watch)?;
        let output = self.execute(request).await?;

        let result = CliResult::parse(&output).map_err(|source| AgentError::Parse {
            output: truncate(&output, 2000),
            source,
        })?;
        if result.failed() {
            let detail = match (result.result.as_deref(), result.subtype.as_deref()) {
                (Some(text), _) if !text.is_empty() => text.to_string(),
                (_, Some(subtype)) => subtype.to_string(),
                _ => "unknown error".to_string(),
            };
            return Err(AgentError::Reported(detail));
        }

        let after = Snapshot::take(&self.options.watch)?;
        Ok((result, before.changed(&after)))
    }

    async fn execute(&self, request: &DispatchRequest) -> Result<String> {
        let mut cmd = self.build_command(request);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn()?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Process("stdout not captured".into()))?;

        // Fed from a task so a child that writes before draining stdin
        // cannot deadlock against us.
        let writer = child.stdin.take().map(|mut stdin| {
            let prompt = request.prompt.clone();
            tokio::spawn(async move {
                stdin.write_all(prompt.as_bytes()).await?;
                stdin.shutdown().await
            })
        });

        let stderr_buf = Arc::new(Mutex::new(String::new()));
        let drain = child.stderr.take().map(|stderr| {
            let buf = Arc::clone(&stderr_buf);
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    if let Ok(mut b) = buf.lock() {
                        if !b.is_empty() {
                            b.push('\n');
                        }
                        b.push_str(&line);
                    }
                }
            })
        });

        let mut output = String::new();
        stdout.read_to_string(&mut output).await?;
        let status = child.wait().await?;

        if let Some(handle) = drain {
            let _ = handle.await;
        }
        if let Some(handle) = writer {
            match handle.await {
                Ok(Ok(())) => {}
                // The child may exit without reading its prompt.
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Ok(Err(e)) => return Err(e.into()),
                Err(e) => return Err(AgentError::Process(e.to_string())),
            }
        }

        if status.success() {
            return Ok(output);
        }

        let stderr = stderr_buf
            .lock()
            .ok()
            .map(|b| b.clone())
            .unwrap_or_default();
        let head = match status.code() {
            Some(code) => format!("claude exited with code {code}"),
            None => "claude terminated by signal".to_string(),
        };
        Err(AgentError::Process(if stderr.is_empty() {
            head
        } else {
            format!("{head}\nstderr: {stderr}")
        }))
    }
}

#[async_trait]
impl AgentDispatcher for ClaudeCliDispatcher {
    async fn dispatch(&self, request: DispatchRequest) -> std::result::Result<DispatchResult, DispatchError> {
        tracing::info!(label = %request.label, model = ?request.model, "dispatching to claude");
        match self.run(&request).await {
            Ok((result, files_written)) => {
                tracing::info!(
                    label = %request.label,
                    turns = result.num_turns,
                    cost_usd = result.total_cost_usd,
                    files = files_written.len(),
                    "claude finished"
                );
                Ok(DispatchResult {
                    text: result.text().to_string(),
                    files_written,
                })
            }
            Err(e) => {
                tracing::warn!(label = %request.label, error = %e, "claude dispatch failed");
                Err(DispatchError::Host(e.to_string()))
            }
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    /// Options running a shell script in place of the CLI.
    fn fake_cli(dir: &Path, body: &str) -> DispatcherOptions {
        let script = dir.join("fake-claude.sh");
        fs::write(&script, format!("{body}\n")).unwrap();
        DispatcherOptions::new("/bin/sh", dir)
            .leading_args(vec![script.to_string_lossy().into_owned()])
    }

    fn request(prompt: &str) -> DispatchRequest {
        DispatchRequest {
            label: "test".into(),
            prompt: prompt.into(),
            allowed_tools: vec!["Read".into(), "Write".into()],
            model: Some("sonnet".into()),
        }
    }

    #[tokio::test]
    async fn returns_result_text() {
        let dir = TempDir::new().unwrap();
        let options = fake_cli(
            dir.path(),
            r#"cat > /dev/null
echo '{"type":"result","subtype":"success","is_error":false,"result":"hello","num_turns":1}'"#,
        );
        let d = ClaudeCliDispatcher::new(options);
        let out = d.dispatch(request("prompt")).await.unwrap();
        assert_eq!(out.text, "hello");
        assert!(out.files_written.is_empty());
    }

    #[tokio::test]
    async fn passes_flags_and_prompt() {
        let dir = TempDir::new().unwrap();
        // Echo argv and stdin back through the result field.
        let options = fake_cli(
            dir.path(),
            r#"input=$(cat)
printf '{"is_error":false,"result":"%s|%s"}\n' "$*" "$input""#,
        );
        let d = ClaudeCliDispatcher::new(options);
        let out = d.dispatch(request("do it")).await.unwrap();
        assert_eq!(
            out.text,
            "--print --output-format json --model sonnet --allowedTools Read Write|do it"
        );
    }

    #[tokio::test]
    async fn reports_files_written_under_watched_dirs() {
        let dir = TempDir::new().unwrap();
        let product = dir.path().join("product");
        fs::create_dir_all(&product).unwrap();
        fs::write(product.join("untouched.md"), "x").unwrap();
        let options = fake_cli(
            dir.path(),
            r#"cat > /dev/null
echo '# Product' > product/product.md
echo '{"is_error":false,"result":"wrote it"}'"#,
        );
        let d = ClaudeCliDispatcher::new(options.watch(vec![product.clone()]));
        let out = d.dispatch(request("p")).await.unwrap();
        assert_eq!(out.files_written, vec![product.join("product.md")]);
    }

    #[tokio::test]
    async fn nonzero_exit_carries_stderr() {
        let dir = TempDir::new().unwrap();
        let options = fake_cli(dir.path(), "echo 'rate limited' >&2\nexit 3");
        let d = ClaudeCliDispatcher::new(options);
        let err = d.dispatch(request("p")).await.unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, DispatchError::Host(_)));
        assert!(msg.contains("code 3"), "{msg}");
        assert!(msg.contains("rate limited"), "{msg}");
    }

    #[tokio::test]
    async fn error_result_is_a_failure() {
        let dir = TempDir::new().unwrap();
        let options = fake_cli(
            dir.path(),
            r#"cat > /dev/null
echo '{"subtype":"error_max_turns","is_error":true}'"#,
        );
        let d = ClaudeCliDispatcher::new(options);
        let err = d.run(&request("p")).await.unwrap_err();
        assert!(matches!(err, AgentError::Reported(ref s) if s == "error_max_turns"));
    }

    #[tokio::test]
    async fn unparseable_output_is_a_parse_error() {
        let dir = TempDir::new().unwrap();
        let options = fake_cli(dir.path(), "cat > /dev/null\necho 'plain text'");
        let d = ClaudeCliDispatcher::new(options);
        let err = d.run(&request("p")).await.unwrap_err();
        assert!(matches!(err, AgentError::Parse { .. }));
    }

    #[tokio::test]
    async fn missing_program_is_io_error() {
        let dir = TempDir::new().unwrap();
        let d = ClaudeCliDispatcher::new(DispatcherOptions::new(
            dir.path().join("no-such-binary"),
            dir.path(),
        ));
        let err = d.run(&request("p")).await.unwrap_err();
        assert!(matches!(err, AgentError::Io(_)));
    }
}
