use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse claude output: {source}\n  output: {output}")]
    Parse {
        output: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("process error: {0}")]
    Process(String),

    #[error("agent reported an error: {0}")]
    Reported(String),

    #[error("`{0}` not found on PATH; install the Claude CLI or pass --agent-bin")]
    NotFound(String),
}
