use thiserror::Error;

#[derive(Debug, Error)]
pub enum FirewallError {
    #[error("Firewall backend not available: {0}")]
    NotAvailable(String),

    #[error("Failed to spawn {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{binary} failed (exit code {exit_code:?}): {stderr}")]
    Command {
        binary: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Chain '{0}' is not managed by this backend")]
    UnknownChain(String),

    #[error("Unsupported rule: {0}")]
    Unsupported(String),
}
