use std::time::Duration;

use thiserror::Error;

/// Configuration-level failures: bad aliases and bad chain references.
/// These are fatal for the invocation; main prints them and exits non-zero.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no server with alias '{alias}'. Known aliases: {}", .known.join(", "))]
    UnknownAlias { alias: String, known: Vec<String> },

    #[error("'{alias}' requires a login to '{required}', but no server has that alias")]
    UnresolvedRequirement { alias: String, required: String },

    #[error("login chain through '{alias}' loops back on itself")]
    LoginCycle { alias: String },
}

/// Failures while waiting for a pattern in the session's output stream.
/// End-of-stream and timeout are deliberately distinct variants; both carry
/// the unmatched pattern and the trailing output so the user can see what
/// the remote actually said.
#[derive(Debug, Error)]
pub enum ExpectError {
    #[error("session ended before '{pattern}' appeared. Last output: {trailing:?}")]
    Eof { pattern: String, trailing: String },

    #[error("no '{pattern}' within {timeout:?}. Last output: {trailing:?}")]
    Timeout {
        pattern: String,
        timeout: Duration,
        trailing: String,
    },

    #[error("terminal session I/O failed")]
    Io(#[from] std::io::Error),
}
