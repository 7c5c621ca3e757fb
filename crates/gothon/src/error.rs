//! Error taxonomy for the gothon library.
//!
//! Three families matter to callers:
//! - analysis errors (bad directive, bad default value, rewrite failure),
//!   surfaced from [`Session::start`](crate::session::Session::start) before
//!   any worker is launched;
//! - configuration errors (bad environment variable, bad node count), which
//!   abort startup;
//! - IO errors from staging, endpoint setup, or worker spawning.
//!
//! Errors observed by register reader threads after startup are *not*
//! represented here: they are logged on the spot and end only the affected
//! thread (see `register.rs`).

use std::path::PathBuf;

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A `# gothon:` directive could not be parsed.
    #[error("invalid directive in {module}: `{line}`: {reason}")]
    Directive {
        module: String,
        line: String,
        reason: String,
    },

    /// A shared-variable declaration carried a default value that does not
    /// parse under the declared type.
    #[error("invalid default value `{value}` for `{variable}`: {reason}")]
    DefaultValue {
        variable: String,
        value: String,
        reason: String,
    },

    /// A statement was matched by the analyzer but the rewriter produced no
    /// change, which would silently ship the original shared access.
    #[error("rewrite produced no change at {module}:{line}: `{code}`")]
    Rewrite {
        module: String,
        line: usize,
        code: String,
    },

    /// The generated shim module is internally inconsistent (e.g. a socket
    /// without a matching address, or a missing helper template).
    #[error("shim generation failed: {0}")]
    Shim(String),

    /// An endpoint path referenced a variable with no register.
    #[error("no register for endpoint `{path}` (variable `{variable}`)")]
    UnknownRegister { path: String, variable: String },

    /// An endpoint path demanded an operation its register does not support.
    #[error("operation `{op}` is not valid for register `{variable}`")]
    InvalidOperation { variable: String, op: String },

    /// A configuration value (environment variable or CLI argument) was
    /// present but malformed.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The project directory contains no Python modules to run.
    #[error("no python modules found under {0}")]
    EmptyProject(PathBuf),

    /// Failed to spawn a worker process.
    #[error("failed to launch worker {node}: {source}")]
    WorkerSpawn {
        node: usize,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
