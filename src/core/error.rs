//! ST-000: Crate error type.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while parsing, synthesizing, planning or submitting a stack.
#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("bootstrap script {} is not readable: {source}", path.display())]
    BootstrapScript {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0} validation error(s)")]
    Validation(usize),

    #[error("invalid template: {0}")]
    Template(String),

    #[error("dependency cycle detected involving: {0}")]
    Cycle(String),

    #[error("state error: {0}")]
    State(String),

    #[error("provisioning engine failed: {0}")]
    Engine(String),

    #[error("audit failed: {0} finding(s)")]
    Audit(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
