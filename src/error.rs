use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ArchiverError {
    #[error("catalog liveness probe failed: {0}")]
    Probe(String),

    #[error("catalog request failed: {0}")]
    CatalogHttp(String),

    #[error("catalog returned status {status}: {message}")]
    CatalogStatus { status: u16, message: String },

    #[error("item transfer failed: {0}")]
    FetchHttp(String),

    #[error("item transfer returned status {status}: {message}")]
    FetchStatus { status: u16, message: String },

    #[error("failed to read state file at {0}")]
    StateRead(PathBuf),

    #[error("state file is not valid progress state: {0}")]
    #[diagnostic(help("delete the state file (lumo-ma reset --force) to start a fresh archive"))]
    StateParse(String),

    #[error("failed to write state file: {0}")]
    StateWrite(String),

    #[error("resume marker {0} not found in the catalog enumeration")]
    #[diagnostic(help(
        "the catalog contents or ordering changed since the last run; \
         run `lumo-ma reset --force` to restart from the beginning"
    ))]
    ResumeMarkerNotFound(String),

    #[error("missing config file lumo-ma.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
