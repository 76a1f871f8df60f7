use std::path::PathBuf;
use thiserror::Error;

/// Failures outside a transformation: loading configuration and files,
/// and command line input. Transformation problems are never errors; they
/// are records in the processor's log.
#[derive(Error, Debug)]
pub enum FolioError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid parameter '{0}', expected name=value")]
    InvalidParameter(String),
}

impl FolioError {
    pub fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FolioError::Read {
            path: path.into(),
            source,
        }
    }
}

/// Reads a whole file, naming it in the error.
pub fn read_file(path: &std::path::Path) -> Result<String, FolioError> {
    std::fs::read_to_string(path).map_err(|e| FolioError::read(path, e))
}
