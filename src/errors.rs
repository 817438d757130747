use std::path::*;

pub type Result<T> = std::result::Result<T, BiasPrepError>;

#[derive(Debug, thiserror::Error)]
pub enum BiasPrepError {
    #[error("Invalid observing night `{0}`: expected YYYY-MM-DD")]
    InvalidNight(String),

    #[error("Night catalog unavailable for {night}: {reason}")]
    CatalogUnavailable { night: String, reason: String },

    #[error("No `{kind}` frames found among {total} catalog records")]
    Selection { kind: String, total: usize },

    #[error("Staging directory `{}` does not exist", .0.display())]
    Precondition(PathBuf),

    #[error("Transfer of `{file_name}` failed: {reason}")]
    Transfer { file_name: String, reason: String },

    #[error("Frame `{}` is unreadable or can't be patched: {reason}", .path.display())]
    FrameCorruption { path: PathBuf, reason: String },

    #[error("Frame `{}` has no {key} value in its header", .path.display())]
    MetadataMissing { path: PathBuf, key: String },

    #[error("{what} contains non-ASCII text: {text:?}")]
    Encoding { what: String, text: String },

    #[error("Can't write launch script `{}`: {source}", .path.display())]
    ScriptWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BiasPrepError {
    pub fn corrupted(path: &Path, reason: impl ToString) -> Self {
        BiasPrepError::FrameCorruption {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}
