use std::path::PathBuf;

/// Every failure the crate can report. None of them are transient: the right
/// response is to stop and surface which file, tensor or shape disagreed.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed IDX header, magic mismatch, bad label or unreadable manifest.
    #[error("format error in {source_name}: {message}")]
    Format { source_name: String, message: String },

    /// A subset asked for more samples than the pool holds.
    #[error("cannot draw {requested} samples from a dataset of {available}")]
    InsufficientSamples { requested: usize, available: usize },

    /// A tensor required by the topology is missing at export time.
    #[error("incomplete export: {tensor} is missing ({reason})")]
    IncompleteExport { tensor: String, reason: String },

    /// Chained layer shapes or a payload length disagree with a declaration.
    #[error("shape mismatch in {context}: expected {expected}, found {found}")]
    ShapeMismatch {
        context: String,
        expected: String,
        found: String,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("checkpoint serialization failed for {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn format(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Format {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    pub(crate) fn shape(
        context: impl Into<String>,
        expected: impl ToString,
        found: impl ToString,
    ) -> Self {
        Error::ShapeMismatch {
            context: context.into(),
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
