use std::path::PathBuf;
use thiserror::Error;

pub type BriskResult<T> = Result<T, BriskError>;

#[derive(Error, Debug)]
pub enum BriskError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Could not resolve '{specifier}' from {}", importer.display())]
    Resolution {
        importer: PathBuf,
        specifier: String,
        candidates: Vec<PathBuf>,
    },

    #[error("Transform failed in {hook} for {}: {cause}", path.display())]
    Transform {
        path: PathBuf,
        hook: String,
        cause: String,
    },

    #[error("Plugin '{plugin}' failed: {message}")]
    Plugin { plugin: String, message: String },

    #[error("Chunking error: {0}")]
    Chunking(String),

    #[error("Path error: {0}")]
    Path(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Proxy error: {0}")]
    Proxy(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Watch error: {0}")]
    Watch(String),
}

impl BriskError {
    /// Build a transform error for a failing hook.
    pub fn transform(path: impl Into<PathBuf>, hook: impl Into<String>, cause: impl ToString) -> Self {
        BriskError::Transform {
            path: path.into(),
            hook: hook.into(),
            cause: cause.to_string(),
        }
    }

    pub fn plugin(plugin: impl Into<String>, message: impl ToString) -> Self {
        BriskError::Plugin {
            plugin: plugin.into(),
            message: message.to_string(),
        }
    }

    /// Whether the error is the user's fault (bad input) rather than an internal bug.
    pub fn is_user_error(&self) -> bool {
        !matches!(self, BriskError::Chunking(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_error_names_specifier_and_importer() {
        let error = BriskError::Resolution {
            importer: PathBuf::from("/app/src/index.ts"),
            specifier: "./missing".to_string(),
            candidates: vec![PathBuf::from("/app/src/missing.ts")],
        };
        let message = error.to_string();
        assert!(message.contains("./missing"));
        assert!(message.contains("/app/src/index.ts"));
    }

    #[test]
    fn test_chunking_error_is_internal() {
        assert!(!BriskError::Chunking("orphan".to_string()).is_user_error());
        assert!(BriskError::Config("bad".to_string()).is_user_error());
    }
}
