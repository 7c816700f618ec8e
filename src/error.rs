use std::path::PathBuf;

/// Application error taxonomy. Every failure carries a category so the
/// workflow driver can decide what is fatal and what is merely counted.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("file error: {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("analysis error: {message}")]
    Analysis {
        message: String,
        /// Raw oracle text kept for diagnosis when JSON parsing failed.
        raw: Option<String>,
    },

    #[error("generation error: {0}")]
    Generation(String),

    #[error("API error{}: {message}", .status.map(|s| format!(" (status {s})")).unwrap_or_default())]
    Api {
        status: Option<u16>,
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    #[error("cache error: {0}")]
    Cache(String),

    #[error("workflow error in step '{step}': {source}")]
    Workflow {
        step: String,
        #[source]
        source: Box<AppError>,
    },
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation(message.into())
    }

    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AppError::File {
            path: path.into(),
            source,
        }
    }

    pub fn analysis(message: impl Into<String>, raw: Option<String>) -> Self {
        AppError::Analysis {
            message: message.into(),
            raw,
        }
    }

    pub fn api(status: Option<u16>, message: impl Into<String>) -> Self {
        AppError::Api {
            status,
            message: message.into(),
            source: None,
        }
    }

    pub fn transport(err: reqwest::Error) -> Self {
        AppError::Api {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
            source: Some(err),
        }
    }

    pub fn in_step(self, step: &str) -> Self {
        AppError::Workflow {
            step: step.to_string(),
            source: Box::new(self),
        }
    }

    /// Non-429 client errors are terminal; everything transport-shaped or
    /// server-side may be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Api { status, source, .. } => match status {
                Some(429) => true,
                Some(code) if *code >= 500 => true,
                Some(_) => false,
                None => source
                    .as_ref()
                    .map(|e| e.is_timeout() || e.is_connect() || e.is_request())
                    .unwrap_or(true),
            },
            _ => false,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, AppError::Api { status: Some(429), .. })
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
