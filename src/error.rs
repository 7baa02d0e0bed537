//! Crate-wide error type.
//!
//! Every fatal condition of a load run maps to one variant. Each variant carries
//! a process exit code so `main` can report failures the same way regardless of
//! which stage raised them.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    /// Malformed or inconsistent configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Record source cannot be opened, is empty, or is malformed.
    #[error("record source '{source_name}': {message}")]
    Source { source_name: String, message: String },

    /// A requested variable is neither a field nor a formula over fields.
    #[error("cannot resolve variable '{name}' ({context})")]
    UnresolvedVariable { name: String, context: String },

    /// An enabled dial collection is neither binned nor per-event.
    #[error("dial collection '{0}' must be either binned or per-event")]
    InvalidDialCollection(String),

    /// Nominal weights must be non-negative.
    #[error("negative nominal weight in dataset '{dataset}' at entry {entry}: {weight}")]
    NegativeWeight { dataset: String, entry: usize, weight: f64 },

    /// The nominal weight formula evaluated to NaN.
    #[error("nominal weight in dataset '{dataset}' at entry {entry} is not a number")]
    NanWeight { dataset: String, entry: usize },

    /// Formula tokenize/parse error.
    #[error("expression error: {0}")]
    Expression(String),

    /// A pre-sized region overflowed. Indicates a counting/fill mismatch.
    #[error("capacity invariant violated: {0}")]
    Capacity(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl AppError {
    pub fn config(message: impl Into<String>) -> Self {
        AppError::Config(message.into())
    }

    pub fn source_error(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Source {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    pub fn unresolved(name: impl Into<String>, context: impl Into<String>) -> Self {
        AppError::UnresolvedVariable {
            name: name.into(),
            context: context.into(),
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            AppError::Config(_)
            | AppError::Source { .. }
            | AppError::UnresolvedVariable { .. }
            | AppError::InvalidDialCollection(_)
            | AppError::Expression(_)
            | AppError::Io(_)
            | AppError::Json(_)
            | AppError::Csv(_) => 2,
            AppError::NegativeWeight { .. } | AppError::NanWeight { .. } => 3,
            AppError::Capacity(_) | AppError::ThreadPool(_) => 4,
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_weight_is_distinct_exit_code() {
        let err = AppError::NegativeWeight {
            dataset: "mc".to_string(),
            entry: 2,
            weight: -1.0,
        };
        assert_eq!(err.exit_code(), 3);
        assert!(err.to_string().contains("entry 2"));
    }

    #[test]
    fn nan_weight_has_its_own_message() {
        let err = AppError::NanWeight {
            dataset: "mc".to_string(),
            entry: 4,
        };
        assert_eq!(err.exit_code(), 3);
        assert!(err.to_string().contains("not a number"));
        assert!(!err.to_string().contains("negative"));
    }

    #[test]
    fn unresolved_variable_names_the_variable() {
        let err = AppError::unresolved("Enu", "sample 'numu'");
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("'Enu'"));
    }
}
