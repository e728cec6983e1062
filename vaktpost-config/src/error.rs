//! Configuration loading and validation errors.

use std::path::PathBuf;
use thiserror::Error;
use validator::{ValidationErrors, ValidationErrorsKind};

/// Unified configuration error type.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly requested file does not exist.
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    /// A value parsed but is out of range or malformed.
    #[error("Invalid configuration:\n{}", format_validation_errors(.0))]
    Validation(#[source] ValidationErrors),

    /// A source could not be read or does not match the schema.
    #[error("Configuration parsing error: {0}")]
    Parsing(#[from] Box<figment::Error>),
}

fn format_validation_errors(errors: &ValidationErrors) -> String {
    use std::fmt::Write;

    let mut output = String::new();
    for (path, kind) in errors.errors() {
        match kind {
            ValidationErrorsKind::Field(errs) => {
                for error in errs {
                    let message = error
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| error.code.to_string());
                    let _ = writeln!(output, "  {}: {}", path, message);
                }
            }
            ValidationErrorsKind::Struct(inner) => {
                for line in format_validation_errors(inner).lines() {
                    let _ = writeln!(output, "  {}.{}", path, line.trim_start());
                }
            }
            ValidationErrorsKind::List(items) => {
                for (index, inner) in items {
                    for line in format_validation_errors(inner).lines() {
                        let _ = writeln!(output, "  {}[{}].{}", path, index, line.trim_start());
                    }
                }
            }
        }
    }
    output
}

impl From<figment::Error> for ConfigError {
    fn from(error: figment::Error) -> Self {
        ConfigError::Parsing(Box::new(error))
    }
}

impl From<ValidationErrors> for ConfigError {
    fn from(errors: ValidationErrors) -> Self {
        ConfigError::Validation(errors)
    }
}
