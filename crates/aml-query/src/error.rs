//! Error types for AML query compilation

use thiserror::Error;

/// Compilation error.
///
/// Every failure is terminal for the query being compiled: no partial SQL
/// is returned and the compiler must be reset before it is reused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// Feature intentionally not implemented
    #[error("Unsupported: {message}")]
    Unsupported { message: String },

    /// Structurally invalid input
    #[error("Malformed input: {message}")]
    MalformedInput { message: String },
}

impl CompileError {
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedInput {
            message: message.into(),
        }
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::MalformedInput { .. })
    }
}

/// Result type for compilation
pub type CompileResult<T> = Result<T, CompileError>;
