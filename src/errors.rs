//! Typed errors surfaced by the evaluation engine.
//!
//! Structural errors (cycles, depth, reserved keys, unknown resolvers, parse
//! and schema-shape failures) are never absorbed by the fallback or `on_error`
//! policy. Data-shape errors (missing paths, resolver runtime failures,
//! validation rejections) are recoverable and subject to that policy.

use thiserror::Error;

/// Errors produced while reading, evaluating or mutating a document.
///
/// The enum is `Clone` so a single failed computation can be reported to
/// every caller coalesced onto it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// An expression transitively referenced itself. Carries the full
    /// ordered chain of paths, ending with the repeated one.
    #[error("circular dependency: {}", .chain.join(" -> "))]
    CircularDependency { chain: Vec<String> },

    /// Nested evaluation exceeded the configured maximum depth.
    #[error("maximum evaluation depth {max} exceeded at '{path}'")]
    MaxDepthExceeded { path: String, max: usize },

    /// The requested path does not exist and no variant of it matches the
    /// supplied context.
    #[error("path not found: '{path}'")]
    PathNotFound { path: String },

    /// An expression called a resolver that was never registered.
    #[error("no resolver registered for '{name}'")]
    ResolverNotFound { name: String },

    /// `set` was attempted on a name reserved by the access layer.
    #[error("cannot set reserved key '{name}'")]
    ReservedKey { name: String },

    /// An expression string failed to parse.
    #[error("invalid expression at '{path}': {message}")]
    Parse { path: String, message: String },

    /// The schema declares both an expression key and an independently
    /// authored static sibling for the same logical field.
    #[error("key '{path}' has both a static and an expression form")]
    ConflictingKey { path: String },

    /// A registered resolver returned an error at runtime.
    #[error("resolver '{name}' failed at '{path}': {message}")]
    Resolver {
        name: String,
        path: String,
        message: String,
    },

    /// The configured validator rejected an evaluated value.
    #[error("validation failed at '{path}': {message}")]
    Validation { path: String, message: String },
}

impl Error {
    /// Whether this error is a structural/programming error that must always
    /// surface, as opposed to a data-shape error the fallback policy may
    /// recover from.
    pub fn is_structural(&self) -> bool {
        match self {
            Error::CircularDependency { .. }
            | Error::MaxDepthExceeded { .. }
            | Error::ResolverNotFound { .. }
            | Error::ReservedKey { .. }
            | Error::Parse { .. }
            | Error::ConflictingKey { .. } => true,
            Error::PathNotFound { .. } | Error::Resolver { .. } | Error::Validation { .. } => false,
        }
    }
}
