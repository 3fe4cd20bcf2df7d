//! Weft - a lazy, dependency-tracked data graph for config and i18n trees
//!
//! Weft expands a declarative JSON schema into a runtime data graph. Keys
//! prefixed with `.` hold expressions (`"Hello, ${name}!"`) that evaluate
//! lazily, cache their results, and re-resolve automatically when the values
//! they read change. Keys carrying `:dim=value` qualifiers declare localized
//! or contextual variants of one logical field, picked at access time
//! against a caller-supplied context.
//!
//! ## Module Structure
//!
//! - `cli`: Command-line interface layer (get/set/keys/check/init)
//! - `config`: Configuration file loading and option normalization
//! - `core`: Core engine (schema store, variants, evaluator, cache, access layer)
//! - `errors`: Typed error taxonomy
//! - `loader`: Document storage collaborators

pub mod cli;
pub mod config;
pub mod core;
pub mod errors;
pub mod loader;

pub use crate::core::document::{
    Document, ErrorDisposition, Fallback, GetOptions, Node, Options, Validator,
};
pub use crate::core::resolver::{FnResolver, Resolver, ResolverRegistry};
pub use crate::core::variant::VariantContext;
pub use crate::errors::Error;
