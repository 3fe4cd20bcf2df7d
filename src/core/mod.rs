//! Core engine: schema store, variant resolution, expression evaluation,
//! dependency-tracked caching, and the access layer.
//!
//! Dependency order, leaves first: `path` -> `variant` -> `guard` ->
//! `expr` -> `cache` -> `document`.

pub(crate) mod cache;
pub(crate) mod coerce;
pub mod document;
pub(crate) mod expr;
pub(crate) mod guard;
pub(crate) mod path;
pub mod resolver;
pub(crate) mod schema;
pub mod variant;
