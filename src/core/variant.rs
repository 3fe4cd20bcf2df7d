//! Variant-qualified keys and context scoring.
//!
//! A schema key may carry colon-delimited qualifiers naming localized or
//! contextual alternatives of one logical field: `greeting:lang=es:form=formal`.
//! Qualifier order is insignificant. A qualifier without a `=` is shorthand
//! whose dimension is inferred from the runtime context by value equality, so
//! `greeting:es:formal` matches the same context as the explicit form.

use std::collections::HashSet;

/// Runtime dimension -> value mapping used to pick among variant keys.
///
/// Entries are kept in insertion order; lookups are by dimension name.
/// Contexts are supplied per access and never mutated by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariantContext {
    entries: Vec<(String, String)>,
}

impl VariantContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, dimension: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(dimension, value);
        self
    }

    /// Insert or replace the value for a dimension.
    pub fn set(&mut self, dimension: impl Into<String>, value: impl Into<String>) {
        let dimension = dimension.into();
        let value = value.into();
        if let Some(entry) = self.entries.iter_mut().find(|(d, _)| *d == dimension) {
            entry.1 = value;
        } else {
            self.entries.push((dimension, value));
        }
    }

    pub fn get(&self, dimension: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(d, _)| d == dimension)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(d, v)| (d.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// A copy of `self` with `overrides` applied on top. Used to combine the
    /// document's default context with per-call overrides without mutating
    /// shared state.
    pub fn merged(&self, overrides: &VariantContext) -> VariantContext {
        let mut merged = self.clone();
        for (dimension, value) in overrides.iter() {
            merged.set(dimension, value);
        }
        merged
    }
}

impl<D: Into<String>, V: Into<String>> FromIterator<(D, V)> for VariantContext {
    fn from_iter<T: IntoIterator<Item = (D, V)>>(iter: T) -> Self {
        let mut ctx = VariantContext::new();
        for (dimension, value) in iter {
            ctx.set(dimension, value);
        }
        ctx
    }
}

/// One colon-delimited qualifier on a variant key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Qualifier {
    /// Explicit `dim=value` pair.
    Pair { dimension: String, value: String },
    /// Bare value; the dimension is inferred from the context.
    Bare(String),
}

/// A schema key decomposed into sentinel, base name and qualifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedKey<'a> {
    pub raw: &'a str,
    pub is_expression: bool,
    pub base: &'a str,
    pub qualifiers: Vec<Qualifier>,
}

impl<'a> ParsedKey<'a> {
    pub fn parse(raw: &'a str) -> Self {
        let (is_expression, rest) = match raw.strip_prefix('.') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };
        let mut parts = rest.split(':');
        let base = parts.next().unwrap_or_default();
        let qualifiers = parts
            .map(|part| match part.split_once('=') {
                Some((dimension, value)) => Qualifier::Pair {
                    dimension: dimension.to_string(),
                    value: value.to_string(),
                },
                None => Qualifier::Bare(part.to_string()),
            })
            .collect();
        Self {
            raw,
            is_expression,
            base,
            qualifiers,
        }
    }

    /// The key without its expression sentinel, qualifiers kept:
    /// `".greeting:lang=es"` -> `"greeting:lang=es"`.
    pub fn storage_name(&self) -> &'a str {
        self.raw.strip_prefix('.').unwrap_or(self.raw)
    }

    /// Canonical, order-insensitive representation of the qualifier set,
    /// used to detect ambiguous duplicate declarations.
    pub fn qualifier_signature(&self) -> Vec<Qualifier> {
        let mut sig = self.qualifiers.clone();
        sig.sort();
        sig
    }
}

fn dimension_weight(dimension: &str) -> u32 {
    match dimension {
        "lang" => 1000,
        "gender" => 100,
        "form" => 50,
        _ => 10,
    }
}

/// Score of one candidate key against a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Score {
    /// Accumulated points from matching qualifiers.
    pub points: u32,
    /// Qualifiers that did not match the context (or were not honored).
    pub extras: u32,
}

/// Score a qualifier set against a context. A qualifier whose dimension is
/// excluded by `allowed` is never honored and counts as an extra.
pub fn score(
    qualifiers: &[Qualifier],
    context: &VariantContext,
    allowed: Option<&HashSet<String>>,
) -> Score {
    let honored = |dimension: &str| allowed.is_none_or(|set| set.contains(dimension));
    let mut points = 0;
    let mut extras = 0;
    for qualifier in qualifiers {
        let matched = match qualifier {
            Qualifier::Pair { dimension, value } => (honored(dimension)
                && context.get(dimension) == Some(value.as_str()))
            .then(|| dimension_weight(dimension)),
            Qualifier::Bare(value) => context
                .iter()
                .filter(|(dimension, v)| *v == value && honored(dimension))
                .map(|(dimension, _)| dimension_weight(dimension))
                .max(),
        };
        match matched {
            Some(weight) => points += weight,
            None => extras += 1,
        }
    }
    Score { points, extras }
}

/// One key competing for a base name.
#[derive(Debug, Clone)]
pub struct Candidate<T> {
    pub item: T,
    pub qualifiers: Vec<Qualifier>,
    /// Declaration index within the parent object; breaks final ties.
    pub order: usize,
}

/// Pick the best-matching candidate: highest score, then fewest extra
/// qualifiers, then first declared. The unqualified base key competes with
/// score 0 and zero extras. Returns `None` when nothing is compatible with
/// the context: no base key and no candidate scoring above zero.
pub fn select<'c, T>(
    candidates: &'c [Candidate<T>],
    context: &VariantContext,
    allowed: Option<&HashSet<String>>,
) -> Option<&'c Candidate<T>> {
    let best = candidates
        .iter()
        .map(|candidate| (candidate, score(&candidate.qualifiers, context, allowed)))
        .min_by(|(a, sa), (b, sb)| {
            sb.points
                .cmp(&sa.points)
                .then(sa.extras.cmp(&sb.extras))
                .then(a.order.cmp(&b.order))
        })?;
    let (candidate, score) = best;
    if score.points == 0 && !candidate.qualifiers.is_empty() {
        return None;
    }
    Some(candidate)
}
