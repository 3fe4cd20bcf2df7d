//! The access layer: documents, nested node wrappers and engine options.
//!
//! A [`Document`] owns the schema store, the evaluation cache and the default
//! variant context. Every [`Node`] handed out holds only a back-reference to
//! the owning document plus a path prefix, so nested reads and writes share
//! one cache and one source of truth.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::Rc;

use futures::FutureExt;
use futures::future::LocalBoxFuture;
use serde_json::Value;
use tracing::{debug, trace};

use crate::core::cache::{EvalCache, EvalOutcome, SharedEval};
use crate::core::expr::eval::{self, EvalScope};
use crate::core::expr::parser;
use crate::core::guard::Frame;
use crate::core::path;
use crate::core::resolver::ResolverRegistry;
use crate::core::schema::SchemaStore;
use crate::core::variant::{self, ParsedKey, VariantContext};
use crate::errors::Error;

pub const DEFAULT_MAX_EVALUATION_DEPTH: usize = 10;

/// External validation hook, invoked after evaluation and before caching.
pub trait Validator {
    fn validate(&self, path: &str, value: &Value) -> anyhow::Result<Value>;
}

/// Value produced when evaluation fails or a path is absent and the error
/// policy resolves to the fallback.
pub enum Fallback {
    Value(Value),
    Func(Rc<dyn Fn() -> Value>),
}

impl Fallback {
    fn produce(&self) -> Value {
        match self {
            Fallback::Value(value) => value.clone(),
            Fallback::Func(f) => f(),
        }
    }
}

/// What an `on_error` hook decided to do with a recoverable error.
pub enum ErrorDisposition {
    /// Surface the original error.
    Rethrow,
    /// Substitute the configured fallback value.
    UseFallback,
    /// Substitute a concrete value.
    Value(Value),
}

pub type OnError = dyn Fn(&Error, &str) -> ErrorDisposition;

/// Canonical engine options. Alias handling happens in the configuration
/// layer; nothing below this struct ever sees an alternative spelling.
pub struct Options {
    pub resolvers: ResolverRegistry,
    pub fallback: Option<Fallback>,
    pub on_error: Option<Rc<OnError>>,
    pub max_evaluation_depth: usize,
    pub default_context: VariantContext,
    /// When set, only these dimension names are honored during variant
    /// scoring.
    pub allowed_dimensions: Option<HashSet<String>>,
    pub validator: Option<Rc<dyn Validator>>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            resolvers: ResolverRegistry::new(),
            fallback: None,
            on_error: None,
            max_evaluation_depth: DEFAULT_MAX_EVALUATION_DEPTH,
            default_context: VariantContext::new(),
            allowed_dimensions: None,
            validator: None,
        }
    }
}

impl Options {
    pub fn with_resolvers(mut self, resolvers: ResolverRegistry) -> Self {
        self.resolvers = resolvers;
        self
    }

    pub fn with_fallback(mut self, value: Value) -> Self {
        self.fallback = Some(Fallback::Value(value));
        self
    }

    pub fn with_fallback_fn(mut self, f: impl Fn() -> Value + 'static) -> Self {
        self.fallback = Some(Fallback::Func(Rc::new(f)));
        self
    }

    pub fn with_on_error(
        mut self,
        hook: impl Fn(&Error, &str) -> ErrorDisposition + 'static,
    ) -> Self {
        self.on_error = Some(Rc::new(hook));
        self
    }

    pub fn with_max_evaluation_depth(mut self, depth: usize) -> Self {
        self.max_evaluation_depth = depth;
        self
    }

    pub fn with_default_context(mut self, context: VariantContext) -> Self {
        self.default_context = context;
        self
    }

    pub fn with_allowed_dimensions(
        mut self,
        dimensions: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.allowed_dimensions = Some(dimensions.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_validator(mut self, validator: Rc<dyn Validator>) -> Self {
        self.validator = Some(validator);
        self
    }
}

/// Per-call read options.
#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    /// Bypass and rewrite the cache for this call.
    pub fresh: bool,
    /// Variant context override, merged over the document default.
    pub context: Option<VariantContext>,
}

impl GetOptions {
    pub fn fresh() -> Self {
        Self {
            fresh: true,
            context: None,
        }
    }

    pub fn with_context(context: VariantContext) -> Self {
        Self {
            fresh: false,
            context: Some(context),
        }
    }
}

/// Dependency collector for the cache entry currently being computed.
pub(crate) struct DepSink {
    deps: RefCell<HashSet<String>>,
    cacheable: Cell<bool>,
}

impl DepSink {
    fn new() -> Self {
        Self {
            deps: RefCell::new(HashSet::new()),
            cacheable: Cell::new(true),
        }
    }

    fn snapshot(&self) -> (HashSet<String>, bool) {
        (self.deps.borrow().clone(), self.cacheable.get())
    }
}

/// Ambient state of one read: the effective variant context, the burst's
/// evaluation frame, the per-call fresh flag and the dependency sink of the
/// innermost computing entry (absent at top level).
#[derive(Clone)]
pub(crate) struct AccessCtx {
    pub variant: Rc<VariantContext>,
    pub frame: Frame,
    pub fresh: bool,
    pub sink: Option<Rc<DepSink>>,
}

impl AccessCtx {
    pub fn with_fresh(mut self, fresh: bool) -> Self {
        self.fresh = fresh;
        self
    }

    pub fn record_dep(&self, dep: &str) {
        if let Some(sink) = &self.sink {
            sink.deps.borrow_mut().insert(dep.to_string());
        }
    }

    pub fn merge_deps(&self, deps: &HashSet<String>) {
        if let Some(sink) = &self.sink {
            sink.deps
                .borrow_mut()
                .extend(deps.iter().cloned());
        }
    }

    pub fn mark_uncacheable(&self) {
        if let Some(sink) = &self.sink {
            sink.cacheable.set(false);
        }
    }
}

/// Engine state shared by a document and all of its node wrappers.
pub(crate) struct DocumentInner {
    store: SchemaStore,
    cache: EvalCache,
    options: Options,
}

impl DocumentInner {
    pub(crate) fn resolvers(&self) -> &ResolverRegistry {
        &self.options.resolvers
    }

    fn fallback_value(&self) -> Option<Value> {
        self.options.fallback.as_ref().map(Fallback::produce)
    }

    /// Error policy at the failure site (resolver call or validation).
    /// Without a hook the error propagates; the top-level policy may still
    /// recover it.
    pub(crate) fn dispose_site(&self, err: Error, failed_path: &str) -> Result<Value, Error> {
        if err.is_structural() {
            return Err(err);
        }
        match &self.options.on_error {
            Some(hook) => match hook(&err, failed_path) {
                ErrorDisposition::Rethrow => Err(err),
                ErrorDisposition::UseFallback => self.fallback_value().ok_or(err),
                ErrorDisposition::Value(value) => Ok(value),
            },
            None => Err(err),
        }
    }

    /// Error policy at the top-level `get` boundary. Resolver and validation
    /// failures already had their hook consultation at the site, so a
    /// configured hook that chose to rethrow is respected here.
    fn dispose_top(&self, err: Error, requested_path: &str) -> Result<Value, Error> {
        if err.is_structural() {
            return Err(err);
        }
        match (&self.options.on_error, &err) {
            (Some(hook), Error::PathNotFound { .. }) => match hook(&err, requested_path) {
                ErrorDisposition::Rethrow => Err(err),
                ErrorDisposition::UseFallback => self.fallback_value().ok_or(err),
                ErrorDisposition::Value(value) => Ok(value),
            },
            (Some(_), _) => Err(err),
            (None, _) => self.fallback_value().ok_or(err),
        }
    }
}

/// One resolution step while walking a path.
enum Step {
    Static {
        value: Value,
        storage_path: String,
        child_prefix: String,
    },
    Expr {
        source: String,
        cache_key: String,
        child_prefix: String,
    },
    Missing,
}

/// `'static` reading entry point used by the evaluator for path references.
pub(crate) fn read_owned(
    inner: &Rc<DocumentInner>,
    target: String,
    access: AccessCtx,
) -> LocalBoxFuture<'static, Result<Value, Error>> {
    let inner = Rc::clone(inner);
    async move { read(&inner, target, access).await }.boxed_local()
}

/// Walk a dotted path from the root, resolving variants against the access
/// context and evaluating expression keys on demand.
async fn read(
    inner: &Rc<DocumentInner>,
    target: String,
    access: AccessCtx,
) -> Result<Value, Error> {
    let segments = path::split(&target);
    if segments.is_empty() {
        return Ok(inner.store.snapshot());
    }
    let mut cursor: Option<Value> = None;
    // Once a read crosses an evaluated expression, the result is plain data:
    // no further variant or expression interpretation.
    let mut plain = false;
    let mut prefix = String::new();
    let total = segments.len();
    for (index, segment) in segments.iter().enumerate() {
        let is_last = index + 1 == total;
        let step = {
            let root;
            let current: &Value = match &cursor {
                None => {
                    root = inner.store.borrow_root();
                    &root
                }
                Some(value) => value,
            };
            resolve_step(inner, current, segment, &prefix, plain, &access)
        };
        match step {
            Step::Static {
                value,
                storage_path,
                child_prefix,
            } => {
                if is_last {
                    access.record_dep(&storage_path);
                    return Ok(value);
                }
                prefix = child_prefix;
                cursor = Some(value);
            }
            Step::Expr {
                source,
                cache_key,
                child_prefix,
            } => {
                let value =
                    get_or_compute(inner, cache_key, source, prefix.clone(), &access).await?;
                if is_last {
                    return Ok(value);
                }
                prefix = child_prefix;
                cursor = Some(value);
                plain = true;
            }
            Step::Missing => {
                return Err(Error::PathNotFound {
                    path: target.clone(),
                });
            }
        }
    }
    Err(Error::PathNotFound { path: target })
}

fn resolve_step(
    inner: &Rc<DocumentInner>,
    current: &Value,
    segment: &str,
    prefix: &str,
    plain: bool,
    access: &AccessCtx,
) -> Step {
    match current {
        Value::Object(map) => {
            if plain {
                return match map.get(segment) {
                    Some(value) => Step::Static {
                        value: value.clone(),
                        storage_path: path::join(prefix, segment),
                        child_prefix: path::join(prefix, segment),
                    },
                    None => Step::Missing,
                };
            }
            schema_step(inner, map, segment, prefix, access)
        }
        Value::Array(items) => {
            match segment.parse::<usize>().ok().and_then(|i| items.get(i)) {
                Some(value) => Step::Static {
                    value: value.clone(),
                    storage_path: path::join(prefix, segment),
                    child_prefix: path::join(prefix, segment),
                },
                None => Step::Missing,
            }
        }
        _ => Step::Missing,
    }
}

fn schema_step(
    inner: &Rc<DocumentInner>,
    map: &serde_json::Map<String, Value>,
    segment: &str,
    prefix: &str,
    access: &AccessCtx,
) -> Step {
    // Explicit sentinel request: the raw template source, unevaluated.
    if let Some(stripped) = segment.strip_prefix('.') {
        return match map.get(segment) {
            Some(value) => Step::Static {
                value: value.clone(),
                storage_path: path::join(prefix, stripped),
                child_prefix: path::join(prefix, ParsedKey::parse(segment).base),
            },
            None => Step::Missing,
        };
    }
    // Explicitly qualified request: exact key, static or expression form,
    // skipping variant scoring.
    if segment.contains(':') {
        let child_prefix = path::join(prefix, ParsedKey::parse(segment).base);
        if let Some(value) = map.get(segment) {
            return Step::Static {
                value: value.clone(),
                storage_path: path::join(prefix, segment),
                child_prefix,
            };
        }
        let sentinel = format!(".{segment}");
        if let Some(value) = map.get(&sentinel) {
            if let Some(source) = value.as_str() {
                return Step::Expr {
                    source: source.to_string(),
                    cache_key: path::join(prefix, segment),
                    child_prefix,
                };
            }
            return Step::Static {
                value: value.clone(),
                storage_path: path::join(prefix, segment),
                child_prefix,
            };
        }
        return Step::Missing;
    }
    // Logical name: score every candidate sharing this base.
    let mut candidates = Vec::new();
    for (order, (key, value)) in map.iter().enumerate() {
        let parsed = ParsedKey::parse(key);
        if parsed.base == segment {
            candidates.push(variant::Candidate {
                item: (parsed.storage_name(), value, parsed.is_expression),
                qualifiers: parsed.qualifiers,
                order,
            });
        }
    }
    match variant::select(&candidates, &access.variant, inner.options.allowed_dimensions.as_ref()) {
        Some(candidate) => {
            let (storage_name, value, is_expression) = candidate.item;
            let storage_path = path::join(prefix, storage_name);
            let child_prefix = path::join(prefix, segment);
            match value.as_str() {
                // Expression keys hold template strings; anything else reads
                // as data.
                Some(source) if is_expression => Step::Expr {
                    source: source.to_string(),
                    cache_key: storage_path,
                    child_prefix,
                },
                _ => Step::Static {
                    value: value.clone(),
                    storage_path,
                    child_prefix,
                },
            }
        }
        None => Step::Missing,
    }
}

/// Cache consultation with evaluation coalescing.
///
/// Cycle detection runs against this burst's frame before the pending map is
/// consulted: a self-referential expression must fail, not deadlock on its
/// own pending computation.
async fn get_or_compute(
    inner: &Rc<DocumentInner>,
    cache_key: String,
    source: String,
    scope_prefix: String,
    access: &AccessCtx,
) -> Result<Value, Error> {
    if access.frame.contains(&cache_key) {
        return Err(Error::CircularDependency {
            chain: access.frame.chain_with(&cache_key),
        });
    }
    if !access.fresh {
        if let Some(value) = inner.cache.lookup(&cache_key) {
            access.record_dep(&cache_key);
            return Ok(value);
        }
        if let Some(pending) = inner.cache.pending(&cache_key) {
            let outcome = pending.await?;
            note_outcome(access, &cache_key, &outcome);
            return Ok(outcome.value);
        }
    }
    let future: SharedEval = {
        let inner = Rc::clone(inner);
        let key = cache_key.clone();
        let burst = AccessCtx {
            variant: Rc::clone(&access.variant),
            frame: access.frame.clone(),
            fresh: false,
            sink: None,
        };
        async move { compute(inner, key, source, scope_prefix, burst).await }
            .boxed_local()
            .shared()
    };
    let token = inner.cache.insert_pending(cache_key.clone(), future.clone());
    let result = future.await;
    inner.cache.remove_pending(&cache_key, token);
    let outcome = result?;
    note_outcome(access, &cache_key, &outcome);
    Ok(outcome.value)
}

fn note_outcome(access: &AccessCtx, cache_key: &str, outcome: &EvalOutcome) {
    access.record_dep(cache_key);
    if !outcome.cacheable {
        // The entry is never stored, so its reads become the caller's own
        // dependencies to keep invalidation complete.
        access.merge_deps(&outcome.deps);
    }
}

/// Evaluate one expression entry: parse, evaluate, validate, store.
async fn compute(
    inner: Rc<DocumentInner>,
    cache_key: String,
    source: String,
    scope_prefix: String,
    burst: AccessCtx,
) -> Result<EvalOutcome, Error> {
    let started_generation = inner.cache.generation();
    let _guard = burst
        .frame
        .enter(&cache_key, inner.options.max_evaluation_depth)?;
    let template = parser::parse_template(&source).map_err(|e| Error::Parse {
        path: cache_key.clone(),
        message: e.to_string(),
    })?;
    let sink = Rc::new(DepSink::new());
    let access = AccessCtx {
        sink: Some(Rc::clone(&sink)),
        ..burst
    };
    let value = {
        let scope = EvalScope {
            inner: &inner,
            scope: &scope_prefix,
            entry_path: &cache_key,
            access: &access,
        };
        eval::eval_template(&scope, &template).await?
    };
    let value = match &inner.options.validator {
        Some(validator) => match validator.validate(&cache_key, &value) {
            Ok(validated) => validated,
            Err(rejection) => inner.dispose_site(
                Error::Validation {
                    path: cache_key.clone(),
                    message: format!("{rejection:#}"),
                },
                &cache_key,
            )?,
        },
        None => value,
    };
    let (deps, cacheable) = sink.snapshot();
    let deps = Rc::new(deps);
    if cacheable {
        inner
            .cache
            .store(cache_key.clone(), value.clone(), Rc::clone(&deps), started_generation);
    }
    trace!(key = %cache_key, cacheable, "evaluated");
    Ok(EvalOutcome {
        value,
        deps,
        cacheable,
    })
}

/// A schema expanded into a lazily evaluated data graph.
pub struct Document {
    inner: Rc<DocumentInner>,
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document").finish_non_exhaustive()
    }
}

impl Document {
    /// Adopt a schema value. Fails if the root is not an object or if any
    /// object declares conflicting expression/static siblings.
    pub fn new(schema: Value, options: Options) -> Result<Self, Error> {
        let store = SchemaStore::new(schema)?;
        Ok(Self {
            inner: Rc::new(DocumentInner {
                store,
                cache: EvalCache::new(),
                options,
            }),
        })
    }

    /// Parse a JSON source string and adopt it.
    pub fn parse(source: &str, options: Options) -> Result<Self, Error> {
        let schema: Value = serde_json::from_str(source).map_err(|e| Error::Parse {
            path: String::new(),
            message: e.to_string(),
        })?;
        Self::new(schema, options)
    }

    /// The root node wrapper.
    pub fn root(&self) -> Node {
        Node {
            inner: Rc::clone(&self.inner),
            prefix: String::new(),
        }
    }

    /// A node wrapper for a nested path. Construction is lazy; the path is
    /// not checked until it is read through.
    pub fn node(&self, prefix: &str) -> Node {
        self.root().node(prefix)
    }

    pub async fn get(&self, target: &str) -> Result<Value, Error> {
        self.root().get(target).await
    }

    pub async fn get_with(&self, target: &str, opts: GetOptions) -> Result<Value, Error> {
        self.root().get_with(target, opts).await
    }

    pub fn set(&self, target: &str, value: Value) -> Result<(), Error> {
        self.root().set(target, value)
    }

    pub fn has(&self, target: &str) -> bool {
        self.root().has(target)
    }

    pub fn keys(&self) -> Vec<String> {
        self.root().keys()
    }

    /// A deep copy of the raw schema tree, expression keys included.
    pub fn snapshot(&self) -> Value {
        self.inner.store.snapshot()
    }

    /// Drop every cached evaluation result.
    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }

    /// Invalidate cached entries as if `target` had been mutated.
    pub fn invalidate(&self, target: &str) {
        self.inner.cache.bump_generation();
        self.inner.cache.invalidate(target);
    }
}

/// A wrapper over one subtree of a document. Nodes are cheap to clone and
/// hold no data of their own: every operation delegates to the owning
/// document with this node's prefix applied.
#[derive(Clone)]
pub struct Node {
    inner: Rc<DocumentInner>,
    prefix: String,
}

impl Node {
    /// This node's path prefix relative to the document root.
    pub fn path(&self) -> &str {
        &self.prefix
    }

    /// A nested wrapper sharing this document's cache and context.
    pub fn node(&self, target: &str) -> Node {
        Node {
            inner: Rc::clone(&self.inner),
            prefix: path::join(&self.prefix, target),
        }
    }

    pub async fn get(&self, target: &str) -> Result<Value, Error> {
        self.get_with(target, GetOptions::default()).await
    }

    pub async fn get_with(&self, target: &str, opts: GetOptions) -> Result<Value, Error> {
        let full = path::join(&self.prefix, target);
        let variant = match &opts.context {
            Some(overrides) => self.inner.options.default_context.merged(overrides),
            None => self.inner.options.default_context.clone(),
        };
        let access = AccessCtx {
            variant: Rc::new(variant),
            frame: Frame::new(),
            fresh: opts.fresh,
            sink: None,
        };
        match read(&self.inner, full.clone(), access).await {
            Ok(value) => Ok(value),
            Err(err) => self.inner.dispose_top(err, &full),
        }
    }

    /// Write a value. Synchronous: when this returns, every stale cached
    /// dependent has been invalidated.
    pub fn set(&self, target: &str, value: Value) -> Result<(), Error> {
        let full = path::join(&self.prefix, target);
        let segments = path::split(&full);
        let written = self.inner.store.set(&segments, value)?;
        self.inner.cache.bump_generation();
        self.inner.cache.invalidate(&written);
        debug!(path = %written, "mutated");
        Ok(())
    }

    /// Structural presence check; never evaluates expressions.
    pub fn has(&self, target: &str) -> bool {
        let full = path::join(&self.prefix, target);
        self.inner.store.has(&path::split(&full))
    }

    /// Logical key names at this node: sentinel stripped, variant qualifiers
    /// collapsed, declaration order kept.
    pub fn keys(&self) -> Vec<String> {
        self.inner.store.keys_at(&path::split(&self.prefix))
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::core::resolver::Resolver;

    fn doc(schema: Value) -> Document {
        Document::new(schema, Options::default()).unwrap()
    }

    /// Counting resolver that suspends once before returning, so coalescing
    /// across interleaved reads is observable.
    struct CountingDouble {
        calls: Rc<Cell<usize>>,
    }

    #[async_trait(?Send)]
    impl Resolver for CountingDouble {
        async fn call(&self, args: Vec<Value>) -> anyhow::Result<Value> {
            tokio::task::yield_now().await;
            self.calls.set(self.calls.get() + 1);
            let n = args
                .first()
                .and_then(Value::as_i64)
                .ok_or_else(|| anyhow::anyhow!("expected a number"))?;
            Ok(json!(n * 2))
        }
    }

    fn counting_registry(calls: &Rc<Cell<usize>>) -> ResolverRegistry {
        let mut registry = ResolverRegistry::new();
        registry.register(
            "math.double",
            Rc::new(CountingDouble {
                calls: Rc::clone(calls),
            }),
        );
        registry
    }

    #[tokio::test]
    async fn test_static_reads() {
        let doc = doc(json!({"name": "Ada", "user": {"age": 36}, "tags": ["a", "b"]}));
        assert_eq!(doc.get("name").await.unwrap(), json!("Ada"));
        assert_eq!(doc.get("user.age").await.unwrap(), json!(36));
        assert_eq!(doc.get("tags.1").await.unwrap(), json!("b"));
        assert_eq!(
            doc.get("missing").await.unwrap_err(),
            Error::PathNotFound {
                path: "missing".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_expression_end_to_end() {
        let doc = doc(json!({"name": "Ada", ".greeting": "Hello, ${name}!"}));
        assert_eq!(doc.get("greeting").await.unwrap(), json!("Hello, Ada!"));

        doc.set("name", json!("Grace")).unwrap();
        assert_eq!(doc.get("greeting").await.unwrap(), json!("Hello, Grace!"));
    }

    #[tokio::test]
    async fn test_bare_reference_preserves_type() {
        let doc = doc(json!({"count": 4, ".doubled": "${count}"}));
        assert_eq!(doc.get("doubled").await.unwrap(), json!(4));
    }

    #[tokio::test]
    async fn test_multi_span_always_string() {
        let doc = doc(json!({"count": 4, ".label": "${count} items"}));
        assert_eq!(doc.get("label").await.unwrap(), json!("4 items"));
    }

    #[tokio::test]
    async fn test_arithmetic_in_expressions() {
        let doc = doc(json!({"price": 10, "qty": 3, ".total": "${price * qty + 1}"}));
        assert_eq!(doc.get("total").await.unwrap(), json!(31));
    }

    #[tokio::test]
    async fn test_repeated_get_uses_cache() {
        let calls = Rc::new(Cell::new(0));
        let doc = Document::new(
            json!({".answer": "${math.double(21)}"}),
            Options::default().with_resolvers(counting_registry(&calls)),
        )
        .unwrap();
        assert_eq!(doc.get("answer").await.unwrap(), json!(42));
        assert_eq!(doc.get("answer").await.unwrap(), json!(42));
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn test_fresh_bypasses_and_rewrites() {
        let calls = Rc::new(Cell::new(0));
        let doc = Document::new(
            json!({".answer": "${math.double(21)}"}),
            Options::default().with_resolvers(counting_registry(&calls)),
        )
        .unwrap();
        assert_eq!(doc.get("answer").await.unwrap(), json!(42));
        assert_eq!(
            doc.get_with("answer", GetOptions::fresh()).await.unwrap(),
            json!(42)
        );
        assert_eq!(calls.get(), 2);
        // The fresh result became the cached value for plain reads.
        assert_eq!(doc.get("answer").await.unwrap(), json!(42));
        assert_eq!(calls.get(), 2);
    }

    #[tokio::test]
    async fn test_fresh_builtin_marks_enclosing_uncacheable() {
        let calls = Rc::new(Cell::new(0));
        let doc = Document::new(
            json!({
                ".rate": "${math.double(10)}",
                ".price": "${fresh(rate)} USD"
            }),
            Options::default().with_resolvers(counting_registry(&calls)),
        )
        .unwrap();
        assert_eq!(doc.get("price").await.unwrap(), json!("20 USD"));
        assert_eq!(doc.get("price").await.unwrap(), json!("20 USD"));
        // Every read of the enclosing expression re-evaluated the inner one.
        assert_eq!(calls.get(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_reads_coalesce() {
        let calls = Rc::new(Cell::new(0));
        let doc = Document::new(
            json!({".answer": "${math.double(21)}"}),
            Options::default().with_resolvers(counting_registry(&calls)),
        )
        .unwrap();
        let (a, b) = futures::join!(doc.get("answer"), doc.get("answer"));
        assert_eq!(a.unwrap(), json!(42));
        assert_eq!(b.unwrap(), json!(42));
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn test_invalidation_is_transitive() {
        let doc = doc(json!({
            "base": 2,
            ".doubled": "${base * 2}",
            ".quadrupled": "${doubled} x2 = ${doubled * 2}"
        }));
        assert_eq!(doc.get("quadrupled").await.unwrap(), json!("4 x2 = 8"));
        doc.set("base", json!(3)).unwrap();
        // Both the direct and the indirect dependent recompute.
        assert_eq!(doc.get("doubled").await.unwrap(), json!(6));
        assert_eq!(doc.get("quadrupled").await.unwrap(), json!("6 x2 = 12"));
    }

    #[tokio::test]
    async fn test_set_on_expression_backed_path() {
        let doc = doc(json!({"name": "Ada", ".greeting": "Hello, ${name}!"}));
        assert_eq!(doc.get("greeting").await.unwrap(), json!("Hello, Ada!"));
        // Overriding the computed field replaces the expression entirely.
        doc.set("greeting", json!("plain")).unwrap();
        assert_eq!(doc.get("greeting").await.unwrap(), json!("plain"));
        doc.set("name", json!("Grace")).unwrap();
        assert_eq!(doc.get("greeting").await.unwrap(), json!("plain"));
    }

    #[tokio::test]
    async fn test_cycle_detection() {
        let doc = doc(json!({".a": "${b}", ".b": "${a}"}));
        let err = doc.get("a").await.unwrap_err();
        assert_eq!(
            err,
            Error::CircularDependency {
                chain: vec!["a".to_string(), "b".to_string(), "a".to_string()]
            }
        );
    }

    #[tokio::test]
    async fn test_self_reference_fails() {
        let doc = doc(json!({".a": "${a}"}));
        assert!(matches!(
            doc.get("a").await.unwrap_err(),
            Error::CircularDependency { .. }
        ));
    }

    #[tokio::test]
    async fn test_max_depth() {
        let doc = Document::new(
            json!({".a": "${b}", ".b": "${c}", ".c": "${d}", "d": 1}),
            Options::default().with_max_evaluation_depth(2),
        )
        .unwrap();
        let err = doc.get("a").await.unwrap_err();
        assert_eq!(
            err,
            Error::MaxDepthExceeded {
                path: "c".to_string(),
                max: 2
            }
        );
        // The frame unwound; a shallow read still works.
        assert_eq!(doc.get("c").await.unwrap(), json!(1));
    }

    #[tokio::test]
    async fn test_variant_selection_through_get() {
        let doc = doc(json!({
            "greeting": "Hello",
            "greeting:lang=es": "Hola",
            "greeting:lang=es:form=formal": "Buenos días"
        }));
        let es = VariantContext::new().with("lang", "es");
        let es_formal = VariantContext::new().with("lang", "es").with("form", "formal");
        assert_eq!(doc.get("greeting").await.unwrap(), json!("Hello"));
        assert_eq!(
            doc.get_with("greeting", GetOptions::with_context(es))
                .await
                .unwrap(),
            json!("Hola")
        );
        assert_eq!(
            doc.get_with("greeting", GetOptions::with_context(es_formal))
                .await
                .unwrap(),
            json!("Buenos días")
        );
    }

    #[tokio::test]
    async fn test_variant_expression_keys_cache_separately() {
        let doc = Document::new(
            json!({
                "name": "Ada",
                ".greeting": "Hello, ${name}!",
                ".greeting:lang=es": "¡Hola, ${name}!"
            }),
            Options::default(),
        )
        .unwrap();
        let es = VariantContext::new().with("lang", "es");
        assert_eq!(doc.get("greeting").await.unwrap(), json!("Hello, Ada!"));
        assert_eq!(
            doc.get_with("greeting", GetOptions::with_context(es.clone()))
                .await
                .unwrap(),
            json!("¡Hola, Ada!")
        );
        // The default-context entry was not clobbered by the variant one.
        assert_eq!(doc.get("greeting").await.unwrap(), json!("Hello, Ada!"));

        // Mutation invalidates both variants' entries.
        doc.set("name", json!("Grace")).unwrap();
        assert_eq!(doc.get("greeting").await.unwrap(), json!("Hello, Grace!"));
        assert_eq!(
            doc.get_with("greeting", GetOptions::with_context(es))
                .await
                .unwrap(),
            json!("¡Hola, Grace!")
        );
    }

    #[tokio::test]
    async fn test_default_context_with_per_call_override() {
        let doc = Document::new(
            json!({"greeting": "Hello", "greeting:lang=es": "Hola", "greeting:lang=fr": "Bonjour"}),
            Options::default()
                .with_default_context(VariantContext::new().with("lang", "es")),
        )
        .unwrap();
        assert_eq!(doc.get("greeting").await.unwrap(), json!("Hola"));
        assert_eq!(
            doc.get_with(
                "greeting",
                GetOptions::with_context(VariantContext::new().with("lang", "fr"))
            )
            .await
            .unwrap(),
            json!("Bonjour")
        );
        // The override never leaked into the document default.
        assert_eq!(doc.get("greeting").await.unwrap(), json!("Hola"));
    }

    #[tokio::test]
    async fn test_relative_and_absolute_references() {
        let doc = doc(json!({
            "app": {
                "name": "weft",
                "card": {
                    "title": "Status",
                    ".label": "${title} — ${$.app.name}"
                }
            }
        }));
        assert_eq!(
            doc.get("app.card.label").await.unwrap(),
            json!("Status — weft")
        );
    }

    #[tokio::test]
    async fn test_reading_through_expression_result() {
        let doc = doc(json!({
            "first": "Ada",
            "last": "Lovelace",
            ".user": "${json('{\"role\": \"admin\"}')}"
        }));
        // Descend into an evaluated object as plain data.
        assert_eq!(doc.get("user.role").await.unwrap(), json!("admin"));
    }

    #[tokio::test]
    async fn test_sentinel_path_returns_source() {
        let doc = doc(json!({"name": "Ada", ".greeting": "Hello, ${name}!"}));
        assert_eq!(
            doc.get(".greeting").await.unwrap(),
            json!("Hello, ${name}!")
        );
    }

    #[tokio::test]
    async fn test_resolver_not_found_is_structural() {
        let doc = Document::new(
            json!({".x": "${nope.missing(1)}"}),
            Options::default().with_fallback(json!("fallback")),
        )
        .unwrap();
        // Never absorbed by the fallback.
        assert_eq!(
            doc.get("x").await.unwrap_err(),
            Error::ResolverNotFound {
                name: "nope.missing".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_fallback_on_missing_path() {
        let doc = Document::new(
            json!({"name": "Ada"}),
            Options::default().with_fallback(json!("n/a")),
        )
        .unwrap();
        assert_eq!(doc.get("missing").await.unwrap(), json!("n/a"));
    }

    #[tokio::test]
    async fn test_fallback_fn() {
        let doc = Document::new(
            json!({}),
            Options::default().with_fallback_fn(|| json!("computed")),
        )
        .unwrap();
        assert_eq!(doc.get("missing").await.unwrap(), json!("computed"));
    }

    #[tokio::test]
    async fn test_on_error_hook_substitutes_value() {
        let mut registry = ResolverRegistry::new();
        registry.register_fn("flaky.fetch", |_| anyhow::bail!("boom"));
        let doc = Document::new(
            json!({".x": "${flaky.fetch()}"}),
            Options::default()
                .with_resolvers(registry)
                .with_on_error(|err, _path| {
                    assert!(matches!(err, Error::Resolver { .. }));
                    ErrorDisposition::Value(json!("substitute"))
                }),
        )
        .unwrap();
        assert_eq!(doc.get("x").await.unwrap(), json!("substitute"));
    }

    #[tokio::test]
    async fn test_on_error_hook_rethrow_beats_fallback() {
        let mut registry = ResolverRegistry::new();
        registry.register_fn("flaky.fetch", |_| anyhow::bail!("boom"));
        let doc = Document::new(
            json!({".x": "${flaky.fetch()}"}),
            Options::default()
                .with_resolvers(registry)
                .with_fallback(json!("fb"))
                .with_on_error(|_, _| ErrorDisposition::Rethrow),
        )
        .unwrap();
        assert!(matches!(
            doc.get("x").await.unwrap_err(),
            Error::Resolver { .. }
        ));
    }

    #[tokio::test]
    async fn test_on_error_hook_use_fallback() {
        let mut registry = ResolverRegistry::new();
        registry.register_fn("flaky.fetch", |_| anyhow::bail!("boom"));
        let doc = Document::new(
            json!({".x": "${flaky.fetch()}"}),
            Options::default()
                .with_resolvers(registry)
                .with_fallback(json!("fb"))
                .with_on_error(|_, _| ErrorDisposition::UseFallback),
        )
        .unwrap();
        assert_eq!(doc.get("x").await.unwrap(), json!("fb"));
    }

    #[tokio::test]
    async fn test_resolver_error_without_hook_reaches_fallback() {
        let mut registry = ResolverRegistry::new();
        registry.register_fn("flaky.fetch", |_| anyhow::bail!("boom"));
        let doc = Document::new(
            json!({".x": "${flaky.fetch()}"}),
            Options::default()
                .with_resolvers(registry)
                .with_fallback(json!("fb")),
        )
        .unwrap();
        assert_eq!(doc.get("x").await.unwrap(), json!("fb"));
    }

    struct MaxLen(usize);

    impl Validator for MaxLen {
        fn validate(&self, _path: &str, value: &Value) -> anyhow::Result<Value> {
            if let Value::String(s) = value
                && s.len() > self.0
            {
                anyhow::bail!("string longer than {}", self.0);
            }
            Ok(value.clone())
        }
    }

    #[tokio::test]
    async fn test_validator_rejects_before_caching() {
        let doc = Document::new(
            json!({"name": "Ada Lovelace", ".greeting": "Hello, ${name}!"}),
            Options::default().with_validator(Rc::new(MaxLen(5))),
        )
        .unwrap();
        assert!(matches!(
            doc.get("greeting").await.unwrap_err(),
            Error::Validation { .. }
        ));
    }

    #[tokio::test]
    async fn test_reserved_key_set_fails() {
        let doc = doc(json!({}));
        assert_eq!(
            doc.set("user.get", json!(1)).unwrap_err(),
            Error::ReservedKey {
                name: "get".to_string()
            }
        );
        // Never absorbed by fallback policy: set always surfaces.
        let with_fallback = Document::new(
            json!({}),
            Options::default().with_fallback(json!(null)),
        )
        .unwrap();
        assert!(with_fallback.set("set", json!(1)).is_err());
    }

    #[tokio::test]
    async fn test_conflicting_schema_rejected() {
        let err = Document::new(
            json!({"greeting": "Hello", ".greeting": "${name}"}),
            Options::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::ConflictingKey { .. }));
    }

    #[tokio::test]
    async fn test_node_wrappers_share_state() {
        let doc = doc(json!({
            "user": {"name": "Ada", ".card": "${name} <admin>"}
        }));
        let user = doc.node("user");
        assert_eq!(user.get("card").await.unwrap(), json!("Ada <admin>"));
        assert_eq!(user.path(), "user");

        // A write through the root invalidates what the node cached.
        doc.set("user.name", json!("Grace")).unwrap();
        assert_eq!(user.get("card").await.unwrap(), json!("Grace <admin>"));

        // And a write through the node is visible at the root.
        user.set("name", json!("Edith")).unwrap();
        assert_eq!(doc.get("user.card").await.unwrap(), json!("Edith <admin>"));
    }

    #[tokio::test]
    async fn test_nested_node_construction() {
        let doc = doc(json!({"a": {"b": {"c": 1}}}));
        let nested = doc.node("a").node("b");
        assert_eq!(nested.path(), "a.b");
        assert_eq!(nested.get("c").await.unwrap(), json!(1));
        assert!(nested.has("c"));
        assert!(!nested.has("d"));
    }

    #[tokio::test]
    async fn test_keys_and_has() {
        let doc = doc(json!({
            "name": "Ada",
            ".greeting": "Hi",
            "greeting:lang=es": "Hola"
        }));
        assert_eq!(doc.keys(), vec!["name".to_string(), "greeting".to_string()]);
        assert!(doc.has("greeting"));
        assert!(!doc.has("farewell"));
    }

    #[tokio::test]
    async fn test_allowed_dimensions_enforced() {
        let doc = Document::new(
            json!({"greeting": "Hello", "greeting:theme=dark": "Hello (dark)"}),
            Options::default().with_allowed_dimensions(["lang"]),
        )
        .unwrap();
        let ctx = VariantContext::new().with("theme", "dark");
        // The unhonored dimension cannot win.
        assert_eq!(
            doc.get_with("greeting", GetOptions::with_context(ctx))
                .await
                .unwrap(),
            json!("Hello")
        );
    }

    #[tokio::test]
    async fn test_clear_cache_forces_recompute() {
        let calls = Rc::new(Cell::new(0));
        let doc = Document::new(
            json!({".answer": "${math.double(21)}"}),
            Options::default().with_resolvers(counting_registry(&calls)),
        )
        .unwrap();
        doc.get("answer").await.unwrap();
        doc.clear_cache();
        doc.get("answer").await.unwrap();
        assert_eq!(calls.get(), 2);
    }
}
