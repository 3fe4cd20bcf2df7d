//! Resolver functions reachable from expressions.

use std::collections::HashMap;
use std::rc::Rc;

use anyhow::Result;
use async_trait::async_trait;

use serde_json::Value;

/// A named function callable from expressions as `ns.path.fn(args...)`.
///
/// Resolver calls are the only suspension points in an evaluation burst, so
/// implementations are free to perform I/O.
#[async_trait(?Send)]
pub trait Resolver {
    async fn call(&self, args: Vec<Value>) -> Result<Value>;
}

/// Adapter exposing a plain closure as a [`Resolver`].
pub struct FnResolver<F>(pub F);

#[async_trait(?Send)]
impl<F> Resolver for FnResolver<F>
where
    F: Fn(Vec<Value>) -> Result<Value>,
{
    async fn call(&self, args: Vec<Value>) -> Result<Value> {
        (self.0)(args)
    }
}

/// Dotted-name registry of resolvers available to a document.
#[derive(Clone, Default)]
pub struct ResolverRegistry {
    entries: HashMap<String, Rc<dyn Resolver>>,
}

impl ResolverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, resolver: Rc<dyn Resolver>) {
        self.entries.insert(name.into(), resolver);
    }

    /// Register a synchronous closure under a dotted name.
    pub fn register_fn<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(Vec<Value>) -> Result<Value> + 'static,
    {
        self.register(name, Rc::new(FnResolver(f)));
    }

    pub fn get(&self, name: &str) -> Option<Rc<dyn Resolver>> {
        self.entries.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for ResolverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverRegistry")
            .field("names", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}
