//! Document loading collaborators.
//!
//! The engine core never touches storage directly; it reaches loaders only
//! through resolver functions it is handed (see [`register_loader`]). The
//! bundled [`FileLoader`] keeps one JSON file per document and language,
//! `app.json` / `app.es.json`, in a flat root directory.

use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::{fs, io};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde_json::Value;

use crate::core::resolver::{Resolver, ResolverRegistry};
use crate::core::variant::VariantContext;

/// Storage backend for whole documents.
#[async_trait(?Send)]
pub trait Loader {
    async fn load(&self, base_name: &str, context: &VariantContext) -> Result<Value>;
    async fn save(&self, base_name: &str, data: &Value, context: &VariantContext) -> Result<()>;
    async fn list(&self, filter: Option<&str>) -> Result<Vec<DocumentInfo>>;
    async fn delete(&self, base_name: &str, context: &VariantContext) -> Result<()>;
}

/// One stored document as reported by [`Loader::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentInfo {
    pub base_name: String,
    pub lang: Option<String>,
    pub path: PathBuf,
}

/// JSON-file loader over a flat directory.
pub struct FileLoader {
    root: PathBuf,
}

impl FileLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn file_for(&self, base_name: &str, context: &VariantContext) -> PathBuf {
        match context.get("lang") {
            Some(lang) => self.root.join(format!("{base_name}.{lang}.json")),
            None => self.root.join(format!("{base_name}.json")),
        }
    }

    fn unqualified(&self, base_name: &str) -> PathBuf {
        self.root.join(format!("{base_name}.json"))
    }
}

#[async_trait(?Send)]
impl Loader for FileLoader {
    async fn load(&self, base_name: &str, context: &VariantContext) -> Result<Value> {
        let mut path = self.file_for(base_name, context);
        // A language-qualified document falls back to the unqualified file.
        if !path.exists() && context.get("lang").is_some() {
            path = self.unqualified(base_name);
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read document: {:?}", path))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse document: {:?}", path))
    }

    async fn save(&self, base_name: &str, data: &Value, context: &VariantContext) -> Result<()> {
        let path = self.file_for(base_name, context);
        let mut content = serde_json::to_string_pretty(data)
            .with_context(|| format!("Failed to serialize document '{base_name}'"))?;
        content.push('\n');
        fs::write(&path, content).with_context(|| format!("Failed to write document: {:?}", path))
    }

    async fn list(&self, filter: Option<&str>) -> Result<Vec<DocumentInfo>> {
        if !self.root.is_dir() {
            bail!("'{}' is not a directory.", self.root.display());
        }
        let mut documents = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(info) = parse_file_name(&path) else {
                continue;
            };
            if filter.is_none_or(|f| info.base_name.contains(f)) {
                documents.push(info);
            }
        }
        documents.sort_by(|a, b| (&a.base_name, &a.lang).cmp(&(&b.base_name, &b.lang)));
        Ok(documents)
    }

    async fn delete(&self, base_name: &str, context: &VariantContext) -> Result<()> {
        let path = self.file_for(base_name, context);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                bail!("document '{base_name}' does not exist")
            }
            Err(err) => {
                Err(err).with_context(|| format!("Failed to delete document: {:?}", path))
            }
        }
    }
}

/// `"app.es.json"` -> base `app`, lang `es`; `"app.json"` -> base `app`.
fn parse_file_name(path: &Path) -> Option<DocumentInfo> {
    let stem = path.file_stem()?.to_str()?;
    let (base_name, lang) = match stem.rsplit_once('.') {
        Some((base, lang)) if !base.is_empty() => (base.to_string(), Some(lang.to_string())),
        _ => (stem.to_string(), None),
    };
    Some(DocumentInfo {
        base_name,
        lang,
        path: path.to_path_buf(),
    })
}

struct LoaderResolver {
    loader: Rc<dyn Loader>,
}

#[async_trait(?Send)]
impl Resolver for LoaderResolver {
    async fn call(&self, args: Vec<Value>) -> Result<Value> {
        let mut args = args.into_iter();
        let base_name = match args.next() {
            Some(Value::String(name)) => name,
            _ => bail!("load() expects a document name"),
        };
        let mut context = VariantContext::new();
        if let Some(Value::String(lang)) = args.next() {
            context.set("lang", lang);
        }
        self.loader.load(&base_name, &context).await
    }
}

/// Expose a loader to expressions as `{namespace}.load(name[, lang])`.
pub fn register_loader(registry: &mut ResolverRegistry, namespace: &str, loader: Rc<dyn Loader>) {
    registry.register(format!("{namespace}.load"), Rc::new(LoaderResolver { loader }));
}
