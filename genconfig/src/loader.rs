//! Schema loading.
//!
//! A schema may be split over several files with `$ref`:
//!
//! ```json
//! { "metaType": "menu", "properties": { "net": { "$ref": "net.json", "title": "Network" } } }
//! ```
//!
//! The referenced document (or the part addressed by a `#/json/pointer`
//! fragment) replaces the referencing object, and the sibling keywords
//! next to `$ref` override the ones it brings in. A sibling `properties`
//! is merged into the referenced one key by key. References inside one
//! document are loaded concurrently. Loading finishes with one merged
//! [`SchemaModel`]; nothing is validated before that.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, anyhow, bail};
use futures::future::{BoxFuture, FutureExt, try_join_all};
use serde_json::{Map, Value};

use crate::data::{
    document::{extension, parse_by_extension},
    schema::SchemaModel,
};

const REF_KEY: &str = "$ref";
const PROPERTIES_KEY: &str = "properties";

/// Derive a default schema path from a config path.
///
/// `foo.toml` gives `foo-schema.json` in the same directory.
pub fn default_schema_by_init(config: &Path) -> PathBuf {
    let stem = config.file_stem().unwrap_or_default().to_string_lossy();
    let name = format!("{stem}-schema.json");

    if let Some(parent) = config.parent() {
        parent.join(name)
    } else {
        PathBuf::from(name)
    }
}

/// Load a schema file and resolve all of its `$ref`s.
///
/// # Errors
///
/// Fails on unreadable or unparsable files, dangling pointers and
/// reference cycles.
pub async fn load_schema(path: impl AsRef<Path>) -> anyhow::Result<SchemaModel> {
    let path = canonical(path.as_ref()).await?;
    debug!("loading schema {}", path.display());
    let root = Arc::new(read_document(&path).await?);
    let scope = Scope {
        chain: Arc::new(vec![ref_key(&path, "")]),
        file: path,
        root: root.clone(),
    };

    let merged = expand(root.as_ref().clone(), scope).await?;
    Ok(SchemaModel::from_value(merged))
}

#[derive(Clone)]
struct Scope {
    /// File the value being expanded came from.
    file: PathBuf,
    /// Whole document of `file`, for fragment-only refs.
    root: Arc<Value>,
    /// Refs currently being expanded, outermost first.
    chain: Arc<Vec<String>>,
}

async fn canonical(path: &Path) -> anyhow::Result<PathBuf> {
    tokio::fs::canonicalize(path)
        .await
        .with_context(|| format!("Failed to read schema {}", path.display()))
}

async fn read_document(path: &Path) -> anyhow::Result<Value> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read schema {}", path.display()))?;
    parse_by_extension(&content, extension(path))
        .with_context(|| format!("Failed to parse schema {}", path.display()))
}

fn ref_key(file: &Path, pointer: &str) -> String {
    format!("{}#{pointer}", file.display())
}

fn expand(value: Value, scope: Scope) -> BoxFuture<'static, anyhow::Result<Value>> {
    async move {
        match value {
            Value::Object(mut map) => {
                if let Some(reference) = map.remove(REF_KEY) {
                    let reference = reference
                        .as_str()
                        .ok_or_else(|| anyhow!("`{REF_KEY}` must be a string in {}", scope.file.display()))?
                        .to_string();
                    let (target, siblings) = futures::try_join!(
                        follow(reference.clone(), scope.clone()),
                        expand_object(map, scope.clone()),
                    )?;
                    return extend(target, siblings)
                        .with_context(|| format!("Failed to extend `{reference}`"));
                }
                Ok(Value::Object(expand_object(map, scope).await?))
            }
            Value::Array(items) => {
                let items = try_join_all(items.into_iter().map(|v| expand(v, scope.clone()))).await?;
                Ok(Value::Array(items))
            }
            other => Ok(other),
        }
    }
    .boxed()
}

async fn expand_object(map: Map<String, Value>, scope: Scope) -> anyhow::Result<Map<String, Value>> {
    let entries = try_join_all(map.into_iter().map(|(key, value)| {
        let scope = scope.clone();
        async move { anyhow::Ok((key, expand(value, scope).await?)) }
    }))
    .await?;
    Ok(entries.into_iter().collect())
}

async fn follow(reference: String, scope: Scope) -> anyhow::Result<Value> {
    let (file_part, pointer) = reference.split_once('#').unwrap_or((reference.as_str(), ""));

    let file = if file_part.is_empty() {
        scope.file.clone()
    } else {
        let joined = scope
            .file
            .parent()
            .map(|dir| dir.join(file_part))
            .unwrap_or_else(|| PathBuf::from(file_part));
        canonical(&joined).await?
    };

    let key = ref_key(&file, pointer);
    if scope.chain.contains(&key) {
        bail!("Reference cycle: {} -> {key}", scope.chain.join(" -> "));
    }
    trace!("follow `{reference}` as {key}");

    let root = if file_part.is_empty() {
        scope.root.clone()
    } else {
        Arc::new(read_document(&file).await?)
    };
    let target = if pointer.is_empty() {
        root.as_ref().clone()
    } else {
        root.pointer(pointer)
            .cloned()
            .ok_or_else(|| anyhow!("`{reference}` does not resolve in {}", file.display()))?
    };

    let mut chain = scope.chain.as_ref().clone();
    chain.push(key);
    expand(
        target,
        Scope {
            file,
            root,
            chain: Arc::new(chain),
        },
    )
    .await
}

fn extend(target: Value, siblings: Map<String, Value>) -> anyhow::Result<Value> {
    match target {
        Value::Object(mut base) => {
            for (key, value) in siblings {
                let replaced = match (base.get_mut(&key), value) {
                    (Some(Value::Object(inherited)), Value::Object(own)) if key == PROPERTIES_KEY => {
                        inherited.extend(own);
                        None
                    }
                    (_, value) => Some(value),
                };
                if let Some(value) = replaced {
                    base.insert(key, value);
                }
            }
            Ok(Value::Object(base))
        }
        other if siblings.is_empty() => Ok(other),
        _ => bail!("referenced value is not an object"),
    }
}
