//! Configuration documents: dot-path access and file formats.
//!
//! A configuration document is a JSON object tree whose nesting mirrors the
//! schema's containers. On disk it is stored as JSON or TOML, selected by
//! the file extension.

use std::{fs, path::Path};

use anyhow::{Context, bail};
use serde_json::{Map, Value};
use thiserror::Error;

/// Failure to write through a storage path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("`{path}` is not an object")]
    NotAnObject { path: String },
}

/// Read the value stored at a dot-delimited path.
///
/// The empty path addresses the document itself.
pub fn get_value<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(doc);
    }
    path.split('.').try_fold(doc, |node, key| node.get(key))
}

/// Store `value` at a dot-delimited path, creating missing objects on the way.
pub fn set_value(doc: &mut Value, path: &str, value: Value) -> Result<(), PathError> {
    if path.is_empty() {
        *doc = value;
        return Ok(());
    }

    let keys: Vec<&str> = path.split('.').collect();
    let (last, parents) = keys.split_last().unwrap_or((&"", &[]));
    let mut node = doc;
    let mut walked = String::new();

    for key in parents {
        let obj = node.as_object_mut().ok_or_else(|| PathError::NotAnObject {
            path: walked.clone(),
        })?;
        if !walked.is_empty() {
            walked.push('.');
        }
        walked.push_str(key);
        node = obj
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    let obj = node
        .as_object_mut()
        .ok_or(PathError::NotAnObject { path: walked })?;
    obj.insert(last.to_string(), value);
    Ok(())
}

/// Parse document text according to a file extension (`json` or `toml`).
///
/// Blank content is the empty object.
pub fn parse_by_extension(content: &str, ext: &str) -> anyhow::Result<Value> {
    if content.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    let value = match ext {
        "json" => serde_json::from_str(content)?,
        "toml" | "tml" => {
            let v: toml::Value = toml::from_str(content)?;
            serde_json::to_value(v)?
        }
        _ => bail!("Unsupported file extension: {ext:?}"),
    };
    Ok(value)
}

/// Render a document in the format selected by `ext`.
pub fn render_by_extension(value: &Value, ext: &str) -> anyhow::Result<String> {
    let s = match ext {
        "toml" | "tml" => toml::to_string_pretty(value)?,
        "json" => serde_json::to_string_pretty(value)?,
        _ => bail!("Unsupported file extension: {ext:?}"),
    };
    Ok(s)
}

pub(crate) fn extension(path: &Path) -> &str {
    path.extension().and_then(|s| s.to_str()).unwrap_or("")
}

/// Load a configuration document from disk. No validation happens here.
pub fn load_config(path: impl AsRef<Path>) -> anyhow::Result<Value> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    parse_by_extension(&content, extension(path))
        .with_context(|| format!("Failed to parse config {}", path.display()))
}

/// Write a configuration document to disk.
pub fn save_config(path: impl AsRef<Path>, value: &Value) -> anyhow::Result<()> {
    let path = path.as_ref();
    let s = render_by_extension(value, extension(path))?;
    fs::write(path, s).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_value() {
        let doc = json!({"kern": {"hz": 100, "debug": {"enabled": false}}});
        assert_eq!(get_value(&doc, "kern.hz"), Some(&json!(100)));
        assert_eq!(get_value(&doc, "kern.debug.enabled"), Some(&json!(false)));
        assert_eq!(get_value(&doc, "kern.missing"), None);
        assert_eq!(get_value(&doc, "kern.hz.deeper"), None);
        assert_eq!(get_value(&doc, ""), Some(&doc));
    }

    #[test]
    fn test_set_value_creates_path() {
        let mut doc = json!({});
        set_value(&mut doc, "a.b.c", json!(true)).unwrap();
        assert_eq!(doc, json!({"a": {"b": {"c": true}}}));

        set_value(&mut doc, "a.d", json!("x")).unwrap();
        assert_eq!(doc, json!({"a": {"b": {"c": true}, "d": "x"}}));
    }

    #[test]
    fn test_set_value_through_scalar() {
        let mut doc = json!({"a": 5});
        let err = set_value(&mut doc, "a.b", json!(1)).unwrap_err();
        assert_eq!(err, PathError::NotAnObject { path: "a".into() });
    }

    #[test]
    fn test_parse_formats() {
        let from_toml = parse_by_extension("[kern]\nhz = 100\n", "toml").unwrap();
        assert_eq!(from_toml, json!({"kern": {"hz": 100}}));
        let from_json = parse_by_extension(r#"{"kern": {"hz": 100}}"#, "json").unwrap();
        assert_eq!(from_json, from_toml);
        assert_eq!(parse_by_extension("  \n", "json").unwrap(), json!({}));
        assert!(parse_by_extension("{}", "yaml").is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let doc = json!({"kern": {"hz": 250, "name": "zeke"}});
        save_config(&path, &doc).unwrap();
        assert_eq!(load_config(&path).unwrap(), doc);
    }
}
