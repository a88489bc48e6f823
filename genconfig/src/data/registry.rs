use std::collections::HashMap;

use serde::Serialize;
use thiserror::Error;

use crate::data::{
    item::KnobType,
    schema::{NodeKind, SchemaNode},
};

/// One registered knob.
///
/// Every alternative of a `boolChoice` group gets its own entry; all of
/// them share the group's storage path and differ in `choice`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KnobEntry {
    /// Knob name, unique across the whole schema.
    pub name: String,
    /// Dot-delimited storage path inside the configuration document.
    pub path: String,
    /// Declared value type.
    #[serde(rename = "type")]
    pub ty: KnobType,
    /// Choice key this alternative stands for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub choice: Option<String>,
    /// Emit to the Makefile only.
    pub make_only: bool,
}

/// Registration failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("knob `{name}` is declared twice: at `{first}` and at `{second}`")]
    Duplicate {
        name: String,
        first: String,
        second: String,
    },
}

/// Flat knob namespace, in schema declaration order.
#[derive(Debug, Clone, Default)]
pub struct KnobRegistry {
    entries: Vec<KnobEntry>,
    index: HashMap<String, usize>,
}

impl KnobRegistry {
    /// Register every knob of a compiled schema tree.
    ///
    /// All duplicates are reported, not only the first one.
    pub fn build(root: &SchemaNode) -> Result<Self, Vec<RegistryError>> {
        let mut registry = KnobRegistry::default();
        let mut errors = Vec::new();

        for node in root.descendants() {
            let entries = if let Some((leaf, ty)) = node.kind.leaf() {
                vec![KnobEntry {
                    name: leaf.knob.clone(),
                    path: node.path.clone(),
                    ty,
                    choice: None,
                    make_only: leaf.make_only,
                }]
            } else if let NodeKind::BoolChoice(choice) = &node.kind {
                choice
                    .alternatives
                    .iter()
                    .map(|(key, knob)| KnobEntry {
                        name: knob.clone(),
                        path: node.path.clone(),
                        ty: KnobType::BoolChoice,
                        choice: Some(key.clone()),
                        make_only: choice.make_only,
                    })
                    .collect()
            } else {
                continue;
            };

            for entry in entries {
                if let Err(e) = registry.register(entry) {
                    errors.push(e);
                }
            }
        }

        if errors.is_empty() {
            Ok(registry)
        } else {
            Err(errors)
        }
    }

    /// Add a single entry.
    pub fn register(&mut self, entry: KnobEntry) -> Result<(), RegistryError> {
        if let Some(&idx) = self.index.get(&entry.name) {
            return Err(RegistryError::Duplicate {
                name: entry.name,
                first: self.entries[idx].path.clone(),
                second: entry.path,
            });
        }
        trace!("register knob `{}` at `{}`", entry.name, entry.path);
        self.index.insert(entry.name.clone(), self.entries.len());
        self.entries.push(entry);
        Ok(())
    }

    /// Look up a knob by name.
    pub fn get(&self, name: &str) -> Option<&KnobEntry> {
        self.index.get(name).map(|&idx| &self.entries[idx])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// All entries in registration order.
    pub fn entries(&self) -> &[KnobEntry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &KnobEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::schema::SchemaModel;
    use serde_json::json;

    fn compile(schema: serde_json::Value) -> SchemaNode {
        SchemaNode::compile(&SchemaModel::from_value(schema)).unwrap()
    }

    #[test]
    fn test_choice_alternatives_share_path() {
        let root = compile(json!({
            "metaType": "menu",
            "properties": {
                "sched": {
                    "metaType": "boolChoice",
                    "choice": { "tiny": "configSCHED_TINY", "rr": "configSCHED_RR" },
                    "makeOnly": true
                },
                "hz": { "metaType": "int", "config": "configHZ", "default": 100 }
            }
        }));
        let registry = KnobRegistry::build(&root).unwrap();

        let names: Vec<_> = registry.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["configSCHED_TINY", "configSCHED_RR", "configHZ"]);

        let rr = registry.get("configSCHED_RR").unwrap();
        assert_eq!(rr.path, "sched");
        assert_eq!(rr.choice.as_deref(), Some("rr"));
        assert!(rr.make_only);
        assert_eq!(registry.get("configHZ").unwrap().ty, KnobType::Int);
    }

    #[test]
    fn test_duplicate_reports_both_paths() {
        let root = compile(json!({
            "metaType": "menu",
            "properties": {
                "a": { "metaType": "bool", "config": "FOO", "default": false },
                "sub": {
                    "metaType": "menu",
                    "properties": {
                        "b": { "metaType": "bool", "config": "FOO", "default": true }
                    }
                }
            }
        }));
        let errors = KnobRegistry::build(&root).unwrap_err();
        assert_eq!(
            errors,
            vec![RegistryError::Duplicate {
                name: "FOO".into(),
                first: "a".into(),
                second: "sub.b".into(),
            }]
        );
    }

    #[test]
    fn test_serialized_entry() {
        let entry = KnobEntry {
            name: "X".into(),
            path: "a.b".into(),
            ty: KnobType::BoolChoice,
            choice: Some("x".into()),
            make_only: false,
        };
        assert_eq!(
            serde_json::to_value(&entry).unwrap(),
            json!({"name": "X", "path": "a.b", "type": "boolChoice", "choice": "x", "makeOnly": false})
        );
    }
}
