//! Schema documents and the compiled knob tree.
//!
//! A schema is a tree of objects, each tagged with a `metaType`. Containers
//! (`menu`, `menuconfig`) nest children under `properties`; leaves (`int`,
//! `str`, `bool`, `tristate`) name a knob with `config`; a `boolChoice`
//! maps choice keys to knob names. Compilation turns the raw document into
//! [`SchemaNode`]s, reporting every structural problem it finds.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{
    data::item::{KnobType, check_choice},
    expr::{Expr, ExprError},
};

/// A schema tree as loaded from storage, with all references merged.
///
/// This is the unvalidated form. It is read-only once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaModel {
    root: Value,
}

impl SchemaModel {
    pub fn from_value(root: Value) -> Self {
        Self { root }
    }

    /// The raw schema tree.
    pub fn as_json(&self) -> &Value {
        &self.root
    }
}

/// Structural problems found while compiling a schema.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    #[error("`{path}`: node is not a valid schema object: {reason}")]
    Malformed { path: String, reason: String },
    #[error("`{path}`: property key `{key}` must be non-empty and must not contain `.`")]
    InvalidKey { path: String, key: String },
    #[error("`{path}`: missing `metaType`")]
    MissingMetaType { path: String },
    #[error("`{path}`: unknown metaType `{meta_type}`")]
    UnknownMetaType { path: String, meta_type: String },
    #[error("root node must be a menu or menuconfig, found `{meta_type}`")]
    InvalidRoot { meta_type: MetaType },
    #[error("`{path}`: `{meta_type}` node does not accept `{keyword}`")]
    UnexpectedKeyword {
        path: String,
        meta_type: MetaType,
        keyword: &'static str,
    },
    #[error("`{path}`: leaf is not declared as a config knob (missing `config`)")]
    LeafOutsideConfig { path: String },
    #[error("`{path}`: knob `{knob}` has no `default`")]
    MissingDefault { path: String, knob: String },
    #[error("`{path}`: invalid default, expected {expected}, found {actual}")]
    InvalidDefault {
        path: String,
        expected: String,
        actual: String,
    },
    #[error("`{path}`: boolChoice needs a non-empty `choice` mapping")]
    MissingChoice { path: String },
    #[error("`{path}`: choice `{key}` must map to a knob name")]
    InvalidChoice { path: String, key: String },
    #[error("`{path}`: menuconfig needs a bool or tristate `enabled` knob")]
    MissingEnabled { path: String },
    #[error("`{path}`: invalid expression `{expression}`: {source}")]
    InvalidExpression {
        path: String,
        expression: String,
        source: ExprError,
    },
    #[error("`{path}`: select value for `{knob}` must not be an array or object")]
    InvalidSelectValue { path: String, knob: String },
    #[error("`{path}`: reference to unknown knob `{knob}`")]
    UnknownKnob { path: String, knob: String },
    #[error("`{path}`: selecting `{knob}` needs an explicit value")]
    SelectNeedsValue { path: String, knob: String },
    #[error("`{path}`: selecting choice alternative `{knob}` does not take a value")]
    ChoiceSelectValue { path: String, knob: String },
}

impl SchemaError {
    /// Schema path the error refers to.
    pub fn path(&self) -> &str {
        match self {
            SchemaError::InvalidRoot { .. } => "",
            SchemaError::Malformed { path, .. }
            | SchemaError::InvalidKey { path, .. }
            | SchemaError::MissingMetaType { path }
            | SchemaError::UnknownMetaType { path, .. }
            | SchemaError::UnexpectedKeyword { path, .. }
            | SchemaError::LeafOutsideConfig { path }
            | SchemaError::MissingDefault { path, .. }
            | SchemaError::InvalidDefault { path, .. }
            | SchemaError::MissingChoice { path }
            | SchemaError::InvalidChoice { path, .. }
            | SchemaError::MissingEnabled { path }
            | SchemaError::InvalidExpression { path, .. }
            | SchemaError::InvalidSelectValue { path, .. }
            | SchemaError::UnknownKnob { path, .. }
            | SchemaError::SelectNeedsValue { path, .. }
            | SchemaError::ChoiceSelectValue { path, .. } => path,
        }
    }
}

/// Node classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetaType {
    #[serde(rename = "menu")]
    Menu,
    #[serde(rename = "menuconfig")]
    MenuConfig,
    #[serde(rename = "int")]
    Int,
    #[serde(rename = "str")]
    Str,
    #[serde(rename = "bool")]
    Bool,
    #[serde(rename = "tristate")]
    Tristate,
    #[serde(rename = "boolChoice")]
    BoolChoice,
}

impl MetaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetaType::Menu => "menu",
            MetaType::MenuConfig => "menuconfig",
            MetaType::Int => "int",
            MetaType::Str => "str",
            MetaType::Bool => "bool",
            MetaType::Tristate => "tristate",
            MetaType::BoolChoice => "boolChoice",
        }
    }
}

impl fmt::Display for MetaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetaType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "menu" => Ok(MetaType::Menu),
            "menuconfig" => Ok(MetaType::MenuConfig),
            "int" => Ok(MetaType::Int),
            "str" => Ok(MetaType::Str),
            "bool" => Ok(MetaType::Bool),
            "tristate" => Ok(MetaType::Tristate),
            "boolChoice" => Ok(MetaType::BoolChoice),
            _ => Err(()),
        }
    }
}

/// A parsed boolean expression together with its source text.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub source: String,
    pub expr: Expr,
}

/// One `select` target.
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    /// Knob forced by this selector.
    pub knob: String,
    /// Explicit value; `None` forces the knob "on".
    pub value: Option<Value>,
    /// Guard evaluated against the document snapshot.
    pub condition: Condition,
}

/// Leaf knob payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Leaf {
    pub knob: String,
    pub default: Value,
    pub make_only: bool,
}

/// Choice group payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Choice {
    /// `(choice key, knob name)` in declaration order.
    pub alternatives: Vec<(String, String)>,
    pub default: Option<String>,
    pub make_only: bool,
}

impl Choice {
    pub fn keys(&self) -> impl Iterator<Item = &str> + Clone {
        self.alternatives.iter().map(|(k, _)| k.as_str())
    }

    /// Knob standing for the given choice key.
    pub fn knob_for(&self, key: &str) -> Option<&str> {
        self.alternatives
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, knob)| knob.as_str())
    }
}

/// Node payload, one variant per `metaType`.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Menu(Vec<SchemaNode>),
    MenuConfig(Vec<SchemaNode>),
    Int(Leaf),
    Str(Leaf),
    Bool(Leaf),
    Tristate(Leaf),
    BoolChoice(Choice),
}

impl NodeKind {
    pub fn meta_type(&self) -> MetaType {
        match self {
            NodeKind::Menu(_) => MetaType::Menu,
            NodeKind::MenuConfig(_) => MetaType::MenuConfig,
            NodeKind::Int(_) => MetaType::Int,
            NodeKind::Str(_) => MetaType::Str,
            NodeKind::Bool(_) => MetaType::Bool,
            NodeKind::Tristate(_) => MetaType::Tristate,
            NodeKind::BoolChoice(_) => MetaType::BoolChoice,
        }
    }

    /// Leaf payload and its knob type, for the four leaf variants.
    pub fn leaf(&self) -> Option<(&Leaf, KnobType)> {
        match self {
            NodeKind::Int(leaf) => Some((leaf, KnobType::Int)),
            NodeKind::Str(leaf) => Some((leaf, KnobType::Str)),
            NodeKind::Bool(leaf) => Some((leaf, KnobType::Bool)),
            NodeKind::Tristate(leaf) => Some((leaf, KnobType::Tristate)),
            NodeKind::Menu(_) | NodeKind::MenuConfig(_) | NodeKind::BoolChoice(_) => None,
        }
    }

    pub fn children(&self) -> &[SchemaNode] {
        match self {
            NodeKind::Menu(children) | NodeKind::MenuConfig(children) => children,
            _ => &[],
        }
    }

    pub fn is_container(&self) -> bool {
        matches!(self, NodeKind::Menu(_) | NodeKind::MenuConfig(_))
    }
}

/// A compiled schema node.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaNode {
    /// Property name under the parent; empty for the root.
    pub key: String,
    /// Storage path of this node's value in the configuration document.
    pub path: String,
    /// Display name. Untitled nodes are not shown in menus.
    pub title: Option<String>,
    pub description: Option<String>,
    pub depends: Option<Condition>,
    pub select: Vec<Selector>,
    pub kind: NodeKind,
}

/// Key of the switch every `menuconfig` carries.
pub const ENABLED_KEY: &str = "enabled";

impl SchemaNode {
    /// Compile a schema tree, collecting every structural error.
    ///
    /// Knob references are not checked here; that needs the registry.
    pub fn compile(model: &SchemaModel) -> Result<SchemaNode, Vec<SchemaError>> {
        let mut errors = Vec::new();
        let root = compile_node("", "", model.as_json(), &mut errors);

        if let Some(root) = &root {
            if !root.kind.is_container() {
                errors.insert(
                    0,
                    SchemaError::InvalidRoot {
                        meta_type: root.kind.meta_type(),
                    },
                );
            }
        }

        match root {
            Some(root) if errors.is_empty() => Ok(root),
            _ => Err(errors),
        }
    }

    pub fn meta_type(&self) -> MetaType {
        self.kind.meta_type()
    }

    pub fn children(&self) -> &[SchemaNode] {
        self.kind.children()
    }

    pub fn child(&self, key: &str) -> Option<&SchemaNode> {
        self.children().iter().find(|c| c.key == key)
    }

    /// Find a node by storage path relative to this node.
    pub fn find(&self, path: &str) -> Option<&SchemaNode> {
        if path.is_empty() {
            return Some(self);
        }
        path.split('.').try_fold(self, |node, key| node.child(key))
    }

    /// Knob name of a leaf node.
    pub fn knob(&self) -> Option<&str> {
        self.kind.leaf().map(|(leaf, _)| leaf.knob.as_str())
    }

    /// Name used in diagnostics: the knob for leaves, the path otherwise.
    pub fn label(&self) -> &str {
        match self.knob() {
            Some(knob) => knob,
            None if self.path.is_empty() => "<root>",
            None => &self.path,
        }
    }

    /// This node and all nodes below it, in pre-order.
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants { stack: vec![self] }
    }
}

/// Pre-order iterator over a schema subtree.
pub struct Descendants<'a> {
    stack: Vec<&'a SchemaNode>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a SchemaNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children().iter().rev());
        Some(node)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawNode {
    meta_type: Option<String>,
    title: Option<String>,
    description: Option<String>,
    properties: Option<Map<String, Value>>,
    choice: Option<Map<String, Value>>,
    config: Option<String>,
    default: Option<Value>,
    depends: Option<String>,
    select: Option<RawSelect>,
    make_only: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawSelect {
    Knob(String),
    Knobs(Vec<String>),
    Selector(RawSelector),
    Selectors(Vec<RawSelector>),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSelector {
    knob: String,
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    expression: Option<String>,
}

impl RawSelect {
    fn into_selectors(self) -> Vec<RawSelector> {
        let by_name = |knob| RawSelector {
            knob,
            value: None,
            expression: None,
        };
        match self {
            RawSelect::Knob(knob) => vec![by_name(knob)],
            RawSelect::Knobs(knobs) => knobs.into_iter().map(by_name).collect(),
            RawSelect::Selector(sel) => vec![sel],
            RawSelect::Selectors(sels) => sels,
        }
    }
}

fn join_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

fn parse_condition(
    path: &str,
    source: &str,
    errors: &mut Vec<SchemaError>,
) -> Option<Condition> {
    match Expr::parse(source) {
        Ok(expr) => Some(Condition {
            source: source.to_string(),
            expr,
        }),
        Err(e) => {
            errors.push(SchemaError::InvalidExpression {
                path: path.to_string(),
                expression: source.to_string(),
                source: e,
            });
            None
        }
    }
}

fn compile_node(
    key: &str,
    path: &str,
    value: &Value,
    errors: &mut Vec<SchemaError>,
) -> Option<SchemaNode> {
    let raw: RawNode = match serde_json::from_value(value.clone()) {
        Ok(raw) => raw,
        Err(e) => {
            errors.push(SchemaError::Malformed {
                path: path.to_string(),
                reason: e.to_string(),
            });
            return None;
        }
    };

    let Some(meta_name) = raw.meta_type.as_deref() else {
        errors.push(SchemaError::MissingMetaType {
            path: path.to_string(),
        });
        return None;
    };
    let Ok(meta_type) = meta_name.parse::<MetaType>() else {
        errors.push(SchemaError::UnknownMetaType {
            path: path.to_string(),
            meta_type: meta_name.to_string(),
        });
        return None;
    };

    let reject = |keyword: &'static str, present: bool, errors: &mut Vec<SchemaError>| {
        if present {
            errors.push(SchemaError::UnexpectedKeyword {
                path: path.to_string(),
                meta_type,
                keyword,
            });
        }
    };

    let errors_before = errors.len();

    let kind = match meta_type {
        MetaType::Menu | MetaType::MenuConfig => {
            reject("config", raw.config.is_some(), errors);
            reject("choice", raw.choice.is_some(), errors);
            reject("makeOnly", raw.make_only.is_some(), errors);
            reject("depends", raw.depends.is_some(), errors);
            if meta_type == MetaType::Menu {
                reject("select", raw.select.is_some(), errors);
            }

            let mut children = Vec::new();
            for (child_key, child) in raw.properties.iter().flatten() {
                if child_key.is_empty() || child_key.contains('.') {
                    errors.push(SchemaError::InvalidKey {
                        path: path.to_string(),
                        key: child_key.clone(),
                    });
                    continue;
                }
                let child_path = join_path(path, child_key);
                if let Some(node) = compile_node(child_key, &child_path, child, errors) {
                    children.push(node);
                }
            }

            if meta_type == MetaType::Menu {
                NodeKind::Menu(children)
            } else {
                let has_switch = children.iter().any(|c| {
                    c.key == ENABLED_KEY
                        && matches!(c.kind, NodeKind::Bool(_) | NodeKind::Tristate(_))
                });
                if !has_switch {
                    errors.push(SchemaError::MissingEnabled {
                        path: path.to_string(),
                    });
                }
                NodeKind::MenuConfig(children)
            }
        }
        MetaType::Int | MetaType::Str | MetaType::Bool | MetaType::Tristate => {
            reject("properties", raw.properties.is_some(), errors);
            reject("choice", raw.choice.is_some(), errors);

            let Some(knob) = raw.config.clone() else {
                errors.push(SchemaError::LeafOutsideConfig {
                    path: path.to_string(),
                });
                return None;
            };
            let ty = match meta_type {
                MetaType::Int => KnobType::Int,
                MetaType::Str => KnobType::Str,
                MetaType::Bool => KnobType::Bool,
                _ => KnobType::Tristate,
            };
            let default = match raw.default.clone() {
                Some(default) => {
                    if let Err(e) = ty.check(&default) {
                        errors.push(SchemaError::InvalidDefault {
                            path: path.to_string(),
                            expected: e.expected,
                            actual: e.actual,
                        });
                    }
                    default
                }
                None => {
                    errors.push(SchemaError::MissingDefault {
                        path: path.to_string(),
                        knob: knob.clone(),
                    });
                    Value::Null
                }
            };
            let leaf = Leaf {
                knob,
                default,
                make_only: raw.make_only.unwrap_or(false),
            };
            match meta_type {
                MetaType::Int => NodeKind::Int(leaf),
                MetaType::Str => NodeKind::Str(leaf),
                MetaType::Bool => NodeKind::Bool(leaf),
                _ => NodeKind::Tristate(leaf),
            }
        }
        MetaType::BoolChoice => {
            reject("properties", raw.properties.is_some(), errors);
            reject("config", raw.config.is_some(), errors);

            let mut alternatives = Vec::new();
            for (choice_key, knob) in raw.choice.iter().flatten() {
                match knob.as_str() {
                    Some(knob) => alternatives.push((choice_key.clone(), knob.to_string())),
                    None => errors.push(SchemaError::InvalidChoice {
                        path: path.to_string(),
                        key: choice_key.clone(),
                    }),
                }
            }
            if raw.choice.as_ref().is_none_or(|c| c.is_empty()) {
                errors.push(SchemaError::MissingChoice {
                    path: path.to_string(),
                });
            }

            let choice = Choice {
                alternatives,
                default: None,
                make_only: raw.make_only.unwrap_or(false),
            };
            let default = match &raw.default {
                None => None,
                Some(default) => match check_choice(choice.keys(), default) {
                    Ok(()) => default.as_str().map(str::to_string),
                    Err(e) => {
                        errors.push(SchemaError::InvalidDefault {
                            path: path.to_string(),
                            expected: e.expected,
                            actual: e.actual,
                        });
                        None
                    }
                },
            };
            NodeKind::BoolChoice(Choice { default, ..choice })
        }
    };

    let depends = raw
        .depends
        .as_deref()
        .and_then(|source| parse_condition(path, source, errors));

    let mut select = Vec::new();
    for sel in raw.select.map(RawSelect::into_selectors).unwrap_or_default() {
        if matches!(sel.value, Some(Value::Array(_) | Value::Object(_))) {
            errors.push(SchemaError::InvalidSelectValue {
                path: path.to_string(),
                knob: sel.knob.clone(),
            });
            continue;
        }
        let source = sel.expression.as_deref().unwrap_or("true");
        if let Some(condition) = parse_condition(path, source, errors) {
            select.push(Selector {
                knob: sel.knob,
                value: sel.value,
                condition,
            });
        }
    }

    if errors.len() > errors_before {
        // Keep the node so siblings and descendants are still reported,
        // the caller discards the tree anyway.
        debug!("schema node `{path}` has {} error(s)", errors.len() - errors_before);
    }

    Some(SchemaNode {
        key: key.to_string(),
        path: path.to_string(),
        title: raw.title,
        description: raw.description,
        depends,
        select,
        kind,
    })
}
