use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::{
    data::{
        document::get_value,
        item::{check_choice, describe, TypeMismatch},
        schema::{Choice, NodeKind, SchemaNode, ENABLED_KEY},
    },
    expr::SnapshotValue,
};

use super::{constraint::Constraint, Violation, ViolationKind};

/// Fill in defaults and drop undeclared fields.
///
/// A document that is not an object is left alone for [`check_types`] to
/// report.
pub fn apply_defaults(root: &SchemaNode, doc: &mut Value) {
    if let Some(obj) = doc.as_object_mut() {
        default_container(root, obj);
    }
}

fn default_container(node: &SchemaNode, obj: &mut Map<String, Value>) {
    obj.retain(|key, _| {
        let declared = node.child(key).is_some();
        if !declared {
            warn!("dropping undeclared field `{}`", join(&node.path, key));
        }
        declared
    });

    for child in node.children() {
        match &child.kind {
            NodeKind::Menu(_) | NodeKind::MenuConfig(_) => {
                let value = obj
                    .entry(child.key.clone())
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Some(inner) = value.as_object_mut() {
                    default_container(child, inner);
                }
            }
            NodeKind::Int(leaf)
            | NodeKind::Str(leaf)
            | NodeKind::Bool(leaf)
            | NodeKind::Tristate(leaf) => {
                if !obj.contains_key(&child.key) {
                    trace!("default `{}` = {}", leaf.knob, leaf.default);
                    obj.insert(child.key.clone(), leaf.default.clone());
                }
            }
            NodeKind::BoolChoice(choice) => {
                if obj.contains_key(&child.key) {
                    continue;
                }
                if let Some(default) = &choice.default {
                    trace!("default choice `{}` = {default}", child.path);
                    obj.insert(child.key.clone(), Value::String(default.clone()));
                }
            }
        }
    }
}

fn join(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

/// Check every value of the document against the schema.
///
/// All mismatches are returned, in traversal order.
pub fn check_types(root: &SchemaNode, doc: &Value) -> Vec<Violation> {
    let mut out = Vec::new();
    if !doc.is_object() {
        out.push(Violation::new(
            ViolationKind::Type,
            format!("configuration document must be an object, found {}", describe(doc)),
        ));
        return out;
    }
    check_node(root, Some(doc), &mut out);
    out
}

/// Check the subtree stored at `path`.
pub fn check_path(root: &SchemaNode, doc: &Value, path: &str) -> Vec<Violation> {
    let mut out = Vec::new();
    match root.find(path) {
        Some(node) => check_node(node, get_value(doc, path), &mut out),
        None => out.push(
            Violation::new(ViolationKind::Type, format!("`{path}` is not declared"))
                .with_path(path),
        ),
    }
    out
}

fn check_node(node: &SchemaNode, value: Option<&Value>, out: &mut Vec<Violation>) {
    match &node.kind {
        NodeKind::Menu(children) => check_menu(node, children, value, out),
        NodeKind::MenuConfig(children) => check_menuconfig(node, children, value, out),
        NodeKind::Int(_) | NodeKind::Str(_) | NodeKind::Bool(_) | NodeKind::Tristate(_) => {
            check_leaf(node, value, out)
        }
        NodeKind::BoolChoice(choice) => check_bool_choice(node, choice, value, out),
    }
}

fn check_menu(
    node: &SchemaNode,
    children: &[SchemaNode],
    value: Option<&Value>,
    out: &mut Vec<Violation>,
) {
    let Some(value) = value else {
        return;
    };
    let Some(obj) = value.as_object() else {
        out.push(
            Violation::new(
                ViolationKind::Type,
                format!("`{}` must be an object, found {}", node.label(), describe(value)),
            )
            .with_path(&node.path),
        );
        return;
    };
    for child in children {
        check_node(child, obj.get(&child.key), out);
    }
}

fn check_menuconfig(
    node: &SchemaNode,
    children: &[SchemaNode],
    value: Option<&Value>,
    out: &mut Vec<Violation>,
) {
    if value.is_some_and(Value::is_object) && value.and_then(|v| v.get(ENABLED_KEY)).is_none() {
        out.push(
            Violation::new(
                ViolationKind::Type,
                format!("`{}` has no `{ENABLED_KEY}` switch", node.label()),
            )
            .with_path(&node.path),
        );
    }
    check_menu(node, children, value, out);
}

fn check_leaf(node: &SchemaNode, value: Option<&Value>, out: &mut Vec<Violation>) {
    let Some((leaf, ty)) = node.kind.leaf() else {
        return;
    };
    let result = match value {
        Some(value) => ty.check(value),
        None => Err(TypeMismatch {
            expected: ty.to_string(),
            actual: "nothing".to_string(),
        }),
    };
    if let Err(e) = result {
        out.push(mismatch(node, &leaf.knob, e));
    }
}

fn check_bool_choice(
    node: &SchemaNode,
    choice: &Choice,
    value: Option<&Value>,
    out: &mut Vec<Violation>,
) {
    // An unset choice selects nothing.
    let Some(value) = value else {
        return;
    };
    if let Err(e) = check_choice(choice.keys(), value) {
        out.push(mismatch(node, &node.path, e));
    }
}

fn mismatch(node: &SchemaNode, label: &str, e: TypeMismatch) -> Violation {
    let violation = Violation::new(
        ViolationKind::Type,
        format!("`{label}` at `{}`: {e}", node.path),
    )
    .with_path(&node.path);
    match node.knob() {
        Some(knob) => violation.with_knob(knob),
        None => violation,
    }
}

/// Visit every reachable node in pre-order with its document value.
///
/// The non-switch children of a `menuconfig` are only reachable while its
/// `enabled` knob is on.
pub fn walk_reachable<'a, F>(node: &'a SchemaNode, value: Option<&'a Value>, visit: &mut F)
where
    F: FnMut(&'a SchemaNode, Option<&'a Value>),
{
    visit(node, value);

    let open = match &node.kind {
        NodeKind::Menu(_) => true,
        NodeKind::MenuConfig(_) => menuconfig_enabled(node, value),
        _ => return,
    };
    for child in node.children() {
        if open || child.key == ENABLED_KEY {
            walk_reachable(child, value.and_then(|v| v.get(&child.key)), visit);
        }
    }
}

/// Whether a `menuconfig`'s switch is on.
pub fn menuconfig_enabled(node: &SchemaNode, value: Option<&Value>) -> bool {
    let Some((_, ty)) = node.child(ENABLED_KEY).and_then(|c| c.kind.leaf()) else {
        return false;
    };
    SnapshotValue::coerce(ty, None, value.and_then(|v| v.get(ENABLED_KEY))).is_truthy()
}

/// Whether a reachable node is "on": its knob is truthy, its choice has a
/// selection, or its menu is enabled.
pub fn is_active(node: &SchemaNode, value: Option<&Value>) -> bool {
    match &node.kind {
        NodeKind::Menu(_) => false,
        NodeKind::MenuConfig(_) => menuconfig_enabled(node, value),
        NodeKind::BoolChoice(choice) => selected_knob(choice, value).is_some(),
        kind => kind
            .leaf()
            .is_some_and(|(_, ty)| SnapshotValue::coerce(ty, None, value).is_truthy()),
    }
}

fn selected_knob<'a>(choice: &'a Choice, value: Option<&Value>) -> Option<&'a str> {
    value.and_then(Value::as_str).and_then(|key| choice.knob_for(key))
}

/// Knobs that take part in the output, in schema order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedSet {
    order: Vec<String>,
    members: HashSet<String>,
}

impl ResolvedSet {
    /// Returns `false` if the knob was already present.
    pub fn insert(&mut self, knob: impl Into<String>) -> bool {
        let knob = knob.into();
        if !self.members.insert(knob.clone()) {
            return false;
        }
        self.order.push(knob);
        true
    }

    pub fn contains(&self, knob: &str) -> bool {
        self.members.contains(knob)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn into_vec(self) -> Vec<String> {
        self.order
    }
}

/// Collect the resolved knobs and the `depends` constraints that apply to
/// them.
pub fn collect_resolved(
    root: &SchemaNode,
    doc: &Value,
) -> Result<(ResolvedSet, Vec<Constraint>), Vec<Violation>> {
    let mut resolved = ResolvedSet::default();
    let mut constraints = Vec::new();
    let mut errors = Vec::new();

    walk_reachable(root, Some(doc), &mut |node, value| {
        let knob = match &node.kind {
            NodeKind::BoolChoice(choice) => selected_knob(choice, value),
            _ => node.knob(),
        };
        let Some(knob) = knob else {
            return;
        };

        if !resolved.insert(knob) {
            errors.push(
                Violation::new(
                    ViolationKind::Conflict,
                    format!("knob `{knob}` resolved twice, again at `{}`", node.path),
                )
                .with_knob(knob)
                .with_path(&node.path),
            );
            return;
        }
        if let Some(condition) = &node.depends {
            constraints.push(Constraint {
                knob: knob.to_string(),
                condition: condition.clone(),
            });
        }
    });

    if errors.is_empty() {
        debug!("{} knob(s) resolved, {} constraint(s)", resolved.len(), constraints.len());
        Ok((resolved, constraints))
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::schema::SchemaModel;
    use serde_json::json;

    fn schema() -> SchemaNode {
        SchemaNode::compile(&SchemaModel::from_value(json!({
            "metaType": "menu",
            "properties": {
                "hz": { "metaType": "int", "config": "HZ", "default": 100 },
                "debug": {
                    "metaType": "menuconfig",
                    "properties": {
                        "enabled": { "metaType": "bool", "config": "DEBUG", "default": false },
                        "level": { "metaType": "tristate", "config": "DEBUG_LEVEL", "default": "m" }
                    }
                },
                "sched": {
                    "metaType": "boolChoice",
                    "choice": { "rr": "SCHED_RR", "fifo": "SCHED_FIFO" },
                    "depends": "HZ"
                }
            }
        })))
        .unwrap()
    }

    #[test]
    fn test_defaults_and_dropped_fields() {
        let root = schema();
        let mut doc = json!({"hz": 250, "stale": 1, "debug": {"junk": true}});
        apply_defaults(&root, &mut doc);
        assert_eq!(
            doc,
            json!({"hz": 250, "debug": {"enabled": false, "level": "m"}})
        );
    }

    #[test]
    fn test_type_errors_collected() {
        let root = schema();
        let mut doc = json!({"hz": "fast", "debug": {"level": "x"}, "sched": "batch"});
        apply_defaults(&root, &mut doc);
        let errors = check_types(&root, &doc);
        assert_eq!(errors.len(), 3);
        assert_eq!(errors[0].knob.as_deref(), Some("HZ"));
        assert_eq!(errors[1].knob.as_deref(), Some("DEBUG_LEVEL"));
        assert_eq!(errors[2].path.as_deref(), Some("sched"));
        assert!(errors.iter().all(|e| e.kind == ViolationKind::Type));
    }

    #[test]
    fn test_document_must_be_object() {
        let errors = check_types(&schema(), &json!([1, 2]));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("must be an object"));
    }

    #[test]
    fn test_menuconfig_gates_children() {
        let root = schema();
        let mut doc = json!({"sched": "fifo"});
        apply_defaults(&root, &mut doc);

        let (resolved, constraints) = collect_resolved(&root, &doc).unwrap();
        assert_eq!(resolved.iter().collect::<Vec<_>>(), ["HZ", "DEBUG", "SCHED_FIFO"]);
        assert_eq!(constraints.len(), 1);
        assert_eq!(constraints[0].knob, "SCHED_FIFO");

        doc["debug"]["enabled"] = json!(true);
        let (resolved, _) = collect_resolved(&root, &doc).unwrap();
        assert!(resolved.contains("DEBUG_LEVEL"));
        assert!(!resolved.contains("SCHED_RR"));
    }

    #[test]
    fn test_is_active() {
        let root = schema();
        let hz = root.child("hz").unwrap();
        assert!(is_active(hz, Some(&json!(1))));
        assert!(!is_active(hz, Some(&json!(0))));
        let sched = root.child("sched").unwrap();
        assert!(is_active(sched, Some(&json!("rr"))));
        assert!(!is_active(sched, None));
    }

    #[test]
    fn test_resolved_set_keeps_first_insertion() {
        let mut set = ResolvedSet::default();
        assert!(set.insert("A"));
        assert!(set.insert("B"));
        assert!(!set.insert("A"));
        assert_eq!(set.into_vec(), ["A", "B"]);
    }
}
