use std::collections::HashMap;

use serde_json::Value;

use crate::{
    data::{
        document::set_value,
        item::{describe, KnobType},
        registry::KnobRegistry,
        schema::{Condition, SchemaError, SchemaNode},
    },
    expr::Snapshot,
};

use super::{
    Violation, ViolationKind,
    validator::{self, check_path, walk_reachable},
};

/// A `depends` assertion on one resolved knob.
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub knob: String,
    pub condition: Condition,
}

/// A value forced by a `select`, not yet written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWrite {
    /// Target knob.
    pub knob: String,
    /// Storage path of the target.
    pub path: String,
    pub value: Value,
    /// Label of the node whose selector fired.
    pub source: String,
}

/// Check that every expression identifier and select target is registered,
/// and that each selector can produce a value for its target.
pub fn check_references(root: &SchemaNode, registry: &KnobRegistry) -> Vec<SchemaError> {
    let mut errors = Vec::new();

    for node in root.descendants() {
        let unknown = |name: &str| SchemaError::UnknownKnob {
            path: node.path.clone(),
            knob: name.to_string(),
        };

        let conditions = node
            .depends
            .iter()
            .chain(node.select.iter().map(|sel| &sel.condition));
        for condition in conditions {
            for name in condition.expr.knobs() {
                if !registry.contains(name) {
                    errors.push(unknown(name));
                }
            }
        }

        for sel in &node.select {
            let Some(target) = registry.get(&sel.knob) else {
                errors.push(unknown(&sel.knob));
                continue;
            };
            match (target.ty, &sel.value) {
                (KnobType::BoolChoice, Some(_)) => errors.push(SchemaError::ChoiceSelectValue {
                    path: node.path.clone(),
                    knob: sel.knob.clone(),
                }),
                (ty, None) if ty != KnobType::BoolChoice && ty.implied_truth().is_none() => {
                    errors.push(SchemaError::SelectNeedsValue {
                        path: node.path.clone(),
                        knob: sel.knob.clone(),
                    })
                }
                _ => {}
            }
        }
    }

    errors
}

/// Evaluate every selector of every active node against one snapshot of
/// `doc` and collect the writes they force.
///
/// Writes of the same value to the same path are merged; different values
/// for one path are conflicts.
pub fn plan_selects(
    root: &SchemaNode,
    registry: &KnobRegistry,
    doc: &Value,
) -> (Vec<PendingWrite>, Vec<Violation>) {
    let snapshot = Snapshot::capture(registry, doc);
    let mut writes: Vec<PendingWrite> = Vec::new();
    let mut by_path: HashMap<String, usize> = HashMap::new();
    let mut errors = Vec::new();

    walk_reachable(root, Some(doc), &mut |node, value| {
        if node.select.is_empty() || !validator::is_active(node, value) {
            return;
        }
        for sel in &node.select {
            match sel.condition.expr.eval(&snapshot) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    errors.push(
                        Violation::new(ViolationKind::Schema, format!("`{}`: {e}", node.label()))
                            .with_expression(&sel.condition.source)
                            .with_path(&node.path),
                    );
                    continue;
                }
            }

            let Some(target) = registry.get(&sel.knob) else {
                errors.push(SchemaError::UnknownKnob {
                    path: node.path.clone(),
                    knob: sel.knob.clone(),
                }
                .into());
                continue;
            };
            let forced = match (&sel.value, &target.choice) {
                (Some(value), _) => Some(value.clone()),
                (None, Some(key)) => Some(Value::String(key.clone())),
                (None, None) => target.ty.implied_truth(),
            };
            let Some(forced) = forced else {
                errors.push(SchemaError::SelectNeedsValue {
                    path: node.path.clone(),
                    knob: sel.knob.clone(),
                }
                .into());
                continue;
            };

            let write = PendingWrite {
                knob: target.name.clone(),
                path: target.path.clone(),
                value: forced,
                source: node.label().to_string(),
            };
            match by_path.get(&write.path).copied() {
                Some(idx) if writes[idx].value == write.value => {
                    trace!("`{}` selected again by `{}`", write.knob, write.source);
                }
                Some(idx) => {
                    let first = &writes[idx];
                    errors.push(
                        Violation::new(
                            ViolationKind::Conflict,
                            format!(
                                "`{}` is selected as {} by `{}` (via `{}`) and as {} by `{}` (via `{}`)",
                                write.path,
                                describe(&first.value),
                                first.source,
                                first.knob,
                                describe(&write.value),
                                write.source,
                                write.knob,
                            ),
                        )
                        .with_knob(&write.knob)
                        .with_path(&write.path),
                    );
                }
                None => {
                    debug!("`{}` selects `{}` = {}", write.source, write.knob, write.value);
                    by_path.insert(write.path.clone(), writes.len());
                    writes.push(write);
                }
            }
        }
    });

    (writes, errors)
}

/// Apply planned writes and re-check the written paths.
pub fn apply_writes(root: &SchemaNode, doc: &mut Value, writes: &[PendingWrite]) -> Vec<Violation> {
    let mut errors = Vec::new();

    for write in writes {
        if let Err(e) = set_value(doc, &write.path, write.value.clone()) {
            errors.push(
                Violation::new(
                    ViolationKind::Type,
                    format!("cannot select `{}`: {e} (selected by `{}`)", write.knob, write.source),
                )
                .with_knob(&write.knob)
                .with_path(&write.path),
            );
        }
    }
    if !errors.is_empty() {
        return errors;
    }

    for write in writes {
        errors.extend(check_path(root, doc, &write.path).into_iter().map(|mut v| {
            v.message = format!("{} (selected by `{}`)", v.message, write.source);
            v
        }));
    }
    errors
}

/// Assert `!knob || expression` for every constraint on the final document.
///
/// Every failing constraint is reported.
pub fn check_depends(
    registry: &KnobRegistry,
    doc: &Value,
    constraints: &[Constraint],
) -> Vec<Violation> {
    let snapshot = Snapshot::capture(registry, doc);
    let mut errors = Vec::new();

    for constraint in constraints {
        let holds = match constraint.condition.expr.eval(&snapshot) {
            Ok(holds) => holds,
            Err(e) => {
                errors.push(
                    Violation::new(
                        ViolationKind::Schema,
                        format!("`{}`: {e}", constraint.knob),
                    )
                    .with_knob(&constraint.knob)
                    .with_expression(&constraint.condition.source),
                );
                continue;
            }
        };
        if snapshot.is_active(&constraint.knob) && !holds {
            errors.push(
                Violation::new(
                    ViolationKind::Dependency,
                    format!(
                        "\"{}\" depends on: \"{}\"",
                        constraint.knob, constraint.condition.source
                    ),
                )
                .with_knob(&constraint.knob)
                .with_expression(&constraint.condition.source),
            );
        }
    }

    errors
}
