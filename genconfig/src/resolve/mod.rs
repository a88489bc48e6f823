//! The resolution pipeline.
//!
//! [`resolve`] takes a schema and a configuration document through a fixed
//! sequence of stages:
//!
//! 1. `Compiling`: build the knob tree and a fresh [`KnobRegistry`].
//! 2. `Defaulting`: materialise containers, fill leaf defaults, drop
//!    fields the schema does not declare.
//! 3. `TypeChecking`: check every value against its knob type.
//! 4. `Selecting`: evaluate `select` guards on one snapshot, then apply all
//!    forced writes at once and re-check the written paths.
//! 5. `DependencyChecking`: collect the resolved knobs and assert every
//!    `depends` on the final document.
//!
//! A run ends `Resolved` with both artifacts rendered, or `Rejected` with
//! the ordered list of violations. Nothing is shared between runs.

use std::fmt;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::{
    data::{
        registry::{KnobEntry, KnobRegistry, RegistryError},
        schema::{SchemaError, SchemaModel, SchemaNode},
    },
    emit,
};

/// `select` planning and application, `depends` assertions.
pub mod constraint;

/// Document walks: defaulting, type checking, reachability.
pub mod validator;

pub use validator::ResolvedSet;

/// Pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    Loading,
    Compiling,
    Defaulting,
    TypeChecking,
    Selecting,
    DependencyChecking,
    Resolved,
    Rejected,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Loading => "loading",
            Stage::Compiling => "compiling",
            Stage::Defaulting => "defaulting",
            Stage::TypeChecking => "type checking",
            Stage::Selecting => "selecting",
            Stage::DependencyChecking => "dependency checking",
            Stage::Resolved => "resolved",
            Stage::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

/// Violation category. The order is the reporting order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ViolationKind {
    /// Malformed schema.
    Schema,
    /// Duplicate knob or contradicting selects.
    Conflict,
    /// Document value does not match its knob.
    Type,
    /// An active knob's `depends` does not hold.
    Dependency,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ViolationKind::Schema => "schema",
            ViolationKind::Conflict => "conflict",
            ViolationKind::Type => "type",
            ViolationKind::Dependency => "dependency",
        };
        f.write_str(name)
    }
}

/// A single reported problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub kind: ViolationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub knob: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    /// Schema or document path the violation refers to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub message: String,
}

impl Violation {
    pub fn new(kind: ViolationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            knob: None,
            expression: None,
            path: None,
            message: message.into(),
        }
    }

    pub fn with_knob(mut self, knob: impl Into<String>) -> Self {
        self.knob = Some(knob.into());
        self
    }

    pub fn with_expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = Some(expression.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl From<SchemaError> for Violation {
    fn from(err: SchemaError) -> Self {
        let violation =
            Violation::new(ViolationKind::Schema, err.to_string()).with_path(err.path());
        match err {
            SchemaError::UnknownKnob { knob, .. }
            | SchemaError::SelectNeedsValue { knob, .. }
            | SchemaError::ChoiceSelectValue { knob, .. }
            | SchemaError::InvalidSelectValue { knob, .. }
            | SchemaError::MissingDefault { knob, .. } => violation.with_knob(knob),
            SchemaError::InvalidExpression { expression, .. } => {
                violation.with_expression(expression)
            }
            _ => violation,
        }
    }
}

impl From<RegistryError> for Violation {
    fn from(err: RegistryError) -> Self {
        let message = err.to_string();
        match err {
            RegistryError::Duplicate { name, second, .. } => {
                Violation::new(ViolationKind::Conflict, message)
                    .with_knob(name)
                    .with_path(second)
            }
        }
    }
}

/// A failed run.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("configuration rejected while {stage}: {} violation(s)", .violations.len())]
pub struct Rejection {
    /// Stage the run stopped in.
    pub stage: Stage,
    /// Schema, conflict and type problems first, dependency violations last.
    pub violations: Vec<Violation>,
}

impl Rejection {
    pub fn new(stage: Stage, mut violations: Vec<Violation>) -> Self {
        violations.sort_by_key(|v| v.kind);
        Self { stage, violations }
    }
}

/// A successful run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    /// Every registered knob, in schema order.
    pub knobs: Vec<KnobEntry>,
    /// Names of the knobs that were reached and accepted, in schema order.
    pub resolved: Vec<String>,
    /// The defaulted, selected and validated document.
    pub config: Value,
    /// `NAME=value` listing.
    pub makefile: String,
    /// `#define` listing.
    pub header: String,
}

/// Schema tree and registry of one run.
#[derive(Debug, Clone)]
pub struct CompiledSchema {
    pub root: SchemaNode,
    pub registry: KnobRegistry,
}

/// Compile a schema and build its registry.
///
/// Every schema error is collected before giving up; duplicate knobs are
/// reported as conflicts.
pub fn compile(schema: &SchemaModel) -> Result<CompiledSchema, Vec<Violation>> {
    let root = SchemaNode::compile(schema)
        .map_err(|errors| errors.into_iter().map(Violation::from).collect::<Vec<_>>())?;
    let registry = KnobRegistry::build(&root)
        .map_err(|errors| errors.into_iter().map(Violation::from).collect::<Vec<_>>())?;

    let errors = constraint::check_references(&root, &registry);
    if !errors.is_empty() {
        return Err(errors.into_iter().map(Violation::from).collect());
    }

    Ok(CompiledSchema { root, registry })
}

struct Pipeline {
    stage: Stage,
}

impl Pipeline {
    fn enter(&mut self, stage: Stage) {
        debug!("{} -> {}", self.stage, stage);
        self.stage = stage;
    }

    fn reject(&mut self, violations: Vec<Violation>) -> Rejection {
        let stage = self.stage;
        self.enter(Stage::Rejected);
        info!("rejected while {stage} with {} violation(s)", violations.len());
        Rejection::new(stage, violations)
    }
}

/// Validate `config` against `schema` and render both artifacts.
///
/// The document is taken by value: it is defaulted and mutated by
/// `select`, then returned in [`Resolution::config`].
///
/// # Errors
///
/// Returns a [`Rejection`] listing every violation found in the stage
/// where the run stopped.
pub fn resolve(schema: &SchemaModel, config: Value) -> Result<Resolution, Rejection> {
    let mut pipeline = Pipeline {
        stage: Stage::Loading,
    };

    pipeline.enter(Stage::Compiling);
    let CompiledSchema { root, registry } =
        compile(schema).map_err(|errors| pipeline.reject(errors))?;
    let mut doc = config;

    pipeline.enter(Stage::Defaulting);
    validator::apply_defaults(&root, &mut doc);

    pipeline.enter(Stage::TypeChecking);
    let errors = validator::check_types(&root, &doc);
    if !errors.is_empty() {
        return Err(pipeline.reject(errors));
    }

    pipeline.enter(Stage::Selecting);
    let (writes, mut errors) = constraint::plan_selects(&root, &registry, &doc);
    if errors.is_empty() {
        errors = constraint::apply_writes(&root, &mut doc, &writes);
    }
    if !errors.is_empty() {
        return Err(pipeline.reject(errors));
    }

    pipeline.enter(Stage::DependencyChecking);
    let (resolved, constraints) =
        validator::collect_resolved(&root, &doc).map_err(|errors| pipeline.reject(errors))?;
    let errors = constraint::check_depends(&registry, &doc, &constraints);
    if !errors.is_empty() {
        return Err(pipeline.reject(errors));
    }

    let makefile = emit::makefile(&resolved, &registry, &doc);
    let header = emit::header(&resolved, &registry, &doc);

    pipeline.enter(Stage::Resolved);
    info!("resolved {} of {} knobs", resolved.len(), registry.len());

    Ok(Resolution {
        knobs: registry.entries().to_vec(),
        resolved: resolved.into_vec(),
        config: doc,
        makefile,
        header,
    })
}
