//! # genconfig
//!
//! A Kconfig-style knob resolver driven by JSON schemas.
//!
//! A schema describes a tree of menus and typed knobs (`int`, `str`, `bool`,
//! `tristate`, `boolChoice`) with `select` and `depends` relations between
//! them. `genconfig` checks a configuration document against that schema,
//! fills in defaults, applies selects, asserts dependencies, and renders
//! the result as a Makefile fragment and a C header.
//!
//! ## Features
//!
//! - Schemas split over several files with `$ref`, loaded concurrently
//! - JSON and TOML configuration files
//! - A small, sandboxed boolean expression language for `depends`/`select`
//! - Every violation of a run reported at once, in a stable order
//! - Deterministic output: the same input always renders the same bytes
//!
//! ## Quick Start
//!
//! ```rust
//! use genconfig::{SchemaModel, resolve};
//! use serde_json::json;
//!
//! let schema = SchemaModel::from_value(json!({
//!     "metaType": "menu",
//!     "properties": {
//!         "smp": { "metaType": "bool", "config": "SMP", "default": true },
//!         "cpus": { "metaType": "int", "config": "NR_CPUS", "default": 4, "depends": "SMP" }
//!     }
//! }));
//!
//! let resolution = resolve(&schema, json!({})).unwrap();
//! assert_eq!(resolution.makefile, "SMP=y\nNR_CPUS=4\n");
//! assert_eq!(resolution.header, "#define SMP 1\n#define NR_CPUS 4\n");
//! ```
//!
//! ## Modules
//!
//! - [`data`] - Schema, registry and configuration data structures
//! - [`expr`] - Expression parsing and evaluation
//! - [`resolve`] - The validation pipeline
//! - [`emit`] - Makefile and header rendering
//! - [`loader`] - Schema loading
//! - [`run`] - Non-interactive entry point

#[macro_use]
extern crate log;

/// Schema, registry and configuration data structures.
pub mod data;

/// Makefile and C header rendering.
pub mod emit;

pub mod expr;

/// Schema loading with `$ref` resolution.
pub mod loader;

pub mod resolve;

/// Non-interactive resolution runner.
pub mod run;

pub use data::{AppData, schema::SchemaModel};
pub use resolve::{Rejection, Resolution, Violation, ViolationKind, resolve};
pub use run::*;
pub use serde_json::Value;
