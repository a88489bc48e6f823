//! Configuration data structures and schema parsing.
//!
//! This module provides the data model the resolver works on:
//!
//! - [`schema`] - raw schema documents and the compiled knob tree
//! - [`registry`] - the flat knob namespace built from a schema
//! - [`item`] - knob types and per-value checks
//! - [`document`] - configuration documents on disk and in memory
//! - [`app_data`] - state behind the interactive menu

/// Menu navigation state and persistence.
pub mod app_data;

/// Configuration documents: dot paths and file formats.
pub mod document;

/// Knob types and value checks.
pub mod item;

/// Knob registry.
pub mod registry;

/// Schema parsing and compilation.
pub mod schema;

pub use app_data::AppData;
