//! # Graph Runtime
//!
//! Record stores and the pattern traversal engine. Pattern ASTs live in
//! [`crate::ast`]; this module resolves them against the session catalog
//! and enumerates bindings.

pub mod data;
pub mod matcher;

pub use data::{NodeData, RelationshipData};
pub use matcher::{evaluate_pattern_expression, run_patterns};
