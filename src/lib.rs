//! # FlowQuery
//!
//! An in-process graph query engine over *virtual* graphs: nodes and
//! relationships materialise lazily from the results of sub-queries
//! rather than on-disk storage. One Cypher-flavoured language drives both
//! graph construction (`CREATE VIRTUAL`) and pattern-matching traversal
//! (`MATCH`), with aggregation, projection, filtering and set operations
//! composable into pipelines.
//!
//! ## Pipeline Architecture
//!
//! ```text
//! Statement text
//!     ↓
//! [Tokenizer]          → token stream
//!     ↓
//! [Parser]             → operation pipeline + expression trees
//!     ↓
//! [Pipeline runtime]   → WITH / UNWIND / MATCH / CALL / LOAD / RETURN / UNION
//!     ↓                   (MATCH dispatches into the graph matcher)
//! Result records
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use flowquery::Runner;
//!
//! let mut runner = Runner::new("WITH 1 AS x RETURN x").unwrap();
//! runner.run().unwrap();
//! assert_eq!(runner.results().len(), 1);
//! ```
//!
//! Statements that build a graph and then query it share a session:
//!
//! ```rust
//! use flowquery::{Database, Runner};
//! use std::rc::Rc;
//!
//! let db = Rc::new(Database::new());
//! let mut create = Runner::with_database(
//!     "CREATE VIRTUAL (:P) AS { UNWIND [{id: 1}, {id: 2}] AS r RETURN r.id AS id }",
//!     Rc::clone(&db),
//! )
//! .unwrap();
//! create.run().unwrap();
//!
//! let mut query = Runner::with_database("MATCH (p:P) RETURN p.id AS id", db).unwrap();
//! query.run().unwrap();
//! assert_eq!(query.results().len(), 2);
//! ```

pub mod ast;
pub mod config;
pub mod database;
pub mod error;
pub mod eval;
pub mod functions;
pub mod graph;
pub mod loader;
pub mod parser;
pub mod pipeline;
pub mod repl;
pub mod tokenizer;
pub mod value;

// Re-export the public API surface
pub use config::Config;
pub use database::Database;
pub use error::{Error, Result};
pub use functions::{GeneratorFunction, Registry};
pub use loader::{HttpLoader, RecordLoader};
pub use pipeline::{ExecCtx, Runner};
pub use value::{Record, Value};
