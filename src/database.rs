//! # Session Catalog
//!
//! Registry of virtual graph handles for one session: node labels and
//! relationship types, each backed by a stored sub-pipeline. Fetching a
//! handle's data runs the sub-pipeline once and memoises the records
//! (redefinition through CREATE VIRTUAL is the only way to refresh).
//!
//! The catalog is an explicit value rather than process-wide state; share
//! one `Rc<Database>` across the runners that should see the same graph.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::debug;

use crate::ast::{DeleteTarget, Statement};
use crate::error::{Error, Result};
use crate::functions::GeneratorFunction;
use crate::graph::{NodeData, RelationshipData};
use crate::pipeline::{run_statement, ExecCtx};
use crate::value::{Record, Value};

struct NodeHandle {
    statement: Rc<Statement>,
    data: Option<Rc<NodeData>>,
}

struct RelationshipHandle {
    statement: Rc<Statement>,
    from_label: String,
    to_label: String,
    data: Option<Rc<RelationshipData>>,
}

/// Label → node handle and type → relationship handle maps, in
/// registration order.
#[derive(Default)]
pub struct Database {
    nodes: RefCell<IndexMap<String, NodeHandle>>,
    relationships: RefCell<IndexMap<String, RelationshipHandle>>,
}

impl Database {
    pub fn new() -> Self {
        Database::default()
    }

    /// Register (or replace) a virtual node label. Replacing drops the
    /// memoised records.
    pub fn register_node(&self, label: &str, statement: Rc<Statement>) {
        debug!(label, "registering virtual node");
        self.nodes.borrow_mut().insert(
            label.to_string(),
            NodeHandle {
                statement,
                data: None,
            },
        );
    }

    /// Register (or replace) a virtual relationship type with its endpoint
    /// labels.
    pub fn register_relationship(
        &self,
        rel_type: &str,
        from_label: &str,
        to_label: &str,
        statement: Rc<Statement>,
    ) {
        debug!(rel_type, from_label, to_label, "registering virtual relationship");
        self.relationships.borrow_mut().insert(
            rel_type.to_string(),
            RelationshipHandle {
                statement,
                from_label: from_label.to_string(),
                to_label: to_label.to_string(),
                data: None,
            },
        );
    }

    /// Drop a handle. Labels are resolved before relationship types for
    /// bare-name deletes.
    pub fn delete(&self, target: &DeleteTarget) -> Result<()> {
        match target {
            DeleteTarget::Label(label) => {
                self.nodes
                    .borrow_mut()
                    .shift_remove(label)
                    .map(|_| ())
                    .ok_or_else(|| Error::UnknownLabel(label.clone()))
            }
            DeleteTarget::RelType(rel_type) => {
                self.relationships
                    .borrow_mut()
                    .shift_remove(rel_type)
                    .map(|_| ())
                    .ok_or_else(|| Error::UnknownRelationshipType(rel_type.clone()))
            }
            DeleteTarget::Name(name) => {
                if self.nodes.borrow_mut().shift_remove(name).is_some() {
                    return Ok(());
                }
                if self.relationships.borrow_mut().shift_remove(name).is_some() {
                    return Ok(());
                }
                Err(Error::UnknownLabel(name.clone()))
            }
        }
    }

    /// Registered labels, in registration order.
    pub fn labels(&self) -> Vec<String> {
        self.nodes.borrow().keys().cloned().collect()
    }

    /// Registered relationship types, in registration order.
    pub fn relationship_types(&self) -> Vec<String> {
        self.relationships.borrow().keys().cloned().collect()
    }

    /// Materialised records of a label, running its sub-pipeline on first
    /// use.
    pub fn node_data(&self, label: &str, ctx: &ExecCtx) -> Result<Rc<NodeData>> {
        if let Some(handle) = self.nodes.borrow().get(label) {
            if let Some(data) = &handle.data {
                return Ok(Rc::clone(data));
            }
        } else {
            return Err(Error::UnknownLabel(label.to_string()));
        }
        let statement = {
            let nodes = self.nodes.borrow();
            Rc::clone(&nodes[label].statement)
        };
        debug!(label, "materialising virtual node data");
        let records = run_statement(&statement, ctx)?;
        let data = Rc::new(NodeData::new(Rc::new(records)));
        if let Some(handle) = self.nodes.borrow_mut().get_mut(label) {
            handle.data = Some(Rc::clone(&data));
        }
        Ok(data)
    }

    /// Materialised records of a relationship type, running its
    /// sub-pipeline on first use.
    pub fn relationship_data(&self, rel_type: &str, ctx: &ExecCtx) -> Result<Rc<RelationshipData>> {
        if let Some(handle) = self.relationships.borrow().get(rel_type) {
            if let Some(data) = &handle.data {
                return Ok(Rc::clone(data));
            }
        } else {
            return Err(Error::UnknownRelationshipType(rel_type.to_string()));
        }
        let statement = {
            let relationships = self.relationships.borrow();
            Rc::clone(&relationships[rel_type].statement)
        };
        debug!(rel_type, "materialising virtual relationship data");
        let records = run_statement(&statement, ctx)?;
        let data = Rc::new(RelationshipData::new(Rc::new(records)));
        if let Some(handle) = self.relationships.borrow_mut().get_mut(rel_type) {
            handle.data = Some(Rc::clone(&data));
        }
        Ok(data)
    }

    /// One schema entry per registered handle: kind, label/type, endpoint
    /// labels for relationships, property column names (sampled from the
    /// first record) and that sample with identity columns stripped.
    pub fn schema(&self, ctx: &ExecCtx) -> Result<Vec<Value>> {
        let mut entries = Vec::new();

        for label in self.labels() {
            let data = self.node_data(&label, ctx)?;
            let mut entry = Record::new();
            entry.insert("kind".into(), Value::from("Node"));
            entry.insert("label".into(), Value::String(label));
            entry.insert("type".into(), Value::Null);
            entry.insert("from_label".into(), Value::Null);
            entry.insert("to_label".into(), Value::Null);
            let (properties, sample) = sample_record(data.records().first(), &["id"]);
            entry.insert("properties".into(), properties);
            entry.insert("sample".into(), sample);
            entries.push(Value::Map(entry));
        }

        for rel_type in self.relationship_types() {
            let data = self.relationship_data(&rel_type, ctx)?;
            let (from_label, to_label) = {
                let relationships = self.relationships.borrow();
                let handle = &relationships[&rel_type];
                (handle.from_label.clone(), handle.to_label.clone())
            };
            let mut entry = Record::new();
            entry.insert("kind".into(), Value::from("Relationship"));
            entry.insert("label".into(), Value::Null);
            entry.insert("type".into(), Value::String(rel_type));
            entry.insert("from_label".into(), Value::String(from_label));
            entry.insert("to_label".into(), Value::String(to_label));
            let (properties, sample) =
                sample_record(data.records().first(), &["left_id", "right_id"]);
            entry.insert("properties".into(), properties);
            entry.insert("sample".into(), sample);
            entries.push(Value::Map(entry));
        }

        Ok(entries)
    }
}

fn sample_record(record: Option<&Record>, strip: &[&str]) -> (Value, Value) {
    match record {
        None => (Value::List(Vec::new()), Value::Null),
        Some(rec) => {
            let filtered: Record = rec
                .iter()
                .filter(|(k, _)| !strip.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            let properties = Value::List(
                filtered
                    .keys()
                    .map(|k| Value::String(k.clone()))
                    .collect(),
            );
            let sample = if filtered.is_empty() {
                Value::Null
            } else {
                Value::Map(filtered)
            };
            (properties, sample)
        }
    }
}

/// The `schema()` generator: yields the catalog's schema entries through
/// CALL.
pub struct SchemaFunction;

impl GeneratorFunction for SchemaFunction {
    fn generate(&self, ctx: &ExecCtx, _args: &[Value]) -> Result<Vec<Value>> {
        ctx.db.schema(ctx)
    }
}
