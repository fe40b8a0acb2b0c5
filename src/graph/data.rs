//! Record stores for virtual nodes and relationships.
//!
//! A store keeps the materialised record list of one label or relationship
//! type together with positional indexes over its identity columns
//! (`id` for nodes, `left_id`/`right_id` for relationships). Index keys are
//! the canonical JSON form of the column value, so integer and string ids
//! coexist.

use std::collections::HashMap;
use std::rc::Rc;

use crate::value::{Record, Value};

fn build_index(records: &[Record], column: &str) -> HashMap<String, Vec<usize>> {
    let mut index: HashMap<String, Vec<usize>> = HashMap::new();
    for (position, record) in records.iter().enumerate() {
        if let Some(value) = record.get(column) {
            index.entry(value.canonical()).or_default().push(position);
        }
    }
    index
}

/// Materialised records of a node label, indexed by `id`.
pub struct NodeData {
    records: Rc<Vec<Record>>,
    by_id: HashMap<String, Vec<usize>>,
}

impl NodeData {
    pub fn new(records: Rc<Vec<Record>>) -> Self {
        let by_id = build_index(&records, "id");
        NodeData { records, by_id }
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Positions of records whose `id` equals the given value, in record
    /// order.
    pub fn find(&self, id: &Value) -> &[usize] {
        self.by_id
            .get(&id.canonical())
            .map_or(&[], Vec::as_slice)
    }
}

/// Materialised records of a relationship type, indexed by both endpoint
/// columns.
pub struct RelationshipData {
    records: Rc<Vec<Record>>,
    by_left: HashMap<String, Vec<usize>>,
    by_right: HashMap<String, Vec<usize>>,
}

impl RelationshipData {
    pub fn new(records: Rc<Vec<Record>>) -> Self {
        let by_left = build_index(&records, "left_id");
        let by_right = build_index(&records, "right_id");
        RelationshipData {
            records,
            by_left,
            by_right,
        }
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Positions whose `left_id` matches, in record order.
    pub fn find_by_left(&self, id: &Value) -> &[usize] {
        self.by_left
            .get(&id.canonical())
            .map_or(&[], Vec::as_slice)
    }

    /// Positions whose `right_id` matches, in record order.
    pub fn find_by_right(&self, id: &Value) -> &[usize] {
        self.by_right
            .get(&id.canonical())
            .map_or(&[], Vec::as_slice)
    }

    /// Property columns of a record (everything but the endpoint ids).
    pub fn properties(record: &Record) -> Record {
        record
            .iter()
            .filter(|(k, _)| !matches!(k.as_str(), "left_id" | "right_id" | "_type"))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
