use serde_json::{Map, Value};
use sqlx::{postgres::PgRow, Row};
use std::collections::HashMap;

use crate::database::metadata::{EntityMetadata, FieldKind};
use crate::database::query_builder::JoinPlan;

/// Read the `to_jsonb(alias)` column of every plan node from one result row.
pub fn decode_row(row: &PgRow, plan: &JoinPlan) -> Result<Vec<Option<Value>>, sqlx::Error> {
    plan.nodes.iter().map(|node| row.try_get::<Option<Value>, _>(node.alias.as_str())).collect()
}

/// Shape a stored row for serialization: search vectors are dropped and
/// comma-joined simple arrays become JSON arrays.
pub fn normalize_row(metadata: &EntityMetadata, object: &mut Map<String, Value>) {
    for field in metadata.fields() {
        match field.kind {
            FieldKind::FullText => {
                object.remove(field.column);
            }
            FieldKind::SimpleArray => {
                if let Some(value) = object.get_mut(field.column) {
                    *value = split_simple_array(value);
                }
            }
            _ => {}
        }
    }
}

fn split_simple_array(value: &Value) -> Value {
    match value {
        Value::String(joined) => Value::Array(
            joined.split(',').filter(|part| !part.is_empty()).map(|part| Value::String(part.to_string())).collect(),
        ),
        Value::Null => Value::Array(vec![]),
        other => other.clone(),
    }
}

struct Node {
    plan_index: usize,
    fields: Map<String, Value>,
    children: Vec<Vec<usize>>,
}

/// Folds flat joined rows back into one nested document per root.
///
/// Rows are grouped by root primary key; each joined alias is attached under its
/// relation key, as an array for to-many relations (empty when nothing matched)
/// and as an object or `null` otherwise. First-seen order is preserved.
pub struct Hydrator<'p> {
    plan: &'p JoinPlan,
    child_slots: Vec<Vec<usize>>,
    nodes: Vec<Node>,
    roots: Vec<usize>,
    seen: HashMap<(Option<usize>, usize, String), usize>,
}

impl<'p> Hydrator<'p> {
    pub fn new(plan: &'p JoinPlan) -> Self {
        let mut child_slots = vec![vec![]; plan.nodes.len()];
        for (index, node) in plan.nodes.iter().enumerate() {
            if let Some(parent) = node.parent {
                child_slots[parent].push(index);
            }
        }
        Self { plan, child_slots, nodes: vec![], roots: vec![], seen: HashMap::new() }
    }

    pub fn push_row(&mut self, row: Vec<Option<Value>>) {
        let mut instances: Vec<Option<usize>> = vec![None; self.plan.nodes.len()];

        for (plan_index, value) in row.into_iter().enumerate().take(self.plan.nodes.len()) {
            let Some(Value::Object(mut object)) = value else { continue };
            let plan_node = &self.plan.nodes[plan_index];
            let parent_instance = match plan_node.parent {
                None => None,
                Some(parent) => match instances[parent] {
                    Some(instance) => Some(instance),
                    None => continue,
                },
            };
            let Some(identity) = identity(&object, plan_node.metadata.primary_key()) else { continue };

            let key = (parent_instance, plan_index, identity);
            let instance = match self.seen.get(&key) {
                Some(&existing) => existing,
                None => {
                    normalize_row(&plan_node.metadata, &mut object);
                    let created = self.nodes.len();
                    self.nodes.push(Node { plan_index, fields: object, children: vec![vec![]; self.plan.nodes.len()] });
                    match parent_instance {
                        Some(parent) => self.nodes[parent].children[plan_index].push(created),
                        None => self.roots.push(created),
                    }
                    self.seen.insert(key, created);
                    created
                }
            };
            instances[plan_index] = Some(instance);
        }
    }

    pub fn finish(self) -> Vec<Value> {
        self.roots.iter().map(|&root| self.materialize(root)).collect()
    }

    fn materialize(&self, instance: usize) -> Value {
        let node = &self.nodes[instance];
        let mut object = node.fields.clone();
        for &slot in &self.child_slots[node.plan_index] {
            let plan_node = &self.plan.nodes[slot];
            let mut items: Vec<Value> = node.children[slot].iter().map(|&child| self.materialize(child)).collect();
            let value = if plan_node.many {
                Value::Array(items)
            } else if items.is_empty() {
                Value::Null
            } else {
                items.swap_remove(0)
            };
            object.insert(plan_node.key.clone(), value);
        }
        Value::Object(object)
    }
}

/// Primary key values joined into a grouping key; `None` for a null-extended row.
fn identity(object: &Map<String, Value>, primary_key: &[&str]) -> Option<String> {
    let parts: Vec<String> = primary_key
        .iter()
        .map(|column| match object.get(*column) {
            Some(Value::Null) | None => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        })
        .collect::<Option<_>>()?;
    Some(parts.join("\u{1f}"))
}

/// Hydrate every row of a joined result.
pub fn hydrate_rows(plan: &JoinPlan, rows: Vec<Vec<Option<Value>>>) -> Vec<Value> {
    let mut hydrator = Hydrator::new(plan);
    for row in rows {
        hydrator.push_row(row);
    }
    hydrator.finish()
}
