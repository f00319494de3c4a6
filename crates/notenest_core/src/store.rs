//! crates/notenest_core/src/store.rs
//!
//! The document, query and write-batch model shared by every `DocumentStore`
//! implementation. Documents are schemaless JSON objects addressed by
//! (collection, id) and carry a version that moves forward on every write.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Number, Value};

use crate::ports::{PortError, PortResult};

/// Collection names used by the core.
pub mod collections {
    pub const USER_PROFILES: &str = "userProfiles";
    pub const USER_STATS: &str = "userStats";
    pub const USER_COUNTERS: &str = "userCounters";
    pub const NOTES: &str = "notes";
    pub const REVIEWS: &str = "reviews";
    pub const REPORTS: &str = "reports";
    pub const ACTIVITY_LOG: &str = "userActivityLog";
    pub const AUTH_SESSIONS: &str = "authSessions";
}

pub type Fields = Map<String, Value>;

//=========================================================================================
// Documents
//=========================================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub version: u64,
    pub fields: Fields,
}

impl Document {
    /// Deserializes the document into a typed record. The document id is exposed
    /// to the record as the `id` field.
    pub fn decode<T: DeserializeOwned>(&self) -> PortResult<T> {
        let mut fields = self.fields.clone();
        fields.insert("id".to_string(), Value::String(self.id.clone()));
        serde_json::from_value(Value::Object(fields)).map_err(|e| {
            PortError::Unexpected(format!("Malformed document {}: {}", self.id, e))
        })
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}

/// Serializes a typed record into document fields. The `id` field is dropped because
/// it lives in the document key.
pub fn encode<T: Serialize>(value: &T) -> PortResult<Fields> {
    match serde_json::to_value(value) {
        Ok(Value::Object(mut fields)) => {
            fields.remove("id");
            Ok(fields)
        }
        Ok(other) => Err(PortError::Unexpected(format!(
            "Expected a JSON object, got {}",
            other
        ))),
        Err(e) => Err(PortError::Unexpected(e.to_string())),
    }
}

//=========================================================================================
// Queries
//=========================================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    In(String, Vec<Value>),
    Gte(String, Value),
    Lt(String, Value),
}

impl Filter {
    pub fn field(&self) -> &str {
        match self {
            Filter::Eq(field, _)
            | Filter::In(field, _)
            | Filter::Gte(field, _)
            | Filter::Lt(field, _) => field,
        }
    }

    pub fn matches(&self, fields: &Fields) -> bool {
        let value = fields.get(self.field()).unwrap_or(&Value::Null);
        match self {
            Filter::Eq(_, target) => value == target,
            Filter::In(_, targets) => targets.contains(value),
            Filter::Gte(_, target) => {
                matches!(compare_values(value, target), Some(Ordering::Greater | Ordering::Equal))
            }
            Filter::Lt(_, target) => matches!(compare_values(value, target), Some(Ordering::Less)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// A query over a single collection: conjunctive filters, an optional ordering and an
/// optional limit.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq(field.into(), value.into()));
        self
    }

    pub fn is_in(mut self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.filters.push(Filter::In(field.into(), values));
        self
    }

    pub fn gte(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Gte(field.into(), value.into()));
        self
    }

    pub fn lt(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Lt(field.into(), value.into()));
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, fields: &Fields) -> bool {
        self.filters.iter().all(|f| f.matches(fields))
    }

    /// Sorts documents by the query's ordering. Documents missing the field sort first
    /// in ascending order.
    pub fn sort(&self, documents: &mut [Document]) {
        if let Some(order) = &self.order_by {
            documents.sort_by(|a, b| {
                let cmp = match (a.get(&order.field), b.get(&order.field)) {
                    (Some(av), Some(bv)) => compare_values(av, bv).unwrap_or(Ordering::Equal),
                    (Some(_), None) => Ordering::Greater,
                    (None, Some(_)) => Ordering::Less,
                    (None, None) => Ordering::Equal,
                };
                match order.direction {
                    Direction::Asc => cmp,
                    Direction::Desc => cmp.reverse(),
                }
            });
        }
    }

    /// The largest `in` filter carried by this query.
    pub fn max_in_len(&self) -> usize {
        self.filters
            .iter()
            .map(|f| match f {
                Filter::In(_, values) => values.len(),
                _ => 0,
            })
            .max()
            .unwrap_or(0)
    }
}

/// Compares two JSON scalars of the same kind.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(an), Value::Number(bn)) => an.as_f64()?.partial_cmp(&bn.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

//=========================================================================================
// Partial Updates
//=========================================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    Set(Value),
    /// Adds to the current numeric value; a missing field counts as zero.
    Increment(i64),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    updates: BTreeMap<String, FieldUpdate>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.updates
            .insert(field.into(), FieldUpdate::Set(value.into()));
        self
    }

    pub fn increment(mut self, field: impl Into<String>, delta: i64) -> Self {
        self.updates
            .insert(field.into(), FieldUpdate::Increment(delta));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldUpdate)> {
        self.updates.iter()
    }

    pub fn apply(&self, fields: &mut Fields) {
        for (field, update) in &self.updates {
            let next = match update {
                FieldUpdate::Set(value) => value.clone(),
                FieldUpdate::Increment(delta) => increment_value(fields.get(field), *delta),
            };
            fields.insert(field.clone(), next);
        }
    }
}

fn increment_value(current: Option<&Value>, delta: i64) -> Value {
    match current {
        Some(Value::Number(n)) => match n.as_i64() {
            Some(i) => Value::from(i.saturating_add(delta)),
            None => n
                .as_f64()
                .and_then(|f| Number::from_f64(f + delta as f64))
                .map(Value::Number)
                .unwrap_or_else(|| Value::from(delta)),
        },
        _ => Value::from(delta),
    }
}

//=========================================================================================
// Atomic Write Batches
//=========================================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Fails the whole batch with `Conflict` if the document already exists.
    Create {
        collection: String,
        id: String,
        fields: Fields,
    },
    Set {
        collection: String,
        id: String,
        fields: Fields,
    },
    /// Fails the whole batch with `NotFound` if the document is missing, or with
    /// `Conflict` if `expected_version` is given and does not match.
    Update {
        collection: String,
        id: String,
        patch: Patch,
        expected_version: Option<u64>,
    },
    /// With `expected_version`, fails with `NotFound` if the document is missing and
    /// with `Conflict` if it has moved on. Without one, deleting a missing document
    /// is a no-op.
    Delete {
        collection: String,
        id: String,
        expected_version: Option<u64>,
    },
}

impl WriteOp {
    pub fn collection(&self) -> &str {
        match self {
            WriteOp::Create { collection, .. }
            | WriteOp::Set { collection, .. }
            | WriteOp::Update { collection, .. }
            | WriteOp::Delete { collection, .. } => collection,
        }
    }
}

/// A set of writes committed all-or-nothing by `DocumentStore::commit`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, collection: &str, id: &str, fields: Fields) -> &mut Self {
        self.ops.push(WriteOp::Create {
            collection: collection.to_string(),
            id: id.to_string(),
            fields,
        });
        self
    }

    pub fn set(&mut self, collection: &str, id: &str, fields: Fields) -> &mut Self {
        self.ops.push(WriteOp::Set {
            collection: collection.to_string(),
            id: id.to_string(),
            fields,
        });
        self
    }

    pub fn update(&mut self, collection: &str, id: &str, patch: Patch) -> &mut Self {
        self.ops.push(WriteOp::Update {
            collection: collection.to_string(),
            id: id.to_string(),
            patch,
            expected_version: None,
        });
        self
    }

    pub fn update_if_version(
        &mut self,
        collection: &str,
        id: &str,
        patch: Patch,
        version: u64,
    ) -> &mut Self {
        self.ops.push(WriteOp::Update {
            collection: collection.to_string(),
            id: id.to_string(),
            patch,
            expected_version: Some(version),
        });
        self
    }

    pub fn delete(&mut self, collection: &str, id: &str) -> &mut Self {
        self.ops.push(WriteOp::Delete {
            collection: collection.to_string(),
            id: id.to_string(),
            expected_version: None,
        });
        self
    }

    pub fn delete_if_version(&mut self, collection: &str, id: &str, version: u64) -> &mut Self {
        self.ops.push(WriteOp::Delete {
            collection: collection.to_string(),
            id: id.to_string(),
            expected_version: Some(version),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}
