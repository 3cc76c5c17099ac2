//! JSON rendering of mapped objects.
//!
//! An object becomes a JSON object holding its surrogate id (when the
//! class has one) followed by its fields by column name. A `belongs_to`
//! renders as the referenced id, a `has_one` as the nested object under
//! `<table>_<join>`, and a many-to-one collection as an array of nested
//! objects under `<table>s_<join>`. Many-to-many collections are left out.
//!
//! Relations are only rendered for objects that belong to a session;
//! reading them may run queries, so call these inside a transaction.

use crate::collection::Collection;
use crate::persist::{Action, Dbo, DboId};
use crate::ptr::{Ptr, WeakPtr};
use dbo_core::{Error, ForeignKeyConstraint, RelationType, Result, SqlValue, Value};
use serde_json::{Map, Number, Value as JsonValue};

/// Convert one column value.
fn json_value(value: &Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Bool(b) => JsonValue::Bool(*b),
        Value::SmallInt(v) => JsonValue::from(*v),
        Value::Int(v) => JsonValue::from(*v),
        Value::BigInt(v) => JsonValue::from(*v),
        Value::Float(v) => Number::from_f64(f64::from(*v)).map_or(JsonValue::Null, JsonValue::Number),
        Value::Double(v) => Number::from_f64(*v).map_or(JsonValue::Null, JsonValue::Number),
        Value::Text(s) => JsonValue::String(s.clone()),
        Value::Bytes(b) => JsonValue::Array(b.iter().map(|byte| JsonValue::from(*byte)).collect()),
        Value::Date(_) | Value::Time(_) | Value::Timestamp(_) => JsonValue::String(value.to_string()),
    }
}

fn id_value<I: DboId>(id: &I) -> JsonValue {
    json_value(&id.to_value())
}

struct JsonSerializer {
    out: Map<String, JsonValue>,
    error: Option<Error>,
}

impl JsonSerializer {
    fn new() -> Self {
        Self {
            out: Map::new(),
            error: None,
        }
    }

    fn put(&mut self, name: String, value: Result<JsonValue>) {
        match value {
            Ok(value) => {
                self.out.insert(name, value);
            }
            Err(err) => {
                self.error.get_or_insert(err);
            }
        }
    }

    fn finish(self) -> Result<JsonValue> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(JsonValue::Object(self.out)),
        }
    }
}

impl Action for JsonSerializer {
    fn act_field<T: SqlValue>(&mut self, value: &mut T, name: &str, _size: i32) {
        self.out.insert(name.to_string(), json_value(&value.to_value()));
    }

    fn act_id<T: DboId>(&mut self, value: &mut T, name: &str, _size: i32) {
        self.out.insert(name.to_string(), id_value(value));
    }

    fn act_ptr<C: Dbo>(&mut self, value: &mut Ptr<C>, name: &str, _fk: ForeignKeyConstraint) {
        let json = if value.is_null() {
            JsonValue::Null
        } else {
            id_value(&value.id())
        };
        self.out.insert(name.to_string(), json);
    }

    fn act_weak_ptr<C: Dbo>(&mut self, value: &mut WeakPtr<C>, join_name: &str) {
        let Some(session) = value.relation.session() else {
            return;
        };
        let rendered = session.table_name::<C>().and_then(|table| {
            let nested = match value.get()? {
                Some(ptr) => json_serialize(&ptr)?,
                None => JsonValue::Null,
            };
            Ok((format!("{table}_{join_name}"), nested))
        });
        match rendered {
            Ok((key, nested)) => {
                self.out.insert(key, nested);
            }
            Err(err) => {
                self.error.get_or_insert(err);
            }
        }
    }

    fn act_collection<C: Dbo>(
        &mut self,
        value: &mut Collection<Ptr<C>>,
        relation: RelationType,
        join_name: &str,
        _join_id: &str,
        _fk: ForeignKeyConstraint,
    ) {
        if relation != RelationType::ManyToOne {
            return;
        }
        let Some(session) = value.session() else {
            return;
        };
        match session.table_name::<C>() {
            Ok(table) => self.put(format!("{table}s_{join_name}"), json_serialize_collection(value)),
            Err(err) => {
                self.error.get_or_insert(err);
            }
        }
    }
}

/// Render the object `ptr` points to; a null pointer renders as `null`.
pub fn json_serialize<C: Dbo>(ptr: &Ptr<C>) -> Result<JsonValue> {
    if ptr.is_null() {
        return Ok(JsonValue::Null);
    }
    let mut serializer = JsonSerializer::new();
    if let Some(name) = C::SURROGATE_ID_FIELD {
        serializer.out.insert(name.to_string(), id_value(&ptr.id()));
    }
    ptr.with_obj_mut(|obj| obj.persist(&mut serializer))?;
    serializer.finish()
}

/// Render a value that is not held by a [`Ptr`]. It has no id, and its
/// relations are rendered only when they are bound to a session.
pub fn json_serialize_value<C: Dbo>(value: &mut C) -> Result<JsonValue> {
    let mut serializer = JsonSerializer::new();
    value.persist(&mut serializer);
    serializer.finish()
}

pub fn json_serialize_vec<C: Dbo>(ptrs: &[Ptr<C>]) -> Result<JsonValue> {
    ptrs.iter()
        .map(json_serialize)
        .collect::<Result<Vec<_>>>()
        .map(JsonValue::Array)
}

/// Render every object of `collection` as an array. A query-backed
/// collection is consumed.
pub fn json_serialize_collection<C: Dbo>(collection: &Collection<Ptr<C>>) -> Result<JsonValue> {
    let mut items = Vec::new();
    for ptr in collection.iter()? {
        items.push(json_serialize(&ptr?)?);
    }
    Ok(JsonValue::Array(items))
}
