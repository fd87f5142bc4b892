//! Records: typed projections over raw input objects
//!
//! A [`RecordSchema`] is built once per record type. It names the id extractor and an ordered
//! list of property descriptors, each a pure function of the raw object. A [`Record`] memoizes
//! every property on first access, so each body runs at most once per record instance.
//! Ingestion walks all properties in declaration order and, when the schema opts in, releases
//! the raw payload afterwards.

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::types::{RawObject, RecordId, Value};
use crate::{Error, Result};

/// Pure projection from a raw object to a property value
pub type PropertyFn = Arc<dyn Fn(&RawObject) -> Result<Value> + Send + Sync>;

fn field_extractor(field: String) -> PropertyFn {
    Arc::new(move |raw: &RawObject| match raw.get(&field) {
        Some(v) => Value::from_json(v),
        None => Ok(Value::Null),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    /// Evaluated while the record is projected
    Eager,
    /// Evaluated on first access and memoized
    Cached,
}

/// A named property of a record type
#[derive(Clone)]
pub struct PropertyDescriptor {
    name: String,
    kind: PropertyKind,
    compute: PropertyFn,
}

impl PropertyDescriptor {
    pub fn eager<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&RawObject) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            kind: PropertyKind::Eager,
            compute: Arc::new(f),
        }
    }

    pub fn cached<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&RawObject) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            kind: PropertyKind::Cached,
            compute: Arc::new(f),
        }
    }

    /// Cached copy of a raw field. A missing field projects to [`Value::Null`].
    pub fn field(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            compute: field_extractor(name.clone()),
            name,
            kind: PropertyKind::Cached,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> PropertyKind {
        self.kind
    }
}

impl fmt::Debug for PropertyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Declarative description of a record type
pub struct RecordSchema {
    name: String,
    id: PropertyFn,
    properties: Vec<PropertyDescriptor>,
    positions: HashMap<String, usize>,
    drop_raw: bool,
}

impl RecordSchema {
    pub fn builder(name: impl Into<String>) -> RecordSchemaBuilder {
        RecordSchemaBuilder {
            name: name.into(),
            id: None,
            properties: Vec::new(),
            drop_raw: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn properties(&self) -> &[PropertyDescriptor] {
        &self.properties
    }

    pub fn drop_raw(&self) -> bool {
        self.drop_raw
    }

    fn position(&self, property: &str) -> Option<usize> {
        self.positions.get(property).copied()
    }
}

impl fmt::Debug for RecordSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordSchema")
            .field("name", &self.name)
            .field("properties", &self.properties)
            .field("drop_raw", &self.drop_raw)
            .finish()
    }
}

pub struct RecordSchemaBuilder {
    name: String,
    id: Option<PropertyFn>,
    properties: Vec<PropertyDescriptor>,
    drop_raw: bool,
}

impl RecordSchemaBuilder {
    /// Take the id from a raw field. The field must hold a string.
    pub fn id_field(mut self, field: impl Into<String>) -> Self {
        self.id = Some(field_extractor(field.into()));
        self
    }

    /// Compute the id with a user function.
    pub fn id_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&RawObject) -> Result<Value> + Send + Sync + 'static,
    {
        self.id = Some(Arc::new(f));
        self
    }

    pub fn property(mut self, descriptor: PropertyDescriptor) -> Self {
        self.properties.push(descriptor);
        self
    }

    pub fn field(self, name: impl Into<String>) -> Self {
        self.property(PropertyDescriptor::field(name))
    }

    pub fn cached<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&RawObject) -> Result<Value> + Send + Sync + 'static,
    {
        self.property(PropertyDescriptor::cached(name, f))
    }

    pub fn eager<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&RawObject) -> Result<Value> + Send + Sync + 'static,
    {
        self.property(PropertyDescriptor::eager(name, f))
    }

    /// Release the raw payload once every property has been materialized.
    pub fn drop_raw(mut self, drop_raw: bool) -> Self {
        self.drop_raw = drop_raw;
        self
    }

    pub fn build(self) -> Result<Arc<RecordSchema>> {
        let mut positions = HashMap::with_capacity(self.properties.len());
        for (idx, property) in self.properties.iter().enumerate() {
            if property.name.is_empty() {
                return Err(Error::parameter(format!(
                    "record schema {}: property names must be non-empty",
                    self.name
                )));
            }
            if positions.insert(property.name.clone(), idx).is_some() {
                return Err(Error::parameter(format!(
                    "record schema {}: duplicate property {}",
                    self.name, property.name
                )));
            }
        }

        let id = self.id.unwrap_or_else(|| field_extractor("id".to_string()));

        Ok(Arc::new(RecordSchema {
            name: self.name,
            id,
            properties: self.properties,
            positions,
            drop_raw: self.drop_raw,
        }))
    }
}

/// A projected record
pub struct Record {
    id: RecordId,
    schema: Arc<RecordSchema>,
    raw: Option<RawObject>,
    slots: Vec<OnceCell<Value>>,
}

impl Record {
    /// Project a raw object: extract and validate the id, evaluate eager properties.
    pub fn project(schema: Arc<RecordSchema>, raw: RawObject) -> Result<Self> {
        let id = match (schema.id)(&raw) {
            Ok(Value::String(id)) if !id.is_empty() => id,
            Ok(Value::String(_)) => {
                return Err(Error::projection("<unknown>", "id must be a non-empty string"))
            }
            Ok(other) => {
                return Err(Error::projection(
                    "<unknown>",
                    format!("id must be a string, got {}", other.kind()),
                ))
            }
            Err(e) => return Err(Error::projection("<unknown>", format!("id: {}", e))),
        };

        let slots = (0..schema.properties.len()).map(|_| OnceCell::new()).collect();
        let record = Self {
            id,
            schema,
            raw: Some(raw),
            slots,
        };

        for (idx, property) in record.schema.properties.iter().enumerate() {
            if property.kind == PropertyKind::Eager {
                record.slot(idx)?;
            }
        }

        Ok(record)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn schema(&self) -> &Arc<RecordSchema> {
        &self.schema
    }

    /// The raw payload, unless it has been dropped.
    pub fn raw(&self) -> Option<&RawObject> {
        self.raw.as_ref()
    }

    /// Property value, computed and memoized on first access.
    pub fn get(&self, property: &str) -> Result<&Value> {
        let idx = self.schema.position(property).ok_or_else(|| {
            Error::missing(format!(
                "record type {} has no property {}",
                self.schema.name, property
            ))
        })?;
        self.slot(idx)
    }

    /// Whether the property has already been evaluated.
    pub fn is_cached(&self, property: &str) -> bool {
        self.schema
            .position(property)
            .is_some_and(|idx| self.slots[idx].get().is_some())
    }

    fn slot(&self, idx: usize) -> Result<&Value> {
        self.slots[idx].get_or_try_init(|| {
            let property = &self.schema.properties[idx];
            let raw = self.raw.as_ref().ok_or_else(|| {
                Error::projection(
                    &self.id,
                    format!("raw payload dropped; cannot compute {}", property.name),
                )
            })?;
            (property.compute)(raw).map_err(|e| match e {
                Error::Projection { .. } => e,
                other => Error::projection(&self.id, format!("{}: {}", property.name, other)),
            })
        })
    }

    /// Force every property in declaration order, then apply the drop-raw policy.
    pub fn materialize(&mut self) -> Result<()> {
        for idx in 0..self.slots.len() {
            self.slot(idx)?;
        }
        if self.schema.drop_raw {
            self.raw = None;
        }
        Ok(())
    }

    /// Serializable view holding the id, the raw payload if retained, and cached properties.
    pub fn snapshot(&self) -> RecordSnapshot {
        let properties = self
            .schema
            .properties
            .iter()
            .zip(&self.slots)
            .filter_map(|(p, slot)| slot.get().map(|v| (p.name.clone(), v.clone())))
            .collect();
        RecordSnapshot {
            id: self.id.clone(),
            raw: self.raw.clone(),
            properties,
        }
    }

    /// Rebuild a record from a snapshot. Properties the schema does not declare are rejected.
    pub fn from_snapshot(schema: Arc<RecordSchema>, snapshot: RecordSnapshot) -> Result<Self> {
        let slots: Vec<OnceCell<Value>> =
            (0..schema.properties.len()).map(|_| OnceCell::new()).collect();
        for (name, value) in snapshot.properties {
            let idx = schema.position(&name).ok_or_else(|| {
                Error::projection(
                    &snapshot.id,
                    format!("snapshot property {} not declared by {}", name, schema.name),
                )
            })?;
            let _ = slots[idx].set(value);
        }
        Ok(Self {
            id: snapshot.id,
            schema,
            raw: snapshot.raw,
            slots,
        })
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("id", &self.id)
            .field("schema", &self.schema.name)
            .field("raw_retained", &self.raw.is_some())
            .finish()
    }
}

/// Persisted form of a record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordSnapshot {
    pub id: RecordId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<RawObject>,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn raw(value: serde_json::Value) -> RawObject {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_cached_property_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let schema = RecordSchema::builder("Person")
            .cached("upper", move |raw| {
                counter.fetch_add(1, Ordering::SeqCst);
                let name = raw.get("name").and_then(|v| v.as_str()).unwrap_or_default();
                Ok(Value::String(name.to_uppercase()))
            })
            .build()
            .unwrap();

        let record = Record::project(schema, raw(json!({"id": "1", "name": "ada"}))).unwrap();
        assert!(!record.is_cached("upper"));
        assert_eq!(record.get("upper").unwrap(), &Value::from("ADA"));
        assert_eq!(record.get("upper").unwrap(), &Value::from("ADA"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_eager_property_evaluated_on_projection() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let schema = RecordSchema::builder("Person")
            .eager("constant", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Integer(7))
            })
            .build()
            .unwrap();

        let record = Record::project(schema, raw(json!({"id": "1"}))).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(record.is_cached("constant"));
    }

    #[test]
    fn test_id_must_be_non_empty_string() {
        let schema = RecordSchema::builder("Person").build().unwrap();

        let err = Record::project(schema.clone(), raw(json!({"id": 5}))).unwrap_err();
        assert!(matches!(err, Error::Projection { .. }));

        let err = Record::project(schema.clone(), raw(json!({"id": ""}))).unwrap_err();
        assert!(matches!(err, Error::Projection { .. }));

        let err = Record::project(schema, raw(json!({"name": "x"}))).unwrap_err();
        assert!(matches!(err, Error::Projection { .. }));
    }

    #[test]
    fn test_drop_raw_after_materialize() {
        let schema = RecordSchema::builder("Person")
            .field("name")
            .drop_raw(true)
            .build()
            .unwrap();

        let mut record = Record::project(schema, raw(json!({"id": "1", "name": "ada"}))).unwrap();
        record.materialize().unwrap();
        assert!(record.raw().is_none());
        assert_eq!(record.get("name").unwrap(), &Value::from("ada"));
    }

    #[test]
    fn test_drop_raw_blocks_further_computation() {
        let schema = RecordSchema::builder("Person")
            .field("name")
            .drop_raw(true)
            .build()
            .unwrap();
        let record = Record::project(schema.clone(), raw(json!({"id": "1", "name": "ada"})))
            .unwrap();

        // A snapshot taken before materialization restores without raw or cached values.
        let mut snapshot = record.snapshot();
        snapshot.raw = None;
        let restored = Record::from_snapshot(schema, snapshot).unwrap();
        assert!(matches!(
            restored.get("name").unwrap_err(),
            Error::Projection { .. }
        ));
    }

    #[test]
    fn test_property_failure_is_projection_error() {
        let schema = RecordSchema::builder("Person")
            .cached("broken", |_| Err(Error::internal("boom")))
            .build()
            .unwrap();
        let mut record = Record::project(schema, raw(json!({"id": "9"}))).unwrap();
        match record.materialize().unwrap_err() {
            Error::Projection { record, message } => {
                assert_eq!(record, "9");
                assert!(message.contains("broken"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_property_rejected() {
        let result = RecordSchema::builder("Person")
            .field("name")
            .field("name")
            .build();
        assert!(matches!(result, Err(Error::Parameter(_))));
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let schema = RecordSchema::builder("Person")
            .field("name")
            .cached("embedding", |_| Ok(Value::Vector(vec![])))
            .build()
            .unwrap();
        let mut record =
            Record::project(schema.clone(), raw(json!({"id": "1", "name": "ada"}))).unwrap();
        record.materialize().unwrap();

        let json = serde_json::to_string(&record.snapshot()).unwrap();
        let snapshot: RecordSnapshot = serde_json::from_str(&json).unwrap();
        let restored = Record::from_snapshot(schema, snapshot).unwrap();
        assert_eq!(restored.id(), "1");
        assert!(restored.is_cached("name"));
        assert_eq!(restored.get("name").unwrap(), &Value::from("ada"));
        assert_eq!(restored.get("embedding").unwrap(), &Value::Vector(vec![]));
    }
}
