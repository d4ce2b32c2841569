use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::value::{Value, ValueKind};

/// A named record of field values. Messages are plain values; they are copied
/// into events and belief contexts rather than shared.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    schema: String,
    fields: BTreeMap<String, Value>,
}

impl Message {
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn get_bool(&self, field: &str) -> Option<bool> {
        self.get(field).and_then(Value::as_bool)
    }

    pub fn get_i64(&self, field: &str) -> Option<i64> {
        self.get(field).and_then(Value::as_i64)
    }

    pub fn get_f64(&self, field: &str) -> Option<f64> {
        self.get(field).and_then(Value::as_f64)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// One field declaration in a schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    pub kind: ValueKind,
    pub default: Option<Value>,
}

/// A named message layout. Schemas build default messages and validate
/// incoming ones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    name: String,
    fields: Vec<SchemaField>,
}

impl Schema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[SchemaField] {
        &self.fields
    }

    pub fn field(mut self, name: impl Into<String>, kind: ValueKind) -> Self {
        self.fields.push(SchemaField {
            name: name.into(),
            kind,
            default: None,
        });
        self
    }

    pub fn field_with_default(
        mut self,
        name: impl Into<String>,
        kind: ValueKind,
        default: impl Into<Value>,
    ) -> Self {
        self.fields.push(SchemaField {
            name: name.into(),
            kind,
            default: Some(default.into()),
        });
        self
    }

    /// Reject duplicate field names and defaults that contradict their
    /// declared kind. Run once when the schema is committed to a registry.
    pub fn check(&self) -> Result<()> {
        for (index, field) in self.fields.iter().enumerate() {
            if self.fields[..index].iter().any(|f| f.name == field.name) {
                return Err(CoreError::DuplicateField {
                    schema: self.name.clone(),
                    field: field.name.clone(),
                });
            }
            if let Some(default) = &field.default {
                if !default.matches_kind(&field.kind) {
                    return Err(CoreError::DefaultType {
                        schema: self.name.clone(),
                        field: field.name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Build a message with every declared field set to its default.
    pub fn instantiate(&self) -> Message {
        let mut msg = Message::new(self.name.clone());
        for field in &self.fields {
            let value = field
                .default
                .clone()
                .unwrap_or_else(|| field.kind.default_value());
            msg.set(field.name.clone(), value);
        }
        msg
    }

    /// A message is valid against this schema iff the schema name matches and
    /// every declared field is present with a matching type tag. Fields not
    /// listed in the schema are permitted.
    pub fn verify(&self, msg: &Message) -> Result<()> {
        if msg.schema() != self.name {
            return Err(CoreError::SchemaMismatch {
                expected: self.name.clone(),
                found: msg.schema().to_string(),
            });
        }
        for field in &self.fields {
            match msg.get(&field.name) {
                None => {
                    return Err(CoreError::MissingField {
                        schema: self.name.clone(),
                        field: field.name.clone(),
                    })
                }
                Some(value) if !value.matches_kind(&field.kind) => {
                    return Err(CoreError::FieldType {
                        schema: self.name.clone(),
                        field: field.name.clone(),
                    })
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell_schema() -> Schema {
        Schema::new("CellInfo")
            .field("index", ValueKind::I32)
            .field_with_default("alive", ValueKind::Bool, false)
            .field("population", ValueKind::I32)
    }

    #[test]
    fn test_instantiate_uses_defaults() {
        let msg = cell_schema().instantiate();
        assert_eq!(msg.schema(), "CellInfo");
        assert_eq!(msg.get_bool("alive"), Some(false));
        assert_eq!(msg.get_i64("index"), Some(0));
    }

    #[test]
    fn test_verify_accepts_instantiated() {
        let schema = cell_schema();
        assert!(schema.verify(&schema.instantiate()).is_ok());
    }

    #[test]
    fn test_verify_rejects_wrong_schema_name() {
        let schema = cell_schema();
        let msg = Message::new("Other");
        assert!(matches!(
            schema.verify(&msg),
            Err(CoreError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_verify_rejects_missing_field() {
        let schema = cell_schema();
        let msg = Message::new("CellInfo").with("index", 1i32);
        assert!(matches!(
            schema.verify(&msg),
            Err(CoreError::MissingField { .. })
        ));
    }

    #[test]
    fn test_verify_rejects_wrong_kind() {
        let schema = cell_schema();
        let mut msg = schema.instantiate();
        msg.set("alive", 1i64);
        assert!(matches!(
            schema.verify(&msg),
            Err(CoreError::FieldType { .. })
        ));
    }

    #[test]
    fn test_extra_fields_are_permitted() {
        let schema = cell_schema();
        let msg = schema.instantiate().with("note", "spare");
        assert!(schema.verify(&msg).is_ok());
    }

    #[test]
    fn test_check_rejects_duplicate_field() {
        let schema = Schema::new("Dup")
            .field("x", ValueKind::Bool)
            .field("x", ValueKind::I32);
        assert!(matches!(
            schema.check(),
            Err(CoreError::DuplicateField { .. })
        ));
    }

    #[test]
    fn test_check_rejects_mismatched_default() {
        let schema = Schema::new("Bad").field_with_default("x", ValueKind::Bool, 3i32);
        assert!(matches!(schema.check(), Err(CoreError::DefaultType { .. })));
    }

    #[test]
    fn test_nested_message_field() {
        let schema = Schema::new("Outer").field("inner", ValueKind::Msg("Inner".into()));
        let mut msg = schema.instantiate();
        assert!(schema.verify(&msg).is_ok());
        msg.set("inner", Value::Msg(Box::new(Message::new("Wrong"))));
        assert!(schema.verify(&msg).is_err());
    }
}
