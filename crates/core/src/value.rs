use serde::{Deserialize, Serialize};

use crate::id::UniqueId;
use crate::message::Message;

/// The closed union of types a message field can hold. User-registered types
/// ride through `Opaque` under an application-chosen type tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Str(String),
    Id(UniqueId),
    Msg(Box<Message>),
    Array(Vec<Value>),
    Opaque { tag: String, bytes: Vec<u8> },
}

/// Type tag mirroring [`Value`], used by schemas to declare field types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Str,
    Id,
    /// A nested message of the named schema.
    Msg(String),
    Array(Box<ValueKind>),
    /// A user-registered type identified by its tag.
    Opaque(String),
}

impl Value {
    /// Check this value against a declared type tag. Arrays match when every
    /// element matches the element kind; nested messages match on schema name.
    pub fn matches_kind(&self, kind: &ValueKind) -> bool {
        match (self, kind) {
            (Value::Bool(_), ValueKind::Bool) => true,
            (Value::I8(_), ValueKind::I8) => true,
            (Value::I16(_), ValueKind::I16) => true,
            (Value::I32(_), ValueKind::I32) => true,
            (Value::I64(_), ValueKind::I64) => true,
            (Value::U8(_), ValueKind::U8) => true,
            (Value::U16(_), ValueKind::U16) => true,
            (Value::U32(_), ValueKind::U32) => true,
            (Value::U64(_), ValueKind::U64) => true,
            (Value::F32(_), ValueKind::F32) => true,
            (Value::F64(_), ValueKind::F64) => true,
            (Value::Str(_), ValueKind::Str) => true,
            (Value::Id(_), ValueKind::Id) => true,
            (Value::Msg(msg), ValueKind::Msg(schema)) => msg.schema() == schema,
            (Value::Array(items), ValueKind::Array(inner)) => {
                items.iter().all(|item| item.matches_kind(inner))
            }
            (Value::Opaque { tag, .. }, ValueKind::Opaque(expected)) => tag == expected,
            _ => false,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Widen any integer variant to i64. U64 values above `i64::MAX` do not
    /// widen.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I8(v) => Some(*v as i64),
            Value::I16(v) => Some(*v as i64),
            Value::I32(v) => Some(*v as i64),
            Value::I64(v) => Some(*v),
            Value::U8(v) => Some(*v as i64),
            Value::U16(v) => Some(*v as i64),
            Value::U32(v) => Some(*v as i64),
            Value::U64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Widen any numeric variant to f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F32(v) => Some(*v as f64),
            Value::F64(v) => Some(*v),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_id(&self) -> Option<UniqueId> {
        match self {
            Value::Id(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_msg(&self) -> Option<&Message> {
        match self {
            Value::Msg(msg) => Some(msg),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Truthiness used by belief queries: false/zero/empty are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Str(s) => !s.is_empty(),
            Value::Id(id) => id.valid(),
            Value::Msg(_) => true,
            Value::Array(items) => !items.is_empty(),
            Value::Opaque { bytes, .. } => !bytes.is_empty(),
            other => other.as_f64().map(|v| v != 0.0).unwrap_or(false),
        }
    }
}

impl ValueKind {
    /// The value a field of this kind takes when a schema instantiates a
    /// message without an explicit default.
    pub fn default_value(&self) -> Value {
        match self {
            ValueKind::Bool => Value::Bool(false),
            ValueKind::I8 => Value::I8(0),
            ValueKind::I16 => Value::I16(0),
            ValueKind::I32 => Value::I32(0),
            ValueKind::I64 => Value::I64(0),
            ValueKind::U8 => Value::U8(0),
            ValueKind::U16 => Value::U16(0),
            ValueKind::U32 => Value::U32(0),
            ValueKind::U64 => Value::U64(0),
            ValueKind::F32 => Value::F32(0.0),
            ValueKind::F64 => Value::F64(0.0),
            ValueKind::Str => Value::Str(String::new()),
            ValueKind::Id => Value::Id(UniqueId::NIL),
            ValueKind::Msg(schema) => Value::Msg(Box::new(Message::new(schema.clone()))),
            ValueKind::Array(_) => Value::Array(Vec::new()),
            ValueKind::Opaque(tag) => Value::Opaque {
                tag: tag.clone(),
                bytes: Vec::new(),
            },
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::U64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<UniqueId> for Value {
    fn from(v: UniqueId) -> Self {
        Value::Id(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matching() {
        assert!(Value::I32(3).matches_kind(&ValueKind::I32));
        assert!(!Value::I32(3).matches_kind(&ValueKind::I64));
        assert!(Value::Array(vec![Value::Bool(true)])
            .matches_kind(&ValueKind::Array(Box::new(ValueKind::Bool))));
        assert!(!Value::Array(vec![Value::Bool(true), Value::I8(1)])
            .matches_kind(&ValueKind::Array(Box::new(ValueKind::Bool))));
    }

    #[test]
    fn test_numeric_widening() {
        assert_eq!(Value::U8(200).as_i64(), Some(200));
        assert_eq!(Value::U64(u64::MAX).as_i64(), None);
        assert_eq!(Value::I16(-4).as_f64(), Some(-4.0));
    }

    #[test]
    fn test_truthiness() {
        assert!(Value::Str("x".into()).is_truthy());
        assert!(!Value::Str(String::new()).is_truthy());
        assert!(!Value::F64(0.0).is_truthy());
        assert!(Value::I8(-1).is_truthy());
        assert!(!Value::Id(UniqueId::NIL).is_truthy());
    }

    #[test]
    fn test_defaults_match_their_kind() {
        let kinds = [
            ValueKind::Bool,
            ValueKind::I64,
            ValueKind::F32,
            ValueKind::Str,
            ValueKind::Id,
            ValueKind::Array(Box::new(ValueKind::U8)),
            ValueKind::Opaque("blob".into()),
        ];
        for kind in kinds {
            assert!(kind.default_value().matches_kind(&kind), "{kind:?}");
        }
    }
}
