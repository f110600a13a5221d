//! Abstract values and three-valued truth

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::resource::ResourceHandle;

/// Kleene truth value. `Unknown` means the abstract state cannot decide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Truth {
    True,
    False,
    Unknown,
}

impl Truth {
    pub fn from_bool(b: bool) -> Self {
        if b { Truth::True } else { Truth::False }
    }

    pub fn and(self, other: Truth) -> Truth {
        match (self, other) {
            (Truth::False, _) | (_, Truth::False) => Truth::False,
            (Truth::True, Truth::True) => Truth::True,
            _ => Truth::Unknown,
        }
    }

    pub fn or(self, other: Truth) -> Truth {
        match (self, other) {
            (Truth::True, _) | (_, Truth::True) => Truth::True,
            (Truth::False, Truth::False) => Truth::False,
            _ => Truth::Unknown,
        }
    }

    pub fn not(self) -> Truth {
        match self {
            Truth::True => Truth::False,
            Truth::False => Truth::True,
            Truth::Unknown => Truth::Unknown,
        }
    }

    pub fn implies(self, other: Truth) -> Truth {
        self.not().or(other)
    }

    /// `Some(b)` when decided
    pub fn as_bool(self) -> Option<bool> {
        match self {
            Truth::True => Some(true),
            Truth::False => Some(false),
            Truth::Unknown => None,
        }
    }

    /// True or unknown: the branch cannot be ruled out
    pub fn may_hold(self) -> bool {
        self != Truth::False
    }
}

impl fmt::Display for Truth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Truth::True => write!(f, "true"),
            Truth::False => write!(f, "false"),
            Truth::Unknown => write!(f, "unknown"),
        }
    }
}

/// Value of a term in a pre- or post-state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    /// Abstract resource instance
    Handle(ResourceHandle),
    /// Address of a named variable (`&_errno`)
    Ref(String),
    /// Contents of a buffer, e.g. the bytes of a string
    Array(Vec<Value>),
    /// Struct fields
    Struct(BTreeMap<String, Value>),
    /// Not decidable by this core
    Unknown,
}

impl Value {
    /// Bytes of a C string, terminating zero included
    pub fn c_string(text: &str) -> Self {
        let mut bytes: Vec<Value> = text.bytes().map(|b| Value::Int(i64::from(b))).collect();
        bytes.push(Value::Int(0));
        Value::Array(bytes)
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Value::Unknown)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x),
            Value::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_handle(&self) -> Option<&ResourceHandle> {
        match self {
            Value::Handle(h) => Some(h),
            _ => None,
        }
    }

    /// Truth of a value used as a formula
    pub fn truth(&self) -> Truth {
        match self {
            Value::Bool(b) => Truth::from_bool(*b),
            Value::Int(n) => Truth::from_bool(*n != 0),
            _ => Truth::Unknown,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Handle(_) => "handle",
            Value::Ref(_) => "ref",
            Value::Array(_) => "array",
            Value::Struct(_) => "struct",
            Value::Unknown => "unknown",
        }
    }
}

impl From<Truth> for Value {
    fn from(t: Truth) -> Self {
        match t {
            Truth::True => Value::Bool(true),
            Truth::False => Value::Bool(false),
            Truth::Unknown => Value::Unknown,
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<ResourceHandle> for Value {
    fn from(h: ResourceHandle) -> Self {
        Value::Handle(h)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x:?}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Handle(h) => write!(f, "{h}"),
            Value::Ref(name) => write!(f, "&{name}"),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            Value::Struct(fields) => {
                write!(f, "{{ ")?;
                for (i, (k, v)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, " }}")
            }
            Value::Unknown => write!(f, "?"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Truth; 3] = [Truth::True, Truth::False, Truth::Unknown];

    #[test]
    fn test_kleene_tables() {
        assert_eq!(Truth::Unknown.and(Truth::False), Truth::False);
        assert_eq!(Truth::Unknown.and(Truth::True), Truth::Unknown);
        assert_eq!(Truth::Unknown.or(Truth::True), Truth::True);
        assert_eq!(Truth::Unknown.or(Truth::False), Truth::Unknown);
        assert_eq!(Truth::False.implies(Truth::Unknown), Truth::True);
        assert_eq!(Truth::Unknown.not(), Truth::Unknown);
    }

    #[test]
    fn test_de_morgan() {
        for a in ALL {
            for b in ALL {
                assert_eq!(a.and(b).not(), a.not().or(b.not()));
            }
        }
    }

    #[test]
    fn test_c_string_is_zero_terminated() {
        let s = Value::c_string("ab");
        assert_eq!(s, Value::Array(vec![Value::Int(97), Value::Int(98), Value::Int(0)]));
    }

    #[test]
    fn test_value_truth() {
        assert_eq!(Value::Int(0).truth(), Truth::False);
        assert_eq!(Value::Bool(true).truth(), Truth::True);
        assert_eq!(Value::Unknown.truth(), Truth::Unknown);
        assert!(Truth::Unknown.may_hold());
        assert!(!Truth::False.may_hold());
    }
}
