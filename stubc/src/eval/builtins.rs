//! Builtin functions available to every stub file

use super::state::AbstractState;
use super::value::{Truth, Value};

/// Builtin function of the contract language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    /// `size(p)`: number of cells of the block `p` points into
    Size,
    ValidPtr,
    /// `valid_ptr_range(p, lo, hi)`: cells `lo..=hi` of `p` are accessible
    ValidPtrRange,
    /// `valid_string(s)`: `s` holds a zero-terminated string
    ValidString,
    FloatValid,
    FloatInf,
    FloatNan,
    /// `alive_resource(h, Kind)`: same as `h in Kind`
    AliveResource,
    /// `resource_id(h)`: integer projection of a handle
    ResourceId,
}

impl Builtin {
    pub const ALL: [Builtin; 9] = [
        Builtin::Size,
        Builtin::ValidPtr,
        Builtin::ValidPtrRange,
        Builtin::ValidString,
        Builtin::FloatValid,
        Builtin::FloatInf,
        Builtin::FloatNan,
        Builtin::AliveResource,
        Builtin::ResourceId,
    ];

    pub fn from_name(name: &str) -> Option<Builtin> {
        Self::ALL.into_iter().find(|b| b.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Size => "size",
            Builtin::ValidPtr => "valid_ptr",
            Builtin::ValidPtrRange => "valid_ptr_range",
            Builtin::ValidString => "valid_string",
            Builtin::FloatValid => "float_valid",
            Builtin::FloatInf => "float_inf",
            Builtin::FloatNan => "float_nan",
            Builtin::AliveResource => "alive_resource",
            Builtin::ResourceId => "resource_id",
        }
    }

    pub fn arity(self) -> usize {
        match self {
            Builtin::ValidPtrRange => 3,
            Builtin::AliveResource => 2,
            _ => 1,
        }
    }

    /// The last argument is a resource kind name, not a term
    pub fn takes_kind(self) -> bool {
        self == Builtin::AliveResource
    }
}

/// Apply a builtin to evaluated arguments.
/// Anything this core cannot decide is delegated to the state.
pub fn apply(builtin: Builtin, args: &[Value], state: &dyn AbstractState) -> Value {
    let decided = match (builtin, args) {
        (Builtin::Size, [Value::Array(items)]) => Some(Value::Int(items.len() as i64)),
        (Builtin::ValidPtr, [Value::Array(_) | Value::Ref(_) | Value::Struct(_)]) => {
            Some(Value::Bool(true))
        }
        (Builtin::ValidPtr, [Value::Int(0)]) => Some(Value::Bool(false)),
        (Builtin::ValidPtrRange, [Value::Array(items), Value::Int(lo), Value::Int(hi)]) => {
            let ok = lo > hi || (*lo >= 0 && (*hi as i128) < items.len() as i128);
            Some(Value::Bool(ok))
        }
        (Builtin::ValidString, [Value::Array(items)]) => string_terminated(items).as_bool().map(Value::Bool),
        (Builtin::FloatValid, [Value::Float(x)]) => Some(Value::Bool(x.is_finite())),
        (Builtin::FloatInf, [Value::Float(x)]) => Some(Value::Bool(x.is_infinite())),
        (Builtin::FloatNan, [Value::Float(x)]) => Some(Value::Bool(x.is_nan())),
        (Builtin::FloatValid, [Value::Int(_)]) => Some(Value::Bool(true)),
        (Builtin::FloatInf | Builtin::FloatNan, [Value::Int(_)]) => Some(Value::Bool(false)),
        (Builtin::ResourceId, [Value::Handle(h)]) => Some(Value::Int(h.as_int())),
        _ => None,
    };
    decided.unwrap_or_else(|| state.call(builtin.name(), args))
}

/// A zero before any unknown cell proves termination
fn string_terminated(items: &[Value]) -> Truth {
    for item in items {
        match item {
            Value::Int(0) => return Truth::True,
            Value::Int(_) => {}
            _ => return Truth::Unknown,
        }
    }
    Truth::False
}
