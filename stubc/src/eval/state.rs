//! Interface to the host's abstract state

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::value::{Truth, Value};
use crate::resource::{HandleStatus, ResourceError, ResourceEvent, ResourceHandle, ResourceTable};

/// Name under which a post-state carries the return value of the call
pub const RETURN_BINDING: &str = "return";

/// Pre- or post-call state as seen by contract formulas.
///
/// Only `lookup` and `is_member` are required. The defaults answer
/// "unknown", which the evaluator treats soundly.
pub trait AbstractState {
    /// Value of a parameter or global; `Value::Unknown` when untracked
    fn lookup(&self, name: &str) -> Value;

    /// `handle in kind`
    fn is_member(&self, handle: &ResourceHandle, kind: &str) -> Truth;

    fn handle_status(&self, _handle: &ResourceHandle) -> HandleStatus {
        HandleStatus::Untracked
    }

    /// Host function or builtin the core cannot decide on its own
    fn call(&self, _func: &str, _args: &[Value]) -> Value {
        Value::Unknown
    }

    /// Dereference a pointer value that is not a named reference
    fn load(&self, _pointer: &Value) -> Value {
        Value::Unknown
    }
}

/// Host function callable from formulas
pub type HostFn = Arc<dyn Fn(&[Value]) -> Value + Send + Sync>;

/// Concrete state: named bindings, a resource table and host functions
#[derive(Clone, Default)]
pub struct StateMap {
    bindings: HashMap<String, Value>,
    resources: ResourceTable,
    host_fns: HashMap<String, HostFn>,
}

impl StateMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resources(resources: ResourceTable) -> Self {
        Self {
            resources,
            ..Self::default()
        }
    }

    /// Builder form of [`StateMap::set`]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn with_return(self, value: impl Into<Value>) -> Self {
        self.with(RETURN_BINDING, value)
    }

    pub fn with_host_fn<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        self.host_fns.insert(name.into(), Arc::new(f));
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.bindings.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    pub fn resources(&self) -> &ResourceTable {
        &self.resources
    }

    pub fn resources_mut(&mut self) -> &mut ResourceTable {
        &mut self.resources
    }

    /// Replay the resource events of a chosen branch
    pub fn apply<'a>(
        &mut self,
        events: impl IntoIterator<Item = &'a ResourceEvent>,
    ) -> Result<(), ResourceError> {
        for event in events {
            self.resources.apply(event)?;
        }
        Ok(())
    }
}

impl AbstractState for StateMap {
    fn lookup(&self, name: &str) -> Value {
        self.bindings.get(name).cloned().unwrap_or(Value::Unknown)
    }

    fn is_member(&self, handle: &ResourceHandle, kind: &str) -> Truth {
        Truth::from_bool(self.resources.is_member(handle, kind))
    }

    fn handle_status(&self, handle: &ResourceHandle) -> HandleStatus {
        self.resources.status(handle)
    }

    fn call(&self, func: &str, args: &[Value]) -> Value {
        match self.host_fns.get(func) {
            Some(f) => f(args),
            None => Value::Unknown,
        }
    }
}

impl fmt::Debug for StateMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut host_fns: Vec<&String> = self.host_fns.keys().collect();
        host_fns.sort();
        f.debug_struct("StateMap")
            .field("bindings", &self.bindings)
            .field("resources", &self.resources)
            .field("host_fns", &host_fns)
            .finish()
    }
}
