//! stubc: declarative contracts for external functions
//!
//! Stub files describe what a library function requires, which outcome cases
//! it has, what it may write and which abstract resources it creates or
//! releases. An analysis engine loads them into a [`Repository`] and asks an
//! [`Evaluator`] for the outcome branches of each call site.

pub mod assigns;
pub mod ast;
pub mod config;
pub mod error;
pub mod eval;
pub mod lexer;
pub mod parser;
pub mod predicate;
pub mod repository;
pub mod resolver;
pub mod resource;
pub mod util;

pub use assigns::{AssignsSet, Bound, ResolvedTarget, resolve_assigns};
pub use ast::Span;
pub use config::{EvalConfig, LoaderConfig, StubcConfig};
pub use error::{ErrorCategory, EvalError, Result, StubError};
pub use eval::{
    AbstractState, Branches, CaseLabel, Evaluation, Evaluator, Finding, OutcomeBranch, StateMap,
    Truth, Value,
};
pub use predicate::PredicateLibrary;
pub use repository::{Contract, LoadFailure, LoadReport, Repository};
pub use resource::{HandleMinter, HandleStatus, ResourceEvent, ResourceHandle, ResourceTable};
