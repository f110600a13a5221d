//! Case-split evaluation of contracts at a call site
//!
//! `Evaluator::evaluate` checks the preconditions of a contract against the
//! pre-call state and returns the non-empty set of outcome branches the
//! caller must explore. Branches carry no priority: overlapping case guards
//! are a nondeterministic choice.

mod builtins;
mod formula;
mod state;
mod value;

pub use builtins::Builtin;
pub use formula::Scope;
pub use state::{AbstractState, HostFn, RETURN_BINDING, StateMap};
pub use value::{Truth, Value};

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::assigns::{AssignsSet, resolve_assigns};
use crate::ast::{BinOp, Clause, Expr, Formula, LocalDecl, LocalInit, Span, Spanned, Target};
use crate::config::EvalConfig;
use crate::error::EvalError;
use crate::predicate::PredicateLibrary;
use crate::repository::Contract;
use crate::resource::{HandleMinter, HandleStatus, ResourceEvent, ResourceHandle};

/// Origin of an outcome branch
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CaseLabel {
    /// Contract without cases
    Default,
    Case(String),
}

impl fmt::Display for CaseLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaseLabel::Default => write!(f, "default"),
            CaseLabel::Case(label) => write!(f, "{label}"),
        }
    }
}

/// Non-fatal observation reported alongside the branches
#[derive(Debug, Clone, PartialEq)]
pub enum Finding {
    /// A `requires` the state could not decide; the caller must warn and assume it
    UncheckedPrecondition { function: String, clause: String, span: Span },
    /// Documented imprecision of the stub (`unsound: "..."`)
    Unsound { function: String, message: String },
    /// `free` of a value that is not a resource handle
    UnresolvedFree { function: String, expr: String, span: Span },
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Finding::UncheckedPrecondition { function, clause, .. } => {
                write!(f, "{function}: precondition {clause} could not be checked")
            }
            Finding::Unsound { function, message } => write!(f, "{function}: unsound stub: {message}"),
            Finding::UnresolvedFree { function, expr, .. } => {
                write!(f, "{function}: `free: {expr}` does not denote a resource")
            }
        }
    }
}

/// One outcome of a call, consumed by the caller right away
#[derive(Debug, Clone)]
pub struct OutcomeBranch {
    pub label: CaseLabel,
    /// Conjunction of the case guards, `true` for the default branch
    pub guard: Formula,
    /// `True` or `Unknown`; false guards never produce a branch
    pub guard_status: Truth,
    /// Values of the named parameters in the pre-state
    pub inputs: BTreeMap<String, Value>,
    pub locals: BTreeMap<String, Value>,
    pub assigns: Vec<Target>,
    pub ensures: Vec<Formula>,
    pub events: Vec<ResourceEvent>,
    library: Arc<PredicateLibrary>,
    config: EvalConfig,
}

impl OutcomeBranch {
    /// Conjunction of the `ensures` clauses
    pub fn ensures_formula(&self) -> Formula {
        conjunction(&self.ensures)
    }

    /// Check the postcondition, primed references and `return` resolving against `post`.
    /// Handles created by the branch are live and handles it frees are not,
    /// whether or not the host has replayed `events` yet.
    pub fn check_ensures(&self, pre: &dyn AbstractState, post: &dyn AbstractState) -> Truth {
        let scope = Scope::new(pre, &self.locals, &self.library, &self.config)
            .with_post(post)
            .with_events(&self.events);
        self.ensures
            .iter()
            .fold(Truth::True, |acc, f| acc.and(scope.truth(f)))
    }

    /// Write targets of this branch
    pub fn assigns_set(&self) -> AssignsSet {
        resolve_assigns(self)
    }

    pub fn created(&self) -> impl Iterator<Item = &ResourceHandle> {
        self.events.iter().filter_map(|e| match e {
            ResourceEvent::Created(h) => Some(h),
            ResourceEvent::Released(_) => None,
        })
    }

    pub fn released(&self) -> impl Iterator<Item = &ResourceHandle> {
        self.events.iter().filter_map(|e| match e {
            ResourceEvent::Released(h) => Some(h),
            ResourceEvent::Created(_) => None,
        })
    }

    pub(crate) fn library(&self) -> &PredicateLibrary {
        &self.library
    }

    pub(crate) fn config(&self) -> &EvalConfig {
        &self.config
    }
}

/// Non-empty collection of outcome branches
#[derive(Debug, Clone)]
pub struct Branches {
    first: OutcomeBranch,
    rest: Vec<OutcomeBranch>,
}

impl Branches {
    fn from_vec(mut branches: Vec<OutcomeBranch>) -> Option<Self> {
        if branches.is_empty() {
            return None;
        }
        let first = branches.remove(0);
        Some(Self {
            first,
            rest: branches,
        })
    }

    pub fn len(&self) -> usize {
        1 + self.rest.len()
    }

    pub fn first(&self) -> &OutcomeBranch {
        &self.first
    }

    pub fn iter(&self) -> impl Iterator<Item = &OutcomeBranch> {
        std::iter::once(&self.first).chain(self.rest.iter())
    }

    pub fn labels(&self) -> Vec<&CaseLabel> {
        self.iter().map(|b| &b.label).collect()
    }

    /// Branch of the case with this label
    pub fn case(&self, label: &str) -> Option<&OutcomeBranch> {
        self.iter()
            .find(|b| matches!(&b.label, CaseLabel::Case(l) if l == label))
    }

    pub fn into_vec(self) -> Vec<OutcomeBranch> {
        let mut out = Vec::with_capacity(self.len());
        out.push(self.first);
        out.extend(self.rest);
        out
    }
}

impl IntoIterator for Branches {
    type Item = OutcomeBranch;
    type IntoIter = std::vec::IntoIter<OutcomeBranch>;

    fn into_iter(self) -> Self::IntoIter {
        self.into_vec().into_iter()
    }
}

/// Result of evaluating one contract at one call site
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub branches: Branches,
    pub findings: Vec<Finding>,
}

/// Stateless evaluator; the minter is the only shared state
#[derive(Debug, Clone)]
pub struct Evaluator {
    config: EvalConfig,
    minter: Arc<HandleMinter>,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new(EvalConfig::default())
    }
}

impl Evaluator {
    pub fn new(config: EvalConfig) -> Self {
        Self::with_minter(config, Arc::new(HandleMinter::new()))
    }

    pub fn with_minter(config: EvalConfig, minter: Arc<HandleMinter>) -> Self {
        Self { config, minter }
    }

    pub fn minter(&self) -> &Arc<HandleMinter> {
        &self.minter
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    /// Evaluate `contract` against the pre-call state
    pub fn evaluate(
        &self,
        contract: &Contract,
        pre: &dyn AbstractState,
    ) -> Result<Evaluation, EvalError> {
        let function = contract.name();
        let library = contract.library();
        debug!(function, cases = contract.cases().len(), "evaluating contract");

        let inputs: BTreeMap<String, Value> = contract
            .signature()
            .params
            .iter()
            .map(|p| (p.name.node.clone(), pre.lookup(&p.name.node)))
            .collect();

        let mut findings = Vec::new();
        let mut locals = BTreeMap::new();
        let mut events = Vec::new();
        for clause in contract.clauses() {
            if let Clause::Local(decl) = &clause.node {
                let scope = Scope::new(pre, &locals, library, &self.config);
                let value = self.bind_local(decl, &scope, &mut events);
                trace!(function, local = %decl.name.node, %value, "bound local");
                locals.insert(decl.name.node.clone(), value);
            }
        }

        let scope = Scope::new(pre, &locals, library, &self.config);
        for clause in contract.clauses() {
            match &clause.node {
                Clause::Requires(f) => match scope.truth(f) {
                    Truth::False => {
                        debug!(function, clause = %f.node, "precondition violated");
                        return Err(EvalError::PreconditionViolation {
                            function: function.to_string(),
                            clause: f.node.to_string(),
                            span: clause.span,
                        });
                    }
                    Truth::Unknown => findings.push(Finding::UncheckedPrecondition {
                        function: function.to_string(),
                        clause: f.node.to_string(),
                        span: clause.span,
                    }),
                    Truth::True => {}
                },
                Clause::Unsound(message) => findings.push(Finding::Unsound {
                    function: function.to_string(),
                    message: message.clone(),
                }),
                _ => {}
            }
        }

        let releases = self.releases(function, contract.clauses(), &scope, &events, &mut findings)?;
        let top_assigns = targets(contract.clauses());
        let top_ensures = ensures(contract.clauses());

        let branch = |label, guard, guard_status, locals, assigns, ensures, events| OutcomeBranch {
            label,
            guard,
            guard_status,
            inputs: inputs.clone(),
            locals,
            assigns,
            ensures,
            events,
            library: Arc::clone(contract.library_arc()),
            config: self.config.clone(),
        };

        if contract.cases().is_empty() {
            let mut branch_events = events;
            branch_events.extend(releases);
            let only = branch(
                CaseLabel::Default,
                Spanned::synthetic(Expr::BoolLit(true)),
                Truth::True,
                locals,
                top_assigns,
                top_ensures,
                branch_events,
            );
            return Ok(Evaluation {
                branches: Branches {
                    first: only,
                    rest: Vec::new(),
                },
                findings,
            });
        }

        let mut kept = Vec::new();
        for case in contract.cases() {
            let guard = conjunction(&case.assumes);
            let status = scope.truth(&guard);
            if !status.may_hold() {
                debug!(function, case = %case.label.node, "case infeasible");
                continue;
            }
            trace!(function, case = %case.label.node, %status, "case kept");

            let mut case_locals = locals.clone();
            let mut case_events = events.clone();
            for clause in &case.clauses {
                if let Clause::Local(decl) = &clause.node {
                    let value = self.bind_local(
                        decl,
                        &Scope::new(pre, &case_locals, library, &self.config),
                        &mut case_events,
                    );
                    case_locals.insert(decl.name.node.clone(), value);
                }
            }
            case_events.extend(releases.iter().cloned());
            let case_scope = Scope::new(pre, &case_locals, library, &self.config);
            let case_releases =
                self.releases(function, &case.clauses, &case_scope, &case_events, &mut findings)?;
            case_events.extend(case_releases);

            let mut assigns = top_assigns.clone();
            assigns.extend(targets(&case.clauses));
            let mut case_ensures = top_ensures.clone();
            case_ensures.extend(ensures(&case.clauses));

            kept.push(branch(
                CaseLabel::Case(case.label.node.clone()),
                guard,
                status,
                case_locals,
                assigns,
                case_ensures,
                case_events,
            ));
        }

        match Branches::from_vec(kept) {
            Some(branches) => Ok(Evaluation { branches, findings }),
            None => {
                debug!(function, "no case covers the call");
                Err(EvalError::UnreachableCall {
                    function: function.to_string(),
                    cases: contract.cases().iter().map(|c| c.label.node.clone()).collect(),
                })
            }
        }
    }

    fn bind_local(
        &self,
        decl: &LocalDecl,
        scope: &Scope<'_>,
        events: &mut Vec<ResourceEvent>,
    ) -> Value {
        match &decl.init {
            LocalInit::New(kind) => {
                let handle = self.minter.mint(&kind.node);
                events.push(ResourceEvent::Created(handle.clone()));
                Value::Handle(handle)
            }
            LocalInit::Call { func, args } => {
                let call = Spanned::new(
                    Expr::Call {
                        func: func.node.clone(),
                        args: args.clone(),
                    },
                    func.span,
                );
                scope.value(&call)
            }
        }
    }

    /// `Released` events of the `free` clauses. `prior` holds the events the
    /// branch already carries; they take precedence over the pre-state.
    fn releases(
        &self,
        function: &str,
        clauses: &[Spanned<Clause>],
        scope: &Scope<'_>,
        prior: &[ResourceEvent],
        findings: &mut Vec<Finding>,
    ) -> Result<Vec<ResourceEvent>, EvalError> {
        let mut out: Vec<ResourceEvent> = Vec::new();
        for clause in clauses {
            let Clause::Free(f) = &clause.node else {
                continue;
            };
            let handle = match scope.value(f) {
                Value::Handle(handle) => handle,
                other => {
                    debug!(
                        function,
                        expr = %f.node,
                        value = other.type_name(),
                        "free of a non-handle"
                    );
                    findings.push(Finding::UnresolvedFree {
                        function: function.to_string(),
                        expr: f.node.to_string(),
                        span: clause.span,
                    });
                    continue;
                }
            };
            let last = prior.iter().chain(&out).rev().find(|e| e.handle() == &handle);
            match last {
                Some(ResourceEvent::Released(_)) => return Err(EvalError::DoubleFree { handle }),
                Some(ResourceEvent::Created(_)) => {}
                None => match scope.pre_state().handle_status(&handle) {
                    HandleStatus::Retired => return Err(EvalError::DoubleFree { handle }),
                    HandleStatus::NeverLive => return Err(EvalError::UseAfterFree { handle }),
                    HandleStatus::Live | HandleStatus::Untracked => {}
                },
            }
            out.push(ResourceEvent::Released(handle));
        }
        Ok(out)
    }
}

fn targets(clauses: &[Spanned<Clause>]) -> Vec<Target> {
    clauses
        .iter()
        .filter_map(|c| match &c.node {
            Clause::Assigns(t) => Some(t.clone()),
            _ => None,
        })
        .collect()
}

fn ensures(clauses: &[Spanned<Clause>]) -> Vec<Formula> {
    clauses
        .iter()
        .filter_map(|c| match &c.node {
            Clause::Ensures(f) => Some(f.clone()),
            _ => None,
        })
        .collect()
}

/// `a and b and ...`; `true` when empty
fn conjunction(formulas: &[Formula]) -> Formula {
    let mut iter = formulas.iter().cloned();
    let Some(first) = iter.next() else {
        return Spanned::synthetic(Expr::BoolLit(true));
    };
    iter.fold(first, |acc, f| {
        let span = acc.span.merge(f.span);
        Spanned::new(
            Expr::Binary {
                left: Box::new(acc),
                op: BinOp::And,
                right: Box::new(f),
            },
            span,
        )
    })
}
