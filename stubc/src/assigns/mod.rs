//! Assigns-set resolution
//!
//! Everything not named by the assigns-set of a branch is unchanged by the
//! call in that branch. Range bounds are folded to constants when the
//! parameter values captured in the branch decide them.

use std::collections::HashSet;
use std::fmt;

use crate::ast::{Expr, Formula, Target, UnOp};
use crate::eval::{OutcomeBranch, Scope, StateMap, Value};

/// Range bound
#[derive(Debug, Clone, PartialEq)]
pub enum Bound {
    Const(i64),
    /// Left to the abstract domain
    Symbolic(Formula),
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bound::Const(n) => write!(f, "{n}"),
            Bound::Symbolic(e) => write!(f, "{}", e.node),
        }
    }
}

/// Abstractly identified write target
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedTarget {
    /// One location reached from a parameter or local: `*p`, `p->f`, `a[i]`
    Scalar(Formula),
    /// Cells `lo..=hi` of the block at `base`
    Range { base: Formula, lo: Bound, hi: Bound },
    /// Everything reachable from `base`
    Whole(Formula),
    /// Named global cell
    Global(String),
}

impl ResolvedTarget {
    /// Variable the target is reached from
    pub fn root(&self) -> Option<&str> {
        match self {
            ResolvedTarget::Global(name) => Some(name.as_str()),
            ResolvedTarget::Scalar(base)
            | ResolvedTarget::Whole(base)
            | ResolvedTarget::Range { base, .. } => root(base),
        }
    }
}

impl fmt::Display for ResolvedTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedTarget::Scalar(e) => write!(f, "{}", e.node),
            ResolvedTarget::Range { base, lo, hi } => write!(f, "{}[{lo}, {hi}]", base.node),
            ResolvedTarget::Whole(base) => write!(f, "{}[..]", base.node),
            ResolvedTarget::Global(name) => write!(f, "{name}"),
        }
    }
}

/// Write targets of one outcome branch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssignsSet {
    targets: Vec<ResolvedTarget>,
}

impl AssignsSet {
    pub fn iter(&self) -> impl Iterator<Item = &ResolvedTarget> {
        self.targets.iter()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// No target is reached from `name`, so its abstract value may be kept
    pub fn preserves(&self, name: &str) -> bool {
        self.targets.iter().all(|t| t.root() != Some(name))
    }

    pub fn globals(&self) -> impl Iterator<Item = &str> {
        self.targets.iter().filter_map(|t| match t {
            ResolvedTarget::Global(name) => Some(name.as_str()),
            _ => None,
        })
    }
}

impl<'a> IntoIterator for &'a AssignsSet {
    type Item = &'a ResolvedTarget;
    type IntoIter = std::slice::Iter<'a, ResolvedTarget>;

    fn into_iter(self) -> Self::IntoIter {
        self.targets.iter()
    }
}

/// Resolve the `assigns` targets of a branch
pub fn resolve_assigns(branch: &OutcomeBranch) -> AssignsSet {
    let mut inputs = StateMap::new();
    for (name, value) in &branch.inputs {
        inputs.set(name.clone(), value.clone());
    }
    let scope = Scope::new(&inputs, &branch.locals, branch.library(), branch.config());
    let is_named = |name: &str| branch.inputs.contains_key(name) || branch.locals.contains_key(name);

    let mut seen = HashSet::new();
    let mut targets = Vec::new();
    for target in &branch.assigns {
        let resolved = match target {
            Target::Location(f) => match &f.node {
                Expr::Var(name) if !is_named(name.as_str()) => ResolvedTarget::Global(name.clone()),
                _ => ResolvedTarget::Scalar(f.clone()),
            },
            Target::Whole(base) => ResolvedTarget::Whole(base.clone()),
            Target::Range { base, lo, hi } => {
                let lo = bound(&scope, lo);
                let hi = bound(&scope, hi);
                if let (Bound::Const(l), Bound::Const(h)) = (&lo, &hi) {
                    if l > h {
                        tracing::trace!(assigns = %target, "empty assigns range dropped");
                        continue;
                    }
                }
                ResolvedTarget::Range {
                    base: base.clone(),
                    lo,
                    hi,
                }
            }
        };
        if seen.insert(resolved.to_string()) {
            targets.push(resolved);
        }
    }
    AssignsSet { targets }
}

fn bound(scope: &Scope<'_>, f: &Formula) -> Bound {
    match scope.value(f) {
        Value::Int(n) => Bound::Const(n),
        _ => Bound::Symbolic(f.clone()),
    }
}

fn root(f: &Formula) -> Option<&str> {
    match &f.node {
        Expr::Var(name) => Some(name.as_str()),
        Expr::Index { base, .. } | Expr::Field { base, .. } => root(base),
        Expr::Unary {
            op: UnOp::Deref | UnOp::AddrOf,
            expr,
        } => root(expr),
        Expr::Primed(inner) => root(inner),
        Expr::Cast { expr, .. } => root(expr),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::Evaluator;
    use crate::repository::Repository;

    const SOURCE: &str = r#"
        fn recv(int sockfd, unsigned char* buf, int n, int flags) -> int {
            requires: n >= 0;
            case "received" {
                assigns: buf[0, n - 1];
                assigns: _errno;
                ensures: return in [0, n];
            }
            case "failure" {
                assigns: _errno;
                ensures: return == -1;
            }
        }

        fn reset(int* p, int* q) {
            assigns: *p;
            assigns: q[..];
            assigns: q[..];
        }
    "#;

    fn branches(name: &str, argc: usize, state: &StateMap) -> Vec<OutcomeBranch> {
        let mut repo = Repository::new();
        repo.load_source("recv.stub", SOURCE).unwrap();
        let contract = repo.lookup(name, argc).unwrap();
        Evaluator::default()
            .evaluate(contract, state)
            .unwrap()
            .branches
            .into_vec()
    }

    #[test]
    fn test_concrete_range_and_global() {
        let state = StateMap::new().with("n", Value::Int(16));
        let all = branches("recv", 4, &state);
        let set = all[0].assigns_set();
        let rendered: Vec<String> = set.iter().map(|t| t.to_string()).collect();
        assert_eq!(rendered, vec!["buf[0, 15]".to_string(), "_errno".to_string()]);
        assert!(!set.preserves("buf"));
        assert!(!set.preserves("_errno"));
        assert!(set.preserves("sockfd"));
        assert_eq!(set.globals().collect::<Vec<_>>(), vec!["_errno"]);
    }

    #[test]
    fn test_symbolic_bound_kept() {
        let all = branches("recv", 4, &StateMap::new());
        let set = all[0].assigns_set();
        match set.iter().next().unwrap() {
            ResolvedTarget::Range { lo, hi, .. } => {
                assert_eq!(*lo, Bound::Const(0));
                assert!(matches!(hi, Bound::Symbolic(e) if e.node.to_string() == "(n - 1)"));
            }
            other => panic!("Expected range, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_range_dropped() {
        let state = StateMap::new().with("n", Value::Int(0));
        let all = branches("recv", 4, &state);
        let set = all[0].assigns_set();
        assert_eq!(set.len(), 1);
        assert!(set.preserves("buf"));
    }

    #[test]
    fn test_failure_case_preserves_buffer() {
        let state = StateMap::new().with("n", Value::Int(16));
        let all = branches("recv", 4, &state);
        let failure = all.iter().find(|b| b.label.to_string() == "failure").unwrap();
        assert!(failure.assigns_set().preserves("buf"));
    }

    #[test]
    fn test_scalar_whole_and_dedup() {
        let all = branches("reset", 2, &StateMap::new());
        let set = all[0].assigns_set();
        assert_eq!(set.len(), 2);
        assert!(matches!(set.iter().next(), Some(ResolvedTarget::Scalar(_))));
        assert!(matches!(set.iter().nth(1), Some(ResolvedTarget::Whole(_))));
        assert_eq!(set.iter().nth(1).unwrap().root(), Some("q"));
    }
}
