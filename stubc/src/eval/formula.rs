//! Three-valued evaluation of formulas against pre- and post-states

use std::collections::BTreeMap;

use super::builtins::{self, Builtin};
use super::state::{AbstractState, RETURN_BINDING};
use super::value::{Truth, Value};
use crate::ast::{BinOp, Expr, Formula, Quantifier, Span, UnOp};
use crate::config::EvalConfig;
use crate::predicate::PredicateLibrary;
use crate::resource::ResourceEvent;

/// Stack growth parameters for deeply nested formulas
const STACK_RED_ZONE: usize = 64 * 1024;
const STACK_GROW_SIZE: usize = 1024 * 1024;

/// Which state unprimed names resolve against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Pre,
    Post,
}

/// Everything a formula may refer to during one evaluation
pub struct Scope<'a> {
    pre: &'a dyn AbstractState,
    post: Option<&'a dyn AbstractState>,
    locals: &'a BTreeMap<String, Value>,
    library: &'a PredicateLibrary,
    config: &'a EvalConfig,
    /// Lifecycle events of the branch being checked, in order
    events: &'a [ResourceEvent],
}

/// Variables bound by enclosing quantifiers, innermost last
type Bound = Vec<(String, Value)>;

impl<'a> Scope<'a> {
    pub fn new(
        pre: &'a dyn AbstractState,
        locals: &'a BTreeMap<String, Value>,
        library: &'a PredicateLibrary,
        config: &'a EvalConfig,
    ) -> Self {
        Self {
            pre,
            post: None,
            locals,
            library,
            config,
            events: &[],
        }
    }

    /// Resolve primed references and `return` against `post`
    pub fn with_post(mut self, post: &'a dyn AbstractState) -> Self {
        self.post = Some(post);
        self
    }

    /// Membership follows these events before asking either state
    pub fn with_events(mut self, events: &'a [ResourceEvent]) -> Self {
        self.events = events;
        self
    }

    pub fn pre_state(&self) -> &'a dyn AbstractState {
        self.pre
    }

    pub fn truth(&self, f: &Formula) -> Truth {
        self.test(f, &mut Vec::new(), Phase::Pre)
    }

    pub fn value(&self, f: &Formula) -> Value {
        self.term(f, &mut Vec::new(), Phase::Pre)
    }

    fn state(&self, phase: Phase) -> Option<&'a dyn AbstractState> {
        match phase {
            Phase::Pre => Some(self.pre),
            Phase::Post => self.post,
        }
    }

    fn lookup(&self, name: &str, bound: &Bound, phase: Phase) -> Value {
        if let Some((_, v)) = bound.iter().rev().find(|(n, _)| n == name) {
            return v.clone();
        }
        if let Some(v) = self.locals.get(name) {
            return v.clone();
        }
        self.state(phase).map_or(Value::Unknown, |s| s.lookup(name))
    }

    // ------------------------------------------------------------------
    // Formulas
    // ------------------------------------------------------------------

    fn test(&self, f: &Formula, bound: &mut Bound, phase: Phase) -> Truth {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || self.test_inner(f, bound, phase))
    }

    fn test_inner(&self, f: &Formula, bound: &mut Bound, phase: Phase) -> Truth {
        match &f.node {
            Expr::BoolLit(b) => Truth::from_bool(*b),
            Expr::Binary { left, op, right } if op.is_logical() => {
                let l = self.test(left, bound, phase);
                // Kleene short circuit
                match (op, l) {
                    (BinOp::And, Truth::False) => return Truth::False,
                    (BinOp::Or, Truth::True) => return Truth::True,
                    (BinOp::Implies, Truth::False) => return Truth::True,
                    _ => {}
                }
                let r = self.test(right, bound, phase);
                match op {
                    BinOp::And => l.and(r),
                    BinOp::Or => l.or(r),
                    _ => l.implies(r),
                }
            }
            Expr::Binary { left, op, right } if op.is_comparison() => {
                let l = self.term(left, bound, phase);
                let r = self.term(right, bound, phase);
                compare(*op, &l, &r)
            }
            Expr::Unary {
                op: UnOp::Not,
                expr,
            } => self.test(expr, bound, phase).not(),
            Expr::InResource { expr, kind } => {
                let v = self.term(expr, bound, phase);
                self.membership(&v, kind, phase)
            }
            Expr::InRange { expr, lo, hi } => {
                let v = self.term(expr, bound, phase);
                let lo = self.term(lo, bound, phase);
                let hi = self.term(hi, bound, phase);
                compare(BinOp::Le, &lo, &v).and(compare(BinOp::Le, &v, &hi))
            }
            Expr::Quantified {
                quantifier,
                var,
                lo,
                hi,
                body,
                ..
            } => self.quantified(*quantifier, var, lo, hi, body, bound, phase),
            Expr::Call { func, args } => self.call(func, args, bound, phase).truth(),
            _ => self.term(f, bound, phase).truth(),
        }
    }

    fn membership(&self, v: &Value, kind: &str, phase: Phase) -> Truth {
        match v {
            Value::Handle(h) if h.kind != kind => Truth::False,
            Value::Handle(h) => match self.events.iter().rev().find(|e| e.handle() == h) {
                Some(ResourceEvent::Created(_)) => Truth::True,
                Some(ResourceEvent::Released(_)) => Truth::False,
                None => self
                    .state(phase)
                    .map_or(Truth::Unknown, |s| s.is_member(h, kind)),
            },
            Value::Unknown => Truth::Unknown,
            // a concrete non-handle value is never a resource instance
            _ => Truth::False,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn quantified(
        &self,
        quantifier: Quantifier,
        var: &str,
        lo: &Formula,
        hi: &Formula,
        body: &Formula,
        bound: &mut Bound,
        phase: Phase,
    ) -> Truth {
        let (Value::Int(lo), Value::Int(hi)) =
            (self.term(lo, bound, phase), self.term(hi, bound, phase))
        else {
            // symbolic bounds are left to the abstract domain
            return Truth::Unknown;
        };
        // empty ranges: exists is false, forall is true
        let (neutral, absorbing) = match quantifier {
            Quantifier::Exists => (Truth::False, Truth::True),
            Quantifier::Forall => (Truth::True, Truth::False),
        };
        if lo > hi {
            return neutral;
        }
        let span = (hi as i128) - (lo as i128) + 1;
        if span > i128::from(self.config.max_quantifier_span) {
            tracing::debug!(var, lo, hi, "quantifier range too wide, result unknown");
            return Truth::Unknown;
        }

        let mut acc = neutral;
        for i in lo..=hi {
            bound.push((var.to_string(), Value::Int(i)));
            let t = self.test(body, bound, phase);
            bound.pop();
            acc = match quantifier {
                Quantifier::Exists => acc.or(t),
                Quantifier::Forall => acc.and(t),
            };
            if acc == absorbing {
                break;
            }
        }
        acc
    }

    // ------------------------------------------------------------------
    // Terms
    // ------------------------------------------------------------------

    fn term(&self, f: &Formula, bound: &mut Bound, phase: Phase) -> Value {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || self.term_inner(f, bound, phase))
    }

    fn term_inner(&self, f: &Formula, bound: &mut Bound, phase: Phase) -> Value {
        match &f.node {
            Expr::IntLit(n) => Value::Int(*n),
            Expr::FloatLit(x) => Value::Float(*x),
            Expr::BoolLit(b) => Value::Bool(*b),
            Expr::Var(name) => self.lookup(name, bound, phase),
            Expr::Return => self
                .post
                .map_or(Value::Unknown, |s| s.lookup(RETURN_BINDING)),
            Expr::Primed(inner) => self.term(inner, bound, Phase::Post),
            Expr::Binary { left, op, right } if !op.is_logical() && !op.is_comparison() => {
                let l = self.term(left, bound, phase);
                let r = self.term(right, bound, phase);
                arith(*op, &l, &r)
            }
            Expr::Unary { op, expr } => match op {
                UnOp::Neg => match self.term(expr, bound, phase) {
                    Value::Int(n) => n.checked_neg().map_or(Value::Unknown, Value::Int),
                    Value::Float(x) => Value::Float(-x),
                    _ => Value::Unknown,
                },
                UnOp::Not => self.test(expr, bound, phase).not().into(),
                UnOp::Deref => {
                    let v = self.term(expr, bound, phase);
                    self.deref(&v, bound, phase)
                }
                UnOp::AddrOf => match &expr.node {
                    Expr::Var(name) => Value::Ref(name.clone()),
                    _ => Value::Unknown,
                },
            },
            Expr::Cast { ty, expr } => cast(ty, self.term(expr, bound, phase)),
            Expr::Index { base, index } => {
                let base = self.term(base, bound, phase);
                let index = self.term(index, bound, phase);
                let base = match base {
                    Value::Ref(_) => self.deref(&base, bound, phase),
                    other => other,
                };
                match (base, index) {
                    (Value::Array(items), Value::Int(i)) => usize::try_from(i)
                        .ok()
                        .and_then(|i| items.get(i).cloned())
                        .unwrap_or(Value::Unknown),
                    _ => Value::Unknown,
                }
            }
            Expr::Field { base, field, arrow } => {
                let mut v = self.term(base, bound, phase);
                if *arrow && !matches!(v, Value::Struct(_)) {
                    v = self.deref(&v, bound, phase);
                }
                match v {
                    Value::Struct(mut fields) => fields.remove(field).unwrap_or(Value::Unknown),
                    _ => Value::Unknown,
                }
            }
            Expr::Call { func, args } => self.call(func, args, bound, phase),
            _ => self.test(f, bound, phase).into(),
        }
    }

    fn deref(&self, v: &Value, bound: &Bound, phase: Phase) -> Value {
        match v {
            Value::Ref(name) => self.lookup(name, bound, phase),
            Value::Array(items) => items.first().cloned().unwrap_or(Value::Unknown),
            Value::Unknown => Value::Unknown,
            other => self.state(phase).map_or(Value::Unknown, |s| s.load(other)),
        }
    }

    /// Builtins first, then predicates of the file, then host functions
    fn call(&self, func: &str, args: &[Formula], bound: &mut Bound, phase: Phase) -> Value {
        if let Some(builtin) = Builtin::from_name(func) {
            if builtin.takes_kind() {
                return match args {
                    [handle, kind] => match &kind.node {
                        Expr::Var(kind) => {
                            let v = self.term(handle, bound, phase);
                            self.membership(&v, kind, phase).into()
                        }
                        _ => Value::Unknown,
                    },
                    _ => Value::Unknown,
                };
            }
            let values: Vec<Value> = args.iter().map(|a| self.term(a, bound, phase)).collect();
            return match self.state(phase) {
                Some(state) => builtins::apply(builtin, &values, state),
                None => Value::Unknown,
            };
        }

        if self.library.contains(func) {
            return match self.library.resolve(func, args, Span::SYNTHETIC) {
                Ok(body) => self.test(&body, bound, phase).into(),
                Err(e) => {
                    tracing::warn!(predicate = func, error = %e, "predicate expansion failed");
                    Value::Unknown
                }
            };
        }

        let values: Vec<Value> = args.iter().map(|a| self.term(a, bound, phase)).collect();
        self.state(phase)
            .map_or(Value::Unknown, |s| s.call(func, &values))
    }
}

/// Value range of the integer types a cast may name
fn int_range(ty: &str) -> Option<(i64, i64)> {
    let ty = ty.strip_prefix("const ").unwrap_or(ty);
    Some(match ty {
        "char" | "signed char" => (i8::MIN.into(), i8::MAX.into()),
        "unsigned char" => (0, u8::MAX.into()),
        "short" | "signed short" => (i16::MIN.into(), i16::MAX.into()),
        "unsigned short" => (0, u16::MAX.into()),
        "int" | "signed int" | "signed" => (i32::MIN.into(), i32::MAX.into()),
        "unsigned int" | "unsigned" => (0, u32::MAX.into()),
        "long" | "long long" | "ssize_t" | "ptrdiff_t" | "intptr_t" | "off_t" => (i64::MIN, i64::MAX),
        "unsigned long" | "unsigned long long" | "size_t" | "uintptr_t" => (0, i64::MAX),
        _ => return None,
    })
}

/// Casts to integer types truncate floats; a result outside the type is unknown.
/// Pointer and struct casts keep the value.
fn cast(ty: &str, v: Value) -> Value {
    if let Some((lo, hi)) = int_range(ty) {
        let n = match v {
            Value::Int(n) => n,
            Value::Bool(b) => i64::from(b),
            Value::Float(x) => {
                let t = x.trunc();
                if !t.is_finite() || t < lo as f64 || t > hi as f64 {
                    return Value::Unknown;
                }
                t as i64
            }
            other => return other,
        };
        return if (lo..=hi).contains(&n) { Value::Int(n) } else { Value::Unknown };
    }
    match (ty.strip_prefix("const ").unwrap_or(ty), v) {
        ("float" | "double", Value::Int(n)) => Value::Float(n as f64),
        (_, other) => other,
    }
}

fn arith(op: BinOp, l: &Value, r: &Value) -> Value {
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => {
            let out = match op {
                BinOp::Add => a.checked_add(*b),
                BinOp::Sub => a.checked_sub(*b),
                BinOp::Mul => a.checked_mul(*b),
                BinOp::Div => a.checked_div(*b),
                BinOp::Mod => a.checked_rem(*b),
                _ => None,
            };
            out.map_or(Value::Unknown, Value::Int)
        }
        _ => match (l.as_float(), r.as_float()) {
            (Some(a), Some(b)) if matches!(l, Value::Float(_)) || matches!(r, Value::Float(_)) => {
                match op {
                    BinOp::Add => Value::Float(a + b),
                    BinOp::Sub => Value::Float(a - b),
                    BinOp::Mul => Value::Float(a * b),
                    BinOp::Div => Value::Float(a / b),
                    BinOp::Mod => Value::Float(a % b),
                    _ => Value::Unknown,
                }
            }
            _ => Value::Unknown,
        },
    }
}

fn compare(op: BinOp, l: &Value, r: &Value) -> Truth {
    use std::cmp::Ordering;

    let ordering = match (l, r) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Float(_), Value::Int(_) | Value::Float(_)) | (Value::Int(_), Value::Float(_)) => {
            let (Some(a), Some(b)) = (l.as_float(), r.as_float()) else {
                return Truth::Unknown;
            };
            // NaN compares unequal to everything
            match a.partial_cmp(&b) {
                Some(o) => Some(o),
                None => return Truth::from_bool(op == BinOp::Ne),
            }
        }
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Handle(a), Value::Handle(b)) if matches!(op, BinOp::Eq | BinOp::Ne) => {
            Some(if a == b { Ordering::Equal } else { Ordering::Less })
        }
        // Handles stand for non-null addresses
        (Value::Handle(_), Value::Int(0)) if matches!(op, BinOp::Eq | BinOp::Ne) => {
            Some(Ordering::Greater)
        }
        (Value::Int(0), Value::Handle(_)) if matches!(op, BinOp::Eq | BinOp::Ne) => {
            Some(Ordering::Less)
        }
        (Value::Ref(a), Value::Ref(b)) if matches!(op, BinOp::Eq | BinOp::Ne) => {
            Some(if a == b { Ordering::Equal } else { Ordering::Less })
        }
        _ => None,
    };
    let Some(ordering) = ordering else {
        return Truth::Unknown;
    };
    Truth::from_bool(match op {
        BinOp::Eq => ordering == Ordering::Equal,
        BinOp::Ne => ordering != Ordering::Equal,
        BinOp::Lt => ordering == Ordering::Less,
        BinOp::Le => ordering != Ordering::Greater,
        BinOp::Gt => ordering == Ordering::Greater,
        BinOp::Ge => ordering != Ordering::Less,
        _ => return Truth::Unknown,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Spanned;
    use crate::eval::state::StateMap;
    use crate::parser::parse_formula;
    use crate::resource::ResourceTable;

    fn truth_in(state: &StateMap, source: &str) -> Truth {
        let library = PredicateLibrary::new();
        let locals = BTreeMap::new();
        let config = EvalConfig::default();
        Scope::new(state, &locals, &library, &config).truth(&parse_formula(source).unwrap())
    }

    fn truth(source: &str) -> Truth {
        truth_in(&StateMap::new(), source)
    }

    #[test]
    fn test_arithmetic_and_comparison() {
        assert_eq!(truth("1 + 2 * 3 == 7"), Truth::True);
        assert_eq!(truth("7 / 2 == 3 and 7 % 2 == 1"), Truth::True);
        assert_eq!(truth("-1. < 0"), Truth::True);
    }

    #[test]
    fn test_division_by_zero_is_unknown() {
        assert_eq!(truth("1 / 0 == 0"), Truth::Unknown);
    }

    #[test]
    fn test_overflow_is_unknown() {
        assert_eq!(truth("9223372036854775807 + 1 > 0"), Truth::Unknown);
    }

    #[test]
    fn test_unknown_globals() {
        assert_eq!(truth("x > 0"), Truth::Unknown);
        assert_eq!(truth("x > 0 or true"), Truth::True);
        assert_eq!(truth("false and x > 0"), Truth::False);
        assert_eq!(truth("false implies x > 0"), Truth::True);
    }

    #[test]
    fn test_empty_ranges() {
        assert_eq!(truth("exists i in [5, 3]: i == i"), Truth::False);
        assert_eq!(truth("forall i in [5, 3]: false"), Truth::True);
        // the body is never evaluated, even if undecidable
        assert_eq!(truth("forall i in [1, 0]: unknown_global > i"), Truth::True);
    }

    #[test]
    fn test_quantifier_over_string() {
        let state = StateMap::new().with("s", Value::c_string("abc"));
        assert_eq!(
            truth_in(&state, "exists unsigned int k in [0, size(s) - 1]: s[k] == 0"),
            Truth::True
        );
        assert_eq!(
            truth_in(&state, "forall int k in [0, 2]: s[k] != 0"),
            Truth::True
        );
        assert_eq!(
            truth_in(&state, "forall int k in [0, size(s) - 1]: s[k] != 0"),
            Truth::False
        );
    }

    #[test]
    fn test_symbolic_bounds_are_unknown() {
        assert_eq!(truth("exists i in [0, n]: i == 1"), Truth::Unknown);
    }

    #[test]
    fn test_wide_range_is_unknown() {
        let state = StateMap::new();
        let library = PredicateLibrary::new();
        let locals = BTreeMap::new();
        let config = EvalConfig::default().max_quantifier_span(10);
        let f = parse_formula("forall i in [0, 100]: i >= 0").unwrap();
        assert_eq!(Scope::new(&state, &locals, &library, &config).truth(&f), Truth::Unknown);
    }

    #[test]
    fn test_membership() {
        let mut table = ResourceTable::new();
        let fd = table.allocate("FileDescriptor");
        let gone = table.allocate("FileDescriptor");
        table.release(&gone).unwrap();
        let state = StateMap::with_resources(table)
            .with("fd", fd)
            .with("gone", gone)
            .with("n", Value::Int(3));
        assert_eq!(truth_in(&state, "fd in FileDescriptor"), Truth::True);
        assert_eq!(truth_in(&state, "alive_resource(fd, FileDescriptor)"), Truth::True);
        assert_eq!(truth_in(&state, "fd in Memory"), Truth::False);
        assert_eq!(truth_in(&state, "gone in FileDescriptor"), Truth::False);
        assert_eq!(truth_in(&state, "n in FileDescriptor"), Truth::False);
        assert_eq!(truth_in(&state, "unbound in FileDescriptor"), Truth::Unknown);
        assert_eq!(truth_in(&state, "n in [0, 3]"), Truth::True);
        assert_eq!(truth_in(&state, "n in [4, 9]"), Truth::False);
        assert_eq!(truth_in(&state, "fd != 0 and 0 != gone"), Truth::True);
        assert_eq!(truth_in(&state, "fd < 1"), Truth::Unknown);
    }

    #[test]
    fn test_primed_and_return_use_post_state() {
        let pre = StateMap::new().with("x", Value::Int(1));
        let post = StateMap::new().with("x", Value::Int(2)).with_return(Value::Int(0));
        let library = PredicateLibrary::new();
        let locals = BTreeMap::new();
        let config = EvalConfig::default();
        let scope = Scope::new(&pre, &locals, &library, &config).with_post(&post);
        let f = parse_formula("x' == x + 1 and return == 0").unwrap();
        assert_eq!(scope.truth(&f), Truth::True);

        let pre_only = Scope::new(&pre, &locals, &library, &config);
        assert_eq!(pre_only.truth(&f), Truth::Unknown);
    }

    #[test]
    fn test_casts() {
        let state = StateMap::new()
            .with("x", Value::Float(3.7))
            .with("n", Value::Int(300))
            .with("buf", Value::c_string("ab"));
        assert_eq!(truth_in(&state, "(int) x == 3"), Truth::True);
        assert_eq!(truth_in(&state, "(double) n == 300.0"), Truth::True);
        assert_eq!(truth_in(&state, "(unsigned char) n == 44"), Truth::Unknown);
        assert_eq!(truth_in(&state, "((char*) buf)[1] == 98"), Truth::True);
        assert_eq!(truth_in(&state, "(n) + 1 == 301"), Truth::True);
    }

    #[test]
    fn test_address_of_and_deref() {
        let state = StateMap::new()
            .with("_errno", Value::Int(22))
            .with("p", Value::Ref("_errno".to_string()));
        assert_eq!(truth_in(&state, "*p == 22"), Truth::True);
        assert_eq!(truth_in(&state, "p == &_errno"), Truth::True);
    }

    #[test]
    fn test_field_access() {
        let mut fields = BTreeMap::new();
        fields.insert("len".to_string(), Value::Int(4));
        let state = StateMap::new().with("hdr", Value::Struct(fields));
        assert_eq!(truth_in(&state, "hdr.len == 4 and hdr->len == 4"), Truth::True);
        assert_eq!(truth_in(&state, "hdr.missing == 4"), Truth::Unknown);
    }

    #[test]
    fn test_predicate_expansion() {
        let mut library = PredicateLibrary::new();
        library
            .define(
                Spanned::synthetic("positive".to_string()),
                vec!["v".to_string()],
                parse_formula("v > 0").unwrap(),
            )
            .unwrap();
        let state = StateMap::new().with("a", Value::Int(5));
        let locals = BTreeMap::new();
        let config = EvalConfig::default();
        let scope = Scope::new(&state, &locals, &library, &config);
        assert_eq!(scope.truth(&parse_formula("positive(a - 5)").unwrap()), Truth::False);
        assert_eq!(scope.truth(&parse_formula("positive(a)").unwrap()), Truth::True);
    }

    #[test]
    fn test_nan_comparisons() {
        let state = StateMap::new().with("x", Value::Float(f64::NAN));
        assert_eq!(truth_in(&state, "x == x"), Truth::False);
        assert_eq!(truth_in(&state, "x != x"), Truth::True);
        assert_eq!(truth_in(&state, "float_nan(x)"), Truth::True);
    }

    #[test]
    fn test_deep_formula_does_not_overflow() {
        let mut source = String::from("x");
        for _ in 0..500 {
            source = format!("({source} + 1)");
        }
        let f = parse_formula(&format!("{source} > 0")).unwrap();
        let state = StateMap::new().with("x", Value::Int(0));
        let library = PredicateLibrary::new();
        let locals = BTreeMap::new();
        let config = EvalConfig::default();
        assert_eq!(Scope::new(&state, &locals, &library, &config).truth(&f), Truth::True);
    }
}
