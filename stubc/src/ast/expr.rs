//! Formula AST nodes

use std::collections::BTreeSet;
use std::fmt;

use super::{Span, Spanned};
use serde::{Deserialize, Serialize};

/// A spanned formula, the unit stored in every clause
pub type Formula = Spanned<Expr>;

/// Formula / term expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Integer literal
    IntLit(i64),
    /// Float literal (`1.`, `0.5`, `1e10`)
    FloatLit(f64),
    /// Boolean literal
    BoolLit(bool),

    /// Parameter, local, global or quantified variable
    Var(String),

    /// Return value of the call (post-state only)
    Return,

    /// `e'`: value of `e` after the call
    Primed(Box<Formula>),

    /// Binary operation
    Binary {
        left: Box<Formula>,
        op: BinOp,
        right: Box<Formula>,
    },

    /// Unary operation
    Unary { op: UnOp, expr: Box<Formula> },

    /// `(type) expr`: C cast, e.g. `((char*)buf)[0, n - 1]`
    Cast { ty: String, expr: Box<Formula> },

    /// `base[index]`
    Index { base: Box<Formula>, index: Box<Formula> },

    /// `base.field`, or `base->field` when `arrow` is set
    Field {
        base: Box<Formula>,
        field: String,
        arrow: bool,
    },

    /// Predicate invocation, builtin or declared host function
    Call { func: String, args: Vec<Formula> },

    /// `e in Kind`: resource membership test
    InResource { expr: Box<Formula>, kind: String },

    /// `e in [lo, hi]`: inclusive interval membership
    InRange {
        expr: Box<Formula>,
        lo: Box<Formula>,
        hi: Box<Formula>,
    },

    /// `exists|forall [type] var in [lo, hi]: body`
    Quantified {
        quantifier: Quantifier,
        var: String,
        ty: Option<String>,
        lo: Box<Formula>,
        hi: Box<Formula>,
        body: Box<Formula>,
    },
}

/// Quantifier kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quantifier {
    Exists,
    Forall,
}

impl fmt::Display for Quantifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quantifier::Exists => write!(f, "exists"),
            Quantifier::Forall => write!(f, "forall"),
        }
    }
}

/// Binary operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,

    // Comparison
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,

    // Logical
    And,
    Or,
    Implies,
}

impl BinOp {
    pub fn is_logical(self) -> bool {
        matches!(self, BinOp::And | BinOp::Or | BinOp::Implies)
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge
        )
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinOp::Add => write!(f, "+"),
            BinOp::Sub => write!(f, "-"),
            BinOp::Mul => write!(f, "*"),
            BinOp::Div => write!(f, "/"),
            BinOp::Mod => write!(f, "%"),
            BinOp::Eq => write!(f, "=="),
            BinOp::Ne => write!(f, "!="),
            BinOp::Lt => write!(f, "<"),
            BinOp::Gt => write!(f, ">"),
            BinOp::Le => write!(f, "<="),
            BinOp::Ge => write!(f, ">="),
            BinOp::And => write!(f, "and"),
            BinOp::Or => write!(f, "or"),
            BinOp::Implies => write!(f, "implies"),
        }
    }
}

/// Unary operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnOp {
    /// Negation (-)
    Neg,
    /// Logical not
    Not,
    /// Pointer dereference (*p)
    Deref,
    /// Address-of (&x)
    AddrOf,
}

impl fmt::Display for UnOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnOp::Neg => write!(f, "-"),
            UnOp::Not => write!(f, "not "),
            UnOp::Deref => write!(f, "*"),
            UnOp::AddrOf => write!(f, "&"),
        }
    }
}

impl Expr {
    /// Direct sub-formulas, in source order
    pub fn children(&self) -> Vec<&Formula> {
        match self {
            Expr::IntLit(_) | Expr::FloatLit(_) | Expr::BoolLit(_) | Expr::Var(_) | Expr::Return => {
                Vec::new()
            }
            Expr::Primed(e)
            | Expr::Unary { expr: e, .. }
            | Expr::Cast { expr: e, .. }
            | Expr::Field { base: e, .. } => vec![e.as_ref()],
            Expr::InResource { expr, .. } => vec![expr.as_ref()],
            Expr::Binary { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            Expr::Index { base, index } => vec![base.as_ref(), index.as_ref()],
            Expr::Call { args, .. } => args.iter().collect(),
            Expr::InRange { expr, lo, hi } => vec![expr.as_ref(), lo.as_ref(), hi.as_ref()],
            Expr::Quantified { lo, hi, body, .. } => vec![lo.as_ref(), hi.as_ref(), body.as_ref()],
        }
    }

    /// Mutable access to the direct sub-formulas
    pub fn children_mut(&mut self) -> Vec<&mut Formula> {
        match self {
            Expr::IntLit(_) | Expr::FloatLit(_) | Expr::BoolLit(_) | Expr::Var(_) | Expr::Return => {
                Vec::new()
            }
            Expr::Primed(e)
            | Expr::Unary { expr: e, .. }
            | Expr::Cast { expr: e, .. }
            | Expr::Field { base: e, .. } => vec![e.as_mut()],
            Expr::InResource { expr, .. } => vec![expr.as_mut()],
            Expr::Binary { left, right, .. } => vec![left.as_mut(), right.as_mut()],
            Expr::Index { base, index } => vec![base.as_mut(), index.as_mut()],
            Expr::Call { args, .. } => args.iter_mut().collect(),
            Expr::InRange { expr, lo, hi } => vec![expr.as_mut(), lo.as_mut(), hi.as_mut()],
            Expr::Quantified { lo, hi, body, .. } => vec![lo.as_mut(), hi.as_mut(), body.as_mut()],
        }
    }

    /// First `return` reference, if any
    pub fn find_return(this: &Formula) -> Option<&Formula> {
        if matches!(this.node, Expr::Return) {
            return Some(this);
        }
        this.node.children().into_iter().find_map(Expr::find_return)
    }

    /// Every call site in the formula (predicates, builtins and host functions alike)
    pub fn calls(this: &Formula) -> Vec<(&str, usize, Span)> {
        let mut out = Vec::new();
        collect_calls(this, &mut out);
        out
    }

    /// Variables occurring free (not bound by a quantifier)
    pub fn free_vars(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        collect_free_vars(self, &mut Vec::new(), &mut out);
        out
    }

    /// Copy of the formula with every span reset, for structural comparison
    pub fn without_spans(this: &Formula) -> Formula {
        let mut copy = this.clone();
        erase_spans(&mut copy);
        copy
    }
}

fn collect_calls<'a>(f: &'a Formula, out: &mut Vec<(&'a str, usize, Span)>) {
    if let Expr::Call { func, args } = &f.node {
        out.push((func.as_str(), args.len(), f.span));
    }
    for child in f.node.children() {
        collect_calls(child, out);
    }
}

fn collect_free_vars(e: &Expr, bound: &mut Vec<String>, out: &mut BTreeSet<String>) {
    match e {
        Expr::Var(name) => {
            if !bound.iter().any(|b| b == name) {
                out.insert(name.clone());
            }
        }
        Expr::Quantified { var, lo, hi, body, .. } => {
            collect_free_vars(&lo.node, bound, out);
            collect_free_vars(&hi.node, bound, out);
            bound.push(var.clone());
            collect_free_vars(&body.node, bound, out);
            bound.pop();
        }
        other => {
            for child in other.children() {
                collect_free_vars(&child.node, bound, out);
            }
        }
    }
}

fn erase_spans(f: &mut Formula) {
    f.span = Span::SYNTHETIC;
    for child in f.node.children_mut() {
        erase_spans(child);
    }
}

/// Serialisation used in diagnostics. Every compound node is parenthesized so that
/// the output re-parses to the same tree.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::IntLit(n) if *n < 0 => write!(f, "(-{})", n.unsigned_abs()),
            Expr::IntLit(n) => write!(f, "{n}"),
            Expr::FloatLit(x) if x.is_sign_negative() => write!(f, "(-{:?})", -x),
            Expr::FloatLit(x) => write!(f, "{x:?}"),
            Expr::BoolLit(b) => write!(f, "{b}"),
            Expr::Var(name) => write!(f, "{name}"),
            Expr::Return => write!(f, "return"),
            Expr::Primed(e) => write!(f, "{}'", e.node),
            Expr::Binary { left, op, right } => {
                write!(f, "({} {} {})", left.node, op, right.node)
            }
            Expr::Unary { op, expr } => write!(f, "({}{})", op, expr.node),
            Expr::Cast { ty, expr } => write!(f, "(({ty}) {})", expr.node),
            Expr::Index { base, index } => write!(f, "{}[{}]", base.node, index.node),
            Expr::Field { base, field, arrow } => {
                let sep = if *arrow { "->" } else { "." };
                write!(f, "{}{}{}", base.node, sep, field)
            }
            Expr::Call { func, args } => {
                write!(f, "{func}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg.node)?;
                }
                write!(f, ")")
            }
            Expr::InResource { expr, kind } => write!(f, "({} in {})", expr.node, kind),
            Expr::InRange { expr, lo, hi } => {
                write!(f, "({} in [{}, {}])", expr.node, lo.node, hi.node)
            }
            Expr::Quantified {
                quantifier,
                var,
                ty,
                lo,
                hi,
                body,
            } => {
                write!(f, "({quantifier} ")?;
                if let Some(ty) = ty {
                    write!(f, "{ty} ")?;
                }
                write!(f, "{var} in [{}, {}]: {})", lo.node, hi.node, body.node)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str) -> Formula {
        Spanned::synthetic(Expr::Var(name.to_string()))
    }

    fn int(n: i64) -> Formula {
        Spanned::synthetic(Expr::IntLit(n))
    }

    #[test]
    fn test_display_binary_is_parenthesized() {
        let e = Expr::Binary {
            left: Box::new(var("x")),
            op: BinOp::Add,
            right: Box::new(int(1)),
        };
        assert_eq!(e.to_string(), "(x + 1)");
    }

    #[test]
    fn test_display_negative_literal() {
        assert_eq!(Expr::IntLit(-3).to_string(), "(-3)");
        assert_eq!(Expr::FloatLit(1.0).to_string(), "1.0");
    }

    #[test]
    fn test_display_primed_index() {
        let e = Expr::Primed(Box::new(Spanned::synthetic(Expr::Index {
            base: Box::new(var("buf")),
            index: Box::new(int(0)),
        })));
        assert_eq!(e.to_string(), "buf[0]'");
    }

    #[test]
    fn test_free_vars_excludes_bound() {
        let e = Expr::Quantified {
            quantifier: Quantifier::Forall,
            var: "k".to_string(),
            ty: None,
            lo: Box::new(int(0)),
            hi: Box::new(var("n")),
            body: Box::new(Spanned::synthetic(Expr::Index {
                base: Box::new(var("s")),
                index: Box::new(var("k")),
            })),
        };
        let vars: Vec<_> = e.free_vars().into_iter().collect();
        assert_eq!(vars, vec!["n".to_string(), "s".to_string()]);
    }

    #[test]
    fn test_find_return_nested() {
        let f = Spanned::new(
            Expr::Binary {
                left: Box::new(Spanned::new(Expr::Primed(Box::new(var("x"))), Span::new(3, 5))),
                op: BinOp::Eq,
                right: Box::new(Spanned::new(Expr::Return, Span::new(8, 14))),
            },
            Span::new(0, 14),
        );
        assert_eq!(Expr::find_return(&f).map(|r| r.span), Some(Span::new(8, 14)));
        assert!(Expr::find_return(&var("x")).is_none());
    }

    #[test]
    fn test_display_cast() {
        let e = Expr::Cast {
            ty: "char*".to_string(),
            expr: Box::new(var("buf")),
        };
        assert_eq!(e.to_string(), "((char*) buf)");
    }

    #[test]
    fn test_calls_collects_nested() {
        let f = Spanned::synthetic(Expr::Call {
            func: "outer".to_string(),
            args: vec![Spanned::synthetic(Expr::Call {
                func: "inner".to_string(),
                args: vec![var("x"), var("y")],
            })],
        });
        let calls: Vec<_> = Expr::calls(&f).into_iter().map(|(n, a, _)| (n, a)).collect();
        assert_eq!(calls, vec![("outer", 1), ("inner", 2)]);
    }
}
