//! Capture-avoiding substitution over formulas
//!
//! Used to instantiate predicate bodies with call arguments. Replacement
//! formulas keep their own spans, so diagnostics on an instantiated body
//! point at the argument text of the call site.

use std::collections::{BTreeSet, HashMap};

use super::{Expr, Formula, Spanned};

/// Simultaneously replace free occurrences of the mapped variables
pub fn substitute(f: &Formula, bindings: &HashMap<String, Formula>) -> Formula {
    let mut counter = 0usize;
    subst(f, bindings, &mut counter)
}

fn subst(f: &Formula, map: &HashMap<String, Formula>, counter: &mut usize) -> Formula {
    if map.is_empty() {
        return f.clone();
    }
    match &f.node {
        Expr::Var(name) => map.get(name).cloned().unwrap_or_else(|| f.clone()),
        Expr::Quantified {
            quantifier,
            var,
            ty,
            lo,
            hi,
            body,
        } => {
            let lo = subst(lo, map, counter);
            let hi = subst(hi, map, counter);

            let mut inner = map.clone();
            inner.remove(var);
            let replacement_vars: BTreeSet<String> = inner
                .values()
                .flat_map(|r| r.node.free_vars())
                .collect();

            let bound = if replacement_vars.contains(var) {
                let mut avoid = replacement_vars;
                avoid.extend(body.node.free_vars());
                let renamed = fresh_name(var, &avoid, counter);
                inner.insert(var.clone(), Spanned::new(Expr::Var(renamed.clone()), f.span));
                renamed
            } else {
                var.clone()
            };

            let body = subst(body, &inner, counter);
            Spanned::new(
                Expr::Quantified {
                    quantifier: *quantifier,
                    var: bound,
                    ty: ty.clone(),
                    lo: Box::new(lo),
                    hi: Box::new(hi),
                    body: Box::new(body),
                },
                f.span,
            )
        }
        _ => {
            let mut copy = f.clone();
            for child in copy.node.children_mut() {
                let replaced = subst(child, map, counter);
                *child = replaced;
            }
            copy
        }
    }
}

fn fresh_name(base: &str, avoid: &BTreeSet<String>, counter: &mut usize) -> String {
    loop {
        *counter += 1;
        let candidate = format!("{base}_{counter}");
        if !avoid.contains(&candidate) {
            return candidate;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinOp, Quantifier, Span};

    fn var(name: &str) -> Formula {
        Spanned::synthetic(Expr::Var(name.to_string()))
    }

    fn bin(l: Formula, op: BinOp, r: Formula) -> Formula {
        Spanned::synthetic(Expr::Binary {
            left: Box::new(l),
            op,
            right: Box::new(r),
        })
    }

    fn forall(v: &str, hi: Formula, body: Formula) -> Formula {
        Spanned::synthetic(Expr::Quantified {
            quantifier: Quantifier::Forall,
            var: v.to_string(),
            ty: None,
            lo: Box::new(Spanned::synthetic(Expr::IntLit(0))),
            hi: Box::new(hi),
            body: Box::new(body),
        })
    }

    #[test]
    fn test_substitute_free_variable() {
        let body = bin(var("p"), BinOp::Gt, Spanned::synthetic(Expr::IntLit(0)));
        let map = HashMap::from([("p".to_string(), var("x"))]);
        assert_eq!(substitute(&body, &map).node.to_string(), "(x > 0)");
    }

    #[test]
    fn test_substitute_keeps_argument_span() {
        let arg = Spanned::new(Expr::Var("fd".to_string()), Span::new(40, 42));
        let map = HashMap::from([("p".to_string(), arg)]);
        let out = substitute(&var("p"), &map);
        assert_eq!(out.span, Span::new(40, 42));
    }

    #[test]
    fn test_substitute_skips_bound_variable() {
        // forall k in [0, n]: k < n   with k := 7 leaves the body alone
        let f = forall("k", var("n"), bin(var("k"), BinOp::Lt, var("n")));
        let map = HashMap::from([("k".to_string(), Spanned::synthetic(Expr::IntLit(7)))]);
        assert_eq!(substitute(&f, &map).node.to_string(), "(forall k in [0, n]: (k < n))");
    }

    #[test]
    fn test_substitute_avoids_capture() {
        // forall k in [0, n]: s[k] == p   with p := k must not capture the argument k
        let body = bin(
            Spanned::synthetic(Expr::Index {
                base: Box::new(var("s")),
                index: Box::new(var("k")),
            }),
            BinOp::Eq,
            var("p"),
        );
        let f = forall("k", var("n"), body);
        let map = HashMap::from([("p".to_string(), var("k"))]);
        let out = substitute(&f, &map);
        assert_eq!(out.node.to_string(), "(forall k_1 in [0, n]: (s[k_1] == k))");
        assert!(out.node.free_vars().contains("k"));
    }

    #[test]
    fn test_fresh_name_skips_taken() {
        let avoid = BTreeSet::from(["k_1".to_string()]);
        let mut counter = 0;
        assert_eq!(fresh_name("k", &avoid, &mut counter), "k_2");
    }
}
