//! Predicate library: named formulas shared by the contracts of one stub file
//!
//! Invocations are expanded by capture-avoiding substitution of the call
//! arguments into the stored body. Recursion is rejected when the library is
//! built, so expansion always terminates.

use std::collections::{BTreeMap, HashMap};

use crate::ast::{Expr, Formula, PredicateDef, Span, Spanned, substitute};
use crate::error::{Result, StubError};
use crate::util::suggest;

/// A stored predicate definition
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub name: Spanned<String>,
    pub params: Vec<String>,
    pub body: Formula,
}

impl Predicate {
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Names of the predicates of `library` invoked directly by the body
    fn callees<'a>(&'a self, library: &PredicateLibrary) -> Vec<&'a str> {
        let mut out: Vec<&str> = Expr::calls(&self.body)
            .into_iter()
            .map(|(name, _, _)| name)
            .filter(|name| library.contains(name))
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }
}

/// Predicates of one scope, keyed by name
#[derive(Debug, Clone, Default)]
pub struct PredicateLibrary {
    predicates: BTreeMap<String, Predicate>,
}

impl PredicateLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define every predicate, then reject invocation cycles
    pub fn build<'a>(defs: impl IntoIterator<Item = &'a PredicateDef>) -> Result<Self> {
        let mut library = Self::new();
        for def in defs {
            library.define(
                def.name.clone(),
                def.params.iter().map(|p| p.name.node.clone()).collect(),
                def.body.clone(),
            )?;
        }
        library.check_acyclic()?;
        Ok(library)
    }

    /// Register a predicate
    pub fn define(&mut self, name: Spanned<String>, params: Vec<String>, body: Formula) -> Result<()> {
        if let Some(previous) = self.predicates.get(&name.node) {
            return Err(StubError::duplicate(
                name.node.clone(),
                name.span,
                previous.name.span,
            ));
        }
        for (i, param) in params.iter().enumerate() {
            if params[..i].contains(param) {
                return Err(StubError::duplicate(param.clone(), name.span, name.span));
            }
        }
        tracing::trace!(predicate = %name.node, arity = params.len(), "defining predicate");
        self.predicates.insert(
            name.node.clone(),
            Predicate { name, params, body },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Predicate> {
        self.predicates.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.predicates.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.predicates.keys().map(String::as_str)
    }

    /// Instantiate `name` with `args`
    pub fn resolve(&self, name: &str, args: &[Formula], span: Span) -> Result<Formula> {
        let Some(predicate) = self.predicates.get(name) else {
            return Err(StubError::unresolved(name, span, suggest(name, self.names())));
        };
        if predicate.arity() != args.len() {
            return Err(StubError::arity(name, predicate.arity(), args.len(), span));
        }
        let bindings: HashMap<String, Formula> = predicate
            .params
            .iter()
            .cloned()
            .zip(args.iter().cloned())
            .collect();
        Ok(substitute(&predicate.body, &bindings))
    }

    /// Depth-first search over invocation edges; a back edge is a cycle
    pub fn check_acyclic(&self) -> Result<()> {
        let mut state: HashMap<&str, Visit> = HashMap::new();
        let mut path: Vec<&str> = Vec::new();
        for name in self.predicates.keys() {
            self.visit(name, &mut state, &mut path)?;
        }
        Ok(())
    }

    fn visit<'a>(
        &'a self,
        name: &'a str,
        state: &mut HashMap<&'a str, Visit>,
        path: &mut Vec<&'a str>,
    ) -> Result<()> {
        match state.get(name) {
            Some(Visit::Done) => return Ok(()),
            Some(Visit::OnPath) => {
                let start = path.iter().position(|n| *n == name).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].iter().map(|n| n.to_string()).collect();
                cycle.push(name.to_string());
                let span = self
                    .predicates
                    .get(path[start])
                    .map_or(Span::SYNTHETIC, |p| p.name.span);
                return Err(StubError::recursive(cycle, span));
            }
            None => {}
        }
        let Some(predicate) = self.predicates.get(name) else {
            return Ok(());
        };
        state.insert(name, Visit::OnPath);
        path.push(name);
        for callee in predicate.callees(self) {
            self.visit(callee, state, path)?;
        }
        path.pop();
        state.insert(name, Visit::Done);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    OnPath,
    Done,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Item;
    use crate::lexer::tokenize;
    use crate::parser::{parse, parse_formula};

    fn library(source: &str) -> Result<PredicateLibrary> {
        let file = parse("preds.stub", source, tokenize(source)?)?;
        let defs: Vec<&PredicateDef> = file
            .items
            .iter()
            .filter_map(|item| match item {
                Item::Predicate(p) => Some(p),
                _ => None,
            })
            .collect();
        PredicateLibrary::build(defs)
    }

    fn args(sources: &[&str]) -> Vec<Formula> {
        sources.iter().map(|s| parse_formula(s).unwrap()).collect()
    }

    #[test]
    fn test_resolve_substitutes_arguments() {
        let lib = library("predicate in_bounds(i, n): i >= 0 and i < n;").unwrap();
        let f = lib
            .resolve("in_bounds", &args(&["k + 1", "size(buf)"]), Span::SYNTHETIC)
            .unwrap();
        assert_eq!(f.node.to_string(), "(((k + 1) >= 0) and ((k + 1) < size(buf)))");
    }

    #[test]
    fn test_resolve_avoids_capture() {
        let lib = library("predicate has_zero(s, n): exists k in [0, n]: s[k] == 0;").unwrap();
        let f = lib
            .resolve("has_zero", &args(&["buf", "k"]), Span::SYNTHETIC)
            .unwrap();
        assert_eq!(f.node.to_string(), "(exists k_1 in [0, k]: (buf[k_1] == 0))");
    }

    #[test]
    fn test_resolve_arity_mismatch() {
        let lib = library("predicate valid_fd(fd): fd >= 0;").unwrap();
        let err = lib
            .resolve("valid_fd", &args(&["a", "b"]), Span::new(4, 9))
            .unwrap_err();
        assert!(matches!(err, StubError::ArityMismatch { expected: 1, got: 2, .. }));
    }

    #[test]
    fn test_resolve_unknown_suggests() {
        let lib = library("predicate valid_fd(fd): fd >= 0;").unwrap();
        let err = lib.resolve("valid_fdd", &[], Span::SYNTHETIC).unwrap_err();
        assert!(err.message().contains("did you mean `valid_fd`?"));
    }

    #[test]
    fn test_define_duplicate() {
        let err = library("predicate p(x): x > 0; predicate p(y): y < 0;").unwrap_err();
        assert!(matches!(err, StubError::DuplicateDefinition { ref name, .. } if name == "p"));
    }

    #[test]
    fn test_self_recursion_rejected() {
        let err = library("predicate loop_(x): loop_(x - 1);").unwrap_err();
        assert_eq!(err.message(), "predicate cycle: loop_ -> loop_");
    }

    #[test]
    fn test_mutual_recursion_reports_cycle() {
        let err = library(
            "predicate a(x): b(x) or x == 0;
             predicate b(x): c(x);
             predicate c(x): a(x - 1);",
        )
        .unwrap_err();
        assert_eq!(err.message(), "predicate cycle: a -> b -> c -> a");
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let lib = library(
            "predicate base(x): x > 0;
             predicate left(x): base(x);
             predicate right(x): base(x + 1);
             predicate top(x): left(x) and right(x);",
        )
        .unwrap();
        assert_eq!(lib.len(), 4);
    }

    #[test]
    fn test_calls_to_builtins_are_not_edges() {
        let lib = library("predicate valid_buf(p, n): valid_ptr(p) and size(p) >= n;").unwrap();
        assert_eq!(lib.get("valid_buf").unwrap().callees(&lib), Vec::<&str>::new());
    }
}
