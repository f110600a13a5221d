//! Abstract Syntax Tree of stub files

mod expr;
mod span;
mod subst;

pub use expr::*;
pub use span::*;
pub use subst::substitute;

use std::fmt;

use serde::{Deserialize, Serialize};

/// A stub file is a sequence of top-level items
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StubFile {
    pub items: Vec<Item>,
}

/// Top-level item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Item {
    /// `resource Kind;`
    Resource(ResourceDecl),
    /// `predicate name(params): formula;`
    Predicate(PredicateDef),
    /// `fn name(params) -> ty { ... }` or a bodiless host function declaration
    Function(FunctionDecl),
    /// `global type name;`, optionally with an initializer contract
    Global(GlobalDecl),
}

/// Declaration of an abstract resource kind
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDecl {
    pub name: Spanned<String>,
}

/// Named reusable formula
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredicateDef {
    pub name: Spanned<String>,
    pub params: Vec<Param>,
    pub body: Formula,
    pub span: Span,
}

/// Function signature plus its contract, if it has one
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub signature: Signature,
    /// `None` for host functions declared without a contract
    pub body: Option<ContractBody>,
}

/// Global variable of the modelled library. The initializer describes the
/// value the variable holds at program start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalDecl {
    pub name: Spanned<String>,
    pub ty: Option<String>,
    /// Clauses without cases; `None` for a plain declaration
    pub init: Option<ContractBody>,
    pub span: Span,
}

impl GlobalDecl {
    /// Parameterless signature under which the initializer is evaluated
    pub fn signature(&self) -> Signature {
        Signature {
            name: self.name.clone(),
            params: Vec::new(),
            variadic: false,
            ret: self.ty.clone(),
            span: self.span,
        }
    }
}

/// Function signature used for contract lookup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    pub name: Spanned<String>,
    pub params: Vec<Param>,
    pub variadic: bool,
    pub ret: Option<String>,
    pub span: Span,
}

impl Signature {
    /// Whether a call with `argc` arguments matches this signature
    pub fn accepts(&self, argc: usize) -> bool {
        if self.variadic {
            argc >= self.params.len()
        } else {
            argc == self.params.len()
        }
    }

    pub fn has_param(&self, name: &str) -> bool {
        self.params.iter().any(|p| p.name.node == name)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name.node)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{param}")?;
        }
        if self.variadic {
            if !self.params.is_empty() {
                write!(f, ", ")?;
            }
            write!(f, "...")?;
        }
        write!(f, ")")?;
        if let Some(ret) = &self.ret {
            write!(f, " -> {ret}")?;
        }
        Ok(())
    }
}

/// Formal parameter, optionally typed (`const char* path`, `int fd`, `fd`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: Spanned<String>,
    pub ty: Option<String>,
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ty {
            Some(ty) => write!(f, "{ty} {}", self.name.node),
            None => write!(f, "{}", self.name.node),
        }
    }
}

/// Clauses of a contract: the top-level ones followed by the cases
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContractBody {
    pub clauses: Vec<Spanned<Clause>>,
    pub cases: Vec<Case>,
}

/// One declarative statement of a contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Clause {
    /// `requires: formula;` must hold at call time
    Requires(Formula),
    /// `local: [type] name = init;`
    Local(LocalDecl),
    /// `assigns: target;`
    Assigns(Target),
    /// `ensures: formula;` holds after the call
    Ensures(Formula),
    /// `free: expr;` retires a resource handle
    Free(Formula),
    /// `assumes: formula;` guard of a case
    Assumes(Formula),
    /// `unsound: "message";` documented imprecision of the stub
    Unsound(String),
}

impl Clause {
    pub fn keyword(&self) -> &'static str {
        match self {
            Clause::Requires(_) => "requires",
            Clause::Local(_) => "local",
            Clause::Assigns(_) => "assigns",
            Clause::Ensures(_) => "ensures",
            Clause::Free(_) => "free",
            Clause::Assumes(_) => "assumes",
            Clause::Unsound(_) => "unsound",
        }
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Clause::Requires(e) | Clause::Ensures(e) | Clause::Free(e) | Clause::Assumes(e) => {
                write!(f, "{}: {};", self.keyword(), e.node)
            }
            Clause::Local(local) => write!(f, "local: {local};"),
            Clause::Assigns(target) => write!(f, "assigns: {target};"),
            Clause::Unsound(msg) => write!(f, "unsound: {msg:?};"),
        }
    }
}

/// Labelled, guarded outcome alternative
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Case {
    pub label: Spanned<String>,
    /// Conjunction of the `assumes` guards; empty means `true`
    pub assumes: Vec<Formula>,
    pub clauses: Vec<Spanned<Clause>>,
    pub span: Span,
}

/// `local:` declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalDecl {
    pub name: Spanned<String>,
    pub ty: Option<String>,
    pub init: LocalInit,
}

impl fmt::Display for LocalDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ty) = &self.ty {
            write!(f, "{ty} ")?;
        }
        write!(f, "{} = {}", self.name.node, self.init)
    }
}

/// Initializer of a local
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LocalInit {
    /// `new Kind`: mint a fresh resource handle
    New(Spanned<String>),
    /// `f(args)`: call of a host function or builtin
    Call { func: Spanned<String>, args: Vec<Formula> },
}

impl fmt::Display for LocalInit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocalInit::New(kind) => write!(f, "new {}", kind.node),
            LocalInit::Call { func, args } => {
                write!(f, "{}(", func.node)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg.node)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Write target of an `assigns` clause
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Target {
    /// Single location: `x`, `*p`, `p->f`, `a[i]`
    Location(Formula),
    /// Inclusive array range: `a[lo, hi]`
    Range { base: Formula, lo: Formula, hi: Formula },
    /// Everything reachable from the base: `p[..]`
    Whole(Formula),
}

impl Target {
    pub fn base(&self) -> &Formula {
        match self {
            Target::Location(base) | Target::Whole(base) | Target::Range { base, .. } => base,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Location(e) => write!(f, "{}", e.node),
            Target::Range { base, lo, hi } => write!(f, "{}[{}, {}]", base.node, lo.node, hi.node),
            Target::Whole(base) => write!(f, "{}[..]", base.node),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param(name: &str) -> Param {
        Param {
            name: Spanned::synthetic(name.to_string()),
            ty: Some("int".to_string()),
        }
    }

    fn signature(params: Vec<Param>, variadic: bool) -> Signature {
        Signature {
            name: Spanned::synthetic("open".to_string()),
            params,
            variadic,
            ret: Some("int".to_string()),
            span: Span::SYNTHETIC,
        }
    }

    #[test]
    fn test_signature_accepts_exact_arity() {
        let sig = signature(vec![param("a"), param("b")], false);
        assert!(sig.accepts(2));
        assert!(!sig.accepts(1));
        assert!(!sig.accepts(3));
    }

    #[test]
    fn test_signature_accepts_variadic() {
        let sig = signature(vec![param("path"), param("flags")], true);
        assert!(!sig.accepts(1));
        assert!(sig.accepts(2));
        assert!(sig.accepts(5));
    }

    #[test]
    fn test_signature_display() {
        let sig = signature(vec![param("path"), param("flags")], true);
        assert_eq!(sig.to_string(), "open(int path, int flags, ...) -> int");
    }

    #[test]
    fn test_target_display() {
        let base = Spanned::synthetic(Expr::Var("buf".to_string()));
        let whole = Target::Whole(base.clone());
        assert_eq!(whole.to_string(), "buf[..]");
        let range = Target::Range {
            base,
            lo: Spanned::synthetic(Expr::IntLit(0)),
            hi: Spanned::synthetic(Expr::Var("n".to_string())),
        };
        assert_eq!(range.to_string(), "buf[0, n]");
    }

    #[test]
    fn test_local_display() {
        let local = LocalDecl {
            name: Spanned::synthetic("fd".to_string()),
            ty: Some("void*".to_string()),
            init: LocalInit::New(Spanned::synthetic("FileDescriptor".to_string())),
        };
        assert_eq!(local.to_string(), "void* fd = new FileDescriptor");
    }
}
