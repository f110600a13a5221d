//! Load-time well-formedness of a parsed stub file
//!
//! Resolves every name a contract mentions (predicates, builtins, host
//! functions, resource kinds), checks arities, and rejects post-state
//! references outside `ensures`. A file either passes as a whole or is
//! rejected with the first error found.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::ast::{
    Case, Clause, ContractBody, Expr, Formula, FunctionDecl, GlobalDecl, Item, LocalDecl,
    LocalInit, PredicateDef, Signature, Span, Spanned, StubFile, Target,
};
use crate::config::LoaderConfig;
use crate::error::{Result, StubError};
use crate::eval::Builtin;
use crate::predicate::PredicateLibrary;
use crate::repository::Contract;
use crate::util::suggest;

const STACK_RED_ZONE: usize = 64 * 1024;
const STACK_GROW_SIZE: usize = 1024 * 1024;

/// Everything a well-formed stub file contributes
#[derive(Debug, Clone)]
pub struct CheckedFile {
    pub contracts: Vec<Contract>,
    /// Initializers of `global` declarations that carry one
    pub initializers: Vec<Contract>,
    /// Names of every `global` declaration
    pub globals: Vec<String>,
    /// Bodiless `fn` declarations
    pub host_functions: Vec<Signature>,
    pub resource_kinds: Vec<String>,
    pub library: Arc<PredicateLibrary>,
}

/// Where a formula occurs; decides whether post-state references are allowed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    Requires,
    Ensures,
    Assumes,
    Free,
    Assigns,
    Local,
    Predicate,
}

impl Position {
    fn allows_post_state(self) -> bool {
        self == Position::Ensures
    }

    fn describe(self) -> &'static str {
        match self {
            Position::Requires => "`requires`",
            Position::Ensures => "`ensures`",
            Position::Assumes => "`assumes`",
            Position::Free => "`free`",
            Position::Assigns => "`assigns`",
            Position::Local => "a local initializer",
            Position::Predicate => "a predicate body",
        }
    }
}

/// Check a parsed file and build its contracts
pub fn check_file(filename: &str, file: StubFile, config: &LoaderConfig) -> Result<CheckedFile> {
    let mut kinds: HashMap<String, Span> = config
        .resource_kinds
        .iter()
        .map(|k| (k.clone(), Span::SYNTHETIC))
        .collect();
    let mut functions: HashMap<String, Span> = HashMap::new();
    let mut predicate_defs: Vec<PredicateDef> = Vec::new();
    let mut decls: Vec<FunctionDecl> = Vec::new();
    let mut global_decls: Vec<GlobalDecl> = Vec::new();

    for item in file.items {
        match item {
            Item::Resource(decl) => {
                // Pre-declared kinds may be declared again by a file
                if let Some(previous) = kinds.get(&decl.name.node) {
                    if *previous != Span::SYNTHETIC {
                        return Err(StubError::duplicate(
                            decl.name.node.clone(),
                            decl.name.span,
                            *previous,
                        ));
                    }
                }
                kinds.insert(decl.name.node, decl.name.span);
            }
            Item::Predicate(def) => {
                reserved(&def.name)?;
                predicate_defs.push(def);
            }
            Item::Function(decl) => {
                let name = &decl.signature.name;
                reserved(name)?;
                if let Some(previous) = functions.get(&name.node) {
                    return Err(StubError::duplicate(name.node.clone(), name.span, *previous));
                }
                functions.insert(name.node.clone(), name.span);
                decls.push(decl);
            }
            Item::Global(decl) => {
                reserved(&decl.name)?;
                global_decls.push(decl);
            }
        }
    }

    for def in &predicate_defs {
        if let Some(previous) = functions.get(&def.name.node) {
            return Err(StubError::duplicate(def.name.node.clone(), def.name.span, *previous));
        }
    }
    // Globals share the namespace of functions and predicates
    let mut names = functions.clone();
    for def in &predicate_defs {
        names.insert(def.name.node.clone(), def.name.span);
    }
    for decl in &global_decls {
        if let Some(previous) = names.get(&decl.name.node) {
            return Err(StubError::duplicate(decl.name.node.clone(), decl.name.span, *previous));
        }
        names.insert(decl.name.node.clone(), decl.name.span);
    }

    let library = Arc::new(PredicateLibrary::build(&predicate_defs)?);
    let signatures: HashMap<&str, &Signature> = decls
        .iter()
        .map(|d| (d.signature.name.node.as_str(), &d.signature))
        .collect();
    let resolver = Resolver {
        kinds: &kinds,
        library: &library,
        functions: &signatures,
    };

    for def in &predicate_defs {
        resolver.formula(&def.body, Position::Predicate)?;
        resolver.predicate_scope(def)?;
    }

    let mut contracts = Vec::new();
    let mut host_functions = Vec::new();
    for decl in &decls {
        match &decl.body {
            Some(body) => {
                resolver.contract(&decl.signature, body)?;
                contracts.push(Contract::new(
                    decl.signature.clone(),
                    body.clone(),
                    filename.to_string(),
                    Arc::clone(&library),
                ));
            }
            None => host_functions.push(decl.signature.clone()),
        }
    }

    let mut initializers = Vec::new();
    for decl in &global_decls {
        let Some(init) = &decl.init else {
            continue;
        };
        let signature = decl.signature();
        resolver.contract(&signature, init)?;
        resolver.initializer(decl, init)?;
        initializers.push(Contract::new(
            signature,
            init.clone(),
            filename.to_string(),
            Arc::clone(&library),
        ));
    }
    let mut globals: Vec<String> = global_decls.into_iter().map(|d| d.name.node).collect();
    globals.sort();

    let mut resource_kinds: Vec<String> = kinds.into_keys().collect();
    resource_kinds.sort();
    tracing::debug!(
        file = filename,
        contracts = contracts.len(),
        initializers = initializers.len(),
        predicates = library.len(),
        kinds = resource_kinds.len(),
        "stub file checked"
    );
    Ok(CheckedFile {
        contracts,
        initializers,
        globals,
        host_functions,
        resource_kinds,
        library,
    })
}

/// Builtin names cannot be redefined
fn reserved(name: &Spanned<String>) -> Result<()> {
    if Builtin::from_name(&name.node).is_some() {
        return Err(StubError::ill_formed(
            format!("`{}` is a builtin and cannot be redefined", name.node),
            name.span,
        ));
    }
    Ok(())
}

struct Resolver<'a> {
    kinds: &'a HashMap<String, Span>,
    library: &'a PredicateLibrary,
    functions: &'a HashMap<&'a str, &'a Signature>,
}

impl Resolver<'_> {
    fn contract(&self, signature: &Signature, body: &ContractBody) -> Result<()> {
        let mut params: HashMap<&str, Span> = HashMap::new();
        for param in &signature.params {
            if let Some(previous) = params.get(param.name.node.as_str()) {
                return Err(StubError::duplicate(
                    param.name.node.clone(),
                    param.name.span,
                    *previous,
                ));
            }
            params.insert(param.name.node.as_str(), param.name.span);
        }

        let top_locals = self.locals(&params, &body.clauses, &HashMap::new())?;
        self.clauses(&body.clauses)?;

        let mut labels: HashMap<&str, Span> = HashMap::new();
        for case in &body.cases {
            if let Some(previous) = labels.get(case.label.node.as_str()) {
                return Err(StubError::duplicate(
                    case.label.node.clone(),
                    case.label.span,
                    *previous,
                ));
            }
            labels.insert(case.label.node.as_str(), case.label.span);
            self.case(&params, &top_locals, case)?;
        }
        Ok(())
    }

    /// An initializer runs at program start: it has no caller to return to
    fn initializer(&self, decl: &GlobalDecl, init: &ContractBody) -> Result<()> {
        for clause in &init.clauses {
            if let Clause::Ensures(f) = &clause.node {
                if let Some(ret) = Expr::find_return(f) {
                    return Err(StubError::ill_formed(
                        format!("`return` in the initializer of global `{}`", decl.name.node),
                        ret.span,
                    ));
                }
            }
        }
        Ok(())
    }

    /// Predicate bodies may only name their parameters (and resource kinds)
    fn predicate_scope(&self, def: &PredicateDef) -> Result<()> {
        for var in def.body.node.free_vars() {
            let is_param = def.params.iter().any(|p| p.name.node == var);
            if !is_param && !self.kinds.contains_key(&var) {
                return Err(StubError::ill_formed(
                    format!(
                        "predicate `{}` refers to `{var}`, which is not one of its parameters",
                        def.name.node
                    ),
                    def.body.span,
                ));
            }
        }
        Ok(())
    }

    fn case(
        &self,
        params: &HashMap<&str, Span>,
        top_locals: &HashMap<String, Span>,
        case: &Case,
    ) -> Result<()> {
        let case_locals = self.locals(params, &case.clauses, top_locals)?;
        for guard in &case.assumes {
            self.formula(guard, Position::Assumes)?;
            // Guards are decided before the case binds anything
            for var in guard.node.free_vars() {
                if case_locals.contains_key(&var) && !top_locals.contains_key(&var) {
                    return Err(StubError::ill_formed(
                        format!("guard of case \"{}\" refers to case local `{var}`", case.label.node),
                        guard.span,
                    ));
                }
            }
        }
        self.clauses(&case.clauses)
    }

    /// Check the `local` clauses of one scope and return its local names.
    /// An initializer may only refer to locals declared before it.
    fn locals(
        &self,
        params: &HashMap<&str, Span>,
        clauses: &[Spanned<Clause>],
        outer: &HashMap<String, Span>,
    ) -> Result<HashMap<String, Span>> {
        let decls: Vec<&LocalDecl> = clauses
            .iter()
            .filter_map(|c| match &c.node {
                Clause::Local(decl) => Some(decl),
                _ => None,
            })
            .collect();
        let all: BTreeSet<&str> = decls.iter().map(|d| d.name.node.as_str()).collect();

        let mut declared: HashMap<String, Span> = HashMap::new();
        for decl in decls {
            let name = &decl.name;
            if let Some(previous) = params.get(name.node.as_str()) {
                return Err(StubError::duplicate(name.node.clone(), name.span, *previous));
            }
            if let Some(previous) = declared.get(&name.node) {
                return Err(StubError::duplicate(name.node.clone(), name.span, *previous));
            }
            match &decl.init {
                LocalInit::New(kind) => self.kind(&kind.node, kind.span)?,
                LocalInit::Call { func, args } => {
                    self.call(&func.node, args, func.span)?;
                    for arg in args {
                        self.formula(arg, Position::Local)?;
                        for var in arg.node.free_vars() {
                            let later = all.contains(var.as_str())
                                && !declared.contains_key(&var)
                                && !outer.contains_key(&var);
                            if later {
                                return Err(StubError::ill_formed(
                                    format!("local `{var}` is used before its declaration"),
                                    arg.span,
                                ));
                            }
                        }
                    }
                }
            }
            declared.insert(name.node.clone(), name.span);
        }
        Ok(declared)
    }

    fn clauses(&self, clauses: &[Spanned<Clause>]) -> Result<()> {
        for clause in clauses {
            match &clause.node {
                Clause::Requires(f) => self.formula(f, Position::Requires)?,
                Clause::Ensures(f) => self.formula(f, Position::Ensures)?,
                Clause::Free(f) => self.formula(f, Position::Free)?,
                Clause::Assumes(f) => self.formula(f, Position::Assumes)?,
                Clause::Assigns(target) => self.target(target)?,
                Clause::Local(_) | Clause::Unsound(_) => {}
            }
        }
        Ok(())
    }

    fn target(&self, target: &Target) -> Result<()> {
        match target {
            Target::Location(base) | Target::Whole(base) => self.formula(base, Position::Assigns),
            Target::Range { base, lo, hi } => {
                self.formula(base, Position::Assigns)?;
                self.formula(lo, Position::Assigns)?;
                self.formula(hi, Position::Assigns)
            }
        }
    }

    fn formula(&self, f: &Formula, position: Position) -> Result<()> {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || self.formula_inner(f, position))
    }

    fn formula_inner(&self, f: &Formula, position: Position) -> Result<()> {
        match &f.node {
            Expr::Primed(_) if !position.allows_post_state() => {
                return Err(StubError::ill_formed(
                    format!("primed reference `{}` in {}", f.node, position.describe()),
                    f.span,
                ));
            }
            Expr::Return if !position.allows_post_state() => {
                return Err(StubError::ill_formed(
                    format!("`return` in {}", position.describe()),
                    f.span,
                ));
            }
            Expr::InResource { kind, .. } => self.kind(kind, f.span)?,
            Expr::Call { func, args } => {
                self.call(func, args, f.span)?;
                if Builtin::from_name(func).is_some_and(Builtin::takes_kind) {
                    // The kind argument was checked by `call`
                    for arg in &args[..args.len() - 1] {
                        self.formula(arg, position)?;
                    }
                    return Ok(());
                }
            }
            _ => {}
        }
        for child in f.node.children() {
            self.formula(child, position)?;
        }
        Ok(())
    }

    /// Resolve a call: builtins, then predicates, then declared functions
    fn call(&self, func: &str, args: &[Formula], span: Span) -> Result<()> {
        if let Some(builtin) = Builtin::from_name(func) {
            if args.len() != builtin.arity() {
                return Err(StubError::arity(func, builtin.arity(), args.len(), span));
            }
            if builtin.takes_kind() {
                let last = &args[args.len() - 1];
                let Expr::Var(kind) = &last.node else {
                    return Err(StubError::ill_formed(
                        format!("`{func}` expects a resource kind, got `{}`", last.node),
                        last.span,
                    ));
                };
                self.kind(kind, last.span)?;
            }
            return Ok(());
        }
        if let Some(predicate) = self.library.get(func) {
            if predicate.arity() != args.len() {
                return Err(StubError::arity(func, predicate.arity(), args.len(), span));
            }
            return Ok(());
        }
        if let Some(signature) = self.functions.get(func) {
            if !signature.accepts(args.len()) {
                return Err(StubError::arity(func, signature.params.len(), args.len(), span));
            }
            return Ok(());
        }
        let candidates = Builtin::ALL
            .iter()
            .map(|b| b.name())
            .chain(self.library.names())
            .chain(self.functions.keys().copied());
        Err(StubError::unresolved(func, span, suggest(func, candidates)))
    }

    fn kind(&self, kind: &str, span: Span) -> Result<()> {
        if self.kinds.contains_key(kind) {
            return Ok(());
        }
        let suggestion = suggest(kind, self.kinds.keys().map(String::as_str));
        Err(StubError::unknown_kind(kind, span, suggestion))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::parse;

    fn check(source: &str) -> Result<CheckedFile> {
        check_with(source, &LoaderConfig::default())
    }

    fn check_with(source: &str, config: &LoaderConfig) -> Result<CheckedFile> {
        let file = parse("test.stub", source, tokenize(source)?)?;
        check_file("test.stub", file, config)
    }

    #[test]
    fn test_well_formed_file() {
        let checked = check(
            r#"
            resource FileDescriptor;
            predicate valid_fd(fd): fd in FileDescriptor;
            fn _stub_fd_to_int(void* fd) -> int;

            fn close(int fd) -> int {
                requires: valid_fd(fd);
                free: fd;
                ensures: return == 0;
            }
            "#,
        )
        .unwrap();
        assert_eq!(checked.contracts.len(), 1);
        assert_eq!(checked.host_functions.len(), 1);
        assert_eq!(checked.resource_kinds, vec!["FileDescriptor".to_string()]);
        assert!(checked.library.contains("valid_fd"));
    }

    #[test]
    fn test_unknown_kind_suggests() {
        let err = check(
            "resource FileDescriptor;
             fn close(int fd) { requires: fd in FileDescriptr; }",
        )
        .unwrap_err();
        assert_eq!(err.kind(), "UnknownResourceKind");
        assert!(err.message().contains("did you mean `FileDescriptor`?"));
    }

    #[test]
    fn test_configured_kind_is_known() {
        let config = LoaderConfig::default().resource_kind("Memory");
        let source = "fn malloc(int n) -> void* { local: void* p = new Memory; ensures: return == p; }";
        assert!(check_with(source, &config).is_ok());
        assert!(check(source).is_err());
    }

    #[test]
    fn test_alive_resource_kind_checked() {
        let err = check("fn f(h) { requires: alive_resource(h, Socket); }").unwrap_err();
        assert_eq!(err.kind(), "UnknownResourceKind");

        let err = check("resource Socket; fn f(h) { requires: alive_resource(h, 3); }").unwrap_err();
        assert_eq!(err.kind(), "IllFormedContract");
    }

    #[test]
    fn test_primed_outside_ensures() {
        let err = check("fn f(int* p) { requires: *p' > 0; }").unwrap_err();
        assert!(matches!(err, StubError::IllFormedContract { .. }));
        assert!(err.message().contains("`requires`"));

        let err = check("predicate p(x): x' == 0;").unwrap_err();
        assert!(err.message().contains("a predicate body"));
    }

    #[test]
    fn test_return_outside_ensures() {
        let err = check(r#"fn f() -> int { case "a" { assumes: return > 0; } }"#).unwrap_err();
        assert_eq!(err.message(), "`return` in `assumes`");
    }

    #[test]
    fn test_unresolved_call() {
        let err = check("fn f(s) { requires: valid_strng(s); }").unwrap_err();
        assert_eq!(err.kind(), "UnresolvedReference");
        assert!(err.message().contains("did you mean `valid_string`?"));
    }

    #[test]
    fn test_arity_mismatches() {
        let err = check("predicate p(x): x > 0; fn f(a) { requires: p(a, a); }").unwrap_err();
        assert!(matches!(err, StubError::ArityMismatch { expected: 1, got: 2, .. }));

        let err = check("fn f(a) { requires: size(a, a) > 0; }").unwrap_err();
        assert!(matches!(err, StubError::ArityMismatch { expected: 1, got: 2, .. }));

        let err = check("fn g(a, ...) -> int; fn f(a) { requires: g() > 0; }").unwrap_err();
        assert!(matches!(err, StubError::ArityMismatch { expected: 1, got: 0, .. }));
        assert!(check("fn g(a, ...) -> int; fn f(a) { requires: g(a, a, a) > 0; }").is_ok());
    }

    #[test]
    fn test_duplicates() {
        let err = check("fn f(a); fn f(b);").unwrap_err();
        assert_eq!(err.kind(), "DuplicateDefinition");

        let err = check("resource R; resource R;").unwrap_err();
        assert_eq!(err.kind(), "DuplicateDefinition");

        let err = check("predicate f(x): x > 0; fn f(a);").unwrap_err();
        assert_eq!(err.kind(), "DuplicateDefinition");

        let err = check(r#"fn f() { case "a" {} case "a" {} }"#).unwrap_err();
        assert!(matches!(err, StubError::DuplicateDefinition { ref name, .. } if name == "a"));

        let err = check("resource R; fn f(p) { local: p = new R; }").unwrap_err();
        assert_eq!(err.kind(), "DuplicateDefinition");
    }

    #[test]
    fn test_builtin_cannot_be_redefined() {
        let err = check("predicate size(x): x > 0;").unwrap_err();
        assert_eq!(err.message(), "`size` is a builtin and cannot be redefined");
    }

    #[test]
    fn test_local_used_before_declaration() {
        let err = check(
            "fn id(x) -> int;
             fn f() { local: a = id(b); local: b = id(1); }",
        )
        .unwrap_err();
        assert_eq!(err.message(), "local `b` is used before its declaration");
    }

    #[test]
    fn test_case_local_may_override() {
        let source = r#"
            resource R;
            fn f() {
                local: h = new R;
                case "again" {
                    local: h = new R;
                    ensures: return == h;
                }
            }
        "#;
        assert!(check(source).is_ok());
    }

    #[test]
    fn test_guard_cannot_see_case_local() {
        let err = check(
            r#"resource R; fn f() { case "a" { assumes: h in R; local: h = new R; } }"#,
        )
        .unwrap_err();
        assert!(err.message().contains("case local `h`"));
    }

    #[test]
    fn test_predicate_body_names_only_parameters() {
        let err = check("predicate positive(x): x > limit;").unwrap_err();
        assert_eq!(
            err.message(),
            "predicate `positive` refers to `limit`, which is not one of its parameters"
        );

        let ok = check(
            "resource Memory;
             predicate live(p): alive_resource(p, Memory) and p in Memory;
             predicate terminated(s): exists k in [0, size(s) - 1]: s[k] == 0;",
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn test_global_initializer() {
        let checked = check(
            "resource ReadOnlyString;
             global int _errno;
             global const char* program_invocation_name {
                 local: char* addr = new ReadOnlyString;
                 assigns: program_invocation_name;
                 ensures: program_invocation_name' == addr;
             }",
        )
        .unwrap();
        assert_eq!(checked.globals, vec!["_errno", "program_invocation_name"]);
        assert_eq!(checked.initializers.len(), 1);
        assert!(checked.contracts.is_empty());
        let init = &checked.initializers[0];
        assert_eq!(init.name(), "program_invocation_name");
        assert_eq!(init.signature().ret.as_deref(), Some("const char*"));
    }

    #[test]
    fn test_global_initializer_rejects_return() {
        let err = check("global int counter { ensures: counter' == return; }").unwrap_err();
        assert_eq!(err.message(), "`return` in the initializer of global `counter`");
    }

    #[test]
    fn test_global_name_clashes() {
        let err = check("global int f; fn f(a);").unwrap_err();
        assert_eq!(err.kind(), "DuplicateDefinition");
        let err = check("global int g; global long g;").unwrap_err();
        assert_eq!(err.kind(), "DuplicateDefinition");
    }

    #[test]
    fn test_predicate_cycle_rejected() {
        let err = check("predicate a(x): b(x); predicate b(x): a(x);").unwrap_err();
        assert_eq!(err.kind(), "RecursivePredicate");
    }
}
