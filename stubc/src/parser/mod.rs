//! Recursive-descent parser for stub files
//!
//! Precedence, loosest first: `implies`/`=>` (right associative), `or`/`||`,
//! `and`/`&&`, `not`, comparisons and `in`, `+ -`, `* / %`, prefix
//! `- ! * &`, postfix `[i] .f ->f '`.

use crate::ast::{
    BinOp, Case, Clause, ContractBody, Expr, Formula, FunctionDecl, GlobalDecl, Item, LocalDecl,
    LocalInit, Param, PredicateDef, Quantifier, ResourceDecl, Signature, Span, Spanned, StubFile,
    Target, UnOp,
};
use crate::error::{Result, StubError};
use crate::lexer::{Token, tokenize};


/// Parse a token stream into a stub file
pub fn parse(filename: &str, source: &str, tokens: Vec<(Token, Span)>) -> Result<StubFile> {
    tracing::trace!(file = filename, tokens = tokens.len(), "parsing stub file");
    let mut parser = Parser::new(tokens, source.len());
    let mut items = Vec::new();
    while !parser.at_end() {
        items.push(parser.item()?);
    }
    Ok(StubFile { items })
}

/// Parse a single formula, e.g. one clause body printed in a diagnostic
pub fn parse_formula(source: &str) -> Result<Formula> {
    let tokens = tokenize(source)?;
    let mut parser = Parser::new(tokens, source.len());
    let formula = parser.formula()?;
    if let Some((tok, span)) = parser.peek_full() {
        return Err(StubError::parse(
            format!("unexpected `{tok}` after formula"),
            *span,
        ));
    }
    Ok(formula)
}

/// C type words that make `(word)` a cast rather than a parenthesized variable
const TYPE_WORDS: &[&str] = &[
    "void", "char", "short", "int", "long", "float", "double", "signed", "unsigned", "const",
    "struct", "union", "enum", "size_t", "ssize_t", "off_t", "ptrdiff_t", "intptr_t",
    "uintptr_t", "wchar_t",
];

/// Suffix allowed only at the end of an `assigns` target
enum TargetSuffix {
    Range(Formula, Formula),
    Whole,
}

struct Parser {
    tokens: Vec<(Token, Span)>,
    pos: usize,
    eof: Span,
}

impl Parser {
    fn new(tokens: Vec<(Token, Span)>, source_len: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            eof: Span::new(source_len, source_len),
        }
    }

    // ------------------------------------------------------------------
    // Token plumbing
    // ------------------------------------------------------------------

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_full(&self) -> Option<&(Token, Span)> {
        self.tokens.get(self.pos)
    }

    fn peek_span(&self) -> Span {
        self.tokens.get(self.pos).map_or(self.eof, |(_, s)| *s)
    }

    fn prev_end(&self) -> usize {
        if self.pos == 0 {
            0
        } else {
            self.tokens[self.pos - 1].1.end
        }
    }

    fn span_from(&self, start: usize) -> Span {
        Span::new(start, self.prev_end().max(start))
    }

    fn advance(&mut self) -> Option<(Token, Span)> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, expected: &Token) -> bool {
        self.peek() == Some(expected)
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.check(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error_here(&self, expected: &str) -> StubError {
        match self.peek_full() {
            Some((tok, span)) => StubError::parse(format!("expected {expected}, found `{tok}`"), *span),
            None => StubError::parse(format!("expected {expected}, found end of file"), self.eof),
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<Span> {
        if self.check(expected) {
            let span = self.peek_span();
            self.pos += 1;
            Ok(span)
        } else {
            Err(self.error_here(&format!("`{expected}`")))
        }
    }

    fn ident(&mut self) -> Result<Spanned<String>> {
        match self.peek_full() {
            Some((Token::Ident(name), span)) => {
                let out = Spanned::new(name.clone(), *span);
                self.pos += 1;
                Ok(out)
            }
            _ => Err(self.error_here("identifier")),
        }
    }

    /// Clause keywords are valid function names: `fn free(void* p)`
    fn function_name(&mut self) -> Result<Spanned<String>> {
        if let Some((tok, span)) = self.peek_full() {
            if matches!(
                tok,
                Token::Free | Token::Local | Token::New | Token::Case | Token::Unsound
            ) {
                let out = Spanned::new(tok.to_string(), *span);
                self.pos += 1;
                return Ok(out);
            }
        }
        self.ident()
    }

    fn string_lit(&mut self, what: &str) -> Result<Spanned<String>> {
        match self.peek_full() {
            Some((Token::StringLit(text), span)) => {
                let out = Spanned::new(text.clone(), *span);
                self.pos += 1;
                Ok(out)
            }
            _ => Err(self.error_here(what)),
        }
    }

    // ------------------------------------------------------------------
    // Items
    // ------------------------------------------------------------------

    fn item(&mut self) -> Result<Item> {
        match self.peek() {
            Some(Token::Resource) => {
                self.advance();
                let name = self.ident()?;
                self.expect(&Token::Semi)?;
                Ok(Item::Resource(ResourceDecl { name }))
            }
            Some(Token::Predicate) => self.predicate().map(Item::Predicate),
            Some(Token::Fn) => self.function().map(Item::Function),
            Some(Token::Global) => self.global().map(Item::Global),
            _ => Err(self.error_here("`resource`, `predicate`, `fn` or `global`")),
        }
    }

    fn predicate(&mut self) -> Result<PredicateDef> {
        let start = self.expect(&Token::Predicate)?.start;
        let name = self.ident()?;
        self.expect(&Token::LParen)?;
        let (params, variadic) = self.params()?;
        if variadic {
            return Err(StubError::parse(
                format!("predicate `{}` cannot be variadic", name.node),
                self.span_from(start),
            ));
        }
        self.expect(&Token::Colon)?;
        let body = self.formula()?;
        self.expect(&Token::Semi)?;
        Ok(PredicateDef {
            name,
            params,
            body,
            span: self.span_from(start),
        })
    }

    fn function(&mut self) -> Result<FunctionDecl> {
        let start = self.expect(&Token::Fn)?.start;
        let name = self.function_name()?;
        self.expect(&Token::LParen)?;
        let (params, variadic) = self.params()?;
        let ret = if self.eat(&Token::Arrow) {
            let words = self.type_words(&[Token::Semi, Token::LBrace])?;
            Some(words)
        } else {
            None
        };
        let signature = Signature {
            name,
            params,
            variadic,
            ret,
            span: self.span_from(start),
        };

        if self.eat(&Token::Semi) {
            return Ok(FunctionDecl {
                signature,
                body: None,
            });
        }
        self.expect(&Token::LBrace)?;
        let body = self.body(true)?;
        Ok(FunctionDecl {
            signature,
            body: Some(body),
        })
    }

    /// `global type name;` or `global type name { clauses }`
    fn global(&mut self) -> Result<GlobalDecl> {
        let start = self.expect(&Token::Global)?.start;
        let (ty, name) = self.declarator(&[Token::Semi, Token::LBrace])?;
        let init = if self.eat(&Token::Semi) {
            None
        } else {
            self.expect(&Token::LBrace)?;
            Some(self.body(false)?)
        };
        Ok(GlobalDecl {
            name,
            ty,
            init,
            span: self.span_from(start),
        })
    }

    /// Clauses and cases after `{`, consuming the closing `}`
    fn body(&mut self, allow_cases: bool) -> Result<ContractBody> {
        let mut body = ContractBody::default();
        while !self.eat(&Token::RBrace) {
            if self.at_end() {
                return Err(self.error_here("`}`"));
            }
            if self.check(&Token::Case) {
                if !allow_cases {
                    return Err(StubError::parse(
                        "`case` is not allowed in a global initializer",
                        self.peek_span(),
                    ));
                }
                body.cases.push(self.case()?);
            } else {
                let clause = self.clause()?;
                if let Clause::Assumes(_) = clause.node {
                    return Err(StubError::parse(
                        "`assumes` is only allowed inside a case",
                        clause.span,
                    ));
                }
                body.clauses.push(clause);
            }
        }
        Ok(body)
    }

    /// Parameter list after `(`, consuming the closing `)`
    fn params(&mut self) -> Result<(Vec<Param>, bool)> {
        let mut params = Vec::new();
        let mut variadic = false;
        if self.eat(&Token::RParen) {
            return Ok((params, variadic));
        }
        loop {
            if self.eat(&Token::Ellipsis) {
                variadic = true;
                self.expect(&Token::RParen)?;
                break;
            }
            params.push(self.param()?);
            if self.eat(&Token::RParen) {
                break;
            }
            self.expect(&Token::Comma)?;
        }
        Ok((params, variadic))
    }

    fn param(&mut self) -> Result<Param> {
        let (ty, name) = self.declarator(&[Token::Comma, Token::RParen])?;
        Ok(Param { name, ty })
    }

    /// `type-words name` up to (not including) one of `stop`.
    /// The last identifier is the name, everything before it the type.
    fn declarator(&mut self, stop: &[Token]) -> Result<(Option<String>, Spanned<String>)> {
        let mut words: Vec<Spanned<Token>> = Vec::new();
        while let Some((tok, span)) = self.peek_full() {
            if stop.contains(tok) {
                break;
            }
            match tok {
                Token::Ident(_) | Token::Star => {
                    words.push(Spanned::new(tok.clone(), *span));
                    self.pos += 1;
                }
                _ => return Err(self.error_here("type or name")),
            }
        }
        match words.pop() {
            Some(Spanned {
                node: Token::Ident(name),
                span,
            }) => {
                let ty = if words.is_empty() {
                    None
                } else {
                    Some(normalize_type(words.iter().map(|w| &w.node)))
                };
                Ok((ty, Spanned::new(name, span)))
            }
            _ => Err(self.error_here("name")),
        }
    }

    fn type_words(&mut self, stop: &[Token]) -> Result<String> {
        let mut words = Vec::new();
        while let Some(tok) = self.peek() {
            if stop.contains(tok) {
                break;
            }
            match tok {
                Token::Ident(_) | Token::Star => {
                    words.push(tok.clone());
                    self.pos += 1;
                }
                _ => return Err(self.error_here("type")),
            }
        }
        if words.is_empty() {
            return Err(self.error_here("type"));
        }
        Ok(normalize_type(words.iter()))
    }

    // ------------------------------------------------------------------
    // Clauses and cases
    // ------------------------------------------------------------------

    fn case(&mut self) -> Result<Case> {
        let start = self.expect(&Token::Case)?.start;
        let label = self.string_lit("case label string")?;
        self.expect(&Token::LBrace)?;
        let mut assumes = Vec::new();
        let mut clauses = Vec::new();
        while !self.eat(&Token::RBrace) {
            if self.at_end() {
                return Err(self.error_here("`}`"));
            }
            let clause = self.clause()?;
            match clause.node {
                Clause::Assumes(guard) => assumes.push(guard),
                Clause::Requires(_) | Clause::Unsound(_) => {
                    return Err(StubError::parse(
                        format!("`{}` is not allowed inside a case", clause.node.keyword()),
                        clause.span,
                    ));
                }
                _ => clauses.push(clause),
            }
        }
        Ok(Case {
            label,
            assumes,
            clauses,
            span: self.span_from(start),
        })
    }

    fn clause(&mut self) -> Result<Spanned<Clause>> {
        let start = self.peek_span().start;
        let keyword = self
            .advance()
            .map(|(t, _)| t)
            .ok_or_else(|| self.error_here("clause"))?;
        if !matches!(
            keyword,
            Token::Requires
                | Token::Ensures
                | Token::Assigns
                | Token::Local
                | Token::Free
                | Token::Assumes
                | Token::Unsound
        ) {
            self.pos -= 1;
            return Err(self.error_here("clause keyword or `case`"));
        }
        self.expect(&Token::Colon)?;
        let clause = match keyword {
            Token::Requires => Clause::Requires(self.formula()?),
            Token::Ensures => Clause::Ensures(self.formula()?),
            Token::Free => Clause::Free(self.formula()?),
            Token::Assumes => Clause::Assumes(self.formula()?),
            Token::Assigns => Clause::Assigns(self.target()?),
            Token::Local => Clause::Local(self.local()?),
            _ => Clause::Unsound(self.string_lit("message string")?.node),
        };
        self.expect(&Token::Semi)?;
        Ok(Spanned::new(clause, self.span_from(start)))
    }

    fn local(&mut self) -> Result<LocalDecl> {
        let (ty, name) = self.declarator(&[Token::Eq])?;
        self.expect(&Token::Eq)?;
        let init = if self.eat(&Token::New) {
            LocalInit::New(self.ident()?)
        } else {
            let func = self.ident()?;
            self.expect(&Token::LParen)?;
            let args = self.args()?;
            LocalInit::Call { func, args }
        };
        Ok(LocalDecl { name, ty, init })
    }

    fn target(&mut self) -> Result<Target> {
        if matches!(self.peek(), Some(Token::Star | Token::Ampersand)) {
            return Ok(Target::Location(self.unary()?));
        }
        let primary = self.primary()?;
        let (base, suffix) = self.postfix_ops(primary, true)?;
        Ok(match suffix {
            None => Target::Location(base),
            Some(TargetSuffix::Whole) => Target::Whole(base),
            Some(TargetSuffix::Range(lo, hi)) => Target::Range { base, lo, hi },
        })
    }

    // ------------------------------------------------------------------
    // Formulas
    // ------------------------------------------------------------------

    fn formula(&mut self) -> Result<Formula> {
        stacker::maybe_grow(32 * 1024, 1024 * 1024, || self.implies())
    }

    fn binary(left: Formula, op: BinOp, right: Formula) -> Formula {
        let span = left.span.merge(right.span);
        Spanned::new(
            Expr::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            },
            span,
        )
    }

    fn implies(&mut self) -> Result<Formula> {
        let left = self.or()?;
        if self.eat(&Token::Implies) || self.eat(&Token::FatArrow) {
            let right = self.implies()?;
            return Ok(Self::binary(left, BinOp::Implies, right));
        }
        Ok(left)
    }

    fn or(&mut self) -> Result<Formula> {
        let mut left = self.and()?;
        while self.eat(&Token::Or) || self.eat(&Token::PipePipe) {
            let right = self.and()?;
            left = Self::binary(left, BinOp::Or, right);
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Formula> {
        let mut left = self.not()?;
        while self.eat(&Token::And) || self.eat(&Token::AmpAmp) {
            let right = self.not()?;
            left = Self::binary(left, BinOp::And, right);
        }
        Ok(left)
    }

    fn not(&mut self) -> Result<Formula> {
        let start = self.peek_span().start;
        if self.eat(&Token::Not) {
            let inner = self.not()?;
            return Ok(Spanned::new(
                Expr::Unary {
                    op: UnOp::Not,
                    expr: Box::new(inner),
                },
                self.span_from(start),
            ));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Formula> {
        let start = self.peek_span().start;
        let left = self.additive()?;
        let op = match self.peek() {
            Some(Token::EqEq) => BinOp::Eq,
            Some(Token::NotEq) => BinOp::Ne,
            Some(Token::Lt) => BinOp::Lt,
            Some(Token::LtEq) => BinOp::Le,
            Some(Token::Gt) => BinOp::Gt,
            Some(Token::GtEq) => BinOp::Ge,
            Some(Token::In) => {
                self.advance();
                return self.membership(left, start);
            }
            _ => return Ok(left),
        };
        self.advance();
        let right = self.additive()?;
        Ok(Self::binary(left, op, right))
    }

    /// After `e in`: either `[lo, hi]` or a resource kind
    fn membership(&mut self, expr: Formula, start: usize) -> Result<Formula> {
        if self.eat(&Token::LBracket) {
            let lo = self.formula()?;
            self.expect(&Token::Comma)?;
            let hi = self.formula()?;
            self.expect(&Token::RBracket)?;
            return Ok(Spanned::new(
                Expr::InRange {
                    expr: Box::new(expr),
                    lo: Box::new(lo),
                    hi: Box::new(hi),
                },
                self.span_from(start),
            ));
        }
        let kind = self.ident()?;
        Ok(Spanned::new(
            Expr::InResource {
                expr: Box::new(expr),
                kind: kind.node,
            },
            self.span_from(start),
        ))
    }

    fn additive(&mut self) -> Result<Formula> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.multiplicative()?;
            left = Self::binary(left, op, right);
        }
    }

    fn multiplicative(&mut self) -> Result<Formula> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Mod,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.unary()?;
            left = Self::binary(left, op, right);
        }
    }

    fn unary(&mut self) -> Result<Formula> {
        let start = self.peek_span().start;
        let op = match self.peek() {
            Some(Token::Minus) => UnOp::Neg,
            Some(Token::Bang) => UnOp::Not,
            Some(Token::Star) => UnOp::Deref,
            Some(Token::Ampersand) => UnOp::AddrOf,
            _ => {
                let primary = self.primary()?;
                return self.postfix_ops(primary, false).map(|(e, _)| e);
            }
        };
        self.advance();
        let inner = self.unary()?;
        Ok(Spanned::new(
            Expr::Unary {
                op,
                expr: Box::new(inner),
            },
            self.span_from(start),
        ))
    }

    /// Postfix chain. In target mode a trailing `[lo, hi]` or `[..]` ends the chain.
    fn postfix_ops(
        &mut self,
        mut expr: Formula,
        target_mode: bool,
    ) -> Result<(Formula, Option<TargetSuffix>)> {
        let start = expr.span.start;
        loop {
            match self.peek() {
                Some(Token::LBracket) => {
                    self.advance();
                    if target_mode && self.eat(&Token::DotDot) {
                        self.expect(&Token::RBracket)?;
                        return Ok((expr, Some(TargetSuffix::Whole)));
                    }
                    let index = self.formula()?;
                    if target_mode && self.eat(&Token::Comma) {
                        let hi = self.formula()?;
                        self.expect(&Token::RBracket)?;
                        return Ok((expr, Some(TargetSuffix::Range(index, hi))));
                    }
                    self.expect(&Token::RBracket)?;
                    expr = Spanned::new(
                        Expr::Index {
                            base: Box::new(expr),
                            index: Box::new(index),
                        },
                        self.span_from(start),
                    );
                }
                Some(Token::Dot) | Some(Token::Arrow) => {
                    let arrow = matches!(self.advance(), Some((Token::Arrow, _)));
                    let field = self.ident()?;
                    expr = Spanned::new(
                        Expr::Field {
                            base: Box::new(expr),
                            field: field.node,
                            arrow,
                        },
                        self.span_from(start),
                    );
                }
                Some(Token::Prime) => {
                    self.advance();
                    expr = Spanned::new(Expr::Primed(Box::new(expr)), self.span_from(start));
                }
                _ => return Ok((expr, None)),
            }
        }
    }

    fn primary(&mut self) -> Result<Formula> {
        let start = self.peek_span().start;
        let Some((tok, span)) = self.advance() else {
            return Err(self.error_here("expression"));
        };
        let node = match tok {
            Token::IntLit(n) => Expr::IntLit(n),
            Token::FloatLit(x) => Expr::FloatLit(x),
            Token::True => Expr::BoolLit(true),
            Token::False => Expr::BoolLit(false),
            Token::Return => Expr::Return,
            Token::Ident(name) => {
                if self.eat(&Token::LParen) {
                    let args = self.args()?;
                    Expr::Call { func: name, args }
                } else {
                    Expr::Var(name)
                }
            }
            Token::LParen if self.cast_ahead() => {
                let ty = self.type_words(&[Token::RParen])?;
                self.expect(&Token::RParen)?;
                let inner = self.unary()?;
                return Ok(Spanned::new(
                    Expr::Cast {
                        ty,
                        expr: Box::new(inner),
                    },
                    self.span_from(start),
                ));
            }
            Token::LParen => {
                let inner = self.formula()?;
                self.expect(&Token::RParen)?;
                return Ok(inner);
            }
            Token::Exists => return self.quantified(Quantifier::Exists, start),
            Token::Forall => return self.quantified(Quantifier::Forall, start),
            other => {
                return Err(StubError::parse(
                    format!("expected expression, found `{other}`"),
                    span,
                ));
            }
        };
        Ok(Spanned::new(node, self.span_from(start)))
    }

    /// Whether the tokens after `(` spell a cast type: identifiers then stars,
    /// with a star, two words or a C type word
    fn cast_ahead(&self) -> bool {
        let (mut words, mut stars, mut typed) = (0, 0, false);
        for (tok, _) in &self.tokens[self.pos..] {
            match tok {
                Token::Ident(word) if stars == 0 => {
                    words += 1;
                    typed |= TYPE_WORDS.contains(&word.as_str());
                }
                Token::Star if words > 0 => stars += 1,
                Token::RParen => return words > 0 && (stars > 0 || words > 1 || typed),
                _ => return false,
            }
        }
        false
    }

    /// Arguments after `(`, consuming the closing `)`
    fn args(&mut self) -> Result<Vec<Formula>> {
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.formula()?);
            if self.eat(&Token::RParen) {
                return Ok(args);
            }
            self.expect(&Token::Comma)?;
        }
    }

    /// `[type] var in [lo, hi]: body` after the quantifier keyword
    fn quantified(&mut self, quantifier: Quantifier, start: usize) -> Result<Formula> {
        let (ty, var) = self.declarator(&[Token::In])?;
        self.expect(&Token::In)?;
        self.expect(&Token::LBracket)?;
        let lo = self.formula()?;
        self.expect(&Token::Comma)?;
        let hi = self.formula()?;
        self.expect(&Token::RBracket)?;
        self.expect(&Token::Colon)?;
        let body = self.formula()?;
        Ok(Spanned::new(
            Expr::Quantified {
                quantifier,
                var: var.node,
                ty,
                lo: Box::new(lo),
                hi: Box::new(hi),
                body: Box::new(body),
            },
            self.span_from(start),
        ))
    }
}

/// Canonical spelling of a C-like type: words separated by spaces, stars attached
fn normalize_type<'a>(words: impl Iterator<Item = &'a Token>) -> String {
    let mut out = String::new();
    for word in words {
        match word {
            Token::Star => out.push('*'),
            other => {
                if !out.is_empty() {
                    out.push(' ');
                }
                out.push_str(&other.to_string());
            }
        }
    }
    out
}
