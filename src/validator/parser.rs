//! Error-tolerant recursive-descent parser for extension scripts.
//!
//! Syntax errors are recorded and the parser resynchronises at the next
//! statement boundary, so one report lists every problem in the script.
//! Nesting depth is capped to keep hostile input from exhausting the stack.

use super::ast::{
    self, CatchClause, Expr, ForHead, Function, Program, Prop, PropKey, Stmt, SwitchCase, VarDecl,
    VarKind,
};
use super::lexer::{Token, TokenKind};
use super::{IssueKind, Span, ValidationIssue};

const MAX_NESTING: usize = 200;
const MAX_CHAIN: usize = 1_000;
/// Operator and member chains build their nodes in a loop rather than by
/// recursion, so the finished tree is measured against this separately.
const MAX_EXPRESSION_DEPTH: usize = 500;
const MAX_ISSUES: usize = 50;

const RESERVED_WORDS: &[&str] = &[
    "await",
    "break",
    "case",
    "catch",
    "class",
    "const",
    "continue",
    "debugger",
    "default",
    "delete",
    "do",
    "else",
    "enum",
    "export",
    "extends",
    "finally",
    "for",
    "function",
    "if",
    "import",
    "in",
    "instanceof",
    "new",
    "return",
    "super",
    "switch",
    "throw",
    "try",
    "typeof",
    "var",
    "void",
    "while",
    "with",
    "yield",
];

const ASSIGNMENT_OPS: &[&str] = &[
    "=", "+=", "-=", "*=", "/=", "%=", "**=", "<<=", ">>=", ">>>=", "&=", "|=", "^=", "&&=",
    "||=", "??=",
];

const BINARY_OPS: &[(&str, u8)] = &[
    ("??", 1),
    ("||", 2),
    ("&&", 3),
    ("|", 4),
    ("^", 5),
    ("&", 6),
    ("==", 7),
    ("!=", 7),
    ("===", 7),
    ("!==", 7),
    ("<", 8),
    (">", 8),
    ("<=", 8),
    (">=", 8),
    ("<<", 9),
    (">>", 9),
    (">>>", 9),
    ("+", 10),
    ("-", 10),
    ("*", 11),
    ("/", 11),
    ("%", 11),
    ("**", 12),
];

fn is_reserved(word: &str) -> bool {
    RESERVED_WORDS.contains(&word)
}

struct SyntaxError {
    message: String,
    span: Span,
}

type PResult<T> = std::result::Result<T, SyntaxError>;

/// Parse a token stream (terminated by `Eof`) into a program.
pub fn parse_program(tokens: &[Token]) -> (Program, Vec<ValidationIssue>) {
    let mut parser = Parser::new(tokens, 0, 0);
    let mut body = Vec::new();
    while !parser.at_eof() {
        if parser.peek().is_punct("}") {
            let err = parser.unexpected();
            parser.record(err);
            parser.bump();
            continue;
        }
        let start = parser.pos;
        match parser.parse_statement() {
            Ok(stmt) => body.push(stmt),
            Err(err) => {
                parser.record(err);
                parser.synchronize(start);
            }
        }
    }
    (Program { body }, parser.issues)
}

struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
    function_depth: usize,
    nesting: usize,
    no_in: bool,
    issues: Vec<ValidationIssue>,
}

impl<'t> Parser<'t> {
    const fn new(tokens: &'t [Token], function_depth: usize, nesting: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            function_depth,
            nesting,
            no_in: false,
            issues: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Token cursor
    // ------------------------------------------------------------------

    fn peek(&self) -> &'t Token {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &'t Token {
        let tokens = self.tokens;
        let index = (self.pos + offset).min(tokens.len().saturating_sub(1));
        &tokens[index]
    }

    fn peek_punct(&self) -> Option<&'static str> {
        match self.peek().kind {
            TokenKind::Punct(p) => Some(p),
            _ => None,
        }
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    fn bump(&mut self) {
        if !self.at_eof() {
            self.pos += 1;
        }
    }

    fn eat(&mut self, punct: &str) -> bool {
        if self.peek().is_punct(punct) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn eat_ident(&mut self, name: &str) -> bool {
        if self.peek().is_ident(name) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, punct: &str) -> PResult<()> {
        if self.eat(punct) {
            Ok(())
        } else {
            Err(self.error(format!(
                "expected '{punct}' but found {}",
                describe(self.peek())
            )))
        }
    }

    fn expect_ident(&mut self, name: &str) -> PResult<()> {
        if self.eat_ident(name) {
            Ok(())
        } else {
            Err(self.error(format!(
                "expected '{name}' but found {}",
                describe(self.peek())
            )))
        }
    }

    fn consume_semicolon(&mut self) -> PResult<()> {
        if self.eat(";") || self.peek().is_punct("}") || self.at_eof() || self.peek().newline_before
        {
            return Ok(());
        }
        Err(self.error(format!(
            "expected ';' but found {}",
            describe(self.peek())
        )))
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError {
            message: message.into(),
            span: self.peek().span,
        }
    }

    fn unexpected(&self) -> SyntaxError {
        self.error(format!("unexpected {}", describe(self.peek())))
    }

    fn unsupported(&self, what: &str) -> SyntaxError {
        self.error(format!("{what} is not supported in extension scripts"))
    }

    fn record(&mut self, err: SyntaxError) {
        if self.issues.len() < MAX_ISSUES {
            self.issues.push(ValidationIssue::new(
                IssueKind::Syntax,
                err.message,
                err.span,
            ));
        }
    }

    /// Skip to the next plausible statement start. Balanced brace groups are
    /// skipped as a unit so that an error inside a nested literal does not
    /// close the enclosing block early.
    fn synchronize(&mut self, start: usize) {
        if self.pos == start {
            self.bump();
        }
        let mut depth = 0usize;
        while !self.at_eof() {
            let token = self.peek();
            if depth == 0 {
                if token.is_punct(";") {
                    self.bump();
                    return;
                }
                if token.is_punct("}") || token.newline_before {
                    return;
                }
            }
            if token.is_punct("{") {
                depth += 1;
            } else if token.is_punct("}") {
                depth -= 1;
            }
            self.bump();
        }
    }

    fn enter(&mut self) -> PResult<()> {
        self.nesting += 1;
        if self.nesting > MAX_NESTING {
            self.nesting -= 1;
            return Err(self.error("script nesting is too deep"));
        }
        Ok(())
    }

    fn check_depth(&self, expr: Expr) -> PResult<Expr> {
        if ast::exceeds_depth(&expr, MAX_EXPRESSION_DEPTH) {
            return Err(self.error("expression is nested too deeply"));
        }
        Ok(expr)
    }

    fn with_no_in<T>(&mut self, no_in: bool, f: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        let saved = std::mem::replace(&mut self.no_in, no_in);
        let result = f(self);
        self.no_in = saved;
        result
    }

    fn in_function<T>(&mut self, f: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        self.function_depth += 1;
        let result = self.with_no_in(false, f);
        self.function_depth -= 1;
        result
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn parse_statements_until(&mut self, stop: impl Fn(&Token) -> bool) -> Vec<Stmt> {
        let mut body = Vec::new();
        while !self.at_eof() && !stop(self.peek()) {
            let start = self.pos;
            match self.parse_statement() {
                Ok(stmt) => body.push(stmt),
                Err(err) => {
                    self.record(err);
                    self.synchronize(start);
                }
            }
        }
        body
    }

    fn parse_block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect("{")?;
        let body = self.parse_statements_until(|token| token.is_punct("}"));
        self.expect("}")?;
        Ok(body)
    }

    fn parse_statement(&mut self) -> PResult<Stmt> {
        self.enter()?;
        let result = self.parse_statement_inner();
        self.nesting -= 1;
        result
    }

    fn parse_statement_inner(&mut self) -> PResult<Stmt> {
        let token = self.peek();
        let span = token.span;
        if token.is_punct("{") {
            return Ok(Stmt::Block(self.parse_block()?));
        }
        if token.is_punct(";") {
            self.bump();
            return Ok(Stmt::Empty);
        }
        let Some(keyword) = token.ident() else {
            return self.parse_expression_statement();
        };

        match keyword {
            "var" => self.parse_var_statement(VarKind::Var),
            "const" => self.parse_var_statement(VarKind::Const),
            "let" if self.let_starts_declaration() => self.parse_var_statement(VarKind::Let),
            "function" => Ok(Stmt::Function(self.parse_function(true)?)),
            "if" => self.parse_if(),
            "for" => self.parse_for(),
            "while" => {
                self.bump();
                let test = self.parse_paren_expression()?;
                let body = Box::new(self.parse_statement()?);
                Ok(Stmt::While { test, body, span })
            }
            "do" => {
                self.bump();
                let body = Box::new(self.parse_statement()?);
                self.expect_ident("while")?;
                let test = self.parse_paren_expression()?;
                self.eat(";");
                Ok(Stmt::DoWhile { body, test, span })
            }
            "with" => {
                self.bump();
                let object = self.parse_paren_expression()?;
                let body = Box::new(self.parse_statement()?);
                Ok(Stmt::With { object, body, span })
            }
            "return" => {
                if self.function_depth == 0 {
                    return Err(self.error("'return' outside of a function"));
                }
                self.bump();
                let next = self.peek();
                let argument = if next.is_punct(";")
                    || next.is_punct("}")
                    || self.at_eof()
                    || next.newline_before
                {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.consume_semicolon()?;
                Ok(Stmt::Return(argument))
            }
            "throw" => {
                self.bump();
                if self.peek().newline_before {
                    return Err(self.error("illegal newline after 'throw'"));
                }
                let argument = self.parse_expression()?;
                self.consume_semicolon()?;
                Ok(Stmt::Throw(argument))
            }
            "try" => self.parse_try(),
            "switch" => self.parse_switch(),
            "break" | "continue" => {
                let is_break = keyword == "break";
                self.bump();
                let label = match self.peek().ident() {
                    Some(name) if !self.peek().newline_before && !is_reserved(name) => {
                        let name = name.to_string();
                        self.bump();
                        Some(name)
                    }
                    _ => None,
                };
                self.consume_semicolon()?;
                Ok(if is_break {
                    Stmt::Break { label, span }
                } else {
                    Stmt::Continue { label, span }
                })
            }
            "debugger" => {
                self.bump();
                self.consume_semicolon()?;
                Ok(Stmt::Empty)
            }
            "class" => Err(self.unsupported("'class'")),
            "import" | "export" => Err(self.unsupported("module syntax")),
            "async" if self.peek_at(1).is_ident("function") => {
                Err(self.unsupported("'async function'"))
            }
            name if !is_reserved(name) && self.peek_at(1).is_punct(":") => {
                let label = name.to_string();
                self.bump();
                self.bump();
                let body = Box::new(self.parse_statement()?);
                Ok(Stmt::Labeled { label, body, span })
            }
            _ => self.parse_expression_statement(),
        }
    }

    fn parse_expression_statement(&mut self) -> PResult<Stmt> {
        let expr = self.parse_expression()?;
        self.consume_semicolon()?;
        Ok(Stmt::Expr(expr))
    }

    fn let_starts_declaration(&self) -> bool {
        let next = self.peek_at(1);
        next.is_punct("[")
            || next.is_punct("{")
            || next.ident().is_some_and(|name| !is_reserved(name))
    }

    fn parse_var_statement(&mut self, kind: VarKind) -> PResult<Stmt> {
        let decls = self.parse_var_decls()?;
        self.consume_semicolon()?;
        Ok(Stmt::Var { kind, decls })
    }

    /// Parses `<keyword> target [= init], ...` starting at the keyword.
    fn parse_var_decls(&mut self) -> PResult<Vec<VarDecl>> {
        self.bump();
        let mut decls = Vec::new();
        loop {
            let target = self.parse_binding_target()?;
            let init = if self.eat("=") {
                Some(self.parse_assignment()?)
            } else {
                None
            };
            decls.push(VarDecl { target, init });
            if !self.eat(",") {
                return Ok(decls);
            }
        }
    }

    fn parse_binding_target(&mut self) -> PResult<Expr> {
        let token = self.peek();
        match &token.kind {
            TokenKind::Ident(name) if !is_reserved(name) => {
                let expr = Expr::Ident {
                    name: name.clone(),
                    span: token.span,
                };
                self.bump();
                Ok(expr)
            }
            TokenKind::Punct("[") => self.parse_array_literal(),
            TokenKind::Punct("{") => self.parse_object_literal(),
            _ => Err(self.error(format!(
                "expected a binding name but found {}",
                describe(token)
            ))),
        }
    }

    fn parse_paren_expression(&mut self) -> PResult<Expr> {
        self.expect("(")?;
        let expr = self.with_no_in(false, Self::parse_expression)?;
        self.expect(")")?;
        Ok(expr)
    }

    fn parse_if(&mut self) -> PResult<Stmt> {
        self.bump();
        let test = self.parse_paren_expression()?;
        let consequent = Box::new(self.parse_statement()?);
        let alternate = if self.eat_ident("else") {
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };
        Ok(Stmt::If {
            test,
            consequent,
            alternate,
        })
    }

    fn parse_for(&mut self) -> PResult<Stmt> {
        self.bump();
        if self.peek().is_ident("await") {
            return Err(self.unsupported("'for await'"));
        }
        self.expect("(")?;

        let init = if self.peek().is_punct(";") {
            None
        } else {
            Some(self.with_no_in(true, |p| {
                let kind = match p.peek().ident() {
                    Some("var") => Some(VarKind::Var),
                    Some("const") => Some(VarKind::Const),
                    Some("let") if p.let_starts_declaration() => Some(VarKind::Let),
                    _ => None,
                };
                match kind {
                    Some(kind) => Ok(ForHead::Var(kind, p.parse_var_decls()?)),
                    None => Ok(ForHead::Expr(p.parse_expression()?)),
                }
            })?)
        };

        if let Some(left) = init.clone() {
            let is_of = self.peek().is_ident("of");
            if is_of || self.peek().is_ident("in") {
                self.bump();
                let right = if is_of {
                    self.parse_assignment()?
                } else {
                    self.parse_expression()?
                };
                self.expect(")")?;
                let body = Box::new(self.parse_statement()?);
                return Ok(Stmt::ForIn { left, right, body });
            }
        }

        self.expect(";")?;
        let test = if self.peek().is_punct(";") {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(";")?;
        let update = if self.peek().is_punct(")") {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(")")?;
        let body = Box::new(self.parse_statement()?);
        Ok(Stmt::For {
            init,
            test,
            update,
            body,
        })
    }

    fn parse_try(&mut self) -> PResult<Stmt> {
        self.bump();
        let block = self.parse_block()?;
        let handler = if self.eat_ident("catch") {
            let param = if self.eat("(") {
                let param = self.parse_binding_target()?;
                self.expect(")")?;
                Some(param)
            } else {
                None
            };
            Some(CatchClause {
                param,
                body: self.parse_block()?,
            })
        } else {
            None
        };
        let finalizer = if self.eat_ident("finally") {
            Some(self.parse_block()?)
        } else {
            None
        };
        if handler.is_none() && finalizer.is_none() {
            return Err(self.error("'try' without 'catch' or 'finally'"));
        }
        Ok(Stmt::Try {
            block,
            handler,
            finalizer,
        })
    }

    fn parse_switch(&mut self) -> PResult<Stmt> {
        self.bump();
        let discriminant = self.parse_paren_expression()?;
        self.expect("{")?;
        let mut cases = Vec::new();
        while !self.eat("}") {
            let test = if self.eat_ident("case") {
                Some(self.parse_expression()?)
            } else if self.eat_ident("default") {
                None
            } else {
                return Err(self.error(format!(
                    "expected 'case' or 'default' but found {}",
                    describe(self.peek())
                )));
            };
            self.expect(":")?;
            let body = self.parse_statements_until(|token| {
                token.is_punct("}") || token.is_ident("case") || token.is_ident("default")
            });
            cases.push(SwitchCase { test, body });
            if self.at_eof() {
                return Err(self.error("unterminated 'switch' body"));
            }
        }
        Ok(Stmt::Switch {
            discriminant,
            cases,
        })
    }

    // ------------------------------------------------------------------
    // Functions
    // ------------------------------------------------------------------

    fn parse_function(&mut self, is_declaration: bool) -> PResult<Function> {
        let span = self.peek().span;
        self.bump();
        if self.peek().is_punct("*") {
            return Err(self.unsupported("generator functions"));
        }
        let name = match self.peek().ident() {
            Some(name) if !is_reserved(name) => {
                let name = name.to_string();
                self.bump();
                Some(name)
            }
            _ => None,
        };
        if is_declaration && name.is_none() {
            return Err(self.error("function declaration requires a name"));
        }
        self.parse_function_rest(name, span)
    }

    fn parse_function_rest(&mut self, name: Option<String>, span: Span) -> PResult<Function> {
        self.expect("(")?;
        let params = self.parse_params()?;
        let body = self.in_function(Self::parse_block)?;
        Ok(Function {
            name,
            params,
            body,
            is_arrow: false,
            span,
        })
    }

    /// Parameters after the opening parenthesis, consuming the closing one.
    fn parse_params(&mut self) -> PResult<Vec<Expr>> {
        let mut params = Vec::new();
        while !self.eat(")") {
            let param = if self.eat("...") {
                Expr::Spread(Box::new(self.parse_binding_target()?))
            } else {
                let target = self.parse_binding_target()?;
                if self.eat("=") {
                    Expr::Binary {
                        op: "=",
                        left: Box::new(target),
                        right: Box::new(self.parse_assignment()?),
                    }
                } else {
                    target
                }
            };
            params.push(param);
            if !self.eat(",") {
                self.expect(")")?;
                break;
            }
        }
        Ok(params)
    }

    fn arrow_ahead(&self) -> bool {
        let token = self.peek();
        if token.ident().is_some_and(|name| !is_reserved(name)) {
            return self.peek_at(1).is_punct("=>");
        }
        if !token.is_punct("(") {
            return false;
        }
        let mut depth = 0usize;
        let mut offset = 0usize;
        loop {
            let token = self.peek_at(offset);
            match token.kind {
                TokenKind::Eof => return false,
                TokenKind::Punct("(" | "[" | "{") => depth += 1,
                TokenKind::Punct(")" | "]" | "}") => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return self.peek_at(offset + 1).is_punct("=>");
                    }
                }
                _ => {}
            }
            offset += 1;
        }
    }

    fn parse_arrow(&mut self) -> PResult<Expr> {
        let span = self.peek().span;
        let params = if let Some(name) = self.peek().ident() {
            let param = Expr::Ident {
                name: name.to_string(),
                span,
            };
            self.bump();
            vec![param]
        } else {
            self.expect("(")?;
            self.parse_params()?
        };
        self.expect("=>")?;
        let body = self.in_function(|p| {
            if p.peek().is_punct("{") {
                p.parse_block()
            } else {
                Ok(vec![Stmt::Return(Some(p.parse_assignment()?))])
            }
        })?;
        Ok(Expr::Function(Box::new(Function {
            name: None,
            params,
            body,
            is_arrow: true,
            span,
        })))
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn parse_expression(&mut self) -> PResult<Expr> {
        let first = self.parse_assignment()?;
        if !self.peek().is_punct(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(",") {
            items.push(self.parse_assignment()?);
        }
        Ok(Expr::Sequence(items))
    }

    fn parse_assignment(&mut self) -> PResult<Expr> {
        self.enter()?;
        let result = self.parse_assignment_inner();
        self.nesting -= 1;
        result
    }

    fn parse_assignment_inner(&mut self) -> PResult<Expr> {
        if self.arrow_ahead() {
            return self.parse_arrow();
        }
        let left = self.parse_conditional()?;
        if let Some(op) = self.peek_punct() {
            if ASSIGNMENT_OPS.contains(&op) {
                self.bump();
                let right = self.parse_assignment()?;
                return Ok(Expr::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                });
            }
        }
        Ok(left)
    }

    fn parse_conditional(&mut self) -> PResult<Expr> {
        let test = self.parse_binary(1)?;
        if !self.eat("?") {
            return Ok(test);
        }
        let consequent = self.with_no_in(false, Self::parse_assignment)?;
        self.expect(":")?;
        let alternate = self.parse_assignment()?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
        })
    }

    fn binary_op(&self) -> Option<(&'static str, u8)> {
        let token = self.peek();
        match &token.kind {
            TokenKind::Punct(p) => BINARY_OPS
                .iter()
                .find(|(op, _)| op == p)
                .map(|(op, prec)| (*op, *prec)),
            TokenKind::Ident(id) if id == "instanceof" => Some(("instanceof", 8)),
            TokenKind::Ident(id) if id == "in" && !self.no_in => Some(("in", 8)),
            _ => None,
        }
    }

    fn parse_binary(&mut self, min_prec: u8) -> PResult<Expr> {
        let mut left = self.parse_unary()?;
        let mut chain = 0usize;
        while let Some((op, prec)) = self.binary_op() {
            if prec < min_prec {
                break;
            }
            chain += 1;
            if chain > MAX_CHAIN {
                return Err(self.error("expression is too long"));
            }
            self.bump();
            let next_min = if op == "**" { prec } else { prec + 1 };
            self.enter()?;
            let right = self.parse_binary(next_min);
            self.nesting -= 1;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right?),
            };
        }
        if chain == 0 {
            return Ok(left);
        }
        self.check_depth(left)
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        self.enter()?;
        let result = self.parse_unary_inner();
        self.nesting -= 1;
        result
    }

    fn parse_unary_inner(&mut self) -> PResult<Expr> {
        let op = match &self.peek().kind {
            TokenKind::Punct(p @ ("!" | "~" | "+" | "-" | "++" | "--")) => Some(*p),
            TokenKind::Ident(id) => match id.as_str() {
                "typeof" => Some("typeof"),
                "void" => Some("void"),
                "delete" => Some("delete"),
                "await" => return Err(self.unsupported("'await'")),
                _ => None,
            },
            _ => None,
        };
        if let Some(op) = op {
            self.bump();
            let arg = self.parse_unary()?;
            return Ok(Expr::Unary {
                op,
                arg: Box::new(arg),
            });
        }

        let expr = self.parse_call_member()?;
        if !self.peek().newline_before {
            if let Some(op @ ("++" | "--")) = self.peek_punct() {
                self.bump();
                return Ok(Expr::Unary {
                    op,
                    arg: Box::new(expr),
                });
            }
        }
        Ok(expr)
    }

    fn parse_call_member(&mut self) -> PResult<Expr> {
        let mut expr = if self.peek().is_ident("new") {
            self.parse_new()?
        } else {
            self.parse_primary()?
        };

        for links in 0..MAX_CHAIN {
            let span = self.peek().span;
            if self.eat(".") {
                let property = self.parse_property_name()?;
                expr = member(expr, property);
            } else if self.eat("?.") {
                if self.peek().is_punct("(") {
                    let args = self.parse_arguments()?;
                    expr = call(expr, args, false, span);
                } else if self.eat("[") {
                    let property = self.with_no_in(false, Self::parse_expression)?;
                    self.expect("]")?;
                    expr = computed_member(expr, property);
                } else {
                    let property = self.parse_property_name()?;
                    expr = member(expr, property);
                }
            } else if self.eat("[") {
                let property = self.with_no_in(false, Self::parse_expression)?;
                self.expect("]")?;
                expr = computed_member(expr, property);
            } else if self.peek().is_punct("(") {
                let args = self.parse_arguments()?;
                expr = call(expr, args, false, span);
            } else if matches!(self.peek().kind, TokenKind::Template(_)) {
                let template = self.parse_primary()?;
                expr = call(expr, vec![template], false, span);
            } else if links == 0 {
                return Ok(expr);
            } else {
                return self.check_depth(expr);
            }
        }
        Err(self.error("expression is too long"))
    }

    fn parse_new(&mut self) -> PResult<Expr> {
        let span = self.peek().span;
        self.bump();
        if self.peek().is_punct(".") {
            return Err(self.unsupported("'new.target'"));
        }
        let mut callee = if self.peek().is_ident("new") {
            self.enter()?;
            let inner = self.parse_new();
            self.nesting -= 1;
            inner?
        } else {
            self.parse_primary()?
        };
        for _ in 0..MAX_CHAIN {
            if self.eat(".") {
                let property = self.parse_property_name()?;
                callee = member(callee, property);
            } else if self.eat("[") {
                let property = self.with_no_in(false, Self::parse_expression)?;
                self.expect("]")?;
                callee = computed_member(callee, property);
            } else {
                break;
            }
        }
        let args = if self.peek().is_punct("(") {
            self.parse_arguments()?
        } else {
            Vec::new()
        };
        self.check_depth(call(callee, args, true, span))
    }

    fn parse_arguments(&mut self) -> PResult<Vec<Expr>> {
        self.expect("(")?;
        self.with_no_in(false, |p| {
            let mut args = Vec::new();
            while !p.eat(")") {
                let arg = if p.eat("...") {
                    Expr::Spread(Box::new(p.parse_assignment()?))
                } else {
                    p.parse_assignment()?
                };
                args.push(arg);
                if !p.eat(",") {
                    p.expect(")")?;
                    break;
                }
            }
            Ok(args)
        })
    }

    fn parse_property_name(&mut self) -> PResult<String> {
        match self.peek().ident() {
            Some(name) => {
                let name = name.to_string();
                self.bump();
                Ok(name)
            }
            None if self.peek().is_punct("#") => Err(self.unsupported("private fields")),
            None => Err(self.error(format!(
                "expected a property name but found {}",
                describe(self.peek())
            ))),
        }
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let token = self.peek();
        let span = token.span;
        match &token.kind {
            TokenKind::Ident(id) => match id.as_str() {
                "function" => Ok(Expr::Function(Box::new(self.parse_function(false)?))),
                "this" | "null" | "true" | "false" => {
                    self.bump();
                    Ok(Expr::Literal)
                }
                "class" | "super" => Err(self.unsupported("classes")),
                "import" => Err(self.unsupported("module syntax")),
                "yield" => Err(self.unsupported("'yield'")),
                "async" if self.peek_at(1).is_ident("function") => {
                    Err(self.unsupported("'async function'"))
                }
                word if is_reserved(word) => {
                    Err(self.error(format!("unexpected keyword '{word}'")))
                }
                name => {
                    let expr = Expr::Ident {
                        name: name.to_string(),
                        span,
                    };
                    self.bump();
                    Ok(expr)
                }
            },
            TokenKind::Number | TokenKind::Str(_) | TokenKind::Regex => {
                self.bump();
                Ok(Expr::Literal)
            }
            TokenKind::Template(parts) => {
                self.bump();
                let mut exprs = Vec::with_capacity(parts.len());
                for part in parts {
                    exprs.push(self.parse_substitution(part)?);
                }
                Ok(Expr::Template(exprs))
            }
            TokenKind::Punct("(") => {
                self.bump();
                let expr = self.with_no_in(false, Self::parse_expression)?;
                self.expect(")")?;
                Ok(expr)
            }
            TokenKind::Punct("[") => self.parse_array_literal(),
            TokenKind::Punct("{") => self.parse_object_literal(),
            TokenKind::Eof => Err(self.error("unexpected end of input")),
            TokenKind::Punct(_) => Err(self.unexpected()),
        }
    }

    /// Parse one `${...}` substitution with a nested parser over its tokens.
    fn parse_substitution(&mut self, tokens: &[Token]) -> PResult<Expr> {
        let mut inner = Parser::new(tokens, self.function_depth, self.nesting);
        if inner.at_eof() {
            return Err(inner.error("empty template substitution"));
        }
        let expr = inner.parse_expression();
        let trailing = if expr.is_ok() && !inner.at_eof() {
            Some(inner.unexpected())
        } else {
            None
        };
        self.issues.append(&mut inner.issues);
        let expr = expr?;
        match trailing {
            Some(err) => Err(err),
            None => Ok(expr),
        }
    }

    fn parse_array_literal(&mut self) -> PResult<Expr> {
        self.expect("[")?;
        self.with_no_in(false, |p| {
            let mut items = Vec::new();
            loop {
                if p.eat("]") {
                    break;
                }
                if p.eat(",") {
                    continue;
                }
                let item = if p.eat("...") {
                    Expr::Spread(Box::new(p.parse_assignment()?))
                } else {
                    p.parse_assignment()?
                };
                items.push(item);
                if !p.eat(",") {
                    p.expect("]")?;
                    break;
                }
            }
            Ok(Expr::Array(items))
        })
    }

    fn parse_object_literal(&mut self) -> PResult<Expr> {
        let span = self.peek().span;
        self.expect("{")?;
        self.with_no_in(false, |p| {
            let mut props = Vec::new();
            loop {
                if p.eat("}") {
                    break;
                }
                props.push(p.parse_property()?);
                if !p.eat(",") {
                    p.expect("}")?;
                    break;
                }
            }
            Ok(Expr::Object { props, span })
        })
    }

    fn parse_property(&mut self) -> PResult<Prop> {
        if self.eat("...") {
            return Ok(Prop::Spread(self.parse_assignment()?));
        }
        if self.peek().is_punct("*") {
            return Err(self.unsupported("generator methods"));
        }

        let token = self.peek();
        let span = token.span;
        let next_starts_key = starts_property_key(self.peek_at(1));
        if (token.is_ident("get") || token.is_ident("set")) && next_starts_key {
            self.bump();
            let key = self.parse_property_key()?;
            let function = self.parse_function_rest(None, span)?;
            return Ok(Prop::Method { key, function });
        }
        if token.is_ident("async") && next_starts_key {
            return Err(self.unsupported("async methods"));
        }

        let shorthand = token
            .ident()
            .filter(|name| !is_reserved(name))
            .map(str::to_string);
        let key = self.parse_property_key()?;
        if self.eat(":") {
            return Ok(Prop::KeyValue {
                key,
                value: self.parse_assignment()?,
            });
        }
        if self.peek().is_punct("(") {
            let name = match &key {
                PropKey::Named(name) => Some(name.clone()),
                PropKey::Computed(_) => None,
            };
            let function = self.parse_function_rest(name, span)?;
            return Ok(Prop::Method { key, function });
        }
        match (shorthand, key) {
            (Some(name), PropKey::Named(_)) => {
                let default = if self.eat("=") {
                    Some(self.parse_assignment()?)
                } else {
                    None
                };
                Ok(Prop::Shorthand {
                    name,
                    span,
                    default,
                })
            }
            _ => Err(self.error(format!(
                "expected ':' after property name but found {}",
                describe(self.peek())
            ))),
        }
    }

    fn parse_property_key(&mut self) -> PResult<PropKey> {
        let token = self.peek();
        match &token.kind {
            TokenKind::Ident(name) | TokenKind::Str(name) => {
                let key = PropKey::Named(name.clone());
                self.bump();
                Ok(key)
            }
            TokenKind::Number => {
                self.bump();
                Ok(PropKey::Computed(Expr::Literal))
            }
            TokenKind::Punct("[") => {
                self.bump();
                let expr = self.parse_assignment()?;
                self.expect("]")?;
                Ok(PropKey::Computed(expr))
            }
            _ => Err(self.error(format!(
                "expected a property name but found {}",
                describe(token)
            ))),
        }
    }
}

fn starts_property_key(token: &Token) -> bool {
    matches!(
        token.kind,
        TokenKind::Ident(_) | TokenKind::Str(_) | TokenKind::Number | TokenKind::Punct("[")
    )
}

fn member(object: Expr, property: String) -> Expr {
    Expr::Member {
        object: Box::new(object),
        property: Some(property),
        computed: None,
    }
}

fn computed_member(object: Expr, property: Expr) -> Expr {
    Expr::Member {
        object: Box::new(object),
        property: None,
        computed: Some(Box::new(property)),
    }
}

fn call(callee: Expr, args: Vec<Expr>, is_new: bool, span: Span) -> Expr {
    Expr::Call {
        callee: Box::new(callee),
        args,
        is_new,
        span,
    }
}

fn describe(token: &Token) -> String {
    match &token.kind {
        TokenKind::Ident(name) => format!("'{name}'"),
        TokenKind::Punct(p) => format!("'{p}'"),
        TokenKind::Number => "number".to_string(),
        TokenKind::Str(_) => "string".to_string(),
        TokenKind::Template(_) => "template literal".to_string(),
        TokenKind::Regex => "regular expression".to_string(),
        TokenKind::Eof => "end of input".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::lexer::Lexer;

    fn parse(source: &str) -> (Program, Vec<ValidationIssue>) {
        let mut issues = Vec::new();
        let tokens = Lexer::new(source, &mut issues).tokenize();
        let (program, mut parse_issues) = parse_program(&tokens);
        issues.append(&mut parse_issues);
        (program, issues)
    }

    fn parse_ok(source: &str) -> Program {
        let (program, issues) = parse(source);
        assert!(issues.is_empty(), "unexpected issues: {issues:?}");
        program
    }

    #[test]
    fn parses_typical_extension_script() {
        let program = parse_ok(
            r"
            function getScriptMetadata() {
                return {
                    id: 'notify',
                    displayName: 'Notify',
                    async: false,
                    events: ['RESERVATION_CONFIRMED'],
                };
            }

            function executeScript(scriptEvent) {
                var total = 0;
                for (var i = 0; i < reservation.items.length; i++) {
                    total += reservation.items[i].price;
                }
                const body = { total, event: `${scriptEvent}:${total}` };
                try {
                    return simpleHttpClient.postJSON(extensionParameters.url, {}, body);
                } catch (e) {
                    log.warn('failed', e);
                    return null;
                }
            }
            ",
        );
        assert_eq!(program.body.len(), 2);
        assert!(matches!(&program.body[0], Stmt::Function(f) if f.name.as_deref() == Some("getScriptMetadata")));
    }

    #[test]
    fn parses_disallowed_constructs_as_nodes() {
        let program = parse_ok("while (true) {}\ndo { x++ } while (x < 3);\nwith (obj) {}\nouter: for (;;) { break outer; }");
        assert!(matches!(program.body[0], Stmt::While { .. }));
        assert!(matches!(program.body[1], Stmt::DoWhile { .. }));
        assert!(matches!(program.body[2], Stmt::With { .. }));
        assert!(matches!(program.body[3], Stmt::Labeled { .. }));
    }

    #[test]
    fn object_keys_and_ternaries_are_not_labels() {
        let program = parse_ok("var o = { outer: 1, 'while': 2 };\nvar t = a ? b : c;\nswitch (x) { case 1: y(); break; default: z(); }");
        assert!(program
            .body
            .iter()
            .all(|stmt| !matches!(stmt, Stmt::Labeled { .. })));
    }

    #[test]
    fn arrow_functions_and_destructuring() {
        let program = parse_ok(
            "const add = (a, b = 2) => a + b;\nconst sq = x => x * x;\nconst { a, b: [c, ...d] } = obj;\nitems.map(({ price }) => price);",
        );
        assert_eq!(program.body.len(), 4);
    }

    #[test]
    fn for_in_and_for_of() {
        let program = parse_ok("for (var k in obj) {}\nfor (const v of list) {}\nfor (let i = 0, j = 1; i < j; i++) {}");
        assert!(matches!(program.body[0], Stmt::ForIn { .. }));
        assert!(matches!(program.body[1], Stmt::ForIn { .. }));
        assert!(matches!(program.body[2], Stmt::For { .. }));
    }

    #[test]
    fn collects_multiple_errors() {
        let (program, issues) = parse("var = 1;\nfunction ok() { return 1; }\nlet x = (1 + ;\n");
        assert!(issues.len() >= 2, "issues: {issues:?}");
        assert!(program
            .body
            .iter()
            .any(|stmt| matches!(stmt, Stmt::Function(f) if f.name.as_deref() == Some("ok"))));
        assert_eq!(issues[0].span.line, 1);
    }

    #[test]
    fn return_outside_function_is_an_error() {
        let (_, issues) = parse("return 1;");
        assert_eq!(issues.len(), 1);
        assert!(issues[0].message.contains("outside of a function"));
    }

    #[test]
    fn deep_nesting_is_bounded() {
        let source = format!("var x = {}1{};", "(".repeat(5_000), ")".repeat(5_000));
        let (_, issues) = parse(&source);
        assert!(issues.iter().any(|issue| issue.message.contains("too deep")));
    }

    #[test]
    fn operator_and_member_chains_are_bounded() {
        parse_ok(&format!("var x = a{};", "+a".repeat(300)));
        parse_ok(&format!("var x = a{};", ".b".repeat(300)));

        // Each parenthesised chain is the left operand of the next one.
        let sums = format!("var x = {}a{};", "(".repeat(40), format!("{})", "+a".repeat(20)).repeat(40));
        let (_, issues) = parse(&sums);
        assert!(issues.iter().any(|issue| issue.message.contains("nested too deeply")), "{issues:?}");

        let members = format!("var x = {}a{};", "(".repeat(40), format!("{})", ".b".repeat(20)).repeat(40));
        let (_, issues) = parse(&members);
        assert!(issues.iter().any(|issue| issue.message.contains("nested too deeply")), "{issues:?}");
    }

    #[test]
    fn right_associative_and_new_chains_use_the_nesting_budget() {
        let power = format!("var x = a{};", "**a".repeat(5_000));
        let (_, issues) = parse(&power);
        assert!(issues.iter().any(|issue| issue.message.contains("too deep")), "{issues:?}");

        let news = format!("var x = {}A;", "new ".repeat(5_000));
        let (_, issues) = parse(&news);
        assert!(issues.iter().any(|issue| issue.message.contains("too deep")), "{issues:?}");
    }

    #[test]
    fn unsupported_syntax_is_reported() {
        let (_, issues) = parse("class A {}");
        assert!(issues[0].message.contains("not supported"));
        let (_, issues) = parse("async function f() {}");
        assert!(issues[0].message.contains("async"));
    }

    #[test]
    fn semicolon_insertion_on_newlines() {
        parse_ok("var a = 1\nvar b = a\nlog.info(b)\n");
        let (_, issues) = parse("var a = 1 var b = 2");
        assert_eq!(issues.len(), 1);
    }
}
