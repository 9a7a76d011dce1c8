//! Symbol tree construction and disallowed-construct detection.

use serde::Serialize;

use super::ast::{Expr, ForHead, Function, Program, Prop, PropKey, Stmt};
use super::{IssueKind, Span, ValidationIssue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Root,
    Function,
    Object,
    Call,
}

/// One function, object literal or call expression in the script.
///
/// Only `Root` and `Function` nodes carry declarations; a bare reference is
/// attached to the nearest enclosing scope that declares it, or to the root
/// when nothing does (an implicit global or a host binding).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SymbolNode {
    pub kind: SymbolKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub line: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub declarations: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<SymbolNode>,
}

impl SymbolNode {
    fn new(kind: SymbolKind, name: Option<String>, line: usize) -> Self {
        Self {
            kind,
            name,
            line,
            declarations: Vec::new(),
            references: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Depth-first iterator over this node and all descendants.
    pub fn walk(&self) -> impl Iterator<Item = &Self> {
        let mut pending = vec![self];
        std::iter::from_fn(move || {
            let node = pending.pop()?;
            pending.extend(node.children.iter().rev());
            Some(node)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SymbolTree {
    root: SymbolNode,
}

impl SymbolTree {
    pub const fn root(&self) -> &SymbolNode {
        &self.root
    }

    /// Whether a function with this name is declared at the top level.
    pub fn has_root_function(&self, name: &str) -> bool {
        self.root
            .children
            .iter()
            .any(|node| node.kind == SymbolKind::Function && node.name.as_deref() == Some(name))
    }

    /// Names referenced without any declaration in scope.
    pub fn global_references(&self) -> &[String] {
        &self.root.references
    }

    /// Dotted callee paths of every call in the script, in source order.
    pub fn call_paths(&self) -> Vec<&str> {
        self.root
            .walk()
            .filter(|node| node.kind == SymbolKind::Call)
            .filter_map(|node| node.name.as_deref())
            .collect()
    }
}

/// Build the symbol tree and collect disallowed constructs.
pub fn build(program: &Program) -> (SymbolTree, Vec<ValidationIssue>) {
    let mut root = SymbolNode::new(SymbolKind::Root, None, 0);
    hoisted_declarations(&program.body, &mut root.declarations);
    let mut builder = Builder {
        stack: vec![root],
        scopes: vec![0],
        violations: Vec::new(),
    };
    for stmt in &program.body {
        builder.stmt(stmt);
    }
    let root = builder.stack.pop().unwrap_or_else(|| SymbolNode::new(SymbolKind::Root, None, 0));
    (SymbolTree { root }, builder.violations)
}

struct Builder {
    /// Open nodes; index 0 is the root.
    stack: Vec<SymbolNode>,
    /// Stack indices of open scope-bearing nodes (root and functions).
    scopes: Vec<usize>,
    violations: Vec<ValidationIssue>,
}

impl Builder {
    fn open(&mut self, kind: SymbolKind, name: Option<String>, line: usize) {
        self.stack.push(SymbolNode::new(kind, name, line));
    }

    fn close(&mut self) {
        if self.stack.len() < 2 {
            return;
        }
        if let Some(node) = self.stack.pop() {
            if let Some(parent) = self.stack.last_mut() {
                parent.children.push(node);
            }
        }
    }

    fn reference(&mut self, name: &str) {
        let owner = self
            .scopes
            .iter()
            .rev()
            .copied()
            .find(|&index| self.stack[index].declarations.iter().any(|d| d == name))
            .unwrap_or(0);
        let references = &mut self.stack[owner].references;
        if !references.iter().any(|existing| existing == name) {
            references.push(name.to_string());
        }
    }

    fn reject(&mut self, span: Span, message: &str) {
        self.violations.push(ValidationIssue::new(
            IssueKind::DisallowedConstruct,
            message,
            span,
        ));
    }

    fn stmts(&mut self, body: &[Stmt]) {
        for stmt in body {
            self.stmt(stmt);
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Var { decls, .. } => {
                for decl in decls {
                    self.pattern(&decl.target);
                    if let Some(init) = &decl.init {
                        self.expr(init);
                    }
                }
            }
            Stmt::Function(function) => self.function(function),
            Stmt::Expr(expr) | Stmt::Throw(expr) => self.expr(expr),
            Stmt::Block(body) => self.stmts(body),
            Stmt::If {
                test,
                consequent,
                alternate,
            } => {
                self.expr(test);
                self.stmt(consequent);
                if let Some(alternate) = alternate {
                    self.stmt(alternate);
                }
            }
            Stmt::For {
                init,
                test,
                update,
                body,
            } => {
                if let Some(init) = init {
                    self.for_head(init, false);
                }
                for expr in [test, update].into_iter().flatten() {
                    self.expr(expr);
                }
                self.stmt(body);
            }
            Stmt::ForIn { left, right, body } => {
                self.for_head(left, true);
                self.expr(right);
                self.stmt(body);
            }
            Stmt::While { test, body, span } => {
                self.reject(*span, "'while' loops are not allowed");
                self.expr(test);
                self.stmt(body);
            }
            Stmt::DoWhile { body, test, span } => {
                self.reject(*span, "'do ... while' loops are not allowed");
                self.stmt(body);
                self.expr(test);
            }
            Stmt::With { object, body, span } => {
                self.reject(*span, "'with' statements are not allowed");
                self.expr(object);
                self.stmt(body);
            }
            Stmt::Labeled { label, body, span } => {
                self.reject(*span, &format!("labeled statement '{label}' is not allowed"));
                self.stmt(body);
            }
            Stmt::Break {
                label: Some(label),
                span,
            } => self.reject(*span, &format!("labeled 'break {label}' is not allowed")),
            Stmt::Continue {
                label: Some(label),
                span,
            } => self.reject(*span, &format!("labeled 'continue {label}' is not allowed")),
            Stmt::Return(argument) => {
                if let Some(argument) = argument {
                    self.expr(argument);
                }
            }
            Stmt::Try {
                block,
                handler,
                finalizer,
            } => {
                self.stmts(block);
                if let Some(handler) = handler {
                    if let Some(param) = &handler.param {
                        self.pattern(param);
                    }
                    self.stmts(&handler.body);
                }
                if let Some(finalizer) = finalizer {
                    self.stmts(finalizer);
                }
            }
            Stmt::Switch {
                discriminant,
                cases,
            } => {
                self.expr(discriminant);
                for case in cases {
                    if let Some(test) = &case.test {
                        self.expr(test);
                    }
                    self.stmts(&case.body);
                }
            }
            Stmt::Break { label: None, .. } | Stmt::Continue { label: None, .. } | Stmt::Empty => {}
        }
    }

    fn for_head(&mut self, head: &ForHead, is_iteration: bool) {
        match head {
            ForHead::Var(_, decls) => {
                for decl in decls {
                    self.pattern(&decl.target);
                    if let Some(init) = &decl.init {
                        self.expr(init);
                    }
                }
            }
            ForHead::Expr(expr) if is_iteration => self.pattern(expr),
            ForHead::Expr(expr) => self.expr(expr),
        }
    }

    fn function(&mut self, function: &Function) {
        self.open(SymbolKind::Function, function.name.clone(), function.span.line);
        let index = self.stack.len() - 1;
        let mut declarations = Vec::new();
        for param in &function.params {
            param.bound_names(&mut declarations);
        }
        hoisted_declarations(&function.body, &mut declarations);
        dedup(&mut declarations);
        self.stack[index].declarations = declarations;

        self.scopes.push(index);
        for param in &function.params {
            self.pattern(param);
        }
        self.stmts(&function.body);
        self.scopes.pop();
        self.close();
    }

    /// Binding patterns: bound names are declarations, but defaults and
    /// computed keys are evaluated and may reference other names.
    fn pattern(&mut self, expr: &Expr) {
        match expr {
            Expr::Ident { .. } => {}
            Expr::Array(items) => items.iter().for_each(|item| self.pattern(item)),
            Expr::Object { props, .. } => {
                for prop in props {
                    match prop {
                        Prop::KeyValue { key, value } => {
                            if let PropKey::Computed(key) = key {
                                self.expr(key);
                            }
                            self.pattern(value);
                        }
                        Prop::Shorthand {
                            default: Some(default),
                            ..
                        } => self.expr(default),
                        Prop::Spread(inner) => self.pattern(inner),
                        Prop::Shorthand { default: None, .. } | Prop::Method { .. } => {}
                    }
                }
            }
            Expr::Spread(inner) => self.pattern(inner),
            Expr::Binary {
                op: "=",
                left,
                right,
            } => {
                self.pattern(left);
                self.expr(right);
            }
            other => self.expr(other),
        }
    }

    fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Ident { name, .. } => self.reference(name),
            Expr::Literal => {}
            Expr::Template(items) | Expr::Array(items) | Expr::Sequence(items) => {
                items.iter().for_each(|item| self.expr(item));
            }
            Expr::Object { props, span } => {
                self.open(SymbolKind::Object, None, span.line);
                for prop in props {
                    match prop {
                        Prop::KeyValue { key, value } => {
                            if let PropKey::Computed(key) = key {
                                self.expr(key);
                            }
                            self.expr(value);
                        }
                        Prop::Shorthand { name, default, .. } => {
                            self.reference(name);
                            if let Some(default) = default {
                                self.expr(default);
                            }
                        }
                        Prop::Method { key, function } => {
                            if let PropKey::Computed(key) = key {
                                self.expr(key);
                            }
                            self.function(function);
                        }
                        Prop::Spread(inner) => self.expr(inner),
                    }
                }
                self.close();
            }
            Expr::Function(function) => self.function(function),
            Expr::Call {
                callee, args, span, ..
            } => {
                self.open(SymbolKind::Call, callee.dotted_path(), span.line);
                self.expr(callee);
                args.iter().for_each(|arg| self.expr(arg));
                self.close();
            }
            Expr::Member {
                object, computed, ..
            } => {
                self.expr(object);
                if let Some(computed) = computed {
                    self.expr(computed);
                }
            }
            Expr::Unary { arg, .. } | Expr::Spread(arg) => self.expr(arg),
            Expr::Binary { left, right, .. } => {
                self.expr(left);
                self.expr(right);
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                self.expr(test);
                self.expr(consequent);
                self.expr(alternate);
            }
        }
    }
}

/// Names declared in a function body (or the program), not descending into
/// nested functions.
fn hoisted_declarations(body: &[Stmt], out: &mut Vec<String>) {
    for stmt in body {
        hoisted_in_stmt(stmt, out);
    }
    dedup(out);
}

fn hoisted_in_stmt(stmt: &Stmt, out: &mut Vec<String>) {
    match stmt {
        Stmt::Var { decls, .. } | Stmt::For { init: Some(ForHead::Var(_, decls)), .. } => {
            for decl in decls {
                decl.target.bound_names(out);
            }
            if let Stmt::For { body, .. } = stmt {
                hoisted_in_stmt(body, out);
            }
        }
        Stmt::ForIn { left, body, .. } => {
            if let ForHead::Var(_, decls) = left {
                for decl in decls {
                    decl.target.bound_names(out);
                }
            }
            hoisted_in_stmt(body, out);
        }
        Stmt::Function(function) => {
            if let Some(name) = &function.name {
                out.push(name.clone());
            }
        }
        Stmt::Block(body) => body.iter().for_each(|stmt| hoisted_in_stmt(stmt, out)),
        Stmt::If {
            consequent,
            alternate,
            ..
        } => {
            hoisted_in_stmt(consequent, out);
            if let Some(alternate) = alternate {
                hoisted_in_stmt(alternate, out);
            }
        }
        Stmt::For { body, .. }
        | Stmt::While { body, .. }
        | Stmt::DoWhile { body, .. }
        | Stmt::With { body, .. }
        | Stmt::Labeled { body, .. } => hoisted_in_stmt(body, out),
        Stmt::Try {
            block,
            handler,
            finalizer,
        } => {
            block.iter().for_each(|stmt| hoisted_in_stmt(stmt, out));
            if let Some(handler) = handler {
                if let Some(param) = &handler.param {
                    param.bound_names(out);
                }
                handler.body.iter().for_each(|stmt| hoisted_in_stmt(stmt, out));
            }
            if let Some(finalizer) = finalizer {
                finalizer.iter().for_each(|stmt| hoisted_in_stmt(stmt, out));
            }
        }
        Stmt::Switch { cases, .. } => {
            for case in cases {
                case.body.iter().for_each(|stmt| hoisted_in_stmt(stmt, out));
            }
        }
        Stmt::Expr(_)
        | Stmt::Return(_)
        | Stmt::Throw(_)
        | Stmt::Break { .. }
        | Stmt::Continue { .. }
        | Stmt::Empty => {}
    }
}

fn dedup(names: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    names.retain(|name| seen.insert(name.clone()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::lexer::Lexer;
    use crate::validator::parser::parse_program;

    fn tree(source: &str) -> (SymbolTree, Vec<ValidationIssue>) {
        let mut issues = Vec::new();
        let tokens = Lexer::new(source, &mut issues).tokenize();
        let (program, parse_issues) = parse_program(&tokens);
        assert!(issues.is_empty() && parse_issues.is_empty());
        build(&program)
    }

    #[test]
    fn references_attach_to_declaring_scope() {
        let (tree, violations) = tree(
            r"
            var counter = 0;
            function executeScript(scriptEvent) {
                var local = reservation.id;
                function inner() { return local + counter + missing; }
                return inner();
            }
            ",
        );
        assert!(violations.is_empty());
        let root = tree.root();
        assert_eq!(root.declarations, vec!["counter", "executeScript"]);
        assert!(root.references.contains(&"counter".to_string()));
        assert!(root.references.contains(&"reservation".to_string()));
        assert!(root.references.contains(&"missing".to_string()));

        let execute = &root.children[0];
        assert_eq!(execute.name.as_deref(), Some("executeScript"));
        assert_eq!(execute.declarations, vec!["scriptEvent", "local", "inner"]);
        assert!(execute.references.contains(&"local".to_string()));
        assert!(execute.references.contains(&"inner".to_string()));
    }

    #[test]
    fn nodes_for_objects_and_calls() {
        let (tree, _) = tree("function f() { log.info({ a: g(1) }); }");
        assert!(tree.has_root_function("f"));
        assert_eq!(tree.call_paths(), vec!["log.info", "g"]);
        let kinds: Vec<SymbolKind> = tree.root().walk().map(|node| node.kind).collect();
        assert_eq!(
            kinds,
            vec![
                SymbolKind::Root,
                SymbolKind::Function,
                SymbolKind::Call,
                SymbolKind::Object,
                SymbolKind::Call,
            ]
        );
    }

    #[test]
    fn disallowed_constructs_are_reported_with_position() {
        let (_, violations) = tree("function f() {\n  while (x) { x--; }\n}\nwith (o) {}\n");
        assert_eq!(violations.len(), 2);
        assert_eq!(violations[0].span.line, 2);
        assert_eq!(violations[0].kind, IssueKind::DisallowedConstruct);
        assert_eq!(violations[1].span.line, 4);
    }

    #[test]
    fn plain_break_and_continue_are_fine() {
        let (_, violations) =
            tree("for (var i = 0; i < 3; i++) { if (i) continue; else break; }");
        assert!(violations.is_empty());
    }

    #[test]
    fn function_expressions_are_not_root_functions() {
        let (tree, _) = tree("var executeScript = function () {};");
        assert!(!tree.has_root_function("executeScript"));
    }
}
