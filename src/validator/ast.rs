//! Syntax tree for the subset of JavaScript accepted in extension scripts.
//!
//! The tree keeps exactly what the symbol builder and the construct checks
//! need: scoping structure, calls, object literals and identifier positions.
//! Operators are kept as their source punctuator.

use super::Span;

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    Var,
    Let,
    Const,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    /// Binding target: an identifier, or an array/object pattern.
    pub target: Expr,
    pub init: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: Option<String>,
    pub params: Vec<Expr>,
    pub body: Vec<Stmt>,
    pub is_arrow: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ForHead {
    Var(VarKind, Vec<VarDecl>),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    pub test: Option<Expr>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatchClause {
    pub param: Option<Expr>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Var {
        kind: VarKind,
        decls: Vec<VarDecl>,
    },
    Function(Function),
    Expr(Expr),
    Block(Vec<Stmt>),
    If {
        test: Expr,
        consequent: Box<Stmt>,
        alternate: Option<Box<Stmt>>,
    },
    For {
        init: Option<ForHead>,
        test: Option<Expr>,
        update: Option<Expr>,
        body: Box<Stmt>,
    },
    ForIn {
        left: ForHead,
        right: Expr,
        body: Box<Stmt>,
    },
    While {
        test: Expr,
        body: Box<Stmt>,
        span: Span,
    },
    DoWhile {
        body: Box<Stmt>,
        test: Expr,
        span: Span,
    },
    With {
        object: Expr,
        body: Box<Stmt>,
        span: Span,
    },
    Labeled {
        label: String,
        body: Box<Stmt>,
        span: Span,
    },
    Break {
        label: Option<String>,
        span: Span,
    },
    Continue {
        label: Option<String>,
        span: Span,
    },
    Return(Option<Expr>),
    Throw(Expr),
    Try {
        block: Vec<Stmt>,
        handler: Option<CatchClause>,
        finalizer: Option<Vec<Stmt>>,
    },
    Switch {
        discriminant: Expr,
        cases: Vec<SwitchCase>,
    },
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PropKey {
    Named(String),
    Computed(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Prop {
    KeyValue { key: PropKey, value: Expr },
    /// `{ name }` or, inside a pattern, `{ name = fallback }`.
    Shorthand { name: String, span: Span, default: Option<Expr> },
    Method { key: PropKey, function: Function },
    Spread(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Ident {
        name: String,
        span: Span,
    },
    /// Numbers, strings, regexes, booleans, `null`, `this`.
    Literal,
    Template(Vec<Expr>),
    Array(Vec<Expr>),
    Object {
        props: Vec<Prop>,
        span: Span,
    },
    Function(Box<Function>),
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        is_new: bool,
        span: Span,
    },
    Member {
        object: Box<Expr>,
        property: Option<String>,
        computed: Option<Box<Expr>>,
    },
    Unary {
        op: &'static str,
        arg: Box<Expr>,
    },
    Binary {
        op: &'static str,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
    Sequence(Vec<Expr>),
    Spread(Box<Expr>),
}

impl Expr {
    /// Dotted rendering of a callee such as `simpleHttpClient.post`; `None`
    /// when the chain contains anything other than plain names.
    pub fn dotted_path(&self) -> Option<String> {
        match self {
            Self::Ident { name, .. } => Some(name.clone()),
            Self::Member {
                object,
                property: Some(property),
                computed: None,
            } => object.dotted_path().map(|base| format!("{base}.{property}")),
            _ => None,
        }
    }

    /// Names bound by this expression when used as a binding pattern.
    pub fn bound_names(&self, out: &mut Vec<String>) {
        match self {
            Self::Ident { name, .. } => out.push(name.clone()),
            Self::Array(items) => items.iter().for_each(|item| item.bound_names(out)),
            Self::Object { props, .. } => {
                for prop in props {
                    match prop {
                        Prop::KeyValue { value, .. } => value.bound_names(out),
                        Prop::Shorthand { name, .. } => out.push(name.clone()),
                        Prop::Spread(inner) => inner.bound_names(out),
                        Prop::Method { .. } => {}
                    }
                }
            }
            Self::Spread(inner) => inner.bound_names(out),
            Self::Binary {
                op: "=", left, ..
            } => left.bound_names(out),
            _ => {}
        }
    }
}

enum Node<'a> {
    Expr(&'a Expr),
    Stmt(&'a Stmt),
}

/// Whether the tree under `expr` is more than `limit` nodes deep, including
/// the bodies of nested functions.
///
/// Walks with an explicit stack so arbitrarily deep input is safe to measure.
pub fn exceeds_depth(expr: &Expr, limit: usize) -> bool {
    let mut stack = vec![(Node::Expr(expr), 1usize)];
    while let Some((node, depth)) = stack.pop() {
        if depth > limit {
            return true;
        }
        let mut children = Vec::new();
        match node {
            Node::Expr(expr) => expr_children(expr, &mut children),
            Node::Stmt(stmt) => stmt_children(stmt, &mut children),
        }
        stack.extend(children.into_iter().map(|child| (child, depth + 1)));
    }
    false
}

fn function_children<'a>(function: &'a Function, out: &mut Vec<Node<'a>>) {
    out.extend(function.params.iter().map(Node::Expr));
    out.extend(function.body.iter().map(Node::Stmt));
}

fn prop_key_children<'a>(key: &'a PropKey, out: &mut Vec<Node<'a>>) {
    if let PropKey::Computed(key) = key {
        out.push(Node::Expr(key));
    }
}

fn expr_children<'a>(expr: &'a Expr, out: &mut Vec<Node<'a>>) {
    match expr {
        Expr::Ident { .. } | Expr::Literal => {}
        Expr::Template(items) | Expr::Array(items) | Expr::Sequence(items) => {
            out.extend(items.iter().map(Node::Expr));
        }
        Expr::Object { props, .. } => {
            for prop in props {
                match prop {
                    Prop::KeyValue { key, value } => {
                        prop_key_children(key, out);
                        out.push(Node::Expr(value));
                    }
                    Prop::Shorthand { default, .. } => out.extend(default.iter().map(Node::Expr)),
                    Prop::Method { key, function } => {
                        prop_key_children(key, out);
                        function_children(function, out);
                    }
                    Prop::Spread(inner) => out.push(Node::Expr(inner)),
                }
            }
        }
        Expr::Function(function) => function_children(function, out),
        Expr::Call { callee, args, .. } => {
            out.push(Node::Expr(callee));
            out.extend(args.iter().map(Node::Expr));
        }
        Expr::Member {
            object, computed, ..
        } => {
            out.push(Node::Expr(object));
            out.extend(computed.iter().map(|c| Node::Expr(c)));
        }
        Expr::Unary { arg, .. } | Expr::Spread(arg) => out.push(Node::Expr(arg)),
        Expr::Binary { left, right, .. } => {
            out.push(Node::Expr(left));
            out.push(Node::Expr(right));
        }
        Expr::Conditional {
            test,
            consequent,
            alternate,
        } => {
            out.push(Node::Expr(test));
            out.push(Node::Expr(consequent));
            out.push(Node::Expr(alternate));
        }
    }
}

fn decl_children<'a>(decls: &'a [VarDecl], out: &mut Vec<Node<'a>>) {
    for decl in decls {
        out.push(Node::Expr(&decl.target));
        out.extend(decl.init.iter().map(Node::Expr));
    }
}

fn head_children<'a>(head: &'a ForHead, out: &mut Vec<Node<'a>>) {
    match head {
        ForHead::Var(_, decls) => decl_children(decls, out),
        ForHead::Expr(expr) => out.push(Node::Expr(expr)),
    }
}

fn stmt_children<'a>(stmt: &'a Stmt, out: &mut Vec<Node<'a>>) {
    match stmt {
        Stmt::Var { decls, .. } => decl_children(decls, out),
        Stmt::Function(function) => function_children(function, out),
        Stmt::Expr(expr) | Stmt::Throw(expr) => out.push(Node::Expr(expr)),
        Stmt::Return(expr) => out.extend(expr.iter().map(Node::Expr)),
        Stmt::Block(body) => out.extend(body.iter().map(Node::Stmt)),
        Stmt::If {
            test,
            consequent,
            alternate,
        } => {
            out.push(Node::Expr(test));
            out.push(Node::Stmt(consequent));
            out.extend(alternate.iter().map(|alt| Node::Stmt(alt)));
        }
        Stmt::For {
            init,
            test,
            update,
            body,
        } => {
            if let Some(init) = init {
                head_children(init, out);
            }
            out.extend(test.iter().chain(update.iter()).map(Node::Expr));
            out.push(Node::Stmt(body));
        }
        Stmt::ForIn { left, right, body } => {
            head_children(left, out);
            out.push(Node::Expr(right));
            out.push(Node::Stmt(body));
        }
        Stmt::While { test, body, .. } | Stmt::DoWhile { body, test, .. } => {
            out.push(Node::Expr(test));
            out.push(Node::Stmt(body));
        }
        Stmt::With { object, body, .. } => {
            out.push(Node::Expr(object));
            out.push(Node::Stmt(body));
        }
        Stmt::Labeled { body, .. } => out.push(Node::Stmt(body)),
        Stmt::Try {
            block,
            handler,
            finalizer,
        } => {
            out.extend(block.iter().map(Node::Stmt));
            if let Some(handler) = handler {
                out.extend(handler.param.iter().map(Node::Expr));
                out.extend(handler.body.iter().map(Node::Stmt));
            }
            out.extend(finalizer.iter().flatten().map(Node::Stmt));
        }
        Stmt::Switch {
            discriminant,
            cases,
        } => {
            out.push(Node::Expr(discriminant));
            for case in cases {
                out.extend(case.test.iter().map(Node::Expr));
                out.extend(case.body.iter().map(Node::Stmt));
            }
        }
        Stmt::Break { .. } | Stmt::Continue { .. } | Stmt::Empty => {}
    }
}
