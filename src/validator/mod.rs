//! Static validation of extension script sources.
//!
//! `validate` lexes and parses a script, builds its [`SymbolTree`] and rejects
//! constructs that could stall the host: `while` and `do ... while` loops,
//! `with` statements, labeled statements and labeled jumps. Bounded `for`,
//! `for ... in`, `for ... of` and recursion are accepted. Validation is pure:
//! no script code runs here.

mod ast;
mod lexer;
mod parser;
mod symbols;

use std::fmt;

use serde::Serialize;
use thiserror::Error;

pub use symbols::{SymbolKind, SymbolNode, SymbolTree};

/// Root-level function a script must define to describe itself.
pub const METADATA_ENTRY_POINT: &str = "getScriptMetadata";
/// Root-level function invoked when the script's event fires.
pub const EXECUTE_ENTRY_POINT: &str = "executeScript";

/// 1-based source position. Line 0 means "no position".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Span {
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    Syntax,
    DisallowedConstruct,
    MissingEntryPoint,
    Metadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub kind: IssueKind,
    pub message: String,
    #[serde(flatten)]
    pub span: Span,
}

impl ValidationIssue {
    pub fn new(kind: IssueKind, message: impl Into<String>, span: Span) -> Self {
        Self {
            kind,
            message: message.into(),
            span,
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.span.line == 0 {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}:{}: {}", self.span.line, self.span.column, self.message)
        }
    }
}

/// A rejected script: every issue found, ordered by position.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{}", summarize(.issues))]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationError {
    pub fn new(mut issues: Vec<ValidationIssue>) -> Self {
        issues.sort_by_key(|issue| issue.span);
        Self { issues }
    }

    /// A metadata-contract failure, which has no source position.
    pub fn metadata(message: impl Into<String>) -> Self {
        Self {
            issues: vec![ValidationIssue::new(
                IssueKind::Metadata,
                message,
                Span::default(),
            )],
        }
    }

    pub fn has_kind(&self, kind: IssueKind) -> bool {
        self.issues.iter().any(|issue| issue.kind == kind)
    }
}

fn summarize(issues: &[ValidationIssue]) -> String {
    const SHOWN: usize = 5;
    let mut out = issues
        .iter()
        .take(SHOWN)
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    if issues.len() > SHOWN {
        out.push_str(&format!(" (and {} more)", issues.len() - SHOWN));
    }
    out
}

/// Validate a script source and return its symbol tree.
pub fn validate(source: &str) -> Result<SymbolTree, ValidationError> {
    let mut issues = Vec::new();
    let tokens = lexer::Lexer::new(source, &mut issues).tokenize();
    let (program, parse_issues) = parser::parse_program(&tokens);
    issues.extend(parse_issues);
    let (tree, violations) = symbols::build(&program);
    issues.extend(violations);

    if issues.is_empty() {
        Ok(tree)
    } else {
        Err(ValidationError::new(issues))
    }
}

/// Both entry points must be declared as root-level functions.
pub fn require_entry_points(tree: &SymbolTree) -> Result<(), ValidationError> {
    let issues: Vec<ValidationIssue> = [METADATA_ENTRY_POINT, EXECUTE_ENTRY_POINT]
        .into_iter()
        .filter(|name| !tree.has_root_function(name))
        .map(|name| {
            ValidationIssue::new(
                IssueKind::MissingEntryPoint,
                format!("missing root-level function '{name}'"),
                Span::default(),
            )
        })
        .collect();
    if issues.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::new(issues))
    }
}
