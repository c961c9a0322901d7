//! The internal AST shape the frontend produces and the builder consumes.
//!
//! Leaves carry verbatim source snippets rather than parsed expressions —
//! the predicate evaluator and the statement splitter both operate on
//! trimmed source text, not on a parsed expression tree, so there is no
//! value in modelling SQL expressions here.

use crate::cfg::ProcParameter;

/// A verbatim, whitespace-trimmed slice of the source procedure text plus
/// the 1-based source line range it was extracted from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snippet {
    pub text: String,
    pub start_line: u32,
    pub end_line: u32,
}

impl Snippet {
    pub fn empty(line: u32) -> Self {
        Snippet {
            text: String::new(),
            start_line: line,
            end_line: line,
        }
    }
}

/// One statement or control construct in the procedure body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stmt {
    /// A single DML/DDL/assignment/EXEC/transaction statement. `keyword`
    /// is the uppercased first token, used by the builder's closed kind
    /// mapping.
    Simple { keyword: String, snippet: Snippet },
    /// A `BEGIN ... END` block with no control-flow meaning of its own.
    Block(Vec<Stmt>),
    /// `IF <cond> <then> [ELSE <else>]`.
    If {
        cond: Snippet,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },
    /// `WHILE <cond> <body>`.
    While { cond: Snippet, body: Box<Stmt> },
    /// `BEGIN TRY <try> END TRY BEGIN CATCH <catch> END CATCH`.
    TryCatch {
        try_body: Box<Stmt>,
        catch_body: Box<Stmt>,
    },
}

/// The result of parsing a procedure: its declared parameters (empty in
/// batch mode) and its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedProc {
    pub params: Vec<ProcParameter>,
    pub body: Stmt,
}
