//! Thin wrapper over `sqlparser`'s tokenizer.
//!
//! The procedural shell (`IF`/`WHILE`/`BEGIN`/`TRY`/`CATCH`) isn't part of
//! `sqlparser`'s `Statement` AST, so the parser in this module drives the
//! token stream itself rather than calling `sqlparser::parser::Parser`.
//! `sqlparser` still does the actual lexing (string/number/identifier
//! rules, comment handling, the `MsSqlDialect`'s `@`-prefixed identifiers)
//! so this crate never reinvents a SQL lexer.

use sqlparser::dialect::MsSqlDialect;
use sqlparser::tokenizer::{Token, Tokenizer, Whitespace};

/// A token plus the 1-based source line it starts on.
#[derive(Debug, Clone)]
pub struct LocatedToken {
    pub token: Token,
    pub line: u32,
}

fn newline_count(ws: &Whitespace) -> u32 {
    match ws {
        Whitespace::Newline => 1,
        Whitespace::MultiLineComment(s) => s.matches('\n').count() as u32,
        _ => 0,
    }
}

/// Tokenise `sql`, dropping whitespace/comment tokens but using them to
/// track the source line each remaining token starts on.
pub fn tokenize_with_lines(sql: &str) -> Result<Vec<LocatedToken>, String> {
    let dialect = MsSqlDialect {};
    let tokens = Tokenizer::new(&dialect, sql)
        .tokenize()
        .map_err(|e| e.to_string())?;

    let mut line = 1u32;
    let mut out = Vec::with_capacity(tokens.len());
    for token in tokens {
        if let Token::Whitespace(ws) = &token {
            line += newline_count(ws);
            continue;
        }
        out.push(LocatedToken { token, line });
    }
    Ok(out)
}

/// Uppercased `value` if `token` is a `Word`, else `None`.
pub fn word_upper(token: &Token) -> Option<String> {
    match token {
        Token::Word(w) => Some(w.value.to_uppercase()),
        _ => None,
    }
}
