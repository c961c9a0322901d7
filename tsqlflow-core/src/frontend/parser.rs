//! Recursive-descent parser over the located token stream from
//! [`super::lexer`], producing the control-flow AST in [`super::ast`].
//!
//! This only parses the procedural shell — `CREATE PROCEDURE` headers,
//! `IF`/`ELSE`, `WHILE`, `BEGIN...END`, `BEGIN TRY...END TRY BEGIN
//! CATCH...END CATCH` — and a flat parameter list. Everything else (the
//! body of a DML statement, a condition's expression) is kept as a
//! verbatim snippet; see `ast::Snippet`.

use sqlparser::tokenizer::Token;

use super::ast::{ParsedProc, Snippet, Stmt};
use super::lexer::{tokenize_with_lines, word_upper, LocatedToken};
use crate::cfg::ProcParameter;
use crate::error::CoreError;

/// Keywords that always start a new statement or construct. A simple
/// statement's snippet stops before one of these appears on a later line,
/// even without a terminating `;`.
const STATEMENT_BOUNDARY_KEYWORDS: &[&str] = &["BEGIN", "END", "IF", "WHILE", "ELSE"];

struct Parser<'a> {
    tokens: Vec<LocatedToken>,
    lines: Vec<&'a str>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str, tokens: Vec<LocatedToken>) -> Self {
        Parser {
            tokens,
            lines: source.lines().collect(),
            pos: 0,
        }
    }

    fn slice_lines(&self, start_line: u32, end_line: u32) -> String {
        let start = start_line.saturating_sub(1) as usize;
        let end = (end_line as usize).min(self.lines.len());
        if start >= end {
            return String::new();
        }
        self.lines[start..end].join("\n").trim().to_string()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|t| &t.token)
    }

    fn current_line(&self) -> u32 {
        self.tokens
            .get(self.pos)
            .map(|t| t.line)
            .or_else(|| self.tokens.last().map(|t| t.line))
            .unwrap_or(1)
    }

    fn peek_word(&self) -> Option<String> {
        self.peek().and_then(word_upper)
    }

    fn peek_word_at(&self, offset: usize) -> Option<String> {
        self.peek_at(offset).and_then(word_upper)
    }

    fn peek_word_is(&self, word: &str) -> bool {
        self.peek_word().as_deref() == Some(word)
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn expect_word(&mut self, word: &str) -> Result<(), CoreError> {
        if self.peek_word_is(word) {
            self.advance();
            Ok(())
        } else {
            Err(CoreError::BadInput(format!(
                "expected `{word}` near line {}",
                self.current_line()
            )))
        }
    }

    fn skip_semicolons(&mut self) {
        while matches!(self.peek(), Some(Token::SemiColon)) {
            self.advance();
        }
    }

    /// Parses statements until EOF or a token whose uppercased word is in
    /// `stop_words`. Does not consume the stop token.
    fn parse_stmt_seq(&mut self, stop_words: &[&str]) -> Result<Vec<Stmt>, CoreError> {
        let mut stmts = Vec::new();
        loop {
            self.skip_semicolons();
            match self.peek_word() {
                None if self.peek().is_none() => break,
                Some(w) if stop_words.contains(&w.as_str()) => break,
                _ => {}
            }
            if self.pos >= self.tokens.len() {
                break;
            }
            stmts.push(self.parse_stmt()?);
        }
        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> Result<Stmt, CoreError> {
        match self.peek_word().as_deref() {
            Some("BEGIN") => match self.peek_word_at(1).as_deref() {
                Some("TRY") => self.parse_try_catch(),
                Some("TRANSACTION") | Some("TRAN") => self.parse_simple(),
                _ => self.parse_block(),
            },
            Some("IF") => self.parse_if(),
            Some("WHILE") => self.parse_while(),
            _ => self.parse_simple(),
        }
    }

    fn parse_block(&mut self) -> Result<Stmt, CoreError> {
        self.expect_word("BEGIN")?;
        let stmts = self.parse_stmt_seq(&["END"])?;
        self.expect_word("END")?;
        Ok(Stmt::Block(stmts))
    }

    fn parse_try_catch(&mut self) -> Result<Stmt, CoreError> {
        self.expect_word("BEGIN")?;
        self.expect_word("TRY")?;
        let try_stmts = self.parse_stmt_seq(&["END"])?;
        self.expect_word("END")?;
        self.expect_word("TRY")?;
        self.expect_word("BEGIN")?;
        self.expect_word("CATCH")?;
        let catch_stmts = self.parse_stmt_seq(&["END"])?;
        self.expect_word("END")?;
        self.expect_word("CATCH")?;
        Ok(Stmt::TryCatch {
            try_body: Box::new(Stmt::Block(try_stmts)),
            catch_body: Box::new(Stmt::Block(catch_stmts)),
        })
    }

    fn parse_if(&mut self) -> Result<Stmt, CoreError> {
        self.expect_word("IF")?;
        let cond = self.capture_condition();
        let then_branch = if self.pos < self.tokens.len() {
            self.parse_stmt()?
        } else {
            Stmt::Block(vec![])
        };
        let else_branch = if self.peek_word_is("ELSE") {
            self.advance();
            let branch = if self.pos < self.tokens.len() {
                self.parse_stmt()?
            } else {
                Stmt::Block(vec![])
            };
            Some(Box::new(branch))
        } else {
            None
        };
        Ok(Stmt::If {
            cond,
            then_branch: Box::new(then_branch),
            else_branch,
        })
    }

    fn parse_while(&mut self) -> Result<Stmt, CoreError> {
        self.expect_word("WHILE")?;
        let cond = self.capture_condition();
        let body = if self.pos < self.tokens.len() {
            self.parse_stmt()?
        } else {
            Stmt::Block(vec![])
        };
        Ok(Stmt::While {
            cond,
            body: Box::new(body),
        })
    }

    /// Captures an `IF`/`WHILE` condition: everything from the current
    /// position to the end of its starting line, extended across lines
    /// only while parens stay unbalanced. A condition split across lines
    /// without open parens is not supported.
    fn capture_condition(&mut self) -> Snippet {
        let start_idx = self.pos;
        if start_idx >= self.tokens.len() {
            return Snippet::empty(self.current_line());
        }
        let start_line = self.tokens[start_idx].line;
        let mut depth: i32 = 0;
        let mut last_idx = start_idx;
        loop {
            if self.pos >= self.tokens.len() {
                break;
            }
            if self.pos > start_idx && depth <= 0 {
                if word_upper(&self.tokens[self.pos].token).as_deref() == Some("BEGIN") {
                    break;
                }
                let cur_line = self.tokens[self.pos].line;
                let prev_line = self.tokens[last_idx].line;
                if cur_line > prev_line {
                    break;
                }
            }
            match &self.tokens[self.pos].token {
                Token::LParen => depth += 1,
                Token::RParen => depth -= 1,
                _ => {}
            }
            last_idx = self.pos;
            self.pos += 1;
        }
        let end_line = self.tokens[last_idx].line;
        Snippet {
            text: self.slice_lines(start_line, end_line),
            start_line,
            end_line,
        }
    }

    fn parse_simple(&mut self) -> Result<Stmt, CoreError> {
        let start_idx = self.pos;
        if start_idx >= self.tokens.len() {
            return Err(CoreError::BadInput("expected a statement".into()));
        }
        let start_line = self.tokens[start_idx].line;
        let keyword = self.peek_word().unwrap_or_else(|| "UNKNOWN".into());
        let mut last_idx = start_idx;
        loop {
            if self.pos >= self.tokens.len() {
                break;
            }
            if matches!(self.tokens[self.pos].token, Token::SemiColon) {
                last_idx = self.pos;
                self.pos += 1;
                break;
            }
            if self.pos > start_idx {
                if let Some(w) = word_upper(&self.tokens[self.pos].token) {
                    if STATEMENT_BOUNDARY_KEYWORDS.contains(&w.as_str()) {
                        break;
                    }
                }
            }
            last_idx = self.pos;
            self.pos += 1;
        }
        let end_line = self.tokens[last_idx].line;
        let snippet = Snippet {
            text: self.slice_lines(start_line, end_line),
            start_line,
            end_line,
        };
        Ok(Stmt::Simple { keyword, snippet })
    }

    /// Consumes a schema-qualified object name (`dbo.MyProc`, `MyProc`).
    fn skip_object_name(&mut self) {
        loop {
            match self.peek() {
                Some(Token::Word(_)) => self.advance(),
                Some(Token::Period) => self.advance(),
                _ => break,
            }
        }
    }

    /// Parses an optional `CREATE [OR ALTER] PROC[EDURE] <name> (<params>) AS`
    /// header. Returns `None` (leaving `self.pos` unchanged) if the source
    /// doesn't start with `CREATE PROC[EDURE]` — batch-mode scripts skip
    /// straight to a body.
    fn try_parse_header(&mut self) -> Result<Option<Vec<ProcParameter>>, CoreError> {
        if !self.peek_word_is("CREATE") {
            return Ok(None);
        }
        let checkpoint = self.pos;
        self.advance();
        if self.peek_word_is("OR") {
            self.advance();
            if self.peek_word_is("ALTER") {
                self.advance();
            }
        }
        match self.peek_word().as_deref() {
            Some("PROCEDURE") | Some("PROC") => self.advance(),
            _ => {
                self.pos = checkpoint;
                return Ok(None);
            }
        }
        self.skip_object_name();
        let params = self.parse_param_list()?;
        self.expect_word("AS")?;
        Ok(Some(params))
    }

    fn parse_param_list(&mut self) -> Result<Vec<ProcParameter>, CoreError> {
        let mut params = Vec::new();
        // An optional parenthesized parameter list, or a bare comma
        // separated list directly before AS (both forms are legal T-SQL).
        let parenthesized = matches!(self.peek(), Some(Token::LParen));
        if parenthesized {
            self.advance();
        }
        loop {
            if self.peek_word_is("AS") {
                break;
            }
            if parenthesized && matches!(self.peek(), Some(Token::RParen)) {
                self.advance();
                break;
            }
            if self.peek().is_none() {
                break;
            }
            let name = match self.peek() {
                Some(Token::Word(w)) if w.value.starts_with('@') => {
                    let v = w.value.clone();
                    self.advance();
                    v
                }
                _ => break,
            };

            let mut type_tokens = Vec::new();
            let mut depth = 0i32;
            loop {
                match self.peek() {
                    Some(Token::LParen) => {
                        depth += 1;
                        type_tokens.push(self.peek().unwrap().to_string());
                        self.advance();
                    }
                    Some(Token::RParen) if depth > 0 => {
                        depth -= 1;
                        type_tokens.push(self.peek().unwrap().to_string());
                        self.advance();
                    }
                    Some(Token::RParen) if parenthesized && depth == 0 => break,
                    Some(Token::Comma) if depth == 0 => break,
                    Some(Token::Eq) if depth == 0 => break,
                    Some(t) if depth == 0 && is_param_modifier(t) => break,
                    Some(t) => {
                        type_tokens.push(t.to_string());
                        self.advance();
                    }
                    None => break,
                }
            }
            let sql_type = type_tokens.join(" ");

            let mut has_default = false;
            let mut default_value = None;
            if matches!(self.peek(), Some(Token::Eq)) {
                has_default = true;
                self.advance();
                let mut default_tokens = Vec::new();
                let mut depth = 0i32;
                loop {
                    match self.peek() {
                        Some(Token::LParen) => {
                            depth += 1;
                            default_tokens.push(self.peek().unwrap().to_string());
                            self.advance();
                        }
                        Some(Token::RParen) if depth > 0 => {
                            depth -= 1;
                            default_tokens.push(self.peek().unwrap().to_string());
                            self.advance();
                        }
                        Some(Token::RParen) if parenthesized && depth == 0 => break,
                        Some(Token::Comma) if depth == 0 => break,
                        Some(t) if depth == 0 && is_param_modifier(t) => break,
                        Some(t) => {
                            default_tokens.push(t.to_string());
                            self.advance();
                        }
                        None => break,
                    }
                }
                default_value = Some(default_tokens.join(" "));
            }

            let mut is_output = false;
            loop {
                match self.peek_word().as_deref() {
                    Some("OUTPUT") | Some("OUT") => {
                        is_output = true;
                        self.advance();
                    }
                    Some("READONLY") => {
                        self.advance();
                    }
                    _ => break,
                }
            }

            params.push(ProcParameter {
                name,
                sql_type,
                is_output,
                has_default,
                default_value,
            });

            if matches!(self.peek(), Some(Token::Comma)) {
                self.advance();
                continue;
            }
            if parenthesized && matches!(self.peek(), Some(Token::RParen)) {
                self.advance();
            }
            break;
        }
        Ok(params)
    }
}

fn is_param_modifier(t: &Token) -> bool {
    matches!(
        word_upper(t).as_deref(),
        Some("OUTPUT") | Some("OUT") | Some("READONLY") | Some("AS")
    )
}

/// Parses a full `CREATE PROCEDURE ... AS ...` definition, or a bare batch
/// of statements if no procedure header is present.
pub fn parse_procedure(source: &str) -> Result<ParsedProc, CoreError> {
    let tokens = tokenize_with_lines(source).map_err(CoreError::BadInput)?;
    let mut parser = Parser::new(source, tokens);
    let params = parser.try_parse_header()?.unwrap_or_default();
    let stmts = parser.parse_stmt_seq(&[])?;
    Ok(ParsedProc {
        params,
        body: Stmt::Block(stmts),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_batch_with_no_header() {
        let proc = parse_procedure("SELECT 1\nSELECT 2").unwrap();
        match proc.body {
            Stmt::Block(stmts) => assert_eq!(stmts.len(), 2),
            _ => panic!("expected a block"),
        }
    }

    #[test]
    fn parses_header_with_params_and_defaults() {
        let src = "CREATE PROCEDURE dbo.GetUser\n    @Id INT,\n    @Name NVARCHAR(100) = 'anon' OUTPUT\nAS\nBEGIN\n    SELECT 1\nEND";
        let proc = parse_procedure(src).unwrap();
        assert_eq!(proc.params.len(), 2);
        assert_eq!(proc.params[0].name, "@Id");
        assert!(!proc.params[0].has_default);
        assert_eq!(proc.params[1].name, "@Name");
        assert!(proc.params[1].has_default);
        assert!(proc.params[1].is_output);
    }

    #[test]
    fn parses_if_else_with_single_line_condition() {
        let src = "IF @X > 0\n    SELECT 'pos'\nELSE\n    SELECT 'neg'";
        let proc = parse_procedure(src).unwrap();
        let stmts = match proc.body {
            Stmt::Block(s) => s,
            _ => panic!(),
        };
        match &stmts[0] {
            Stmt::If {
                cond, else_branch, ..
            } => {
                assert!(cond.text.contains("@X > 0"));
                assert!(else_branch.is_some());
            }
            _ => panic!("expected an if"),
        }
    }

    #[test]
    fn parses_try_catch() {
        let src = "BEGIN TRY\n    SELECT 1\nEND TRY\nBEGIN CATCH\n    SELECT 2\nEND CATCH";
        let proc = parse_procedure(src).unwrap();
        let stmts = match proc.body {
            Stmt::Block(s) => s,
            _ => panic!(),
        };
        assert!(matches!(stmts[0], Stmt::TryCatch { .. }));
    }

    #[test]
    fn begin_transaction_is_a_simple_statement_not_a_block() {
        let src = "BEGIN TRANSACTION\nUPDATE t SET x = 1\nCOMMIT";
        let proc = parse_procedure(src).unwrap();
        let stmts = match proc.body {
            Stmt::Block(s) => s,
            _ => panic!(),
        };
        assert_eq!(stmts.len(), 3);
        assert!(matches!(&stmts[0], Stmt::Simple { keyword, .. } if keyword == "BEGIN"));
    }

    #[test]
    fn parses_while_loop() {
        let src = "WHILE @I < 10\nBEGIN\n    SET @I = @I + 1\nEND";
        let proc = parse_procedure(src).unwrap();
        let stmts = match proc.body {
            Stmt::Block(s) => s,
            _ => panic!(),
        };
        match &stmts[0] {
            Stmt::While { cond, body } => {
                assert!(cond.text.contains("@I < 10"));
                assert!(matches!(**body, Stmt::Block(_)));
            }
            _ => panic!("expected a while"),
        }
    }
}
