//! Statement Splitter: pulls the executable body out of a procedure
//! definition and recovers individual statements from it by scanning
//! lines, not by parsing. This is deliberately lossy — a statement that
//! spans a keyword boundary in an unusual way, or nested DML inside a
//! dynamic SQL string, can be mis-split. The sandbox only needs "close
//! enough" statements to infer a schema and exercise branches with.

/// A maximal run of identifier characters (including `@`/`#` for T-SQL
/// variables and temp tables) with its byte offsets in the source.
fn words_with_offsets(source: &str) -> Vec<(usize, usize, &str)> {
    let mut out = Vec::new();
    let mut start = None;
    for (i, c) in source.char_indices() {
        let is_word_char = c.is_alphanumeric() || c == '_' || c == '@' || c == '#';
        match (is_word_char, start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                out.push((s, i, &source[s..i]));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        out.push((s, source.len(), &source[s..]));
    }
    out
}

fn has_proc_header(words: &[(usize, usize, &str)]) -> bool {
    let word = |i: usize| words.get(i).map(|(_, _, w)| w.to_uppercase());
    if word(0).as_deref() != Some("CREATE") {
        return false;
    }
    match word(1).as_deref() {
        Some("PROC") | Some("PROCEDURE") => true,
        Some("OR") => {
            word(2).as_deref() == Some("ALTER")
                && matches!(word(3).as_deref(), Some("PROC") | Some("PROCEDURE"))
        }
        _ => false,
    }
}

/// Strips one outer `BEGIN ... END` wrapper from `text`, if `text` (after
/// leading whitespace) starts with one. `words` must be the word offsets
/// of `text` itself.
fn strip_outer_begin_end(text: &str, words: &[(usize, usize, &str)]) -> String {
    match words.first() {
        Some((_, first_end, w)) if w.eq_ignore_ascii_case("BEGIN") => {
            let mut depth = 0i32;
            let mut matching_end_start = None;
            for (start, _, word) in words {
                if word.eq_ignore_ascii_case("BEGIN") {
                    depth += 1;
                } else if word.eq_ignore_ascii_case("END") {
                    depth -= 1;
                    if depth == 0 {
                        matching_end_start = Some(*start);
                        break;
                    }
                }
            }
            match matching_end_start {
                Some(end_start) => text[*first_end..end_start].trim().to_string(),
                None => text.trim().to_string(),
            }
        }
        _ => text.trim().to_string(),
    }
}

/// Returns the text the sandbox should scan for statements: everything
/// after `CREATE PROC[EDURE] ... AS`, with one outer `BEGIN...END`
/// wrapper stripped. Falls back to the whole input unchanged when no
/// procedure header is found (a bare batch of statements).
pub fn extract_body(source: &str) -> String {
    let words = words_with_offsets(source);
    if !has_proc_header(&words) {
        return strip_outer_begin_end(source, &words);
    }
    let as_word_end = words
        .iter()
        .find(|(_, _, w)| w.eq_ignore_ascii_case("AS"))
        .map(|(_, end, _)| *end);
    let body_start = match as_word_end {
        Some(end) => end,
        None => return source.trim().to_string(),
    };
    let raw_body = &source[body_start..];
    let body_words = words_with_offsets(raw_body);
    strip_outer_begin_end(raw_body, &body_words)
}

const OPENER_KEYWORDS: &[&str] = &["SELECT", "INSERT", "UPDATE", "DELETE", "CREATE", "DROP", "WITH"];

const BOUNDARY_KEYWORDS: &[&str] = &[
    "BEGIN", "END", "IF", "WHILE", "ELSE", "DECLARE", "SET", "EXEC", "EXECUTE", "COMMIT",
    "ROLLBACK", "GO", "PRINT", "RETURN", "RAISERROR", "SAVE", "TRY", "CATCH",
];

fn first_word_upper(line: &str) -> String {
    line.split_whitespace()
        .next()
        .unwrap_or("")
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_uppercase()
}

/// Recovers DML/DDL statements from `body` by scanning lines for opener
/// keywords, accumulating continuation lines until a boundary keyword, a
/// blank line, or a trailing `;` ends the statement.
pub fn split_statements(body: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    let flush = |current: &mut Vec<&str>, out: &mut Vec<String>| {
        if current.is_empty() {
            return;
        }
        let text = current.join("\n");
        let text = text.trim().trim_end_matches(';').trim();
        if !text.is_empty() {
            out.push(text.to_string());
        }
        current.clear();
    };

    for raw_line in body.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        let first_word = first_word_upper(line);
        let is_opener = OPENER_KEYWORDS.contains(&first_word.as_str());
        let is_boundary = BOUNDARY_KEYWORDS.contains(&first_word.as_str());

        if is_opener {
            flush(&mut current, &mut statements);
            current.push(line);
        } else if is_boundary {
            flush(&mut current, &mut statements);
        } else if !current.is_empty() {
            current.push(line);
        }

        if line.ends_with(';') {
            flush(&mut current, &mut statements);
        }
    }
    flush(&mut current, &mut statements);
    statements
}
