//! T-SQL → SQLite dialect adapter: a fixed-order chain of textual
//! substitutions. Not a rewrite of the expression tree — the sandbox
//! never parses these statements, it just makes them syntactically
//! acceptable to `rusqlite` and close enough semantically to exercise the
//! procedure's data shape.

/// Case-insensitive search for `word` as a standalone token in an
/// already-uppercased `haystack_upper`.
fn find_word(haystack_upper: &str, word: &str) -> Option<usize> {
    let bytes = haystack_upper.as_bytes();
    let mut start = 0;
    while let Some(rel) = haystack_upper[start..].find(word) {
        let idx = start + rel;
        let before_ok = idx == 0 || !bytes[idx - 1].is_ascii_alphanumeric();
        let after = idx + word.len();
        let after_ok = after >= bytes.len() || !bytes[after].is_ascii_alphanumeric();
        if before_ok && after_ok {
            return Some(idx);
        }
        start = idx + word.len();
    }
    None
}

/// Index (relative to `s`) of the `)` matching the `(` at `s[0]`.
fn matching_paren(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    if bytes.first() != Some(&b'(') {
        return None;
    }
    let mut depth = 0i32;
    for (i, b) in bytes.iter().enumerate() {
        match b {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn replace_word_ci(s: &str, from: &str, to: &str) -> String {
    let mut result = String::new();
    let mut rest = s;
    loop {
        let upper = rest.to_uppercase();
        match find_word(&upper, from) {
            Some(idx) => {
                result.push_str(&rest[..idx]);
                result.push_str(to);
                rest = &rest[idx + from.len()..];
            }
            None => {
                result.push_str(rest);
                break;
            }
        }
    }
    result
}

fn replace_literal_ci(s: &str, from: &str, to: &str) -> String {
    let mut result = String::new();
    let mut rest = s;
    let from_upper = from.to_uppercase();
    loop {
        let upper = rest.to_uppercase();
        match upper.find(&from_upper) {
            Some(idx) => {
                result.push_str(&rest[..idx]);
                result.push_str(to);
                rest = &rest[idx + from.len()..];
            }
            None => {
                result.push_str(rest);
                break;
            }
        }
    }
    result
}

/// Strips `WITH (NOLOCK)` and bare `(NOLOCK)` table hints. Runs before
/// [`strip_with_hints`] so a combined `WITH (NOLOCK)` doesn't get only
/// half-stripped by the more general rule.
fn strip_nolock_hints(s: &str) -> String {
    let mut result = String::new();
    let mut rest = s;
    loop {
        let upper = rest.to_uppercase();
        if let Some(idx) = find_word(&upper, "NOLOCK") {
            let open = rest[..idx].rfind('(');
            let close_rel = rest[idx..].find(')');
            if let (Some(open), Some(close_rel)) = (open, close_rel) {
                let close = idx + close_rel;
                let before = rest[..open].trim_end();
                let start = if before.to_uppercase().ends_with("WITH") {
                    before.len() - 4
                } else {
                    open
                };
                result.push_str(&rest[..start]);
                rest = &rest[close + 1..];
                continue;
            }
        }
        result.push_str(rest);
        break;
    }
    result
}

/// Strips any remaining `WITH (...)` table hint (index hints, lock hints
/// other than `NOLOCK`, `FORCESEEK`, and the like).
fn strip_with_hints(s: &str) -> String {
    let mut result = String::new();
    let mut rest = s;
    loop {
        let upper = rest.to_uppercase();
        if let Some(idx) = find_word(&upper, "WITH") {
            let after = &rest[idx + 4..];
            let after_trimmed = after.trim_start();
            if after_trimmed.starts_with('(') {
                let ws_len = after.len() - after_trimmed.len();
                let open = idx + 4 + ws_len;
                if let Some(close_rel) = matching_paren(&rest[open..]) {
                    let close = open + close_rel;
                    result.push_str(&rest[..idx]);
                    rest = &rest[close + 1..];
                    continue;
                }
            }
        }
        result.push_str(rest);
        break;
    }
    result
}

/// Strips the default `dbo.` schema prefix; SQLite has no schema
/// namespace to map it onto.
fn strip_schema_prefixes(s: &str) -> String {
    let mut result = String::new();
    let mut rest = s;
    loop {
        let upper = rest.to_uppercase();
        if let Some(idx) = find_word(&upper, "DBO") {
            if rest.as_bytes().get(idx + 3) == Some(&b'.') {
                result.push_str(&rest[..idx]);
                rest = &rest[idx + 4..];
                continue;
            }
        }
        result.push_str(rest);
        break;
    }
    result
}

/// Rewrites `SELECT TOP (n) ...` / `SELECT TOP n ...` into `SELECT ...
/// LIMIT n`, since SQLite's row cap is a trailing clause, not a leading
/// modifier.
fn rewrite_top_to_limit(s: &str) -> String {
    let upper = s.to_uppercase();
    let Some(select_idx) = find_word(&upper, "SELECT") else {
        return s.to_string();
    };
    let after_select = select_idx + 6;
    let gap = upper[after_select..].len() - upper[after_select..].trim_start().len();
    let top_search_start = after_select + gap;
    let Some(0) = find_word(&upper[top_search_start..], "TOP") else {
        return s.to_string();
    };
    let top_start = top_search_start;
    let after_top = top_start + 3;
    let bytes = s.as_bytes();
    let mut cursor = after_top;
    while cursor < bytes.len() && (bytes[cursor] as char).is_whitespace() {
        cursor += 1;
    }
    let paren = bytes.get(cursor) == Some(&b'(');
    let num_start = if paren { cursor + 1 } else { cursor };
    let mut num_end = num_start;
    while num_end < bytes.len() && (bytes[num_end] as char).is_ascii_digit() {
        num_end += 1;
    }
    if num_end == num_start {
        return s.to_string();
    }
    let number = &s[num_start..num_end];
    let mut close = num_end;
    if paren {
        while close < bytes.len() && bytes[close] != b')' {
            close += 1;
        }
        if close < bytes.len() {
            close += 1;
        }
    }
    let mut out = String::new();
    out.push_str(&s[..top_start]);
    out.push_str(s[close..].trim_start());
    let trimmed = out.trim_end().trim_end_matches(';').trim_end();
    format!("{trimmed} LIMIT {number}")
}

/// Rewrites `IDENTITY(a,b)` (and the bare `IDENTITY` keyword) into
/// `AUTOINCREMENT`; SQLite has no seed/increment arguments of its own.
fn rewrite_identity(s: &str) -> String {
    let mut result = String::new();
    let mut rest = s;
    loop {
        let upper = rest.to_uppercase();
        if let Some(idx) = find_word(&upper, "IDENTITY") {
            let after = &rest[idx + "IDENTITY".len()..];
            let after_trimmed = after.trim_start();
            if after_trimmed.starts_with('(') {
                let ws_len = after.len() - after_trimmed.len();
                let open = idx + "IDENTITY".len() + ws_len;
                if let Some(close_rel) = matching_paren(&rest[open..]) {
                    let close = open + close_rel;
                    result.push_str(&rest[..idx]);
                    result.push_str("AUTOINCREMENT");
                    rest = &rest[close + 1..];
                    continue;
                }
            }
            result.push_str(&rest[..idx]);
            result.push_str("AUTOINCREMENT");
            rest = &rest[idx + "IDENTITY".len()..];
            continue;
        }
        result.push_str(rest);
        break;
    }
    result
}

fn rewrite_functions(s: &str) -> String {
    let mut s = replace_literal_ci(s, "GETUTCDATE()", "CURRENT_TIMESTAMP");
    s = replace_literal_ci(&s, "GETDATE()", "CURRENT_TIMESTAMP");
    s = replace_literal_ci(&s, "NEWID()", "lower(hex(randomblob(16)))");
    s = replace_word_ci(&s, "ISNULL", "COALESCE");
    s = replace_word_ci(&s, "LEN", "LENGTH");
    s = replace_word_ci(&s, "CHARINDEX", "INSTR");
    s
}

const TYPE_RULES: &[(&str, &str)] = &[
    ("NVARCHAR", "TEXT"),
    ("VARCHAR", "TEXT"),
    ("NCHAR", "TEXT"),
    ("CHAR", "TEXT"),
    ("UNIQUEIDENTIFIER", "TEXT"),
    ("DATETIME2", "TEXT"),
    ("SMALLDATETIME", "TEXT"),
    ("DATETIME", "TEXT"),
    ("DATE", "TEXT"),
    ("TIME", "TEXT"),
    ("BIGINT", "INTEGER"),
    ("SMALLINT", "INTEGER"),
    ("TINYINT", "INTEGER"),
    ("INT", "INTEGER"),
    ("BIT", "INTEGER"),
    ("DECIMAL", "REAL"),
    ("NUMERIC", "REAL"),
    ("SMALLMONEY", "REAL"),
    ("MONEY", "REAL"),
    ("FLOAT", "REAL"),
];

fn rewrite_types(s: &str) -> String {
    let mut s = s.to_string();
    for (from, to) in TYPE_RULES {
        s = replace_word_ci(&s, from, to);
    }
    s
}

fn rewrite_brackets(s: &str) -> String {
    s.chars()
        .map(|c| if c == '[' || c == ']' { '"' } else { c })
        .collect()
}

/// Runs every substitution rule, in the fixed order the sandbox relies
/// on: hints, then schema prefixes, then the `TOP`/`LIMIT` rewrite, then
/// function renames, then the `IDENTITY` rewrite, then type
/// simplification, then bracket quoting.
pub fn adapt_to_sqlite(stmt: &str) -> String {
    let s = strip_nolock_hints(stmt);
    let s = strip_with_hints(&s);
    let s = strip_schema_prefixes(&s);
    let s = rewrite_top_to_limit(&s);
    let s = rewrite_functions(&s);
    let s = rewrite_identity(&s);
    let s = rewrite_types(&s);
    rewrite_brackets(&s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_nolock_hint() {
        let out = adapt_to_sqlite("SELECT * FROM Products WITH (NOLOCK)");
        assert!(!out.to_uppercase().contains("NOLOCK"));
        assert!(!out.to_uppercase().contains("WITH"));
    }

    #[test]
    fn strips_other_with_hints() {
        let out = adapt_to_sqlite("SELECT * FROM Products WITH (INDEX(1))");
        assert!(!out.to_uppercase().contains("WITH"));
    }

    #[test]
    fn strips_dbo_schema_prefix() {
        let out = adapt_to_sqlite("SELECT * FROM dbo.Products");
        assert!(!out.to_uppercase().contains("DBO"));
        assert!(out.contains("Products"));
    }

    #[test]
    fn rewrites_top_to_limit() {
        let out = adapt_to_sqlite("SELECT TOP (5) Id FROM Products");
        assert!(out.to_uppercase().ends_with("LIMIT 5"));
        assert!(!out.to_uppercase().contains("TOP"));
    }

    #[test]
    fn rewrites_isnull_and_len() {
        let out = adapt_to_sqlite("SELECT ISNULL(Name, '') , LEN(Name) FROM Products");
        assert!(out.contains("COALESCE"));
        assert!(out.contains("LENGTH"));
    }

    #[test]
    fn rewrites_identity_to_autoincrement() {
        let out = adapt_to_sqlite("CREATE TABLE T (Id INT IDENTITY(1,1) PRIMARY KEY)");
        assert!(out.contains("AUTOINCREMENT"));
        assert!(!out.to_uppercase().contains("IDENTITY"));
    }

    #[test]
    fn rewrites_common_types() {
        let out = adapt_to_sqlite("CREATE TABLE T (Id INT, Name NVARCHAR(100), Price DECIMAL(10,2))");
        assert!(out.contains("INTEGER"));
        assert!(out.contains("TEXT"));
        assert!(out.contains("REAL"));
    }

    #[test]
    fn rewrites_brackets_to_double_quotes() {
        let out = adapt_to_sqlite("SELECT [Id] FROM [Products]");
        assert!(out.contains("\"Id\""));
        assert!(out.contains("\"Products\""));
    }
}
