//! Schema Inference & Seeder: scans the sandbox's already-adapted
//! statements for table/column usage and produces `CREATE TABLE` plus
//! reproducible `INSERT` statements for every table the procedure
//! touches. Never looks at a real database — tables are invented purely
//! from how the procedure's SQL refers to them.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;

use super::SandboxConfig;

const TABLE_REF_KEYWORDS: &[&str] = &["FROM", "JOIN", "INTO", "UPDATE"];

/// Closed, ordered substring-based precedence: the first matching rule
/// wins. Column names ending in `Id` are checked before this list runs
/// (see [`infer_column_type`]).
const TYPE_INFERENCE_RULES: &[(&str, &str)] = &[
    ("DATE", "TEXT"),
    ("TIME", "TEXT"),
    ("PRICE", "REAL"),
    ("AMOUNT", "REAL"),
    ("COST", "REAL"),
    ("TOTAL", "REAL"),
    ("RATE", "REAL"),
    ("QUANTITY", "INTEGER"),
    ("QTY", "INTEGER"),
    ("COUNT", "INTEGER"),
    ("NUMBER", "INTEGER"),
    ("FLAG", "INTEGER"),
    ("ACTIVE", "INTEGER"),
    ("EMAIL", "TEXT"),
    ("NAME", "TEXT"),
    ("STATUS", "TEXT"),
    ("DESCRIPTION", "TEXT"),
    ("CODE", "TEXT"),
];

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

/// Grabs the identifier starting at or after byte `from`, skipping
/// leading whitespace, stripping a schema qualifier (`t.Col` → `Col`)
/// and surrounding double quotes. Returns the identifier and the byte
/// offset just past it.
fn next_identifier(s: &str, from: usize) -> Option<(String, usize)> {
    let bytes = s.as_bytes();
    let mut i = from.min(bytes.len());
    while i < bytes.len() && (bytes[i] as char).is_whitespace() {
        i += 1;
    }
    let start = i;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_alphanumeric() || c == '_' || c == '.' || c == '"' {
            i += 1;
        } else {
            break;
        }
    }
    if i == start {
        return None;
    }
    let raw = &s[start..i];
    let name = raw.trim_matches('"').rsplit('.').next().unwrap_or(raw);
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), i))
}

fn split_top_level_commas(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

fn table_names_in(stmt: &str) -> Vec<String> {
    let upper = stmt.to_uppercase();
    let mut names = Vec::new();
    for kw in TABLE_REF_KEYWORDS {
        let mut search_from = 0;
        while let Some(rel) = find_word(&upper[search_from..], kw) {
            let idx = search_from + rel;
            match next_identifier(stmt, idx + kw.len()) {
                Some((name, next)) => {
                    names.push(name);
                    search_from = next;
                }
                None => search_from = idx + kw.len(),
            }
        }
    }
    names.sort();
    names.dedup();
    names
}

/// `SELECT <cols> FROM ...` — only plain column references are kept;
/// `*` and expressions containing a function call are skipped.
fn select_column_list(stmt: &str) -> Option<Vec<String>> {
    let trimmed = stmt.trim_start();
    if !trimmed.to_uppercase().starts_with("SELECT") {
        return None;
    }
    let upper = stmt.to_uppercase();
    let select_idx = upper.len() - trimmed.len();
    let from_idx = find_word(&upper, "FROM")?;
    let cols_text = &stmt[select_idx + 6..from_idx];
    let mut out = Vec::new();
    for raw in split_top_level_commas(cols_text) {
        let c = raw.trim();
        if c.is_empty() || c == "*" || c.contains('(') {
            continue;
        }
        let first_token = c.split_whitespace().next().unwrap_or(c);
        let name = first_token.rsplit('.').next().unwrap_or(first_token).trim_matches('"');
        if !name.is_empty() {
            out.push(name.to_string());
        }
    }
    Some(out)
}

/// `UPDATE <table> SET col = val, ... [WHERE ...]`.
fn update_set_columns(stmt: &str) -> Option<(String, Vec<String>)> {
    let trimmed = stmt.trim_start();
    if !trimmed.to_uppercase().starts_with("UPDATE") {
        return None;
    }
    let upper = stmt.to_uppercase();
    let update_idx = upper.len() - trimmed.len();
    let (table, _) = next_identifier(stmt, update_idx + 6)?;
    let set_idx = find_word(&upper, "SET")?;
    let where_idx = find_word(&upper, "WHERE").unwrap_or(stmt.len());
    let assigns_text = &stmt[set_idx + 3..where_idx.min(stmt.len())];
    let mut cols = Vec::new();
    for part in split_top_level_commas(assigns_text) {
        if let Some(eq) = part.find('=') {
            let name = part[..eq]
                .trim()
                .rsplit('.')
                .next()
                .unwrap_or("")
                .trim_matches('"');
            if !name.is_empty() {
                cols.push(name.to_string());
            }
        }
    }
    Some((table, cols))
}

/// `INSERT INTO <table> (col, ...) VALUES (...)`. A column-less insert
/// (`INSERT INTO t DEFAULT VALUES` or `INSERT INTO t SELECT ...`) yields
/// the table with no columns attributed from this pattern.
fn insert_into_columns(stmt: &str) -> Option<(String, Vec<String>)> {
    let trimmed = stmt.trim_start();
    if !trimmed.to_uppercase().starts_with("INSERT") {
        return None;
    }
    let upper = stmt.to_uppercase();
    let into_idx = find_word(&upper, "INTO")?;
    let (table, after_table) = next_identifier(stmt, into_idx + 4)?;
    let rest = stmt[after_table..].trim_start();
    if !rest.starts_with('(') {
        return Some((table, Vec::new()));
    }
    let close_rel = matching_paren(rest)?;
    let inner = &rest[1..close_rel];
    let cols = split_top_level_commas(inner)
        .into_iter()
        .map(|c| c.trim().trim_matches('"').to_string())
        .filter(|c| !c.is_empty())
        .collect();
    Some((table, cols))
}

/// Accumulates every table the statements reference and every column
/// attributable to it via the four reference patterns.
fn reference_scan(statements: &[String]) -> BTreeMap<String, Vec<String>> {
    let mut tables: BTreeMap<String, Vec<String>> = BTreeMap::new();

    let mut add_columns = |table: &str, cols: &[String], tables: &mut BTreeMap<String, Vec<String>>| {
        let entry = tables.entry(table.to_string()).or_default();
        for c in cols {
            if !c.eq_ignore_ascii_case("id") {
                entry.push(c.clone());
            }
        }
    };

    for stmt in statements {
        for table in table_names_in(stmt) {
            tables.entry(table).or_default();
        }
        if let Some(cols) = select_column_list(stmt) {
            for table in table_names_in(stmt) {
                add_columns(&table, &cols, &mut tables);
            }
        }
        if let Some((table, cols)) = update_set_columns(stmt) {
            add_columns(&table, &cols, &mut tables);
        }
        if let Some((table, cols)) = insert_into_columns(stmt) {
            add_columns(&table, &cols, &mut tables);
        }
    }

    tables
}

/// `Id`-suffixed columns are always treated as foreign-key-shaped
/// integers before the general substring precedence list runs.
fn infer_column_type(column: &str) -> &'static str {
    let upper = column.to_uppercase();
    if upper.ends_with("ID") {
        return "INTEGER";
    }
    for (needle, ty) in TYPE_INFERENCE_RULES {
        if upper.contains(needle) {
            return ty;
        }
    }
    "TEXT"
}

const SAMPLE_NAMES: &[&str] = &[
    "Alice", "Bob", "Carol", "Dave", "Erin", "Frank", "Grace", "Heidi", "Ivan", "Judy", "Mallory",
    "Niaj",
];
const SAMPLE_STATUSES: &[&str] = &["active", "inactive", "pending"];

/// Vocabulary-driven value generation: column/table name decides the
/// *shape* of the generated value, the seeded RNG decides the specific
/// number when nothing more specific matches.
fn generate_value(rng: &mut StdRng, table: &str, column: &str, sql_type: &str, row_index: usize) -> String {
    let upper_col = column.to_uppercase();
    if upper_col.ends_with("ID") {
        return (row_index + 1).to_string();
    }
    if upper_col.contains("EMAIL") {
        return format!("user{}@example.com", row_index + 1);
    }
    if upper_col.contains("NAME") {
        return SAMPLE_NAMES[row_index % SAMPLE_NAMES.len()].to_string();
    }
    if upper_col.contains("STATUS") {
        return SAMPLE_STATUSES[row_index % SAMPLE_STATUSES.len()].to_string();
    }
    match sql_type {
        "INTEGER" => rng.gen_range(1..1000).to_string(),
        "REAL" => format!("{:.2}", rng.gen_range(1.0..1000.0)),
        _ => format!("{}_{}", table.to_lowercase(), row_index + 1),
    }
}

/// A table the sandbox invented, with the DDL and seed data to bring it
/// into existence before the procedure's statements run against it.
pub struct SeededTable {
    pub name: String,
    pub columns: Vec<String>,
    pub create_statement: String,
    pub insert_statements: Vec<String>,
    pub row_count: usize,
}

/// Infers a table/column schema from `statements` and generates
/// reproducible seed data for it. Two calls with the same statements and
/// the same `config.seed` produce byte-identical output.
pub fn infer_and_seed(statements: &[String], config: &SandboxConfig) -> Vec<SeededTable> {
    let refs = reference_scan(statements);
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut tables = Vec::new();

    for (name, mut columns) in refs {
        columns.sort();
        columns.dedup();

        let row_count = (config.min_rows_per_table + columns.len()).min(config.max_rows_per_table);

        let mut ddl_cols = vec!["Id INTEGER PRIMARY KEY AUTOINCREMENT".to_string()];
        for col in &columns {
            ddl_cols.push(format!("{col} {}", infer_column_type(col)));
        }
        let create_statement = format!("CREATE TABLE {name} ({})", ddl_cols.join(", "));

        let mut insert_statements = Vec::with_capacity(row_count);
        for row in 0..row_count {
            if columns.is_empty() {
                insert_statements.push(format!("INSERT INTO {name} DEFAULT VALUES"));
                continue;
            }
            let values: Vec<String> = columns
                .iter()
                .map(|c| {
                    let ty = infer_column_type(c);
                    let v = generate_value(&mut rng, &name, c, ty, row);
                    if ty == "TEXT" {
                        format!("'{}'", v.replace('\'', "''"))
                    } else {
                        v
                    }
                })
                .collect();
            insert_statements.push(format!(
                "INSERT INTO {name} ({}) VALUES ({})",
                columns.join(", "),
                values.join(", ")
            ));
        }

        tables.push(SeededTable {
            name,
            columns,
            create_statement,
            insert_statements,
            row_count,
        });
    }

    tables
}
