//! Predicate Evaluator: three-valued evaluation of the simple condition
//! shapes the dry-run walker and sandbox orchestrator both need to decide
//! which branch of an `IF`/`WHILE` is "definitely taken".
//!
//! Only two shapes are understood: `<operand> IS [NOT] NULL` and
//! `<operand> <op> <operand>` where at least one operand is a bound
//! parameter. Anything else — a subquery, a function call, a multi-part
//! boolean expression — evaluates to `None`, meaning "can't tell
//! statically"; callers treat that the same as SQL's `UNKNOWN`.

use std::collections::HashMap;

use tracing::trace;

/// `None` means the parameter was never bound for this run (distinct from
/// being bound to SQL `NULL`, which is `Some(None)`).
pub type Bindings = HashMap<String, Option<String>>;

const COMPARISON_OPERATORS: &[&str] = &["<>", "!=", "<=", ">=", "=", "<", ">"];

/// Evaluates `cond` against `bindings`. Returns `Some(true)`/`Some(false)`
/// when the shape is understood and fully resolvable, `None` otherwise.
pub fn evaluate(cond: &str, bindings: &Bindings) -> Option<bool> {
    let cond = cond.trim().trim_end_matches(';').trim();

    if let Some(result) = try_eval_is_null(cond, bindings) {
        trace!(%cond, result, "predicate matched IS [NOT] NULL shape");
        return Some(result);
    }
    let result = try_eval_comparison(cond, bindings);
    match result {
        Some(r) => trace!(%cond, result = r, "predicate matched comparison shape"),
        None => trace!(%cond, "predicate shape not recognised, statically unknown"),
    }
    result
}

fn try_eval_is_null(cond: &str, bindings: &Bindings) -> Option<bool> {
    let upper = cond.to_uppercase();
    let (operand, negated) = if let Some(stripped) = upper.strip_suffix("IS NOT NULL") {
        (stripped, true)
    } else if let Some(stripped) = upper.strip_suffix("IS NULL") {
        (stripped, false)
    } else {
        return None;
    };
    let operand = cond[..operand.trim_end().len()].trim();
    let value = resolve_operand(operand, bindings)?;
    let is_null = value.is_none();
    Some(if negated { !is_null } else { is_null })
}

fn try_eval_comparison(cond: &str, bindings: &Bindings) -> Option<bool> {
    for op in COMPARISON_OPERATORS {
        if let Some(idx) = find_operator(cond, op) {
            let lhs = cond[..idx].trim();
            let rhs = cond[idx + op.len()..].trim();
            if lhs.is_empty() || rhs.is_empty() {
                continue;
            }
            let left = resolve_operand(lhs, bindings)?;
            let right = resolve_operand(rhs, bindings)?;
            // A comparison against SQL NULL is always unknown.
            let (left, right) = (left?, right?);
            return Some(compare(&left, &right, normalize_operator(op)));
        }
    }
    None
}

/// Finds the first top-level occurrence of `op`, skipping quoted strings
/// so a literal like `'a=b'` doesn't get misread as an operator.
fn find_operator(cond: &str, op: &str) -> Option<usize> {
    let bytes = cond.as_bytes();
    let mut in_string = false;
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c == '\'' {
            in_string = !in_string;
            i += 1;
            continue;
        }
        if !in_string && cond[i..].starts_with(op) {
            // `<` / `>` must not match as a prefix of `<=`/`>=`/`<>` when
            // we're specifically looking for the shorter operator.
            if (op == "<" || op == ">") && matches!(bytes.get(i + 1), Some(b'=') | Some(b'>')) {
                i += 1;
                continue;
            }
            return Some(i);
        }
        i += 1;
    }
    None
}

fn normalize_operator(op: &str) -> &str {
    if op == "!=" {
        "<>"
    } else {
        op
    }
}

/// Resolves one side of a condition: a bound parameter reference or a
/// literal. Returns `None` if a referenced parameter was never bound.
/// Returns `Some(None)` for a parameter bound to SQL `NULL`.
fn resolve_operand(operand: &str, bindings: &Bindings) -> Option<Option<String>> {
    let operand = operand.trim();
    if let Some(name) = operand.strip_prefix('@') {
        let key = format!("@{}", name.to_uppercase());
        bindings
            .iter()
            .find(|(k, _)| k.to_uppercase() == key)
            .map(|(_, v)| v.clone())
    } else {
        Some(Some(literal_text(operand)))
    }
}

fn literal_text(literal: &str) -> String {
    if literal.len() >= 2 && literal.starts_with('\'') && literal.ends_with('\'') {
        literal[1..literal.len() - 1].to_string()
    } else {
        literal.to_string()
    }
}

/// Numeric comparison first; falls back to a string comparison when
/// either side doesn't parse as a number.
fn compare(left: &str, right: &str, op: &str) -> bool {
    match (left.parse::<f64>(), right.parse::<f64>()) {
        (Ok(l), Ok(r)) => apply_op(l.partial_cmp(&r), op),
        _ => apply_op(left.cmp(right).into(), op),
    }
}

fn apply_op(ordering: Option<std::cmp::Ordering>, op: &str) -> bool {
    use std::cmp::Ordering::*;
    let Some(ord) = ordering else { return false };
    match op {
        "=" => ord == Equal,
        "<>" => ord != Equal,
        "<" => ord == Less,
        ">" => ord == Greater,
        "<=" => ord != Greater,
        ">=" => ord != Less,
        _ => false,
    }
}
