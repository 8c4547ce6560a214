//! Validation and scope rewriting for model-authored SQL.
//!
//! This is the legacy path: the tool catalog never goes through here. The
//! validator fails closed, so anything it cannot reason about is rejected.

use crate::error::{AnalyticsError, Result};
use crate::ledger::{BuiltQuery, SCOPE_PARAM};
use crate::scope::AuthorizationScope;
use log::{debug, warn};
use regex::Regex;
use rusqlite::types::Value;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Foreign keys a scoped query may join on: (child table, column, parent table, owning).
///
/// An owning key means the child row belongs to the same party as its parent.
const FOREIGN_KEYS: [(&str, &str, &str, bool); 14] = [
    ("account", "party_id", "party", true),
    ("individual_profile", "party_id", "party", true),
    ("company_profile", "party_id", "party", true),
    ("app_user", "party_id", "party", true),
    ("user_party_map", "party_id", "party", true),
    ("org_party_map", "party_id", "party", true),
    ("employment_contract", "employer_party_id", "party", true),
    ("employment_contract", "employee_party_id", "party", false),
    ("journal_line", "account_id", "account", true),
    ("journal_line", "entry_id", "journal_entry", false),
    ("journal_line", "party_id", "party", false),
    ("journal_line", "category_id", "category", false),
    ("category", "section_id", "section", false),
    ("holding_position", "account_id", "account", true),
];

const PINNED_ALIAS: &str = "a";
const PINNED_TABLE: &str = "account";

static DENIED_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(DROP|DELETE|UPDATE|INSERT|ALTER|CREATE|TRUNCATE|EXEC|EXECUTE|REPLACE|ATTACH|DETACH|PRAGMA|GRANT|VACUUM)\b",
    )
    .unwrap()
});

static BRACE_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(\w+)\}").unwrap());

static PYFORMAT_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"%\((\w+)\)s").unwrap());

static ADMIN_AND_PIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s+AND\s+a\.party_id\s*=\s*(?::\w+|'?\d+'?)").unwrap()
});

static ADMIN_LEADING_PIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bWHERE\s+a\.party_id\s*=\s*(?::\w+|'?\d+'?)\s+AND\s+").unwrap()
});

static ADMIN_ONLY_PIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s+WHERE\s+a\.party_id\s*=\s*(?::\w+|'?\d+'?)(\s+(?:GROUP|HAVING|ORDER|LIMIT)\b|\s*$)")
        .unwrap()
});

static SELECTOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:\w*party_id|person_id|company_id|p\.id)\s*(=|\bIN\b)\s*(\([^)]*\)|'[^']*'|[^\s,;)]+)",
    )
    .unwrap()
});

static PARTY_PIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^a\.party_id\s*(?:=\s*(\S+)|IN\s*(\(.*\)))$").unwrap()
});

static COLUMN_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_]\w*\.[A-Za-z_]\w*$").unwrap());

static SELECT_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bSELECT\b").unwrap());

static SCOPE_PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i):(?:scope_party_id|party_id|person_id|company_id)\b").unwrap()
});

static JOIN_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:(?:LEFT|INNER)\s+(?:OUTER\s+)?)?JOIN\b").unwrap()
});

static TABLE_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)^\s*(\w+)(?:\s+(?:AS\s+)?(\w+))?\s*$").unwrap());

static JOINED_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^\s*(\w+)(?:\s+(?:AS\s+)?(\w+))?\s+ON\s+(.+?)\s*$").unwrap()
});

static KEY_EQUALITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\w+)\.(\w+)\s*=\s*(\w+)\.(\w+)$").unwrap());

/// SQL that passed validation, with scope placeholders bound to the caller's id.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedQuery {
    pub sql: String,
    pub params: Vec<(String, i64)>,
}

impl From<ValidatedQuery> for BuiltQuery {
    fn from(query: ValidatedQuery) -> Self {
        BuiltQuery {
            sql: query.sql,
            params: query
                .params
                .into_iter()
                .map(|(name, id)| (name, Value::Integer(id)))
                .collect(),
        }
    }
}

/// Checks, rewrites and scopes a model-authored query.
///
/// Running the validator on its own output returns the same SQL.
pub fn validate_query(sql: &str, scope: &AuthorizationScope) -> Result<ValidatedQuery> {
    let sql = check_read_only(sql)?;
    let sql = rewrite_placeholders(&sql);

    let sql = if scope.is_admin() {
        strip_admin_pins(&sql)
    } else {
        let own = scope.own_party_id().ok_or_else(|| {
            AnalyticsError::authorization("User scope could not be determined for this query")
        })?;
        check_selectors(&sql, own)?;
        check_join_path(&sql)?;
        enforce_party_pin(&sql, own)
    };

    let params = match scope.own_party_id() {
        Some(own) if contains_placeholder(&sql, SCOPE_PARAM) => vec![(SCOPE_PARAM.to_string(), own)],
        _ => Vec::new(),
    };

    debug!("Validated query: {}", sql);
    Ok(ValidatedQuery { sql, params })
}

fn check_read_only(sql: &str) -> Result<String> {
    let trimmed = sql.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace());

    if !trimmed.to_ascii_uppercase().starts_with("SELECT") {
        return Err(AnalyticsError::validation("Only SELECT queries are allowed"));
    }
    if trimmed.contains(';') {
        return Err(AnalyticsError::validation("Multiple statements are not allowed"));
    }
    if trimmed.contains("--") || trimmed.contains("/*") {
        return Err(AnalyticsError::validation("SQL comments are not allowed"));
    }
    if let Some(found) = DENIED_KEYWORD.find(trimmed) {
        return Err(AnalyticsError::validation(format!(
            "Dangerous SQL keyword detected: {}",
            found.as_str().to_ascii_uppercase()
        )));
    }

    Ok(trimmed.to_string())
}

/// Brace and pyformat placeholders become named ones; every spelling of a
/// scope placeholder becomes `:scope_party_id`.
fn rewrite_placeholders(sql: &str) -> String {
    let sql = BRACE_PLACEHOLDER.replace_all(sql, ":$1");
    let sql = PYFORMAT_PLACEHOLDER.replace_all(&sql, ":$1");
    SCOPE_PLACEHOLDER
        .replace_all(&sql, regex::NoExpand(SCOPE_PARAM))
        .into_owned()
}

fn strip_admin_pins(sql: &str) -> String {
    let sql = ADMIN_AND_PIN.replace_all(sql, "");
    let sql = ADMIN_LEADING_PIN.replace_all(&sql, "WHERE ");
    ADMIN_ONLY_PIN.replace_all(&sql, "${1}").trim_end().to_string()
}

fn contains_placeholder(sql: &str, name: &str) -> bool {
    let lower = sql.to_ascii_lowercase();
    let mut rest = lower.as_str();
    while let Some(pos) = rest.find(name) {
        let after = &rest[pos + name.len()..];
        if !after
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return true;
        }
        rest = after;
    }
    false
}

fn is_scope_value(value: &str, own: i64) -> bool {
    let value = value.trim().trim_matches('\'');
    value == own.to_string() || value.eq_ignore_ascii_case(SCOPE_PARAM)
}

fn is_scope_list(list: &str, own: i64) -> bool {
    let inner = list.trim().trim_start_matches('(').trim_end_matches(')');
    let items: Vec<&str> = inner.split(',').map(str::trim).collect();
    !items.is_empty() && items.iter().all(|item| is_scope_value(item, own))
}

/// Every party selector must target the caller or be a join between columns.
fn check_selectors(sql: &str, own: i64) -> Result<()> {
    if SELECT_WORD.find_iter(sql).count() > 1 {
        return Err(AnalyticsError::authorization(
            "Nested queries are not allowed for scoped callers",
        ));
    }

    if top_level_words(sql)
        .iter()
        .any(|w| matches!(w.text.as_str(), "UNION" | "INTERSECT" | "EXCEPT"))
    {
        return Err(AnalyticsError::authorization(
            "Compound queries are not allowed for scoped callers",
        ));
    }

    for caps in SELECTOR.captures_iter(sql) {
        let operator = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        let value = caps.get(2).map(|m| m.as_str()).unwrap_or("");

        let allowed = if operator.eq_ignore_ascii_case("IN") {
            is_scope_list(value, own)
        } else {
            is_scope_value(value, own) || COLUMN_REF.is_match(value)
        };

        if !allowed {
            warn!("Rejected selector '{}' for party {}", &caps[0], own);
            return Err(AnalyticsError::authorization(
                "Query contains unauthorized person/company selector",
            ));
        }
    }

    Ok(())
}

/// Adds `a.party_id = <own>` unless a top-level conjunct already pins it.
fn enforce_party_pin(sql: &str, own: i64) -> String {
    let words = top_level_words(sql);
    let where_word = words.iter().find(|w| w.text == "WHERE");
    let search_from = where_word.map(|w| w.end).unwrap_or(0);
    let tail = words
        .iter()
        .filter(|w| w.start >= search_from)
        .find(|w| matches!(w.text.as_str(), "GROUP" | "HAVING" | "ORDER" | "LIMIT" | "WINDOW"))
        .map(|w| w.start)
        .unwrap_or(sql.len());

    let pin = format!("a.party_id = {}", own);

    match where_word {
        Some(w) => {
            let condition = sql[w.end..tail].trim();
            if is_pinned(condition, own) {
                return sql.to_string();
            }
            let rest = sql[tail..].trim();
            let mut out = format!("{} ({}) AND {}", &sql[..w.end], condition, pin);
            if !rest.is_empty() {
                out.push(' ');
                out.push_str(rest);
            }
            out
        }
        None => {
            let head = sql[..tail].trim_end();
            let rest = sql[tail..].trim();
            let mut out = format!("{} WHERE {}", head, pin);
            if !rest.is_empty() {
                out.push(' ');
                out.push_str(rest);
            }
            out
        }
    }
}

/// True when the condition is a pure conjunction with one conjunct equal to
/// the caller's pin. Any top-level OR disqualifies it.
fn is_pinned(condition: &str, own: i64) -> bool {
    let Some(terms) = conjuncts(condition) else {
        return false;
    };

    terms.iter().any(|term| match PARTY_PIN.captures(term) {
        Some(caps) => match (caps.get(1), caps.get(2)) {
            (Some(value), _) => is_scope_value(value.as_str(), own),
            (None, Some(list)) => is_scope_list(list.as_str(), own),
            _ => false,
        },
        None => false,
    })
}

/// Top-level AND terms of a condition, each without wrapping parentheses.
/// `None` when the condition has a top-level OR.
fn conjuncts(condition: &str) -> Option<Vec<&str>> {
    let condition = strip_outer_parens(condition.trim());
    let words = top_level_words(condition);
    if words.iter().any(|w| w.text == "OR") {
        return None;
    }

    let mut terms = Vec::new();
    let mut start = 0;
    let mut between_pending = false;
    for word in &words {
        match word.text.as_str() {
            "BETWEEN" => between_pending = true,
            "AND" if between_pending => between_pending = false,
            "AND" => {
                terms.push(&condition[start..word.start]);
                start = word.end;
            }
            _ => {}
        }
    }
    terms.push(&condition[start..]);

    Some(
        terms
            .into_iter()
            .map(|term| strip_outer_parens(term.trim()))
            .collect(),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reach {
    /// Every row belongs to the caller.
    Owned,
    /// Rows referenced by the caller's rows.
    Referenced,
}

struct JoinEdge {
    child: String,
    parent: String,
    owning: bool,
}

fn foreign_key(child_table: &str, column: &str, parent_table: &str) -> Option<bool> {
    FOREIGN_KEYS
        .iter()
        .find(|(child, col, parent, _)| {
            *child == child_table && *col == column && *parent == parent_table
        })
        .map(|(_, _, _, owning)| *owning)
}

fn join_error(msg: impl Into<String>) -> AnalyticsError {
    AnalyticsError::authorization(msg)
}

/// The FROM clause must be a chain of `JOIN ... ON` foreign-key equalities
/// that reaches every table from `account a`.
fn check_join_path(sql: &str) -> Result<()> {
    let words = top_level_words(sql);
    let from = words
        .iter()
        .find(|w| w.text == "FROM")
        .ok_or_else(|| join_error("Scoped queries must read from account a"))?;
    let end = words
        .iter()
        .filter(|w| w.start >= from.end)
        .find(|w| {
            matches!(
                w.text.as_str(),
                "WHERE" | "GROUP" | "HAVING" | "ORDER" | "LIMIT" | "WINDOW"
            )
        })
        .map(|w| w.start)
        .unwrap_or(sql.len());
    let clause = &sql[from.end..end];

    if has_top_level_comma(clause) {
        return Err(join_error("Comma joins are not allowed for scoped callers"));
    }
    if let Some(word) = top_level_words(clause)
        .iter()
        .find(|w| matches!(w.text.as_str(), "CROSS" | "NATURAL" | "USING" | "RIGHT" | "FULL"))
    {
        return Err(join_error(format!(
            "{} joins are not allowed for scoped callers",
            word.text
        )));
    }

    let mut segments = JOIN_KEYWORD.split(clause);
    let first = segments.next().unwrap_or("");
    let caps = TABLE_REF
        .captures(first)
        .ok_or_else(|| join_error("Unsupported FROM clause for scoped callers"))?;
    let mut aliases: Vec<(String, String)> = vec![alias_entry(&caps[1], caps.get(2))];
    let mut edges = Vec::new();

    for segment in segments {
        let caps = JOINED_TABLE
            .captures(segment)
            .ok_or_else(|| join_error("Every join needs an ON condition for scoped callers"))?;
        let (alias, table) = alias_entry(&caps[1], caps.get(2));
        if aliases.iter().any(|(known, _)| *known == alias) {
            return Err(join_error(format!("Table alias '{}' is used twice", alias)));
        }

        let terms = conjuncts(&caps[3])
            .ok_or_else(|| join_error("OR is not allowed in join conditions for scoped callers"))?;
        let edge = terms
            .iter()
            .find_map(|term| key_edge(term, &alias, &table, &aliases))
            .ok_or_else(|| {
                join_error(format!(
                    "Join on '{}' must follow a foreign key to an earlier table",
                    table
                ))
            })?;

        edges.push(edge);
        aliases.push((alias, table));
    }

    let tables: HashMap<&str, &str> = aliases
        .iter()
        .map(|(alias, table)| (alias.as_str(), table.as_str()))
        .collect();
    if tables.get(PINNED_ALIAS) != Some(&PINNED_TABLE) {
        return Err(join_error("Scoped queries must join account a"));
    }

    let mut reach: HashMap<&str, Reach> = HashMap::from([(PINNED_ALIAS, Reach::Owned)]);
    loop {
        let mut progressed = false;
        for edge in &edges {
            let (child, parent) = (edge.child.as_str(), edge.parent.as_str());
            match (reach.get(child).copied(), reach.get(parent).copied()) {
                (Some(from_child), None) => {
                    let status = if from_child == Reach::Owned && edge.owning {
                        Reach::Owned
                    } else {
                        Reach::Referenced
                    };
                    reach.insert(parent, status);
                    progressed = true;
                }
                (None, Some(from_parent)) => {
                    let owner = tables.get(parent).copied().unwrap_or("");
                    if from_parent != Reach::Owned || !matches!(owner, "party" | "account") {
                        return Err(join_error(format!(
                            "Join on '{}' is not restricted to the caller's rows",
                            tables.get(child).copied().unwrap_or(child)
                        )));
                    }
                    let status = if edge.owning {
                        Reach::Owned
                    } else {
                        Reach::Referenced
                    };
                    reach.insert(child, status);
                    progressed = true;
                }
                _ => {}
            }
        }
        if !progressed {
            break;
        }
    }

    if let Some((alias, _)) = aliases.iter().find(|(alias, _)| !reach.contains_key(alias.as_str())) {
        return Err(join_error(format!(
            "Table alias '{}' is not joined to account a",
            alias
        )));
    }
    Ok(())
}

fn alias_entry(table: &str, alias: Option<regex::Match<'_>>) -> (String, String) {
    let table = table.to_ascii_lowercase();
    let alias = alias
        .map(|m| m.as_str().to_ascii_lowercase())
        .unwrap_or_else(|| table.clone());
    (alias, table)
}

/// A `x.fk = y.id` term linking the new alias to one joined before it.
fn key_edge(term: &str, alias: &str, table: &str, known: &[(String, String)]) -> Option<JoinEdge> {
    let caps = KEY_EQUALITY.captures(term)?;
    let left = (caps[1].to_ascii_lowercase(), caps[2].to_ascii_lowercase());
    let right = (caps[3].to_ascii_lowercase(), caps[4].to_ascii_lowercase());
    let (new_side, old_side) = if left.0 == alias {
        (left, right)
    } else if right.0 == alias {
        (right, left)
    } else {
        return None;
    };
    let old_table = known
        .iter()
        .find(|(known_alias, _)| *known_alias == old_side.0)
        .map(|(_, t)| t.as_str())?;

    if old_side.1 == "id" {
        if let Some(owning) = foreign_key(table, &new_side.1, old_table) {
            return Some(JoinEdge {
                child: new_side.0,
                parent: old_side.0,
                owning,
            });
        }
    }
    if new_side.1 == "id" {
        if let Some(owning) = foreign_key(old_table, &old_side.1, table) {
            return Some(JoinEdge {
                child: old_side.0,
                parent: new_side.0,
                owning,
            });
        }
    }
    None
}

fn has_top_level_comma(text: &str) -> bool {
    let mut depth = 0i32;
    let mut quote: Option<u8> = None;
    for b in text.bytes() {
        if let Some(q) = quote {
            if b == q {
                quote = None;
            }
            continue;
        }
        match b {
            b'\'' | b'"' | b'`' => quote = Some(b),
            b'(' => depth += 1,
            b')' => depth -= 1,
            b',' if depth == 0 => return true,
            _ => {}
        }
    }
    false
}

fn strip_outer_parens(mut text: &str) -> &str {
    while text.starts_with('(') && text.ends_with(')') && wraps_whole(text) {
        text = text[1..text.len() - 1].trim();
    }
    text
}

/// The opening parenthesis closes on the final character.
fn wraps_whole(text: &str) -> bool {
    let mut depth = 0;
    let last = text.len() - 1;
    for (i, ch) in text.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 && i != last {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

struct Word {
    start: usize,
    end: usize,
    text: String,
}

/// Bare words outside quotes and parentheses, upper-cased.
fn top_level_words(sql: &str) -> Vec<Word> {
    let bytes = sql.as_bytes();
    let is_word = |b: u8| b.is_ascii_alphanumeric() || b == b'_';
    let mut words = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<u8> = None;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == q {
                quote = None;
            }
            i += 1;
            continue;
        }

        match b {
            b'\'' | b'"' | b'`' => quote = Some(b),
            b'(' => depth += 1,
            b')' => depth -= 1,
            _ if is_word(b) => {
                let start = i;
                while i < bytes.len() && is_word(bytes[i]) {
                    i += 1;
                }
                let qualified = start > 0 && matches!(bytes[start - 1], b'.' | b':');
                if depth == 0 && !qualified {
                    words.push(Word {
                        start,
                        end: i,
                        text: sql[start..i].to_ascii_uppercase(),
                    });
                }
                continue;
            }
            _ => {}
        }
        i += 1;
    }

    words
}
