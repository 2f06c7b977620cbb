use std::hash::{Hash, Hasher};

use fnv::FnvHasher;

/// Reserved words the normalizer lowercases. Not an exhaustive SQL grammar --
/// just enough that two statements differing only in keyword case collapse
/// to the same fingerprint, per original spec §4.1.
const RESERVED_WORDS: &[&str] = &[
    "select", "from", "where", "and", "or", "not", "in", "is", "null", "join", "inner", "left",
    "right", "outer", "on", "group", "by", "order", "having", "limit", "offset", "insert", "into",
    "values", "update", "set", "delete", "as", "distinct", "union", "all", "exists", "between",
    "like", "case", "when", "then", "else", "end", "asc", "desc",
];

/// A stable 64-bit identifier for a normalized SQL statement. Two
/// syntactically distinct statements with the same shape yield the same value.
pub type QueryFingerprint = u64;

/// Normalizes a raw SQL string per original spec §4.1: strips `--`/`/* */`
/// comments, replaces string/number/placeholder literals with `?`, collapses
/// `IN (...)` lists to `IN (?)`, lowercases reserved words, and collapses
/// whitespace. Unterminated strings are treated as opaque (consumed to end of
/// input) rather than rejected -- the tokenizer never fails.
pub fn normalize(sql: &str) -> String {
    let stripped = strip_comments(sql);
    let literals_replaced = replace_literals(&stripped);
    let collapsed = collapse_in_lists(&literals_replaced);
    let lowercased = lowercase_keywords(&collapsed);
    collapse_whitespace(&lowercased)
}

/// `fingerprint(normalize(sql)) == fingerprint(sql)` (tokenization is
/// idempotent, original spec §8): normalizing an already-normalized string is
/// a no-op, so both sides hash the same bytes.
pub fn fingerprint(sql: &str) -> QueryFingerprint {
    fingerprint_normalized(&normalize(sql))
}

pub fn fingerprint_normalized(normalized: &str) -> QueryFingerprint {
    let mut hasher = FnvHasher::default();
    normalized.hash(&mut hasher);
    hasher.finish()
}

/// First 8 base32 characters of the fingerprint's low 40 bits -- the stable
/// short `db.query.id` from original spec §4.2.
pub fn short_query_id(fp: QueryFingerprint) -> String {
    let low_40_bits = fp & 0xFF_FFFF_FFFF;
    let bytes = low_40_bits.to_be_bytes();
    // bits 0..40 live in the low 5 bytes of the big-endian representation.
    base32::encode(base32::Alphabet::RFC4648 { padding: false }, &bytes[3..8])
}

fn strip_comments(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let chars: Vec<char> = sql.chars().collect();
    let mut i = 0;
    let mut in_string: Option<char> = None;

    while i < chars.len() {
        let c = chars[i];

        if let Some(quote) = in_string {
            out.push(c);
            if c == quote {
                in_string = None;
            }
            i += 1;
            continue;
        }

        match c {
            '\'' | '"' => {
                in_string = Some(c);
                out.push(c);
                i += 1;
            }
            '-' if chars.get(i + 1) == Some(&'-') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                while i + 1 < chars.len() && !(chars[i] == '*' && chars[i + 1] == '/') {
                    i += 1;
                }
                i = (i + 2).min(chars.len());
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    out
}

fn replace_literals(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let chars: Vec<char> = sql.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c == '\'' || c == '"' {
            // Unterminated strings are treated as opaque: consume to end of input.
            let quote = c;
            i += 1;
            while i < chars.len() && chars[i] != quote {
                i += 1;
            }
            i = (i + 1).min(chars.len());
            out.push('?');
            continue;
        }

        if c == '$' && chars.get(i + 1).map(|n| n.is_ascii_digit()).unwrap_or(false) {
            // Postgres-style $1, $2, ... placeholders.
            i += 1;
            while chars.get(i).map(|n| n.is_ascii_digit()).unwrap_or(false) {
                i += 1;
            }
            out.push('?');
            continue;
        }

        if c == '?' {
            out.push('?');
            i += 1;
            continue;
        }

        if c.is_ascii_digit() {
            while chars.get(i).map(|n| n.is_ascii_digit() || *n == '.').unwrap_or(false) {
                i += 1;
            }
            out.push('?');
            continue;
        }

        out.push(c);
        i += 1;
    }

    out
}

static IN_LIST_RE: once_cell::sync::Lazy<regex::Regex> =
    once_cell::sync::Lazy::new(|| regex::Regex::new(r"(?i)in\s*\(\s*(\?\s*,\s*)*\?\s*\)").expect("valid regex"));

/// Collapses runs of `?, ?, ?` inside an `IN ( ... )` list to a single `?`.
fn collapse_in_lists(sql: &str) -> String {
    IN_LIST_RE.replace_all(sql, "in (?)").to_string()
}

fn lowercase_keywords(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut word = String::new();

    let flush = |word: &mut String, out: &mut String| {
        if !word.is_empty() {
            if RESERVED_WORDS.contains(&word.to_lowercase().as_str()) {
                out.push_str(&word.to_lowercase());
            } else {
                out.push_str(word);
            }
            word.clear();
        }
    };

    for c in sql.chars() {
        if c.is_alphanumeric() || c == '_' {
            word.push(c);
        } else {
            flush(&mut word, &mut out);
            out.push(c);
        }
    }
    flush(&mut word, &mut out);

    out
}

fn collapse_whitespace(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ").trim().to_string()
}
