//! Placeholder detection.
//!
//! A single left-to-right scan over the raw SQL. Regions that can contain
//! placeholder-looking text without meaning it are skipped whole:
//!
//! - single-quoted string literals (`''` escape)
//! - double-quoted identifiers (`""` escape)
//! - backtick-quoted identifiers
//! - line comments (`-- ...`)
//! - block comments (`/* ... */`, nested)
//! - dollar-quoted strings (`$tag$ ... $tag$`)
//!
//! Outside those regions the scanner recognizes `?`, `$1`, `%s`, `:name`,
//! `:1`, `@name`, and `%(name)s`. A `:` or `@` only opens a placeholder when
//! the preceding character is a non-identifier boundary, so `a::int` casts
//! and `@@session` variables pass through untouched.

use super::ParameterStyle;

/// One placeholder occurrence in the raw SQL.
#[derive(Debug, Clone, PartialEq)]
pub struct Placeholder {
    pub style: ParameterStyle,
    /// Byte range of the placeholder token in the scanned string.
    pub start: usize,
    pub end: usize,
    /// Referenced name for named styles.
    pub name: Option<String>,
    /// Zero-based ordinal for `$n` / `:n` styles.
    pub index: Option<usize>,
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b >= 0x80
}

/// Scan raw SQL and return every placeholder occurrence in order.
pub fn scan(sql: &str) -> Vec<Placeholder> {
    let bytes = sql.as_bytes();
    let len = bytes.len();
    let mut out = Vec::new();
    let mut i = 0usize;

    while i < len {
        let b = bytes[i];
        match b {
            b'\'' => i = skip_quoted(bytes, i, b'\''),
            b'"' => i = skip_quoted(bytes, i, b'"'),
            b'`' => i = skip_quoted(bytes, i, b'`'),
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < len && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => i = skip_block_comment(bytes, i),
            b'$' => {
                if let Some(end) = dollar_quote_end(bytes, i) {
                    i = end;
                } else if bytes.get(i + 1).is_some_and(u8::is_ascii_digit) {
                    let (ordinal, end) = read_number(bytes, i + 1);
                    out.push(Placeholder {
                        style: ParameterStyle::Numeric,
                        start: i,
                        end,
                        name: None,
                        index: Some(ordinal.saturating_sub(1)),
                    });
                    i = end;
                } else {
                    i += 1;
                }
            }
            b'?' => {
                out.push(Placeholder {
                    style: ParameterStyle::Qmark,
                    start: i,
                    end: i + 1,
                    name: None,
                    index: None,
                });
                i += 1;
            }
            b':' => {
                let boundary = i == 0 || !is_ident_byte(bytes[i - 1]);
                match bytes.get(i + 1) {
                    // `::` cast: consume both colons.
                    Some(b':') => i += 2,
                    Some(&next) if boundary && is_ident_start(next) => {
                        let (name, end) = read_ident(bytes, i + 1);
                        out.push(Placeholder {
                            style: ParameterStyle::NamedColon,
                            start: i,
                            end,
                            name: Some(name),
                            index: None,
                        });
                        i = end;
                    }
                    Some(&next) if boundary && next.is_ascii_digit() => {
                        let (ordinal, end) = read_number(bytes, i + 1);
                        out.push(Placeholder {
                            style: ParameterStyle::PositionalColon,
                            start: i,
                            end,
                            name: None,
                            index: Some(ordinal.saturating_sub(1)),
                        });
                        i = end;
                    }
                    _ => i += 1,
                }
            }
            b'@' => {
                let boundary = i == 0 || !is_ident_byte(bytes[i - 1]);
                match bytes.get(i + 1) {
                    // `@@` server variable: consume both.
                    Some(b'@') => i += 2,
                    Some(&next) if boundary && is_ident_start(next) => {
                        let (name, end) = read_ident(bytes, i + 1);
                        out.push(Placeholder {
                            style: ParameterStyle::NamedAt,
                            start: i,
                            end,
                            name: Some(name),
                            index: None,
                        });
                        i = end;
                    }
                    _ => i += 1,
                }
            }
            b'%' => match bytes.get(i + 1) {
                Some(b'%') => i += 2,
                Some(b's') => {
                    out.push(Placeholder {
                        style: ParameterStyle::Format,
                        start: i,
                        end: i + 2,
                        name: None,
                        index: None,
                    });
                    i += 2;
                }
                Some(b'(') => {
                    if let Some((name, end)) = read_pyformat(bytes, i) {
                        out.push(Placeholder {
                            style: ParameterStyle::PyformatNamed,
                            start: i,
                            end,
                            name: Some(name),
                            index: None,
                        });
                        i = end;
                    } else {
                        i += 1;
                    }
                }
                _ => i += 1,
            },
            _ => i += 1,
        }
    }

    out
}

/// The set of placeholder styles present in the raw SQL, in order of first
/// occurrence.
pub fn detect(sql: &str) -> Vec<ParameterStyle> {
    let mut styles = Vec::new();
    for ph in scan(sql) {
        if !styles.contains(&ph.style) {
            styles.push(ph.style);
        }
    }
    styles
}

/// Skip a quoted region opened at `start` with `quote`, honoring doubled
/// quote escapes. Returns the index just past the closing quote.
fn skip_quoted(bytes: &[u8], start: usize, quote: u8) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    i
}

/// Skip a block comment, allowing nesting (PostgreSQL semantics).
fn skip_block_comment(bytes: &[u8], start: usize) -> usize {
    let mut i = start + 2;
    let mut depth = 1usize;
    while i < bytes.len() && depth > 0 {
        if bytes[i] == b'/' && bytes.get(i + 1) == Some(&b'*') {
            depth += 1;
            i += 2;
        } else if bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/') {
            depth -= 1;
            i += 2;
        } else {
            i += 1;
        }
    }
    i
}

/// If `start` opens a dollar-quoted string (`$tag$`), return the index past
/// its closing delimiter (or end of input when unterminated).
fn dollar_quote_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut j = start + 1;
    while j < bytes.len() && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_') {
        // A digit right after `$` is a numeric placeholder, not a tag.
        if j == start + 1 && bytes[j].is_ascii_digit() {
            return None;
        }
        j += 1;
    }
    if bytes.get(j) != Some(&b'$') {
        return None;
    }
    let delim = &bytes[start..=j];
    let mut i = j + 1;
    while i + delim.len() <= bytes.len() {
        if &bytes[i..i + delim.len()] == delim {
            return Some(i + delim.len());
        }
        i += 1;
    }
    Some(bytes.len())
}

fn read_ident(bytes: &[u8], start: usize) -> (String, usize) {
    let mut end = start;
    while end < bytes.len() && is_ident_byte(bytes[end]) {
        end += 1;
    }
    (
        String::from_utf8_lossy(&bytes[start..end]).into_owned(),
        end,
    )
}

fn read_number(bytes: &[u8], start: usize) -> (usize, usize) {
    let mut end = start;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let ordinal = std::str::from_utf8(&bytes[start..end])
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    (ordinal, end)
}

/// Parse `%(name)s` starting at the `%`. Returns (name, end) on success.
fn read_pyformat(bytes: &[u8], start: usize) -> Option<(String, usize)> {
    let name_start = start + 2;
    if !bytes.get(name_start).copied().is_some_and(is_ident_start) {
        return None;
    }
    let (name, after_name) = read_ident(bytes, name_start);
    if bytes.get(after_name) == Some(&b')') && bytes.get(after_name + 1) == Some(&b's') {
        Some((name, after_name + 2))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn styles(sql: &str) -> Vec<ParameterStyle> {
        detect(sql)
    }

    #[test]
    fn test_detect_each_style() {
        assert_eq!(styles("SELECT ?"), vec![ParameterStyle::Qmark]);
        assert_eq!(styles("SELECT $1"), vec![ParameterStyle::Numeric]);
        assert_eq!(styles("SELECT %s"), vec![ParameterStyle::Format]);
        assert_eq!(styles("SELECT :name"), vec![ParameterStyle::NamedColon]);
        assert_eq!(styles("SELECT :1"), vec![ParameterStyle::PositionalColon]);
        assert_eq!(styles("SELECT @name"), vec![ParameterStyle::NamedAt]);
        assert_eq!(
            styles("SELECT %(name)s"),
            vec![ParameterStyle::PyformatNamed]
        );
    }

    #[test]
    fn test_qmark_inside_literal_ignored() {
        let found = scan("SELECT 'What?' AS q, id FROM t WHERE id = ?");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].style, ParameterStyle::Qmark);
        // The lone placeholder is the `?` after `id =`.
        assert_eq!(found[0].start, 42);
    }

    #[test]
    fn test_placeholders_in_comments_ignored() {
        let sql = "SELECT 1 -- what about :this?\n/* or :that $1 */ WHERE x = :real";
        let found = scan(sql);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name.as_deref(), Some("real"));
    }

    #[test]
    fn test_nested_block_comment() {
        let found = scan("/* outer /* inner ? */ still ? */ SELECT ?");
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_double_quoted_identifier_ignored() {
        let found = scan("SELECT \"weird?col\" FROM t WHERE a = ?");
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_dollar_quoted_block_ignored() {
        let sql = "SELECT $tag$ has :name and $1 inside $tag$, $2";
        let found = scan(sql);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].style, ParameterStyle::Numeric);
        assert_eq!(found[0].index, Some(1));
    }

    #[test]
    fn test_anonymous_dollar_quote() {
        let found = scan("DO $$ BEGIN PERFORM :x; END $$; SELECT :y");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name.as_deref(), Some("y"));
    }

    #[test]
    fn test_postgres_cast_not_a_placeholder() {
        assert!(scan("SELECT a::int FROM t").is_empty());
        // Cast plus a real placeholder.
        let found = scan("SELECT a::int FROM t WHERE b = :b");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name.as_deref(), Some("b"));
    }

    #[test]
    fn test_at_requires_boundary() {
        // `@` inside an identifier is not a placeholder.
        assert!(scan("SELECT email FROM t WHERE email = 'x@y.z'").is_empty());
        assert!(scan("SELECT a@b").is_empty());
        // `@@` server variables are not placeholders.
        assert!(scan("SELECT @@version").is_empty());
        let found = scan("SELECT * FROM t WHERE id = @id");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].style, ParameterStyle::NamedAt);
    }

    #[test]
    fn test_colon_requires_boundary() {
        // Array slice syntax: digits on both sides.
        assert!(scan("SELECT arr[1:2] FROM t").is_empty());
    }

    #[test]
    fn test_percent_escape_and_modulo() {
        assert!(scan("SELECT 10 % 3").is_empty());
        assert!(scan("SELECT 'a%%b'").is_empty());
        let found = scan("SELECT %s, x %% y");
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_numeric_ordinals_zero_based() {
        let found = scan("SELECT $2, $1");
        assert_eq!(found[0].index, Some(1));
        assert_eq!(found[1].index, Some(0));
    }

    #[test]
    fn test_mixed_styles_detected_in_order() {
        let got = styles("SELECT * FROM t WHERE a = :a AND b = ?");
        assert_eq!(got, vec![ParameterStyle::NamedColon, ParameterStyle::Qmark]);
    }
}
