//! SQL identifier sanitizer
//!
//! Models are told to bracket-quote identifiers but regularly emit aliases and
//! ORDER BY / GROUP BY targets that the engine rejects: bare CJK names, quoted
//! aliases with spaces, stray punctuation. This module rewrites those spots.
//!
//! The input is tokenized first so that string literals, comments and quoted
//! spans are never touched, even when they contain `AS`, `ORDER BY` or
//! `GROUP BY`. It is a best-effort rewrite, not a SQL parser.

/// Rewrite aliases, then grouping/ordering identifiers.
pub fn sanitize_sql(sql: &str) -> String {
    rewrite_grouping(&rewrite_aliases(sql))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    /// Run of letters, digits, underscores (including CJK)
    Word,
    /// `[...]`
    Bracketed,
    /// `"..."` or `` `...` ``
    Quoted,
    /// `'...'`
    StringLiteral,
    Whitespace,
    Comment,
    /// Any other single character
    Punct,
}

#[derive(Debug, Clone, Copy)]
struct Token<'a> {
    kind: TokenKind,
    text: &'a str,
}

impl Token<'_> {
    fn is_keyword(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Word && self.text.eq_ignore_ascii_case(keyword)
    }

    fn is_punct(&self, c: char) -> bool {
        self.kind == TokenKind::Punct && self.text.starts_with(c)
    }

    fn is_trivia(&self) -> bool {
        matches!(self.kind, TokenKind::Whitespace | TokenKind::Comment)
    }
}

fn tokenize(sql: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut chars = sql.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        let rest = &sql[start..];
        let kind = if c.is_whitespace() {
            while chars.next_if(|&(_, c)| c.is_whitespace()).is_some() {}
            TokenKind::Whitespace
        } else if is_word_char(c) {
            while chars.next_if(|&(_, c)| is_word_char(c)).is_some() {}
            TokenKind::Word
        } else if rest.starts_with("--") {
            while chars.next_if(|&(_, c)| c != '\n').is_some() {}
            TokenKind::Comment
        } else if rest.starts_with("/*") {
            chars.next();
            chars.next();
            let mut prev = '\0';
            for (_, c) in chars.by_ref() {
                if prev == '*' && c == '/' {
                    break;
                }
                prev = c;
            }
            TokenKind::Comment
        } else if c == '\'' {
            consume_quoted(&mut chars, c);
            TokenKind::StringLiteral
        } else if c == '"' || c == '`' {
            consume_quoted(&mut chars, c);
            TokenKind::Quoted
        } else if c == '[' {
            chars.next();
            for (_, c) in chars.by_ref() {
                if c == ']' {
                    break;
                }
            }
            TokenKind::Bracketed
        } else {
            chars.next();
            TokenKind::Punct
        };

        let end = chars.peek().map_or(sql.len(), |&(i, _)| i);
        tokens.push(Token {
            kind,
            text: &sql[start..end],
        });
    }

    tokens
}

/// Consume a quoted span; a doubled quote character is an escape.
fn consume_quoted(chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>, quote: char) {
    chars.next();
    while let Some((_, c)) = chars.next() {
        if c == quote {
            if chars.next_if(|&(_, c)| c == quote).is_none() {
                break;
            }
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || is_cjk(c)
}

/// Chinese, Japanese and Korean script characters.
pub fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x3040..=0x30FF      // Hiragana, Katakana
        | 0x3400..=0x4DBF    // CJK Extension A
        | 0x4E00..=0x9FFF    // CJK Unified Ideographs
        | 0xF900..=0xFAFF    // CJK Compatibility Ideographs
        | 0x1100..=0x11FF    // Hangul Jamo
        | 0x3130..=0x318F    // Hangul Compatibility Jamo
        | 0xAC00..=0xD7AF    // Hangul Syllables
        | 0x20000..=0x2FA1F  // CJK Extensions B and later
    )
}

/// `[A-Za-z_][A-Za-z0-9_]*`
fn is_ascii_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Only CJK, ASCII letters/digits and underscore, with at least one CJK character.
fn is_cjk_identifier(s: &str) -> bool {
    s.chars().any(is_cjk)
        && s
            .chars()
            .all(|c| is_cjk(c) || c.is_ascii_alphanumeric() || c == '_')
}

fn is_fully_bracketed(s: &str) -> bool {
    s.len() >= 2
        && s.starts_with('[')
        && s.ends_with(']')
        && !s[1..s.len() - 1].contains(['[', ']'])
}

fn strip_one_quote_layer(s: &str) -> &str {
    for quote in ['"', '\'', '`'] {
        if s.len() >= 2 && s.starts_with(quote) && s.ends_with(quote) {
            return &s[1..s.len() - 1];
        }
    }
    s
}

// --- Alias pass ---

fn rewrite_aliases(sql: &str) -> String {
    let tokens = tokenize(sql);
    let mut out = String::with_capacity(sql.len() + 8);
    let mut counter = 0usize;
    let mut i = 0;

    while i < tokens.len() {
        let token = tokens[i];
        out.push_str(token.text);
        i += 1;

        if !token.is_keyword("AS") {
            continue;
        }
        match tokens.get(i) {
            Some(ws) if ws.kind == TokenKind::Whitespace => {
                out.push_str(ws.text);
                i += 1;
            }
            _ => continue,
        }

        let end = alias_extent(&tokens, i);
        if end == i {
            continue;
        }
        let raw: String = tokens[i..end].iter().map(|t| t.text).collect();
        out.push_str(&rewrite_alias(&raw, &mut counter));
        i = end;
    }

    out
}

/// Index one past the last token of the alias that starts at `start`.
fn alias_extent(tokens: &[Token<'_>], start: usize) -> usize {
    let Some(first) = tokens.get(start) else {
        return start;
    };
    match first.kind {
        TokenKind::Quoted | TokenKind::StringLiteral | TokenKind::Bracketed => start + 1,
        TokenKind::Word | TokenKind::Punct => {
            let mut end = start;
            while let Some(t) = tokens.get(end) {
                let stops = match t.kind {
                    TokenKind::Word => false,
                    TokenKind::Punct => t.text.starts_with([',', '(', ')', ';', '.']),
                    _ => true,
                };
                if stops {
                    break;
                }
                end += 1;
            }
            end
        }
        _ => start,
    }
}

fn rewrite_alias(raw: &str, counter: &mut usize) -> String {
    let alias = strip_one_quote_layer(raw.trim());
    if is_fully_bracketed(alias) {
        return alias.to_string();
    }

    let inner = alias.strip_prefix('[').unwrap_or(alias);
    let inner = inner.strip_suffix(']').unwrap_or(inner);

    if is_ascii_identifier(inner) {
        inner.to_string()
    } else if is_cjk_identifier(inner) {
        format!("[{}]", inner)
    } else {
        *counter += 1;
        format!("col_{}", counter)
    }
}

// --- Grouping/ordering pass ---

/// Keywords that end an ORDER BY / GROUP BY item list.
const CLAUSE_TERMINATORS: &[&str] = &[
    "LIMIT", "OFFSET", "HAVING", "UNION", "EXCEPT", "INTERSECT", "WINDOW", "ORDER", "GROUP",
    "FETCH",
];

fn rewrite_grouping(sql: &str) -> String {
    let tokens = tokenize(sql);
    let mut wrap = vec![false; tokens.len()];

    let mut i = 0;
    while i < tokens.len() {
        match clause_body_start(&tokens, i) {
            Some(body_start) => {
                mark_clause_items(&tokens, body_start, &mut wrap);
                i = body_start;
            }
            None => i += 1,
        }
    }

    tokens
        .iter()
        .zip(wrap)
        .map(|(t, w)| {
            if w {
                format!("[{}]", t.text)
            } else {
                t.text.to_string()
            }
        })
        .collect()
}

fn next_significant(tokens: &[Token<'_>], from: usize) -> Option<usize> {
    (from..tokens.len()).find(|&j| !tokens[j].is_trivia())
}

/// If `ORDER BY` / `GROUP BY` starts at `i`, the index right after `BY`.
fn clause_body_start(tokens: &[Token<'_>], i: usize) -> Option<usize> {
    let token = tokens.get(i)?;
    if !(token.is_keyword("ORDER") || token.is_keyword("GROUP")) {
        return None;
    }
    let by = next_significant(tokens, i + 1)?;
    tokens[by].is_keyword("BY").then_some(by + 1)
}

fn mark_clause_items(tokens: &[Token<'_>], start: usize, wrap: &mut [bool]) {
    let mut depth = 0usize;
    let mut expecting_item = true;

    let mut j = start;
    while j < tokens.len() {
        let t = tokens[j];
        j += 1;

        if t.is_trivia() {
            continue;
        }
        if t.is_punct(';') {
            break;
        }
        if t.is_punct('(') {
            depth += 1;
            expecting_item = false;
            continue;
        }
        if t.is_punct(')') {
            if depth == 0 {
                break;
            }
            depth -= 1;
            continue;
        }
        if depth > 0 {
            continue;
        }
        if t.is_punct(',') {
            expecting_item = true;
            continue;
        }
        if t.kind == TokenKind::Word
            && CLAUSE_TERMINATORS
                .iter()
                .any(|kw| t.text.eq_ignore_ascii_case(kw))
        {
            break;
        }

        if expecting_item && t.kind == TokenKind::Word && is_cjk_identifier(t.text) {
            // `fn(...)` and `table.col` are left alone
            let followed_by_call_or_path = next_significant(tokens, j)
                .is_some_and(|k| tokens[k].is_punct('(') || tokens[k].is_punct('.'));
            if !followed_by_call_or_path {
                wrap[j - 1] = true;
            }
        }
        expecting_item = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_alias_unchanged() {
        let sql = "SELECT SUM(amount) AS total_sum FROM t_1";
        assert_eq!(sanitize_sql(sql), sql);
    }

    #[test]
    fn test_cjk_alias_is_bracketed() {
        assert_eq!(
            sanitize_sql("SELECT SUM(amount) AS 总计 FROM t_1"),
            "SELECT SUM(amount) AS [总计] FROM t_1"
        );
    }

    #[test]
    fn test_quoted_alias_with_space_becomes_synthetic() {
        assert_eq!(
            sanitize_sql(r#"SELECT SUM(amount) AS "总 计" FROM t_1"#),
            "SELECT SUM(amount) AS col_1 FROM t_1"
        );
    }

    #[test]
    fn test_cjk_alias_with_punctuation_becomes_synthetic() {
        assert_eq!(
            sanitize_sql("SELECT COUNT(*) AS 总计% FROM t_1"),
            "SELECT COUNT(*) AS col_1 FROM t_1"
        );
    }

    #[test]
    fn test_synthetic_counter_increments_per_call() {
        let out = sanitize_sql(r#"SELECT a AS "x-y", b AS "p q", c AS 'ok' FROM t"#);
        assert_eq!(out, "SELECT a AS col_1, b AS col_2, c AS ok FROM t");
        // a fresh call starts over
        assert_eq!(sanitize_sql(r#"SELECT a AS "x-y" FROM t"#), "SELECT a AS col_1 FROM t");
    }

    #[test]
    fn test_quoted_ascii_alias_is_unquoted() {
        assert_eq!(
            sanitize_sql(r#"SELECT a AS "city" FROM t"#),
            "SELECT a AS city FROM t"
        );
    }

    #[test]
    fn test_bracketed_alias_unchanged() {
        let sql = "SELECT a AS [已加括号], b AS [total] FROM t";
        assert_eq!(sanitize_sql(sql), sql);
    }

    #[test]
    fn test_quoted_cjk_alias_is_requoted_with_brackets() {
        assert_eq!(
            sanitize_sql(r#"SELECT a AS "金额" FROM t"#),
            "SELECT a AS [金额] FROM t"
        );
    }

    #[test]
    fn test_cast_target_type_untouched() {
        let sql = "SELECT CAST(a AS INTEGER), CAST(b AS DECIMAL(10,2)) FROM t";
        assert_eq!(sanitize_sql(sql), sql);
    }

    #[test]
    fn test_cte_name_untouched() {
        let sql = "WITH x AS (SELECT 1) SELECT * FROM x";
        assert_eq!(sanitize_sql(sql), sql);
    }

    #[test]
    fn test_order_by_cjk_is_bracketed_and_keeps_direction() {
        assert_eq!(
            sanitize_sql("SELECT * FROM t ORDER BY 城市 ASC"),
            "SELECT * FROM t ORDER BY [城市] ASC"
        );
    }

    #[test]
    fn test_order_by_bracketed_unchanged() {
        let sql = "SELECT * FROM t ORDER BY [已加括号]";
        assert_eq!(sanitize_sql(sql), sql);
    }

    #[test]
    fn test_group_and_order_lists() {
        assert_eq!(
            sanitize_sql(
                "SELECT 城市, 区域, SUM(销量) FROM t GROUP BY 城市, 区域 ORDER BY 销量 DESC, id LIMIT 5"
            ),
            "SELECT 城市, 区域, SUM(销量) FROM t GROUP BY [城市], [区域] ORDER BY [销量] DESC, id LIMIT 5"
        );
    }

    #[test]
    fn test_order_by_mixed_ascii_cjk_identifier() {
        assert_eq!(
            sanitize_sql("SELECT * FROM t ORDER BY 销量2024 desc"),
            "SELECT * FROM t ORDER BY [销量2024] desc"
        );
    }

    #[test]
    fn test_order_by_function_and_qualified_untouched() {
        let sql = "SELECT * FROM t ORDER BY COUNT(*) DESC, t.城市";
        assert_eq!(sanitize_sql(sql), sql);
    }

    #[test]
    fn test_order_by_ascii_untouched() {
        let sql = "SELECT * FROM t order by city asc, total desc";
        assert_eq!(sanitize_sql(sql), sql);
    }

    #[test]
    fn test_string_literals_are_never_rewritten() {
        let sql = "SELECT * FROM t WHERE note = 'x AS 总计 ORDER BY 城市' AND memo LIKE '%GROUP BY 区域%'";
        assert_eq!(sanitize_sql(sql), sql);
    }

    #[test]
    fn test_comments_are_never_rewritten() {
        let sql = "SELECT a -- AS 总计 ORDER BY 城市\nFROM t /* GROUP BY 区域 */";
        assert_eq!(sanitize_sql(sql), sql);
    }

    #[test]
    fn test_escaped_quote_inside_literal() {
        let sql = "SELECT * FROM t WHERE name = 'it''s AS 总计' ORDER BY 城市";
        assert_eq!(
            sanitize_sql(sql),
            "SELECT * FROM t WHERE name = 'it''s AS 总计' ORDER BY [城市]"
        );
    }

    #[test]
    fn test_subquery_order_by_stops_at_closing_paren() {
        assert_eq!(
            sanitize_sql("SELECT * FROM (SELECT * FROM t ORDER BY 城市) sub"),
            "SELECT * FROM (SELECT * FROM t ORDER BY [城市]) sub"
        );
    }

    #[test]
    fn test_idempotent_on_bracketed_input() {
        let once = sanitize_sql(
            "SELECT [城市] AS [城市], SUM([销量]) AS [总计] FROM t GROUP BY [城市] ORDER BY [总计] DESC",
        );
        assert_eq!(sanitize_sql(&once), once);
    }

    #[test]
    fn test_idempotent_after_rewrite() {
        let once = sanitize_sql(r#"SELECT a AS "总 计", b AS 合计 FROM t ORDER BY 合计"#);
        assert_eq!(sanitize_sql(&once), once);
    }

    #[test]
    fn test_tokenize_roundtrips_text() {
        let sql = "SELECT [a b], \"c\"\"d\", 'e''f' /* g */ -- h\nFROM 表;";
        let joined: String = tokenize(sql).iter().map(|t| t.text).collect();
        assert_eq!(joined, sql);
    }

    #[test]
    fn test_is_cjk() {
        assert!(is_cjk('城'));
        assert!(is_cjk('カ'));
        assert!(is_cjk('한'));
        assert!(!is_cjk('a'));
        assert!(!is_cjk('é'));
    }
}
