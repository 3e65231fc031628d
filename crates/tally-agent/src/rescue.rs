//! Recovery of tool calls written as plain text
//!
//! Some models describe the call they want instead of emitting a structured
//! one. Only used when a turn produced no structured calls.

use std::sync::LazyLock;

use regex::Regex;
use tally_ai::ToolCall;

use crate::parser::new_call_id;
use crate::tools::{RUN_SQL, SCHEMA_TOOL};

/// Quoted string whose body may contain backslash escapes
static QUOTED_SQL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?s)run_sql\s*\(\s*(?:query\s*=\s*)?(?:"((?:[^"\\]|\\.)*)"|'((?:[^'\\]|\\.)*)')\s*\)"#,
    )
    .expect("quoted run_sql pattern is valid")
});

/// Quoted string that may contain unescaped quotes of its own kind
static LOOSE_QUOTED_SQL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)run_sql\s*\(\s*(?:query\s*=\s*)?(?:"(.*?)"|'(.*?)')\s*\)"#)
        .expect("loose quoted run_sql pattern is valid")
});

static FENCED_SQL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)run_sql\s*\(\s*```(?:sql)?\s*(.*?)```\s*\)")
        .expect("fenced run_sql pattern is valid")
});

static SCHEMA_CALL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)get_database_schema\s*\(\s*\)|\bcall\b")
        .expect("schema call pattern is valid")
});

/// Synthesize a tool call from free text, if the text clearly asks for one
pub fn rescue_tool_call(text: &str) -> Option<ToolCall> {
    if let Some(sql) = extract_sql(text) {
        let arguments = serde_json::json!({ "query": sql }).to_string();
        tracing::info!("Rescued run_sql call from free text");
        return Some(ToolCall::new(new_call_id(), RUN_SQL, arguments));
    }

    if text.contains(SCHEMA_TOOL) && SCHEMA_CALL_RE.is_match(text) {
        tracing::info!("Rescued get_database_schema call from free text");
        return Some(ToolCall::new(new_call_id(), SCHEMA_TOOL, "{}"));
    }

    None
}

fn extract_sql(text: &str) -> Option<String> {
    let quoted = |re: &Regex| {
        re.captures(text).and_then(|caps| {
            caps.get(1)
                .map(|m| m.as_str().replace("\\\"", "\""))
                .or_else(|| caps.get(2).map(|m| m.as_str().replace("\\'", "'")))
        })
    };

    quoted(&QUOTED_SQL_RE)
        .or_else(|| quoted(&LOOSE_QUOTED_SQL_RE))
        .or_else(|| {
            FENCED_SQL_RE
                .captures(text)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string())
        })
        .map(|sql| sql.trim().to_string())
        .filter(|sql| !sql.is_empty())
}
